//! Step pipelines
//!
//! A pipeline is the ordered success path of one build type plus, for every
//! step, the rule deciding what its completion means and where teardown
//! starts when it fails. The driver never knows which build type it runs;
//! everything type-specific lives in the [`Pipeline`] value and the variant
//! that produced it.

use std::fmt;
use std::sync::Arc;

use buildd_core::{BuildType, Disposition};
use serde::{Deserialize, Serialize};

use crate::classify::OutcomeClassifier;
use crate::error::{BuildError, Result};

/// Pipeline stage token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    Init,
    Unpack,
    Mount,
    Sources,
    Update,
    Install,
    Sbuild,
    BuildRecipe,
    Generate,
    Reap,
    Umount,
    Cleanup,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Unpack => "UNPACK",
            Self::Mount => "MOUNT",
            Self::Sources => "SOURCES",
            Self::Update => "UPDATE",
            Self::Install => "INSTALL",
            Self::Sbuild => "SBUILD",
            Self::BuildRecipe => "BUILD_RECIPE",
            Self::Generate => "GENERATE",
            Self::Reap => "REAP",
            Self::Umount => "UMOUNT",
            Self::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a step in the build lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepRole {
    /// Prepares the sandbox
    Setup,
    /// Runs the build tool; its success triggers result gathering
    Build,
    /// Releases resources; always runs
    Teardown,
}

/// What a step's completion means
#[derive(Debug, Clone)]
pub enum OutcomeRule {
    /// Exit 0 advances; anything else decides the given disposition
    Fixed(Disposition),
    /// Exit status and log are mapped to a disposition by a classifier
    Classified(Arc<dyn OutcomeClassifier>),
    /// Failure decides `BUILDER_FAILED` unless a disposition was already
    /// decided; the pipeline continues either way
    Teardown,
    /// Completion never affects the disposition
    Ignored,
}

/// One step of a pipeline
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step name
    pub name: StepName,
    /// Lifecycle role
    pub role: StepRole,
    /// Completion rule
    pub rule: OutcomeRule,
    /// Teardown entry point when the step fails
    pub on_failure: Option<StepName>,
}

/// Ordered steps of one build type
#[derive(Debug, Clone)]
pub struct Pipeline {
    build_type: BuildType,
    steps: Vec<StepSpec>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder(build_type: BuildType) -> PipelineBuilder {
        PipelineBuilder { build_type, steps: Vec::new() }
    }

    /// Build type this pipeline belongs to
    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    /// All steps in success-path order
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// First step of the pipeline
    pub fn first(&self) -> Option<StepName> {
        self.steps.first().map(|s| s.name)
    }

    /// Look up a step, failing loudly when it is not part of the pipeline
    pub fn step(&self, name: StepName) -> Result<&StepSpec> {
        self.steps.iter().find(|s| s.name == name).ok_or_else(|| BuildError::UnknownStep {
            build_type: self.build_type.to_string(),
            step: name,
        })
    }

    /// Successor of a step on the success path
    pub fn next_after(&self, name: StepName) -> Option<StepName> {
        let index = self.steps.iter().position(|s| s.name == name)?;
        self.steps.get(index + 1).map(|s| s.name)
    }

    /// Step names in success-path order
    pub fn success_path(&self) -> Vec<StepName> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Check the structural invariants: unique names, exactly one build
    /// step, teardown steps last, and every failure edge leading into
    /// teardown.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(format!("duplicate step {}", step.name));
            }
        }

        let builds = self.steps.iter().filter(|s| s.role == StepRole::Build).count();
        if builds != 1 {
            return Err(format!("expected exactly one build step, found {builds}"));
        }

        let first_teardown = self
            .steps
            .iter()
            .position(|s| s.role == StepRole::Teardown)
            .ok_or_else(|| "pipeline has no teardown".to_string())?;
        if self.steps[first_teardown..].iter().any(|s| s.role != StepRole::Teardown) {
            return Err("setup or build step after teardown".to_string());
        }

        for step in &self.steps[..first_teardown] {
            let target = step
                .on_failure
                .ok_or_else(|| format!("step {} has no failure edge", step.name))?;
            let lands_in_teardown = self.steps[first_teardown..].iter().any(|s| s.name == target);
            if !lands_in_teardown {
                return Err(format!("failure edge of {} leads to {target}", step.name));
            }
        }

        Ok(())
    }
}

/// Builder for [`Pipeline`]
#[derive(Debug)]
pub struct PipelineBuilder {
    build_type: BuildType,
    steps: Vec<StepSpec>,
}

impl PipelineBuilder {
    /// Add a setup step with a fixed failure disposition
    pub fn setup(mut self, name: StepName, failure: Disposition, teardown_from: StepName) -> Self {
        self.steps.push(StepSpec {
            name,
            role: StepRole::Setup,
            rule: OutcomeRule::Fixed(failure),
            on_failure: Some(teardown_from),
        });
        self
    }

    /// Add the build step with a fixed failure disposition
    pub fn build_fixed(
        mut self,
        name: StepName,
        failure: Disposition,
        teardown_from: StepName,
    ) -> Self {
        self.steps.push(StepSpec {
            name,
            role: StepRole::Build,
            rule: OutcomeRule::Fixed(failure),
            on_failure: Some(teardown_from),
        });
        self
    }

    /// Add the build step with a classified outcome
    pub fn build_classified(
        mut self,
        name: StepName,
        classifier: Arc<dyn OutcomeClassifier>,
        teardown_from: StepName,
    ) -> Self {
        self.steps.push(StepSpec {
            name,
            role: StepRole::Build,
            rule: OutcomeRule::Classified(classifier),
            on_failure: Some(teardown_from),
        });
        self
    }

    /// Add a teardown step whose failure counts as a builder failure
    pub fn teardown(mut self, name: StepName) -> Self {
        self.steps.push(StepSpec {
            name,
            role: StepRole::Teardown,
            rule: OutcomeRule::Teardown,
            on_failure: None,
        });
        self
    }

    /// Add a teardown step whose failure is ignored
    pub fn teardown_ignoring_failure(mut self, name: StepName) -> Self {
        self.steps.push(StepSpec {
            name,
            role: StepRole::Teardown,
            rule: OutcomeRule::Ignored,
            on_failure: None,
        });
        self
    }

    /// Finish the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline { build_type: self.build_type, steps: self.steps }
    }
}
