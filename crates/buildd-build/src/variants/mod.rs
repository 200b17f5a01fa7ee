//! Build-type variants
//!
//! Each variant supplies the pieces the generic [`BuildManager`] needs for
//! one build type: how to read and check its parameters, its pipeline, the
//! command line of every step and which files make up a successful result.
//!
//! [`BuildManager`]: crate::manager::BuildManager

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use buildd_config::Config;
use buildd_core::{BuildType, JobContext, JobDescription, ValidationError};
use serde::de::DeserializeOwned;

use crate::error::{BuildError, Result};
use crate::executor::StepInvocation;
use crate::pipeline::{Pipeline, StepName};

pub mod binary;
pub mod recipe;
pub mod translation;

pub use binary::{BinaryPackageBuild, BinaryPackageParams, BinaryPackageRequest};
pub use recipe::{RecipeParams, SourcePackageRecipeBuild};
pub use translation::{TranslationTemplatesBuild, TranslationTemplatesParams};

/// Build-type specific behaviour plugged into the generic build manager
pub trait BuildVariant: Send {
    /// Parameters as sent by the dispatcher
    type Request: DeserializeOwned;

    /// Parameters after validation
    type Params: fmt::Debug + Send + Sync;

    /// Build type handled by this variant
    fn build_type(&self) -> BuildType;

    /// Pipeline for one build
    fn pipeline(&self) -> Pipeline;

    /// Validate the request against the job and normalize it
    fn check_parameters(
        &self,
        job: &JobDescription,
        request: Self::Request,
    ) -> std::result::Result<Self::Params, ValidationError>;

    /// Command line of a step; `None` skips the step
    fn invocation(
        &self,
        step: StepName,
        job: &JobContext<Self::Params>,
    ) -> Result<Option<StepInvocation>>;

    /// Result files of a successful build
    fn gather_results(&self, job: &JobContext<Self::Params>) -> Result<Vec<PathBuf>>;
}

/// Filesystem layout of one build's sandbox
#[derive(Debug, Clone)]
pub struct SandboxLayout {
    build_dir: PathBuf,
    build_user: String,
}

impl SandboxLayout {
    pub fn new(config: &Config, build_id: &str) -> Self {
        Self { build_dir: config.build_dir(build_id), build_user: config.build_user.clone() }
    }

    /// Per-build directory holding the sandbox and package results
    pub fn build_dir(&self) -> PathBuf {
        self.build_dir.clone()
    }

    /// Root of the unpacked sandbox
    pub fn chroot(&self) -> PathBuf {
        self.build_dir.join("chroot-autobuild")
    }

    /// Work directory of the build user inside the sandbox
    pub fn work_dir(&self) -> PathBuf {
        self.chroot().join("home").join(&self.build_user).join("work")
    }
}

/// Steps shared by every sandbox-based pipeline
#[derive(Debug, Clone)]
pub struct CommonSteps {
    config: Arc<Config>,
}

impl CommonSteps {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Command line of a shared step. `archives` feeds the optional
    /// SOURCES step, which is skipped when empty.
    pub fn invocation<P>(
        &self,
        build_type: BuildType,
        step: StepName,
        job: &JobContext<P>,
        archives: &[String],
    ) -> Result<Option<StepInvocation>> {
        let helpers = &self.config.helpers;
        let build_id = job.build_id();
        let id_arg = vec![build_id.to_string()];

        let invocation = match step {
            StepName::Init => self.helper_step(job, step, &helpers.prep, vec![]),
            StepName::Unpack => self
                .helper_step(job, step, &helpers.unpack, vec![
                    build_id.to_string(),
                    job.sandbox_id().to_string(),
                ])
                .as_root(),
            StepName::Mount => self.helper_step(job, step, &helpers.mount, id_arg).as_root(),
            StepName::Sources => {
                if archives.is_empty() {
                    return Ok(None);
                }
                let args = std::iter::once(build_id.to_string())
                    .chain(archives.iter().cloned())
                    .collect();
                self.helper_step(job, step, &helpers.sources, args).as_root()
            }
            StepName::Update => self
                .helper_step(job, step, &helpers.update, vec![
                    build_id.to_string(),
                    self.config.architecture.clone(),
                ])
                .as_root(),
            StepName::Reap => self.helper_step(job, step, &helpers.reap, id_arg).as_root(),
            StepName::Umount => self.helper_step(job, step, &helpers.umount, id_arg).as_root(),
            StepName::Cleanup => self.helper_step(job, step, &helpers.cleanup, id_arg).as_root(),
            other => {
                return Err(BuildError::UnknownStep {
                    build_type: build_type.to_string(),
                    step: other,
                })
            }
        };

        Ok(Some(invocation))
    }

    /// Invocation of a helper executable
    pub fn helper_step<P>(
        &self,
        job: &JobContext<P>,
        step: StepName,
        helper: &str,
        args: Vec<String>,
    ) -> StepInvocation {
        StepInvocation::new(job.build_id(), step, self.config.helper(helper), args)
    }

    /// Sandbox layout of a build
    pub fn layout<P>(&self, job: &JobContext<P>) -> SandboxLayout {
        SandboxLayout::new(&self.config, job.build_id())
    }
}

/// Reject empty required strings of a request
pub(crate) fn require_fields(fields: &[(&str, &str)]) -> std::result::Result<(), ValidationError> {
    for (name, value) in fields {
        buildd_core::job::require_non_empty(name, value)?;
    }
    Ok(())
}
