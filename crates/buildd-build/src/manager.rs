//! Build manager state machine
//!
//! A [`BuildManager`] drives one build through its variant's pipeline. It
//! never runs anything itself: [`BuildManager::initiate`] and
//! [`BuildManager::advance`] return the next [`StepInvocation`] to execute,
//! and the caller feeds the step's outcome back in. The disposition is
//! reported through a [`ReportGuard`], so at most one notification ever
//! reaches the dispatcher.

use std::path::PathBuf;

use buildd_core::{Disposition, JobContext, JobDescription, StepOutcome, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{BuildError, Result};
use crate::executor::StepInvocation;
use crate::pipeline::{OutcomeRule, Pipeline, StepName, StepRole};
use crate::report::{BuildReporter, ReportGuard};
use crate::variants::BuildVariant;

/// What the caller has to do next
#[derive(Debug, Clone)]
pub enum Transition {
    /// Run this step and pass its outcome to [`BuildManager::advance`]
    Run(StepInvocation),
    /// The build is over
    Finished(Disposition),
}

impl Transition {
    /// Step to run, if any
    pub fn invocation(&self) -> Option<&StepInvocation> {
        match self {
            Self::Run(invocation) => Some(invocation),
            Self::Finished(_) => None,
        }
    }
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Waiting for a job
    Idle,
    /// Waiting for the outcome of a step
    Running(StepName),
    /// Disposition reported, pipeline done
    Finished,
}

/// Drives one build of a given type
#[derive(Debug)]
pub struct BuildManager<V: BuildVariant, R: BuildReporter> {
    variant: V,
    pipeline: Pipeline,
    reports: ReportGuard<R>,
    job: Option<JobContext<V::Params>>,
    build_id: Option<String>,
    state: DriverState,
    visited: Vec<StepName>,
    result_files: Vec<PathBuf>,
}

impl<V: BuildVariant, R: BuildReporter> BuildManager<V, R> {
    /// Create a manager for a single build
    pub fn new(variant: V, reporter: R) -> Self {
        let pipeline = variant.pipeline();
        Self {
            variant,
            pipeline,
            reports: ReportGuard::new(reporter),
            job: None,
            build_id: None,
            state: DriverState::Idle,
            visited: Vec::new(),
            result_files: Vec::new(),
        }
    }

    /// Accept a job and return its first step.
    ///
    /// A job that fails validation is reported as a builder failure and
    /// rejected with the validation error; no step is started.
    pub fn initiate(&mut self, description: JobDescription) -> Result<Transition> {
        if self.state != DriverState::Idle {
            return Err(BuildError::AlreadyInitiated { build_id: self.build_id_or_unknown() });
        }
        self.build_id = Some(description.build_id.clone());

        let params = match self.accept(&description) {
            Ok(params) => params,
            Err(e) => {
                error!(build_id = %description.build_id, "Rejecting job: {}", e);
                self.reports.decide(Disposition::BuilderFailed, &[]);
                self.state = DriverState::Finished;
                return Err(e.into());
            }
        };

        info!(
            build_id = %description.build_id,
            build_type = %description.build_type,
            "Initiating build"
        );
        debug!("Build parameters: {:?}", params);
        self.job = Some(JobContext::new(description, params));

        match self.pipeline.first() {
            Some(first) => self.start_from(first),
            None => self.finish(),
        }
    }

    /// Feed the outcome of the running step and return the next transition
    pub fn advance(&mut self, outcome: StepOutcome) -> Result<Transition> {
        let current = match self.state {
            DriverState::Running(step) => step,
            DriverState::Idle => return Err(BuildError::NotInitiated),
            DriverState::Finished => {
                return Err(BuildError::AlreadyFinished { build_id: self.build_id_or_unknown() })
            }
        };

        let spec = self.pipeline.step(current)?.clone();
        let succeeded = outcome.succeeded();
        debug!(step = %current, exit_status = outcome.exit_status, "Step completed");

        let failure = match &spec.rule {
            OutcomeRule::Fixed(disposition) => (!succeeded).then(|| disposition.clone()),
            OutcomeRule::Classified(classifier) => {
                let disposition = classifier.classify(outcome.exit_status, &outcome.log_tail);
                (!disposition.is_ok()).then_some(disposition)
            }
            OutcomeRule::Teardown => {
                if !succeeded {
                    warn!(step = %current, exit_status = outcome.exit_status, "Teardown step failed");
                    if !self.reports.is_decided() {
                        self.reports.decide(Disposition::BuilderFailed, &[]);
                    }
                }
                None
            }
            OutcomeRule::Ignored => {
                if !succeeded {
                    debug!(step = %current, "Ignoring failure of {}", current);
                }
                None
            }
        };

        if let Some(disposition) = failure {
            warn!(step = %current, exit_status = outcome.exit_status, "Step failed: {}", disposition);
            self.reports.decide(disposition, &[]);
            return match spec.on_failure {
                Some(target) => self.start_from(target),
                None => self.finish(),
            };
        }

        if spec.role == StepRole::Build {
            self.gather_results();
        }

        match self.pipeline.next_after(current) {
            Some(next) => self.start_from(next),
            None => self.finish(),
        }
    }

    /// Step whose outcome is awaited
    pub fn current_step(&self) -> Option<StepName> {
        match self.state {
            DriverState::Running(step) => Some(step),
            _ => None,
        }
    }

    /// Steps started so far, in order
    pub fn visited(&self) -> &[StepName] {
        &self.visited
    }

    /// Disposition decided so far
    pub fn disposition(&self) -> Option<&Disposition> {
        self.reports.decided()
    }

    /// Driver state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Check if the build is over
    pub fn is_finished(&self) -> bool {
        self.state == DriverState::Finished
    }

    /// Check if the running step is a teardown step
    pub fn in_teardown(&self) -> bool {
        self.current_step()
            .and_then(|step| self.pipeline.step(step).ok())
            .is_some_and(|spec| spec.role == StepRole::Teardown)
    }

    /// Accepted job
    pub fn job(&self) -> Option<&JobContext<V::Params>> {
        self.job.as_ref()
    }

    /// Build-type variant
    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Pipeline of this build type
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Reporter receiving the disposition
    pub fn reporter(&self) -> &R {
        self.reports.reporter()
    }

    /// Files gathered after a successful build step
    pub fn result_files(&self) -> &[PathBuf] {
        &self.result_files
    }

    fn accept(&self, description: &JobDescription) -> std::result::Result<V::Params, ValidationError> {
        let expected = self.variant.build_type();
        if description.build_type != expected {
            return Err(ValidationError::BuildTypeMismatch {
                expected: expected.to_string(),
                actual: description.build_type.to_string(),
            });
        }
        description.validate_identity()?;
        let request = description.parameters::<V::Request>()?;
        self.variant.check_parameters(description, request)
    }

    fn start_from(&mut self, mut step: StepName) -> Result<Transition> {
        loop {
            let role = self.pipeline.step(step)?.role;
            let job = self.job.as_ref().ok_or(BuildError::NotInitiated)?;

            if let Some(mut invocation) = self.variant.invocation(step, job)? {
                invocation.role = role;
                info!(build_id = %invocation.build_id, step = %step, "Running {}", invocation.command_line());
                self.state = DriverState::Running(step);
                self.visited.push(step);
                return Ok(Transition::Run(invocation));
            }

            debug!(step = %step, "Skipping step");
            match self.pipeline.next_after(step) {
                Some(next) => step = next,
                None => return self.finish(),
            }
        }
    }

    fn gather_results(&mut self) {
        let Some(job) = self.job.as_ref() else {
            return;
        };
        match self.variant.gather_results(job) {
            Ok(files) => self.result_files = files,
            Err(e) => {
                error!(build_id = %job.build_id(), "Failed to gather results: {}", e);
                self.reports.decide(Disposition::BuilderFailed, &[]);
            }
        }
    }

    fn finish(&mut self) -> Result<Transition> {
        if !self.reports.is_decided() {
            self.reports.decide(Disposition::Ok, &self.result_files);
        }
        self.state = DriverState::Finished;

        let disposition = self.reports.decided().cloned().unwrap_or(Disposition::BuilderFailed);
        info!(build_id = %self.build_id_or_unknown(), "Build finished: {}", disposition);
        Ok(Transition::Finished(disposition))
    }

    fn build_id_or_unknown(&self) -> String {
        self.build_id.clone().unwrap_or_else(|| "<unknown>".to_string())
    }
}
