//! Async loop connecting a build manager to a step runner

use std::sync::Arc;

use buildd_core::{Disposition, JobDescription, StepOutcome};
use tracing::{error, warn};

use crate::abort::AbortHandle;
use crate::error::Result;
use crate::executor::{StepInvocation, StepRunner};
use crate::manager::{BuildManager, Transition};
use crate::pipeline::StepRole;
use crate::progress_ui::{NoOpProgressUI, ProgressUI};
use crate::report::BuildReporter;
use crate::variants::BuildVariant;

/// Runs one build to its disposition.
///
/// Steps run strictly one after another. Once an abort was requested every
/// setup or build step completes as killed, so the build falls through to
/// its teardown steps, which still run normally.
pub struct BuildSession<V: BuildVariant, R: BuildReporter> {
    manager: BuildManager<V, R>,
    runner: Arc<dyn StepRunner>,
    abort: AbortHandle,
    progress: Box<dyn ProgressUI>,
}

impl<V: BuildVariant, R: BuildReporter> BuildSession<V, R> {
    pub fn new(manager: BuildManager<V, R>, runner: Arc<dyn StepRunner>, abort: AbortHandle) -> Self {
        Self { manager, runner, abort, progress: Box::new(NoOpProgressUI) }
    }

    /// Use a custom progress display
    pub fn with_progress(mut self, progress: Box<dyn ProgressUI>) -> Self {
        self.progress = progress;
        self
    }

    /// Run the job through the whole pipeline
    pub async fn run(&mut self, description: JobDescription) -> Result<Disposition> {
        let mut transition = self.manager.initiate(description)?;
        loop {
            match transition {
                Transition::Finished(disposition) => {
                    self.progress.finish(&disposition);
                    return Ok(disposition);
                }
                Transition::Run(invocation) => {
                    self.progress.step_started(&invocation);
                    let outcome = self.execute(&invocation).await;
                    self.progress.step_finished(&invocation, &outcome);
                    transition = self.manager.advance(outcome)?;
                }
            }
        }
    }

    /// Build manager driven by this session
    pub fn manager(&self) -> &BuildManager<V, R> {
        &self.manager
    }

    /// Give back the build manager
    pub fn into_manager(self) -> BuildManager<V, R> {
        self.manager
    }

    async fn execute(&self, invocation: &StepInvocation) -> StepOutcome {
        let interruptible = invocation.role != StepRole::Teardown;
        if interruptible && self.abort.is_requested() {
            warn!(step = %invocation.step, "Build aborted, not starting step");
            return StepOutcome::killed().with_log("aborted before start");
        }

        let outcome = match self.runner.run_step(invocation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(step = %invocation.step, "Step could not be run: {}", e);
                StepOutcome::exit(StepOutcome::SPAWN_FAILED).with_log(e.to_string())
            }
        };

        if interruptible && self.abort.is_requested() && outcome.exit_status != StepOutcome::KILLED {
            warn!(step = %invocation.step, "Build aborted, treating step as killed");
            return StepOutcome::killed().with_log(outcome.log_tail);
        }
        outcome
    }
}
