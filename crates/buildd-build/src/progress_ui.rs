//! Progress display for build steps

use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use buildd_core::{Disposition, StepOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::executor::StepInvocation;

/// Trait for progress UI implementations
pub trait ProgressUI: Send + Sync {
    /// A step was started
    fn step_started(&self, invocation: &StepInvocation);

    /// A step completed
    fn step_finished(&self, invocation: &StepInvocation, outcome: &StepOutcome);

    /// The build reached its disposition
    fn finish(&self, disposition: &Disposition);
}

/// Spinner showing the running step
pub struct IndicatifProgressUI {
    bar: ProgressBar,
    step_started: Mutex<Option<Instant>>,
    start_time: Instant,
}

impl IndicatifProgressUI {
    /// Create a new indicatif progress UI
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner:.green} [{elapsed_precise}] {wide_msg}")
                .expect("Valid template"),
        );
        bar.set_prefix("build");

        Self { bar, step_started: Mutex::new(None), start_time: Instant::now() }
    }

    fn step_elapsed(&self) -> Duration {
        self.step_started
            .lock()
            .ok()
            .and_then(|started| started.map(|t| t.elapsed()))
            .unwrap_or_default()
    }
}

impl Default for IndicatifProgressUI {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressUI for IndicatifProgressUI {
    fn step_started(&self, invocation: &StepInvocation) {
        if let Ok(mut started) = self.step_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(format!("{} {}", invocation.step, invocation.command_line()));
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn step_finished(&self, invocation: &StepInvocation, outcome: &StepOutcome) {
        let mark = if outcome.succeeded() { "✓" } else { "✗" };
        self.bar.println(format!(
            "{mark} {:<12} exit {:>3}  {:.1}s",
            invocation.step.to_string(),
            outcome.exit_status,
            self.step_elapsed().as_secs_f64()
        ));
    }

    fn finish(&self, disposition: &Disposition) {
        let elapsed = self.start_time.elapsed();
        self.bar.finish_with_message(format!("{disposition} after {elapsed:.1?}"));
    }
}

/// Progress UI that only logs
pub struct NoOpProgressUI;

impl ProgressUI for NoOpProgressUI {
    fn step_started(&self, invocation: &StepInvocation) {
        info!("Step {}: {}", invocation.step, invocation.command_line());
    }

    fn step_finished(&self, invocation: &StepInvocation, outcome: &StepOutcome) {
        if outcome.succeeded() {
            info!("Step {} succeeded", invocation.step);
        } else {
            warn!("Step {} exited with {}", invocation.step, outcome.exit_status);
        }
    }

    fn finish(&self, disposition: &Disposition) {
        info!("Build finished: {}", disposition);
    }
}

/// Progress UI factory
pub struct ProgressUIFactory;

impl ProgressUIFactory {
    /// Create a progress UI based on environment
    pub fn create(interactive: bool) -> Box<dyn ProgressUI> {
        if interactive && std::io::stderr().is_terminal() {
            Box::new(IndicatifProgressUI::new())
        } else {
            Box::new(NoOpProgressUI)
        }
    }

    /// Create a no-op progress UI
    pub fn create_noop() -> Box<dyn ProgressUI> {
        Box::new(NoOpProgressUI)
    }
}
