//! Build driver for the buildd worker
//!
//! This crate turns a dispatched job into an ordered sequence of helper
//! invocations inside a sandbox, classifies each step's outcome and
//! reports exactly one disposition per build.

pub mod abort;
pub mod artifact;
pub mod classify;
pub mod error;
pub mod executor;
pub mod manager;
pub mod pipeline;
pub mod progress_ui;
pub mod report;
pub mod session;
pub mod variants;

pub use abort::{setup_signal_handlers, AbortHandle, AbortReason, AbortSignal};
pub use artifact::{ArtifactCollector, BuildArtifact};
pub use classify::{BinaryPackageClassifier, OutcomeClassifier, RecipeClassifier};
pub use error::{BuildError, Result};
pub use executor::{ProcessRunner, StepInvocation, StepRunner};
pub use manager::{BuildManager, DriverState, Transition};
pub use pipeline::{Pipeline, StepName, StepRole};
pub use progress_ui::{IndicatifProgressUI, NoOpProgressUI, ProgressUI, ProgressUIFactory};
pub use report::{BuildReporter, CollectingReporter, Notification, ReportGuard};
pub use session::BuildSession;
pub use variants::{
    BinaryPackageBuild, BuildVariant, SourcePackageRecipeBuild, TranslationTemplatesBuild,
};
