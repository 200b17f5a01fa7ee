//! Error types for the build driver

use thiserror::Error;

use crate::pipeline::StepName;

/// Build driver error types.
///
/// Expected build results are [`buildd_core::Disposition`]s, not errors.
/// Everything here is either a rejected job or a driver defect that must
/// reach the top-level handler instead of being folded into a disposition.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Job rejected before any sandbox action
    #[error("Job validation failed: {0}")]
    Validation(#[from] buildd_core::ValidationError),

    /// The current step is not part of this build's pipeline
    #[error("Step {step} is not part of the {build_type} pipeline")]
    UnknownStep { build_type: String, step: StepName },

    /// `advance` was called before `initiate`
    #[error("Build has not been initiated")]
    NotInitiated,

    /// `initiate` was called twice on the same manager
    #[error("Build {build_id} was already initiated")]
    AlreadyInitiated { build_id: String },

    /// `advance` was called after the build finished
    #[error("Build {build_id} already finished")]
    AlreadyFinished { build_id: String },

    /// Result files could not be gathered
    #[error("Failed to collect artifacts: {reason}")]
    ArtifactCollection { reason: String },

    /// Step could not be executed
    #[error("Failed to run step {step}: {reason}")]
    StepExecution { step: StepName, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

impl BuildError {
    /// Create an artifact collection error
    pub fn artifact_collection(reason: impl Into<String>) -> Self {
        Self::ArtifactCollection { reason: reason.into() }
    }

    /// Create a step execution error
    pub fn step_execution(step: StepName, reason: impl Into<String>) -> Self {
        Self::StepExecution { step, reason: reason.into() }
    }

    /// Check if the error is a driver defect rather than a rejected job
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::UnknownStep { .. }
                | Self::NotInitiated
                | Self::AlreadyInitiated { .. }
                | Self::AlreadyFinished { .. }
        )
    }
}
