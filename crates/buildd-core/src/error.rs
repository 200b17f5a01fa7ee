//! Error types for the core library

use thiserror::Error;

/// Core error type for buildd operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job description rejected before any sandbox action
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Parse error
    #[error("Parse error: {message}")]
    ParseError { message: String },
}

/// Validation failures detected while initiating a build.
///
/// These are local to one build: the build is reported as failed by the
/// builder and no step is ever started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent
    #[error("Missing required field '{field}' for {build_type} build")]
    MissingField { build_type: String, field: String },

    /// A required field is present but empty
    #[error("Field '{field}' must not be empty")]
    EmptyField { field: String },

    /// The extra parameters could not be interpreted for this build type
    #[error("Invalid parameters for {build_type} build: {reason}")]
    InvalidParameters { build_type: String, reason: String },

    /// A file named by the parameters was not shipped with the job
    #[error("Input file '{file}' is not part of the job")]
    MissingInputFile { file: String },

    /// The job was routed to a build manager of another type
    #[error("Job is a {actual} build, expected {expected}")]
    BuildTypeMismatch { expected: String, actual: String },
}

/// Result type alias for buildd operations
pub type Result<T> = std::result::Result<T, Error>;

impl ValidationError {
    /// Create a missing field error
    pub fn missing_field(build_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField { build_type: build_type.into(), field: field.into() }
    }

    /// Create an empty field error
    pub fn empty_field(field: impl Into<String>) -> Self {
        Self::EmptyField { field: field.into() }
    }

    /// Create an invalid parameters error
    pub fn invalid_parameters(build_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters { build_type: build_type.into(), reason: reason.into() }
    }
}
