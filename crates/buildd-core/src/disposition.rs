//! Terminal build dispositions and step outcomes

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a build, reported to the dispatcher exactly once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Build succeeded
    Ok,

    /// Build is blocked on a missing dependency
    DependencyWait {
        /// Missing dependency, e.g. `libfoo-dev (>= 1.2)`
        dependencies: String,
    },

    /// Transient failure, retry without penalty
    GivenBack,

    /// The package itself failed to build
    PackageFailed,

    /// The worker failed
    BuilderFailed,

    /// The sandbox could not be prepared
    ChrootFailed,
}

impl Disposition {
    /// Create a dependency-wait disposition
    pub fn dependency_wait(dependencies: impl Into<String>) -> Self {
        Self::DependencyWait { dependencies: dependencies.into() }
    }

    /// Check if the build succeeded
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Short name used in logs and status output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::DependencyWait { .. } => "DEPENDENCY_WAIT",
            Self::GivenBack => "GIVEN_BACK",
            Self::PackageFailed => "PACKAGE_FAILED",
            Self::BuilderFailed => "BUILDER_FAILED",
            Self::ChrootFailed => "CHROOT_FAILED",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyWait { dependencies } => write!(f, "DEPENDENCY_WAIT({dependencies})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Completion signal of one step execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Exit status of the step's process
    pub exit_status: i32,

    /// Bounded tail of the step's output
    pub log_tail: String,
}

impl StepOutcome {
    /// Exit status used for steps killed on timeout or abort
    pub const KILLED: i32 = 137;

    /// Exit status used when the step's process could not be started
    pub const SPAWN_FAILED: i32 = 127;

    /// Create an outcome without log output
    pub fn exit(exit_status: i32) -> Self {
        Self { exit_status, log_tail: String::new() }
    }

    /// Create a successful outcome
    pub fn success() -> Self {
        Self::exit(0)
    }

    /// Create an outcome for a killed step
    pub fn killed() -> Self {
        Self::exit(Self::KILLED)
    }

    /// Attach a log excerpt
    pub fn with_log(mut self, log_tail: impl Into<String>) -> Self {
        self.log_tail = log_tail.into();
        self
    }

    /// Check if the step exited with status 0
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Record of a finished build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Build identifier
    pub build_id: String,

    /// Reported disposition
    #[serde(flatten)]
    pub disposition: Disposition,

    /// Result files attached to a successful build
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_files: Vec<PathBuf>,

    /// Start time
    pub start_time: DateTime<Utc>,

    /// End time
    pub end_time: DateTime<Utc>,

    /// Duration in seconds
    pub duration_secs: f64,
}

impl BuildSummary {
    /// Create a summary for a build that started at `start_time` and ends now
    pub fn new(
        build_id: impl Into<String>,
        disposition: Disposition,
        result_files: Vec<PathBuf>,
        start_time: DateTime<Utc>,
    ) -> Self {
        let end_time = Utc::now();
        Self {
            build_id: build_id.into(),
            disposition,
            result_files,
            start_time,
            end_time,
            duration_secs: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
        }
    }
}
