//! Core types for the buildd worker
//!
//! This crate provides the job description handed over by the dispatcher,
//! the immutable per-build [`JobContext`], the closed set of terminal
//! [`Disposition`]s and the error types shared by the other crates.

pub mod disposition;
pub mod error;
pub mod job;

pub use disposition::{BuildSummary, Disposition, StepOutcome};
pub use error::{Error, Result, ValidationError};
pub use job::{BuildType, JobContext, JobDescription};
