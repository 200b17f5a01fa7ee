//! Disposition reporting
//!
//! The dispatcher must see exactly one disposition per build. Teardown can
//! fail after a build failure was already reported, so every notification
//! goes through a [`ReportGuard`] that keeps the first decision and drops
//! anything later.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use buildd_core::Disposition;
use tracing::{info, warn};

/// Outbound notifications to the dispatcher
pub trait BuildReporter: Send {
    /// Build succeeded with the given result files
    fn ok(&mut self, result_files: &[PathBuf]);

    /// Build is blocked on a missing dependency
    fn dependency_wait(&mut self, dependencies: &str);

    /// Transient failure, retry without penalty
    fn given_back(&mut self);

    /// Package failed to build
    fn package_failed(&mut self);

    /// Worker failed
    fn builder_failed(&mut self);

    /// Sandbox could not be prepared
    fn chroot_failed(&mut self);
}

impl<R: BuildReporter + ?Sized> BuildReporter for Box<R> {
    fn ok(&mut self, result_files: &[PathBuf]) {
        (**self).ok(result_files)
    }

    fn dependency_wait(&mut self, dependencies: &str) {
        (**self).dependency_wait(dependencies)
    }

    fn given_back(&mut self) {
        (**self).given_back()
    }

    fn package_failed(&mut self) {
        (**self).package_failed()
    }

    fn builder_failed(&mut self) {
        (**self).builder_failed()
    }

    fn chroot_failed(&mut self) {
        (**self).chroot_failed()
    }
}

/// One-shot guard in front of a [`BuildReporter`]
#[derive(Debug)]
pub struct ReportGuard<R> {
    reporter: R,
    decided: Option<Disposition>,
}

impl<R: BuildReporter> ReportGuard<R> {
    /// Wrap a reporter
    pub fn new(reporter: R) -> Self {
        Self { reporter, decided: None }
    }

    /// Decide the build's disposition and notify the dispatcher.
    ///
    /// Returns `false` without notifying anyone when a disposition was
    /// already decided.
    pub fn decide(&mut self, disposition: Disposition, result_files: &[PathBuf]) -> bool {
        if let Some(first) = &self.decided {
            warn!(
                decided = %first,
                suppressed = %disposition,
                "Disposition already reported, ignoring later outcome"
            );
            return false;
        }

        info!(disposition = %disposition, "Returning build status");
        match &disposition {
            Disposition::Ok => self.reporter.ok(result_files),
            Disposition::DependencyWait { dependencies } => {
                self.reporter.dependency_wait(dependencies)
            }
            Disposition::GivenBack => self.reporter.given_back(),
            Disposition::PackageFailed => self.reporter.package_failed(),
            Disposition::BuilderFailed => self.reporter.builder_failed(),
            Disposition::ChrootFailed => self.reporter.chroot_failed(),
        }
        self.decided = Some(disposition);
        true
    }

    /// Disposition decided so far
    pub fn decided(&self) -> Option<&Disposition> {
        self.decided.as_ref()
    }

    /// Check if a disposition was decided
    pub fn is_decided(&self) -> bool {
        self.decided.is_some()
    }

    /// Wrapped reporter
    pub fn reporter(&self) -> &R {
        &self.reporter
    }
}

/// Notification as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub disposition: Disposition,
    pub result_files: Vec<PathBuf>,
}

/// Reporter that records every notification it receives.
///
/// Clones share the same record, so one clone can be handed to the build
/// manager while another is kept to read the outcome.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// The most recent notification
    pub fn last(&self) -> Option<Notification> {
        self.notifications.lock().ok().and_then(|n| n.last().cloned())
    }

    fn record(&mut self, disposition: Disposition, result_files: &[PathBuf]) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(Notification { disposition, result_files: result_files.to_vec() });
        }
    }
}

impl BuildReporter for CollectingReporter {
    fn ok(&mut self, result_files: &[PathBuf]) {
        self.record(Disposition::Ok, result_files);
    }

    fn dependency_wait(&mut self, dependencies: &str) {
        self.record(Disposition::dependency_wait(dependencies), &[]);
    }

    fn given_back(&mut self) {
        self.record(Disposition::GivenBack, &[]);
    }

    fn package_failed(&mut self) {
        self.record(Disposition::PackageFailed, &[]);
    }

    fn builder_failed(&mut self) {
        self.record(Disposition::BuilderFailed, &[]);
    }

    fn chroot_failed(&mut self) {
        self.record(Disposition::ChrootFailed, &[]);
    }
}
