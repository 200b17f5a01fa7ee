//! Build abort handling
//!
//! Abandoning a build never skips teardown. An abort kills the step that is
//! currently running (unless it is a teardown step) and every later
//! non-teardown completion is delivered to the driver as a killed step, so
//! the pipeline walks its failure edge into teardown and releases the
//! sandbox.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info};

/// Why a build was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Operator interrupt (Ctrl-C)
    UserRequest,
    /// Termination requested by the dispatcher or init system
    External,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::UserRequest => write!(f, "user request"),
            AbortReason::External => write!(f, "external request"),
        }
    }
}

/// Abort request with its reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortSignal {
    pub reason: AbortReason,
    pub message: Option<String>,
}

impl AbortSignal {
    pub fn user_request() -> Self {
        Self {
            reason: AbortReason::UserRequest,
            message: Some("Abort requested by user (Ctrl-C)".to_string()),
        }
    }

    pub fn external(message: Option<String>) -> Self {
        Self { reason: AbortReason::External, message }
    }
}

/// Cloneable handle shared by the session, the runner and signal handlers
#[derive(Debug, Clone)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
    sender: Arc<watch::Sender<Option<AbortSignal>>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { requested: Arc::new(AtomicBool::new(false)), sender: Arc::new(sender) }
    }

    /// Request an abort; later requests keep the first signal
    pub fn request(&self, signal: AbortSignal) {
        if self.requested.swap(true, Ordering::AcqRel) {
            debug!("Abort already requested, ignoring {}", signal.reason);
            return;
        }
        info!("Abort requested: {}", signal.reason);
        if let Some(message) = &signal.message {
            info!("Abort message: {}", message);
        }
        self.sender.send_replace(Some(signal));
    }

    /// Check if an abort was requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// The abort signal, if any
    pub fn signal(&self) -> Option<AbortSignal> {
        self.sender.borrow().clone()
    }

    /// Resolve once an abort has been requested
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // Only fails when the sender is gone, which cannot happen while we hold it
        let _ = receiver.wait_for(|signal| signal.is_some()).await;
    }
}

/// Turn SIGINT/SIGTERM into abort requests
pub fn setup_signal_handlers(abort: AbortHandle) {
    info!("Setting up signal handlers for build abort");

    let abort_int = abort.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT (Ctrl-C)");
            abort_int.request(AbortSignal::user_request());
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) else {
            return;
        };
        sigterm.recv().await;
        info!("Received SIGTERM");
        abort.request(AbortSignal::external(Some("SIGTERM received".to_string())));
    });

    debug!("Signal handlers setup complete");
}
