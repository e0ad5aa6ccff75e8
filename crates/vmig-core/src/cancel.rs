//! Run cancellation, triggered by Ctrl-C in the CLI.
//!
//! The sequencer checks the token before each step, and every wait in the
//! stages goes through [`CancellationToken::sleep`], which wakes as soon as
//! the token fires instead of finishing a long poll interval. Cancellation
//! never skips teardown or the summary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Signal {
    fired: AtomicBool,
    wake: Notify,
}

/// Shared stop flag for one run.
///
/// Clones observe the same state, so the signal handler keeps one clone and
/// the sequencer another.
///
/// # Example
///
/// ```
/// use vmig_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let on_ctrl_c = token.clone();
///
/// on_ctrl_c.cancel();
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    signal: Arc<Signal>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run and wake every pending [`sleep`](Self::sleep).
    ///
    /// Safe to call from a non-async signal handler thread.
    pub fn cancel(&self) {
        self.signal.fired.store(true, Ordering::SeqCst);
        self.signal.wake.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.fired.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Resolve once the token fires.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag is read so a concurrent cancel is not lost
            let woken = self.signal.wake.notified();
            if self.is_cancelled() {
                return;
            }
            woken.await;
        }
    }

    /// Wait for `duration`, or less if the token fires first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancelledError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check(),
            _ = self.cancelled() => Err(CancelledError),
        }
    }
}

/// The run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::MigrationError {
    fn from(_: CancelledError) -> Self {
        crate::error::MigrationError::Cancelled
    }
}
