//! # Playback Gate
//!
//! Single-shot, re-armable signal meaning "the sentence that was just broadcast finished
//! playing on a viewer".
//!
//! ## States:
//! - **armed**: waiting for an acknowledgment
//! - **signaled**: some viewer acknowledged; the next `wait_and_clear` returns immediately
//!
//! Any number of `signal()` calls before a wait collapse into one. `wait_and_clear` consumes
//! the signal atomically, and `arm()` discards a stale one (e.g. a late acknowledgment for a
//! sentence whose wait already timed out).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of waiting on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Signaled,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct PlaybackGate {
    signaled: AtomicBool,
    notify: Notify,
}

impl PlaybackGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any pending signal. Called right before a broadcast.
    pub fn arm(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Record a playback acknowledgment and wake the waiter, if any.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Suspend the calling task until signaled or until `timeout` elapses, then clear.
    pub async fn wait_and_clear(&self, timeout: Duration) -> GateOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a signal between the check and the await
            // still wakes us.
            notified.as_mut().enable();

            if self.signaled.swap(false, Ordering::AcqRel) {
                return GateOutcome::Signaled;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return GateOutcome::TimedOut;
            }
        }
    }
}
