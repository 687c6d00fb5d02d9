//! Cooperative cancellation state shared between the lifecycle manager
//! and one race's tick loop.
//!
//! Atomic flags give the tick loop lock-free checks on its hot path;
//! [`Notify`] wakes the loop promptly out of its inter-tick sleep and
//! lets `stop_race` wait (bounded) for the loop to acknowledge exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Control handle for one race's tick loop.
#[derive(Debug, Default)]
pub struct RaceControl {
    stop_requested: AtomicBool,
    stop_notify: Notify,
    exited: AtomicBool,
    exit_notify: Notify,
}

impl RaceControl {
    /// Create a fresh control handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cooperative cancellation and wake the loop if it is
    /// sleeping between ticks.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested. Used by the loop to race
    /// its inter-tick sleep against cancellation.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    /// Mark the loop as exited and wake anyone waiting on it.
    ///
    /// Called by the tick loop on every exit path, after final state
    /// transitions and the final telemetry flush.
    pub fn acknowledge_exit(&self) {
        self.exited.store(true, Ordering::Release);
        self.exit_notify.notify_waiters();
    }

    /// Whether the loop has acknowledged exit.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Wait up to `bound` for the loop to acknowledge exit.
    ///
    /// Returns `true` if the acknowledgement arrived in time.
    pub async fn wait_for_exit(&self, bound: Duration) -> bool {
        let wait = async {
            while !self.has_exited() {
                self.exit_notify.notified().await;
            }
        };
        tokio::time::timeout(bound, wait).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn stop_flag_round_trip() {
        let control = RaceControl::new();
        assert!(!control.is_stop_requested());
        control.request_stop();
        assert!(control.is_stop_requested());
        // Resolves immediately once the flag is set.
        control.stopped().await;
    }

    #[tokio::test]
    async fn wait_for_exit_times_out_without_ack() {
        let control = RaceControl::new();
        assert!(!control.wait_for_exit(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_for_exit_sees_ack() {
        let control = Arc::new(RaceControl::new());
        let waiter = Arc::clone(&control);
        let handle = tokio::spawn(async move { waiter.wait_for_exit(Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        control.acknowledge_exit();
        assert_eq!(handle.await.ok(), Some(true));
    }

    #[tokio::test]
    async fn ack_before_wait_still_observed() {
        let control = RaceControl::new();
        control.acknowledge_exit();
        assert!(control.wait_for_exit(Duration::from_millis(10)).await);
    }
}
