//! Interruptible sleep shared by the background maintenance threads.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A stop flag a worker thread can sleep on. `stop` wakes the sleeper
/// immediately, so shutdown never waits out a full interval.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `interval` or until stopped. Returns true when stopped.
    pub fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let (guard, timeout) = self
                .changed
                .wait_timeout(stopped, interval)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
            if timeout.timed_out() {
                return *stopped;
            }
        }
        true
    }

    pub fn stop(&self) {
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.changed.notify_all();
    }

    /// Re-arm after a stop so the owner can spawn a fresh worker.
    pub fn reset(&self) {
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = false;
    }
}
