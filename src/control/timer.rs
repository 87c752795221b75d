//! Cancellable, pausable sleep.
//!
//! The sequencer's only suspension point. A wait ends early the moment the
//! run stops, and time spent paused is not charged against it.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use super::state::RunShared;

/// How often a paused waiter re-checks the run state on its own.
pub const PAUSE_RECHECK: Duration = Duration::from_millis(50);

/// Sleeps against a shared run state.
#[derive(Debug, Clone)]
pub struct CancellableTimer {
    shared: Arc<RunShared>,
}

impl CancellableTimer {
    #[must_use]
    pub const fn new(shared: Arc<RunShared>) -> Self {
        Self { shared }
    }

    /// Waits `ms` milliseconds.
    ///
    /// Returns `false` if the run stopped before the wait finished. A
    /// non-positive `ms` returns the running flag immediately.
    #[must_use]
    pub fn sleep(&self, ms: i64) -> bool {
        u64::try_from(ms).map_or_else(
            |_| self.shared.is_running(),
            |ms| self.sleep_for(Duration::from_millis(ms)),
        )
    }

    /// Waits for `duration`, see [`sleep`](Self::sleep).
    #[must_use]
    pub fn sleep_for(&self, duration: Duration) -> bool {
        let cond = self.shared.condvar();
        let mut state = self.shared.lock();
        if duration.is_zero() {
            return state.running;
        }

        let mut remaining = duration;
        loop {
            if !state.running {
                return false;
            }
            if state.paused {
                state = cond
                    .wait_timeout(state, PAUSE_RECHECK)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                continue;
            }
            if remaining.is_zero() {
                return true;
            }
            let started = Instant::now();
            state = cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            remaining = remaining.saturating_sub(started.elapsed());
        }
    }
}
