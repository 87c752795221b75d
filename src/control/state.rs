//! Shared run state
//!
//! One mutex guards every run field and pairs with a condition variable
//! that wakes the sequencer's timer whenever any field changes.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::sequencer::Phase;

/// Mutable run fields.
///
/// `paused` is meaningless while `running` is false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub running: bool,
    pub paused: bool,
    pub phase: Phase,
    /// Completed cycles in the current (or last) run.
    pub cycle: u64,
    /// Bumped on every `start()`; a sequencer thread only owns the run
    /// whose generation it was spawned with.
    pub generation: u64,
}

impl RunState {
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.running && self.paused
    }

    #[must_use]
    pub const fn owned_by(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }
}

/// Point-in-time copy of the run state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub running: bool,
    pub paused: bool,
    pub phase: Phase,
    pub cycle: u64,
}

impl From<RunState> for RunSnapshot {
    fn from(state: RunState) -> Self {
        Self {
            running: state.running,
            paused: state.is_paused(),
            phase: state.phase,
            cycle: state.cycle,
        }
    }
}

impl std::fmt::Display for RunSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match (self.running, self.paused) {
            (false, _) => "stopped",
            (true, true) => "paused",
            (true, false) => "running",
        };
        write!(f, "{status} | phase {} | cycle {}", self.phase, self.cycle)
    }
}

/// Run state plus the condition variable its waiters sleep on.
#[derive(Debug, Default)]
pub struct RunShared {
    state: Mutex<RunState>,
    changed: Condvar,
}

impl RunShared {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the run state. A poisoned lock is recovered, not propagated.
    pub fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes every waiter. Call after mutating the state.
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Mutates the state under the lock and wakes every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let result = f(&mut self.lock());
        self.notify();
        result
    }

    pub(crate) const fn condvar(&self) -> &Condvar {
        &self.changed
    }

    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        (*self.lock()).into()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_is_ignored_when_not_running() {
        let state = RunState {
            running: false,
            paused: true,
            ..RunState::default()
        };
        assert!(!state.is_paused());
        assert!(!RunSnapshot::from(state).paused);
    }

    #[test]
    fn ownership_requires_matching_generation() {
        let state = RunState {
            running: true,
            generation: 3,
            ..RunState::default()
        };
        assert!(state.owned_by(3));
        assert!(!state.owned_by(2));
    }

    #[test]
    fn snapshot_display() {
        let shared = RunShared::new();
        shared.update(|s| {
            s.running = true;
            s.phase = Phase::Combat;
            s.cycle = 4;
        });
        assert_eq!(shared.snapshot().to_string(), "running | phase combat | cycle 4");
    }
}
