//! Runtime-editable timing table.
//!
//! The sequencer re-reads every value at the moment it needs it, so edits
//! made from the operator console take effect at the next read without
//! restarting the run.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::schema::{ParamName, TimingParameters};
use crate::error::ConfigError;

/// Step used by the operator's faster/slower nudges.
pub const PING_OFFSET_STEP: i64 = 5;

#[derive(Debug)]
struct LiveState {
    timings: TimingParameters,
    loop_enabled: bool,
}

/// Shared handle over the current timings and the loop flag.
///
/// Cloning shares the same underlying table.
#[derive(Debug, Clone)]
pub struct LiveTimings {
    inner: Arc<RwLock<LiveState>>,
}

impl LiveTimings {
    /// Wraps an already validated table.
    #[must_use]
    pub fn new(timings: TimingParameters, loop_enabled: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LiveState {
                timings,
                loop_enabled,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LiveState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LiveState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of one parameter.
    #[must_use]
    pub fn get(&self, name: ParamName) -> u32 {
        self.read().timings.get(name)
    }

    /// Copy of the whole table.
    #[must_use]
    pub fn snapshot(&self) -> TimingParameters {
        self.read().timings
    }

    /// Whether the sequencer should loop after CycleComplete.
    #[must_use]
    pub fn loop_enabled(&self) -> bool {
        self.read().loop_enabled
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.write().loop_enabled = enabled;
    }

    /// Sets one parameter, rejecting out-of-range values.
    ///
    /// Also rejects edits that would leave `reconnect_on_throw` pointing past
    /// the last throw.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` and leaves the table untouched.
    pub fn set(&self, name: ParamName, value: u32) -> Result<(), ConfigError> {
        name.check(value)?;
        let mut state = self.write();
        let mut next = state.timings;
        next.set_unchecked(name, value);
        if next.reconnect_on_throw > next.throw_count {
            return Err(ConfigError::InvalidValue {
                field: name.key().to_string(),
                value: value.to_string(),
                expected: format!(
                    "reconnect_on_throw ({}) <= throw_count ({})",
                    next.reconnect_on_throw, next.throw_count
                ),
            });
        }
        state.timings = next;
        drop(state);
        tracing::info!(param = %name, value, "timing updated");
        Ok(())
    }

    /// Nudges the ping offset by `delta`, saturating at its bounds.
    ///
    /// Returns the new offset.
    pub fn adjust_ping_offset(&self, delta: i64) -> u32 {
        let bounds = ParamName::PingOffset.bounds();
        let mut state = self.write();
        let next = (i64::from(state.timings.ping_offset) + delta)
            .clamp(i64::from(bounds.min), i64::from(bounds.max));
        let next = u32::try_from(next).unwrap_or(bounds.min);
        state.timings.ping_offset = next;
        drop(state);
        tracing::info!(offset_ms = next, "ping offset adjusted");
        next
    }

    /// Restores the ping offset to zero.
    pub fn reset_ping_offset(&self) {
        self.write().timings.ping_offset = 0;
    }

    /// Restores every parameter to its default. The loop flag is kept.
    pub fn reset_defaults(&self) {
        self.write().timings = TimingParameters::default();
        tracing::info!("timings reset to defaults");
    }
}

impl Default for LiveTimings {
    fn default() -> Self {
        Self::new(TimingParameters::default(), true)
    }
}
