//! Simulated strategy: records calls and touches nothing on the host.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::ConnectivityStrategy;
use crate::config::schema::StrategyKind;
use crate::error::ConnectivityError;

/// A recorded strategy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedCall {
    Disconnect,
    Reconnect,
    Cleanup,
}

#[derive(Debug, Default)]
struct Log {
    calls: Vec<(StrategyKind, SimulatedCall)>,
    fail_disconnect: bool,
    fail_reconnect: bool,
}

/// Strategy that only records what it was asked to do.
///
/// Clones (and [`labelled`](Self::labelled) copies) share one log, so a test
/// can hand the controller boxed copies and still inspect the calls.
#[derive(Debug, Clone)]
pub struct SimulatedStrategy {
    label: StrategyKind,
    log: Arc<Mutex<Log>>,
}

impl SimulatedStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: StrategyKind::Simulated,
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    /// A copy sharing this log that answers to `kind`.
    #[must_use]
    pub fn labelled(&self, kind: StrategyKind) -> Self {
        Self {
            label: kind,
            log: Arc::clone(&self.log),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call across all copies, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(StrategyKind, SimulatedCall)> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn calls_for(&self, kind: StrategyKind) -> Vec<SimulatedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, call)| *call)
            .collect()
    }

    /// How many times `call` was made across all copies.
    #[must_use]
    pub fn count(&self, call: SimulatedCall) -> usize {
        self.lock().calls.iter().filter(|(_, c)| *c == call).count()
    }

    pub fn fail_next_disconnect(&self) {
        self.lock().fail_disconnect = true;
    }

    pub fn fail_next_reconnect(&self) {
        self.lock().fail_reconnect = true;
    }

    fn record(&self, call: SimulatedCall) {
        self.lock().calls.push((self.label, call));
    }
}

impl Default for SimulatedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityStrategy for SimulatedStrategy {
    fn kind(&self) -> StrategyKind {
        self.label
    }

    fn is_available(&self) -> bool {
        true
    }

    fn disconnect(&mut self) -> Result<(), ConnectivityError> {
        if std::mem::take(&mut self.lock().fail_disconnect) {
            return Err(ConnectivityError::Unavailable {
                strategy: self.label.as_str(),
            });
        }
        tracing::debug!(strategy = %self.label, "simulated disconnect");
        self.record(SimulatedCall::Disconnect);
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        if std::mem::take(&mut self.lock().fail_reconnect) {
            return Err(ConnectivityError::Unavailable {
                strategy: self.label.as_str(),
            });
        }
        tracing::debug!(strategy = %self.label, "simulated reconnect");
        self.record(SimulatedCall::Reconnect);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.record(SimulatedCall::Cleanup);
    }
}
