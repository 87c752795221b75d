//! Phase names and the held-control ledger.

use serde::Serialize;

use crate::actuator::{ActuatorPort, Control, Key};

/// One named stage of a cycle.
///
/// Work phases run in declaration order; `Idle` is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Charge,
    Cancel,
    Disconnect,
    Inventory,
    Combat,
    Pickup,
    CycleComplete,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Charge => "charge",
            Self::Cancel => "cancel",
            Self::Disconnect => "disconnect",
            Self::Inventory => "inventory",
            Self::Combat => "combat",
            Self::Pickup => "pickup",
            Self::CycleComplete => "cycle_complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls the sequencer has asserted and not yet released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeldControls {
    primary: bool,
    secondary: bool,
    keys: Vec<Key>,
}

impl HeldControls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&mut self, control: Control) {
        match control {
            Control::Primary => self.primary = true,
            Control::Secondary => self.secondary = true,
        }
    }

    pub fn drop_control(&mut self, control: Control) {
        match control {
            Control::Primary => self.primary = false,
            Control::Secondary => self.secondary = false,
        }
    }

    pub fn hold_key(&mut self, key: &Key) {
        if !self.keys.contains(key) {
            self.keys.push(key.clone());
        }
    }

    pub fn drop_key(&mut self, key: &Key) {
        self.keys.retain(|k| k != key);
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        !self.primary && !self.secondary && self.keys.is_empty()
    }

    /// Releases everything held: secondary, then primary, then keys.
    ///
    /// Delivery failures are logged and the ledger is cleared anyway, so a
    /// broken port cannot wedge the rollback.
    pub fn release_all(&mut self, port: &dyn ActuatorPort) {
        if std::mem::take(&mut self.secondary) {
            if let Err(e) = port.release(Control::Secondary) {
                tracing::debug!(error = %e, "rollback release of secondary failed");
            }
        }
        if std::mem::take(&mut self.primary) {
            if let Err(e) = port.release(Control::Primary) {
                tracing::debug!(error = %e, "rollback release of primary failed");
            }
        }
        for key in std::mem::take(&mut self.keys) {
            if let Err(e) = port.key_up(&key) {
                tracing::debug!(key = %key, error = %e, "rollback key release failed");
            }
        }
    }
}
