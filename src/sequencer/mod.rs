//! Phase sequencer
//!
//! Walks the fixed cycle `Charge → Cancel → Disconnect → Inventory →
//! Combat → Pickup → CycleComplete` on a dedicated thread, issuing actuator
//! commands and toggling the outage between cancellable waits.
//!
//! # Architecture
//!
//! - [`Phase`]: the named stages plus the terminal `Idle`
//! - [`HeldControls`]: what must be released if a wait is interrupted
//! - [`SequencerContext`]: everything a run needs, shared with the controller
//! - [`PhaseSequencer`]: the per-run state machine

pub mod engine;
pub mod phase;

use std::sync::Arc;

pub use engine::{FAULT_BACKOFF, KEY_TAP, POST_INVENTORY_SETTLE, PhaseSequencer};
pub use phase::{HeldControls, Phase};

use crate::actuator::{ActuatorPort, Key};
use crate::config::LiveTimings;
use crate::config::schema::{Layout, SequenceConfig};
use crate::connectivity::ConnectivityController;
use crate::observability::EventEmitter;

/// Collaborators a run is wired to.
///
/// Cloning shares every collaborator, including the live timing table.
#[derive(Clone)]
pub struct SequencerContext {
    pub timings: LiveTimings,
    pub layout: Layout,
    pub inventory_key: Key,
    pub pickup_key: Key,
    pub actuator: Arc<dyn ActuatorPort>,
    pub connectivity: Arc<ConnectivityController>,
    pub events: Arc<EventEmitter>,
}

impl SequencerContext {
    #[must_use]
    pub fn new(
        config: &SequenceConfig,
        actuator: Arc<dyn ActuatorPort>,
        connectivity: Arc<ConnectivityController>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            timings: LiveTimings::new(config.timings, config.loop_enabled),
            layout: config.layout,
            inventory_key: Key::new(config.keys.inventory.trim()),
            pickup_key: Key::new(config.keys.pickup.trim()),
            actuator,
            connectivity,
            events,
        }
    }
}

// dyn ActuatorPort is not Debug.
impl std::fmt::Debug for SequencerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerContext")
            .field("timings", &self.timings)
            .field("layout", &self.layout)
            .field("inventory_key", &self.inventory_key)
            .field("pickup_key", &self.pickup_key)
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}
