//! Connectivity controller
//!
//! Toggles a simulated network outage through one of several
//! interchangeable strategies. The controller owns every strategy up front
//! and tracks whether an outage is currently in force; switching strategy
//! while an outage is active restores traffic under the old strategy first.
//!
//! All operations are serialised by an internal mutex that is independent
//! of the run state lock, so the sequencer and an abort trigger may call
//! [`ConnectivityController::reconnect`] concurrently.

pub mod firewall;
pub mod packet_filter;
pub mod simulated;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use firewall::FirewallRuleStrategy;
pub use packet_filter::{InterceptOpener, PacketFilterStrategy, PacketIntercept, UnsupportedOpener};
pub use simulated::{SimulatedCall, SimulatedStrategy};

use crate::config::schema::{SequenceConfig, StrategyKind};
use crate::error::ConnectivityError;
use crate::observability::metrics::{self, ConnectivityOp};

/// A way of cutting and restoring outbound traffic.
pub trait ConnectivityStrategy: Send + std::fmt::Debug {
    /// Which selection this strategy answers to.
    fn kind(&self) -> StrategyKind;

    /// Whether the strategy has a usable backend on this host.
    fn is_available(&self) -> bool;

    /// Starts the outage.
    ///
    /// # Errors
    ///
    /// Returns `ConnectivityError` if traffic could not be blocked.
    fn disconnect(&mut self) -> Result<(), ConnectivityError>;

    /// Ends the outage.
    ///
    /// # Errors
    ///
    /// Returns `ConnectivityError` if traffic could not be restored.
    fn reconnect(&mut self) -> Result<(), ConnectivityError>;

    /// Best-effort restore used on shutdown, regardless of tracked state.
    fn cleanup(&mut self);
}

/// One instance of every strategy the controller can switch between.
#[derive(Debug)]
pub struct Strategies {
    pub packet_filter: Box<dyn ConnectivityStrategy>,
    pub firewall: Box<dyn ConnectivityStrategy>,
    pub simulated: Box<dyn ConnectivityStrategy>,
}

impl Strategies {
    /// Real strategies built from configuration.
    ///
    /// No packet intercept backend ships with the crate; the packet filter
    /// reports itself unavailable until an opener is injected.
    #[must_use]
    pub fn from_config(config: &SequenceConfig) -> Self {
        Self {
            packet_filter: Box::new(PacketFilterStrategy::new(Box::new(UnsupportedOpener))),
            firewall: Box::new(FirewallRuleStrategy::new(config.firewall.clone())),
            simulated: Box::new(SimulatedStrategy::new()),
        }
    }

    /// Every slot backed by the same simulated log.
    #[must_use]
    pub fn simulated(sim: &SimulatedStrategy) -> Self {
        Self {
            packet_filter: Box::new(sim.labelled(StrategyKind::PacketFilter)),
            firewall: Box::new(sim.labelled(StrategyKind::FirewallRule)),
            simulated: Box::new(sim.clone()),
        }
    }

    fn get_mut(&mut self, kind: StrategyKind) -> &mut dyn ConnectivityStrategy {
        match kind {
            StrategyKind::PacketFilter => self.packet_filter.as_mut(),
            StrategyKind::FirewallRule => self.firewall.as_mut(),
            StrategyKind::Simulated => self.simulated.as_mut(),
        }
    }

    fn get(&self, kind: StrategyKind) -> &dyn ConnectivityStrategy {
        match kind {
            StrategyKind::PacketFilter => self.packet_filter.as_ref(),
            StrategyKind::FirewallRule => self.firewall.as_ref(),
            StrategyKind::Simulated => self.simulated.as_ref(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    selected: StrategyKind,
    active: bool,
    strategies: Strategies,
}

/// Idempotent disconnect/reconnect over the selected strategy.
#[derive(Debug)]
pub struct ConnectivityController {
    inner: Mutex<Inner>,
}

impl ConnectivityController {
    #[must_use]
    pub fn new(selected: StrategyKind, strategies: Strategies) -> Self {
        metrics::set_network_blocked(false);
        Self {
            inner: Mutex::new(Inner {
                selected,
                active: false,
                strategies,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an outage is currently in force.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    #[must_use]
    pub fn selected(&self) -> StrategyKind {
        self.lock().selected
    }

    /// Whether the selected strategy can run on this host.
    #[must_use]
    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        inner.strategies.get(inner.selected).is_available()
    }

    /// Blocks traffic. A no-op when already disconnected.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error; the controller stays inactive.
    pub fn disconnect(&self) -> Result<(), ConnectivityError> {
        let mut inner = self.lock();
        if inner.active {
            return Ok(());
        }
        let kind = inner.selected;
        match inner.strategies.get_mut(kind).disconnect() {
            Ok(()) => {
                inner.active = true;
                drop(inner);
                metrics::set_network_blocked(true);
                tracing::info!(strategy = %kind, "network blocked");
                Ok(())
            }
            Err(e) => {
                drop(inner);
                metrics::record_connectivity_failure(kind, ConnectivityOp::Disconnect);
                Err(e)
            }
        }
    }

    /// Restores traffic. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error; the controller stays active so a later
    /// reconnect or [`cleanup`](Self::cleanup) retries.
    pub fn reconnect(&self) -> Result<(), ConnectivityError> {
        let mut inner = self.lock();
        if !inner.active {
            return Ok(());
        }
        let kind = inner.selected;
        Self::restore(&mut inner, kind)
    }

    fn restore(inner: &mut Inner, kind: StrategyKind) -> Result<(), ConnectivityError> {
        match inner.strategies.get_mut(kind).reconnect() {
            Ok(()) => {
                inner.active = false;
                metrics::set_network_blocked(false);
                tracing::info!(strategy = %kind, "network restored");
                Ok(())
            }
            Err(e) => {
                metrics::record_connectivity_failure(kind, ConnectivityOp::Reconnect);
                Err(e)
            }
        }
    }

    /// Switches strategy, reconnecting under the old one first if active.
    ///
    /// # Errors
    ///
    /// If that reconnect fails the switch is refused and the error returned.
    pub fn select(&self, kind: StrategyKind) -> Result<(), ConnectivityError> {
        let mut inner = self.lock();
        if inner.selected == kind {
            return Ok(());
        }
        if inner.active {
            let old = inner.selected;
            Self::restore(&mut inner, old)?;
        }
        let previous = std::mem::replace(&mut inner.selected, kind);
        tracing::info!(from = %previous, to = %kind, "connectivity strategy switched");
        Ok(())
    }

    /// Forces every strategy to restore traffic and clears the outage flag.
    pub fn cleanup(&self) {
        let mut inner = self.lock();
        inner.strategies.packet_filter.cleanup();
        inner.strategies.firewall.cleanup();
        inner.strategies.simulated.cleanup();
        inner.active = false;
        drop(inner);
        metrics::set_network_blocked(false);
        tracing::debug!("connectivity cleanup complete");
    }
}

impl Drop for ConnectivityController {
    fn drop(&mut self) {
        self.cleanup();
    }
}
