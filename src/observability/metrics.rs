//! Metrics collection.
//!
//! Prometheus-compatible counters and gauges for cycles, faults and the
//! outage state. Every recording function is a no-op until
//! [`init_metrics`] installs a recorder.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::schema::StrategyKind;
use crate::error::TetherError;
use crate::sequencer::Phase;

/// Set once a recorder is installed; later calls return early.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Connectivity operation that can fail, used as the `operation` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityOp {
    Disconnect,
    Reconnect,
}

impl ConnectivityOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
        }
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `TetherError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TetherError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TetherError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!("tether_cycles_total", "Cycles that reached CycleComplete");
    describe_counter!(
        "tether_phase_faults_total",
        "Phase faults caught at the cycle boundary"
    );
    describe_counter!(
        "tether_connectivity_failures_total",
        "Failed disconnect or reconnect attempts"
    );
    describe_gauge!(
        "tether_network_blocked",
        "Whether the simulated outage is in force (1 = blocked)"
    );
    describe_gauge!(
        "tether_current_phase",
        "Currently active phase (1 = active)"
    );
}

/// Records a completed cycle.
pub fn record_cycle() {
    counter!("tether_cycles_total").increment(1);
}

/// Records a phase fault.
pub fn record_phase_fault(phase: Phase) {
    counter!("tether_phase_faults_total", "phase" => phase.as_str()).increment(1);
}

/// Records a failed connectivity operation.
pub fn record_connectivity_failure(strategy: StrategyKind, operation: ConnectivityOp) {
    counter!(
        "tether_connectivity_failures_total",
        "strategy" => strategy.as_str(),
        "operation" => operation.as_str(),
    )
    .increment(1);
}

/// Sets the outage gauge.
pub fn set_network_blocked(blocked: bool) {
    gauge!("tether_network_blocked").set(if blocked { 1.0 } else { 0.0 });
}

/// Moves the one-hot phase gauge from `previous` to `phase`.
pub fn set_current_phase(phase: Phase, previous: Option<Phase>) {
    if let Some(prev) = previous.filter(|p| *p != phase) {
        gauge!("tether_current_phase", "phase" => prev.as_str()).set(0.0);
    }
    gauge!("tether_current_phase", "phase" => phase.as_str()).set(1.0);
}
