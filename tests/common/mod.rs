//! Shared integration-test harness: an in-process run wired to a recording
//! actuator and the simulated strategy, plus helpers for driving the
//! `tether` binary.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use tether::actuator::RecordingActuator;
use tether::config::schema::{ParamName, SequenceConfig, StrategyKind, TimingParameters};
use tether::connectivity::{ConnectivityController, SimulatedStrategy, Strategies};
use tether::control::RunController;
use tether::observability::EventEmitter;
use tether::sequencer::{Phase, SequencerContext};

/// Generous upper bound for anything a test waits on.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Every parameter at its minimum, so a full cycle takes well under a second.
pub fn fast_timings() -> TimingParameters {
    let mut timings = TimingParameters::default();
    for name in ParamName::ALL {
        timings.set_unchecked(name, name.bounds().min);
    }
    timings
}

/// In-memory JSONL sink shared with an [`EventEmitter`].
#[derive(Debug, Clone, Default)]
pub struct EventSink(Arc<Mutex<Vec<u8>>>);

impl EventSink {
    /// Parsed events, in emission order.
    pub fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
        String::from_utf8(bytes)
            .expect("events are UTF-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("event line is JSON"))
            .collect()
    }

    /// Event `type` tags, in emission order.
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e["type"].as_str().map(str::to_string))
            .collect()
    }
}

impl Write for EventSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A controller with every collaborator observable.
pub struct Rig {
    pub controller: Arc<RunController>,
    pub actuator: RecordingActuator,
    pub sim: SimulatedStrategy,
    pub events: EventSink,
}

impl Rig {
    /// Builds a rig on the simulated strategy with the given timings.
    pub fn new(timings: TimingParameters, loop_enabled: bool) -> Self {
        let config = SequenceConfig {
            timings,
            loop_enabled,
            strategy: StrategyKind::Simulated,
            ..SequenceConfig::default()
        };
        Self::with_config(&config)
    }

    pub fn with_config(config: &SequenceConfig) -> Self {
        let sim = SimulatedStrategy::new();
        let connectivity = Arc::new(ConnectivityController::new(
            config.strategy,
            Strategies::simulated(&sim),
        ));
        let actuator = RecordingActuator::new();
        let events = EventSink::default();
        let ctx = SequencerContext::new(
            config,
            Arc::new(actuator.clone()),
            connectivity,
            Arc::new(EventEmitter::new(Box::new(events.clone()))),
        );
        Self {
            controller: Arc::new(RunController::new(ctx)),
            actuator,
            sim,
            events,
        }
    }

    /// Polls until the run reaches `phase` or the timeout elapses.
    pub fn wait_for_phase(&self, phase: Phase) -> bool {
        wait_until(DEFAULT_TIMEOUT, || self.controller.snapshot().phase == phase)
    }

    /// Waits for the sequencer thread to exit.
    pub fn finish(&self) {
        assert!(
            wait_until(DEFAULT_TIMEOUT, || !self.controller.is_running()),
            "run did not stop in time"
        );
        self.controller.join();
    }
}

/// Polls `predicate` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

// ============================================================================
// Binary helpers
// ============================================================================

/// Path of a file under `tests/fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs `tether` with `args` to completion.
pub fn spawn_command(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tether"))
        .args(args)
        .env_remove("TETHER_CONFIG")
        .env_remove("TETHER_LOG_LEVEL")
        .output()
        .expect("failed to run tether")
}

/// Runs `tether` with `args`, feeding `input` on stdin and closing it.
pub fn spawn_with_input(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tether"))
        .args(args)
        .env_remove("TETHER_CONFIG")
        .env_remove("TETHER_LOG_LEVEL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn tether");
    child
        .stdin
        .take()
        .expect("stdin not captured")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait for tether")
}
