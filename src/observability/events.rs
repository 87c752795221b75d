//! Run events as JSONL.
//!
//! Every line is one [`Event`] tagged by `type`, with a zero-based
//! `sequence` field added by the emitter.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::schema::StrategyKind;
use crate::sequencer::Phase;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// One pass finished with looping disabled.
    Completed,
    /// An operator or signal aborted the run.
    Aborted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        })
    }
}

/// Summary statistics emitted when a run stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    /// Cycles that reached `CycleComplete`.
    pub cycles: u64,
    /// Phase faults caught and recovered from.
    pub faults: u64,
    /// Wall-clock length of the run in seconds.
    pub uptime_secs: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycles={} faults={} uptime={:.1}s",
            self.cycles, self.faults, self.uptime_secs,
        )
    }
}

/// Something a consumer of the stream may want to react to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A sequencer thread was spawned.
    RunStarted {
        timestamp: DateTime<Utc>,
        /// Connectivity strategy selected at start.
        strategy: StrategyKind,
        loop_enabled: bool,
    },

    /// A new cycle begins at `Charge`.
    CycleStarted {
        timestamp: DateTime<Utc>,
        /// One-based index of the cycle within the run.
        cycle: u64,
        /// Ping offset in force when the cycle began.
        ping_offset_ms: u32,
    },

    /// The sequencer entered a phase.
    PhaseEntered {
        timestamp: DateTime<Utc>,
        phase: Phase,
        cycle: u64,
    },

    /// The simulated outage started or ended.
    NetworkChanged {
        timestamp: DateTime<Utc>,
        blocked: bool,
        strategy: StrategyKind,
    },

    /// A phase failed and the cycle is being restarted.
    PhaseFault {
        timestamp: DateTime<Utc>,
        phase: Phase,
        error: String,
    },

    /// The sequencer thread finished.
    RunStopped {
        timestamp: DateTime<Utc>,
        reason: StopReason,
        summary: RunSummary,
    },
}

impl Event {
    /// The `type` tag this event serializes with.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::CycleStarted { .. } => "cycle_started",
            Self::PhaseEntered { .. } => "phase_entered",
            Self::NetworkChanged { .. } => "network_changed",
            Self::PhaseFault { .. } => "phase_fault",
            Self::RunStopped { .. } => "run_stopped",
        }
    }
}

/// One JSONL line: the event fields plus its position in the stream.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    sequence: u64,
    #[serde(flatten)]
    event: &'a Event,
}

/// Buffered JSONL sink shared by the console and the sequencer thread.
///
/// Sequence numbers are taken under the writer lock, so lines appear in
/// the file in sequence order. Write failures are logged at debug and
/// otherwise ignored.
pub struct EventEmitter {
    out: Mutex<Sink>,
}

struct Sink {
    writer: BufWriter<Box<dyn Write + Send>>,
    next: u64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("emitted", &self.event_count())
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(Sink {
                writer: BufWriter::new(writer),
                next: 0,
            }),
        }
    }

    /// Stream to stderr; stdout belongs to console replies.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Counts events but writes nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Truncates or creates `path` and streams events into it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from creating the file.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes `event` as one line and flushes it.
    pub fn emit(&self, event: Event) {
        let mut sink = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = sink.next;
        sink.next += 1;

        let envelope = Envelope {
            sequence,
            event: &event,
        };
        let written = serde_json::to_writer(&mut sink.writer, &envelope)
            .map_err(std::io::Error::from)
            .and_then(|()| sink.writer.write_all(b"\n"))
            .and_then(|()| sink.writer.flush());
        if let Err(err) = written {
            tracing::debug!(kind = event.kind(), sequence, %err, "event not written");
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.out.lock().unwrap_or_else(PoisonError::into_inner).next
    }
}
