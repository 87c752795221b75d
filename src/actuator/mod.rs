//! Actuator port
//!
//! The sequencer never touches a real input device. It emits abstract
//! [`ActuatorCommand`]s through an [`ActuatorPort`], and the binding decides
//! what a command means on the host. Two ports ship with the crate:
//!
//! - [`LoggingActuator`] renders every command as a tracing event (dry run)
//! - [`RecordingActuator`] captures timestamped commands for inspection

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::schema::Point;
use crate::error::ActuatorError;

/// Pointer buttons the sequencer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    /// Main button: charges, throws and grips the inventory drag.
    Primary,
    /// Alternate button: only cancels the primary's charge.
    Secondary,
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        })
    }
}

/// A keyboard key, by the name the binding understands (`"tab"`, `"e"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Abstract input command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorCommand {
    ButtonDown { control: Control },
    ButtonUp { control: Control },
    KeyDown { key: Key },
    KeyUp { key: Key },
    PointerMoveTo { point: Point },
}

impl std::fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ButtonDown { control } => write!(f, "press {control}"),
            Self::ButtonUp { control } => write!(f, "release {control}"),
            Self::KeyDown { key } => write!(f, "key down {key}"),
            Self::KeyUp { key } => write!(f, "key up {key}"),
            Self::PointerMoveTo { point } => write!(f, "move to {point}"),
        }
    }
}

/// Sink for actuator commands.
///
/// Implementations must be callable from the sequencer thread and from the
/// controller thread that performs the abort release, hence `Send + Sync`.
pub trait ActuatorPort: Send + Sync {
    /// Delivers one command.
    ///
    /// # Errors
    ///
    /// Returns `ActuatorError` when the binding cannot deliver it. The
    /// sequencer treats that as a transient phase fault.
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError>;

    /// Presses a pointer button.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    fn press(&self, control: Control) -> Result<(), ActuatorError> {
        self.dispatch(ActuatorCommand::ButtonDown { control })
    }

    /// Releases a pointer button.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    fn release(&self, control: Control) -> Result<(), ActuatorError> {
        self.dispatch(ActuatorCommand::ButtonUp { control })
    }

    /// Presses a key.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    fn key_down(&self, key: &Key) -> Result<(), ActuatorError> {
        self.dispatch(ActuatorCommand::KeyDown { key: key.clone() })
    }

    /// Releases a key.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    fn key_up(&self, key: &Key) -> Result<(), ActuatorError> {
        self.dispatch(ActuatorCommand::KeyUp { key: key.clone() })
    }

    /// Moves the pointer to an absolute screen position.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    fn move_to(&self, point: Point) -> Result<(), ActuatorError> {
        self.dispatch(ActuatorCommand::PointerMoveTo { point })
    }
}

impl<T: ActuatorPort + ?Sized> ActuatorPort for Arc<T> {
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        (**self).dispatch(command)
    }
}

// ============================================================================
// LoggingActuator
// ============================================================================

/// Dry-run port: every command becomes a `debug` event, pointer moves `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActuator;

impl ActuatorPort for LoggingActuator {
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        match &command {
            ActuatorCommand::PointerMoveTo { point } => {
                tracing::trace!(x = point.x, y = point.y, "pointer move");
            }
            other => tracing::debug!(command = %other, "actuator"),
        }
        Ok(())
    }
}

// ============================================================================
// RecordingActuator
// ============================================================================

/// A command together with its offset from the recorder's creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub at: Duration,
    pub command: ActuatorCommand,
}

#[derive(Debug, Default)]
struct RecorderState {
    commands: Vec<RecordedCommand>,
    fail_at: Option<usize>,
    closed: bool,
}

/// Port that captures every command with a timestamp.
///
/// Clones share the same log. A failure can be scheduled with
/// [`fail_once_after`](Self::fail_once_after) to exercise the sequencer's
/// fault path.
#[derive(Debug, Clone)]
pub struct RecordingActuator {
    origin: Instant,
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingActuator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(RecorderState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything recorded so far, in delivery order.
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    /// Recorded commands without timestamps or pointer moves.
    #[must_use]
    pub fn actions(&self) -> Vec<ActuatorCommand> {
        self.lock()
            .commands
            .iter()
            .filter(|r| !matches!(r.command, ActuatorCommand::PointerMoveTo { .. }))
            .map(|r| r.command.clone())
            .collect()
    }

    /// Only the pointer positions, in order.
    #[must_use]
    pub fn pointer_path(&self) -> Vec<Point> {
        self.lock()
            .commands
            .iter()
            .filter_map(|r| match r.command {
                ActuatorCommand::PointerMoveTo { point } => Some(point),
                _ => None,
            })
            .collect()
    }

    /// Offset of the first recorded command equal to `command`.
    #[must_use]
    pub fn first_at(&self, command: &ActuatorCommand) -> Option<Duration> {
        self.lock()
            .commands
            .iter()
            .find(|r| &r.command == command)
            .map(|r| r.at)
    }

    /// Makes the n-th following dispatch (zero-based) fail once.
    pub fn fail_once_after(&self, n: usize) {
        let mut state = self.lock();
        state.fail_at = Some(state.commands.len() + n);
    }

    /// Rejects every further command with `ActuatorError::Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn clear(&self) {
        self.lock().commands.clear();
    }
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorPort for RecordingActuator {
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        let at = self.origin.elapsed();
        let mut state = self.lock();
        if state.closed {
            return Err(ActuatorError::Closed);
        }
        if state.fail_at == Some(state.commands.len()) {
            state.fail_at = None;
            return Err(ActuatorError::Delivery(format!("scheduled failure on {command}")));
        }
        state.commands.push(RecordedCommand { at, command });
        Ok(())
    }
}
