//! Run control
//!
//! Shared run/pause/abort state, the cancellable timer the sequencer sleeps
//! on, and the controller that owns the sequencer thread.
//!
//! - [`RunShared`]: mutex-guarded [`RunState`] paired with a condition variable
//! - [`CancellableTimer`]: interruptible, pause-aware sleep
//! - [`RunController`]: start/pause/resume/abort from any thread

pub mod controller;
pub mod state;
pub mod timer;

pub use controller::RunController;
pub use state::{RunShared, RunSnapshot, RunState};
pub use timer::{CancellableTimer, PAUSE_RECHECK};
