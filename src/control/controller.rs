//! Run controller
//!
//! Owns the run state and the sequencer thread. Every method may be called
//! from any thread: the operator console, a signal handler, or a test.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use super::state::{RunShared, RunSnapshot};
use crate::actuator::Control;
use crate::config::LiveTimings;
use crate::connectivity::ConnectivityController;
use crate::error::TetherError;
use crate::sequencer::{Phase, PhaseSequencer, SequencerContext};

/// Starts, pauses and aborts the sequencer.
#[derive(Debug)]
pub struct RunController {
    run: Arc<RunShared>,
    ctx: SequencerContext,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RunController {
    #[must_use]
    pub fn new(ctx: SequencerContext) -> Self {
        Self {
            run: Arc::new(RunShared::new()),
            ctx,
            thread: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn context(&self) -> &SequencerContext {
        &self.ctx
    }

    #[must_use]
    pub const fn timings(&self) -> &LiveTimings {
        &self.ctx.timings
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityController {
        &self.ctx.connectivity
    }

    fn thread_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a sequencer thread for a fresh run.
    ///
    /// Returns `Ok(false)` without side effects if a run is already active.
    ///
    /// # Errors
    ///
    /// Returns `TetherError::Io` if the thread cannot be spawned.
    pub fn start(&self) -> Result<bool, TetherError> {
        let mut slot = self.thread_slot();
        if self.run.is_running() {
            return Ok(false);
        }
        if let Some(previous) = slot.take() {
            if previous.join().is_err() {
                tracing::warn!("previous sequencer thread panicked");
            }
        }

        let generation = self.run.update(|state| {
            state.running = true;
            state.paused = false;
            state.cycle = 0;
            state.phase = Phase::Idle;
            state.generation += 1;
            state.generation
        });

        let sequencer = PhaseSequencer::new(self.ctx.clone(), Arc::clone(&self.run), generation);
        let spawned = std::thread::Builder::new()
            .name("tether-sequencer".to_string())
            .spawn(move || sequencer.run());
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.run.update(|state| {
                    if state.generation == generation {
                        state.running = false;
                    }
                });
                Err(TetherError::Io(e))
            }
        }
    }

    /// Pauses the run. Returns `false` if nothing is running.
    pub fn pause(&self) -> bool {
        self.set_paused(true)
    }

    /// Resumes a paused run. Returns `false` if nothing is running.
    pub fn resume(&self) -> bool {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> bool {
        let changed = self.run.update(|state| {
            if state.running {
                state.paused = paused;
            }
            state.running
        });
        if changed {
            tracing::info!(paused, "pause state changed");
        }
        changed
    }

    /// Flips pause. Returns the new paused flag, or `None` if not running.
    pub fn toggle_pause(&self) -> Option<bool> {
        let paused = self.run.update(|state| {
            state.running.then(|| {
                state.paused = !state.paused;
                state.paused
            })
        });
        if let Some(paused) = paused {
            tracing::info!(paused, "pause toggled");
        }
        paused
    }

    /// Stops the run immediately and leaves the world safe.
    ///
    /// Wakes every waiter, restores connectivity and releases both buttons
    /// and both configured keys. Idempotent; safe to call concurrently.
    pub fn abort(&self) {
        let was_running = self.run.update(|state| {
            let was = state.running;
            state.running = false;
            state.paused = false;
            state.phase = Phase::Idle;
            was
        });

        if let Err(e) = self.ctx.connectivity.reconnect() {
            tracing::warn!(error = %e, "reconnect during abort failed");
        }

        let port = self.ctx.actuator.as_ref();
        let released = [
            port.release(Control::Primary),
            port.release(Control::Secondary),
            port.key_up(&self.ctx.inventory_key),
            port.key_up(&self.ctx.pickup_key),
        ];
        for result in released {
            if let Err(e) = result {
                tracing::debug!(error = %e, "release during abort failed");
            }
        }

        if was_running {
            tracing::info!("run aborted");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        self.run.snapshot()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    /// Blocks until the current sequencer thread (if any) has exited.
    pub fn join(&self) {
        let handle = self.thread_slot().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("sequencer thread panicked");
            }
        }
    }

    /// Aborts, waits for the sequencer thread and forces connectivity back.
    pub fn shutdown(&self) {
        self.abort();
        self.join();
        self.ctx.connectivity.cleanup();
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.abort();
        self.join();
    }
}
