//! Per-run state machine.
//!
//! A `PhaseSequencer` is created for one run generation and consumed by the
//! thread that executes it. Every wait goes through the cancellable timer;
//! a `false` from the timer unwinds the whole run through [`Halt`], and the
//! teardown releases whatever is still held.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::SequencerContext;
use super::phase::{HeldControls, Phase};
use crate::actuator::{Control, Key};
use crate::config::schema::{ParamName, Point};
use crate::control::{CancellableTimer, RunShared};
use crate::coords::{self, CoordinateMapper};
use crate::error::ActuatorError;
use crate::observability::metrics;
use crate::observability::{Event, RunSummary, StopReason};

/// Hold time between key down and key up when tapping a key.
pub const KEY_TAP: Duration = Duration::from_millis(50);

/// Pause after closing the inventory.
pub const POST_INVENTORY_SETTLE: Duration = Duration::from_millis(100);

/// Back-off before restarting a cycle after a phase fault.
pub const FAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Why a cycle stopped short.
#[derive(Debug)]
enum Halt {
    /// The run was stopped while waiting.
    Interrupted,
    /// A phase step failed.
    Fault(ActuatorError),
    /// Phase code or the actuator port panicked.
    Panicked(String),
}

impl From<ActuatorError> for Halt {
    fn from(error: ActuatorError) -> Self {
        Self::Fault(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Loop,
    Finished,
}

/// State machine for one run generation.
pub struct PhaseSequencer {
    ctx: SequencerContext,
    run: Arc<RunShared>,
    timer: CancellableTimer,
    generation: u64,
    held: HeldControls,
    mapper: CoordinateMapper,
    current: Phase,
    cycle: u64,
    faults: u64,
    started: Instant,
}

impl std::fmt::Debug for PhaseSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSequencer")
            .field("generation", &self.generation)
            .field("current", &self.current)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

impl PhaseSequencer {
    #[must_use]
    pub fn new(ctx: SequencerContext, run: Arc<RunShared>, generation: u64) -> Self {
        let mapper = CoordinateMapper::new(ctx.layout.viewport);
        Self {
            timer: CancellableTimer::new(Arc::clone(&run)),
            ctx,
            run,
            generation,
            held: HeldControls::new(),
            mapper,
            current: Phase::Idle,
            cycle: 0,
            faults: 0,
            started: Instant::now(),
        }
    }

    /// Runs cycles until the run is stopped or a pass completes with
    /// looping disabled, then tears down.
    pub fn run(mut self) {
        let strategy = self.ctx.connectivity.selected();
        tracing::info!(generation = self.generation, %strategy, "run started");
        self.ctx.events.emit(Event::RunStarted {
            timestamp: Utc::now(),
            strategy,
            loop_enabled: self.ctx.timings.loop_enabled(),
        });

        let reason = loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle()))
                .unwrap_or_else(|payload| Err(Halt::Panicked(panic_message(payload.as_ref()))));
            let recovered = match outcome {
                Ok(CycleEnd::Loop) => continue,
                Ok(CycleEnd::Finished) => break StopReason::Completed,
                Err(Halt::Interrupted) => {
                    tracing::debug!(phase = %self.current, "run interrupted");
                    break StopReason::Aborted;
                }
                Err(Halt::Fault(error)) => self.recover(&error),
                Err(Halt::Panicked(message)) => self.recover(&message),
            };
            if !recovered {
                break StopReason::Aborted;
            }
        };
        self.teardown(reason);
    }

    fn run_cycle(&mut self) -> Result<CycleEnd, Halt> {
        self.begin_cycle()?;
        self.charge()?;
        self.cancel()?;
        self.disconnect()?;
        self.inventory()?;
        self.combat()?;
        self.pickup()?;
        self.cycle_complete()
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn begin_cycle(&mut self) -> Result<(), Halt> {
        let completed = {
            let state = self.run.lock();
            if !state.owned_by(self.generation) {
                return Err(Halt::Interrupted);
            }
            state.cycle
        };
        self.cycle = completed + 1;
        let ping_offset = self.param(ParamName::PingOffset);
        tracing::info!(cycle = self.cycle, ping_offset_ms = ping_offset, "cycle starting");
        self.ctx.events.emit(Event::CycleStarted {
            timestamp: Utc::now(),
            cycle: self.cycle,
            ping_offset_ms: ping_offset,
        });
        Ok(())
    }

    fn charge(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Charge)?;
        self.press(Control::Primary)?;
        self.wait(self.param(ParamName::ChargeHold))
    }

    fn cancel(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Cancel)?;
        self.press(Control::Secondary)?;
        self.wait(self.param(ParamName::CancelHold))?;
        self.release(Control::Secondary)?;
        self.wait(self.param(ParamName::PostCancelDelay))?;
        self.release(Control::Primary)
    }

    fn disconnect(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Disconnect)?;
        self.wait(self.param(ParamName::PreDisconnectDelay))?;
        self.set_network(true);

        let settle = self.param(ParamName::Settle);
        let offset = self.param(ParamName::PingOffset);
        let total = settle + offset;
        tracing::info!("settle {settle} + offset {offset} = {total} ms");
        self.wait(total)
    }

    fn inventory(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Inventory)?;
        let inventory = self.ctx.inventory_key.clone();
        self.tap(&inventory)?;
        self.wait(self.param(ParamName::OpenDelay))?;

        let source = self.mapper.translate(self.ctx.layout.source);
        let destination = self.mapper.translate(self.ctx.layout.destination);
        self.move_to(source)?;
        self.wait(self.param(ParamName::InventorySettle))?;
        self.press(Control::Primary)?;
        self.wait(self.param(ParamName::Grip))?;

        let drag = self.param(ParamName::Drag);
        let steps = coords::drag_steps(drag);
        let step_wait = Duration::from_micros(u64::from(drag) * 1000 / u64::from(steps));
        tracing::debug!(%source, %destination, steps, "dragging");
        for point in coords::drag_path(source, destination, steps) {
            self.move_to(point)?;
            self.wait_for(step_wait)?;
        }

        self.wait(self.param(ParamName::Drop))?;
        self.release(Control::Primary)?;
        self.wait(self.param(ParamName::Close))?;
        self.tap(&inventory)?;
        self.wait_for(POST_INVENTORY_SETTLE)
    }

    fn combat(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Combat)?;
        let throws = self.param(ParamName::ThrowCount);
        let reconnect_on = self.param(ParamName::ReconnectOnThrow);
        for throw in 1..=throws {
            self.press(Control::Primary)?;
            if throw == reconnect_on {
                let delay = self.param(ParamName::ReconnectDelay)
                    + self.param(ParamName::PingOffset);
                self.wait(delay)?;
                tracing::debug!(throw, delay_ms = delay, "reconnecting mid-throw");
                self.set_network(false);
            }
            self.wait(self.param(ParamName::ThrowHold))?;
            self.release(Control::Primary)?;
            self.wait(self.param(ParamName::ThrowDelay))?;
        }
        Ok(())
    }

    fn pickup(&mut self) -> Result<(), Halt> {
        self.enter(Phase::Pickup)?;
        let pickup = self.ctx.pickup_key.clone();
        for _ in 0..self.param(ParamName::ECount) {
            self.key_down(&pickup)?;
            self.wait(self.param(ParamName::EHold))?;
            self.key_up(&pickup)?;
            self.wait(self.param(ParamName::EDelay))?;
        }
        Ok(())
    }

    fn cycle_complete(&mut self) -> Result<CycleEnd, Halt> {
        self.enter(Phase::CycleComplete)?;
        let completed = self.run.update(|state| {
            state.cycle += 1;
            state.cycle
        });
        metrics::record_cycle();
        tracing::info!(cycle = completed, "cycle complete");

        if !self.ctx.timings.loop_enabled() {
            return Ok(CycleEnd::Finished);
        }
        self.wait(self.param(ParamName::LoopDelay))?;
        Ok(CycleEnd::Loop)
    }

    // ========================================================================
    // Fault handling & teardown
    // ========================================================================

    /// Rolls back after a phase fault and backs off.
    ///
    /// Returns `false` if the run stopped during the back-off.
    fn recover(&mut self, error: &dyn std::fmt::Display) -> bool {
        self.faults += 1;
        let phase = self.current;
        tracing::warn!(%phase, error = %error, "phase fault, restarting cycle");
        metrics::record_phase_fault(phase);
        self.ctx.events.emit(Event::PhaseFault {
            timestamp: Utc::now(),
            phase,
            error: error.to_string(),
        });

        self.make_safe();
        self.timer.sleep_for(FAULT_BACKOFF)
    }

    /// Releases held controls and ends any outage, surviving a panicking
    /// port or strategy so the run state can still be cleared.
    fn make_safe(&mut self) {
        let held = &mut self.held;
        let port = self.ctx.actuator.as_ref();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| held.release_all(port))) {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "release of held controls panicked");
            *held = HeldControls::new();
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.set_network(false))) {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "reconnect panicked");
        }
    }

    fn teardown(mut self, reason: StopReason) {
        self.make_safe();

        let generation = self.generation;
        let cycles = self.run.update(|state| {
            if state.generation == generation {
                state.running = false;
                state.paused = false;
                state.phase = Phase::Idle;
            }
            state.cycle
        });
        metrics::set_current_phase(Phase::Idle, Some(self.current));

        let summary = RunSummary {
            cycles,
            faults: self.faults,
            uptime_secs: self.started.elapsed().as_secs_f64(),
        };
        tracing::info!(%reason, %summary, "run stopped");
        self.ctx.events.emit(Event::RunStopped {
            timestamp: Utc::now(),
            reason,
            summary,
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn param(&self, name: ParamName) -> u32 {
        self.ctx.timings.get(name)
    }

    fn enter(&mut self, phase: Phase) -> Result<(), Halt> {
        let previous = {
            let mut state = self.run.lock();
            if !state.owned_by(self.generation) {
                return Err(Halt::Interrupted);
            }
            std::mem::replace(&mut state.phase, phase)
        };
        self.current = phase;
        metrics::set_current_phase(phase, Some(previous));
        tracing::debug!(%phase, cycle = self.cycle, "phase entered");
        self.ctx.events.emit(Event::PhaseEntered {
            timestamp: Utc::now(),
            phase,
            cycle: self.cycle,
        });
        Ok(())
    }

    fn wait(&self, ms: u32) -> Result<(), Halt> {
        if self.timer.sleep(i64::from(ms)) {
            Ok(())
        } else {
            Err(Halt::Interrupted)
        }
    }

    fn wait_for(&self, duration: Duration) -> Result<(), Halt> {
        if self.timer.sleep_for(duration) {
            Ok(())
        } else {
            Err(Halt::Interrupted)
        }
    }

    /// Starts or ends the outage. Failures are logged and the cycle goes on.
    fn set_network(&self, blocked: bool) {
        let connectivity = &self.ctx.connectivity;
        let before = connectivity.is_active();
        let result = if blocked {
            connectivity.disconnect()
        } else {
            connectivity.reconnect()
        };
        match result {
            Ok(()) if before != blocked => {
                self.ctx.events.emit(Event::NetworkChanged {
                    timestamp: Utc::now(),
                    blocked,
                    strategy: connectivity.selected(),
                });
            }
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, blocked, "connectivity change failed, continuing");
            }
        }
    }

    fn press(&mut self, control: Control) -> Result<(), Halt> {
        self.held.hold(control);
        self.ctx.actuator.press(control)?;
        Ok(())
    }

    fn release(&mut self, control: Control) -> Result<(), Halt> {
        self.ctx.actuator.release(control)?;
        self.held.drop_control(control);
        Ok(())
    }

    fn key_down(&mut self, key: &Key) -> Result<(), Halt> {
        self.held.hold_key(key);
        self.ctx.actuator.key_down(key)?;
        Ok(())
    }

    fn key_up(&mut self, key: &Key) -> Result<(), Halt> {
        self.ctx.actuator.key_up(key)?;
        self.held.drop_key(key);
        Ok(())
    }

    fn tap(&mut self, key: &Key) -> Result<(), Halt> {
        self.key_down(key)?;
        self.wait_for(KEY_TAP)?;
        self.key_up(key)
    }

    fn move_to(&self, point: Point) -> Result<(), Halt> {
        self.ctx.actuator.move_to(point)?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorCommand, RecordingActuator};
    use crate::config::schema::{SequenceConfig, StrategyKind};
    use crate::connectivity::{ConnectivityController, SimulatedStrategy, Strategies};
    use crate::observability::EventEmitter;

    struct Harness {
        actuator: RecordingActuator,
        run: Arc<RunShared>,
        ctx: SequencerContext,
    }

    fn harness() -> Harness {
        let sim = SimulatedStrategy::new();
        let connectivity = Arc::new(ConnectivityController::new(
            StrategyKind::Simulated,
            Strategies::simulated(&sim),
        ));
        let actuator = RecordingActuator::new();
        let mut config = SequenceConfig::default();
        config.loop_enabled = false;
        let ctx = SequencerContext::new(
            &config,
            Arc::new(actuator.clone()),
            connectivity,
            Arc::new(EventEmitter::noop()),
        );
        let run = Arc::new(RunShared::new());
        run.update(|s| {
            s.running = true;
            s.generation = 1;
        });
        Harness { actuator, run, ctx }
    }

    fn fast(ctx: &SequencerContext) {
        for name in ParamName::ALL {
            let min = name.bounds().min;
            if name != ParamName::ReconnectOnThrow {
                ctx.timings.set(name, min).unwrap();
            }
        }
    }

    #[test]
    fn enter_refuses_foreign_generation() {
        let h = harness();
        let mut seq = PhaseSequencer::new(h.ctx.clone(), Arc::clone(&h.run), 2);
        assert!(matches!(seq.enter(Phase::Charge), Err(Halt::Interrupted)));
        assert_eq!(h.run.snapshot().phase, Phase::Idle);
    }

    #[test]
    fn single_pass_stops_idle_with_one_cycle() {
        let h = harness();
        fast(&h.ctx);
        PhaseSequencer::new(h.ctx.clone(), Arc::clone(&h.run), 1).run();

        let snapshot = h.run.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.cycle, 1);
        assert!(!h.ctx.connectivity.is_active());
    }

    #[test]
    fn fault_releases_and_restarts_at_charge() {
        let h = harness();
        fast(&h.ctx);
        // The secondary press inside Cancel fails once.
        h.actuator.fail_once_after(1);
        PhaseSequencer::new(h.ctx.clone(), Arc::clone(&h.run), 1).run();

        let down = |control| ActuatorCommand::ButtonDown { control };
        let up = |control| ActuatorCommand::ButtonUp { control };
        let actions = h.actuator.actions();
        assert_eq!(
            actions[..4],
            [
                down(Control::Primary),
                up(Control::Secondary),
                up(Control::Primary),
                down(Control::Primary),
            ]
        );
        // The restarted pass finishes the cycle.
        let snapshot = h.run.snapshot();
        assert_eq!(snapshot.cycle, 1);
        assert!(!snapshot.running);
    }

    #[test]
    fn fault_while_stopped_unwinds_to_idle() {
        let h = harness();
        h.actuator.close();
        let run = Arc::clone(&h.run);
        let worker = std::thread::spawn({
            let ctx = h.ctx.clone();
            move || PhaseSequencer::new(ctx, run, 1).run()
        });
        std::thread::sleep(Duration::from_millis(50));
        h.run.update(|s| s.running = false);
        worker.join().unwrap();
        assert_eq!(h.run.snapshot().phase, Phase::Idle);
        assert_eq!(h.run.snapshot().cycle, 0);
    }

    /// Panics on every command.
    struct PanickingPort;

    impl crate::actuator::ActuatorPort for PanickingPort {
        fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
            panic!("port exploded on {command}");
        }
    }

    #[test]
    fn panicking_port_still_clears_run_state() {
        let h = harness();
        let ctx = SequencerContext {
            actuator: Arc::new(PanickingPort),
            ..h.ctx.clone()
        };
        let run = Arc::clone(&h.run);
        let worker = std::thread::spawn(move || PhaseSequencer::new(ctx, run, 1).run());
        std::thread::sleep(Duration::from_millis(100));
        h.run.update(|s| s.running = false);
        worker.join().expect("panics stay inside the sequencer");

        let snapshot = h.run.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.phase, Phase::Idle);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static text");
        let caught = panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "formatted 7");
    }

    #[test]
    fn interrupted_pickup_hold_rolls_back_the_key() {
        let h = harness();
        fast(&h.ctx);
        h.ctx.timings.set(ParamName::ECount, 50).unwrap();
        h.ctx.timings.set(ParamName::EHold, 100).unwrap();
        let pickup = ActuatorCommand::KeyDown { key: Key::new("e") };

        let run = Arc::clone(&h.run);
        let ctx = h.ctx.clone();
        let worker = std::thread::spawn(move || PhaseSequencer::new(ctx, run, 1).run());
        let deadline = Instant::now() + Duration::from_secs(10);
        while !h.actuator.actions().contains(&pickup) {
            assert!(Instant::now() < deadline, "pickup never started");
            std::thread::sleep(Duration::from_millis(1));
        }
        h.run.update(|s| s.running = false);
        worker.join().unwrap();

        let actions = h.actuator.actions();
        assert_eq!(
            actions.last(),
            Some(&ActuatorCommand::KeyUp { key: Key::new("e") })
        );
    }
}
