mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::{DEFAULT_TIMEOUT, Rig, fast_timings, wait_until};

use tether::actuator::{ActuatorCommand, ActuatorPort, Control, Key, RecordingActuator};
use tether::config::schema::{ParamName, SequenceConfig, StrategyKind, TimingParameters};
use tether::connectivity::{ConnectivityController, SimulatedCall, SimulatedStrategy, Strategies};
use tether::coords::{self, CoordinateMapper};
use tether::control::RunController;
use tether::error::ActuatorError;
use tether::observability::EventEmitter;
use tether::sequencer::{Phase, SequencerContext};

fn down(control: Control) -> ActuatorCommand {
    ActuatorCommand::ButtonDown { control }
}

fn up(control: Control) -> ActuatorCommand {
    ActuatorCommand::ButtonUp { control }
}

#[test]
fn cancel_releases_land_at_configured_offsets() {
    let timings = TimingParameters {
        charge_hold: 150,
        cancel_hold: 50,
        post_cancel_delay: 30,
        ..TimingParameters::default()
    };
    let rig = Rig::new(timings, false);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::Disconnect));
    rig.controller.abort();
    rig.finish();

    let start = rig.actuator.first_at(&down(Control::Primary)).unwrap();
    let secondary_up = rig.actuator.first_at(&up(Control::Secondary)).unwrap() - start;
    let primary_up = rig.actuator.first_at(&up(Control::Primary)).unwrap() - start;

    let ms = |d: Duration| d.as_millis();
    assert!(
        (198..260).contains(&ms(secondary_up)),
        "secondary released at {secondary_up:?}"
    );
    assert!(
        (228..290).contains(&ms(primary_up)),
        "primary released at {primary_up:?}"
    );
}

#[test]
fn abort_during_drag_releases_and_restores() {
    let timings = TimingParameters {
        drag: 1500,
        ..fast_timings()
    };
    let rig = Rig::new(timings, true);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::Inventory));
    // Source move plus a few drag steps.
    assert!(wait_until(DEFAULT_TIMEOUT, || rig.actuator.pointer_path().len() > 5));
    assert!(rig.controller.connectivity().is_active());

    rig.controller.abort();
    let snapshot = rig.controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(!snapshot.running);
    assert!(!rig.controller.connectivity().is_active());
    rig.finish();

    let actions = rig.actuator.actions();
    let last_press = actions
        .iter()
        .rposition(|a| *a == down(Control::Primary))
        .unwrap();
    assert!(
        actions[last_press..].contains(&up(Control::Primary)),
        "grip never released: {actions:?}"
    );
    assert_eq!(rig.controller.snapshot().phase, Phase::Idle);
    assert!(!rig.controller.connectivity().is_active());
}

#[test]
fn loop_disabled_runs_exactly_one_pass() {
    let rig = Rig::new(fast_timings(), false);
    rig.controller.start().unwrap();
    rig.finish();

    let snapshot = rig.controller.snapshot();
    assert_eq!(snapshot.cycle, 1);
    assert_eq!(snapshot.phase, Phase::Idle);

    let charges = rig
        .events
        .events()
        .iter()
        .filter(|e| e["type"] == "phase_entered" && e["phase"] == "charge")
        .count();
    assert_eq!(charges, 1);

    let events = rig.events.events();
    let last = events.last().unwrap();
    assert_eq!(last["type"], "run_stopped");
    assert_eq!(last["reason"], "completed");
    assert_eq!(last["summary"]["cycles"], 1);
}

#[test]
fn phases_are_entered_in_cycle_order() {
    let rig = Rig::new(fast_timings(), false);
    rig.controller.start().unwrap();
    rig.finish();

    let phases: Vec<String> = rig
        .events
        .events()
        .iter()
        .filter(|e| e["type"] == "phase_entered")
        .map(|e| e["phase"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        phases,
        [
            "charge",
            "cancel",
            "disconnect",
            "inventory",
            "combat",
            "pickup",
            "cycle_complete"
        ]
    );

    let kinds = rig.events.kinds();
    assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
    assert_eq!(kinds.get(1).map(String::as_str), Some("cycle_started"));
    let network: Vec<_> = rig
        .events
        .events()
        .iter()
        .filter(|e| e["type"] == "network_changed")
        .map(|e| e["blocked"].as_bool().unwrap())
        .collect();
    assert_eq!(network, [true, false]);
}

/// Records whether the network was blocked when each button command arrived.
struct NetworkWatch {
    connectivity: Arc<ConnectivityController>,
    log: Mutex<Vec<(ActuatorCommand, bool)>>,
}

impl ActuatorPort for NetworkWatch {
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        if matches!(
            command,
            ActuatorCommand::ButtonDown { .. } | ActuatorCommand::ButtonUp { .. }
        ) {
            let blocked = self.connectivity.is_active();
            self.log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((command, blocked));
        }
        Ok(())
    }
}

#[test]
fn reconnect_happens_once_inside_the_first_throw() {
    let sim = SimulatedStrategy::new();
    let connectivity = Arc::new(ConnectivityController::new(
        StrategyKind::Simulated,
        Strategies::simulated(&sim),
    ));
    let watch = Arc::new(NetworkWatch {
        connectivity: Arc::clone(&connectivity),
        log: Mutex::new(Vec::new()),
    });
    let config = SequenceConfig {
        timings: TimingParameters {
            throw_count: 2,
            reconnect_on_throw: 1,
            reconnect_delay: 30,
            ..fast_timings()
        },
        loop_enabled: false,
        strategy: StrategyKind::Simulated,
        ..SequenceConfig::default()
    };
    let ctx = SequencerContext::new(
        &config,
        watch.clone(),
        connectivity,
        Arc::new(EventEmitter::noop()),
    );
    let controller = RunController::new(ctx);
    controller.start().unwrap();
    assert!(wait_until(DEFAULT_TIMEOUT, || !controller.is_running()));
    controller.join();

    assert_eq!(sim.count(SimulatedCall::Reconnect), 1);
    assert_eq!(sim.count(SimulatedCall::Disconnect), 1);

    let log = watch.log.lock().unwrap().clone();
    let primary = |wanted: ActuatorCommand| -> Vec<bool> {
        log.iter()
            .filter(|(c, _)| *c == wanted)
            .map(|(_, blocked)| *blocked)
            .collect()
    };
    // charge, grip, throw 1, throw 2
    assert_eq!(primary(down(Control::Primary)), [false, true, true, false]);
    // cancel, drop, throw 1, throw 2
    assert_eq!(primary(up(Control::Primary)), [false, true, false, false]);
}

#[test]
fn pause_freezes_progress_until_resumed() {
    let timings = TimingParameters {
        charge_hold: 300,
        ..fast_timings()
    };
    let rig = Rig::new(timings, false);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::Charge));
    assert!(rig.controller.pause());

    std::thread::sleep(Duration::from_millis(500));
    let snapshot = rig.controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Charge);
    assert!(snapshot.paused);
    assert!(!rig.actuator.actions().contains(&down(Control::Secondary)));

    assert!(rig.controller.resume());
    rig.finish();
    assert_eq!(rig.controller.snapshot().cycle, 1);
}

#[test]
fn live_edits_carry_into_the_next_run() {
    let timings = TimingParameters {
        loop_delay: 3000,
        ..fast_timings()
    };
    let rig = Rig::new(timings, true);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::CycleComplete));

    // Still waiting on the long loop delay; the next cycle picks up the edit.
    rig.controller
        .timings()
        .set(ParamName::PingOffset, 40)
        .unwrap();
    rig.controller.timings().set_loop_enabled(false);
    rig.controller.abort();
    rig.finish();

    rig.controller.start().unwrap();
    rig.finish();
    let offsets: Vec<_> = rig
        .events
        .events()
        .iter()
        .filter(|e| e["type"] == "cycle_started")
        .map(|e| e["ping_offset_ms"].as_u64().unwrap())
        .collect();
    assert_eq!(offsets, [0, 40]);
}

#[test]
fn actuator_fault_is_reported_and_the_cycle_restarts() {
    let rig = Rig::new(fast_timings(), false);
    rig.actuator.fail_once_after(3);
    rig.controller.start().unwrap();
    rig.finish();

    let events = rig.events.events();
    let faults: Vec<_> = events
        .iter()
        .filter(|e| e["type"] == "phase_fault")
        .collect();
    assert_eq!(faults.len(), 1);
    let last = events.last().unwrap();
    assert_eq!(last["summary"]["faults"], 1);
    assert_eq!(last["summary"]["cycles"], 1);
    assert!(!rig.controller.connectivity().is_active());
}

fn key_down(name: &str) -> ActuatorCommand {
    ActuatorCommand::KeyDown { key: Key::new(name) }
}

fn key_up(name: &str) -> ActuatorCommand {
    ActuatorCommand::KeyUp { key: Key::new(name) }
}

#[test]
fn pickup_taps_the_key_e_count_times() {
    let timings = TimingParameters {
        e_count: 4,
        ..fast_timings()
    };
    let rig = Rig::new(timings, false);
    rig.controller.start().unwrap();
    rig.finish();

    let presses: Vec<_> = rig
        .actuator
        .actions()
        .into_iter()
        .filter(|a| *a == key_down("e") || *a == key_up("e"))
        .collect();
    let expected: Vec<_> = (0..4).flat_map(|_| [key_down("e"), key_up("e")]).collect();
    assert_eq!(presses, expected);
}

#[test]
fn abort_mid_pickup_hold_releases_the_key() {
    let timings = TimingParameters {
        e_count: 50,
        e_hold: 100,
        ..fast_timings()
    };
    let rig = Rig::new(timings, false);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::Pickup));
    assert!(wait_until(DEFAULT_TIMEOUT, || rig
        .actuator
        .actions()
        .contains(&key_down("e"))));

    rig.controller.abort();
    rig.finish();

    let actions = rig.actuator.actions();
    let last_down = actions.iter().rposition(|a| *a == key_down("e")).unwrap();
    assert!(
        actions[last_down..].contains(&key_up("e")),
        "pickup key left down: {actions:?}"
    );
    assert_eq!(rig.controller.snapshot().cycle, 0);
}

#[test]
fn inventory_taps_the_key_and_drags_every_step() {
    let timings = TimingParameters {
        drag: 300,
        ..fast_timings()
    };
    let config = SequenceConfig {
        timings,
        loop_enabled: false,
        strategy: StrategyKind::Simulated,
        ..SequenceConfig::default()
    };
    let rig = Rig::with_config(&config);
    rig.controller.start().unwrap();
    rig.finish();

    let taps: Vec<_> = rig
        .actuator
        .actions()
        .into_iter()
        .filter(|a| *a == key_down("tab") || *a == key_up("tab"))
        .collect();
    assert_eq!(
        taps,
        [key_down("tab"), key_up("tab"), key_down("tab"), key_up("tab")]
    );
    let held = rig.actuator.first_at(&key_up("tab")).unwrap()
        - rig.actuator.first_at(&key_down("tab")).unwrap();
    assert!(held >= Duration::from_millis(50), "tab held {held:?}");

    let mapper = CoordinateMapper::new(config.layout.viewport);
    let source = mapper.translate(config.layout.source);
    let destination = mapper.translate(config.layout.destination);
    let path = rig.actuator.pointer_path();
    let steps = usize::try_from(coords::drag_steps(300)).unwrap();
    // One move to the source, then samples 0..=steps.
    assert_eq!(path.len(), 1 + steps + 1);
    assert_eq!(path[0], source);
    assert_eq!(path[1], source);
    assert_eq!(path.last(), Some(&destination));
}

#[test]
fn live_edit_applies_within_the_same_run() {
    let timings = TimingParameters {
        charge_hold: 300,
        ..fast_timings()
    };
    let rig = Rig::new(timings, false);
    rig.controller.start().unwrap();
    assert!(rig.wait_for_phase(Phase::Charge));
    rig.controller.timings().set(ParamName::ECount, 3).unwrap();
    rig.finish();

    let presses = rig
        .actuator
        .actions()
        .iter()
        .filter(|a| **a == key_down("e"))
        .count();
    assert_eq!(presses, 3);
    assert_eq!(rig.controller.snapshot().cycle, 1);
}

/// Forwards to a recorder but panics on the first secondary press.
struct PanicOnce {
    inner: RecordingActuator,
    armed: AtomicBool,
}

impl ActuatorPort for PanicOnce {
    fn dispatch(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        if command == down(Control::Secondary) && self.armed.swap(false, Ordering::SeqCst) {
            panic!("binding crashed");
        }
        self.inner.dispatch(command)
    }
}

#[test]
fn panicking_port_faults_the_cycle_instead_of_wedging_the_run() {
    let sim = SimulatedStrategy::new();
    let connectivity = Arc::new(ConnectivityController::new(
        StrategyKind::Simulated,
        Strategies::simulated(&sim),
    ));
    let recorder = RecordingActuator::new();
    let port = Arc::new(PanicOnce {
        inner: recorder.clone(),
        armed: AtomicBool::new(true),
    });
    let config = SequenceConfig {
        timings: fast_timings(),
        loop_enabled: false,
        strategy: StrategyKind::Simulated,
        ..SequenceConfig::default()
    };
    let events = common::EventSink::default();
    let ctx = SequencerContext::new(
        &config,
        port,
        connectivity,
        Arc::new(EventEmitter::new(Box::new(events.clone()))),
    );
    let controller = RunController::new(ctx);
    controller.start().unwrap();
    assert!(
        wait_until(DEFAULT_TIMEOUT, || !controller.is_running()),
        "run stuck after panic: {}",
        controller.snapshot()
    );
    controller.join();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.cycle, 1);
    let faults: Vec<_> = events
        .events()
        .into_iter()
        .filter(|e| e["type"] == "phase_fault")
        .collect();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0]["phase"], "cancel");
    assert!(faults[0]["error"].as_str().unwrap().contains("binding crashed"));
    // Both buttons were rolled back before the cycle restarted at Charge.
    assert_eq!(
        recorder.actions()[..4],
        [
            down(Control::Primary),
            up(Control::Secondary),
            up(Control::Primary),
            down(Control::Primary),
        ]
    );

    assert!(controller.start().unwrap(), "a new run can start");
    assert!(wait_until(DEFAULT_TIMEOUT, || !controller.is_running()));
    controller.join();
}
