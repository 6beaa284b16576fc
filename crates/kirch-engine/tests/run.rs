//! Run controller behaviour: lifecycle, initial conditions, events,
//! pacing, cancellation and topology edits.

use std::time::Duration;

use kirch_core::NumericError;
use kirch_engine::{
    ConfigError, DataSink, InitialConditions, MemorySink, RunState, Sample, SimError, Simulation,
    SimulationConfig, StopReason, StructuralError,
};
use kirch_mna::components::{ControlledVoltageSource, Gain, Resistor, Switch, VoltageSource};
use kirch_mna::{Topology, GROUND};
use kirch_task::ScheduleError;
use kirch_test_utils::fixtures::{decoupled_pair, rl_current_source, source_resistor};
use kirch_test_utils::init_tracing;

fn config(dt: f64, steps: u32) -> SimulationConfig {
    SimulationConfig {
        name: "test".into(),
        time_step: dt,
        final_time: dt * f64::from(steps),
        ..SimulationConfig::default()
    }
}

fn close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual} (tol {tol})"
    );
}

#[test]
fn offline_run_reaches_final_time() {
    init_tracing();
    let mut sim = Simulation::new(config(1e-4, 10), source_resistor(10_000.0, 1.0).unwrap()).unwrap();
    assert_eq!(*sim.state(), RunState::Idle);
    let sink = MemorySink::new();
    let store = sim.store();
    let columns = [
        ("v", store.find("n1.v").unwrap()),
        ("i", store.find("r.i_intf").unwrap()),
    ];
    sim.add_sink(sink.clone(), columns).unwrap();

    let metrics = sim.run().unwrap();
    assert_eq!(metrics.steps, 10);
    assert_eq!(sim.step_count(), 10);
    close(sim.time(), 1e-3, 1e-12);
    assert_eq!(*sim.state(), RunState::Stopped(StopReason::Completed));
    assert_eq!(sink.len(), 10);
    for v in sink.series("v") {
        close(v, 10_000.0, 1e-6);
    }
    close(sink.series("i")[9], 10_000.0, 1e-6);
    assert_eq!(sim.last_step().task_us.len(), sim.assembly().schedule.len());

    assert!(matches!(
        sim.step(),
        Err(SimError::InvalidState { operation: "step", .. })
    ));
}

#[test]
fn steady_state_start_has_no_transient() {
    let cfg = SimulationConfig {
        initial_conditions: InitialConditions::SteadyState,
        ..config(1e-4, 50)
    };
    let mut sim = Simulation::new(cfg, rl_current_source(2.0, 5.0, 0.1, None).unwrap()).unwrap();
    let sink = MemorySink::new();
    let v = sim.store().find("n1.v").unwrap();
    sim.add_sink(sink.clone(), [("v", v)]).unwrap();
    sim.run().unwrap();
    for v in sink.series("v") {
        close(v, 10.0, 1e-3);
    }
}

#[test]
fn steady_state_start_holds_across_a_decoupled_line() {
    let cfg = SimulationConfig {
        initial_conditions: InitialConditions::SteadyState,
        ..config(1e-5, 10)
    };
    let mut sim = Simulation::new(cfg, decoupled_pair(100.0, (0.0, 1e-3, 1e-7), 100.0).unwrap()).unwrap();
    let sink = MemorySink::new();
    let m = sim.topology().node_voltage("m").unwrap();
    sim.add_sink(sink.clone(), [("m", m)]).unwrap();
    sim.run().unwrap();

    let series = sink.series("m");
    assert_eq!(series.len(), 10);
    for v in series {
        close(v, 100.0 / 1.01, 1e-9);
    }
}

#[test]
fn step_before_initialize_is_rejected() {
    let mut sim = Simulation::new(config(1e-4, 5), source_resistor(1.0, 1.0).unwrap()).unwrap();
    assert!(matches!(
        sim.step(),
        Err(SimError::InvalidState {
            state: RunState::Idle,
            ..
        })
    ));
    sim.initialize().unwrap();
    assert!(matches!(sim.initialize(), Err(SimError::InvalidState { .. })));
    sim.step().unwrap();
}

#[test]
fn bad_config_rejected_before_assembly() {
    let cfg = SimulationConfig {
        time_step: 0.0,
        ..SimulationConfig::default()
    };
    let err = Simulation::new(cfg, source_resistor(1.0, 1.0).unwrap()).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::InvalidTimeStep { .. })));
}

#[test]
fn singular_network_is_a_numeric_error() {
    let mut t = Topology::new();
    let n = t.add_node("n").unwrap();
    let v1 = VoltageSource::dc(t.store_mut(), "v1", 1.0).unwrap();
    let v2 = VoltageSource::dc(t.store_mut(), "v2", 2.0).unwrap();
    t.add_component(v1, &[n, GROUND]).unwrap();
    t.add_component(v2, &[n, GROUND]).unwrap();
    let err = Simulation::new(config(1e-4, 5), t).unwrap_err();
    assert!(matches!(err, SimError::Numeric(NumericError::Singular { .. })));
}

#[test]
fn undelayed_signal_loop_is_structural() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let cvs = ControlledVoltageSource::new(t.store_mut(), "cvs", 1.0, 1.0).unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    let gain = Gain::new(t.store_mut(), "g", 0.5).unwrap();
    let voltage = t.node_voltage("a").unwrap();
    t.store_mut().bind(gain.input(), voltage).unwrap();
    t.store_mut().bind(cvs.setpoint(), gain.output()).unwrap();
    t.add_component(cvs, &[a, GROUND]).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();
    t.add_component(gain, &[]).unwrap();

    let err = Simulation::new(config(1e-4, 5), t).unwrap_err();
    assert!(matches!(
        err,
        SimError::Structural(StructuralError::Schedule(ScheduleError::DependencyCycle { .. }))
    ));
}

#[test]
fn scheduled_event_closes_switch() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let b = t.add_node("b").unwrap();
    let vs = VoltageSource::dc(t.store_mut(), "vs", 10.0).unwrap();
    let sw = Switch::new(t.store_mut(), "sw", 1e6, 1e-3, false).unwrap();
    let state = sw.state();
    let r = Resistor::new(t.store_mut(), "r", 10.0).unwrap();
    t.add_component(vs, &[a, GROUND]).unwrap();
    t.add_component(sw, &[a, b]).unwrap();
    t.add_component(r, &[b, GROUND]).unwrap();

    let dt = 1e-4;
    let mut sim = Simulation::new(config(dt, 10), t).unwrap();
    let sink = MemorySink::new();
    let v = sim.topology().node_voltage("b").unwrap();
    sim.add_sink(sink.clone(), [("b", v)]).unwrap();
    sim.schedule_event(5.0 * dt, state, true).unwrap();
    assert!(matches!(
        sim.schedule_event(f64::NAN, state, true),
        Err(SimError::InvalidEventTime { .. })
    ));

    let metrics = sim.run().unwrap();
    let b = sink.series("b");
    assert!(b[..5].iter().all(|v| *v < 1e-3));
    assert!(b[5..].iter().all(|v| (*v - 10.0 * 10.0 / 10.001).abs() < 1e-9));
    assert_eq!(metrics.events_fired, 1);
    assert_eq!(metrics.refactorizations, 1);
}

/// Sink that stalls on one step to force a deadline miss.
struct SlowSink {
    on_step: u64,
    delay: Duration,
}

impl DataSink for SlowSink {
    fn record(&mut self, sample: &Sample) {
        if sample.step.0 == self.on_step {
            std::thread::sleep(self.delay);
        }
    }
}

#[test]
fn one_overrun_is_one_timing_violation() {
    let cfg = SimulationConfig {
        realtime: true,
        ..config(0.05, 4)
    };
    let mut sim = Simulation::new(cfg, source_resistor(1.0, 1.0).unwrap()).unwrap();
    let slow = SlowSink {
        on_step: 1,
        delay: Duration::from_millis(75),
    };
    sim.add_sink(slow, std::iter::empty::<(String, kirch_core::AttrId)>()).unwrap();
    let metrics = sim.run().unwrap();
    assert_eq!(metrics.steps, 4);
    assert_eq!(metrics.timing_violations, 1);
    assert!(metrics.worst_step_us >= 75_000);
}

#[test]
fn overrun_longer_than_a_step_is_still_one_violation() {
    let cfg = SimulationConfig {
        realtime: true,
        ..config(0.05, 8)
    };
    let mut sim = Simulation::new(cfg, source_resistor(1.0, 1.0).unwrap()).unwrap();
    let slow = SlowSink {
        on_step: 1,
        delay: Duration::from_millis(160),
    };
    sim.add_sink(slow, std::iter::empty::<(String, kirch_core::AttrId)>()).unwrap();
    let metrics = sim.run().unwrap();
    assert_eq!(metrics.steps, 8);
    assert_eq!(metrics.timing_violations, 1);
}

#[test]
fn stop_before_run_cancels_without_stepping() {
    let mut sim = Simulation::new(config(1e-4, 100), source_resistor(1.0, 1.0).unwrap()).unwrap();
    sim.stop_handle().stop();
    let metrics = sim.run().unwrap();
    assert_eq!(metrics.steps, 0);
    assert_eq!(*sim.state(), RunState::Stopped(StopReason::Cancelled));
}

#[test]
fn topology_edit_rebuilds_before_next_step() {
    let mut sim = Simulation::new(config(1e-4, 10), source_resistor(10.0, 10.0).unwrap()).unwrap();
    sim.initialize().unwrap();
    sim.step().unwrap();
    let current = |sim: &Simulation| {
        let store = sim.store();
        store.get(store.find_typed::<f64>("vs.i_intf").unwrap()).unwrap()
    };
    close(current(&sim), -1.0, 1e-9);

    let tasks_before = sim.assembly().schedule.len();
    sim.edit_topology(|t| {
        let n1 = t.node("n1").unwrap();
        let r2 = Resistor::new(t.store_mut(), "r2", 10.0).unwrap();
        t.add_component(r2, &[n1, GROUND]).unwrap();
    })
    .unwrap();
    sim.step().unwrap();
    close(current(&sim), -2.0, 1e-9);
    assert!(sim.assembly().schedule.len() > tasks_before);
}

#[test]
fn worker_pool_matches_sequential_results() {
    let series = |workers: usize| {
        let cfg = SimulationConfig {
            worker_threads: Some(workers),
            ..config(1e-5, 40)
        };
        let mut sim = Simulation::new(cfg, decoupled_pair(100.0, (0.5, 1e-3, 1e-7), 80.0).unwrap()).unwrap();
        let sink = MemorySink::new();
        let m = sim.topology().node_voltage("m").unwrap();
        sim.add_sink(sink.clone(), [("m", m)]).unwrap();
        sim.run().unwrap();
        sink.series("m")
    };
    let sequential = series(1);
    assert_eq!(sequential.len(), 40);
    assert_eq!(sequential, series(4));
}
