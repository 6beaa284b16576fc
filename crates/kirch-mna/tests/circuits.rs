//! End-to-end circuit tests: assemble, initialise and step small
//! networks, then check solved quantities.

use kirch_core::NumericError;
use kirch_mna::components::{ControlledVoltageSource, Gain, PiLine, Resistor, Switch, VoltageSource};
use kirch_mna::{assemble, AssemblyError, SystemEnv, Topology, GROUND};
use kirch_task::{Phase, ScheduleError};
use kirch_test_utils::fixtures::{rl_current_source, source_resistor};
use kirch_test_utils::{init_tracing, Stepper};

fn close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual} (tol {tol})"
    );
}

#[test]
fn ideal_source_across_one_ohm() {
    init_tracing();
    let mut sim = Stepper::new(source_resistor(10_000.0, 1.0).unwrap(), 1e-4).unwrap();
    sim.run(3).unwrap();
    close(sim.real("n1.v"), 10_000.0, 1e-6);
    close(sim.real("r.i_intf"), 10_000.0, 1e-6);
    // Current enters the source at its positive terminal: the source delivers.
    close(sim.real("vs.i_intf"), -10_000.0, 1e-6);
}

#[test]
fn series_rl_from_steady_state_holds_ir() {
    init_tracing();
    let topology = rl_current_source(2.0, 5.0, 0.1, None).unwrap();
    let mut sim = Stepper::steady_state(topology, 1e-4).unwrap();
    close(sim.real("n1.v"), 10.0, 1e-3);
    close(sim.real("l.i_intf"), 2.0, 1e-6);
    sim.run(200).unwrap();
    close(sim.real("n1.v"), 10.0, 1e-3);
    close(sim.real("l.i_intf"), 2.0, 1e-6);
}

#[test]
fn series_rl_with_bleeder_converges_from_zero() {
    init_tracing();
    let topology = rl_current_source(2.0, 10.0, 0.01, Some(10.0)).unwrap();
    let mut sim = Stepper::new(topology, 1e-4).unwrap();
    sim.run(1).unwrap();
    // The inductor starts open: all current through the bleeder.
    assert!(sim.real("n1.v") > 10.0);
    sim.run(999).unwrap();
    // Inductor shorts DC: 2 A into 10 || 10.
    close(sim.real("n1.v"), 10.0, 1e-3);
    close(sim.real("l.i_intf"), 1.0, 1e-3);
}

#[test]
fn switch_toggle_refactorises_once() {
    init_tracing();
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

    let mut sim = Stepper::new(t, 1e-4).unwrap();
    sim.step().unwrap();
    assert!(sim.real("b.v") < 1e-3);

    sim.topology.store().set(state, true).unwrap();
    sim.step().unwrap();
    close(sim.real("b.v"), 10.0 * 10.0 / 10.001, 1e-9);
    close(sim.real("sw.i_intf"), 10.0 / 10.001, 1e-9);

    sim.topology.store().set(state, false).unwrap();
    sim.step().unwrap();
    assert!(sim.real("b.v") < 1e-3);
    assert_eq!(sim.assembly.refactorizations(), 1);
}

#[test]
fn parallel_voltage_sources_are_singular() {
    let mut t = Topology::new();
    let n = t.add_node("n").unwrap();
    let v1 = VoltageSource::dc(t.store_mut(), "v1", 1.0).unwrap();
    let v2 = VoltageSource::dc(t.store_mut(), "v2", 1.0).unwrap();
    t.add_component(v1, &[n, GROUND]).unwrap();
    t.add_component(v2, &[n, GROUND]).unwrap();
    let env = SystemEnv { dt: 1e-4, frequency: 50.0 };
    let err = assemble(&mut t, &env).unwrap_err();
    assert!(matches!(err, AssemblyError::Numeric(NumericError::Singular { .. })));
}

#[test]
fn sinusoidal_source_follows_its_phasor() {
    let mut t = Topology::new();
    let n = t.add_node("n").unwrap();
    let vs = VoltageSource::new(t.store_mut(), "vs", kirch_core::Complex64::new(1.0, 0.0), 50.0).unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    t.add_component(vs, &[n, GROUND]).unwrap();
    t.add_component(r, &[n, GROUND]).unwrap();
    let dt = 1e-3;
    let mut sim = Stepper::new(t, dt).unwrap();
    for k in 0..25 {
        sim.step().unwrap();
        let expected = (2.0 * std::f64::consts::PI * 50.0 * k as f64 * dt).cos();
        close(sim.real("n.v"), expected, 1e-9);
    }
}

#[test]
fn pi_line_feeds_load_from_steady_state() {
    init_tracing();
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let b = t.add_node("b").unwrap();
    let vs = VoltageSource::dc(t.store_mut(), "vs", 100.0).unwrap();
    let pi = PiLine::new(t.store_mut(), "pi", 1.0, 1e-3, 1e-6).unwrap();
    let load = Resistor::new(t.store_mut(), "load", 99.0).unwrap();
    t.add_component(vs, &[a, GROUND]).unwrap();
    t.add_component(pi, &[a, b]).unwrap();
    t.add_component(load, &[b, GROUND]).unwrap();

    let mut sim = Stepper::steady_state(t, 1e-5).unwrap();
    let schedule = &sim.assembly.schedule;
    assert!(schedule.index_of("pi", Phase::PostStep).is_some());
    assert!(schedule.index_of("pi:l", Phase::PreStep).is_some());
    assert!(schedule.index_of("pi:c_b", Phase::PostStep).is_some());

    sim.run(100).unwrap();
    close(sim.real("b.v"), 99.0, 1e-3);
    close(sim.real("pi.i_intf"), 1.0, 1e-4);
    close(sim.real("pi.v_intf"), 1.0, 1e-3);
}

#[test]
fn controlled_source_applies_setpoint_in_the_same_step() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let cvs = ControlledVoltageSource::new(t.store_mut(), "cvs", 5.0, 2.0).unwrap();
    let setpoint = cvs.setpoint();
    let r = Resistor::new(t.store_mut(), "r", 10.0).unwrap();
    t.add_component(cvs, &[a, GROUND]).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();

    let mut sim = Stepper::new(t, 1e-4).unwrap();
    let schedule = &sim.assembly.schedule;
    // The inner source's pre-step runs inside the parent's task.
    assert!(schedule.index_of("cvs:src", Phase::PreStep).is_none());
    assert!(schedule.index_of("cvs:src", Phase::PostStep).is_some());
    assert!(schedule.index_of("cvs", Phase::PreStep).is_some());

    sim.step().unwrap();
    close(sim.real("a.v"), 10.0, 1e-9);
    sim.topology.store().set(setpoint, 7.0).unwrap();
    sim.step().unwrap();
    close(sim.real("a.v"), 14.0, 1e-9);
    close(sim.real("cvs.i_intf"), -1.4, 1e-9);
}

fn feedback(delayed: bool) -> Result<Stepper, AssemblyError> {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let cvs = ControlledVoltageSource::new(t.store_mut(), "cvs", 1.0, 1.0).unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    let mut gain = Gain::new(t.store_mut(), "g", 0.5).unwrap();
    if delayed {
        gain = gain.delayed();
    }
    let voltage = t.node_voltage("a").unwrap();
    t.store().set(voltage, 8.0).unwrap();
    t.store_mut().bind(gain.input(), voltage).unwrap();
    t.store_mut().bind(cvs.setpoint(), gain.output()).unwrap();
    t.add_component(cvs, &[a, GROUND]).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();
    t.add_component(gain, &[]).unwrap();
    Stepper::new(t, 1e-4)
}

#[test]
fn signal_loop_through_the_network_needs_a_delay() {
    let err = feedback(false).err().unwrap();
    assert!(matches!(
        err,
        AssemblyError::Schedule(ScheduleError::DependencyCycle { .. })
    ));

    let mut sim = feedback(true).unwrap();
    // v(n) = 0.5 v(n-1), starting from 8 V.
    for expected in [4.0, 2.0, 1.0, 0.5] {
        sim.step().unwrap();
        close(sim.real("a.v"), expected, 1e-12);
    }
}
