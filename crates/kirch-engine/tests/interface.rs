//! Two runs exchanging values through a channel pair.

use std::time::Duration;

use kirch_core::{AttrValue, StepId};
use kirch_engine::{
    ChannelPair, Endpoint, ExportTiming, Frame, Interface, InterfaceError, MemorySink, RunState,
    SimError, Simulation, SimulationConfig, StopReason, SyncPolicy,
};
use kirch_mna::components::{ControlledVoltageSource, Resistor};
use kirch_mna::{Topology, GROUND};
use kirch_test_utils::fixtures::source_resistor;
use kirch_test_utils::init_tracing;

fn config(name: &str, steps: u32) -> SimulationConfig {
    SimulationConfig {
        name: name.into(),
        time_step: 1e-4,
        final_time: 1e-4 * f64::from(steps),
        ..SimulationConfig::default()
    }
}

/// `cvs` (setpoint imported) across `r` at node `a`.
fn follower(endpoint: Endpoint, policy: SyncPolicy, steps: u32) -> (Simulation, MemorySink) {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let cvs = ControlledVoltageSource::new(t.store_mut(), "cvs", 0.0, 1.0).unwrap();
    let setpoint = cvs.setpoint();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    t.add_component(cvs, &[a, GROUND]).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();

    let mut sim = Simulation::new(config("follower", steps), t).unwrap();
    sim.add_interface(Interface::new(endpoint, policy).import(setpoint))
        .unwrap();
    let sink = MemorySink::new();
    let v = sim.topology().node_voltage("a").unwrap();
    sim.add_sink(sink.clone(), [("a", v)]).unwrap();
    (sim, sink)
}

#[test]
fn blocking_link_delays_by_one_step() {
    init_tracing();
    let (leader_end, follower_end) = ChannelPair::new("leader", "follower").into_endpoints();

    let mut leader = Simulation::new(config("leader", 5), source_resistor(10.0, 1.0).unwrap()).unwrap();
    let v = leader.topology().node_voltage("n1").unwrap();
    let policy = SyncPolicy::Block {
        timeout: Some(Duration::from_secs(5)),
    };
    leader
        .add_interface(Interface::new(leader_end, policy).export(v, ExportTiming::AfterStep))
        .unwrap();
    let leader = leader.spawn().unwrap();

    let (mut sim, sink) = follower(follower_end, policy, 5);
    sim.run().unwrap();
    leader.join().unwrap().result.unwrap();

    // Step 0 sees the leader's initial value, later steps its last solve.
    let a = sink.series("a");
    assert_eq!(a.len(), 5);
    assert!(a[0].abs() < 1e-12);
    assert!(a[1..].iter().all(|v| (v - 10.0).abs() < 1e-9));
    assert_eq!(sim.metrics().stale_imports, 0);
}

#[test]
fn hold_last_keeps_stepping_without_frames() {
    let (peer, ours) = ChannelPair::new("peer", "follower").into_endpoints();
    let policy = SyncPolicy::HoldLast {
        timeout: Duration::from_millis(10),
    };
    let (mut sim, sink) = follower(ours, policy, 3);
    peer.send(Frame {
        step: StepId(0),
        values: vec![AttrValue::Real(3.0)],
    })
    .unwrap();

    let metrics = sim.run().unwrap();
    assert_eq!(metrics.steps, 3);
    assert_eq!(metrics.stale_imports, 2);
    assert!(sink.series("a").iter().all(|v| (v - 3.0).abs() < 1e-9));
}

#[test]
fn block_timeout_stops_the_run() {
    let (_peer, ours) = ChannelPair::new("peer", "follower").into_endpoints();
    let policy = SyncPolicy::Block {
        timeout: Some(Duration::from_millis(20)),
    };
    let (mut sim, _sink) = follower(ours, policy, 3);
    let err = sim.run().unwrap_err();
    assert!(matches!(
        err,
        SimError::Interface(InterfaceError::Timeout { step: StepId(0), .. })
    ));
    assert!(matches!(sim.state(), RunState::Stopped(StopReason::Failed(_))));
    assert_eq!(sim.step_count(), 0);
}

#[test]
fn interfaces_attach_only_while_idle() {
    let (_peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
    let mut sim = Simulation::new(config("late", 3), source_resistor(1.0, 1.0).unwrap()).unwrap();
    sim.initialize().unwrap();
    let err = sim
        .add_interface(Interface::new(ours, SyncPolicy::Block { timeout: None }))
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidState { .. }));
}
