//! Topology construction and subnetwork partitioning.

use kirch_mna::components::{Resistor, VoltageSource};
use kirch_mna::{assemble, partition, AssemblyError, SystemEnv, Topology, TopologyError, GROUND};
use proptest::prelude::*;

#[test]
fn disjoint_circuits_get_their_own_subnetworks() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let b = t.add_node("b").unwrap();
    let c = t.add_node("c").unwrap();
    let _lonely = t.add_node("lonely").unwrap();
    let v1 = VoltageSource::dc(t.store_mut(), "v1", 1.0).unwrap();
    let r1 = Resistor::new(t.store_mut(), "r1", 1.0).unwrap();
    let r2 = Resistor::new(t.store_mut(), "r2", 1.0).unwrap();
    let r3 = Resistor::new(t.store_mut(), "r3", 1.0).unwrap();
    t.add_component(v1, &[a, GROUND]).unwrap();
    t.add_component(r1, &[a, b]).unwrap();
    t.add_component(r2, &[b, GROUND]).unwrap();
    t.add_component(r3, &[c, GROUND]).unwrap();

    let p = partition(&t).unwrap();
    assert_eq!(p.subnetworks.len(), 2);
    let first = &p.subnetworks[0];
    assert_eq!(first.nodes, vec![("a".to_string(), 0), ("b".to_string(), 1)]);
    // Two nodes plus the source branch current.
    assert_eq!(first.dimension, 3);
    assert_eq!(first.components, ["v1", "r1", "r2"]);
    assert_eq!(p.subnetworks[1].nodes, vec![("c".to_string(), 0)]);
    assert_eq!(p.layouts["v1"].extras, vec![2]);
    assert_eq!(p.layouts["r3"].subnetwork, Some(1));
    // The unconnected node belongs to no subnetwork.
    assert!(p.subnetworks.iter().all(|s| s.nodes.iter().all(|(n, _)| n != "lonely")));
}

#[test]
fn grounded_only_component_rejected() {
    let mut t = Topology::new();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    t.add_component(r, &[GROUND, GROUND]).unwrap();
    let env = SystemEnv { dt: 1e-3, frequency: 50.0 };
    assert!(matches!(
        assemble(&mut t, &env).unwrap_err(),
        AssemblyError::Topology(TopologyError::FloatingComponent(ref n)) if n == "r"
    ));
}

#[test]
fn terminal_count_checked_on_insert() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    assert_eq!(
        t.add_component(r, &[a]).unwrap_err(),
        TopologyError::TerminalCountMismatch {
            component: "r".into(),
            expected: 2,
            got: 1
        }
    );
}

#[test]
fn names_are_unique_across_nodes_and_components() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    assert_eq!(t.add_node("a").unwrap_err(), TopologyError::DuplicateName("a".into()));
    let r = Resistor::new(t.store_mut(), "a2", 1.0).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();
    assert_eq!(t.add_node("a2").unwrap_err(), TopologyError::DuplicateName("a2".into()));
}

#[test]
fn removal_releases_cells_and_guards_nodes() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();

    assert!(matches!(t.remove_node("a"), Err(TopologyError::NodeInUse { .. })));
    t.remove_component("r").unwrap();
    assert!(t.store().find("r.v_intf").is_none());
    t.remove_node("a").unwrap();
    assert!(t.store().find("a.v").is_none());
    assert_eq!(t.node_count(), 0);
}

#[test]
fn reassembly_is_repeatable() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let v = VoltageSource::dc(t.store_mut(), "v", 1.0).unwrap();
    let r = Resistor::new(t.store_mut(), "r", 1.0).unwrap();
    t.add_component(v, &[a, GROUND]).unwrap();
    t.add_component(r, &[a, GROUND]).unwrap();
    let env = SystemEnv { dt: 1e-3, frequency: 50.0 };
    let first = assemble(&mut t, &env).unwrap();
    let second = assemble(&mut t, &env).unwrap();
    assert_eq!(first.schedule.layers(), second.schedule.layers());
    assert_eq!(first.schedule.edges(), second.schedule.edges());
}

proptest! {
    /// A chain of `n` resistors hanging off `k` separate sources yields
    /// `k` subnetworks whose dimensions add up to nodes plus sources.
    #[test]
    fn subnetworks_cover_every_connected_node(k in 1usize..5, n in 1usize..5) {
        let mut t = Topology::new();
        for s in 0..k {
            let mut prev = t.add_node(&format!("s{s}n0")).unwrap();
            let v = VoltageSource::dc(t.store_mut(), &format!("v{s}"), 1.0).unwrap();
            t.add_component(v, &[prev, GROUND]).unwrap();
            for i in 1..=n {
                let next = t.add_node(&format!("s{s}n{i}")).unwrap();
                let r = Resistor::new(t.store_mut(), &format!("r{s}_{i}"), 1.0).unwrap();
                t.add_component(r, &[prev, next]).unwrap();
                prev = next;
            }
            let load = Resistor::new(t.store_mut(), &format!("load{s}"), 1.0).unwrap();
            t.add_component(load, &[prev, GROUND]).unwrap();
        }
        let p = partition(&t).unwrap();
        prop_assert_eq!(p.subnetworks.len(), k);
        for net in &p.subnetworks {
            prop_assert_eq!(net.nodes.len(), n + 1);
            prop_assert_eq!(net.dimension, n + 2);
        }
    }
}

#[test]
fn rebuild_with_fewer_subnetworks_drops_stale_system_cells() {
    let mut t = Topology::new();
    let a = t.add_node("a").unwrap();
    let c = t.add_node("c").unwrap();
    let v1 = VoltageSource::dc(t.store_mut(), "v1", 1.0).unwrap();
    let r1 = Resistor::new(t.store_mut(), "r1", 1.0).unwrap();
    let r3 = Resistor::new(t.store_mut(), "r3", 1.0).unwrap();
    t.add_component(v1, &[a, GROUND]).unwrap();
    t.add_component(r1, &[a, GROUND]).unwrap();
    t.add_component(r3, &[c, GROUND]).unwrap();
    let env = SystemEnv { dt: 1e-3, frequency: 50.0 };

    let first = assemble(&mut t, &env).unwrap();
    assert_eq!(first.bindings.len(), 2);
    assert!(t.store().find("net1.x").is_some());

    t.remove_component("r3").unwrap();
    let second = assemble(&mut t, &env).unwrap();
    assert_eq!(second.bindings.len(), 1);
    assert!(t.store().find("net0.x").is_some());
    assert!(t.store().find("net1.x").is_none());
    assert!(t.store().find("net1.rhs").is_none());
}
