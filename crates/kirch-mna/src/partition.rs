//! Splitting a topology into electrically disjoint subnetworks.
//!
//! Non-ground nodes joined through any component end up in one
//! subnetwork (union-find). Each subnetwork numbers its unknowns as
//! nodes in insertion order, then component internal nodes, then extra
//! unknowns, both in component insertion order. No two subnetworks share
//! an index space, a matrix or a right-hand side.

use indexmap::IndexMap;

use crate::component::Layout;
use crate::error::TopologyError;
use crate::topology::{NodeId, Topology};

/// One independent system of equations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subnetwork {
    /// Position in [`Partition::subnetworks`].
    pub index: usize,
    /// Node names with their solution index.
    pub nodes: Vec<(String, usize)>,
    /// Names of the components stamping into this subnetwork.
    pub components: Vec<String>,
    /// Number of unknowns.
    pub dimension: usize,
}

/// Result of [`partition`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    /// Subnetworks, ordered by their first node.
    pub subnetworks: Vec<Subnetwork>,
    /// Layout of every component, keyed by name.
    pub layouts: IndexMap<String, Layout>,
}

pub(crate) struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower position wins so roots follow insertion order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Partition the topology and assign every component its layout.
pub fn partition(topology: &Topology) -> Result<Partition, TopologyError> {
    let node_names: Vec<&str> = topology.nodes().map(|(n, _, _)| n).collect();
    let position: IndexMap<NodeId, usize> = topology
        .nodes()
        .enumerate()
        .map(|(p, (_, id, _))| (id, p))
        .collect();

    let mut uf = UnionFind::new(node_names.len());
    let mut connected = vec![false; node_names.len()];
    for (component, terminals) in topology.components() {
        if terminals.is_empty() {
            continue;
        }
        let mut positions = Vec::with_capacity(terminals.len());
        for (t, node) in terminals.iter().enumerate() {
            if node.is_ground() {
                continue;
            }
            let p = *position
                .get(node)
                .ok_or_else(|| TopologyError::DanglingTerminal {
                    component: component.name().to_string(),
                    terminal: t,
                })?;
            positions.push(p);
        }
        let Some(&first) = positions.first() else {
            return Err(TopologyError::FloatingComponent(
                component.name().to_string(),
            ));
        };
        for &p in &positions {
            connected[p] = true;
            uf.union(first, p);
        }
    }

    // Subnetwork per root, ordered by first node; local node indices.
    let mut subnet_of_root: IndexMap<usize, usize> = IndexMap::new();
    let mut subnetworks: Vec<Subnetwork> = Vec::new();
    let mut local = vec![None; node_names.len()];
    for p in 0..node_names.len() {
        if !connected[p] {
            tracing::warn!(node = node_names[p], "node has no connections, left out of every subnetwork");
            continue;
        }
        let root = uf.find(p);
        let s = *subnet_of_root.entry(root).or_insert_with(|| {
            subnetworks.push(Subnetwork {
                index: subnetworks.len(),
                nodes: Vec::new(),
                components: Vec::new(),
                dimension: 0,
            });
            subnetworks.len() - 1
        });
        let net = &mut subnetworks[s];
        local[p] = Some((s, net.dimension));
        net.nodes.push((node_names[p].to_string(), net.dimension));
        net.dimension += 1;
    }

    let mut layouts: IndexMap<String, Layout> = IndexMap::new();
    for (component, terminals) in topology.components() {
        let mut layout = Layout::default();
        for node in terminals {
            let slot = if node.is_ground() {
                None
            } else {
                position.get(node).and_then(|&p| local[p])
            };
            if layout.subnetwork.is_none() {
                layout.subnetwork = slot.map(|(s, _)| s);
            }
            layout.terminals.push(slot.map(|(_, i)| i));
        }
        if let Some(s) = layout.subnetwork {
            let net = &mut subnetworks[s];
            net.components.push(component.name().to_string());
            let n = component.internal_nodes();
            layout.internal = (net.dimension..net.dimension + n).collect();
            net.dimension += n;
        }
        layouts.insert(component.name().to_string(), layout);
    }

    for (component, _) in topology.components() {
        let Some(layout) = layouts.get_mut(component.name()) else {
            continue;
        };
        if let Some(s) = layout.subnetwork {
            let net = &mut subnetworks[s];
            let n = component.extra_unknowns();
            layout.extras = (net.dimension..net.dimension + n).collect();
            net.dimension += n;
        }
    }

    tracing::info!(
        subnetworks = subnetworks.len(),
        dimensions = ?subnetworks.iter().map(|s| s.dimension).collect::<Vec<_>>(),
        "topology partitioned"
    );

    Ok(Partition {
        subnetworks,
        layouts,
    })
}
