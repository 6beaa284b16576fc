//! Nodes, components and their connections.
//!
//! A [`Topology`] owns the [`AttributeStore`] that every component's
//! cells live in. Components are built against [`Topology::store_mut`]
//! and then added with their terminal nodes. Structure is fixed once a
//! simulation takes ownership.

use std::fmt;

use indexmap::IndexMap;
use kirch_core::{Attr, AttributeStore};

use crate::component::Component;
use crate::error::TopologyError;

/// Identity of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// The implicit reference node.
pub const GROUND: NodeId = NodeId(u32::MAX);

impl NodeId {
    /// Whether this is [`GROUND`].
    pub fn is_ground(self) -> bool {
        self == GROUND
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            f.write_str("gnd")
        } else {
            write!(f, "n{}", self.0)
        }
    }
}

#[derive(Debug)]
struct NodeEntry {
    id: NodeId,
    voltage: Attr<f64>,
}

struct ComponentEntry {
    component: Box<dyn Component>,
    terminals: Vec<NodeId>,
}

/// The network under simulation.
#[derive(Default)]
pub struct Topology {
    store: AttributeStore,
    nodes: IndexMap<String, NodeEntry>,
    components: IndexMap<String, ComponentEntry>,
    next_node: u32,
}

impl Topology {
    /// Empty topology with an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The attribute store.
    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    /// Mutable store, for building components.
    pub fn store_mut(&mut self) -> &mut AttributeStore {
        &mut self.store
    }

    fn name_taken(&self, name: &str) -> bool {
        self.nodes.contains_key(name) || self.components.contains_key(name)
    }

    /// Add a node; its voltage cell is `<name>.v`.
    pub fn add_node(&mut self, name: &str) -> Result<NodeId, TopologyError> {
        if self.name_taken(name) {
            return Err(TopologyError::DuplicateName(name.to_string()));
        }
        let voltage = self.store.create(name, "v", 0.0)?;
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(name.to_string(), NodeEntry { id, voltage });
        Ok(id)
    }

    /// Remove an unconnected node.
    pub fn remove_node(&mut self, name: &str) -> Result<(), TopologyError> {
        let id = self
            .node(name)
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()))?;
        if let Some((component, _)) = self
            .components
            .iter()
            .find(|(_, e)| e.terminals.contains(&id))
        {
            return Err(TopologyError::NodeInUse {
                node: name.to_string(),
                component: component.clone(),
            });
        }
        self.nodes.shift_remove(name);
        self.store.release_owner(name);
        Ok(())
    }

    /// Node by name.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.nodes.get(name).map(|e| e.id)
    }

    /// Name of a node.
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(n, _)| n.as_str())
    }

    /// Voltage cell of a node.
    pub fn node_voltage(&self, name: &str) -> Option<Attr<f64>> {
        self.nodes.get(name).map(|e| e.voltage)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, NodeId, Attr<f64>)> + '_ {
        self.nodes.iter().map(|(n, e)| (n.as_str(), e.id, e.voltage))
    }

    /// Number of nodes, ground excluded.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a component connected to `terminals`.
    pub fn add_component(
        &mut self,
        component: impl Component + 'static,
        terminals: &[NodeId],
    ) -> Result<(), TopologyError> {
        self.add_boxed(Box::new(component), terminals)
    }

    /// Add an already boxed component.
    pub fn add_boxed(
        &mut self,
        component: Box<dyn Component>,
        terminals: &[NodeId],
    ) -> Result<(), TopologyError> {
        let name = component.name().to_string();
        if self.name_taken(&name) {
            return Err(TopologyError::DuplicateName(name));
        }
        if terminals.len() != component.terminal_count() {
            return Err(TopologyError::TerminalCountMismatch {
                component: name,
                expected: component.terminal_count(),
                got: terminals.len(),
            });
        }
        for (terminal, node) in terminals.iter().enumerate() {
            if !node.is_ground() && !self.nodes.values().any(|e| e.id == *node) {
                return Err(TopologyError::DanglingTerminal {
                    component: name,
                    terminal,
                });
            }
        }
        self.components.insert(
            name,
            ComponentEntry {
                component,
                terminals: terminals.to_vec(),
            },
        );
        Ok(())
    }

    /// Remove a component and release its cells and its sub-components' cells.
    pub fn remove_component(&mut self, name: &str) -> Result<Box<dyn Component>, TopologyError> {
        let entry = self
            .components
            .shift_remove(name)
            .ok_or_else(|| TopologyError::UnknownComponent(name.to_string()))?;
        let prefix = format!("{name}:");
        self.store
            .release_matching(|owner| owner == name || owner.starts_with(&prefix));
        Ok(entry.component)
    }

    /// Component by name.
    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.components.get(name).map(|e| e.component.as_ref())
    }

    /// Terminal nodes of a component.
    pub fn terminals(&self, name: &str) -> Option<&[NodeId]> {
        self.components.get(name).map(|e| e.terminals.as_slice())
    }

    /// Components in insertion order with their terminals.
    pub fn components(&self) -> impl Iterator<Item = (&dyn Component, &[NodeId])> + '_ {
        self.components
            .values()
            .map(|e| (e.component.as_ref(), e.terminals.as_slice()))
    }

    pub(crate) fn components_mut(
        &mut self,
    ) -> impl Iterator<Item = (&mut Box<dyn Component>, &[NodeId])> + '_ {
        self.components
            .values_mut()
            .map(|e| (&mut e.component, e.terminals.as_slice()))
    }

    /// Number of components.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Check terminal connectivity and the attribute graph.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (name, entry) in &self.components {
            if entry.terminals.len() != entry.component.terminal_count() {
                return Err(TopologyError::TerminalCountMismatch {
                    component: name.clone(),
                    expected: entry.component.terminal_count(),
                    got: entry.terminals.len(),
                });
            }
            for (terminal, node) in entry.terminals.iter().enumerate() {
                if !node.is_ground() && !self.nodes.values().any(|e| e.id == *node) {
                    return Err(TopologyError::DanglingTerminal {
                        component: name.clone(),
                        terminal,
                    });
                }
            }
        }
        self.store.validate()?;
        Ok(())
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}
