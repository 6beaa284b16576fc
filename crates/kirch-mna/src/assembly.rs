//! Turning a [`Topology`] into solvers and a schedule.
//!
//! [`assemble`] does every structural step once, in order:
//!
//! 1. validate the topology and its attribute graph,
//! 2. partition it into subnetworks and lay out every component,
//! 3. check the time step against each component's limit,
//! 4. create the right-hand-side and solution cells of each subnetwork,
//! 5. attach every component to its layout,
//! 6. stamp each subnetwork's matrix and factorise it for the current
//!    switch states (a singular system is rejected here, before any step),
//! 7. gather component and solve tasks and build the schedule.

use std::sync::Arc;

use indexmap::IndexMap;
use kirch_core::{Attr, AttributeStore, DMatrix, DVector};
use kirch_task::{build_schedule, Schedule, SharedTask};

use crate::component::SystemEnv;
use crate::error::{AssemblyError, ComponentError};
use crate::matrix::SystemMatrix;
use crate::partition::{partition, Partition, UnionFind};
use crate::solver::{factorize, solve_with, MnaSolver, SystemBinding};
use crate::topology::Topology;

/// Everything a run needs from the topology.
#[derive(Debug)]
pub struct Assembly {
    /// Subnetworks and component layouts.
    pub partition: Partition,
    /// Cells of each subnetwork, indexed like `partition.subnetworks`.
    pub bindings: Vec<SystemBinding>,
    /// One solver per subnetwork.
    pub solvers: Vec<Arc<MnaSolver>>,
    /// The layered task schedule.
    pub schedule: Schedule,
}

impl Assembly {
    /// Re-factorisations across all solvers.
    pub fn refactorizations(&self) -> u64 {
        self.solvers.iter().map(|s| s.refactorizations()).sum()
    }

    /// DC operating point of every subnetwork.
    ///
    /// Inductors short, capacitors open, sources at their `t = 0` value.
    /// Subnetworks joined by a [`SteadyStateLink`](crate::SteadyStateLink)
    /// are solved as one system, with each link as a series branch
    /// carrying its own current unknown. Components then set their port
    /// and history quantities from the solution, and the solution and
    /// node voltage cells are filled in.
    pub fn steady_state(&self, topology: &Topology) -> Result<(), AssemblyError> {
        let store = topology.store();
        let links = self.resolve_links(topology)?;
        let nets = &self.partition.subnetworks;

        let mut groups = UnionFind::new(nets.len());
        for link in &links {
            groups.union(link.near.0, link.far.0);
        }
        let mut members: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for net in 0..nets.len() {
            members.entry(groups.find(net)).or_default().push(net);
        }

        for (root, group) in &members {
            let mut offsets = Vec::with_capacity(group.len());
            let mut dimension = 0;
            for &net in group {
                offsets.push((net, dimension));
                dimension += nets[net].dimension;
            }
            let offset_of = |net: usize| offsets.iter().find(|(n, _)| *n == net).map(|(_, o)| *o);
            let group_links: Vec<_> = links.iter().filter(|l| groups.find(l.near.0) == *root).collect();
            let first_link = dimension;
            dimension += group_links.len();

            let mut matrix = DMatrix::<f64>::zeros(dimension, dimension);
            let mut rhs = DVector::<f64>::zeros(dimension);
            for &(net, offset) in &offsets {
                let (local, local_rhs) = self.stamp_dc(topology, net)?;
                let d = nets[net].dimension;
                matrix.view_mut((offset, offset), (d, d)).copy_from(&local);
                rhs.rows_mut(offset, d).copy_from(&local_rhs);
            }
            for (j, link) in group_links.iter().enumerate() {
                let k = first_link + j;
                let a = link.near.1.zip(offset_of(link.near.0)).map(|(i, o)| i + o);
                let b = link.far.1.zip(offset_of(link.far.0)).map(|(i, o)| i + o);
                for (node, sign) in [(a, 1.0), (b, -1.0)] {
                    if let Some(node) = node {
                        matrix[(node, k)] += sign;
                        matrix[(k, node)] += sign;
                    }
                }
                matrix[(k, k)] -= link.resistance;
            }

            let label = format!("{}:dc", SystemBinding::owner(*root));
            let lu = factorize(&label, matrix)?;
            let x = solve_with(&label, &lu, &rhs)?;

            for (j, link) in group_links.iter().enumerate() {
                let current = x[first_link + j];
                store.set(link.near_current, current)?;
                store.set(link.far_current, -current)?;
            }
            for &(net, offset) in &offsets {
                let local = x.rows(offset, nets[net].dimension).into_owned();
                self.apply_dc(topology, net, local)?;
            }
        }
        tracing::info!(
            subnetworks = self.bindings.len(),
            systems = members.len(),
            links = links.len(),
            "steady-state initialisation solved"
        );
        Ok(())
    }

    fn stamp_dc(
        &self,
        topology: &Topology,
        net: usize,
    ) -> Result<(DMatrix<f64>, DVector<f64>), AssemblyError> {
        let store = topology.store();
        let dimension = self.partition.subnetworks[net].dimension;
        let mut matrix = SystemMatrix::zeros(dimension);
        let mut rhs = DVector::zeros(dimension);
        for name in &self.partition.subnetworks[net].components {
            let Some(component) = topology.component(name) else {
                continue;
            };
            component.stamp_steady_state(&mut matrix, &mut rhs, store)?;
            for stamp in component.variable_stamps() {
                matrix.apply(stamp.select(store.get(stamp.state)?));
            }
        }
        Ok((matrix.into_values(), rhs))
    }

    fn apply_dc(&self, topology: &Topology, net: usize, x: DVector<f64>) -> Result<(), AssemblyError> {
        let store = topology.store();
        let subnetwork = &self.partition.subnetworks[net];
        for (node, index) in &subnetwork.nodes {
            if let Some(cell) = topology.node_voltage(node) {
                store.set(cell, x[*index])?;
            }
        }
        for name in &subnetwork.components {
            if let Some(component) = topology.component(name) {
                component.apply_steady_state(&x, store)?;
            }
        }
        store.set(self.bindings[net].solution, x)?;
        Ok(())
    }

    /// Pair up steady-state links; each pair is kept once.
    fn resolve_links(&self, topology: &Topology) -> Result<Vec<DcLink>, AssemblyError> {
        let end = |name: &str| {
            self.partition
                .layouts
                .get(name)
                .and_then(|l| l.subnetwork.map(|net| (net, l.terminal(0))))
        };
        let mut links = Vec::new();
        for (component, _) in topology.components() {
            let Some(link) = component.steady_state_link() else {
                continue;
            };
            let missing = || ComponentError::MissingCounterpart {
                component: component.name().to_string(),
                counterpart: link.counterpart.clone(),
            };
            let back = topology
                .component(&link.counterpart)
                .and_then(|c| c.steady_state_link())
                .filter(|b| b.counterpart == component.name())
                .ok_or_else(missing)?;
            if component.name() > link.counterpart.as_str() {
                continue;
            }
            let (Some(near), Some(far)) = (end(component.name()), end(&link.counterpart)) else {
                return Err(missing().into());
            };
            links.push(DcLink {
                near,
                far,
                resistance: link.resistance,
                near_current: link.current,
                far_current: back.current,
            });
        }
        Ok(links)
    }
}

/// A steady-state link resolved to `(subnetwork, local index)` ends.
struct DcLink {
    near: (usize, Option<usize>),
    far: (usize, Option<usize>),
    resistance: f64,
    near_current: Attr<f64>,
    far_current: Attr<f64>,
}

/// Build solvers and the schedule for `topology`.
///
/// Calling it again on an unchanged topology rebuilds the same
/// structure; the subnetwork cells are recreated.
pub fn assemble(topology: &mut Topology, env: &SystemEnv) -> Result<Assembly, AssemblyError> {
    topology.validate()?;
    let partition = partition(topology)?;

    for (component, _) in topology.components() {
        if let Some(max) = component.max_dt() {
            if env.dt > max {
                return Err(AssemblyError::TimeStepTooLarge {
                    component: component.name().to_string(),
                    dt: env.dt,
                    max,
                });
            }
        }
    }

    let bindings = create_bindings(topology.store_mut(), &partition)?;

    for (component, _) in topology.components_mut() {
        if let Some(layout) = partition.layouts.get(component.name()) {
            component.attach(layout.clone(), env)?;
        }
    }

    let store = topology.store();
    let mut solvers = Vec::with_capacity(bindings.len());
    for (net, binding) in partition.subnetworks.iter().zip(&bindings) {
        let mut base = SystemMatrix::zeros(net.dimension);
        let mut switches = Vec::new();
        for name in &net.components {
            if let Some(component) = topology.component(name) {
                component.stamp_matrix(&mut base);
                switches.extend(component.variable_stamps());
            }
        }
        let nodes = net
            .nodes
            .iter()
            .filter_map(|(node, index)| topology.node_voltage(node).map(|cell| (*index, cell)))
            .collect();
        let solver = Arc::new(MnaSolver::new(binding.clone(), base, switches, nodes));
        let states = solver.states(store)?;
        solver.factorization(&states)?;
        solvers.push(solver);
    }

    let mut tasks: Vec<SharedTask> = Vec::new();
    for (component, _) in topology.components() {
        let binding = partition
            .layouts
            .get(component.name())
            .and_then(|l| l.subnetwork)
            .map(|s| &bindings[s]);
        tasks.extend(component.tasks(binding)?);
    }
    tasks.extend(solvers.iter().map(MnaSolver::task));

    let schedule = build_schedule(tasks, store)?;
    tracing::info!(
        tasks = schedule.len(),
        layers = schedule.layers().len(),
        subnetworks = solvers.len(),
        "schedule built"
    );

    Ok(Assembly {
        partition,
        bindings,
        solvers,
        schedule,
    })
}

fn create_bindings(
    store: &mut AttributeStore,
    partition: &Partition,
) -> Result<Vec<SystemBinding>, AssemblyError> {
    // A rebuild may leave fewer subnetworks than before.
    store.release_matching(SystemBinding::is_owner);
    partition
        .subnetworks
        .iter()
        .map(|net| {
            let owner = SystemBinding::owner(net.index);
            Ok(SystemBinding {
                index: net.index,
                rhs: store.create_additive(&owner, "rhs", DVector::zeros(net.dimension))?,
                solution: store.create(&owner, "x", DVector::zeros(net.dimension))?,
                dimension: net.dimension,
            })
        })
        .collect()
}
