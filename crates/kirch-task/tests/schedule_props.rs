//! Property tests for schedule construction.

use kirch_core::{Attr, AttrSet, AttributeStore};
use kirch_task::{build_schedule, FnTask, Phase, ScheduleError, SharedTask};
use proptest::prelude::*;

/// `n` tasks, edges between ranks, and the list position of each rank.
fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<usize>)> {
    (1usize..12).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n, 0..n), 0..n * 2),
            Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
        )
    })
}

/// Task of rank `r` writes cell `r` and reads every cell `x` with an edge `x -> r`.
fn build_tasks(
    store: &mut AttributeStore,
    n: usize,
    edges: &[(usize, usize)],
    position: &[usize],
) -> Vec<SharedTask> {
    let cells: Vec<Attr<f64>> = (0..n)
        .map(|r| store.create("cell", &r.to_string(), 0.0).unwrap())
        .collect();
    let mut ranked: Vec<(usize, SharedTask)> = (0..n)
        .map(|r| {
            let reads: AttrSet = edges
                .iter()
                .filter(|(_, to)| *to == r)
                .map(|(from, _)| cells[*from].id())
                .collect();
            let task = FnTask::new(format!("t{r}"), Phase::Step)
                .reads(reads)
                .writes(AttrSet::empty().with(cells[r]))
                .shared();
            (position[r], task)
        })
        .collect();
    ranked.sort_by_key(|(pos, _)| *pos);
    ranked.into_iter().map(|(_, t)| t).collect()
}

fn forward(edges: &[(usize, usize)]) -> Vec<(usize, usize)> {
    edges.iter().copied().filter(|(a, b)| a < b).collect()
}

proptest! {
    #[test]
    fn layering_is_a_topological_order((n, edges, position) in arb_graph()) {
        let edges = forward(&edges);
        let mut store = AttributeStore::new();
        let tasks = build_tasks(&mut store, n, &edges, &position);
        let schedule = build_schedule(tasks, &store).unwrap();

        for &(a, b) in schedule.edges() {
            prop_assert!(schedule.layer_of(a).unwrap() < schedule.layer_of(b).unwrap());
        }
        for &(x, y) in &edges {
            prop_assert!(schedule.has_edge(position[x], position[y]));
        }
        let placed: usize = schedule.layers().iter().map(Vec::len).sum();
        prop_assert_eq!(placed, n);
    }

    #[test]
    fn rebuild_is_idempotent((n, edges, position) in arb_graph()) {
        let edges = forward(&edges);
        let mut store = AttributeStore::new();
        let tasks = build_tasks(&mut store, n, &edges, &position);
        let first = build_schedule(tasks.clone(), &store).unwrap();
        let second = build_schedule(tasks, &store).unwrap();
        prop_assert_eq!(first.layers(), second.layers());
        prop_assert_eq!(first.edges(), second.edges());
    }

    #[test]
    fn cycles_always_rejected(
        (n, edges, position) in arb_graph(),
        ring in 2usize..6,
    ) {
        let n = n.max(ring);
        let position: Vec<usize> = if position.len() == n {
            position
        } else {
            (0..n).collect()
        };
        let mut edges = forward(&edges);
        // Close a ring over the first `ring` ranks.
        for r in 0..ring {
            edges.push((r, (r + 1) % ring));
        }

        for _ in 0..2 {
            let mut store = AttributeStore::new();
            let tasks = build_tasks(&mut store, n, &edges, &position);
            match build_schedule(tasks, &store) {
                Err(ScheduleError::DependencyCycle { cycle }) => {
                    prop_assert!(cycle.len() >= 3);
                    prop_assert_eq!(cycle.first(), cycle.last());
                }
                other => prop_assert!(false, "expected DependencyCycle, got {:?}", other),
            }
        }
    }
}
