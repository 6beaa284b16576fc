//! Layer-by-layer schedule execution on a fixed worker pool.
//!
//! Each layer is handed to a `rayon` pool as a parallel iterator; the
//! call returns only when every task of the layer has finished, which is
//! the barrier between layers. Single-task layers run on the calling
//! thread.

use std::time::{Duration, Instant};

use kirch_core::{AttributeStore, TaskError};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use crate::context::{StepClock, TaskContext};
use crate::previous::PreviousFrame;
use crate::schedule::Schedule;

/// A task body returned an error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("task '{task}' failed: {source}")]
pub struct TaskFailure {
    /// Label of the failing task.
    pub task: String,
    /// What went wrong.
    #[source]
    pub source: TaskError,
}

/// Errors creating an [`Executor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A worker count of zero was requested.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// The thread pool could not be built.
    #[error("building worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-step execution timings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionReport {
    /// Wall time of each task, indexed like the schedule.
    pub task_times: Vec<Duration>,
    /// Wall time of the whole schedule.
    pub total: Duration,
}

/// Runs a [`Schedule`] one layer at a time.
pub struct Executor {
    pool: Option<ThreadPool>,
    workers: usize,
}

impl Executor {
    /// Executor with `workers` threads; `1` runs everything on the caller.
    pub fn new(workers: usize) -> Result<Self, ExecutorError> {
        if workers == 0 {
            return Err(ExecutorError::ZeroWorkers);
        }
        if workers == 1 {
            return Ok(Self::sequential());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("kirch-worker-{i}"))
            .build()?;
        Ok(Self {
            pool: Some(pool),
            workers,
        })
    }

    /// Executor that runs every task on the calling thread.
    pub fn sequential() -> Self {
        Self {
            pool: None,
            workers: 1,
        }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute every layer of `schedule` for one step.
    ///
    /// A layer always runs to completion. If any of its tasks failed, the
    /// first failure in task-list order is returned and later layers are
    /// not started.
    pub fn run(
        &self,
        schedule: &Schedule,
        store: &AttributeStore,
        previous: &PreviousFrame,
        clock: StepClock,
    ) -> Result<ExecutionReport, TaskFailure> {
        let start = Instant::now();
        let mut task_times = vec![Duration::ZERO; schedule.len()];

        let run_one = |index: usize| -> (usize, Duration, Result<(), TaskError>) {
            let began = Instant::now();
            let result = match (schedule.task(index), schedule.access(index)) {
                (Some(task), Some(access)) => {
                    let ctx = TaskContext::new(store, previous, access, clock);
                    task.execute(&ctx)
                }
                _ => Err(TaskError::ExecutionFailed {
                    reason: format!("task index {index} out of range"),
                }),
            };
            (index, began.elapsed(), result)
        };

        for layer in schedule.layers() {
            let results: Vec<(usize, Duration, Result<(), TaskError>)> = match &self.pool {
                Some(pool) if layer.len() > 1 => {
                    pool.install(|| layer.par_iter().map(|&i| run_one(i)).collect())
                }
                _ => layer.iter().map(|&i| run_one(i)).collect(),
            };

            let mut failure = None;
            for (index, elapsed, result) in results {
                task_times[index] = elapsed;
                if let Err(source) = result {
                    if failure.is_none() {
                        failure = Some(TaskFailure {
                            task: schedule.label(index).to_string(),
                            source,
                        });
                    }
                }
            }
            if let Some(failure) = failure {
                return Err(failure);
            }
        }

        Ok(ExecutionReport {
            task_times,
            total: start.elapsed(),
        })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::build_schedule;
    use crate::task::{FnTask, Phase, SharedTask};
    use kirch_core::AttrSet;

    fn pipeline(store: &mut AttributeStore) -> (Vec<SharedTask>, kirch_core::Attr<f64>) {
        let a = store.create("a", "out", 0.0).unwrap();
        let b = store.create("b", "out", 0.0).unwrap();
        let sum = store.create("sum", "out", 0.0).unwrap();
        let tasks = vec![
            FnTask::new("a", Phase::Step)
                .writes(AttrSet::empty().with(a))
                .body(move |ctx| ctx.write(a, 2.0))
                .shared(),
            FnTask::new("b", Phase::Step)
                .writes(AttrSet::empty().with(b))
                .body(move |ctx| ctx.write(b, 3.0))
                .shared(),
            FnTask::new("sum", Phase::Step)
                .reads(AttrSet::empty().with(a).with(b))
                .writes(AttrSet::empty().with(sum))
                .body(move |ctx| ctx.write(sum, ctx.read(a)? + ctx.read(b)?))
                .shared(),
        ];
        (tasks, sum)
    }

    #[test]
    fn parallel_and_sequential_agree() {
        for workers in [1, 4] {
            let mut store = AttributeStore::new();
            let (tasks, sum) = pipeline(&mut store);
            let schedule = build_schedule(tasks, &store).unwrap();
            let exec = Executor::new(workers).unwrap();
            let report = exec
                .run(&schedule, &store, &PreviousFrame::default(), StepClock::start(1e-3))
                .unwrap();
            assert_eq!(store.get(sum).unwrap(), 5.0);
            assert_eq!(report.task_times.len(), 3);
        }
    }

    #[test]
    fn failure_stops_later_layers() {
        let mut store = AttributeStore::new();
        let a = store.create("a", "out", 0.0).unwrap();
        let b = store.create("b", "out", 0.0).unwrap();
        let tasks = vec![
            FnTask::new("a", Phase::Step)
                .writes(AttrSet::empty().with(a))
                .body(|_| {
                    Err(TaskError::ExecutionFailed {
                        reason: "boom".into(),
                    })
                })
                .shared(),
            FnTask::new("b", Phase::Step)
                .reads(AttrSet::empty().with(a))
                .writes(AttrSet::empty().with(b))
                .body(move |ctx| ctx.write(b, 1.0))
                .shared(),
        ];
        let schedule = build_schedule(tasks, &store).unwrap();
        let err = Executor::sequential()
            .run(&schedule, &store, &PreviousFrame::default(), StepClock::start(1e-3))
            .unwrap_err();
        assert_eq!(err.task, "a::step");
        assert_eq!(store.get(b).unwrap(), 0.0);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(Executor::new(0), Err(ExecutorError::ZeroWorkers)));
    }
}
