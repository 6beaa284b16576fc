//! Per-step and per-run counters.
//!
//! All durations are in microseconds, like the timings a driver would
//! chart next to the simulated quantities.

/// Timings of the most recent step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepMetrics {
    /// Index of the step.
    pub step: u64,
    /// Wall time of the whole step, excluding the pacer's wait.
    pub total_us: u64,
    /// Wall time of the schedule.
    pub execute_us: u64,
    /// Wall time spent exchanging interface frames.
    pub sync_us: u64,
    /// Per-task wall times: `(label, microseconds)`.
    pub task_us: Vec<(String, u64)>,
}

/// Counters accumulated over a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunMetrics {
    /// Steps executed.
    pub steps: u64,
    /// Steps that finished after their real-time slot.
    pub timing_violations: u64,
    /// Import steps that kept the previous values.
    pub stale_imports: u64,
    /// LU factorisations computed after the first one per switch state.
    pub refactorizations: u64,
    /// Slowest step, in microseconds.
    pub worst_step_us: u64,
    /// Scheduled events applied.
    pub events_fired: u64,
}

impl RunMetrics {
    pub(crate) fn record_step(&mut self, step: &StepMetrics) {
        self.steps += 1;
        self.worst_step_us = self.worst_step_us.max(step.total_us);
    }
}
