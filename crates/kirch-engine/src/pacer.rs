//! Wall-clock pacing for real-time runs.
//!
//! Step `k` may not start before `start + k·dt`. Deadlines come from
//! this fixed grid, never from when the previous step finished. A late
//! step starts its successor at once; if the overrun swallowed whole
//! slots, they are counted once and skipped, so later steps run on the
//! same grid shifted by whole slots.

use std::time::{Duration, Instant};

use kirch_core::StepId;
use tracing::warn;

/// A step that finished after its slot ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingViolation {
    /// The late step.
    pub step: StepId,
    /// How far past the slot end it finished.
    pub overrun: Duration,
    /// Whole grid slots skipped because of it.
    pub skipped_slots: u64,
}

/// Fixed-grid deadline keeper.
#[derive(Clone, Debug)]
pub struct Pacer {
    start: Instant,
    dt: Duration,
    skipped: u64,
    violations: u64,
}

impl Pacer {
    /// Pacer whose grid starts now.
    pub fn new(dt: Duration) -> Self {
        Self::starting_at(Instant::now(), dt)
    }

    /// Pacer whose grid starts at `start`.
    pub fn starting_at(start: Instant, dt: Duration) -> Self {
        Self {
            start,
            dt,
            skipped: 0,
            violations: 0,
        }
    }

    /// Origin of the grid.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Step length.
    pub fn dt(&self) -> Duration {
        self.dt
    }

    /// Earliest instant step `step` may begin.
    pub fn deadline(&self, step: StepId) -> Instant {
        self.slot(step.0.saturating_add(self.skipped))
    }

    fn slot(&self, index: u64) -> Instant {
        let nanos = self.dt.as_nanos().saturating_mul(u128::from(index));
        self.start + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Close `step`: block until the next step's deadline, or report the
    /// overrun if it has already passed.
    ///
    /// After an overrun the next step starts immediately and must end by
    /// the first grid slot still in the future.
    pub fn finish_step(&mut self, step: StepId) -> Option<TimingViolation> {
        let deadline = self.deadline(step.next());
        let now = Instant::now();
        if let Some(remaining) = deadline.checked_duration_since(now) {
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
                return None;
            }
        }

        let overrun = now.saturating_duration_since(deadline);
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let slots = elapsed.checked_div(self.dt.as_nanos()).unwrap_or(0);
        let next_free = u64::try_from(slots).unwrap_or(u64::MAX).saturating_add(1);
        let skipped = next_free.saturating_sub(step.0.saturating_add(2));
        let skipped_slots = skipped.saturating_sub(self.skipped);
        self.skipped = skipped;
        self.violations += 1;
        warn!(
            step = step.0,
            overrun_us = u64::try_from(overrun.as_micros()).unwrap_or(u64::MAX),
            skipped_slots,
            "timing violation"
        );
        Some(TimingViolation {
            step,
            overrun,
            skipped_slots,
        })
    }

    /// Grid slots skipped so far.
    pub fn skipped_slots(&self) -> u64 {
        self.skipped
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> u64 {
        self.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_lie_on_a_fixed_grid() {
        let start = Instant::now();
        let pacer = Pacer::starting_at(start, Duration::from_millis(20));
        assert_eq!(pacer.deadline(StepId(0)), start);
        assert_eq!(pacer.deadline(StepId(7)), start + Duration::from_millis(140));
    }

    #[test]
    fn on_time_step_sleeps_to_its_deadline() {
        let mut pacer = Pacer::new(Duration::from_millis(30));
        assert_eq!(pacer.finish_step(StepId(0)), None);
        assert!(Instant::now() >= pacer.deadline(StepId(1)));
        assert_eq!(pacer.violations(), 0);
    }

    #[test]
    fn single_overrun_is_reported_once_without_drift() {
        let dt = Duration::from_millis(50);
        let mut pacer = Pacer::new(dt);
        let start = pacer.start();

        assert_eq!(pacer.finish_step(StepId(0)), None);

        // Step 1 takes one and a half slots.
        std::thread::sleep(Duration::from_millis(75));
        let violation = pacer.finish_step(StepId(1)).expect("step 1 overran");
        assert_eq!(violation.step, StepId(1));
        assert!(violation.overrun >= Duration::from_millis(20));
        assert_eq!(violation.skipped_slots, 0);

        // The grid is unchanged: step 3 may start at start + 3·dt.
        assert_eq!(pacer.deadline(StepId(3)), start + dt * 3);
        assert_eq!(pacer.finish_step(StepId(2)), None);
        assert!(Instant::now() >= start + dt * 3);
        assert_eq!(pacer.violations(), 1);
    }

    #[test]
    fn long_overrun_skips_missed_slots_once() {
        let dt = Duration::from_millis(50);
        let mut pacer = Pacer::new(dt);
        let start = pacer.start();

        assert_eq!(pacer.finish_step(StepId(0)), None);

        // Step 1 ends around 210 ms, past the slots at 100, 150 and 200 ms.
        std::thread::sleep(Duration::from_millis(160));
        let violation = pacer.finish_step(StepId(1)).expect("step 1 overran");
        assert_eq!(violation.skipped_slots, 2);
        assert_eq!(pacer.skipped_slots(), 2);

        // Step 2 starts at once and may run until the 250 ms slot.
        assert_eq!(pacer.deadline(StepId(3)), start + dt * 5);
        assert_eq!(pacer.finish_step(StepId(2)), None);
        assert_eq!(pacer.finish_step(StepId(3)), None);
        assert!(Instant::now() >= start + dt * 6);
        assert_eq!(pacer.violations(), 1);
    }
}
