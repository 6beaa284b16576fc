//! Cell overwrites scheduled at a simulation time.

use kirch_core::{AttrId, AttrValue};

/// One pending overwrite.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledEvent {
    /// Earliest step start time at which it fires, in seconds.
    pub time: f64,
    /// Cell to overwrite.
    pub target: AttrId,
    /// New value.
    pub value: AttrValue,
}

/// Events ordered by time; equal times keep insertion order.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: Vec<ScheduledEvent>,
}

impl EventQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event.
    pub fn push(&mut self, event: ScheduledEvent) {
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
    }

    /// Remove and return every event due at a step starting at `time`.
    ///
    /// `dt` sets the tolerance for step times that accumulate rounding.
    pub fn due(&mut self, time: f64, dt: f64) -> Vec<ScheduledEvent> {
        let limit = time + 1e-9 * dt;
        let n = self.events.partition_point(|e| e.time <= limit);
        self.events.drain(..n).collect()
    }

    /// Events not yet fired.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
