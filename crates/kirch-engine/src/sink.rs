//! Write-only consumers of per-step values.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use kirch_core::{AttrValue, StepId};
use tracing::warn;

/// Labelled values recorded at the end of one step.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Step that produced the values.
    pub step: StepId,
    /// Simulation time at the start of that step.
    pub time: f64,
    /// `(label, value)` in registration order.
    pub values: Vec<(String, AttrValue)>,
}

impl Sample {
    /// Value recorded under `label`.
    pub fn get(&self, label: &str) -> Option<&AttrValue> {
        self.values.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    /// Real part of the value under `label`.
    pub fn real(&self, label: &str) -> Option<f64> {
        self.get(label).and_then(AttrValue::as_real)
    }
}

/// Receives one [`Sample`] per step. Never read back by the kernel.
pub trait DataSink: Send {
    /// Record one step.
    fn record(&mut self, sample: &Sample);

    /// Called once when the run stops.
    fn finish(&mut self) {}
}

/// Keeps every sample in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<Sample>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded sample.
    pub fn rows(&self) -> Vec<Sample> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Real values recorded under `label`, one per step.
    pub fn series(&self, label: &str) -> Vec<f64> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|s| s.real(label))
            .collect()
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataSink for MemorySink {
    fn record(&mut self, sample: &Sample) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample.clone());
    }
}

/// Forwards samples over a bounded channel. Samples that do not fit are
/// dropped and counted.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Sample>,
    dropped: u64,
    closed: bool,
}

impl ChannelSink {
    /// Sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, Receiver<Sample>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: 0,
                closed: false,
            },
            rx,
        )
    }

    /// Samples dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DataSink for ChannelSink {
    fn record(&mut self, sample: &Sample) {
        if self.closed {
            return;
        }
        match self.tx.try_send(sample.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped == 1 {
                    warn!(step = sample.step.0, "sink channel full, dropping samples");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(step = sample.step.0, "sink receiver gone");
                self.closed = true;
            }
        }
    }
}
