//! Step-synchronised exchange of scalar cells with another process or
//! simulation.
//!
//! Each side of a [`ChannelPair`] owns one outbound and one inbound
//! bounded channel. Per step an [`Interface`] sends one [`Frame`] with
//! every exported value and consumes one frame with every imported value,
//! both in declaration order.
//!
//! Frames are tagged with the step that should consume them. The frame
//! sent after step `k` is tagged `k + 1`; initialisation sends a frame
//! tagged `0`. Two simulations can therefore block on each other without
//! deadlocking, at the cost of one step of transport delay.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use kirch_core::{AttrId, AttrValue, AttributeStore, StepId, ValueKind};
use tracing::{debug, trace, warn};

use crate::error::InterfaceError;

/// Default capacity of each direction of a [`ChannelPair`].
pub const DEFAULT_CAPACITY: usize = 64;

/// Values exchanged for one step.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Step that consumes these values.
    pub step: StepId,
    /// One value per declared attribute, in declaration order.
    pub values: Vec<AttrValue>,
}

// ── Endpoints ──────────────────────────────────────────────────────

/// One named side of a channel pair.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    outbound: Sender<Frame>,
    inbound: Receiver<Frame>,
}

impl Endpoint {
    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a frame, blocking while the channel is full.
    pub fn send(&self, frame: Frame) -> Result<(), InterfaceError> {
        self.outbound.send(frame).map_err(|_| self.disconnected())
    }

    /// Send a frame if there is room. Returns whether it was queued.
    pub fn try_send(&self, frame: Frame) -> Result<bool, InterfaceError> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(self.disconnected()),
        }
    }

    /// Receive the next frame, waiting at most `timeout` (forever if `None`).
    ///
    /// `Ok(None)` means the wait timed out.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<Frame>, InterfaceError> {
        match timeout {
            None => self.inbound.recv().map(Some).map_err(|_| self.disconnected()),
            Some(t) => match self.inbound.recv_timeout(t) {
                Ok(frame) => Ok(Some(frame)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
            },
        }
    }

    fn disconnected(&self) -> InterfaceError {
        InterfaceError::Disconnected {
            endpoint: self.name.clone(),
        }
    }
}

/// Two endpoints wired to each other.
#[derive(Debug)]
pub struct ChannelPair {
    /// First side.
    pub a: Endpoint,
    /// Second side.
    pub b: Endpoint,
}

impl ChannelPair {
    /// Pair with [`DEFAULT_CAPACITY`] frames per direction.
    pub fn new(a: &str, b: &str) -> Self {
        Self::with_capacity(a, b, DEFAULT_CAPACITY)
    }

    /// Pair with `capacity` frames per direction (at least one).
    pub fn with_capacity(a: &str, b: &str, capacity: usize) -> Self {
        let (a_tx, b_rx) = crossbeam_channel::bounded(capacity.max(1));
        let (b_tx, a_rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            a: Endpoint {
                name: a.to_string(),
                outbound: a_tx,
                inbound: a_rx,
            },
            b: Endpoint {
                name: b.to_string(),
                outbound: b_tx,
                inbound: b_rx,
            },
        }
    }

    /// Split into `(a, b)`.
    pub fn into_endpoints(self) -> (Endpoint, Endpoint) {
        (self.a, self.b)
    }
}

// ── Policy ─────────────────────────────────────────────────────────

/// What to do when the frame for the current step is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Wait for the frame. A lapsed timeout stops the run.
    Block {
        /// Longest wait; `None` waits forever.
        timeout: Option<Duration>,
    },
    /// Wait up to `timeout`, then keep the previous values and continue.
    HoldLast {
        /// Longest wait per step.
        timeout: Duration,
    },
}

/// When an exported value is sampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportTiming {
    /// Before the step's tasks run.
    BeforeStep,
    /// After the step's tasks run.
    #[default]
    AfterStep,
}

/// Outcome of [`Interface::receive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// No imports are declared.
    Nothing,
    /// A frame for this step was applied.
    Fresh,
    /// The previous values were kept.
    Held,
}

// ── Interface ──────────────────────────────────────────────────────

/// A declared set of exports and imports over one endpoint.
#[derive(Debug)]
pub struct Interface {
    endpoint: Endpoint,
    policy: SyncPolicy,
    exports: Vec<(AttrId, ExportTiming)>,
    imports: Vec<AttrId>,
    sampled: Vec<Option<AttrValue>>,
    pending: BTreeMap<StepId, Frame>,
    peer_gone: bool,
    stale: u64,
}

impl Interface {
    /// Interface over `endpoint` with no declared attributes.
    pub fn new(endpoint: Endpoint, policy: SyncPolicy) -> Self {
        Self {
            endpoint,
            policy,
            exports: Vec::new(),
            imports: Vec::new(),
            sampled: Vec::new(),
            pending: BTreeMap::new(),
            peer_gone: false,
            stale: 0,
        }
    }

    /// Declare an exported cell.
    pub fn export(mut self, attr: impl Into<AttrId>, timing: ExportTiming) -> Self {
        self.exports.push((attr.into(), timing));
        self.sampled.push(None);
        self
    }

    /// Declare an imported cell.
    pub fn import(mut self, attr: impl Into<AttrId>) -> Self {
        self.imports.push(attr.into());
        self
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    /// Sync policy.
    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Imported cells, in frame order.
    pub fn imports(&self) -> &[AttrId] {
        &self.imports
    }

    /// Steps on which previous import values were kept.
    pub fn stale_steps(&self) -> u64 {
        self.stale
    }

    /// Check that every declared cell exists and is a scalar.
    pub fn check(&self, store: &AttributeStore) -> Result<(), InterfaceError> {
        let declared = self.exports.iter().map(|(id, _)| *id).chain(self.imports.iter().copied());
        for id in declared {
            let kind = store.kind(id)?;
            if !matches!(kind, ValueKind::Real | ValueKind::Complex | ValueKind::Bool) {
                return Err(InterfaceError::UnsupportedKind {
                    name: store.name(id)?.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Send the frame consumed by the peer's step 0.
    pub fn open(&mut self, store: &AttributeStore) -> Result<(), InterfaceError> {
        for slot in &mut self.sampled {
            *slot = None;
        }
        self.publish(store, StepId(0))
    }

    /// Sample exports marked [`ExportTiming::BeforeStep`].
    pub fn capture_before(&mut self, store: &AttributeStore) -> Result<(), InterfaceError> {
        for ((id, timing), slot) in self.exports.iter().zip(&mut self.sampled) {
            if *timing == ExportTiming::BeforeStep {
                *slot = Some(store.get_value(*id)?);
            }
        }
        Ok(())
    }

    /// Send the frame for the peer's step after `executed`.
    pub fn send(&mut self, store: &AttributeStore, executed: StepId) -> Result<(), InterfaceError> {
        self.publish(store, executed.next())
    }

    fn publish(&mut self, store: &AttributeStore, step: StepId) -> Result<(), InterfaceError> {
        if self.exports.is_empty() || self.peer_gone {
            return Ok(());
        }
        let mut values = Vec::with_capacity(self.exports.len());
        for ((id, _), slot) in self.exports.iter().zip(&mut self.sampled) {
            let value = match slot.take() {
                Some(v) => v,
                None => store.get_value(*id)?,
            };
            values.push(value);
        }
        let frame = Frame { step, values };
        let result = match self.policy {
            SyncPolicy::Block { .. } => self.endpoint.send(frame).map(|()| true),
            SyncPolicy::HoldLast { .. } => self.endpoint.try_send(frame),
        };
        match result {
            Ok(true) => {
                trace!(endpoint = self.name(), step = step.0, "frame sent");
                Ok(())
            }
            Ok(false) => {
                warn!(endpoint = self.name(), step = step.0, "outbound channel full, frame dropped");
                Ok(())
            }
            Err(e) => self.peer_lost(e),
        }
    }

    /// Apply the frame tagged `step` to the imported cells.
    ///
    /// Older frames are discarded and newer ones kept for their step.
    pub fn receive(&mut self, store: &AttributeStore, step: StepId) -> Result<Received, InterfaceError> {
        if self.imports.is_empty() {
            return Ok(Received::Nothing);
        }
        self.pending = self.pending.split_off(&step);
        if let Some(frame) = self.pending.remove(&step) {
            self.apply(store, frame)?;
            return Ok(Received::Fresh);
        }
        if self.peer_gone {
            return self.hold(step);
        }

        let timeout = match self.policy {
            SyncPolicy::Block { timeout } => timeout,
            SyncPolicy::HoldLast { timeout } => Some(timeout),
        };
        let began = Instant::now();
        let give_up = timeout.map(|t| began + t);
        loop {
            let remaining = give_up.map(|at| at.saturating_duration_since(Instant::now()));
            let frame = match self.endpoint.recv(remaining) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.peer_lost(e)?;
                    return self.hold(step);
                }
            };
            if frame.step < step {
                debug!(endpoint = self.name(), frame = frame.step.0, step = step.0, "discarding old frame");
            } else if frame.step > step {
                self.pending.insert(frame.step, frame);
            } else {
                self.apply(store, frame)?;
                return Ok(Received::Fresh);
            }
        }

        match self.policy {
            SyncPolicy::Block { .. } => Err(InterfaceError::Timeout {
                endpoint: self.name().to_string(),
                step,
                waited: began.elapsed(),
            }),
            SyncPolicy::HoldLast { .. } => self.hold(step),
        }
    }

    fn apply(&self, store: &AttributeStore, frame: Frame) -> Result<(), InterfaceError> {
        if frame.values.len() != self.imports.len() {
            return Err(InterfaceError::FrameShape {
                endpoint: self.name().to_string(),
                step: frame.step,
                expected: self.imports.len(),
                got: frame.values.len(),
            });
        }
        for (id, value) in self.imports.iter().zip(frame.values) {
            store.set_value(*id, value)?;
        }
        Ok(())
    }

    fn hold(&mut self, step: StepId) -> Result<Received, InterfaceError> {
        self.stale += 1;
        warn!(endpoint = self.name(), step = step.0, "no frame in time, holding last values");
        Ok(Received::Held)
    }

    /// Under `HoldLast` a vanished peer only freezes the imports.
    fn peer_lost(&mut self, e: InterfaceError) -> Result<(), InterfaceError> {
        match self.policy {
            SyncPolicy::Block { .. } => Err(e),
            SyncPolicy::HoldLast { .. } => {
                if !self.peer_gone {
                    warn!(endpoint = self.name(), "peer disconnected");
                }
                self.peer_gone = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kirch_core::Complex64;

    fn store() -> (AttributeStore, kirch_core::Attr<f64>) {
        let mut store = AttributeStore::new();
        let x = store.create("bus", "x", 0.0).unwrap();
        (store, x)
    }

    fn real(step: u64, v: f64) -> Frame {
        Frame {
            step: StepId(step),
            values: vec![AttrValue::Real(v)],
        }
    }

    #[test]
    fn hold_last_keeps_previous_value() {
        let (store, x) = store();
        let (peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        let mut iface = Interface::new(
            ours,
            SyncPolicy::HoldLast {
                timeout: Duration::from_millis(10),
            },
        )
        .import(x);

        peer.send(real(0, 3.5)).unwrap();
        assert_eq!(iface.receive(&store, StepId(0)).unwrap(), Received::Fresh);
        assert_eq!(store.get(x).unwrap(), 3.5);

        assert_eq!(iface.receive(&store, StepId(1)).unwrap(), Received::Held);
        assert_eq!(store.get(x).unwrap(), 3.5);
        assert_eq!(iface.stale_steps(), 1);
    }

    #[test]
    fn old_frames_dropped_and_future_frames_kept() {
        let (store, x) = store();
        let (peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        let mut iface = Interface::new(ours, SyncPolicy::Block { timeout: None }).import(x);

        peer.send(real(0, 1.0)).unwrap();
        peer.send(real(3, 3.0)).unwrap();
        peer.send(real(2, 2.0)).unwrap();
        assert_eq!(iface.receive(&store, StepId(2)).unwrap(), Received::Fresh);
        assert_eq!(store.get(x).unwrap(), 2.0);
        assert_eq!(iface.receive(&store, StepId(3)).unwrap(), Received::Fresh);
        assert_eq!(store.get(x).unwrap(), 3.0);
    }

    #[test]
    fn block_timeout_is_an_error() {
        let (store, x) = store();
        let (_peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        let mut iface = Interface::new(
            ours,
            SyncPolicy::Block {
                timeout: Some(Duration::from_millis(5)),
            },
        )
        .import(x);
        let err = iface.receive(&store, StepId(0)).unwrap_err();
        assert!(matches!(err, InterfaceError::Timeout { step: StepId(0), .. }));
    }

    #[test]
    fn disconnect_is_fatal_only_when_blocking() {
        let (store, x) = store();
        let (peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        drop(peer);
        let mut blocking = Interface::new(ours, SyncPolicy::Block { timeout: None }).import(x);
        assert!(matches!(
            blocking.receive(&store, StepId(0)),
            Err(InterfaceError::Disconnected { .. })
        ));

        let (peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        drop(peer);
        let mut holding = Interface::new(
            ours,
            SyncPolicy::HoldLast {
                timeout: Duration::from_secs(5),
            },
        )
        .import(x);
        assert_eq!(holding.receive(&store, StepId(0)).unwrap(), Received::Held);
    }

    #[test]
    fn frame_shape_checked() {
        let (store, x) = store();
        let (peer, ours) = ChannelPair::new("peer", "sim").into_endpoints();
        let mut iface = Interface::new(ours, SyncPolicy::Block { timeout: None }).import(x);
        peer.send(Frame {
            step: StepId(0),
            values: vec![],
        })
        .unwrap();
        assert!(matches!(
            iface.receive(&store, StepId(0)),
            Err(InterfaceError::FrameShape { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn exports_tagged_for_the_next_step_in_declaration_order() {
        let mut store = AttributeStore::new();
        let v = store.create("src", "v", Complex64::new(1.0, 2.0)).unwrap();
        let on = store.create("sw", "closed", false).unwrap();
        let (ours, peer) = ChannelPair::new("sim", "peer").into_endpoints();
        let mut iface = Interface::new(ours, SyncPolicy::Block { timeout: None })
            .export(on, ExportTiming::BeforeStep)
            .export(v, ExportTiming::AfterStep);
        iface.check(&store).unwrap();

        iface.open(&store).unwrap();
        iface.capture_before(&store).unwrap();
        store.set(on, true).unwrap();
        store.set(v, Complex64::new(3.0, 0.0)).unwrap();
        iface.send(&store, StepId(0)).unwrap();

        let first = peer.recv(None).unwrap().unwrap();
        assert_eq!(first.step, StepId(0));
        let second = peer.recv(None).unwrap().unwrap();
        assert_eq!(second.step, StepId(1));
        assert_eq!(
            second.values,
            vec![AttrValue::Bool(false), AttrValue::Complex(Complex64::new(3.0, 0.0))]
        );
    }

    #[test]
    fn matrix_cells_cannot_be_exchanged() {
        let mut store = AttributeStore::new();
        let m = store
            .create("net0", "x", kirch_core::DVector::<f64>::zeros(2))
            .unwrap();
        let (ours, _peer) = ChannelPair::new("sim", "peer").into_endpoints();
        let iface = Interface::new(ours, SyncPolicy::Block { timeout: None }).import(m);
        assert!(matches!(
            iface.check(&store),
            Err(InterfaceError::UnsupportedKind {
                kind: ValueKind::Vector,
                ..
            })
        ));
    }
}
