//! Progress reporting
//!
//! Sinks for start/stage/stop notifications emitted by the pipeline. None of
//! the provided implementations block the caller.

use crate::waveform::{ProgressEvent, ProgressOperation};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receives progress notifications for one extraction
pub trait ProgressReporter: Send + Sync {
    fn on_start(&self);
    fn on_stage(&self, operation: ProgressOperation, percent: u8);
    fn on_stop(&self);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_start(&self) {}
    fn on_stage(&self, _operation: ProgressOperation, _percent: u8) {}
    fn on_stop(&self) {}
}

/// Forwards notifications to a closure
pub struct CallbackReporter<F> {
    callback: F,
}

impl<F> CallbackReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for CallbackReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_start(&self) {
        (self.callback)(ProgressEvent::Start);
    }

    fn on_stage(&self, operation: ProgressOperation, percent: u8) {
        (self.callback)(ProgressEvent::Stage { operation, percent });
    }

    fn on_stop(&self) {
        (self.callback)(ProgressEvent::Stop);
    }
}

/// Queues notifications on an unbounded channel in arrival order
///
/// Sends never block; once the receiver is gone events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a reporter together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Progress receiver dropped, discarding {:?}", event);
        }
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_start(&self) {
        self.send(ProgressEvent::Start);
    }

    fn on_stage(&self, operation: ProgressOperation, percent: u8) {
        self.send(ProgressEvent::Stage { operation, percent });
    }

    fn on_stop(&self) {
        self.send(ProgressEvent::Stop);
    }
}

#[derive(Default)]
struct GateState {
    started: bool,
    stopped: bool,
    last: HashMap<ProgressOperation, u8>,
}

/// Enforces the event contract in front of a caller's reporter
///
/// Start is forwarded at most once and before any stage, stop at most once
/// and last, and percentages never decrease within an operation.
pub(crate) struct ProgressGate<'a> {
    inner: &'a dyn ProgressReporter,
    state: Mutex<GateState>,
}

impl<'a> ProgressGate<'a> {
    pub(crate) fn new(inner: &'a dyn ProgressReporter) -> Self {
        Self {
            inner,
            state: Mutex::new(GateState::default()),
        }
    }
}

impl ProgressReporter for ProgressGate<'_> {
    fn on_start(&self) {
        let mut state = self.state.lock();
        if state.started || state.stopped {
            return;
        }
        state.started = true;
        drop(state);
        self.inner.on_start();
    }

    fn on_stage(&self, operation: ProgressOperation, percent: u8) {
        let percent = percent.min(100);
        let mut state = self.state.lock();
        if !state.started || state.stopped {
            return;
        }
        if state.last.get(&operation).is_some_and(|last| *last >= percent) {
            return;
        }
        state.last.insert(operation, percent);
        drop(state);
        self.inner.on_stage(operation, percent);
    }

    fn on_stop(&self) {
        let mut state = self.state.lock();
        if !state.started || state.stopped {
            return;
        }
        state.stopped = true;
        drop(state);
        self.inner.on_stop();
    }
}
