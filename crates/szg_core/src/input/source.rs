//! # Input Sources and Sinks
//!
//! Sources feed an `InputNode`; sinks receive what it produces.
//!
//! ## Design
//!
//! - A source gets a `SourceHandle` on `start` and pushes queues through it
//!   from whatever thread it owns
//! - Indices a source sends are local to that source; the node shifts them
//!   into the shared index space
//! - `start` on something already running is a no-op returning true

use std::sync::Arc;

use parking_lot::Mutex;

use crate::input::event::InputEvent;
use crate::input::node::SourceHandle;
use crate::input::queue::{EventQueue, Signature};
use crate::math::Matrix4;

/// Something that produces input events.
pub trait InputSource: Send {
    /// Short name for logs.
    fn name(&self) -> &str {
        "source"
    }

    /// Channel counts this source sends.
    fn signature(&self) -> Signature;

    /// One-time setup before `start`.
    fn init(&mut self) -> bool {
        true
    }

    /// Begins delivering events through `handle`. A no-op when already running.
    fn start(&mut self, handle: SourceHandle) -> bool;

    /// Stops delivering events.
    fn stop(&mut self) -> bool;

    /// Returns true between a successful `start` and `stop`.
    fn is_running(&self) -> bool;
}

/// Something that consumes filtered input.
pub trait InputSink: Send {
    /// Short name for logs.
    fn name(&self) -> &str {
        "sink"
    }

    /// One-time setup before `start`.
    fn init(&mut self) -> bool {
        true
    }

    /// Begins accepting data. A no-op when already running.
    fn start(&mut self) -> bool {
        true
    }

    /// Stops accepting data.
    fn stop(&mut self) -> bool {
        true
    }

    /// Whether `InputNode::start` should start this sink.
    fn auto_activate(&self) -> bool {
        true
    }

    /// Receives one filtered queue. Its signature is the node's whole signature.
    fn receive_data(&mut self, channel: usize, queue: &EventQueue) -> bool;

    /// A source changed its signature; `signature` is the node's new total.
    fn source_reconfig(&mut self, _channel: usize, _signature: Signature) -> bool {
        true
    }
}

#[derive(Default)]
struct GeneratorInner {
    signature: Signature,
    handle: Option<SourceHandle>,
    pending: EventQueue,
}

/// Programmatic source: the application calls `send_*` or `queue_*`.
///
/// Clones share one source, so a clone can be kept after the node takes
/// ownership of another.
#[derive(Clone, Default)]
pub struct GeneratorSource {
    inner: Arc<Mutex<GeneratorInner>>,
}

impl GeneratorSource {
    /// Creates a source with the given channel counts.
    #[must_use]
    pub fn new(signature: Signature) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GeneratorInner {
                signature,
                ..GeneratorInner::default()
            })),
        }
    }

    fn in_range(&self, event: &InputEvent) -> bool {
        event.index() < self.inner.lock().signature.count(event.kind())
    }

    /// Sends one event immediately. Out-of-range indices are ignored.
    pub fn send_event(&self, event: InputEvent) -> bool {
        if !self.in_range(&event) {
            tracing::debug!(target: "szg::input", "ignoring out-of-range {}", event);
            return false;
        }
        let mut queue = EventQueue::new();
        queue.append_event(event);
        self.deliver(queue)
    }

    /// Sends one button value.
    pub fn send_button(&self, index: u32, value: i32) -> bool {
        self.send_event(InputEvent::button(index, value))
    }

    /// Sends one axis value.
    pub fn send_axis(&self, index: u32, value: f32) -> bool {
        self.send_event(InputEvent::axis(index, value))
    }

    /// Sends one matrix value.
    pub fn send_matrix(&self, index: u32, value: Matrix4) -> bool {
        self.send_event(InputEvent::matrix(index, value))
    }

    /// Queues an event for the next `send_queue`. Out-of-range indices are ignored.
    pub fn queue_event(&self, event: InputEvent) -> bool {
        if !self.in_range(&event) {
            return false;
        }
        self.inner.lock().pending.append_event(event);
        true
    }

    /// Queues a button value.
    pub fn queue_button(&self, index: u32, value: i32) -> bool {
        self.queue_event(InputEvent::button(index, value))
    }

    /// Queues an axis value.
    pub fn queue_axis(&self, index: u32, value: f32) -> bool {
        self.queue_event(InputEvent::axis(index, value))
    }

    /// Queues a matrix value.
    pub fn queue_matrix(&self, index: u32, value: Matrix4) -> bool {
        self.queue_event(InputEvent::matrix(index, value))
    }

    /// Sends everything queued as one batch.
    pub fn send_queue(&self) -> bool {
        let queue = std::mem::take(&mut self.inner.lock().pending);
        if queue.is_empty() {
            return true;
        }
        self.deliver(queue)
    }

    /// Changes the channel counts and tells the node.
    pub fn set_signature(&self, signature: Signature) -> bool {
        let handle = {
            let mut inner = self.inner.lock();
            inner.signature = signature;
            inner.handle.clone()
        };
        handle.map_or(true, |h| h.reconfigure(signature))
    }

    fn deliver(&self, queue: EventQueue) -> bool {
        // The node lock is taken inside; never hold ours across it.
        let handle = self.inner.lock().handle.clone();
        match handle {
            Some(h) => h.send_queue(queue),
            None => false,
        }
    }
}

impl InputSource for GeneratorSource {
    fn name(&self) -> &str {
        "generator"
    }

    fn signature(&self) -> Signature {
        self.inner.lock().signature
    }

    fn start(&mut self, handle: SourceHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.handle.is_none() {
            inner.handle = Some(handle);
        }
        true
    }

    fn stop(&mut self) -> bool {
        self.inner.lock().handle = None;
        true
    }

    fn is_running(&self) -> bool {
        self.inner.lock().handle.is_some()
    }
}

#[derive(Default)]
struct QueueSinkInner {
    queues: Vec<(usize, EventQueue)>,
    running: bool,
    starts: usize,
}

/// Sink that records every queue it receives.
///
/// Clones share storage.
#[derive(Clone, Default)]
pub struct QueueSink {
    inner: Arc<Mutex<QueueSinkInner>>,
}

impl QueueSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything received so far.
    #[must_use]
    pub fn take(&self) -> Vec<(usize, EventQueue)> {
        std::mem::take(&mut self.inner.lock().queues)
    }

    /// Number of queues received and not yet taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queues.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the sink is currently started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// How many times a stopped sink has been started.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.inner.lock().starts
    }
}

impl InputSink for QueueSink {
    fn name(&self) -> &str {
        "queue"
    }

    fn start(&mut self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.running {
            inner.running = true;
            inner.starts += 1;
        }
        true
    }

    fn stop(&mut self) -> bool {
        self.inner.lock().running = false;
        true
    }

    fn receive_data(&mut self, channel: usize, queue: &EventQueue) -> bool {
        let mut inner = self.inner.lock();
        if !inner.running {
            return false;
        }
        inner.queues.push((channel, queue.clone()));
        true
    }
}
