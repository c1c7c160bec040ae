//! # Input Node
//!
//! Joins sources, a filter chain and sinks into one pipeline and keeps the
//! canonical input state.
//!
//! ## Architecture
//!
//! ```text
//!  source 0 ─┐                       ┌─► sink 0
//!  source 1 ─┼─► remap ─► filter 1 ─► … ─► filter N ─► state ─┼─► sink 1
//!  source 2 ─┘   (offsets)                                     └─► callback
//! ```
//!
//! ## Thread Safety
//!
//! - One mutex guards filters, sinks and state; every delivery holds it for
//!   the whole pipeline, so sinks see queues in arrival order
//! - The event callback runs after that lock is released, so it may read the
//!   node back
//! - Sources live behind a second mutex so a source may deliver from inside
//!   its own `start`. Lock order is sources, then core
//! - Getters hold the lock only while copying

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{InputError, InputResult};
use crate::input::event::EventKind;
use crate::input::filter::{FilterSettings, IoFilter};
use crate::input::queue::{EventQueue, Signature};
use crate::input::source::{InputSink, InputSource};
use crate::input::state::InputState;
use crate::math::Matrix4;

/// Identifier of an installed filter. The first filter gets 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub u32);

/// Callback run with every filtered queue.
pub type QueueCallback = Box<dyn FnMut(&EventQueue) + Send>;

struct FilterEntry {
    id: FilterId,
    filter: Box<dyn IoFilter>,
    state: InputState,
}

struct SinkEntry {
    sink: Box<dyn InputSink>,
    owned: bool,
}

struct SourceEntry {
    source: Box<dyn InputSource>,
    owned: bool,
}

struct NodeCore {
    state: InputState,
    filters: Vec<FilterEntry>,
    sinks: Vec<SinkEntry>,
    buffering: bool,
    buffer: EventQueue,
}

impl NodeCore {
    fn filter_queue(&mut self, queue: &mut EventQueue) -> bool {
        let mut ok = true;
        for entry in &mut self.filters {
            if !entry.filter.filter(queue, &mut entry.state) {
                ok = false;
            }
        }
        match self.filters.last() {
            Some(last) => self.state.clone_from(&last.state),
            None => self.state.update_queue(queue),
        }
        ok
    }

    fn all_states(&mut self) -> impl Iterator<Item = &mut InputState> {
        std::iter::once(&mut self.state).chain(self.filters.iter_mut().map(|f| &mut f.state))
    }
}

struct NodeShared {
    label: String,
    core: Mutex<NodeCore>,
    sources: Mutex<Vec<SourceEntry>>,
    callback: Mutex<Option<QueueCallback>>,
    started: AtomicBool,
}

impl NodeShared {
    fn receive_data(&self, channel: usize, mut queue: EventQueue) -> bool {
        let mut core = self.core.lock();
        let Some(device) = core.state.device_signature(channel) else {
            tracing::warn!(target: "szg::input", "{}: ignoring data on unknown channel {channel}", self.label);
            return false;
        };
        let offset = core.state.device_offset(channel);
        // An index outside the device's own block would land on another channel.
        let dropped = queue.remap_indices(|kind, index| {
            if index < device.count(kind) {
                index.checked_add(offset.count(kind))
            } else {
                None
            }
        });
        if dropped > 0 {
            tracing::warn!(
                target: "szg::input",
                "{}: dropped {dropped} events from channel {channel} outside {device:?}",
                self.label
            );
        }

        if core.buffering {
            core.buffer.append_queue(&queue);
            return true;
        }

        let ok = core.filter_queue(&mut queue);
        let signature = core.state.signature().max(queue.signature());
        if let Err(err) = queue.set_signature(signature) {
            tracing::debug!(target: "szg::input", "{}: keeping queue signature: {err}", self.label);
        }
        for entry in &mut core.sinks {
            if !entry.sink.receive_data(channel, &queue) {
                tracing::debug!(target: "szg::input", "{}: sink {} refused data", self.label, entry.sink.name());
            }
        }
        drop(core);
        self.run_callback(&queue);
        ok
    }

    fn run_callback(&self, queue: &EventQueue) {
        if let Some(callback) = self.callback.lock().as_mut() {
            callback(queue);
        }
    }

    fn reconfigure(&self, channel: usize, signature: Signature) -> bool {
        let mut core = self.core.lock();
        if core.state.device_signature(channel).is_none() {
            tracing::warn!(target: "szg::input", "{}: ignoring reconfig of unknown channel {channel}", self.label);
            return false;
        }
        if !signature.is_bounded() {
            tracing::warn!(target: "szg::input", "{}: channel {channel} asked for oversized {signature:?}", self.label);
            return false;
        }
        for state in core.all_states() {
            state.remap_input_device(channel, signature);
        }
        let total = core.state.signature();
        tracing::info!(target: "szg::input", "{}: channel {channel} now {:?}, node {:?}", self.label, signature, total);
        let mut ok = true;
        for entry in &mut core.sinks {
            ok &= entry.sink.source_reconfig(channel, total);
        }
        ok
    }
}

/// Handle a source uses to deliver events to its node.
#[derive(Clone)]
pub struct SourceHandle {
    channel: usize,
    node: Weak<NodeShared>,
}

impl SourceHandle {
    /// Channel number assigned to the source.
    #[inline]
    #[must_use]
    pub const fn channel(&self) -> usize {
        self.channel
    }

    /// Delivers a queue of source-local events. Returns false if the node is gone
    /// or a filter failed.
    pub fn send_queue(&self, queue: EventQueue) -> bool {
        match self.node.upgrade() {
            Some(node) => node.receive_data(self.channel, queue),
            None => false,
        }
    }

    /// Reports a new signature for this source.
    pub fn reconfigure(&self, signature: Signature) -> bool {
        match self.node.upgrade() {
            Some(node) => node.reconfigure(self.channel, signature),
            None => false,
        }
    }
}

/// Sources, a filter chain and sinks around one canonical input state.
pub struct InputNode {
    shared: Arc<NodeShared>,
}

impl InputNode {
    /// Creates an empty node.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            shared: Arc::new(NodeShared {
                label: label.to_owned(),
                core: Mutex::new(NodeCore {
                    state: InputState::new(),
                    filters: Vec::new(),
                    sinks: Vec::new(),
                    buffering: false,
                    buffer: EventQueue::new(),
                }),
                sources: Mutex::new(Vec::new()),
                callback: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Returns true between `start` and `stop`.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Adds a source. Its channel is its position among sources.
    ///
    /// An owned source is stopped when the node is dropped. A signature with
    /// more than `Signature::MAX_CHANNELS` of a kind is registered as empty.
    pub fn add_source(&self, source: Box<dyn InputSource>, owned: bool) -> usize {
        let mut signature = source.signature();
        if !signature.is_bounded() {
            tracing::warn!(target: "szg::input", "{}: source {} declared oversized {signature:?}", self.label(), source.name());
            signature = Signature::default();
        }
        let mut sources = self.shared.sources.lock();
        let channel = {
            let mut core = self.shared.core.lock();
            let mut channel = 0;
            for state in core.all_states() {
                channel = state.add_input_device(signature);
            }
            channel
        };
        sources.push(SourceEntry { source, owned });
        if self.is_started() {
            let handle = self.handle(channel);
            if let Some(entry) = sources.last_mut() {
                if !entry.source.start(handle) {
                    tracing::warn!(target: "szg::input", "{}: late source {} failed to start", self.label(), entry.source.name());
                }
            }
        }
        channel
    }

    /// Number of sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.shared.sources.lock().len()
    }

    /// Adds a sink. Refused while buffering.
    ///
    /// An owned sink is stopped when the node is dropped. Sinks run under the
    /// node lock and must not call back into the node.
    pub fn add_sink(&self, mut sink: Box<dyn InputSink>, owned: bool) -> InputResult<usize> {
        let mut core = self.shared.core.lock();
        if core.buffering {
            return Err(InputError::SinkWhileBuffering);
        }
        if self.is_started() && sink.auto_activate() {
            if !sink.init() {
                return Err(InputError::InitFailed(sink.name().to_owned()));
            }
            if !sink.start() {
                return Err(InputError::StartFailed(sink.name().to_owned()));
            }
        }
        core.sinks.push(SinkEntry { sink, owned });
        Ok(core.sinks.len() - 1)
    }

    /// Number of sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.shared.core.lock().sinks.len()
    }

    /// Appends a filter to the chain and returns its ID.
    ///
    /// The ID is the smallest unused value starting at 1.
    pub fn add_filter(&self, filter: Box<dyn IoFilter>) -> FilterId {
        let mut core = self.shared.core.lock();
        let mut next = 1;
        while core.filters.iter().any(|f| f.id.0 == next) {
            next += 1;
        }
        let id = FilterId(next);
        let state = core.filters.last().map_or_else(|| core.state.clone(), |f| f.state.clone());
        core.filters.push(FilterEntry { id, filter, state });
        tracing::debug!(target: "szg::input", "{}: added filter {}", self.label(), id.0);
        id
    }

    /// Removes a filter, returning it.
    pub fn remove_filter(&self, id: FilterId) -> InputResult<Box<dyn IoFilter>> {
        let mut core = self.shared.core.lock();
        let pos = core
            .filters
            .iter()
            .position(|f| f.id == id)
            .ok_or(InputError::UnknownFilter(id.0))?;
        Ok(core.filters.remove(pos).filter)
    }

    /// Swaps the filter behind `id`, keeping its position and state.
    pub fn replace_filter(&self, id: FilterId, filter: Box<dyn IoFilter>) -> InputResult<Box<dyn IoFilter>> {
        let mut core = self.shared.core.lock();
        let entry = core
            .filters
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(InputError::UnknownFilter(id.0))?;
        Ok(std::mem::replace(&mut entry.filter, filter))
    }

    /// Passes settings to one filter.
    pub fn configure_filter(&self, id: FilterId, settings: &FilterSettings) -> InputResult<bool> {
        let mut core = self.shared.core.lock();
        let entry = core
            .filters
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(InputError::UnknownFilter(id.0))?;
        Ok(entry.filter.configure(settings))
    }

    /// IDs of installed filters in chain order.
    #[must_use]
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.shared.core.lock().filters.iter().map(|f| f.id).collect()
    }

    /// Installs the callback run with every filtered queue.
    ///
    /// It runs after the node lock is released, so it may read the node's
    /// state. Concurrent sources may reach it in a different order than the
    /// sinks saw their queues. It must not replace itself.
    pub fn set_event_callback(&self, callback: impl FnMut(&EventQueue) + Send + 'static) {
        *self.shared.callback.lock() = Some(Box::new(callback));
    }

    /// Turns event buffering on or off. Refused while sinks are attached.
    pub fn set_buffer_events(&self, on: bool) -> InputResult<()> {
        let mut core = self.shared.core.lock();
        if on && !core.sinks.is_empty() {
            return Err(InputError::SinkWhileBuffering);
        }
        core.buffering = on;
        Ok(())
    }

    /// Filters and applies everything buffered so far. Returns the filtered queue.
    pub fn process_buffered_events(&self) -> EventQueue {
        let queue = {
            let mut core = self.shared.core.lock();
            let mut queue = std::mem::take(&mut core.buffer);
            core.filter_queue(&mut queue);
            queue
        };
        self.shared.run_callback(&queue);
        queue
    }

    /// Initializes every source and sink.
    pub fn init(&self) -> InputResult<()> {
        for entry in self.shared.sources.lock().iter_mut() {
            if !entry.source.init() {
                return Err(InputError::InitFailed(entry.source.name().to_owned()));
            }
        }
        for entry in &mut self.shared.core.lock().sinks {
            if !entry.sink.init() {
                return Err(InputError::InitFailed(entry.sink.name().to_owned()));
            }
        }
        Ok(())
    }

    /// Starts every source and every auto-activating sink.
    ///
    /// Already-running members are left alone, so calling this twice is safe.
    pub fn start(&self) -> InputResult<()> {
        {
            let mut core = self.shared.core.lock();
            for entry in core.sinks.iter_mut().filter(|e| e.sink.auto_activate()) {
                if !entry.sink.start() {
                    return Err(InputError::StartFailed(entry.sink.name().to_owned()));
                }
            }
        }
        let mut sources = self.shared.sources.lock();
        for (channel, entry) in sources.iter_mut().enumerate() {
            if entry.source.is_running() {
                continue;
            }
            let handle = self.handle(channel);
            if !entry.source.start(handle) {
                return Err(InputError::StartFailed(entry.source.name().to_owned()));
            }
        }
        self.shared.started.store(true, Ordering::Release);
        tracing::info!(target: "szg::input", "{} started with {} sources", self.label(), sources.len());
        Ok(())
    }

    /// Stops every source and sink.
    pub fn stop(&self) {
        for entry in self.shared.sources.lock().iter_mut() {
            entry.source.stop();
        }
        for entry in &mut self.shared.core.lock().sinks {
            entry.sink.stop();
        }
        self.shared.started.store(false, Ordering::Release);
    }

    /// `stop` followed by `start`.
    pub fn restart(&self) -> InputResult<()> {
        self.stop();
        self.start()
    }

    fn handle(&self, channel: usize) -> SourceHandle {
        SourceHandle { channel, node: Arc::downgrade(&self.shared) }
    }

    /// Delivers a queue as if channel `channel` had sent it.
    pub fn receive_data(&self, channel: usize, queue: EventQueue) -> bool {
        self.shared.receive_data(channel, queue)
    }

    /// Current button value.
    #[must_use]
    pub fn button(&self, index: u32) -> i32 {
        self.shared.core.lock().state.button(index)
    }

    /// Current axis value.
    #[must_use]
    pub fn axis(&self, index: u32) -> f32 {
        self.shared.core.lock().state.axis(index)
    }

    /// Current matrix value.
    #[must_use]
    pub fn matrix(&self, index: u32) -> Matrix4 {
        self.shared.core.lock().state.matrix(index)
    }

    /// Released-to-pressed edge on a button.
    #[must_use]
    pub fn on_button(&self, index: u32) -> bool {
        self.shared.core.lock().state.on_button(index)
    }

    /// Pressed-to-released edge on a button.
    #[must_use]
    pub fn off_button(&self, index: u32) -> bool {
        self.shared.core.lock().state.off_button(index)
    }

    /// Copy of the whole state.
    #[must_use]
    pub fn state(&self) -> InputState {
        self.shared.core.lock().state.clone()
    }

    /// Total signature across all sources.
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.shared.core.lock().state.signature()
    }

    /// First index of each kind owned by a source channel.
    #[must_use]
    pub fn channel_offset(&self, channel: usize, kind: EventKind) -> u32 {
        self.shared.core.lock().state.device_offset(channel).count(kind)
    }
}

impl Drop for InputNode {
    fn drop(&mut self) {
        for entry in self.shared.sources.lock().iter_mut().filter(|e| e.owned) {
            entry.source.stop();
        }
        for entry in self.shared.core.lock().sinks.iter_mut().filter(|e| e.owned) {
            entry.sink.stop();
        }
    }
}
