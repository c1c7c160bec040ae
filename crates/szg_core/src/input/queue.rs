//! # Event Queue
//!
//! Ordered sequence of input events plus the signature they imply.
//!
//! ## Design
//!
//! - FIFO: events leave in arrival order
//! - The signature grows to `index + 1` as events are appended
//! - Parallel-array form (`EventBuffers`) for the wire and for frames

use std::collections::VecDeque;

use crate::error::{InputError, InputResult};
use crate::input::event::{EventKind, EventValue, InputEvent};
use crate::math::Matrix4;

/// Channel counts of a device or queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Number of buttons.
    pub buttons: u32,
    /// Number of axes.
    pub axes: u32,
    /// Number of matrices.
    pub matrices: u32,
}

impl Signature {
    /// Largest channel count of one kind a device may declare.
    pub const MAX_CHANNELS: u32 = 1 << 16;

    /// Creates a signature.
    #[must_use]
    pub const fn new(buttons: u32, axes: u32, matrices: u32) -> Self {
        Self { buttons, axes, matrices }
    }

    /// Count for one kind.
    #[inline]
    #[must_use]
    pub const fn count(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Button => self.buttons,
            EventKind::Axis => self.axes,
            EventKind::Matrix => self.matrices,
        }
    }

    /// Per-kind maximum of two signatures.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            buttons: self.buttons.max(other.buttons),
            axes: self.axes.max(other.axes),
            matrices: self.matrices.max(other.matrices),
        }
    }

    /// Per-kind sum of two signatures, saturating at `u32::MAX`.
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self {
            buttons: self.buttons.saturating_add(other.buttons),
            axes: self.axes.saturating_add(other.axes),
            matrices: self.matrices.saturating_add(other.matrices),
        }
    }

    /// Returns true if no kind exceeds `MAX_CHANNELS`.
    #[inline]
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.buttons <= Self::MAX_CHANNELS
            && self.axes <= Self::MAX_CHANNELS
            && self.matrices <= Self::MAX_CHANNELS
    }

    fn grow_to(&mut self, kind: EventKind, index: u32) {
        let needed = index.saturating_add(1);
        let slot = match kind {
            EventKind::Button => &mut self.buttons,
            EventKind::Axis => &mut self.axes,
            EventKind::Matrix => &mut self.matrices,
        };
        if *slot < needed {
            *slot = needed;
        }
    }
}

/// Parallel-array form of a queue.
///
/// `kinds[i]` and `indices[i]` describe event `i`; payloads are stored per
/// kind in queue order. `flags[i]` bit 0 marks garbage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventBuffers {
    /// Channel kind per event.
    pub kinds: Vec<u8>,
    /// Garbage flag per event.
    pub flags: Vec<u8>,
    /// Channel index per event.
    pub indices: Vec<u32>,
    /// Button payloads in order.
    pub buttons: Vec<i32>,
    /// Axis payloads in order.
    pub axes: Vec<f32>,
    /// Matrix payloads in order, 16 floats each.
    pub matrices: Vec<f32>,
}

/// Flag bit marking a garbage event in `EventBuffers::flags`.
pub const FLAG_GARBAGE: u8 = 0x1;

/// FIFO of input events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventQueue {
    events: VecDeque<InputEvent>,
    signature: Signature,
    buttons: usize,
    axes: usize,
    matrices: usize,
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of queued events of one kind.
    #[must_use]
    pub const fn count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Button => self.buttons,
            EventKind::Axis => self.axes,
            EventKind::Matrix => self.matrices,
        }
    }

    /// Signature covering every index seen.
    #[inline]
    #[must_use]
    pub const fn signature(&self) -> Signature {
        self.signature
    }

    /// Sets the signature. It cannot shrink below any index in the queue.
    pub fn set_signature(&mut self, signature: Signature) -> InputResult<()> {
        for event in &self.events {
            if event.index() >= signature.count(event.kind()) {
                return Err(InputError::SignatureTooSmall {
                    kind: event.kind().name(),
                    index: event.index(),
                });
            }
        }
        self.signature = signature;
        Ok(())
    }

    /// Appends one event, growing the signature if needed.
    pub fn append_event(&mut self, event: InputEvent) {
        self.signature.grow_to(event.kind(), event.index());
        match event.kind() {
            EventKind::Button => self.buttons += 1,
            EventKind::Axis => self.axes += 1,
            EventKind::Matrix => self.matrices += 1,
        }
        self.events.push_back(event);
    }

    /// Appends every event of `other` in order.
    pub fn append_queue(&mut self, other: &EventQueue) {
        for event in &other.events {
            self.append_event(*event);
        }
        self.signature = self.signature.max(other.signature);
    }

    /// Removes and returns the oldest event.
    pub fn pop_next(&mut self) -> Option<InputEvent> {
        let event = self.events.pop_front()?;
        match event.kind() {
            EventKind::Button => self.buttons -= 1,
            EventKind::Axis => self.axes -= 1,
            EventKind::Matrix => self.matrices -= 1,
        }
        Some(event)
    }

    /// Oldest event without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&InputEvent> {
        self.events.front()
    }

    /// Removes every event. The signature is kept.
    pub fn clear(&mut self) {
        self.events.clear();
        self.buttons = 0;
        self.axes = 0;
        self.matrices = 0;
    }

    /// Iterates in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &InputEvent> {
        self.events.iter()
    }

    /// Rewrites every event's index through `f`, dropping events it maps to
    /// `None`. The signature is rebuilt from the surviving indices.
    ///
    /// Returns the number of dropped events.
    pub fn remap_indices(&mut self, mut f: impl FnMut(EventKind, u32) -> Option<u32>) -> usize {
        let events = std::mem::take(&mut self.events);
        let before = events.len();
        self.clear();
        self.signature = Signature::default();
        for mut event in events {
            if let Some(index) = f(event.kind(), event.index()) {
                event.set_index(index);
                self.append_event(event);
            }
        }
        before - self.len()
    }

    /// Converts to parallel arrays.
    #[must_use]
    pub fn to_buffers(&self) -> EventBuffers {
        let mut out = EventBuffers {
            kinds: Vec::with_capacity(self.len()),
            flags: Vec::with_capacity(self.len()),
            indices: Vec::with_capacity(self.len()),
            buttons: Vec::with_capacity(self.buttons),
            axes: Vec::with_capacity(self.axes),
            matrices: Vec::with_capacity(self.matrices * 16),
        };
        for event in &self.events {
            out.kinds.push(event.kind() as u8);
            out.flags.push(if event.is_garbage() { FLAG_GARBAGE } else { 0 });
            out.indices.push(event.index());
            match event.value() {
                EventValue::Button(v) => out.buttons.push(v),
                EventValue::Axis(v) => out.axes.push(v),
                EventValue::Matrix(m) => out.matrices.extend_from_slice(m.as_slice()),
            }
        }
        out
    }

    /// Rebuilds a queue from parallel arrays.
    pub fn from_buffers(buffers: &EventBuffers, signature: Signature) -> InputResult<Self> {
        let n = buffers.kinds.len();
        if buffers.indices.len() != n || buffers.flags.len() != n {
            return Err(InputError::MalformedBuffers(format!(
                "{} kinds, {} indices, {} flags",
                n,
                buffers.indices.len(),
                buffers.flags.len()
            )));
        }
        let mut queue = Self::new();
        let (mut b, mut a, mut m) = (0usize, 0usize, 0usize);
        for i in 0..n {
            let kind = EventKind::from_u8(buffers.kinds[i]).ok_or_else(|| {
                InputError::MalformedBuffers(format!("unknown kind {}", buffers.kinds[i]))
            })?;
            let index = buffers.indices[i];
            let value = match kind {
                EventKind::Button => {
                    let v = buffers.buttons.get(b).copied();
                    b += 1;
                    v.map(EventValue::Button)
                }
                EventKind::Axis => {
                    let v = buffers.axes.get(a).copied();
                    a += 1;
                    v.map(EventValue::Axis)
                }
                EventKind::Matrix => {
                    let v = buffers.matrices.get(m * 16..m * 16 + 16).and_then(Matrix4::from_slice);
                    m += 1;
                    v.map(EventValue::Matrix)
                }
            };
            let value = value.ok_or_else(|| {
                InputError::MalformedBuffers(format!("missing {} payload for event {i}", kind.name()))
            })?;
            let mut event = InputEvent::new(index, value);
            if buffers.flags[i] & FLAG_GARBAGE != 0 {
                event.trash();
            }
            queue.append_event(event);
        }
        queue.signature = queue.signature.max(signature);
        Ok(queue)
    }
}

impl<'a> IntoIterator for &'a EventQueue {
    type Item = &'a InputEvent;
    type IntoIter = std::collections::vec_deque::Iter<'a, InputEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<InputEvent> for EventQueue {
    fn from_iter<T: IntoIterator<Item = InputEvent>>(iter: T) -> Self {
        let mut queue = Self::new();
        for event in iter {
            queue.append_event(event);
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_grows_on_append() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::button(4, 1));
        queue.append_event(InputEvent::matrix(1, Matrix4::IDENTITY));
        assert_eq!(queue.signature(), Signature::new(5, 0, 2));
        assert_eq!(queue.count(EventKind::Button), 1);
    }

    #[test]
    fn test_pop_is_fifo() {
        let mut queue: EventQueue =
            [InputEvent::button(0, 1), InputEvent::axis(0, 0.5)].into_iter().collect();
        assert_eq!(queue.pop_next(), Some(InputEvent::button(0, 1)));
        assert_eq!(queue.pop_next(), Some(InputEvent::axis(0, 0.5)));
        assert!(queue.pop_next().is_none());
        assert_eq!(queue.count(EventKind::Axis), 0);
    }

    #[test]
    fn test_set_signature_refuses_shrink() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::axis(3, 0.0));
        assert!(queue.set_signature(Signature::new(0, 2, 0)).is_err());
        assert!(queue.set_signature(Signature::new(0, 4, 1)).is_ok());
    }

    #[test]
    fn test_append_queue_takes_max_signature() {
        let mut a = EventQueue::new();
        a.set_signature(Signature::new(8, 0, 0)).unwrap();
        let mut b = EventQueue::new();
        b.append_event(InputEvent::axis(2, 1.0));
        a.append_queue(&b);
        assert_eq!(a.signature(), Signature::new(8, 3, 0));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_buffers_preserve_order_and_garbage() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::axis(1, 0.25));
        queue.append_event(InputEvent::garbage(EventKind::Button, 2));
        queue.append_event(InputEvent::matrix(0, Matrix4::translation(0.0, 1.0, 0.0)));
        let rebuilt = EventQueue::from_buffers(&queue.to_buffers(), queue.signature()).unwrap();
        assert_eq!(rebuilt, queue);
    }

    #[test]
    fn test_from_buffers_rejects_missing_payload() {
        let buffers = EventBuffers {
            kinds: vec![EventKind::Axis as u8],
            flags: vec![0],
            indices: vec![0],
            ..EventBuffers::default()
        };
        assert!(EventQueue::from_buffers(&buffers, Signature::default()).is_err());
    }

    #[test]
    fn test_remap_drops_rejected_events() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::button(0, 1));
        queue.append_event(InputEvent::button(u32::MAX, 1));
        queue.append_event(InputEvent::axis(1, 0.5));
        let dropped = queue.remap_indices(|_, index| index.checked_add(2));
        assert_eq!(dropped, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.count(EventKind::Button), 1);
        assert_eq!(queue.signature(), Signature::new(3, 4, 0));
        assert_eq!(queue.pop_next().map(|e| e.index()), Some(2));
    }

    #[test]
    fn test_signature_sum_saturates() {
        let big = Signature::new(u32::MAX, 1, 0);
        assert_eq!(big.add(Signature::new(1, 1, 1)), Signature::new(u32::MAX, 2, 1));
        assert!(!big.is_bounded());
        assert!(Signature::new(Signature::MAX_CHANNELS, 0, 0).is_bounded());
    }
}
