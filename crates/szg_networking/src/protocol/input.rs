//! # Input Codec
//!
//! Byte layouts for input queues and states on the wire.
//!
//! ```text
//!  signature:  buttons:u32 | axes:u32 | matrices:u32
//!  queue:      signature | count:u32 | { kind:u8 | flags:u8 | index:u32 | payload } ...
//!  state:      signature | buttons i32.. | last buttons i32.. | axes f32.. | matrices 16*f32..
//! ```
//!
//! Button payloads are `i32`, axes `f32`, matrices 16 `f32`s column-major.
//! Signatures above `Signature::MAX_CHANNELS` per kind are rejected, and
//! counts are checked against the bytes left before anything is allocated.

use szg_core::input::{EventValue, FLAG_GARBAGE};
use szg_core::{EventKind, EventQueue, InputEvent, InputState, Matrix4, Signature};

use crate::error::{NetError, NetResult};
use crate::protocol::serialization::{WireReader, WireWriter};

fn truncated(what: &str) -> NetError {
    NetError::Protocol(format!("input {what} truncated"))
}

/// Writes a signature.
pub fn encode_signature(signature: Signature, out: &mut WireWriter) {
    out.write_u32(signature.buttons);
    out.write_u32(signature.axes);
    out.write_u32(signature.matrices);
}

/// Smallest encoded event: kind, flags, index and a 4-byte payload.
const MIN_EVENT_BYTES: usize = 10;

/// Reads a signature.
pub fn decode_signature(r: &mut WireReader<'_>) -> NetResult<Signature> {
    let buttons = r.read_u32().ok_or_else(|| truncated("signature"))?;
    let axes = r.read_u32().ok_or_else(|| truncated("signature"))?;
    let matrices = r.read_u32().ok_or_else(|| truncated("signature"))?;
    let signature = Signature::new(buttons, axes, matrices);
    if !signature.is_bounded() {
        return Err(NetError::Protocol(format!("input signature {signature:?} too large")));
    }
    Ok(signature)
}

/// Bytes `encode_state` writes after the signature.
fn state_len(signature: Signature) -> u64 {
    u64::from(signature.buttons) * 8 + u64::from(signature.axes) * 4 + u64::from(signature.matrices) * 64
}

fn write_matrix(m: &Matrix4, out: &mut WireWriter) {
    for v in m.as_slice() {
        out.write_f32(*v);
    }
}

fn read_matrix(r: &mut WireReader<'_>) -> Option<Matrix4> {
    let mut v = [0.0f32; 16];
    for slot in &mut v {
        *slot = r.read_f32()?;
    }
    Some(Matrix4::from_array(v))
}

/// Writes a queue in event order.
pub fn encode_queue(queue: &EventQueue, out: &mut WireWriter) {
    encode_signature(queue.signature(), out);
    out.write_u32(u32::try_from(queue.len()).unwrap_or(u32::MAX));
    for event in queue {
        out.write_u8(event.kind() as u8);
        out.write_u8(if event.is_garbage() { FLAG_GARBAGE } else { 0 });
        out.write_u32(event.index());
        match event.value() {
            EventValue::Button(v) => out.write_i32(v),
            EventValue::Axis(v) => out.write_f32(v),
            EventValue::Matrix(m) => write_matrix(&m, out),
        }
    }
}

/// Reads a queue written by `encode_queue`.
pub fn decode_queue(r: &mut WireReader<'_>) -> NetResult<EventQueue> {
    let signature = decode_signature(r)?;
    let count = r.read_u32().ok_or_else(|| truncated("queue"))?;
    if usize::try_from(count).map_or(true, |n| n > r.remaining() / MIN_EVENT_BYTES) {
        return Err(truncated("queue"));
    }
    let mut queue = EventQueue::new();
    for _ in 0..count {
        let tag = r.read_u8().ok_or_else(|| truncated("event"))?;
        let kind = EventKind::from_u8(tag)
            .ok_or_else(|| NetError::Protocol(format!("unknown event kind {tag}")))?;
        let flags = r.read_u8().ok_or_else(|| truncated("event"))?;
        let index = r.read_u32().ok_or_else(|| truncated("event"))?;
        let value = match kind {
            EventKind::Button => r.read_i32().map(EventValue::Button),
            EventKind::Axis => r.read_f32().map(EventValue::Axis),
            EventKind::Matrix => read_matrix(r).map(EventValue::Matrix),
        }
        .ok_or_else(|| truncated("payload"))?;
        let mut event = InputEvent::new(index, value);
        if flags & FLAG_GARBAGE != 0 {
            event.trash();
        }
        queue.append_event(event);
    }
    // Never shrinks below the events just appended.
    let _ = queue.set_signature(queue.signature().max(signature));
    Ok(queue)
}

/// Writes every value of a state, including previous buttons.
pub fn encode_state(state: &InputState, out: &mut WireWriter) {
    let signature = state.signature();
    encode_signature(signature, out);
    for i in 0..signature.buttons {
        out.write_i32(state.button(i));
    }
    for i in 0..signature.buttons {
        out.write_i32(state.last_button(i));
    }
    for i in 0..signature.axes {
        out.write_f32(state.axis(i));
    }
    for i in 0..signature.matrices {
        write_matrix(&state.matrix(i), out);
    }
}

/// Reads a state written by `encode_state`. Edge detection survives the trip.
pub fn decode_state(r: &mut WireReader<'_>) -> NetResult<InputState> {
    let signature = decode_signature(r)?;
    if state_len(signature) > u64::try_from(r.remaining()).unwrap_or(u64::MAX) {
        return Err(truncated("state"));
    }
    let mut state = InputState::with_signature(signature);
    let mut current = Vec::with_capacity(signature.buttons as usize);
    for _ in 0..signature.buttons {
        current.push(r.read_i32().ok_or_else(|| truncated("state"))?);
    }
    for i in 0..signature.buttons {
        state.set_button(i, r.read_i32().ok_or_else(|| truncated("state"))?);
    }
    state.update_last_buttons();
    for (i, v) in (0..).zip(current) {
        state.set_button(i, v);
    }
    for i in 0..signature.axes {
        state.set_axis(i, r.read_f32().ok_or_else(|| truncated("state"))?);
    }
    for i in 0..signature.matrices {
        state.set_matrix(i, read_matrix(r).ok_or_else(|| truncated("state"))?);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keeps_order_and_garbage() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::axis(1, 0.25));
        queue.append_event(InputEvent::button(3, 1));
        let mut g = InputEvent::matrix(0, Matrix4::translation(1.0, 0.0, 0.0));
        g.trash();
        queue.append_event(g);

        let mut w = WireWriter::new();
        encode_queue(&queue, &mut w);
        let bytes = w.into_inner();
        assert_eq!(bytes[12..16], [3, 0, 0, 0]);
        assert_eq!(bytes[16], EventKind::Axis as u8);

        let decoded = decode_queue(&mut WireReader::new(&bytes)).unwrap();
        assert_eq!(decoded, queue);
    }

    #[test]
    fn test_state_preserves_edges() {
        let mut state = InputState::with_signature(Signature::new(2, 1, 1));
        state.set_button(1, 1);
        state.set_axis(0, -0.5);
        state.set_matrix(0, Matrix4::scale(2.0));
        assert!(state.on_button(1));

        let mut w = WireWriter::new();
        encode_state(&state, &mut w);
        let decoded = decode_state(&mut WireReader::new(w.as_slice())).unwrap();
        assert!(decoded.on_button(1));
        assert!((decoded.axis(0) + 0.5).abs() < f32::EPSILON);
        assert_eq!(decoded.matrix(0), Matrix4::scale(2.0));
    }

    #[test]
    fn test_truncation_is_an_error() {
        let mut queue = EventQueue::new();
        queue.append_event(InputEvent::button(0, 1));
        let mut w = WireWriter::new();
        encode_queue(&queue, &mut w);
        let bytes = w.as_slice();
        assert!(decode_queue(&mut WireReader::new(&bytes[..bytes.len() - 2])).is_err());
    }

    #[test]
    fn test_oversized_signature_is_rejected() {
        let mut w = WireWriter::new();
        encode_signature(Signature::new(u32::MAX, 0, 0), &mut w);
        assert!(decode_signature(&mut WireReader::new(w.as_slice())).is_err());
        assert!(decode_state(&mut WireReader::new(w.as_slice())).is_err());
    }

    #[test]
    fn test_state_longer_than_payload_is_rejected() {
        let mut w = WireWriter::new();
        encode_signature(Signature::new(0, 0, Signature::MAX_CHANNELS), &mut w);
        w.write_f32(1.0);
        assert!(decode_state(&mut WireReader::new(w.as_slice())).is_err());
    }

    #[test]
    fn test_queue_count_past_payload_is_rejected() {
        let mut w = WireWriter::new();
        encode_signature(Signature::default(), &mut w);
        w.write_u32(u32::MAX);
        assert!(decode_queue(&mut WireReader::new(w.as_slice())).is_err());
    }
}
