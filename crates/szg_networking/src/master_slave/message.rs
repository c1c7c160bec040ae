//! Wire bodies of the master/slave frames.
//!
//! ```text
//!  Handshake       label:str | count:u32 | (name:str, type:i32, count:u32, resizable:u8) * count
//!  HandshakeReply  accepted:u8 | reason:str
//!  MasterFrame     number:u64 | elapsed_us:u64 | input state | input queue | len:u32 | fields
//!  Ack             number:u64
//! ```

use std::time::Duration;

use szg_core::{DataType, EventQueue, FieldSchema, InputState};

use crate::error::{NetError, NetResult};
use crate::protocol::input::{decode_queue, decode_state, encode_queue, encode_state};
use crate::protocol::{WireReader, WireWriter};

fn truncated(what: &str) -> NetError {
    NetError::Protocol(format!("{what} truncated"))
}

/// A slave's opening message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Slave label for logs.
    pub label: String,
    /// Transfer fields the slave registered.
    pub schema: Vec<FieldSchema>,
}

impl Hello {
    /// Encodes the message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_str(&self.label);
        w.write_u32(u32::try_from(self.schema.len()).unwrap_or(u32::MAX));
        for field in &self.schema {
            w.write_str(&field.name);
            w.write_i32(field.data_type as i32);
            w.write_u32(u32::try_from(field.count).unwrap_or(u32::MAX));
            w.write_u8(u8::from(field.resizable));
        }
        w.into_inner()
    }

    /// Decodes the message.
    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        let mut r = WireReader::new(bytes);
        let label = r.read_str().ok_or_else(|| truncated("handshake"))?;
        let count = r.read_u32().ok_or_else(|| truncated("handshake"))?;
        let mut schema = Vec::new();
        for _ in 0..count {
            let name = r.read_str().ok_or_else(|| truncated("handshake"))?;
            let raw_type = r.read_i32().ok_or_else(|| truncated("handshake"))?;
            let data_type = DataType::from_i32(raw_type)
                .ok_or_else(|| NetError::Protocol(format!("field '{name}' has type {raw_type}")))?;
            let count = r.read_u32().ok_or_else(|| truncated("handshake"))? as usize;
            let resizable = r.read_u8().ok_or_else(|| truncated("handshake"))? != 0;
            schema.push(FieldSchema { name, data_type, count, resizable });
        }
        Ok(Self { label, schema })
    }
}

/// Encodes the master's answer.
#[must_use]
pub fn encode_reply(result: &Result<(), String>) -> Vec<u8> {
    let mut w = WireWriter::new();
    match result {
        Ok(()) => {
            w.write_u8(1);
            w.write_str("");
        }
        Err(reason) => {
            w.write_u8(0);
            w.write_str(reason);
        }
    }
    w.into_inner()
}

/// Decodes the master's answer.
pub fn decode_reply(bytes: &[u8]) -> NetResult<Result<(), String>> {
    let mut r = WireReader::new(bytes);
    let accepted = r.read_u8().ok_or_else(|| truncated("handshake reply"))? != 0;
    let reason = r.read_str().ok_or_else(|| truncated("handshake reply"))?;
    Ok(if accepted { Ok(()) } else { Err(reason) })
}

/// One frame as a slave receives it.
#[derive(Clone, Debug)]
pub struct FrameMessage {
    /// Frame number, starting at 1.
    pub number: u64,
    /// Master time since the session started.
    pub elapsed: Duration,
    /// Master's filtered input state.
    pub input: InputState,
    /// Events the master's input node produced since the previous frame.
    pub events: EventQueue,
    /// Packed transfer fields.
    pub fields: Vec<u8>,
}

impl FrameMessage {
    /// Encodes a frame without copying the field bytes first.
    #[must_use]
    pub fn encode(number: u64, elapsed: Duration, input: &InputState, events: &EventQueue, fields: &[u8]) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(fields.len() + 64);
        w.write_u64(number);
        w.write_u64(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
        encode_state(input, &mut w);
        encode_queue(events, &mut w);
        w.write_u32(u32::try_from(fields.len()).unwrap_or(u32::MAX));
        w.write_bytes(fields);
        w.into_inner()
    }

    /// Decodes a frame.
    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        let mut r = WireReader::new(bytes);
        let number = r.read_u64().ok_or_else(|| truncated("frame"))?;
        let elapsed = Duration::from_micros(r.read_u64().ok_or_else(|| truncated("frame"))?);
        let input = decode_state(&mut r)?;
        let events = decode_queue(&mut r)?;
        let len = r.read_u32().ok_or_else(|| truncated("frame"))? as usize;
        let fields = r.read_bytes(len).ok_or_else(|| truncated("frame fields"))?.to_vec();
        Ok(Self { number, elapsed, input, events, fields })
    }
}

/// Encodes an acknowledgement.
#[must_use]
pub fn encode_ack(number: u64) -> [u8; 8] {
    number.to_le_bytes()
}

/// Decodes an acknowledgement.
pub fn decode_ack(bytes: &[u8]) -> NetResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| truncated("ack"))?;
    Ok(u64::from_le_bytes(raw))
}
