//! # Wire Serialization
//!
//! Little-endian primitive codecs shared by every frame format.
//!
//! ## Design
//!
//! - `WireWriter` appends to a reusable `Vec<u8>`; `clear()` keeps capacity
//! - `WireReader` borrows a slice and returns `None` on underrun
//! - Fixed headers are `Pod` structs copied with `bytemuck`

use bytemuck::{bytes_of, Pod, Zeroable};

/// Header at the front of every structured record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordHeader {
    /// Total encoded size including this header.
    pub size: i32,
    /// Template ID from the dictionary.
    pub type_id: i32,
    /// Number of fields that follow.
    pub field_count: i32,
}

impl RecordHeader {
    /// Encoded size of the header.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Header in front of each field payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FieldHeader {
    /// Element count.
    pub dimension: i32,
    /// Element type code.
    pub data_type: i32,
}

impl FieldHeader {
    /// Encoded size of the header.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Growable little-endian writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(capacity) }
    }

    /// Drops the contents but keeps the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Takes the written bytes out of the writer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Mutable access for codecs that append directly.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Writes one byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a `u32`.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an `i32`.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a `u64`.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an `f32`.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a `u32` length followed by the UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(u32::try_from(value.len()).unwrap_or(u32::MAX));
        self.write_bytes(value.as_bytes());
    }

    /// Writes a `Pod` value directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Overwrites a previously written `Pod` value at `offset`.
    pub fn patch_pod<T: Pod>(&mut self, offset: usize, value: &T) {
        let bytes = bytes_of(value);
        if let Some(slot) = self.buffer.get_mut(offset..offset + bytes.len()) {
            slot.copy_from_slice(bytes);
        }
    }
}

/// Borrowing little-endian reader.
#[derive(Debug)]
pub struct WireReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Starts reading at the front of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Bytes left.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Bytes consumed so far.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Unread tail.
    #[inline]
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.position.min(self.buffer.len())..]
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let slice = self.buffer.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Skips `len` bytes.
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Reads one byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Reads a `u32`.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads an `i32`.
    #[inline]
    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_bytes(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a `u64`.
    #[inline]
    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_bytes(8)
            .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Reads an `f32`.
    #[inline]
    pub fn read_f32(&mut self) -> Option<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads a string written by `write_str`.
    pub fn read_str(&mut self) -> Option<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    /// Reads a `Pod` value.
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> Option<T> {
        let slice = self.read_bytes(std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(slice).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives() {
        let mut w = WireWriter::new();
        w.write_u8(7);
        w.write_i32(-5);
        w.write_f32(1.5);
        w.write_str("wand");
        w.write_u64(u64::MAX);

        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.read_u8(), Some(7));
        assert_eq!(r.read_i32(), Some(-5));
        assert_eq!(r.read_f32(), Some(1.5));
        assert_eq!(r.read_str().as_deref(), Some("wand"));
        assert_eq!(r.read_u64(), Some(u64::MAX));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.read_u8(), None);
    }

    #[test]
    fn test_record_header_is_little_endian() {
        let mut w = WireWriter::new();
        w.write_pod(&RecordHeader { size: 12, type_id: 3, field_count: 0 });
        assert_eq!(w.as_slice(), &[12, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0]);
        w.patch_pod(0, &RecordHeader { size: 99, type_id: 3, field_count: 0 });
        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.read_pod::<RecordHeader>().map(|h| h.size), Some(99));
    }

    #[test]
    fn test_underrun() {
        let bytes = [1u8, 2, 3];
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_u32(), None);
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_bytes(2), Some(&bytes[..2]));
        assert_eq!(r.rest(), &[3]);
    }
}
