//! # Typed Field Data
//!
//! The element types that travel over the wire: transfer fields on the
//! master/slave link and record fields in the replication protocol.
//!
//! ## Design
//!
//! - One closed set of element types with fixed sizes
//! - `FieldData` owns a homogeneous array of one type
//! - Little-endian byte encoding regardless of host order

use std::fmt;

/// Element type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    /// 32-bit signed integer.
    Int = 1,
    /// 32-bit float.
    Float = 2,
    /// Raw bytes, also used for UTF-8 strings.
    Char = 3,
    /// 64-bit signed integer.
    Long = 4,
    /// 64-bit float.
    Double = 5,
}

impl DataType {
    /// Size of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Char => 1,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Char),
            4 => Some(Self::Long),
            5 => Some(Self::Double),
            _ => None,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Char => "char",
            Self::Long => "long",
            Self::Double => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A homogeneous array of one element type.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldData {
    /// Integers.
    Int(Vec<i32>),
    /// Floats.
    Float(Vec<f32>),
    /// Bytes or a string.
    Char(Vec<u8>),
    /// 64-bit integers.
    Long(Vec<i64>),
    /// Doubles.
    Double(Vec<f64>),
}

impl FieldData {
    /// Creates a zero-filled array.
    #[must_use]
    pub fn zeroed(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Int => Self::Int(vec![0; len]),
            DataType::Float => Self::Float(vec![0.0; len]),
            DataType::Char => Self::Char(vec![0; len]),
            DataType::Long => Self::Long(vec![0; len]),
            DataType::Double => Self::Double(vec![0.0; len]),
        }
    }

    /// Creates a `Char` field holding a string.
    #[must_use]
    pub fn string(value: &str) -> Self {
        Self::Char(value.as_bytes().to_vec())
    }

    /// Element type.
    #[inline]
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Int(_) => DataType::Int,
            Self::Float(_) => DataType::Float,
            Self::Char(_) => DataType::Char,
            Self::Long(_) => DataType::Long,
            Self::Double(_) => DataType::Double,
        }
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Double(v) => v.len(),
        }
    }

    /// Returns true if there are no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size in bytes.
    #[inline]
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len() * self.data_type().size()
    }

    /// Resizes in place, zero-filling new elements.
    pub fn resize(&mut self, len: usize) {
        match self {
            Self::Int(v) => v.resize(len, 0),
            Self::Float(v) => v.resize(len, 0.0),
            Self::Char(v) => v.resize(len, 0),
            Self::Long(v) => v.resize(len, 0),
            Self::Double(v) => v.resize(len, 0.0),
        }
    }

    /// Integer view.
    #[must_use]
    pub fn as_ints(&self) -> Option<&[i32]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Float view.
    #[must_use]
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Byte view.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Char(v) => Some(v),
            _ => None,
        }
    }

    /// Long view.
    #[must_use]
    pub fn as_longs(&self) -> Option<&[i64]> {
        match self {
            Self::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Double view.
    #[must_use]
    pub fn as_doubles(&self) -> Option<&[f64]> {
        match self {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable integer view.
    pub fn as_ints_mut(&mut self) -> Option<&mut [i32]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable float view.
    pub fn as_floats_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable byte view.
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Char(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable long view.
    pub fn as_longs_mut(&mut self) -> Option<&mut [i64]> {
        match self {
            Self::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable double view.
    pub fn as_doubles_mut(&mut self) -> Option<&mut [f64]> {
        match self {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Lossy string view of a `Char` field.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Appends the little-endian encoding of every element.
    pub fn write_le(&self, out: &mut Vec<u8>) {
        out.reserve(self.byte_len());
        match self {
            Self::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Char(v) => out.extend_from_slice(v),
            Self::Long(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Double(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        }
    }

    /// Decodes `len` elements of `data_type` from the front of `bytes`.
    ///
    /// Returns `None` if `bytes` is too short.
    #[must_use]
    pub fn read_le(data_type: DataType, len: usize, bytes: &[u8]) -> Option<Self> {
        let needed = len.checked_mul(data_type.size())?;
        let bytes = bytes.get(..needed)?;
        Some(match data_type {
            DataType::Int => Self::Int(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::Float => Self::Float(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::Char => Self::Char(bytes.to_vec()),
            DataType::Long => Self::Long(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            DataType::Double => Self::Double(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_tags() {
        for t in [DataType::Int, DataType::Float, DataType::Char, DataType::Long, DataType::Double] {
            assert_eq!(DataType::from_i32(t as i32), Some(t));
        }
        assert_eq!(DataType::from_i32(0), None);
    }

    #[test]
    fn test_le_encoding_is_exact() {
        let data = FieldData::Int(vec![1, -2]);
        let mut out = Vec::new();
        data.write_le(&mut out);
        assert_eq!(out, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(FieldData::read_le(DataType::Int, 2, &out), Some(data));
    }

    #[test]
    fn test_read_short_buffer_fails() {
        assert!(FieldData::read_le(DataType::Double, 2, &[0u8; 15]).is_none());
    }

    #[test]
    fn test_resize_zero_fills() {
        let mut data = FieldData::Float(vec![1.5]);
        data.resize(3);
        assert_eq!(data, FieldData::Float(vec![1.5, 0.0, 0.0]));
        assert_eq!(data.byte_len(), 12);
    }
}
