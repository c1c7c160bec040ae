//! # Structured Records
//!
//! A record is one instance of a template: one `FieldData` per field.
//!
//! ## Wire Layout
//!
//! ```text
//!  size:i32 | type_id:i32 | field_count:i32 | { dim:i32 | data_type:i32 | payload } ...
//! ```
//!
//! `size` counts every byte including the header. Payloads are
//! little-endian arrays of `dim` elements.

use std::fmt;
use std::sync::Arc;

use szg_core::{DataType, FieldData};

use crate::error::{NetError, NetResult};
use crate::protocol::dictionary::{Dictionary, RecordTemplate};
use crate::protocol::serialization::{FieldHeader, RecordHeader, WireReader, WireWriter};

/// One record of a known template.
#[derive(Clone, PartialEq)]
pub struct StructuredRecord {
    template: Arc<RecordTemplate>,
    fields: Vec<FieldData>,
}

impl StructuredRecord {
    /// Creates a record with every field empty.
    #[must_use]
    pub fn new(template: &Arc<RecordTemplate>) -> Self {
        let fields = template
            .fields()
            .iter()
            .map(|f| FieldData::zeroed(f.data_type, 0))
            .collect();
        Self { template: Arc::clone(template), fields }
    }

    /// Template this record follows.
    #[inline]
    #[must_use]
    pub fn template(&self) -> &Arc<RecordTemplate> {
        &self.template
    }

    /// Type ID.
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> i32 {
        self.template.id()
    }

    /// Template name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.template.name()
    }

    /// Field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.template.field_index(name).map(|i| &self.fields[i])
    }

    /// Field by position.
    #[must_use]
    pub fn field_at(&self, index: usize) -> Option<&FieldData> {
        self.fields.get(index)
    }

    /// Replaces a field. Fails if the name is unknown or the type differs.
    pub fn set(&mut self, name: &str, data: FieldData) -> NetResult<()> {
        let index = self
            .template
            .field_index(name)
            .ok_or_else(|| NetError::Protocol(format!("'{}' has no field '{name}'", self.name())))?;
        let expected = self.template.fields()[index].data_type;
        if expected != data.data_type() {
            return Err(NetError::FieldType {
                field: name.to_owned(),
                requested: data.data_type(),
                actual: expected,
            });
        }
        self.fields[index] = data;
        Ok(())
    }

    /// Builder-style `set` for fields known to exist.
    #[must_use]
    pub fn with(mut self, name: &str, data: FieldData) -> Self {
        if let Err(err) = self.set(name, data) {
            tracing::warn!(target: "szg::record", "{err}");
        }
        self
    }

    /// Sets a one-element integer field.
    pub fn set_int(&mut self, name: &str, value: i32) -> NetResult<()> {
        self.set(name, FieldData::Int(vec![value]))
    }

    /// Sets an integer array field.
    pub fn set_ints(&mut self, name: &str, values: &[i32]) -> NetResult<()> {
        self.set(name, FieldData::Int(values.to_vec()))
    }

    /// Sets a float array field.
    pub fn set_floats(&mut self, name: &str, values: &[f32]) -> NetResult<()> {
        self.set(name, FieldData::Float(values.to_vec()))
    }

    /// Sets a string field.
    pub fn set_string(&mut self, name: &str, value: &str) -> NetResult<()> {
        self.set(name, FieldData::string(value))
    }

    /// First element of an integer field.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i32> {
        self.ints(name).and_then(|v| v.first().copied())
    }

    /// Integer field.
    #[must_use]
    pub fn ints(&self, name: &str) -> Option<&[i32]> {
        self.field(name).and_then(FieldData::as_ints)
    }

    /// Mutable integer field.
    pub fn ints_mut(&mut self, name: &str) -> Option<&mut Vec<i32>> {
        let index = self.template.field_index(name)?;
        match &mut self.fields[index] {
            FieldData::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Float field.
    #[must_use]
    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        self.field(name).and_then(FieldData::as_floats)
    }

    /// String field, lossily decoded.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<String> {
        self.field(name).and_then(FieldData::as_string)
    }

    /// Overwrites the first element of an integer field, growing it if empty.
    ///
    /// Later elements are left alone.
    pub fn patch_int(&mut self, name: &str, value: i32) -> bool {
        match self.ints_mut(name) {
            Some(v) if v.is_empty() => {
                v.push(value);
                true
            }
            Some(v) => {
                v[0] = value;
                true
            }
            None => false,
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RecordHeader::SIZE
            + self
                .fields
                .iter()
                .map(|f| FieldHeader::SIZE + f.byte_len())
                .sum::<usize>()
    }

    /// Appends the wire encoding to `out`.
    pub fn encode(&self, out: &mut WireWriter) {
        let size = i32::try_from(self.encoded_len()).unwrap_or(i32::MAX);
        let field_count = i32::try_from(self.fields.len()).unwrap_or(i32::MAX);
        out.write_pod(&RecordHeader { size, type_id: self.type_id(), field_count });
        for field in &self.fields {
            out.write_pod(&FieldHeader {
                dimension: i32::try_from(field.len()).unwrap_or(i32::MAX),
                data_type: field.data_type() as i32,
            });
            field.write_le(out.buffer_mut());
        }
    }

    /// Encodes into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(self.encoded_len());
        self.encode(&mut w);
        w.into_inner()
    }

    /// Decodes one record from the front of `bytes`, returning it and the
    /// number of bytes used.
    pub fn decode(dictionary: &Dictionary, bytes: &[u8]) -> NetResult<(Self, usize)> {
        let mut r = WireReader::new(bytes);
        let header: RecordHeader = r
            .read_pod()
            .ok_or_else(|| NetError::Protocol("record header truncated".into()))?;
        let size = usize::try_from(header.size)
            .ok()
            .filter(|&s| s >= RecordHeader::SIZE && s <= bytes.len())
            .ok_or_else(|| NetError::Protocol(format!("record size {} out of range", header.size)))?;
        let template = dictionary
            .get(header.type_id)
            .ok_or_else(|| NetError::Protocol(format!("unknown record type {}", header.type_id)))?;
        if usize::try_from(header.field_count).ok() != Some(template.fields().len()) {
            return Err(NetError::Protocol(format!(
                "'{}' has {} fields, record claims {}",
                template.name(),
                template.fields().len(),
                header.field_count
            )));
        }

        let mut r = WireReader::new(&bytes[RecordHeader::SIZE..size]);
        let mut fields = Vec::with_capacity(template.fields().len());
        for spec in template.fields() {
            let fh: FieldHeader = r
                .read_pod()
                .ok_or_else(|| NetError::Protocol(format!("field '{}' truncated", spec.name)))?;
            let data_type = DataType::from_i32(fh.data_type)
                .filter(|&t| t == spec.data_type)
                .ok_or_else(|| NetError::Protocol(format!("field '{}' has type {}", spec.name, fh.data_type)))?;
            let len = usize::try_from(fh.dimension)
                .map_err(|_| NetError::Protocol(format!("field '{}' has negative size", spec.name)))?;
            let data = FieldData::read_le(data_type, len, r.rest())
                .ok_or_else(|| NetError::Protocol(format!("field '{}' payload truncated", spec.name)))?;
            r.skip(data.byte_len());
            fields.push(data);
        }
        Ok((Self { template: Arc::clone(template), fields }, size))
    }

    /// Decodes every record in `bytes`.
    pub fn decode_all(dictionary: &Dictionary, mut bytes: &[u8]) -> NetResult<Vec<Self>> {
        let mut records = Vec::new();
        while !bytes.is_empty() {
            let (record, used) = Self::decode(dictionary, bytes)?;
            records.push(record);
            bytes = &bytes[used..];
        }
        Ok(records)
    }
}

impl fmt::Debug for StructuredRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.name())?;
        let mut map = f.debug_map();
        for (spec, data) in self.template.fields().iter().zip(&self.fields) {
            match data {
                FieldData::Char(_) => map.entry(&spec.name, &data.as_string()),
                _ => map.entry(&spec.name, data),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.add(
            RecordTemplate::new("make node")
                .with("parent_ID", DataType::Int)
                .with("ID", DataType::Int)
                .with("name", DataType::Char)
                .with("type", DataType::Char),
        );
        dict.add(
            RecordTemplate::new("transform")
                .with("ID", DataType::Int)
                .with("matrix", DataType::Float),
        );
        dict
    }

    #[test]
    fn test_wire_layout() {
        let dict = dictionary();
        let mut rec = StructuredRecord::new(dict.find("transform").unwrap());
        rec.set_int("ID", 4).unwrap();
        rec.set_floats("matrix", &[1.0, 2.0]).unwrap();
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), 12 + 8 + 4 + 8 + 8);
        assert_eq!(&bytes[..12], &[40, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(&bytes[12..20], &[1, 0, 0, 0, 1, 0, 0, 0]);

        let (decoded, used) = StructuredRecord::decode(&dict, &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_typed_access() {
        let dict = dictionary();
        let mut rec = StructuredRecord::new(dict.find("make node").unwrap());
        assert!(matches!(rec.set_floats("ID", &[1.0]), Err(NetError::FieldType { .. })));
        assert!(rec.set_int("nope", 1).is_err());
        rec.set_string("name", "head").unwrap();
        assert_eq!(rec.string("name").as_deref(), Some("head"));
        assert_eq!(rec.int("ID"), None);
        assert!(rec.patch_int("ID", 9));
        rec.ints_mut("ID").unwrap().push(77);
        assert!(rec.patch_int("ID", 10));
        assert_eq!(rec.ints("ID"), Some(&[10, 77][..]));
    }

    #[test]
    fn test_stream_decoding() {
        let dict = dictionary();
        let a = StructuredRecord::new(dict.find("make node").unwrap())
            .with("ID", FieldData::Int(vec![1]))
            .with("type", FieldData::string("transform"));
        let b = StructuredRecord::new(dict.find("transform").unwrap()).with("ID", FieldData::Int(vec![1]));
        let mut w = WireWriter::new();
        a.encode(&mut w);
        b.encode(&mut w);
        let all = StructuredRecord::decode_all(&dict, w.as_slice()).unwrap();
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn test_malformed_rejected() {
        let dict = dictionary();
        let rec = StructuredRecord::new(dict.find("transform").unwrap());
        let mut bytes = rec.to_bytes();
        assert!(StructuredRecord::decode(&dict, &bytes[..bytes.len() - 1]).is_err());
        bytes[4] = 9;
        assert!(StructuredRecord::decode(&dict, &bytes).is_err());
        bytes[4] = 1;
        assert!(StructuredRecord::decode(&dict, &bytes).is_ok());
        // Field 0 ("ID") header: dimension at 12..16, type tag at 16..20.
        bytes[16..20].copy_from_slice(&(DataType::Float as i32).to_le_bytes());
        assert!(StructuredRecord::decode(&dict, &bytes).is_err());
        bytes[16..20].copy_from_slice(&(DataType::Int as i32).to_le_bytes());
        bytes[12..16].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(StructuredRecord::decode(&dict, &bytes).is_err());
    }
}
