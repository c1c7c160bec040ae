//! # Record Dictionary
//!
//! Templates name the fields of each record type. Both ends of a connection
//! exchange their dictionary before any record, and type IDs are only
//! meaningful relative to it.

use std::collections::HashMap;
use std::sync::Arc;

use szg_core::DataType;

use crate::error::{NetError, NetResult};
use crate::protocol::serialization::{WireReader, WireWriter};

/// One named, typed field of a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
}

/// Layout of one record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordTemplate {
    id: i32,
    name: String,
    fields: Vec<FieldSpec>,
}

impl RecordTemplate {
    /// Creates a template with no fields. Its ID is assigned by the dictionary.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { id: -1, name: name.to_owned(), fields: Vec::new() }
    }

    /// Builder-style `add`.
    #[must_use]
    pub fn with(mut self, field: &str, data_type: DataType) -> Self {
        self.add(field, data_type);
        self
    }

    /// Appends a field and returns its position.
    pub fn add(&mut self, field: &str, data_type: DataType) -> usize {
        self.fields.push(FieldSpec { name: field.to_owned(), data_type });
        self.fields.len() - 1
    }

    /// Type ID, or -1 before registration.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Template name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in order.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of a field by name.
    #[must_use]
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }
}

/// Ordered set of templates. IDs are positions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dictionary {
    templates: Vec<Arc<RecordTemplate>>,
    by_name: HashMap<String, i32>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template and returns its ID. A name already present
    /// returns the existing ID.
    pub fn add(&mut self, mut template: RecordTemplate) -> i32 {
        if let Some(&id) = self.by_name.get(&template.name) {
            return id;
        }
        let id = i32::try_from(self.templates.len()).unwrap_or(i32::MAX);
        template.id = id;
        self.by_name.insert(template.name.clone(), id);
        self.templates.push(Arc::new(template));
        id
    }

    /// Number of templates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no template is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template by ID.
    #[must_use]
    pub fn get(&self, id: i32) -> Option<&Arc<RecordTemplate>> {
        usize::try_from(id).ok().and_then(|i| self.templates.get(i))
    }

    /// Template by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<RecordTemplate>> {
        self.by_name.get(name).and_then(|&id| self.get(id))
    }

    /// Templates in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordTemplate>> {
        self.templates.iter()
    }

    /// Appends the dictionary encoding to `out`.
    ///
    /// Layout: `count:u32`, then per template `name`, `field_count:u32` and
    /// per field `name`, `data_type:i32`.
    pub fn encode(&self, out: &mut WireWriter) {
        out.write_u32(u32::try_from(self.templates.len()).unwrap_or(u32::MAX));
        for template in &self.templates {
            out.write_str(&template.name);
            out.write_u32(u32::try_from(template.fields.len()).unwrap_or(u32::MAX));
            for field in &template.fields {
                out.write_str(&field.name);
                out.write_i32(field.data_type as i32);
            }
        }
    }

    /// Decodes a dictionary written by `encode`.
    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        let bad = |what: &str| NetError::Protocol(format!("dictionary: bad {what}"));
        let mut r = WireReader::new(bytes);
        let count = r.read_u32().ok_or_else(|| bad("count"))?;
        let mut dict = Self::new();
        for _ in 0..count {
            let name = r.read_str().ok_or_else(|| bad("template name"))?;
            let fields = r.read_u32().ok_or_else(|| bad("field count"))?;
            let mut template = RecordTemplate::new(&name);
            for _ in 0..fields {
                let field = r.read_str().ok_or_else(|| bad("field name"))?;
                let data_type = r
                    .read_i32()
                    .and_then(DataType::from_i32)
                    .ok_or_else(|| bad("field type"))?;
                template.add(&field, data_type);
            }
            dict.add(template);
        }
        Ok(dict)
    }

    /// Describes the first difference from `other`, or `None` if identical.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Option<String> {
        if self.len() != other.len() {
            return Some(format!("{} templates here, {} there", self.len(), other.len()));
        }
        self.templates
            .iter()
            .zip(&other.templates)
            .find(|(a, b)| a != b)
            .map(|(a, b)| format!("template {} is '{}' here, '{}' there", a.id, a.name, b.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.add(RecordTemplate::new("erase").with("ID", DataType::Int));
        dict.add(
            RecordTemplate::new("texture")
                .with("ID", DataType::Int)
                .with("file", DataType::Char)
                .with("pixels", DataType::Char),
        );
        dict
    }

    #[test]
    fn test_ids_are_positions() {
        let mut dict = sample();
        assert_eq!(dict.find("texture").map(|t| t.id()), Some(1));
        assert_eq!(dict.get(0).map(|t| t.name()), Some("erase"));
        assert_eq!(dict.add(RecordTemplate::new("erase")), 0);
        assert_eq!(dict.find("texture").and_then(|t| t.field_index("pixels")), Some(2));
        assert!(dict.get(-1).is_none());
    }

    #[test]
    fn test_encoding_preserves_dictionary() {
        let dict = sample();
        let mut w = WireWriter::new();
        dict.encode(&mut w);
        let decoded = Dictionary::decode(w.as_slice()).unwrap();
        assert_eq!(decoded, dict);
        assert!(dict.difference(&decoded).is_none());
    }

    #[test]
    fn test_difference_reported() {
        let mut other = Dictionary::new();
        other.add(RecordTemplate::new("cut").with("ID", DataType::Int));
        other.add(RecordTemplate::new("texture"));
        assert!(sample().difference(&other).is_some());
        assert!(Dictionary::decode(&[5, 0, 0, 0]).is_err());
    }
}
