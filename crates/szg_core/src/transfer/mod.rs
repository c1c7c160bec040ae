//! # Transfer Fields
//!
//! Named application state copied verbatim from the master to every slave
//! once per frame.
//!
//! ## Design
//!
//! - The registry owns the storage; the application reads and writes it
//!   through typed views
//! - Fields are packed in registration order, so master and slaves must
//!   register the same set in the same order (checked at handshake)
//! - Fixed fields carry no header; internal fields are prefixed with a
//!   `u32` element count and resize on receipt
//!
//! ```text
//!  Unconfigured ──add_field──► Registering ──start──► Running ──stop──► Stopped
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::data::{DataType, FieldData};
use crate::error::{TransferError, TransferResult};

/// Lifecycle of a registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing registered yet.
    #[default]
    Unconfigured,
    /// Fields are being added.
    Registering,
    /// Frames are being exchanged; the field set is frozen.
    Running,
    /// The session has ended.
    Stopped,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Description of one field as exchanged at handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
    /// Element count at registration.
    pub count: usize,
    /// Whether the master may resize it per frame.
    pub resizable: bool,
}

impl FieldSchema {
    /// Whether two descriptions can exchange frames.
    ///
    /// Counts of resizable fields may differ.
    #[must_use]
    pub fn compatible(&self, other: &Self) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.resizable == other.resizable
            && (self.resizable || self.count == other.count)
    }
}

struct TransferField {
    name: String,
    resizable: bool,
    data: FieldData,
}

/// Ordered table of transfer fields.
#[derive(Default)]
pub struct TransferRegistry {
    phase: SessionPhase,
    fields: Vec<TransferField>,
    by_name: HashMap<String, usize>,
}

impl TransferRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Number of registered fields.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Registers a fixed-size field, zero-filled.
    pub fn add_field(&mut self, name: &str, data_type: DataType, count: usize) -> TransferResult<()> {
        self.register(name, FieldData::zeroed(data_type, count), false)
    }

    /// Registers a field the master may resize per frame.
    pub fn add_internal_field(&mut self, name: &str, data_type: DataType, count: usize) -> TransferResult<()> {
        self.register(name, FieldData::zeroed(data_type, count), true)
    }

    fn register(&mut self, name: &str, data: FieldData, resizable: bool) -> TransferResult<()> {
        match self.phase {
            SessionPhase::Unconfigured | SessionPhase::Registering => {}
            phase => {
                tracing::warn!(target: "szg::transfer", "'{name}' added in phase {phase}");
                return Err(TransferError::WrongPhase { name: name.to_owned(), phase });
            }
        }
        if self.by_name.contains_key(name) {
            return Err(TransferError::DuplicateName(name.to_owned()));
        }
        if data.is_empty() && !resizable {
            return Err(TransferError::ZeroSize(name.to_owned()));
        }
        self.by_name.insert(name.to_owned(), self.fields.len());
        self.fields.push(TransferField { name: name.to_owned(), resizable, data });
        self.phase = SessionPhase::Registering;
        Ok(())
    }

    /// Freezes the field set.
    pub fn start(&mut self) {
        self.phase = SessionPhase::Running;
    }

    /// Ends the session.
    pub fn stop(&mut self) {
        self.phase = SessionPhase::Stopped;
    }

    /// Description of every field in registration order.
    #[must_use]
    pub fn schema(&self) -> Vec<FieldSchema> {
        self.fields
            .iter()
            .map(|f| FieldSchema {
                name: f.name.clone(),
                data_type: f.data.data_type(),
                count: f.data.len(),
                resizable: f.resizable,
            })
            .collect()
    }

    /// Checks that a remote field set matches ours field by field.
    pub fn check_schema(&self, remote: &[FieldSchema]) -> TransferResult<()> {
        let local = self.schema();
        if local.len() != remote.len() {
            return Err(TransferError::SchemaMismatch(format!(
                "{} local fields, {} remote",
                local.len(),
                remote.len()
            )));
        }
        for (i, (l, r)) in local.iter().zip(remote).enumerate() {
            if !l.compatible(r) {
                return Err(TransferError::SchemaMismatch(format!(
                    "field {i}: local {} {}[{}], remote {} {}[{}]",
                    l.name, l.data_type, l.count, r.name, r.data_type, r.count
                )));
            }
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> TransferResult<&TransferField> {
        self.by_name
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| TransferError::UnknownField(name.to_owned()))
    }

    fn entry_mut(&mut self, name: &str) -> TransferResult<&mut TransferField> {
        match self.by_name.get(name) {
            Some(&i) => Ok(&mut self.fields[i]),
            None => Err(TransferError::UnknownField(name.to_owned())),
        }
    }

    /// Field storage, checked against the expected element type.
    pub fn field(&self, name: &str, data_type: DataType) -> TransferResult<&FieldData> {
        let entry = self.entry(name)?;
        let actual = entry.data.data_type();
        if actual != data_type {
            return Err(TransferError::TypeMismatch { name: name.to_owned(), requested: data_type, actual });
        }
        Ok(&entry.data)
    }

    /// Mutable field storage, checked against the expected element type.
    pub fn field_mut(&mut self, name: &str, data_type: DataType) -> TransferResult<&mut FieldData> {
        let entry = self.entry_mut(name)?;
        let actual = entry.data.data_type();
        if actual != data_type {
            return Err(TransferError::TypeMismatch { name: name.to_owned(), requested: data_type, actual });
        }
        Ok(&mut entry.data)
    }

    /// Integer view of a field.
    pub fn ints(&self, name: &str) -> TransferResult<&[i32]> {
        Ok(self.field(name, DataType::Int)?.as_ints().unwrap_or_default())
    }

    /// Mutable integer view of a field.
    pub fn ints_mut(&mut self, name: &str) -> TransferResult<&mut [i32]> {
        Ok(self.field_mut(name, DataType::Int)?.as_ints_mut().unwrap_or_default())
    }

    /// Float view of a field.
    pub fn floats(&self, name: &str) -> TransferResult<&[f32]> {
        Ok(self.field(name, DataType::Float)?.as_floats().unwrap_or_default())
    }

    /// Mutable float view of a field.
    pub fn floats_mut(&mut self, name: &str) -> TransferResult<&mut [f32]> {
        Ok(self.field_mut(name, DataType::Float)?.as_floats_mut().unwrap_or_default())
    }

    /// Byte view of a field.
    pub fn bytes(&self, name: &str) -> TransferResult<&[u8]> {
        Ok(self.field(name, DataType::Char)?.as_bytes().unwrap_or_default())
    }

    /// Mutable byte view of a field.
    pub fn bytes_mut(&mut self, name: &str) -> TransferResult<&mut [u8]> {
        Ok(self.field_mut(name, DataType::Char)?.as_bytes_mut().unwrap_or_default())
    }

    /// Long view of a field.
    pub fn longs(&self, name: &str) -> TransferResult<&[i64]> {
        Ok(self.field(name, DataType::Long)?.as_longs().unwrap_or_default())
    }

    /// Mutable long view of a field.
    pub fn longs_mut(&mut self, name: &str) -> TransferResult<&mut [i64]> {
        Ok(self.field_mut(name, DataType::Long)?.as_longs_mut().unwrap_or_default())
    }

    /// Double view of a field.
    pub fn doubles(&self, name: &str) -> TransferResult<&[f64]> {
        Ok(self.field(name, DataType::Double)?.as_doubles().unwrap_or_default())
    }

    /// Mutable double view of a field.
    pub fn doubles_mut(&mut self, name: &str) -> TransferResult<&mut [f64]> {
        Ok(self.field_mut(name, DataType::Double)?.as_doubles_mut().unwrap_or_default())
    }

    /// Replaces a field's contents. The type must match and, for fixed
    /// fields, so must the element count.
    pub fn set(&mut self, name: &str, data: FieldData) -> TransferResult<()> {
        let entry = self.entry_mut(name)?;
        let actual = entry.data.data_type();
        if actual != data.data_type() {
            return Err(TransferError::TypeMismatch {
                name: name.to_owned(),
                requested: data.data_type(),
                actual,
            });
        }
        if !entry.resizable && entry.data.len() != data.len() {
            return Err(TransferError::SizeMismatch {
                name: name.to_owned(),
                expected: entry.data.len(),
                actual: data.len(),
            });
        }
        entry.data = data;
        Ok(())
    }

    /// Resizes an internal field, zero-filling new elements.
    pub fn set_internal_field_size(&mut self, name: &str, count: usize) -> TransferResult<()> {
        let entry = self.entry_mut(name)?;
        if !entry.resizable {
            return Err(TransferError::NotResizable(name.to_owned()));
        }
        entry.data.resize(count);
        Ok(())
    }

    /// Encoded size of the current frame.
    #[must_use]
    pub fn packed_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.data.byte_len() + if f.resizable { 4 } else { 0 })
            .sum()
    }

    /// Appends every field, in registration order, to `out`.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.reserve(self.packed_len());
        for field in &self.fields {
            if field.resizable {
                let count = u32::try_from(field.data.len()).unwrap_or(u32::MAX);
                out.extend_from_slice(&count.to_le_bytes());
            }
            field.data.write_le(out);
        }
    }

    /// Reads a frame written by `pack` on a registry with the same schema.
    ///
    /// Nothing is changed unless the whole frame decodes. Returns the number
    /// of bytes consumed.
    pub fn unpack(&mut self, bytes: &[u8]) -> TransferResult<usize> {
        let mut decoded = Vec::with_capacity(self.fields.len());
        let mut pos = 0usize;
        for field in &self.fields {
            let count = if field.resizable {
                let raw = bytes
                    .get(pos..pos + 4)
                    .ok_or_else(|| TransferError::Truncated(field.name.clone()))?;
                pos += 4;
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            } else {
                field.data.len()
            };
            let data = FieldData::read_le(field.data.data_type(), count, &bytes[pos..])
                .ok_or_else(|| TransferError::Truncated(field.name.clone()))?;
            pos += data.byte_len();
            decoded.push(data);
        }
        for (field, data) in self.fields.iter_mut().zip(decoded) {
            field.data = data;
        }
        Ok(pos)
    }
}

impl fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("phase", &self.phase)
            .field("fields", &self.schema())
            .finish()
    }
}
