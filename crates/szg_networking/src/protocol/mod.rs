//! # Wire Protocol
//!
//! Record-based encoding shared by the replication and input links.
//!
//! ## Record Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (12 bytes)                                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ size:i32 │ type_id:i32 │ field_count:i32                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ per field: dimension:i32 │ data_type:i32 │ payload           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - Type IDs are only meaningful against a dictionary sent first
//! - Everything is little-endian
//! - Malformed bytes produce an error, never a panic

mod dictionary;
pub mod input;
mod language;
mod record;
mod serialization;

pub use dictionary::{Dictionary, FieldSpec, RecordTemplate};
pub use language::{GraphicsLanguage, RecordKind};
pub use record::StructuredRecord;
pub use serialization::{FieldHeader, RecordHeader, WireReader, WireWriter};
