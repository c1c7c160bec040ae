//! # SZG Core
//!
//! Frame-level state shared by every process of a cluster application:
//! - Input events, queues and the filtered `InputState`
//! - The `InputNode` pipeline from sources through filters to sinks
//! - The transfer-field registry copied from master to slaves each frame
//!
//! ## Architecture Rules
//!
//! 1. **No globals** - every pipeline and registry is an owned value
//! 2. **Typed data** - field payloads are `FieldData`, never raw memory
//! 3. **Fail locally** - misuse is reported to the caller as an error value
//!
//! ## Example
//!
//! ```rust,ignore
//! use szg_core::{GeneratorSource, InputNode, Signature};
//!
//! let node = InputNode::new("wand");
//! let wand = GeneratorSource::new(Signature::new(6, 2, 1));
//! node.add_source(Box::new(wand.clone()), true);
//! node.start()?;
//! wand.send_button(0, 1);
//! assert!(node.on_button(0));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod data;
pub mod error;
pub mod input;
pub mod math;
pub mod transfer;

pub use data::{DataType, FieldData};
pub use error::{InputError, InputResult, TransferError, TransferResult};
pub use input::{
    EventKind, EventQueue, FilterId, FilterSettings, GeneratorSource, InputEvent, InputNode,
    InputSink, InputSource, InputState, IoFilter, QueueSink, Signature, SourceHandle,
};
pub use math::Matrix4;
pub use transfer::{FieldSchema, SessionPhase, TransferRegistry};
