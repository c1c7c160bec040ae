//! # Core Error Types
//!
//! Errors raised by the input pipeline and the transfer-field registry.

use thiserror::Error;

use crate::data::DataType;
use crate::transfer::SessionPhase;

/// Errors from the input node and its sources, filters and sinks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// No filter with this ID is installed.
    #[error("no filter with id {0}")]
    UnknownFilter(u32),

    /// Sinks cannot be added while events are being buffered.
    #[error("cannot add a sink while buffering events")]
    SinkWhileBuffering,

    /// A source or sink refused to initialize.
    #[error("{0} failed to initialize")]
    InitFailed(String),

    /// A source or sink refused to start.
    #[error("{0} failed to start")]
    StartFailed(String),

    /// The signature would drop an event already held.
    #[error("signature too small: queue holds index {index} of {kind}")]
    SignatureTooSmall {
        /// Kind of channel that would be truncated.
        kind: &'static str,
        /// Highest index present.
        index: u32,
    },

    /// Parallel input buffers disagree in length or content.
    #[error("malformed input buffers: {0}")]
    MalformedBuffers(String),
}

/// Result type for input operations.
pub type InputResult<T> = Result<T, InputError>;

/// Errors from transfer-field registration and frame packing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Fields can only be added before the session runs.
    #[error("cannot add transfer field '{name}' in phase {phase:?}")]
    WrongPhase {
        /// Field that was rejected.
        name: String,
        /// Phase the registry was in.
        phase: SessionPhase,
    },

    /// Field names must be unique.
    #[error("duplicate transfer field '{0}'")]
    DuplicateName(String),

    /// Fields must hold at least one element.
    #[error("transfer field '{0}' has zero size")]
    ZeroSize(String),

    /// No field with this name.
    #[error("no transfer field '{0}'")]
    UnknownField(String),

    /// Field exists but with another element type.
    #[error("transfer field '{name}' is {actual}, not {requested}")]
    TypeMismatch {
        /// Field name.
        name: String,
        /// Type the caller asked for.
        requested: DataType,
        /// Type the field was registered with.
        actual: DataType,
    },

    /// A write did not match the registered element count.
    #[error("transfer field '{name}' holds {expected} elements, got {actual}")]
    SizeMismatch {
        /// Field name.
        name: String,
        /// Registered element count.
        expected: usize,
        /// Supplied element count.
        actual: usize,
    },

    /// Only internal fields can be resized.
    #[error("transfer field '{0}' is not resizable")]
    NotResizable(String),

    /// Master and slave registered different field sets.
    #[error("transfer schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A frame ended before every field was read.
    #[error("frame truncated while reading '{0}'")]
    Truncated(String),
}

/// Result type for transfer-field operations.
pub type TransferResult<T> = Result<T, TransferError>;
