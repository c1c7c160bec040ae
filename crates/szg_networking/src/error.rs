//! # Networking Error Types
//!
//! Errors raised by the wire codecs, the scene-graph database and the
//! connection layers.

use std::io;

use szg_core::{DataType, TransferError};
use thiserror::Error;

/// Errors from the scene-graph database.
///
/// A failing `alter()` leaves the tree untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// No node has this ID.
    #[error("no node with id {0}")]
    UnknownNode(i32),

    /// The node type name is not registered.
    #[error("unknown node type '{0}'")]
    UnknownType(String),

    /// An existing node has the requested ID but another type.
    #[error("node {id} is a {existing}, not a {requested}")]
    TypeConflict {
        /// Requested ID.
        id: i32,
        /// Type of the node already there.
        existing: String,
        /// Type the record asked for.
        requested: String,
    },

    /// The record type cannot be applied here.
    #[error("record '{actual}' cannot be applied to a {expected} node")]
    WrongRecord {
        /// Record the node understands.
        expected: String,
        /// Record that was received.
        actual: String,
    },

    /// A required field is absent or empty.
    #[error("record '{record}' is missing field '{field}'")]
    MissingField {
        /// Record name.
        record: String,
        /// Field name.
        field: &'static str,
    },

    /// A field holds data of the wrong shape.
    #[error("record '{record}' field '{field}': {reason}")]
    BadField {
        /// Record name.
        record: String,
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The node named as a child is not a child of the named parent.
    #[error("node {child} is not a child of {parent}")]
    NotChild {
        /// Parent ID.
        parent: i32,
        /// Child ID.
        child: i32,
    },

    /// The root node cannot be erased, cut or re-typed.
    #[error("the root node cannot be changed this way")]
    RootImmutable,

    /// Another party holds a lock on the node.
    #[error("node {0} is locked")]
    Locked(i32),

    /// No node ID is left above the requested one.
    #[error("node id space exhausted at {0}")]
    IdsExhausted(i32),

    /// Reading or writing a database file failed.
    #[error("database file: {0}")]
    File(String),
}

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors from sockets, framing and the protocols on top of them.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Bytes that do not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote end uses another record dictionary.
    #[error("dictionary mismatch: {0}")]
    DictionaryMismatch(String),

    /// A record field was requested with the wrong type.
    #[error("field '{field}' is {actual}, not {requested}")]
    FieldType {
        /// Field name.
        field: String,
        /// Type the caller asked for.
        requested: DataType,
        /// Type in the template.
        actual: DataType,
    },

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// No reply arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A connection label is already in use.
    #[error("connection label '{0}' already in use")]
    DuplicateLabel(String),

    /// No connection has this label or ID.
    #[error("no connection '{0}'")]
    UnknownConnection(String),

    /// The operation only makes sense on the master.
    #[error("{0} is only allowed on the master")]
    MasterOnly(String),

    /// Transfer-field failure.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Database failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Unusable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
