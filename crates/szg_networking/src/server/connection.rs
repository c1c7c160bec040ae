//! # Connection Management
//!
//! Identity, lifecycle state and the send half of each live connection.
//!
//! ## Design
//!
//! - IDs are never reused within one server
//! - State is an atomic so fan-out can filter without the table lock
//! - Each writer has its own lock; one slow connection never blocks another

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::NetResult;
use crate::transport::{FrameKind, FrameWriter, ShutdownHandle, TransportStats};

/// Unique identifier for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Invalid/null connection ID.
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is a null/invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, waiting for its initial state.
    #[default]
    Pending = 0,
    /// Receiving live updates.
    Active = 1,
    /// Shut down, awaiting removal.
    Closed = 2,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// Public snapshot of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// Label given at connect time, or the remote address.
    pub label: String,
    /// Remote address.
    pub addr: Option<SocketAddr>,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Traffic counters.
    pub stats: TransportStats,
}

pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) label: String,
    pub(crate) addr: Option<SocketAddr>,
    writer: Mutex<FrameWriter>,
    shutdown: Option<ShutdownHandle>,
    state: AtomicU8,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, label: String, writer: FrameWriter) -> Self {
        let addr = writer.peer_addr().ok();
        let shutdown = writer.shutdown_handle().ok();
        Self {
            id,
            label,
            addr,
            writer: Mutex::new(writer),
            shutdown,
            state: AtomicU8::new(ConnectionState::Pending as u8),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn send(&self, kind: FrameKind, payload: &[u8]) -> NetResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::error::NetError::Closed);
        }
        self.writer.lock().send(kind, payload)
    }

    /// Shuts the socket down once. The reader thread sees the error and
    /// removes the connection.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.set_state(ConnectionState::Closed);
        match &self.shutdown {
            Some(handle) => handle.shutdown(),
            None => self.writer.lock().shutdown(),
        }
        true
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            label: self.label.clone(),
            addr: self.addr,
            state: self.state(),
            stats: self.writer.lock().stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_id() {
        assert!(ConnectionId::default().is_null());
        assert!(!ConnectionId(0).is_null());
        assert_eq!(ConnectionId(3).to_string(), "#3");
    }

    #[test]
    fn test_state_tags() {
        for state in [ConnectionState::Pending, ConnectionState::Active, ConnectionState::Closed] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }
}
