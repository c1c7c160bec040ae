//! # Data Servers
//!
//! Connection tables and the two server flavours built on them.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ SyncDataServer                               │
//! │   send queue ─▶ flush ─▶ snapshot / deltas   │
//! ├──────────────────────────────────────────────┤
//! │ DataServer                                   │
//! │   accept thread, reader thread per conn      │
//! ├──────────────────────────────────────────────┤
//! │ Connection: id, label, state, framed writer  │
//! └──────────────────────────────────────────────┘
//! ```

mod connection;
mod data_server;
mod sync_server;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionState};
pub use data_server::{ConnectionHandler, DataServer, DataServerConfig};
pub use sync_server::{SyncDataServer, SyncHandle, SyncMode, SyncServerConfig, SyncTarget};
