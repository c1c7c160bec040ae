//! # SZG Networking
//!
//! Everything that crosses a socket in a cluster application.
//!
//! ## Architecture
//!
//! - **Protocol**: self-describing records checked against a dictionary
//! - **Transport**: length-prefixed frames over blocking TCP
//! - **Database**: the scene graph, mutated only through `alter()`
//! - **Replication**: sync server, graphics server/client and peers
//! - **Master/slave**: per-frame copy of transfer fields and input
//! - **Input**: filtered input forwarded between nodes
//!
//! ## Replication Model
//!
//! ```text
//!  application ──alter()──▶ Database ──queued under the same lock──▶ connections
//!                               ▲
//!  connection ──records─────────┘  (same alter() path)
//! ```
//!
//! A late joiner receives a snapshot taken under the lock that also orders
//! the incremental stream, so it never sees a tree that did not exist.
//!
//! ## Example
//!
//! ```rust,ignore
//! use szg_networking::{GraphicsClient, GraphicsServer, SyncServerConfig, ROOT_ID};
//!
//! let server = GraphicsServer::new(SyncServerConfig::default())?;
//! let addr = server.listen("127.0.0.1:0".parse()?)?;
//! let world = server.new_node(ROOT_ID, "world", "transform")?;
//!
//! let client = GraphicsClient::new();
//! client.connect(addr)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod database;
pub mod error;
pub mod graphics;
pub mod input_net;
pub mod logging;
pub mod master_slave;
pub mod protocol;
pub mod server;
pub mod transport;

pub use config::SzgConfig;
pub use database::{Database, DatabaseNode, NodeKind, NodeLevel, ROOT_ID};
pub use error::{DatabaseError, DatabaseResult, NetError, NetResult};
pub use graphics::{AdminAction, GraphicsClient, GraphicsPeer, GraphicsServer, LockHolder, PeerConfig, SerialOptions};
pub use input_net::{NetInputSink, NetInputSource};
pub use master_slave::{
    ClusterApp, ClusterNode, ExchangeReport, FrameContext, FrameReport, MasterConfig, MasterSync, Role, SlaveSync,
};
pub use protocol::{Dictionary, GraphicsLanguage, RecordKind, StructuredRecord};
pub use server::{ConnectionId, DataServer, SyncDataServer, SyncMode, SyncServerConfig};
