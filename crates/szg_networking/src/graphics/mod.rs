//! # Scene-Graph Replication
//!
//! ```text
//!  GraphicsServer ──snapshot, deltas──▶ GraphicsClient
//!        ▲
//!        │ records
//!  GraphicsPeer ◀──pull / push / relay──▶ GraphicsPeer
//! ```
//!
//! Every replica applies what it receives through `Database::alter`, the
//! same path local changes take.

mod admin;
mod client;
mod peer;
mod server;

pub use admin::AdminAction;
pub use client::GraphicsClient;
pub use peer::{GraphicsPeer, LockHolder, PeerConfig, SerialOptions};
pub use server::GraphicsServer;
