//! # Master/Slave Synchronization
//!
//! Every frame the master copies its transfer fields and input to all
//! slaves, and no process draws until every slave has the frame.
//!
//! ```text
//!   slave ──Handshake(schema)──▶ master
//!   slave ◀──HandshakeReply───── master     at a frame boundary
//!   slave ◀──MasterFrame(n)───── master
//!   slave ───Ack(n)────────────▶ master     master blocks until all acks
//! ```

mod framework;
mod master;
mod message;
mod slave;

pub use framework::{ClusterApp, ClusterNode, FrameContext, FrameReport, Role};
pub use master::{ExchangeReport, MasterConfig, MasterSync};
pub use message::{FrameMessage, Hello};
pub use slave::SlaveSync;
