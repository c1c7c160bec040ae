//! # Scene-Graph Database
//!
//! The replicated node tree shared by graphics servers, clients and peers.
//!
//! ## Architecture
//!
//! ```text
//!  record ──▶ Database::alter ──▶ tree change or node.receive_data
//!                                  │
//!  Database::dump ◀── pre-order ───┘  make node + payload per node
//! ```

mod graph;
mod node;
mod payload;
mod registry;

pub use graph::{Database, ROOT_ID};
pub use node::{DatabaseNode, NodeKind, NodeLevel};
pub use payload::{BoundingSphereData, DrawableData, GraphicsStateData, MaterialData, NodePayload, TextureData};
pub use registry::{NodeConstructor, NodeRegistry};
