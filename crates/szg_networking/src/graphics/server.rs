//! # Graphics Server
//!
//! Owns the authoritative scene graph and replicates it.
//!
//! ## Design
//!
//! - Every alteration, local or received, runs inside the sync server's
//!   queue lock, then its record is queued for every live connection
//! - The late-joiner snapshot is the database dump taken under that lock
//! - Nodes are `Arc`s, so a node erased while a caller still holds it lives
//!   until that caller drops it

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use crate::database::{Database, DatabaseNode};
use crate::error::{DatabaseResult, NetResult};
use crate::protocol::{GraphicsLanguage, StructuredRecord, WireWriter};
use crate::server::{ConnectionId, SyncDataServer, SyncHandle, SyncServerConfig, SyncTarget};

struct Replicated {
    database: Database,
}

impl Replicated {
    fn alter_and_queue(&self, queue: &mut WireWriter, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let node = self.database.alter(record)?;
        record.encode(queue);
        Ok(node)
    }
}

impl SyncTarget for Replicated {
    fn dump_state(&self, out: &mut WireWriter) {
        for record in self.database.dump() {
            record.encode(out);
        }
    }

    fn on_records(&self, server: &SyncHandle, conn: ConnectionId, bytes: &[u8]) {
        let records = match StructuredRecord::decode_all(self.database.language().dictionary(), bytes) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(target: "szg::graphics", "dropping unreadable batch from {conn}: {err}");
                return;
            }
        };
        for mut record in records {
            let result = server.with_send_queue(|queue| self.alter_and_queue(queue, &mut record));
            if let Err(err) = result {
                tracing::warn!(target: "szg::graphics", "{} from {conn} rejected: {err}", record.name());
            }
        }
    }

    fn on_connect(&self, _server: &SyncHandle, conn: ConnectionId) {
        tracing::info!(target: "szg::graphics", "client {conn} has the scene");
    }
}

/// Scene-graph database with a replication server in front of it.
pub struct GraphicsServer {
    state: Arc<Replicated>,
    sync: SyncDataServer,
}

impl GraphicsServer {
    /// Creates a server with an empty database.
    pub fn new(mut config: SyncServerConfig) -> NetResult<Self> {
        let database = Database::new();
        config.dictionary = Some(Arc::clone(database.language().dictionary()));
        let state = Arc::new(Replicated { database });
        let target: Weak<dyn SyncTarget> = Arc::downgrade(&state) as Weak<dyn SyncTarget>;
        let sync = SyncDataServer::new(config, target)?;
        Ok(Self { state, sync })
    }

    /// Starts accepting clients.
    pub fn listen(&self, addr: SocketAddr) -> NetResult<SocketAddr> {
        self.sync.listen(addr)
    }

    /// Bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sync.local_addr()
    }

    /// The database. Read it freely; change it only through [`Self::alter`].
    #[inline]
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.state.database
    }

    /// Record builders matching the database dictionary.
    #[inline]
    #[must_use]
    pub fn language(&self) -> &GraphicsLanguage {
        self.state.database.language()
    }

    /// Applies a record and queues it for every live client.
    pub fn alter(&self, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let result = self.sync.with_send_queue(|queue| self.state.alter_and_queue(queue, record));
        if let Err(err) = &result {
            tracing::warn!(target: "szg::graphics", "alter {} failed: {err}", record.name());
        }
        result
    }

    /// Creates a node through [`Self::alter`].
    pub fn new_node(&self, parent: i32, name: &str, type_name: &str) -> DatabaseResult<Arc<DatabaseNode>> {
        let mut record = self.language().make_node(parent, -1, name, type_name);
        self.alter(&mut record)
    }

    /// Flushes queued records (manual mode).
    pub fn swap_buffers(&self) {
        self.sync.swap_buffers();
    }

    /// Clients connected, snapshot or not.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sync.connection_count()
    }

    /// Clients that received the snapshot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sync.active_count()
    }

    /// Flushes and closes every connection.
    pub fn stop(&self) {
        self.sync.stop();
    }
}

impl std::fmt::Debug for GraphicsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsServer")
            .field("database", &self.state.database)
            .field("sync", &self.sync)
            .finish()
    }
}
