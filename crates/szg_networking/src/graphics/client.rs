//! # Graphics Client
//!
//! Mirrors a graphics server's scene graph into a local database.
//!
//! The first `Records` frame on a connection is the server's snapshot; every
//! later frame is a batch of alterations in server order. Frames and
//! disconnects from a connection other than the current one are dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::database::Database;
use crate::error::{NetError, NetResult};
use crate::protocol::{GraphicsLanguage, StructuredRecord, WireWriter};
use crate::server::{ConnectionHandler, ConnectionId, DataServer, DataServerConfig};
use crate::transport::{Frame, FrameKind};

struct Mirror {
    database: Database,
    current: Mutex<Option<ConnectionId>>,
    connected: AtomicBool,
    batches: AtomicU64,
    progress: Mutex<()>,
    changed: Condvar,
}

impl Mirror {
    fn notify(&self) {
        let _guard = self.progress.lock();
        self.changed.notify_all();
    }

    fn is_current(&self, conn: ConnectionId) -> bool {
        *self.current.lock() == Some(conn)
    }
}

impl ConnectionHandler for Mirror {
    fn on_connect(&self, _server: &DataServer, conn: ConnectionId) {
        *self.current.lock() = Some(conn);
        self.connected.store(true, Ordering::Release);
        tracing::info!(target: "szg::graphics", "client connected as {conn}");
        self.notify();
    }

    fn on_frame(&self, _server: &DataServer, conn: ConnectionId, frame: Frame) {
        if !self.is_current(conn) {
            tracing::debug!(target: "szg::graphics", "client drops stale {:?} from {conn}", frame.kind);
            return;
        }
        if frame.kind != FrameKind::Records {
            tracing::debug!(target: "szg::graphics", "client ignores {:?} from {conn}", frame.kind);
            return;
        }
        let applied = self.database.handle_data_queue(&frame.payload);
        let batch = self.batches.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(target: "szg::graphics", "batch {batch}: {applied} records applied");
        self.notify();
    }

    fn on_disconnect(&self, _server: &DataServer, conn: ConnectionId) {
        {
            let mut current = self.current.lock();
            if *current != Some(conn) {
                return;
            }
            *current = None;
        }
        self.connected.store(false, Ordering::Release);
        tracing::error!(target: "szg::graphics", "lost graphics server {conn}");
        self.notify();
    }
}

/// Local replica of a graphics server.
pub struct GraphicsClient {
    mirror: Arc<Mirror>,
    server: DataServer,
    connection: Mutex<Option<ConnectionId>>,
}

impl Default for GraphicsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new() -> Self {
        let mirror = Arc::new(Mirror {
            database: Database::new(),
            current: Mutex::new(None),
            connected: AtomicBool::new(false),
            batches: AtomicU64::new(0),
            progress: Mutex::new(()),
            changed: Condvar::new(),
        });
        let config = DataServerConfig {
            name: "graphics-client".into(),
            dictionary: Some(Arc::clone(mirror.database.language().dictionary())),
            ..DataServerConfig::default()
        };
        let handler: Weak<dyn ConnectionHandler> = Arc::downgrade(&mirror) as Weak<dyn ConnectionHandler>;
        let server = DataServer::new(config, handler);
        Self { mirror, server, connection: Mutex::new(None) }
    }

    /// Connects to a server, dropping any previous replica.
    pub fn connect(&self, addr: SocketAddr) -> NetResult<()> {
        let mut connection = self.connection.lock();
        *self.mirror.current.lock() = None;
        if let Some(old) = connection.take() {
            self.server.close(old);
        }
        self.mirror.connected.store(false, Ordering::Release);
        self.mirror.database.reset();
        self.mirror.batches.store(0, Ordering::Release);
        *connection = Some(self.server.connect(addr, "graphics-server")?);
        Ok(())
    }

    /// Whether the server connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.mirror.connected.load(Ordering::Acquire)
    }

    /// Batches received on the current connection, the snapshot included.
    #[must_use]
    pub fn batches_received(&self) -> u64 {
        self.mirror.batches.load(Ordering::Acquire)
    }

    /// The replica.
    #[inline]
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.mirror.database
    }

    /// Record builders matching the server dictionary.
    #[inline]
    #[must_use]
    pub fn language(&self) -> &GraphicsLanguage {
        self.mirror.database.language()
    }

    /// Sends a record to the server. It reaches the replica when the server
    /// echoes it.
    pub fn send(&self, record: &StructuredRecord) -> NetResult<()> {
        let id = (*self.connection.lock()).ok_or(NetError::Closed)?;
        let mut w = WireWriter::with_capacity(record.encoded_len());
        record.encode(&mut w);
        self.server.send_to(id, FrameKind::Records, w.as_slice())
    }

    /// Blocks until `ready` holds for the replica or `timeout` passes.
    pub fn wait_until(&self, timeout: Duration, mut ready: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.mirror.progress.lock();
        loop {
            if ready(self) {
                return true;
            }
            if self.mirror.changed.wait_until(&mut guard, deadline).timed_out() {
                return ready(self);
            }
        }
    }

    /// Closes the connection.
    pub fn disconnect(&self) {
        if let Some(id) = self.connection.lock().take() {
            self.server.close(id);
        }
    }

    /// Closes the connection and joins the reader.
    pub fn stop(&self) {
        self.disconnect();
        self.server.stop();
    }
}

impl std::fmt::Debug for GraphicsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsClient")
            .field("connected", &self.is_connected())
            .field("database", &self.mirror.database)
            .finish()
    }
}
