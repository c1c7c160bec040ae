//! # Sync Data Server
//!
//! A data server that streams one send queue to every live connection and
//! gives every newcomer a full snapshot first.
//!
//! ## Flush
//!
//! ```text
//!  with_send_queue(f) ──▶ back buffer ──┐
//!                                       ▼   (queue lock held)
//!  flush: take back buffer, dump state for Pending, mark them Active
//!                                       │   (queue lock released)
//!                                       ▼
//!         back buffer ──▶ previously Active     snapshot ──▶ newcomers
//! ```
//!
//! ## Design
//!
//! - The snapshot is taken under the queue lock, so it is consistent with
//!   every record queued before it and none queued after
//! - Flushes are serialized, so a newcomer sees its snapshot before any delta
//! - Automatic mode runs a flush thread; manual mode flushes on `swap_buffers`
//! - A failed send closes only that connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::NetResult;
use crate::protocol::{Dictionary, WireWriter};
use crate::server::connection::{ConnectionId, ConnectionInfo, ConnectionState};
use crate::server::data_server::{ConnectionHandler, DataServer, DataServerConfig};
use crate::transport::{Frame, FrameKind};

const BACKPRESSURE_POLL: Duration = Duration::from_millis(50);

/// How queued data leaves the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// A background thread flushes whenever data is queued.
    #[default]
    Automatic,
    /// The owner flushes with `swap_buffers`.
    Manual,
}

/// Sync server settings.
#[derive(Clone, Debug)]
pub struct SyncServerConfig {
    /// Name used in log messages.
    pub name: String,
    /// Flush policy.
    pub mode: SyncMode,
    /// Back buffer size above which writers wait (automatic mode).
    pub send_limit: usize,
    /// Longest time the flush thread sleeps.
    pub flush_interval: Duration,
    /// Dictionary exchanged with every connection.
    pub dictionary: Option<Arc<Dictionary>>,
}

impl Default for SyncServerConfig {
    fn default() -> Self {
        Self {
            name: "sync".into(),
            mode: SyncMode::Automatic,
            send_limit: 1 << 20,
            flush_interval: Duration::from_millis(10),
            dictionary: None,
        }
    }
}

/// State that a sync server replicates.
pub trait SyncTarget: Send + Sync + 'static {
    /// Writes a full snapshot. Called with the queue lock held.
    fn dump_state(&self, out: &mut WireWriter);

    /// Handles a `Records` frame from a connection.
    fn on_records(&self, server: &SyncHandle, conn: ConnectionId, bytes: &[u8]);

    /// A connection received its snapshot.
    fn on_connect(&self, _server: &SyncHandle, _conn: ConnectionId) {}

    /// A connection is gone.
    fn on_disconnect(&self, _server: &SyncHandle, _conn: ConnectionId) {}
}

struct SyncShared {
    config: SyncServerConfig,
    target: Weak<dyn SyncTarget>,
    queue: Mutex<WireWriter>,
    drained: Condvar,
    flush_lock: Mutex<()>,
    running: AtomicBool,
    wake: Sender<()>,
}

/// Cloneable access to a running sync server, handed to callbacks.
#[derive(Clone)]
pub struct SyncHandle {
    server: DataServer,
    shared: Arc<SyncShared>,
}

impl SyncHandle {
    /// Runs `f` on the back buffer under the queue lock.
    ///
    /// In automatic mode this first waits while the buffer is over the send
    /// limit and someone is listening.
    pub fn with_send_queue<R>(&self, f: impl FnOnce(&mut WireWriter) -> R) -> R {
        let automatic = self.shared.config.mode == SyncMode::Automatic;
        let mut queue = self.shared.queue.lock();
        while automatic
            && queue.len() > self.shared.config.send_limit
            && self.shared.running.load(Ordering::Acquire)
            && !self.server.ids_in_state(ConnectionState::Active).is_empty()
        {
            let _ = self.shared.wake.try_send(());
            self.shared.drained.wait_for(&mut queue, BACKPRESSURE_POLL);
        }
        let result = f(&mut queue);
        if automatic && !queue.is_empty() {
            let _ = self.shared.wake.try_send(());
        }
        result
    }

    /// Sends the back buffer to live connections and snapshots to new ones.
    pub fn swap_buffers(&self) {
        self.flush(true);
    }

    fn flush(&self, send_batch: bool) {
        let _serial = self.shared.flush_lock.lock();
        let (batch, live, fresh, snapshot) = {
            let mut queue = self.shared.queue.lock();
            let batch = if send_batch { std::mem::take(&mut *queue) } else { WireWriter::new() };
            let live = self.server.ids_in_state(ConnectionState::Active);
            let fresh = self.server.ids_in_state(ConnectionState::Pending);
            let mut snapshot = WireWriter::new();
            if !fresh.is_empty() {
                if let Some(target) = self.shared.target.upgrade() {
                    target.dump_state(&mut snapshot);
                }
                for &id in &fresh {
                    self.server.set_state(id, ConnectionState::Active);
                }
            }
            (batch, live, fresh, snapshot)
        };
        self.shared.drained.notify_all();

        if !batch.is_empty() {
            for &id in &live {
                let _ = self.server.send_to(id, FrameKind::Records, batch.as_slice());
            }
        }
        for &id in &fresh {
            if self.server.send_to(id, FrameKind::Records, snapshot.as_slice()).is_ok() {
                tracing::debug!(
                    target: "szg::sync",
                    "{} sent {} byte snapshot to {id}",
                    self.server.name(),
                    snapshot.len()
                );
                if let Some(target) = self.shared.target.upgrade() {
                    target.on_connect(self, id);
                }
            }
        }
    }

    /// Sends one frame to one connection, outside the shared stream.
    pub fn send_to(&self, id: ConnectionId, kind: FrameKind, payload: &[u8]) -> NetResult<()> {
        self.server.send_to(id, kind, payload)
    }

    /// Closes a connection.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.server.close(id)
    }

    /// IDs of every connection.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.server.connection_ids()
    }

    /// Snapshot of every connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.server.connections()
    }

    /// The underlying data server.
    #[must_use]
    pub fn data_server(&self) -> &DataServer {
        &self.server
    }
}

struct Bridge {
    shared: Arc<SyncShared>,
}

impl Bridge {
    fn handle(&self, server: &DataServer) -> SyncHandle {
        SyncHandle { server: server.clone(), shared: Arc::clone(&self.shared) }
    }
}

impl ConnectionHandler for Bridge {
    fn on_connect(&self, server: &DataServer, _conn: ConnectionId) {
        match self.shared.config.mode {
            SyncMode::Automatic => {
                let _ = self.shared.wake.try_send(());
            }
            SyncMode::Manual => self.handle(server).flush(false),
        }
    }

    fn on_frame(&self, server: &DataServer, conn: ConnectionId, frame: Frame) {
        if frame.kind != FrameKind::Records {
            tracing::debug!(target: "szg::sync", "{} ignores {:?} from {conn}", server.name(), frame.kind);
            return;
        }
        if let Some(target) = self.shared.target.upgrade() {
            target.on_records(&self.handle(server), conn, &frame.payload);
        }
    }

    fn on_disconnect(&self, server: &DataServer, conn: ConnectionId) {
        self.shared.drained.notify_all();
        if let Some(target) = self.shared.target.upgrade() {
            target.on_disconnect(&self.handle(server), conn);
        }
    }
}

/// Data server with a shared, snapshot-consistent send stream.
pub struct SyncDataServer {
    handle: SyncHandle,
    _bridge: Arc<Bridge>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncDataServer {
    /// Creates the server. The target is held weakly.
    pub fn new(config: SyncServerConfig, target: Weak<dyn SyncTarget>) -> NetResult<Self> {
        let (wake, woken) = bounded(1);
        let mode = config.mode;
        let interval = config.flush_interval;
        let server_config = DataServerConfig {
            name: config.name.clone(),
            dictionary: config.dictionary.clone(),
            ..DataServerConfig::default()
        };
        let shared = Arc::new(SyncShared {
            config,
            target,
            queue: Mutex::new(WireWriter::new()),
            drained: Condvar::new(),
            flush_lock: Mutex::new(()),
            running: AtomicBool::new(true),
            wake,
        });
        let bridge = Arc::new(Bridge { shared: Arc::clone(&shared) });
        let weak: Weak<dyn ConnectionHandler> = Arc::downgrade(&bridge) as Weak<dyn ConnectionHandler>;
        let server = DataServer::new(server_config, weak);
        let handle = SyncHandle { server, shared };

        let flusher = match mode {
            SyncMode::Automatic => {
                let worker = handle.clone();
                Some(
                    thread::Builder::new()
                        .name(format!("{}-flush", handle.server.name()))
                        .spawn(move || flush_loop(&worker, &woken, interval))?,
                )
            }
            SyncMode::Manual => None,
        };
        Ok(Self { handle, _bridge: bridge, flusher: Mutex::new(flusher) })
    }

    /// Starts accepting connections.
    pub fn listen(&self, addr: SocketAddr) -> NetResult<SocketAddr> {
        self.handle.server.listen(addr)
    }

    /// Opens a connection that is treated like an accepted one.
    pub fn connect(&self, addr: SocketAddr, label: &str) -> NetResult<ConnectionId> {
        self.handle.server.connect(addr, label)
    }

    /// Cloneable handle for queueing and flushing.
    #[must_use]
    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// See [`SyncHandle::with_send_queue`].
    pub fn with_send_queue<R>(&self, f: impl FnOnce(&mut WireWriter) -> R) -> R {
        self.handle.with_send_queue(f)
    }

    /// See [`SyncHandle::swap_buffers`].
    pub fn swap_buffers(&self) {
        self.handle.swap_buffers();
    }

    /// Flush policy.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.handle.shared.config.mode
    }

    /// Bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.server.local_addr()
    }

    /// Number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.handle.server.connection_count()
    }

    /// Number of connections that received their snapshot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.handle.server.ids_in_state(ConnectionState::Active).len()
    }

    /// Flushes once more, then closes everything.
    pub fn stop(&self) {
        if !self.handle.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.handle.shared.wake.try_send(());
        if let Some(flusher) = self.flusher.lock().take() {
            let _ = flusher.join();
        }
        self.handle.flush(true);
        self.handle.shared.drained.notify_all();
        self.handle.server.stop();
    }
}

impl Drop for SyncDataServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SyncDataServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDataServer")
            .field("server", &self.handle.server)
            .field("mode", &self.mode())
            .finish()
    }
}

fn flush_loop(handle: &SyncHandle, woken: &Receiver<()>, interval: Duration) {
    while handle.shared.running.load(Ordering::Acquire) {
        match woken.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => handle.flush(true),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(target: "szg::sync", "{} flush thread done", handle.server.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;

    struct Counter {
        state: Mutex<u32>,
    }

    impl SyncTarget for Counter {
        fn dump_state(&self, out: &mut WireWriter) {
            out.write_u32(*self.state.lock());
        }

        fn on_records(&self, _server: &SyncHandle, _conn: ConnectionId, _bytes: &[u8]) {}
    }

    fn counter_server(mode: SyncMode) -> (Arc<Counter>, SyncDataServer, SocketAddr) {
        let counter = Arc::new(Counter { state: Mutex::new(0) });
        let weak: Weak<dyn SyncTarget> = Arc::downgrade(&counter) as Weak<dyn SyncTarget>;
        let config = SyncServerConfig { mode, ..SyncServerConfig::default() };
        let server = SyncDataServer::new(config, weak).unwrap();
        let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        (counter, server, addr)
    }

    fn bump(counter: &Counter, server: &SyncDataServer) {
        server.with_send_queue(|q| {
            let mut state = counter.state.lock();
            *state += 1;
            q.write_u32(*state);
        });
    }

    fn read_u32s(frame: &[u8]) -> Vec<u32> {
        frame
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_snapshot_then_deltas_manual() {
        let (counter, server, addr) = counter_server(SyncMode::Manual);
        bump(&counter, &server);
        bump(&counter, &server);
        server.swap_buffers();

        let (mut rx, _tx) = transport::connect(addr, Duration::from_secs(2)).unwrap();
        rx.set_timeout(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(read_u32s(&rx.expect(FrameKind::Records).unwrap()), vec![2]);

        bump(&counter, &server);
        bump(&counter, &server);
        server.swap_buffers();
        assert_eq!(read_u32s(&rx.expect(FrameKind::Records).unwrap()), vec![3, 4]);
        assert_eq!(server.active_count(), 1);
        server.stop();
    }

    #[test]
    fn test_automatic_mode_streams() {
        let (counter, server, addr) = counter_server(SyncMode::Automatic);
        bump(&counter, &server);
        let (mut rx, _tx) = transport::connect(addr, Duration::from_secs(2)).unwrap();
        rx.set_timeout(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(read_u32s(&rx.expect(FrameKind::Records).unwrap()), vec![1]);

        for _ in 0..5 {
            bump(&counter, &server);
        }
        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.extend(read_u32s(&rx.expect(FrameKind::Records).unwrap()));
        }
        assert_eq!(seen, vec![2, 3, 4, 5, 6]);
        server.stop();
    }
}
