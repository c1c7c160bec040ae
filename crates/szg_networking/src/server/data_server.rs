//! # Data Server
//!
//! Accepts and opens framed TCP connections and hands every received frame
//! to a handler.
//!
//! ## Lifecycle
//!
//! ```text
//!  accept/connect ──▶ dictionary exchange ──▶ table (Pending) ──▶ on_connect
//!                                                 │
//!                     reader thread: on_frame ◀───┘
//!                                                 │ error or close
//!                     remove from table ──▶ on_disconnect
//! ```
//!
//! ## Design
//!
//! - One accept thread, one reader thread per connection
//! - The handler is held weakly; its owner keeps it alive
//! - `on_disconnect` runs exactly once, on the reader thread
//! - A dictionary mismatch refuses the connection before it is registered

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{NetError, NetResult};
use crate::protocol::{Dictionary, WireWriter};
use crate::server::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionState};
use crate::transport::{self, Frame, FrameKind, FrameReader, FrameWriter};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Receives connection events.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A connection finished its handshake.
    fn on_connect(&self, _server: &DataServer, _conn: ConnectionId) {}

    /// A frame arrived. Called on the connection's reader thread, in order.
    fn on_frame(&self, server: &DataServer, conn: ConnectionId, frame: Frame);

    /// The connection is gone and no longer in the table.
    fn on_disconnect(&self, _server: &DataServer, _conn: ConnectionId) {}
}

/// Data server settings.
#[derive(Clone, Debug)]
pub struct DataServerConfig {
    /// Name used in log messages.
    pub name: String,
    /// Dictionary both ends must agree on, if any.
    pub dictionary: Option<Arc<Dictionary>>,
    /// Limit for the dictionary exchange.
    pub handshake_timeout: Duration,
    /// Limit for outgoing connects.
    pub connect_timeout: Duration,
}

impl Default for DataServerConfig {
    fn default() -> Self {
        Self {
            name: "szg".into(),
            dictionary: None,
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct Inner {
    config: DataServerConfig,
    handler: Weak<dyn ConnectionHandler>,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU32,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable handle to a set of connections.
#[derive(Clone)]
pub struct DataServer {
    inner: Arc<Inner>,
}

impl DataServer {
    /// Creates a server with no listener.
    #[must_use]
    pub fn new(config: DataServerConfig, handler: Weak<dyn ConnectionHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                connections: RwLock::new(HashMap::new()),
                next_id: AtomicU32::new(0),
                running: AtomicBool::new(true),
                local_addr: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Name from the config.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns whether `stop` has not been called.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Starts accepting on `addr`. Port 0 picks a free port.
    pub fn listen(&self, addr: SocketAddr) -> NetResult<SocketAddr> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(bound);
        tracing::info!(target: "szg::server", "{} listening on {bound}", self.name());

        let server = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.name()))
            .spawn(move || server.accept_loop(&listener))?;
        self.inner.threads.lock().push(handle);
        Ok(bound)
    }

    fn accept_loop(&self, listener: &TcpListener) {
        while self.is_running() {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let server = self.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("{}-conn", self.name()))
                        .spawn(move || server.serve_accepted(stream, addr));
                    match spawned {
                        Ok(handle) => self.track(handle),
                        Err(e) => tracing::error!(target: "szg::server", "cannot spawn reader: {e}"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!(target: "szg::server", "{} accept failed: {e}", self.name());
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        tracing::debug!(target: "szg::server", "{} accept loop done", self.name());
    }

    fn serve_accepted(&self, stream: TcpStream, addr: SocketAddr) {
        let setup = stream
            .set_nonblocking(false)
            .map_err(NetError::from)
            .and_then(|()| transport::split(stream).map_err(NetError::from))
            .and_then(|(mut reader, mut writer)| {
                self.exchange_dictionary(&mut reader, &mut writer)?;
                Ok((reader, writer))
            });
        match setup {
            Ok((reader, writer)) => {
                let conn = self.register(addr.to_string(), writer);
                self.read_loop(&conn, reader);
            }
            Err(err) => tracing::warn!(target: "szg::server", "{} refused {addr}: {err}", self.name()),
        }
    }

    /// Opens a connection and completes the handshake before returning.
    pub fn connect(&self, addr: SocketAddr, label: &str) -> NetResult<ConnectionId> {
        if !self.is_running() {
            return Err(NetError::Closed);
        }
        let (mut reader, mut writer) = transport::connect(addr, self.inner.config.connect_timeout)?;
        self.exchange_dictionary(&mut reader, &mut writer)?;
        let conn = self.register(label.to_owned(), writer);
        let id = conn.id;
        let server = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-conn", self.name()))
            .spawn(move || server.read_loop(&conn, reader))?;
        self.track(handle);
        Ok(id)
    }

    fn exchange_dictionary(&self, reader: &mut FrameReader, writer: &mut FrameWriter) -> NetResult<()> {
        let Some(dictionary) = &self.inner.config.dictionary else {
            return Ok(());
        };
        let mut w = WireWriter::new();
        dictionary.encode(&mut w);
        writer.send(FrameKind::Dictionary, w.as_slice())?;
        reader.set_timeout(Some(self.inner.config.handshake_timeout))?;
        let remote = Dictionary::decode(&reader.expect(FrameKind::Dictionary)?)?;
        reader.set_timeout(None)?;
        if let Some(diff) = dictionary.difference(&remote) {
            writer.shutdown();
            return Err(NetError::DictionaryMismatch(diff));
        }
        Ok(())
    }

    fn register(&self, label: String, writer: FrameWriter) -> Arc<Connection> {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, label, writer));
        self.inner.connections.write().insert(id, Arc::clone(&conn));
        if !self.is_running() {
            conn.close();
        }
        tracing::info!(target: "szg::server", "{} connection {id} ({}) up", self.name(), conn.label);
        conn
    }

    fn read_loop(&self, conn: &Arc<Connection>, mut reader: FrameReader) {
        if let Some(handler) = self.inner.handler.upgrade() {
            handler.on_connect(self, conn.id);
        }
        loop {
            match reader.recv() {
                Ok(Frame { kind: FrameKind::Close, .. }) => break,
                Ok(frame) => match self.inner.handler.upgrade() {
                    Some(handler) => handler.on_frame(self, conn.id, frame),
                    None => break,
                },
                Err(err) => {
                    if !transport::is_disconnect(&err) && conn.state() != ConnectionState::Closed {
                        tracing::warn!(target: "szg::server", "{} connection {}: {err}", self.name(), conn.id);
                    }
                    break;
                }
            }
        }
        conn.close();
        self.inner.connections.write().remove(&conn.id);
        tracing::info!(target: "szg::server", "{} connection {} down", self.name(), conn.id);
        if let Some(handler) = self.inner.handler.upgrade() {
            handler.on_disconnect(self, conn.id);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut threads = self.inner.threads.lock();
        threads.retain(|t| !t.is_finished());
        threads.push(handle);
    }

    fn connection(&self, id: ConnectionId) -> NetResult<Arc<Connection>> {
        self.inner
            .connections
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| NetError::UnknownConnection(id.to_string()))
    }

    /// Sends one frame. A failed send closes the connection.
    pub fn send_to(&self, id: ConnectionId, kind: FrameKind, payload: &[u8]) -> NetResult<()> {
        let conn = self.connection(id)?;
        conn.send(kind, payload).map_err(|err| {
            tracing::warn!(target: "szg::server", "{} send to {id} failed: {err}", self.name());
            conn.close();
            err
        })
    }

    /// Sends to every connection in `state`. Returns how many succeeded.
    pub fn broadcast(&self, state: ConnectionState, kind: FrameKind, payload: &[u8]) -> usize {
        self.ids_in_state(state)
            .into_iter()
            .filter(|&id| self.send_to(id, kind, payload).is_ok())
            .count()
    }

    /// Closes a connection. `on_disconnect` follows on its reader thread.
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.connection(id) {
            Ok(conn) => {
                let _ = conn.send(FrameKind::Close, &[]);
                conn.close()
            }
            Err(_) => false,
        }
    }

    /// IDs of every registered connection, ascending.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.connections.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// IDs of connections in `state`, ascending.
    #[must_use]
    pub fn ids_in_state(&self, state: ConnectionState) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .inner
            .connections
            .read()
            .values()
            .filter(|c| c.state() == state)
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Lifecycle state of a connection.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connection(id).ok().map(|c| c.state())
    }

    /// Moves a connection to another state.
    pub fn set_state(&self, id: ConnectionId, state: ConnectionState) -> bool {
        self.connection(id).map(|c| c.set_state(state)).is_ok()
    }

    /// Label of a connection.
    #[must_use]
    pub fn label(&self, id: ConnectionId) -> Option<String> {
        self.connection(id).ok().map(|c| c.label.clone())
    }

    /// Connection with this label.
    #[must_use]
    pub fn find_label(&self, label: &str) -> Option<ConnectionId> {
        self.inner
            .connections
            .read()
            .values()
            .find(|c| c.label == label)
            .map(|c| c.id)
    }

    /// Snapshot of every connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self.inner.connections.read().values().map(|c| c.info()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Closes everything and joins every thread except the caller's.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let conns: Vec<_> = self.inner.connections.read().values().cloned().collect();
        for conn in conns {
            conn.close();
        }
        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.inner.threads.lock());
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        tracing::info!(target: "szg::server", "{} stopped", self.name());
    }
}

impl std::fmt::Debug for DataServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServer")
            .field("name", &self.name())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use crate::protocol::RecordTemplate;
    use szg_core::DataType;

    struct Recorder {
        events: Sender<(ConnectionId, Option<Frame>)>,
    }

    impl ConnectionHandler for Recorder {
        fn on_frame(&self, _server: &DataServer, conn: ConnectionId, frame: Frame) {
            let _ = self.events.send((conn, Some(frame)));
        }

        fn on_disconnect(&self, _server: &DataServer, conn: ConnectionId) {
            let _ = self.events.send((conn, None));
        }
    }

    fn server(dictionary: Option<Arc<Dictionary>>) -> (DataServer, Arc<Recorder>, Receiver<(ConnectionId, Option<Frame>)>) {
        let (tx, rx) = unbounded();
        let handler = Arc::new(Recorder { events: tx });
        let weak: Weak<dyn ConnectionHandler> = Arc::downgrade(&handler) as Weak<dyn ConnectionHandler>;
        let config = DataServerConfig { dictionary, ..DataServerConfig::default() };
        (DataServer::new(config, weak), handler, rx)
    }

    fn dictionary(field: &str) -> Arc<Dictionary> {
        let mut d = Dictionary::new();
        d.add(RecordTemplate::new("erase").with(field, DataType::Int));
        Arc::new(d)
    }

    #[test]
    fn test_frames_reach_handler() {
        let (a, _ha, _) = server(Some(dictionary("ID")));
        let (b, _hb, rx) = server(Some(dictionary("ID")));
        let addr = b.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let id = a.connect(addr, "b").unwrap();
        a.send_to(id, FrameKind::Records, b"hello").unwrap();

        let (_, frame) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.unwrap().payload, b"hello");
        assert_eq!(a.label(id).as_deref(), Some("b"));
        assert_eq!(a.find_label("b"), Some(id));

        a.close(id);
        let (_, gone) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(gone.is_none());
        a.stop();
        b.stop();
    }

    #[test]
    fn test_dictionary_mismatch_refused() {
        let (a, _ha, _) = server(Some(dictionary("ID")));
        let (b, _hb, _) = server(Some(dictionary("node")));
        let addr = b.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = a.connect(addr, "b").unwrap_err();
        assert!(matches!(err, NetError::DictionaryMismatch(_)), "{err}");
        assert_eq!(a.connection_count(), 0);
        a.stop();
        b.stop();
    }

    #[test]
    fn test_states_and_broadcast() {
        let (a, _ha, _) = server(None);
        let (b, _hb, rx) = server(None);
        let addr = b.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let first = a.connect(addr, "one").unwrap();
        let second = a.connect(addr, "two").unwrap();
        assert_eq!(a.state(first), Some(ConnectionState::Pending));
        a.set_state(second, ConnectionState::Active);
        assert_eq!(a.ids_in_state(ConnectionState::Active), vec![second]);
        assert_eq!(a.broadcast(ConnectionState::Active, FrameKind::Input, b"x"), 1);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        a.stop();
        assert!(a.connect(addr, "late").is_err());
        b.stop();
    }
}
