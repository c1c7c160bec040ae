//! Input sink that serves filtered queues to remote sources.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use szg_core::{EventQueue, InputSink, Signature};

use crate::error::NetResult;
use crate::protocol::input::{encode_queue, encode_signature};
use crate::protocol::WireWriter;
use crate::server::{ConnectionHandler, ConnectionId, ConnectionState, DataServer, DataServerConfig};
use crate::transport::{Frame, FrameKind};

struct Publisher {
    name: String,
    // Held while sending so a new connection gets the signature before any queue.
    signature: Mutex<Signature>,
}

impl ConnectionHandler for Publisher {
    fn on_connect(&self, server: &DataServer, conn: ConnectionId) {
        let signature = self.signature.lock();
        let mut w = WireWriter::new();
        encode_signature(*signature, &mut w);
        if server.send_to(conn, FrameKind::Signature, w.as_slice()).is_ok() {
            server.set_state(conn, ConnectionState::Active);
        }
    }

    fn on_frame(&self, _server: &DataServer, conn: ConnectionId, frame: Frame) {
        tracing::debug!(target: "szg::input", "{}: ignoring {:?} from {conn}", self.name, frame.kind);
    }
}

struct SinkInner {
    addr: SocketAddr,
    publisher: Arc<Publisher>,
    server: Option<DataServer>,
    sent: usize,
}

/// Sink that streams every queue it receives to connected
/// [`NetInputSource`](crate::input_net::NetInputSource)s.
///
/// Clones share one sink, so the application can keep one to read the
/// bound address after the node takes ownership of another.
#[derive(Clone)]
pub struct NetInputSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl NetInputSink {
    /// Creates a sink that will listen on `addr` when started.
    #[must_use]
    pub fn new(name: &str, addr: SocketAddr) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                addr,
                publisher: Arc::new(Publisher {
                    name: name.to_owned(),
                    signature: Mutex::new(Signature::default()),
                }),
                server: None,
                sent: 0,
            })),
        }
    }

    /// Address bound by the last `start`. Port 0 is replaced by the real port,
    /// so a restart reuses it.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.lock().addr
    }

    /// Connected sources that have their signature.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .server
            .as_ref()
            .map_or(0, |s| s.ids_in_state(ConnectionState::Active).len())
    }

    /// Queues sent since creation.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent
    }

    fn bind(inner: &mut SinkInner) -> NetResult<()> {
        let weak: Weak<dyn ConnectionHandler> = Arc::downgrade(&inner.publisher) as Weak<dyn ConnectionHandler>;
        let config = DataServerConfig { name: inner.publisher.name.clone(), ..DataServerConfig::default() };
        let server = DataServer::new(config, weak);
        inner.addr = server.listen(inner.addr)?;
        inner.server = Some(server);
        Ok(())
    }
}

impl InputSink for NetInputSink {
    fn name(&self) -> &str {
        "net"
    }

    fn start(&mut self) -> bool {
        let mut inner = self.inner.lock();
        if inner.server.is_some() {
            return true;
        }
        match Self::bind(&mut inner) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "szg::input", "{}: cannot listen on {}: {err}", inner.publisher.name, inner.addr);
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        if let Some(server) = self.inner.lock().server.take() {
            server.stop();
        }
        true
    }

    fn receive_data(&mut self, _channel: usize, queue: &EventQueue) -> bool {
        let (server, publisher) = {
            let mut inner = self.inner.lock();
            let Some(server) = inner.server.clone() else {
                return false;
            };
            inner.sent += 1;
            (server, Arc::clone(&inner.publisher))
        };
        let mut signature = publisher.signature.lock();
        let grown = signature.max(queue.signature());
        if grown != *signature {
            *signature = grown;
            let mut w = WireWriter::new();
            encode_signature(grown, &mut w);
            server.broadcast(ConnectionState::Active, FrameKind::Signature, w.as_slice());
        }
        let mut w = WireWriter::new();
        encode_queue(queue, &mut w);
        server.broadcast(ConnectionState::Active, FrameKind::Input, w.as_slice());
        true
    }

    fn source_reconfig(&mut self, _channel: usize, signature: Signature) -> bool {
        let inner = self.inner.lock();
        let mut current = inner.publisher.signature.lock();
        *current = signature;
        if let Some(server) = &inner.server {
            let mut w = WireWriter::new();
            encode_signature(signature, &mut w);
            server.broadcast(ConnectionState::Active, FrameKind::Signature, w.as_slice());
        }
        true
    }
}
