//! Input source fed by a remote [`NetInputSink`](crate::input_net::NetInputSink).

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use szg_core::{InputSource, Signature, SourceHandle};

use crate::protocol::input::{decode_queue, decode_signature};
use crate::protocol::WireReader;
use crate::server::{ConnectionHandler, ConnectionId, DataServer, DataServerConfig};
use crate::transport::{Frame, FrameKind};

struct Subscriber {
    name: String,
    signature: Mutex<Signature>,
    handle: Mutex<Option<SourceHandle>>,
}

impl Subscriber {
    fn deliver(&self, frame: &Frame) -> crate::error::NetResult<()> {
        let mut r = WireReader::new(&frame.payload);
        let handle = self.handle.lock().clone();
        let Some(handle) = handle else {
            return Ok(());
        };
        match frame.kind {
            FrameKind::Signature => {
                let signature = decode_signature(&mut r)?;
                *self.signature.lock() = signature;
                tracing::debug!(target: "szg::input", "{}: remote signature {signature:?}", self.name);
                handle.reconfigure(signature);
            }
            FrameKind::Input => {
                let queue = decode_queue(&mut r)?;
                handle.send_queue(queue);
            }
            other => tracing::debug!(target: "szg::input", "{}: ignoring {other:?}", self.name),
        }
        Ok(())
    }
}

impl ConnectionHandler for Subscriber {
    fn on_frame(&self, _server: &DataServer, conn: ConnectionId, frame: Frame) {
        if let Err(err) = self.deliver(&frame) {
            tracing::warn!(target: "szg::input", "{}: bad frame from {conn}: {err}", self.name);
        }
    }

    fn on_disconnect(&self, _server: &DataServer, conn: ConnectionId) {
        tracing::info!(target: "szg::input", "{}: sink {conn} went away", self.name);
    }
}

/// Source that replays the queues a remote sink publishes.
///
/// The remote signature replaces the one given at construction as soon as
/// it arrives.
pub struct NetInputSource {
    addr: SocketAddr,
    subscriber: Arc<Subscriber>,
    server: Option<DataServer>,
}

impl NetInputSource {
    /// Creates a source that connects to `addr` when started.
    #[must_use]
    pub fn new(name: &str, addr: SocketAddr, expected: Signature) -> Self {
        Self {
            addr,
            subscriber: Arc::new(Subscriber {
                name: name.to_owned(),
                signature: Mutex::new(expected),
                handle: Mutex::new(None),
            }),
            server: None,
        }
    }
}

impl InputSource for NetInputSource {
    fn name(&self) -> &str {
        &self.subscriber.name
    }

    fn signature(&self) -> Signature {
        *self.subscriber.signature.lock()
    }

    fn start(&mut self, handle: SourceHandle) -> bool {
        if self.server.is_some() {
            return true;
        }
        *self.subscriber.handle.lock() = Some(handle);
        let weak: Weak<dyn ConnectionHandler> = Arc::downgrade(&self.subscriber) as Weak<dyn ConnectionHandler>;
        let config = DataServerConfig { name: self.subscriber.name.clone(), ..DataServerConfig::default() };
        let server = DataServer::new(config, weak);
        match server.connect(self.addr, "sink") {
            Ok(_) => {
                self.server = Some(server);
                true
            }
            Err(err) => {
                tracing::error!(target: "szg::input", "{}: cannot reach sink at {}: {err}", self.subscriber.name, self.addr);
                server.stop();
                *self.subscriber.handle.lock() = None;
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        *self.subscriber.handle.lock() = None;
        if let Some(server) = self.server.take() {
            server.stop();
        }
        true
    }

    fn is_running(&self) -> bool {
        self.server.is_some()
    }
}
