//! # Master Side
//!
//! Accepts slaves, broadcasts each frame and waits for every acknowledgement.
//!
//! ```text
//!  accept thread ──(hello)──▶ joiners ──┐
//!                                       ▼  frame boundary: schema check, admit
//!  exchange: send frame ─▶ all slaves ─▶ wait acks until deadline
//!                                       │
//!  ack readers ──(Ack / Gone)──▶ acks ──┘
//! ```
//!
//! ## Design
//!
//! - Slaves join only between frames, so none sees half a frame
//! - A slave that misses the deadline is skipped for that frame; after
//!   `max_misses` consecutive misses it is evicted
//! - A slave that disconnects is evicted at once

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use szg_core::TransferRegistry;

use crate::error::NetResult;
use crate::master_slave::message::{decode_ack, encode_reply, Hello};
use crate::server::ConnectionId;
use crate::transport::{self, FrameKind, FrameReader, FrameWriter};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Master settings.
#[derive(Clone, Debug)]
pub struct MasterConfig {
    /// How long a frame waits for acknowledgements.
    pub ack_timeout: Duration,
    /// Consecutive missed frames before a slave is evicted.
    pub max_misses: u32,
    /// How long a connecting slave has to send its schema.
    pub handshake_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            max_misses: 3,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Frame number.
    pub frame: u64,
    /// Slaves that acknowledged in time.
    pub acknowledged: usize,
    /// Slaves that joined at this frame.
    pub joined: Vec<ConnectionId>,
    /// Slaves that missed this frame but remain.
    pub missed: Vec<ConnectionId>,
    /// Slaves removed during this frame.
    pub evicted: Vec<ConnectionId>,
}

enum AckEvent {
    Ack(ConnectionId, u64),
    Gone(ConnectionId),
}

struct Candidate {
    hello: Hello,
    reader: FrameReader,
    writer: FrameWriter,
}

struct SlaveLink {
    id: ConnectionId,
    label: String,
    writer: FrameWriter,
    misses: u32,
    reader: Option<JoinHandle<()>>,
}

impl SlaveLink {
    fn shutdown(&mut self) {
        self.writer.shutdown();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// The master end of the frame exchange.
pub struct MasterSync {
    config: MasterConfig,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    joiners: Receiver<Candidate>,
    acks_tx: Sender<AckEvent>,
    acks: Receiver<AckEvent>,
    slaves: Vec<SlaveLink>,
    next_id: u32,
}

impl MasterSync {
    /// Binds and starts accepting slaves.
    pub fn listen(addr: SocketAddr, config: MasterConfig) -> NetResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let (join_tx, joiners) = unbounded();
        let (acks_tx, acks) = unbounded();

        let flag = Arc::clone(&running);
        let handshake_timeout = config.handshake_timeout;
        let accept = thread::Builder::new()
            .name("szg-master-accept".into())
            .spawn(move || accept_loop(&listener, &flag, &join_tx, handshake_timeout))?;
        tracing::info!(target: "szg::master", "master listening on {local_addr}");

        Ok(Self {
            config,
            local_addr,
            running,
            accept: Some(accept),
            joiners,
            acks_tx,
            acks,
            slaves: Vec::new(),
            next_id: 0,
        })
    }

    /// Bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Slaves currently receiving frames.
    #[inline]
    #[must_use]
    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    /// Labels of current slaves.
    #[must_use]
    pub fn slave_labels(&self) -> Vec<String> {
        self.slaves.iter().map(|s| s.label.clone()).collect()
    }

    fn admit(&mut self, fields: &TransferRegistry) -> Vec<ConnectionId> {
        let mut joined = Vec::new();
        while let Ok(mut candidate) = self.joiners.try_recv() {
            let verdict = fields.check_schema(&candidate.hello.schema).map_err(|e| e.to_string());
            let sent = candidate.writer.send(FrameKind::HandshakeReply, &encode_reply(&verdict));
            if let Err(reason) = verdict {
                tracing::warn!(target: "szg::master", "rejected slave '{}': {reason}", candidate.hello.label);
                candidate.writer.shutdown();
                continue;
            }
            if let Err(err) = sent {
                tracing::warn!(target: "szg::master", "slave '{}' left during handshake: {err}", candidate.hello.label);
                continue;
            }
            let id = ConnectionId(self.next_id);
            self.next_id += 1;
            let acks = self.acks_tx.clone();
            let mut reader = candidate.reader;
            let spawned = thread::Builder::new()
                .name(format!("szg-master-ack-{}", id.0))
                .spawn(move || ack_loop(id, &mut reader, &acks));
            match spawned {
                Ok(handle) => {
                    tracing::info!(target: "szg::master", "slave '{}' joined as {id}", candidate.hello.label);
                    self.slaves.push(SlaveLink {
                        id,
                        label: candidate.hello.label,
                        writer: candidate.writer,
                        misses: 0,
                        reader: Some(handle),
                    });
                    joined.push(id);
                }
                Err(err) => tracing::error!(target: "szg::master", "cannot spawn ack reader: {err}"),
            }
        }
        joined
    }

    /// Admits waiting slaves, sends `frame` to all and waits for their
    /// acknowledgements of frame `number`.
    pub fn exchange(&mut self, fields: &TransferRegistry, number: u64, frame: &[u8]) -> ExchangeReport {
        let joined = self.admit(fields);
        let mut gone = HashSet::new();
        let mut waiting = HashSet::new();
        for slave in &mut self.slaves {
            match slave.writer.send(FrameKind::MasterFrame, frame) {
                Ok(()) => {
                    waiting.insert(slave.id);
                }
                Err(err) => {
                    tracing::error!(target: "szg::master", "frame {number} to {} failed: {err}", slave.id);
                    gone.insert(slave.id);
                }
            }
        }

        let deadline = Instant::now() + self.config.ack_timeout;
        let mut acknowledged = 0;
        while !waiting.is_empty() {
            match self.acks.recv_deadline(deadline) {
                Ok(AckEvent::Ack(id, acked)) if acked == number => {
                    if waiting.remove(&id) {
                        acknowledged += 1;
                    }
                }
                Ok(AckEvent::Ack(..)) => {}
                Ok(AckEvent::Gone(id)) => {
                    waiting.remove(&id);
                    gone.insert(id);
                }
                Err(_) => break,
            }
        }
        while let Ok(event) = self.acks.try_recv() {
            if let AckEvent::Gone(id) = event {
                gone.insert(id);
            }
        }

        let mut report = ExchangeReport { frame: number, acknowledged, joined, ..ExchangeReport::default() };
        let max_misses = self.config.max_misses;
        let mut kept = Vec::with_capacity(self.slaves.len());
        for mut slave in self.slaves.drain(..) {
            if gone.contains(&slave.id) {
                tracing::error!(target: "szg::master", "slave {} ('{}') disconnected", slave.id, slave.label);
                slave.shutdown();
                report.evicted.push(slave.id);
                continue;
            }
            if waiting.contains(&slave.id) {
                slave.misses += 1;
                if slave.misses >= max_misses {
                    tracing::warn!(target: "szg::master", "evicting {} after {} missed frames", slave.id, slave.misses);
                    slave.shutdown();
                    report.evicted.push(slave.id);
                    continue;
                }
                tracing::warn!(target: "szg::master", "{} missed frame {number}", slave.id);
                report.missed.push(slave.id);
            } else {
                slave.misses = 0;
            }
            kept.push(slave);
        }
        self.slaves = kept;
        report
    }

    /// Stops accepting and disconnects every slave.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        for slave in &mut self.slaves {
            let _ = slave.writer.send(FrameKind::Close, &[]);
            slave.shutdown();
        }
        self.slaves.clear();
        tracing::info!(target: "szg::master", "master stopped");
    }
}

impl Drop for MasterSync {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MasterSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSync")
            .field("local_addr", &self.local_addr)
            .field("slaves", &self.slave_labels())
            .finish_non_exhaustive()
    }
}

fn accept_loop(listener: &TcpListener, running: &AtomicBool, joiners: &Sender<Candidate>, timeout: Duration) {
    while running.load(Ordering::Acquire) {
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                tracing::warn!(target: "szg::master", "accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        let greeted = greet(stream, timeout);
        match greeted {
            Ok(candidate) => {
                tracing::debug!(target: "szg::master", "slave '{}' waiting at {addr}", candidate.hello.label);
                if joiners.send(candidate).is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(target: "szg::master", "handshake with {addr} failed: {err}"),
        }
    }
}

fn greet(stream: TcpStream, timeout: Duration) -> NetResult<Candidate> {
    stream.set_nonblocking(false)?;
    let (mut reader, writer) = transport::split(stream)?;
    reader.set_timeout(Some(timeout))?;
    let hello = Hello::decode(&reader.expect(FrameKind::Handshake)?)?;
    reader.set_timeout(None)?;
    Ok(Candidate { hello, reader, writer })
}

fn ack_loop(id: ConnectionId, reader: &mut FrameReader, acks: &Sender<AckEvent>) {
    loop {
        let event = match reader.recv() {
            Ok(frame) if frame.kind == FrameKind::Ack => match decode_ack(&frame.payload) {
                Ok(number) => AckEvent::Ack(id, number),
                Err(err) => {
                    tracing::warn!(target: "szg::master", "bad ack from {id}: {err}");
                    continue;
                }
            },
            Ok(frame) if frame.kind == FrameKind::Close => AckEvent::Gone(id),
            Ok(frame) => {
                tracing::debug!(target: "szg::master", "ignoring {:?} from {id}", frame.kind);
                continue;
            }
            Err(_) => AckEvent::Gone(id),
        };
        let gone = matches!(event, AckEvent::Gone(_));
        if acks.send(event).is_err() || gone {
            return;
        }
    }
}
