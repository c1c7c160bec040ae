//! # Cluster Frame Loop
//!
//! Drives one process of a cluster application through its frames.
//!
//! ```text
//!  master: pre_exchange ─▶ pack ─▶ broadcast + wait acks ─▶ post_exchange ─▶ draw
//!  slave:                 receive ─▶ unpack ─▶ ack ──────▶ post_exchange ─▶ draw
//! ```
//!
//! ## Design
//!
//! - The application is passed in by `&mut`; no callback reaches globals
//! - Slaves never run `pre_exchange`
//! - The master's filtered input travels with the fields, so every process
//!   reads the same `input_state()`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use szg_core::{EventQueue, InputNode, InputState, TransferRegistry};

use crate::error::{NetError, NetResult};
use crate::master_slave::master::{ExchangeReport, MasterConfig, MasterSync};
use crate::master_slave::message::FrameMessage;
use crate::master_slave::slave::SlaveSync;

/// Which end of the exchange a process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Produces frames.
    Master,
    /// Follows the master.
    Slave,
}

/// What every callback sees for the current frame.
pub struct FrameContext<'a> {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Master time since the session started.
    pub elapsed: Duration,
    /// This process's role.
    pub role: Role,
    /// Transfer fields. Written by the master in `pre_exchange`.
    pub fields: &'a mut TransferRegistry,
    /// Master's filtered input state for this frame.
    pub input: &'a InputState,
    /// Master's input events since the previous frame.
    pub events: &'a EventQueue,
}

/// Application callbacks.
pub trait ClusterApp {
    /// Master only: update the transfer fields for this frame.
    fn pre_exchange(&mut self, _ctx: &mut FrameContext<'_>) {}

    /// Every process, after the fields are identical everywhere.
    fn post_exchange(&mut self, _ctx: &mut FrameContext<'_>) {}

    /// Every process, last.
    fn draw(&mut self, _ctx: &FrameContext<'_>) {}
}

/// Result of one call to `ClusterNode::frame`.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    /// Frame number.
    pub frame: u64,
    /// Master time since the session started.
    pub elapsed: Duration,
    /// Master only: who acknowledged, missed, joined or left.
    pub exchange: Option<ExchangeReport>,
}

enum Link {
    Idle,
    Master { sync: MasterSync, started: Instant },
    Slave { sync: SlaveSync, timeout: Option<Duration> },
}

/// One process of a cluster application.
pub struct ClusterNode {
    fields: TransferRegistry,
    link: Link,
    frame: u64,
    input: InputState,
    events: EventQueue,
    input_node: Option<Arc<InputNode>>,
    pending: Arc<Mutex<EventQueue>>,
    scratch: Vec<u8>,
}

impl Default for ClusterNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterNode {
    /// Creates a node with no fields and no link.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: TransferRegistry::new(),
            link: Link::Idle,
            frame: 0,
            input: InputState::new(),
            events: EventQueue::new(),
            input_node: None,
            pending: Arc::new(Mutex::new(EventQueue::new())),
            scratch: Vec::new(),
        }
    }

    /// Transfer fields.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &TransferRegistry {
        &self.fields
    }

    /// Transfer fields, for registration before start.
    #[inline]
    pub fn fields_mut(&mut self) -> &mut TransferRegistry {
        &mut self.fields
    }

    /// Role once started.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self.link {
            Link::Idle => None,
            Link::Master { .. } => Some(Role::Master),
            Link::Slave { .. } => Some(Role::Slave),
        }
    }

    /// Number of the last frame run.
    #[inline]
    #[must_use]
    pub const fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Master's input state as of the last frame.
    #[inline]
    #[must_use]
    pub fn input_state(&self) -> &InputState {
        &self.input
    }

    /// Master's input events of the last frame.
    #[inline]
    #[must_use]
    pub fn input_events(&self) -> &EventQueue {
        &self.events
    }

    /// Slaves connected to this master; zero elsewhere.
    #[must_use]
    pub fn slave_count(&self) -> usize {
        match &self.link {
            Link::Master { sync, .. } => sync.slave_count(),
            _ => 0,
        }
    }

    /// Address a master listens on.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            Link::Master { sync, .. } => Some(sync.local_addr()),
            _ => None,
        }
    }

    /// Feeds this master's frames from `node`. Events are collected between
    /// frames and the node's state is read at each frame.
    pub fn attach_input(&mut self, node: Arc<InputNode>) {
        let pending = Arc::clone(&self.pending);
        node.set_event_callback(move |queue| pending.lock().append_queue(queue));
        self.input_node = Some(node);
    }

    /// Freezes the fields and starts accepting slaves.
    pub fn start_master(&mut self, addr: SocketAddr, config: MasterConfig) -> NetResult<SocketAddr> {
        if !matches!(self.link, Link::Idle) {
            return Err(NetError::Config("cluster node already started".into()));
        }
        let sync = MasterSync::listen(addr, config)?;
        let local = sync.local_addr();
        self.fields.start();
        self.link = Link::Master { sync, started: Instant::now() };
        tracing::info!(target: "szg::cluster", "master started with {} fields", self.fields.len());
        Ok(local)
    }

    /// Joins a master. Fails with `TransferError::SchemaMismatch` when the
    /// fields differ from the master's.
    ///
    /// `frame_timeout` bounds how long `frame` waits; `None` waits forever.
    pub fn start_slave(
        &mut self,
        addr: SocketAddr,
        label: &str,
        connect_timeout: Duration,
        frame_timeout: Option<Duration>,
    ) -> NetResult<()> {
        if !matches!(self.link, Link::Idle) {
            return Err(NetError::Config("cluster node already started".into()));
        }
        let sync = SlaveSync::connect(addr, label, self.fields.schema(), connect_timeout)?;
        self.fields.start();
        self.link = Link::Slave { sync, timeout: frame_timeout };
        Ok(())
    }

    /// Resizes an internal field for the next frame. Master only.
    pub fn set_internal_field_size(&mut self, name: &str, count: usize) -> NetResult<()> {
        if matches!(self.link, Link::Slave { .. }) {
            return Err(NetError::MasterOnly(format!("resizing '{name}'")));
        }
        Ok(self.fields.set_internal_field_size(name, count)?)
    }

    /// Runs one frame.
    pub fn frame<A: ClusterApp + ?Sized>(&mut self, app: &mut A) -> NetResult<FrameReport> {
        let Self { fields, link, frame, input, events, input_node, pending, scratch } = self;
        let (role, elapsed, exchange) = match link {
            Link::Idle => return Err(NetError::Config("cluster node not started".into())),
            Link::Master { sync, started } => {
                *frame += 1;
                let elapsed = started.elapsed();
                *events = std::mem::take(&mut *pending.lock());
                if let Some(node) = input_node {
                    *input = node.state();
                }
                let mut ctx = FrameContext {
                    frame: *frame,
                    elapsed,
                    role: Role::Master,
                    fields: &mut *fields,
                    input: &*input,
                    events: &*events,
                };
                app.pre_exchange(&mut ctx);

                scratch.clear();
                fields.pack(scratch);
                let message = FrameMessage::encode(*frame, elapsed, input, events, scratch);
                let report = sync.exchange(fields, *frame, &message);
                (Role::Master, elapsed, Some(report))
            }
            Link::Slave { sync, timeout } => {
                let message = sync.receive(*timeout)?;
                fields.unpack(&message.fields)?;
                *frame = message.number;
                *input = message.input;
                *events = message.events;
                sync.acknowledge(message.number)?;
                (Role::Slave, message.elapsed, None)
            }
        };

        let mut ctx = FrameContext { frame: *frame, elapsed, role, fields, input, events };
        app.post_exchange(&mut ctx);
        app.draw(&ctx);
        Ok(FrameReport { frame: *frame, elapsed, exchange })
    }

    /// Ends the session and drops the link.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Master { mut sync, .. } => sync.stop(),
            Link::Slave { mut sync, .. } => sync.disconnect(),
            Link::Idle => return,
        }
        self.fields.stop();
        tracing::info!(target: "szg::cluster", "stopped after {} frames", self.frame);
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("role", &self.role())
            .field("frame", &self.frame)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}
