//! # Graphics Peer
//!
//! A scene graph that is client and server at once. Peers pull or push
//! subtrees, translate node IDs per connection and relay what they receive.
//!
//! ## Routed Frame
//!
//! ```text
//!  count:u32 | component_id:u64 * count | structured record
//! ```
//!
//! The component list is the relay history. A peer drops any record whose
//! history already names it or is longer than the hop limit.
//!
//! ## Design
//!
//! - Records always travel with the sender's node IDs; the receiver maps
//!   them through its per-connection table
//! - A created node first maps onto a same-name, same-type child of the
//!   mapped parent, so repeated pulls merge instead of duplicating
//! - Local alterations and relays share one ordering lock, so every
//!   connection sees changes in the order the database applied them
//! - Locks name a holder; only the holder may alter a locked node, and a
//!   closing connection releases everything it held

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::database::{Database, DatabaseNode, NodeLevel, ROOT_ID};
use crate::error::{DatabaseError, DatabaseResult, NetError, NetResult};
use crate::graphics::admin::AdminAction;
use crate::protocol::{Dictionary, GraphicsLanguage, RecordKind, StructuredRecord, WireReader, WireWriter};
use crate::server::{ConnectionHandler, ConnectionId, DataServer, DataServerConfig};
use crate::transport::{Frame, FrameKind};

static NEXT_COMPONENT: AtomicU64 = AtomicU64::new(1);

/// Who holds a node lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockHolder {
    /// This process.
    Local,
    /// A connected peer.
    Remote(ConnectionId),
}

/// Peer settings.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Name announced to other peers.
    pub name: String,
    /// Longest relay history accepted.
    pub hop_limit: usize,
    /// Limit for ping and dump replies.
    pub request_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self { name: "peer".into(), hop_limit: 8, request_timeout: Duration::from_secs(10) }
    }
}

/// Options for [`GraphicsPeer::pull_serial`] and [`GraphicsPeer::push_serial`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialOptions {
    /// Highest node level included in the dump and in later updates.
    pub send_level: NodeLevel,
    /// The remote keeps sending us its changes afterwards.
    pub remote_send_on: bool,
    /// We keep sending the remote our changes afterwards.
    pub local_send_on: bool,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self { send_level: NodeLevel::Stable, remote_send_on: true, local_send_on: false }
    }
}

#[derive(Debug, Default)]
struct PeerLink {
    label: String,
    remote_name: String,
    /// Remote node ID to local node ID.
    in_map: HashMap<i32, i32>,
    /// Local node ID to the remote's ID, from `node_map` replies.
    remote_ids: HashMap<i32, i32>,
    send_level: Option<NodeLevel>,
    /// Per-subtree caps on outgoing data; `None` blocks the subtree.
    filters: HashMap<i32, Option<NodeLevel>>,
    relay: bool,
    frame_time: Option<f32>,
}

impl PeerLink {
    fn allows(&self, level: NodeLevel, node: Option<&Arc<DatabaseNode>>) -> bool {
        match self.send_level {
            Some(cap) if level <= cap => {}
            _ => return false,
        }
        let mut cursor = node.cloned();
        while let Some(n) = cursor {
            if let Some(filter) = self.filters.get(&n.id()) {
                match filter {
                    Some(cap) if level <= *cap => {}
                    _ => return false,
                }
            }
            cursor = n.parent();
        }
        true
    }
}

#[derive(Default)]
struct Replies {
    done: Mutex<HashSet<u32>>,
    arrived: Condvar,
}

impl Replies {
    fn complete(&self, request: u32) {
        self.done.lock().insert(request);
        self.arrived.notify_all();
    }

    fn wait(&self, request: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        loop {
            if done.remove(&request) {
                return true;
            }
            if self.arrived.wait_until(&mut done, deadline).timed_out() {
                return done.remove(&request);
            }
        }
    }
}

type Incoming = (ConnectionId, Vec<u64>, StructuredRecord);

struct PeerCore {
    config: PeerConfig,
    component: u64,
    database: Database,
    links: Mutex<HashMap<ConnectionId, PeerLink>>,
    locks: Mutex<HashMap<i32, LockHolder>>,
    order: Mutex<()>,
    replies: Replies,
    next_request: AtomicU32,
    use_local: AtomicBool,
    queueing: AtomicBool,
    queued_tx: Sender<Incoming>,
    queued_rx: Receiver<Incoming>,
}

impl PeerCore {
    fn dictionary(&self) -> &Dictionary {
        self.database.language().dictionary()
    }

    fn language(&self) -> &GraphicsLanguage {
        self.database.language()
    }

    fn with_link<R>(&self, server: &DataServer, conn: ConnectionId, f: impl FnOnce(&mut PeerLink) -> R) -> R {
        let mut links = self.links.lock();
        let link = links.entry(conn).or_insert_with(|| PeerLink {
            label: server.label(conn).unwrap_or_else(|| conn.to_string()),
            ..PeerLink::default()
        });
        f(link)
    }

    fn send(&self, server: &DataServer, conn: ConnectionId, history: &[u64], record: &StructuredRecord) -> NetResult<()> {
        server.send_to(conn, FrameKind::Routed, &encode_routed(history, record))
    }

    fn send_admin(&self, server: &DataServer, conn: ConnectionId, action: AdminAction, node: i32, text: &str) -> NetResult<()> {
        let record = self.language().admin(action.name(), node, text);
        self.send(server, conn, &[self.component], &record)
    }

    fn holder_blocks(&self, node: i32, requester: LockHolder) -> bool {
        matches!(self.locks.lock().get(&node), Some(holder) if *holder != requester)
    }

    /// Level of a record for send filtering, and the node it concerns.
    fn classify(&self, record: &StructuredRecord) -> (NodeLevel, Option<Arc<DatabaseNode>>) {
        let kind = RecordKind::of(record);
        let anchor = match kind {
            Some(RecordKind::MakeNode | RecordKind::Insert | RecordKind::Permute) => record.int("parent_ID"),
            _ => record.int("ID"),
        };
        let node = anchor.and_then(|id| self.database.get_node_ref(id));
        let level = match kind {
            Some(k) if k.is_structural() => NodeLevel::Structure,
            _ => node.as_ref().map_or(NodeLevel::Stable, |n| n.level()),
        };
        (level, node)
    }

    /// Sends a record that carries local IDs to every link that wants it.
    fn fan_out(&self, server: &DataServer, from: Option<ConnectionId>, history: &[u64], record: &StructuredRecord) {
        let (level, node) = self.classify(record);
        let targets: Vec<ConnectionId> = self
            .links
            .lock()
            .iter()
            .filter(|(id, link)| Some(**id) != from && link.allows(level, node.as_ref()))
            .map(|(id, _)| *id)
            .collect();
        if targets.is_empty() {
            return;
        }
        let mut path = history.to_vec();
        path.push(self.component);
        let bytes = encode_routed(&path, record);
        for id in targets {
            if let Err(err) = server.send_to(id, FrameKind::Routed, &bytes) {
                tracing::warn!(target: "szg::peer", "{}: send to {id} failed: {err}", self.config.name);
            }
        }
    }

    fn alter_local(&self, server: &DataServer, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let _order = self.order.lock();
        let (_, anchor) = self.classify(record);
        if let Some(node) = anchor {
            if self.holder_blocks(node.id(), LockHolder::Local) {
                return Err(DatabaseError::Locked(node.id()));
            }
        }
        let node = self.database.alter(record)?;
        self.fan_out(server, None, &[], record);
        Ok(node)
    }

    fn receive(&self, server: &DataServer, conn: ConnectionId, payload: &[u8]) {
        let (history, record) = match decode_routed(self.dictionary(), payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(target: "szg::peer", "{}: unreadable frame from {conn}: {err}", self.config.name);
                return;
            }
        };
        if history.contains(&self.component) {
            tracing::debug!(target: "szg::peer", "{}: dropping looped {}", self.config.name, record.name());
            return;
        }
        if history.len() > self.config.hop_limit {
            tracing::debug!(target: "szg::peer", "{}: dropping {} after {} hops", self.config.name, record.name(), history.len());
            return;
        }
        if RecordKind::of(&record) == Some(RecordKind::Admin) {
            self.admin(server, conn, &record);
        } else if self.queueing.load(Ordering::Acquire) {
            let _ = self.queued_tx.send((conn, history, record));
        } else {
            self.apply_remote(server, conn, &history, record);
        }
    }

    /// Maps remote IDs to local ones, applies and relays.
    fn apply_remote(&self, server: &DataServer, conn: ConnectionId, history: &[u64], mut record: StructuredRecord) {
        let _order = self.order.lock();
        if self.use_local.load(Ordering::Acquire) {
            if let Err(err) = self.apply_mapped(server, conn, &mut record) {
                tracing::warn!(target: "szg::peer", "{}: {} from {conn} rejected: {err}", self.config.name, record.name());
                return;
            }
        }
        if self.with_link(server, conn, |link| link.relay) {
            self.fan_out(server, Some(conn), history, &record);
        }
    }

    fn apply_mapped(&self, server: &DataServer, conn: ConnectionId, record: &mut StructuredRecord) -> DatabaseResult<()> {
        let kind = RecordKind::of(record).ok_or_else(|| DatabaseError::WrongRecord {
            expected: "graphics".into(),
            actual: record.name().to_owned(),
        })?;
        let holder = LockHolder::Remote(conn);
        let map = |link: &PeerLink, id: i32| -> DatabaseResult<i32> {
            match link.in_map.get(&id) {
                Some(local) => Ok(*local),
                None if id == ROOT_ID => Ok(ROOT_ID),
                None => Err(DatabaseError::UnknownNode(id)),
            }
        };
        match kind {
            RecordKind::MakeNode | RecordKind::Insert => {
                let remote_id = record.int("ID").unwrap_or(-1);
                let (parent, child, known) = self.with_link(server, conn, |link| {
                    let parent = map(link, record.int("parent_ID").unwrap_or(ROOT_ID));
                    let child = match record.int("child_ID") {
                        Some(-1) | None => Ok(-1),
                        Some(id) => map(link, id),
                    };
                    (parent, child, link.in_map.get(&remote_id).copied())
                });
                let parent = parent?;
                if self.holder_blocks(parent, holder) {
                    return Err(DatabaseError::Locked(parent));
                }
                record.patch_int("parent_ID", parent);
                if let Some(local) = known.filter(|id| self.database.get_node_ref(*id).is_some()) {
                    record.patch_int("ID", local);
                    return Ok(());
                }
                let name = record.string("name").unwrap_or_default();
                let type_name = record.string("type").unwrap_or_default();
                let existing = if kind == RecordKind::MakeNode {
                    self.database.get_node_ref(parent).and_then(|p| {
                        p.children()
                            .into_iter()
                            .find(|c| c.name() == name && c.type_name() == type_name)
                    })
                } else {
                    None
                };
                if kind == RecordKind::Insert {
                    record.patch_int("child_ID", child?);
                }
                let local = match existing {
                    Some(node) => {
                        record.patch_int("ID", node.id());
                        node.id()
                    }
                    None => {
                        record.patch_int("ID", -1);
                        self.database.alter(record)?.id()
                    }
                };
                self.with_link(server, conn, |link| link.in_map.insert(remote_id, local));
                let _ = self.send_admin(server, conn, AdminAction::NodeMap, remote_id, &local.to_string());
            }
            RecordKind::Permute => {
                let (parent, children) = self.with_link(server, conn, |link| {
                    let parent = map(link, record.int("parent_ID").unwrap_or(ROOT_ID));
                    let children: Vec<i32> = record
                        .ints("child_IDs")
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|id| link.in_map.get(id).copied())
                        .collect();
                    (parent, children)
                });
                let parent = parent?;
                if self.holder_blocks(parent, holder) {
                    return Err(DatabaseError::Locked(parent));
                }
                record.patch_int("parent_ID", parent);
                if let Some(ids) = record.ints_mut("child_IDs") {
                    *ids = children;
                }
                self.database.alter(record)?;
            }
            _ => {
                let remote_id = record.int("ID").unwrap_or(-1);
                let local = self.with_link(server, conn, |link| link.in_map.get(&remote_id).copied());
                let local = local.ok_or(DatabaseError::UnknownNode(remote_id))?;
                if self.holder_blocks(local, holder) {
                    return Err(DatabaseError::Locked(local));
                }
                record.patch_int("ID", local);
                self.database.alter(record)?;
                if matches!(kind, RecordKind::Erase | RecordKind::Cut) {
                    let database = &self.database;
                    self.with_link(server, conn, |link| {
                        link.in_map.retain(|_, id| database.get_node_ref(*id).is_some());
                    });
                }
            }
        }
        Ok(())
    }

    fn admin(&self, server: &DataServer, conn: ConnectionId, record: &StructuredRecord) {
        let action_name = record.string("action").unwrap_or_default();
        let Some(action) = AdminAction::from_name(&action_name) else {
            tracing::warn!(target: "szg::peer", "{}: unknown admin action '{action_name}'", self.config.name);
            return;
        };
        let node = record.int("node_ID").unwrap_or(-1);
        let text = record.string("name").unwrap_or_default();
        let request = u32::try_from(node).unwrap_or(u32::MAX);
        tracing::debug!(target: "szg::peer", "{}: {action} {node} '{text}' from {conn}", self.config.name);
        match action {
            AdminAction::SetName => self.with_link(server, conn, |link| link.remote_name = text),
            AdminAction::Map => {
                let mut words = text.split_whitespace();
                let target = words.next().and_then(|w| w.parse().ok()).unwrap_or(ROOT_ID);
                let level = parse_level(words.next());
                self.with_link(server, conn, |link| {
                    link.in_map.insert(node, target);
                    if level.is_some() {
                        link.send_level = level;
                    }
                });
            }
            AdminAction::NodeMap => {
                if let Ok(remote) = text.parse() {
                    self.with_link(server, conn, |link| {
                        link.remote_ids.insert(node, remote);
                        link.in_map.insert(remote, node);
                    });
                }
            }
            AdminAction::PullSerial => {
                let mut words = text.split_whitespace();
                let request = words.next().and_then(|w| w.parse::<i32>().ok()).unwrap_or(-1);
                let level = parse_level(words.next()).unwrap_or(NodeLevel::Stable);
                let keep_sending = words.next() == Some("1");
                if let Some(remote_root) = words.next().and_then(|w| w.parse().ok()) {
                    self.with_link(server, conn, |link| {
                        link.in_map.insert(remote_root, node);
                        link.remote_ids.insert(node, remote_root);
                    });
                }
                self.serve_dump(server, conn, node, level, keep_sending);
                let _ = self.send_admin(server, conn, AdminAction::DumpDone, request, "");
            }
            AdminAction::DumpDone | AdminAction::PingReply => self.replies.complete(request),
            AdminAction::Ping => {
                let _ = self.send_admin(server, conn, AdminAction::PingReply, node, "");
            }
            AdminAction::Lock | AdminAction::LockBelow => {
                let ids = self.lock_targets(node, action == AdminAction::LockBelow);
                if !self.lock(&ids, LockHolder::Remote(conn)) {
                    tracing::warn!(target: "szg::peer", "{}: lock of {node} for {conn} refused", self.config.name);
                }
            }
            AdminAction::Unlock | AdminAction::UnlockBelow => {
                let ids = self.lock_targets(node, action == AdminAction::UnlockBelow);
                self.unlock(&ids, LockHolder::Remote(conn));
            }
            AdminAction::FrameTime => {
                let time = text.parse().ok();
                self.with_link(server, conn, |link| link.frame_time = time);
            }
        }
    }

    fn serve_dump(&self, server: &DataServer, conn: ConnectionId, root: i32, level: NodeLevel, keep_sending: bool) {
        let _order = self.order.lock();
        let records = match self.database.dump_below(root, false) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(target: "szg::peer", "{}: cannot dump {root}: {err}", self.config.name);
                return;
            }
        };
        let mut sent = 0usize;
        for record in &records {
            let (record_level, _) = self.classify(record);
            if record_level <= level && self.send(server, conn, &[self.component], record).is_ok() {
                sent += 1;
            }
        }
        if keep_sending {
            self.with_link(server, conn, |link| link.send_level = Some(level));
        }
        tracing::info!(target: "szg::peer", "{}: sent {sent} records below {root} to {conn}", self.config.name);
    }

    fn lock_targets(&self, node: i32, below: bool) -> Vec<i32> {
        if !below {
            return vec![node];
        }
        let mut ids = Vec::new();
        let mut stack: Vec<_> = self.database.get_node_ref(node).into_iter().collect();
        while let Some(n) = stack.pop() {
            ids.push(n.id());
            stack.extend(n.children());
        }
        ids
    }

    fn lock(&self, ids: &[i32], holder: LockHolder) -> bool {
        let mut locks = self.locks.lock();
        if ids.is_empty() || ids.iter().any(|id| matches!(locks.get(id), Some(h) if *h != holder)) {
            return false;
        }
        for id in ids {
            locks.insert(*id, holder);
        }
        true
    }

    fn unlock(&self, ids: &[i32], holder: LockHolder) -> bool {
        let mut locks = self.locks.lock();
        let mut any = false;
        for id in ids {
            if locks.get(id) == Some(&holder) {
                locks.remove(id);
                any = true;
            }
        }
        any
    }
}

impl ConnectionHandler for PeerCore {
    fn on_connect(&self, server: &DataServer, conn: ConnectionId) {
        self.with_link(server, conn, |_| ());
        let _ = self.send_admin(server, conn, AdminAction::SetName, -1, &self.config.name);
    }

    fn on_frame(&self, server: &DataServer, conn: ConnectionId, frame: Frame) {
        match frame.kind {
            FrameKind::Routed => self.receive(server, conn, &frame.payload),
            other => tracing::debug!(target: "szg::peer", "{}: ignoring {other:?} from {conn}", self.config.name),
        }
    }

    fn on_disconnect(&self, _server: &DataServer, conn: ConnectionId) {
        let link = self.links.lock().remove(&conn);
        self.locks.lock().retain(|_, holder| *holder != LockHolder::Remote(conn));
        if let Some(link) = link {
            tracing::info!(target: "szg::peer", "{}: peer '{}' ({}) left", self.config.name, link.remote_name, link.label);
        }
    }
}

/// A replicating scene graph that connects to other peers.
pub struct GraphicsPeer {
    core: Arc<PeerCore>,
    server: DataServer,
}

impl GraphicsPeer {
    /// Creates a peer with an empty database and no connections.
    #[must_use]
    pub fn new(config: PeerConfig) -> Self {
        let database = Database::new();
        let (queued_tx, queued_rx) = unbounded();
        let server_config = DataServerConfig {
            name: config.name.clone(),
            dictionary: Some(Arc::clone(database.language().dictionary())),
            ..DataServerConfig::default()
        };
        let core = Arc::new(PeerCore {
            config,
            component: (u64::from(std::process::id()) << 32) | NEXT_COMPONENT.fetch_add(1, Ordering::Relaxed),
            database,
            links: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            order: Mutex::new(()),
            replies: Replies::default(),
            next_request: AtomicU32::new(1),
            use_local: AtomicBool::new(true),
            queueing: AtomicBool::new(false),
            queued_tx,
            queued_rx,
        });
        let handler: Weak<dyn ConnectionHandler> = Arc::downgrade(&core) as Weak<dyn ConnectionHandler>;
        let server = DataServer::new(server_config, handler);
        Self { core, server }
    }

    /// Announced name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    /// ID this peer adds to relay histories.
    #[must_use]
    pub fn component_id(&self) -> u64 {
        self.core.component
    }

    /// Accepts peer connections on `addr`.
    pub fn listen(&self, addr: SocketAddr) -> NetResult<SocketAddr> {
        self.server.listen(addr)
    }

    /// Bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// The local database. Change it through [`Self::alter`].
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.core.database
    }

    /// Record builders.
    #[must_use]
    pub fn language(&self) -> &GraphicsLanguage {
        self.core.language()
    }

    /// Applies a record locally and sends it to every connection whose send
    /// level and filters admit it.
    pub fn alter(&self, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let result = self.core.alter_local(&self.server, record);
        if let Err(err) = &result {
            tracing::warn!(target: "szg::peer", "{}: alter {} failed: {err}", self.name(), record.name());
        }
        result
    }

    /// Creates a node through [`Self::alter`].
    pub fn new_node(&self, parent: i32, name: &str, type_name: &str) -> DatabaseResult<Arc<DatabaseNode>> {
        let mut record = self.language().make_node(parent, -1, name, type_name);
        self.alter(&mut record)
    }

    fn resolve(&self, label: &str) -> NetResult<ConnectionId> {
        if let Some(id) = self.server.find_label(label) {
            return Ok(id);
        }
        self.core
            .links
            .lock()
            .iter()
            .find(|(_, link)| link.remote_name == label)
            .map(|(id, _)| *id)
            .ok_or_else(|| NetError::UnknownConnection(label.to_owned()))
    }

    /// Connects to another peer under a unique label.
    pub fn connect_to_peer(&self, label: &str, addr: SocketAddr) -> NetResult<ConnectionId> {
        if self.resolve(label).is_ok() {
            return Err(NetError::DuplicateLabel(label.to_owned()));
        }
        let id = self.server.connect(addr, label)?;
        self.core.with_link(&self.server, id, |link| link.label = label.to_owned());
        tracing::info!(target: "szg::peer", "{}: connected to '{label}' at {addr}", self.name());
        Ok(id)
    }

    /// Closes the connection with this label or remote name.
    pub fn close_connection(&self, label: &str) -> bool {
        self.resolve(label).map(|id| self.server.close(id)).unwrap_or(false)
    }

    /// Closes every connection and empties the database.
    pub fn close_all_and_reset(&self) {
        for id in self.server.connection_ids() {
            self.server.close(id);
        }
        self.core.locks.lock().clear();
        self.core.database.reset();
        tracing::info!(target: "szg::peer", "{}: closed everything and reset", self.name());
    }

    fn request(&self) -> u32 {
        self.core.next_request.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
    }

    fn wait_reply(&self, request: u32, what: &str) -> NetResult<()> {
        if self.core.replies.wait(request, self.core.config.request_timeout) {
            Ok(())
        } else {
            Err(NetError::Timeout(what.to_owned()))
        }
    }

    /// Copies the remote subtree below `remote_root` under `local_root`.
    ///
    /// Blocks until the remote's dump has been applied.
    pub fn pull_serial(&self, label: &str, remote_root: i32, local_root: i32, options: SerialOptions) -> NetResult<()> {
        let conn = self.resolve(label)?;
        if self.core.database.get_node_ref(local_root).is_none() {
            return Err(DatabaseError::UnknownNode(local_root).into());
        }
        self.core.with_link(&self.server, conn, |link| {
            link.in_map.insert(remote_root, local_root);
            link.remote_ids.insert(local_root, remote_root);
            if options.local_send_on {
                link.send_level = Some(options.send_level);
            }
        });
        let request = self.request();
        let text = format!(
            "{request} {} {} {local_root}",
            options.send_level as u8,
            u8::from(options.remote_send_on)
        );
        self.core.send_admin(&self.server, conn, AdminAction::PullSerial, remote_root, &text)?;
        self.wait_reply(request, "pull_serial")?;
        tracing::info!(target: "szg::peer", "{}: pulled {remote_root} from '{label}' into {local_root}", self.name());
        Ok(())
    }

    /// Copies our subtree below `local_root` under the remote's `remote_root`.
    ///
    /// Blocks until the remote has applied it.
    pub fn push_serial(&self, label: &str, local_root: i32, remote_root: i32, options: SerialOptions) -> NetResult<()> {
        let conn = self.resolve(label)?;
        let back = if options.remote_send_on { (options.send_level as u8).to_string() } else { "-".into() };
        self.core
            .send_admin(&self.server, conn, AdminAction::Map, local_root, &format!("{remote_root} {back}"))?;
        self.core.with_link(&self.server, conn, |link| {
            link.remote_ids.insert(local_root, remote_root);
            link.in_map.insert(remote_root, local_root);
        });
        self.core.serve_dump(&self.server, conn, local_root, options.send_level, options.local_send_on);
        self.ping_peer(label).map(|_| ())
    }

    /// Round-trip time to a peer.
    pub fn ping_peer(&self, label: &str) -> NetResult<Duration> {
        let conn = self.resolve(label)?;
        let request = self.request();
        let started = Instant::now();
        self.core
            .send_admin(&self.server, conn, AdminAction::Ping, i32::try_from(request).unwrap_or(0), "")?;
        self.wait_reply(request, "ping")?;
        Ok(started.elapsed())
    }

    /// Tells every peer our frame time. Returns how many were told.
    pub fn broadcast_frame_time(&self, milliseconds: f32) -> usize {
        self.server
            .connection_ids()
            .into_iter()
            .filter(|id| {
                self.core
                    .send_admin(&self.server, *id, AdminAction::FrameTime, -1, &milliseconds.to_string())
                    .is_ok()
            })
            .count()
    }

    /// Latest frame time a peer announced.
    #[must_use]
    pub fn remote_frame_time(&self, label: &str) -> Option<f32> {
        let conn = self.resolve(label).ok()?;
        self.core.links.lock().get(&conn).and_then(|link| link.frame_time)
    }

    /// The remote's ID for one of our nodes, once it has told us.
    #[must_use]
    pub fn remote_node_id(&self, label: &str, local: i32) -> Option<i32> {
        let conn = self.resolve(label).ok()?;
        self.core.links.lock().get(&conn).and_then(|link| link.remote_ids.get(&local).copied())
    }

    /// Our ID for one of the remote's nodes.
    #[must_use]
    pub fn local_node_id(&self, label: &str, remote: i32) -> Option<i32> {
        let conn = self.resolve(label).ok()?;
        self.core.links.lock().get(&conn).and_then(|link| link.in_map.get(&remote).copied())
    }

    /// One line per connection.
    #[must_use]
    pub fn print_connections(&self) -> String {
        let links = self.core.links.lock();
        let mut ids: Vec<_> = links.keys().copied().collect();
        ids.sort_unstable();
        let mut out = String::new();
        for id in ids {
            let link = &links[&id];
            let level = link.send_level.map_or_else(|| "off".to_owned(), |l| format!("{l:?}"));
            let _ = writeln!(
                out,
                "{id} '{}' remote '{}': {} mapped, send {level}, relay {}, {} filters",
                link.label,
                link.remote_name,
                link.in_map.len(),
                link.relay,
                link.filters.len()
            );
        }
        out
    }

    /// Labels of every connection.
    #[must_use]
    pub fn connection_labels(&self) -> Vec<String> {
        let mut labels: Vec<_> = self.core.links.lock().values().map(|l| l.label.clone()).collect();
        labels.sort();
        labels
    }

    fn update_link(&self, label: &str, f: impl FnOnce(&mut PeerLink)) -> bool {
        match self.resolve(label) {
            Ok(conn) => {
                self.core.with_link(&self.server, conn, f);
                true
            }
            Err(_) => false,
        }
    }

    /// Forward what this connection sends us to the other connections.
    pub fn set_relay(&self, label: &str, relay: bool) -> bool {
        self.update_link(label, |link| link.relay = relay)
    }

    /// Level of local changes sent to a connection; `None` stops sending.
    pub fn set_send_level(&self, label: &str, level: Option<NodeLevel>) -> bool {
        self.update_link(label, |link| link.send_level = level)
    }

    /// Caps what a connection receives for nodes at or below `node`.
    /// `None` blocks the subtree.
    pub fn filter_data_below(&self, label: &str, node: i32, level: Option<NodeLevel>) -> bool {
        self.update_link(label, |link| {
            link.filters.insert(node, level);
        })
    }

    /// Removes a filter set by [`Self::filter_data_below`].
    pub fn clear_filter(&self, label: &str, node: i32) -> bool {
        self.update_link(label, |link| {
            link.filters.remove(&node);
        })
    }

    /// Who holds the lock on a node.
    #[must_use]
    pub fn lock_holder(&self, node: i32) -> Option<LockHolder> {
        self.core.locks.lock().get(&node).copied()
    }

    /// Locks a node for this process.
    pub fn lock_node(&self, node: i32) -> bool {
        self.core.lock(&[node], LockHolder::Local)
    }

    /// Locks a node and everything below it, or nothing if any is taken.
    pub fn lock_node_below(&self, node: i32) -> bool {
        let ids = self.core.lock_targets(node, true);
        self.core.lock(&ids, LockHolder::Local)
    }

    /// Releases a local lock.
    pub fn unlock_node(&self, node: i32) -> bool {
        self.core.unlock(&[node], LockHolder::Local)
    }

    /// Releases local locks on a subtree.
    pub fn unlock_node_below(&self, node: i32) -> bool {
        let ids = self.core.lock_targets(node, true);
        self.core.unlock(&ids, LockHolder::Local)
    }

    fn remote_lock(&self, label: &str, remote: i32, action: AdminAction) -> NetResult<()> {
        let conn = self.resolve(label)?;
        self.core.send_admin(&self.server, conn, action, remote, "")?;
        self.ping_peer(label).map(|_| ())
    }

    /// Asks a peer to lock one of its nodes for us.
    pub fn lock_remote_node(&self, label: &str, remote: i32) -> NetResult<()> {
        self.remote_lock(label, remote, AdminAction::Lock)
    }

    /// Asks a peer to lock one of its subtrees for us.
    pub fn lock_remote_node_below(&self, label: &str, remote: i32) -> NetResult<()> {
        self.remote_lock(label, remote, AdminAction::LockBelow)
    }

    /// Releases a lock we hold on a peer.
    pub fn unlock_remote_node(&self, label: &str, remote: i32) -> NetResult<()> {
        self.remote_lock(label, remote, AdminAction::Unlock)
    }

    /// Releases our locks on a peer's subtree.
    pub fn unlock_remote_node_below(&self, label: &str, remote: i32) -> NetResult<()> {
        self.remote_lock(label, remote, AdminAction::UnlockBelow)
    }

    /// Whether received records change the local database. When off, the
    /// peer only relays.
    pub fn use_local_database(&self, on: bool) {
        self.core.use_local.store(on, Ordering::Release);
    }

    /// Holds received records until [`Self::consume`] instead of applying
    /// them on the connection threads.
    pub fn queue_data(&self, on: bool) {
        self.core.queueing.store(on, Ordering::Release);
    }

    /// Applies queued records on the calling thread. Returns how many.
    pub fn consume(&self) -> usize {
        let mut count = 0;
        while let Ok((conn, history, record)) = self.core.queued_rx.try_recv() {
            self.core.apply_remote(&self.server, conn, &history, record);
            count += 1;
        }
        count
    }

    /// Closes every connection and joins the threads.
    pub fn stop(&self) {
        self.server.stop();
    }
}

impl std::fmt::Debug for GraphicsPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPeer")
            .field("name", &self.name())
            .field("component", &self.core.component)
            .field("database", &self.core.database)
            .field("server", &self.server)
            .finish()
    }
}

fn parse_level(word: Option<&str>) -> Option<NodeLevel> {
    word.and_then(|w| w.parse::<u8>().ok()).and_then(NodeLevel::from_u8)
}

fn encode_routed(history: &[u64], record: &StructuredRecord) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(4 + history.len() * 8 + record.encoded_len());
    w.write_u32(u32::try_from(history.len()).unwrap_or(u32::MAX));
    for component in history {
        w.write_u64(*component);
    }
    record.encode(&mut w);
    w.into_inner()
}

fn decode_routed(dictionary: &Dictionary, bytes: &[u8]) -> NetResult<(Vec<u64>, StructuredRecord)> {
    let truncated = || NetError::Protocol("routed frame truncated".into());
    let mut r = WireReader::new(bytes);
    let count = r.read_u32().ok_or_else(truncated)? as usize;
    if count > r.remaining() / 8 {
        return Err(truncated());
    }
    let mut history = Vec::with_capacity(count);
    for _ in 0..count {
        history.push(r.read_u64().ok_or_else(truncated)?);
    }
    let (record, _) = StructuredRecord::decode(dictionary, r.rest())?;
    Ok((history, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routed_round_trip() {
        let language = GraphicsLanguage::new();
        let record = language.erase(5);
        let bytes = encode_routed(&[7, 9], &record);
        let (history, back) = decode_routed(language.dictionary(), &bytes).unwrap();
        assert_eq!(history, vec![7, 9]);
        assert_eq!(back, record);
        assert!(decode_routed(language.dictionary(), &bytes[..6]).is_err());
    }

    #[test]
    fn test_link_filters() {
        let database = Database::new();
        let group = database.new_node(ROOT_ID, "group", "transform").unwrap();
        let leaf = database.new_node(group.id(), "leaf", "transform").unwrap();
        let mut link = PeerLink { send_level: Some(NodeLevel::Stable), ..PeerLink::default() };
        assert!(link.allows(NodeLevel::Stable, Some(&leaf)));
        assert!(!link.allows(NodeLevel::Transient, Some(&leaf)));
        link.filters.insert(group.id(), None);
        assert!(!link.allows(NodeLevel::Structure, Some(&leaf)));
        link.filters.insert(group.id(), Some(NodeLevel::Structure));
        assert!(link.allows(NodeLevel::Structure, Some(&leaf)));
        assert!(!link.allows(NodeLevel::Stable, Some(&leaf)));
        link.send_level = None;
        assert!(!link.allows(NodeLevel::Structure, None));
    }

    #[test]
    fn test_local_locks() {
        let peer = GraphicsPeer::new(PeerConfig::default());
        let node = peer.new_node(ROOT_ID, "arm", "transform").unwrap();
        assert!(peer.lock_node(node.id()));
        assert_eq!(peer.lock_holder(node.id()), Some(LockHolder::Local));
        let mut record = peer.language().transform(node.id(), &szg_core::Matrix4::translation(1.0, 0.0, 0.0));
        assert!(peer.alter(&mut record).is_ok());

        peer.core.locks.lock().insert(node.id(), LockHolder::Remote(ConnectionId(4)));
        assert_eq!(peer.alter(&mut record).unwrap_err(), DatabaseError::Locked(node.id()));
        assert!(!peer.unlock_node(node.id()));
        peer.stop();
    }
}
