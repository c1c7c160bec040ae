//! # Database Nodes
//!
//! One node of the replicated scene graph.
//!
//! ## Ownership
//!
//! ```text
//!  parent ──Arc──▶ child        (children own their subtrees)
//!  child  ──Weak─▶ parent       (no cycles)
//!  caller ──Arc──▶ node         (a held reference outlives erase)
//! ```
//!
//! Tree links change only under the database's tree lock. Name, info and
//! payload have their own locks so readers never wait on a structure change.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use szg_core::Matrix4;

use crate::database::payload::NodePayload;
use crate::error::{DatabaseError, DatabaseResult};
use crate::protocol::{GraphicsLanguage, RecordKind, StructuredRecord};

/// Closed set of node types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// The tree root, ID 0.
    Root = 0,
    /// Grouping node with no payload.
    Name = 1,
    /// 4x4 transform.
    Transform = 2,
    /// Point positions.
    Points = 3,
    /// RGBA colors.
    Color4 = 4,
    /// Vertex indices.
    Index = 5,
    /// Texture image.
    Texture = 6,
    /// Surface material.
    Material = 7,
    /// Visibility switch.
    Visibility = 8,
    /// Culling sphere.
    BoundingSphere = 9,
    /// Primitive batch.
    Drawable = 10,
    /// Render state.
    GraphicsState = 11,
}

impl NodeKind {
    /// Every kind.
    pub const ALL: [Self; 12] = [
        Self::Root,
        Self::Name,
        Self::Transform,
        Self::Points,
        Self::Color4,
        Self::Index,
        Self::Texture,
        Self::Material,
        Self::Visibility,
        Self::BoundingSphere,
        Self::Drawable,
        Self::GraphicsState,
    ];

    /// Type name as carried by `make node`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Name => "name",
            Self::Transform => "transform",
            Self::Points => "points",
            Self::Color4 => "color4",
            Self::Index => "index",
            Self::Texture => "texture",
            Self::Material => "material",
            Self::Visibility => "visibility",
            Self::BoundingSphere => "bounding sphere",
            Self::Drawable => "drawable",
            Self::GraphicsState => "graphics state",
        }
    }

    /// Kind with this type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Payload record understood by nodes of this kind.
    #[must_use]
    pub const fn record(self) -> Option<RecordKind> {
        match self {
            Self::Root | Self::Name => None,
            Self::Transform => Some(RecordKind::Transform),
            Self::Points => Some(RecordKind::Points),
            Self::Color4 => Some(RecordKind::Color4),
            Self::Index => Some(RecordKind::Index),
            Self::Texture => Some(RecordKind::Texture),
            Self::Material => Some(RecordKind::Material),
            Self::Visibility => Some(RecordKind::Visibility),
            Self::BoundingSphere => Some(RecordKind::BoundingSphere),
            Self::Drawable => Some(RecordKind::Drawable),
            Self::GraphicsState => Some(RecordKind::GraphicsState),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How much a node matters to a peer deciding what to forward.
///
/// A connection with send level `L` receives updates for nodes whose level
/// is at most `L`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeLevel {
    /// Structure only.
    Structure = 0,
    /// Slowly changing data.
    #[default]
    Stable = 1,
    /// Data that may be skipped.
    Optional = 2,
    /// Per-frame data.
    Transient = 3,
}

impl NodeLevel {
    /// Decodes a wire or config value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Structure),
            1 => Some(Self::Stable),
            2 => Some(Self::Optional),
            3 => Some(Self::Transient),
            _ => None,
        }
    }
}

/// A scene-graph node.
pub struct DatabaseNode {
    id: i32,
    kind: NodeKind,
    name: RwLock<String>,
    info: RwLock<String>,
    parent: RwLock<Weak<DatabaseNode>>,
    children: RwLock<Vec<Arc<DatabaseNode>>>,
    payload: Mutex<NodePayload>,
    active: AtomicBool,
    level: AtomicU8,
}

impl DatabaseNode {
    pub(crate) fn new(id: i32, kind: NodeKind, name: &str, payload: NodePayload) -> Self {
        Self {
            id,
            kind,
            name: RwLock::new(name.to_owned()),
            info: RwLock::new(String::new()),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            payload: Mutex::new(payload),
            active: AtomicBool::new(true),
            level: AtomicU8::new(NodeLevel::Stable as u8),
        }
    }

    /// Node ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Node kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Type name.
    #[inline]
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Free-form info string.
    #[must_use]
    pub fn info(&self) -> String {
        self.info.read().clone()
    }

    /// Parent, or `None` for the root and erased nodes.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.read().upgrade()
    }

    /// Parent ID, or -1.
    #[must_use]
    pub fn parent_id(&self) -> i32 {
        self.parent().map_or(-1, |p| p.id)
    }

    /// Children in order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.read().clone()
    }

    /// Child IDs in order.
    #[must_use]
    pub fn child_ids(&self) -> Vec<i32> {
        self.children.read().iter().map(|c| c.id).collect()
    }

    /// Number of children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// True until the node is erased or cut.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Forwarding level.
    #[must_use]
    pub fn level(&self) -> NodeLevel {
        NodeLevel::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Sets the forwarding level.
    pub fn set_level(&self, level: NodeLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Strong references held anywhere, the tree included.
    #[must_use]
    pub fn ref_count(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }

    /// Copy of the payload.
    #[must_use]
    pub fn payload(&self) -> NodePayload {
        self.payload.lock().clone()
    }

    /// Matrix of a transform node.
    #[must_use]
    pub fn transform(&self) -> Option<Matrix4> {
        match &*self.payload.lock() {
            NodePayload::Transform(m) => Some(*m),
            _ => None,
        }
    }

    /// True if `self` is `ancestor` or lies below it.
    #[must_use]
    pub fn is_below(&self, ancestor: i32) -> bool {
        if self.id == ancestor {
            return true;
        }
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if node.id == ancestor {
                return true;
            }
            cursor = node.parent();
        }
        false
    }

    /// Record that restores this node's payload, or `None` for kinds
    /// without one.
    #[must_use]
    pub fn dump_data(&self, language: &GraphicsLanguage) -> Option<StructuredRecord> {
        self.payload.lock().dump(self.id, language)
    }

    /// Applies a `name` record or this kind's payload record.
    ///
    /// A rejected record leaves the node unchanged.
    pub fn receive_data(&self, record: &StructuredRecord) -> DatabaseResult<()> {
        if RecordKind::of(record) == Some(RecordKind::Name) {
            let name = record.string("name").unwrap_or_default();
            let info = record.string("info").unwrap_or_default();
            *self.name.write() = name;
            *self.info.write() = info;
            return Ok(());
        }
        match self.kind.record() {
            Some(kind) if RecordKind::of(record) == Some(kind) => self.payload.lock().receive(record),
            _ => Err(DatabaseError::WrongRecord {
                expected: self.kind.name().to_owned(),
                actual: record.name().to_owned(),
            }),
        }
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Self>) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&self) {
        *self.parent.write() = Weak::new();
    }

    pub(crate) fn children_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<Arc<Self>>> {
        self.children.write()
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for DatabaseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &*self.name.read())
            .field("children", &self.child_ids())
            .field("active", &self.is_active())
            .finish()
    }
}
