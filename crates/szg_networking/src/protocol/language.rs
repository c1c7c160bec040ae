//! # Graphics Language
//!
//! The record dictionary spoken by graphics servers, clients and peers.
//!
//! ## Record Kinds
//!
//! ```text
//!  structure:  make node | insert | erase | cut | permute
//!  payload:    name | transform | points | color4 | index | texture
//!              material | visibility | bounding sphere | drawable
//!              graphics state
//!  control:    graphics admin
//! ```
//!
//! Every payload record carries the target node in its `ID` field.

use std::sync::Arc;

use szg_core::{DataType, Matrix4};

use crate::protocol::dictionary::{Dictionary, RecordTemplate};
use crate::protocol::record::StructuredRecord;

/// Every record type of the graphics language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Create a node under a parent.
    MakeNode = 0,
    /// Splice a node between a parent and its child.
    Insert = 1,
    /// Remove a subtree.
    Erase = 2,
    /// Remove one node, keeping its children.
    Cut = 3,
    /// Reorder children.
    Permute = 4,
    /// Node name and info string.
    Name = 5,
    /// 4x4 matrix.
    Transform = 6,
    /// Point positions.
    Points = 7,
    /// RGBA colors.
    Color4 = 8,
    /// Vertex indices.
    Index = 9,
    /// Texture image.
    Texture = 10,
    /// Surface material.
    Material = 11,
    /// Visibility switch.
    Visibility = 12,
    /// Culling sphere.
    BoundingSphere = 13,
    /// Primitive batch.
    Drawable = 14,
    /// Render state key/value.
    GraphicsState = 15,
    /// Peer control message.
    Admin = 16,
}

impl RecordKind {
    /// Every kind, in dictionary order.
    pub const ALL: [Self; 17] = [
        Self::MakeNode,
        Self::Insert,
        Self::Erase,
        Self::Cut,
        Self::Permute,
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
        Self::Admin,
    ];

    /// Template name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MakeNode => "make node",
            Self::Insert => "insert",
            Self::Erase => "erase",
            Self::Cut => "cut",
            Self::Permute => "permute",
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
            Self::Admin => "graphics admin",
        }
    }

    /// Kind with this template name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Kind of a decoded record.
    #[must_use]
    pub fn of(record: &StructuredRecord) -> Option<Self> {
        Self::from_name(record.name())
    }

    /// True for records that change tree structure.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::MakeNode | Self::Insert | Self::Erase | Self::Cut | Self::Permute)
    }

    fn fields(self) -> &'static [(&'static str, DataType)] {
        use DataType::{Char, Float, Int};
        match self {
            Self::MakeNode => &[("parent_ID", Int), ("ID", Int), ("name", Char), ("type", Char)],
            Self::Insert => &[
                ("parent_ID", Int),
                ("child_ID", Int),
                ("ID", Int),
                ("name", Char),
                ("type", Char),
            ],
            Self::Erase | Self::Cut => &[("ID", Int)],
            Self::Permute => &[("parent_ID", Int), ("child_IDs", Int)],
            Self::Name => &[("ID", Int), ("name", Char), ("info", Char)],
            Self::Transform => &[("ID", Int), ("matrix", Float)],
            Self::Points => &[("ID", Int), ("point_IDs", Int), ("positions", Float)],
            Self::Color4 => &[("ID", Int), ("color_IDs", Int), ("colors", Float)],
            Self::Index => &[("ID", Int), ("index_IDs", Int), ("indices", Int)],
            Self::Texture => &[
                ("ID", Int),
                ("file", Char),
                ("alpha", Int),
                ("width", Int),
                ("height", Int),
                ("pixels", Char),
            ],
            Self::Material => &[
                ("ID", Int),
                ("diffuse", Float),
                ("ambient", Float),
                ("specular", Float),
                ("emissive", Float),
                ("exponent", Float),
                ("alpha", Float),
            ],
            Self::Visibility => &[("ID", Int), ("visibility", Int)],
            Self::BoundingSphere => &[("ID", Int), ("visibility", Int), ("radius", Float), ("position", Float)],
            Self::Drawable => &[("ID", Int), ("type", Int), ("number", Int)],
            Self::GraphicsState => &[("ID", Int), ("string", Char), ("int", Int), ("float", Float)],
            Self::Admin => &[("action", Char), ("node_ID", Int), ("name", Char)],
        }
    }
}

/// The graphics dictionary plus record builders.
#[derive(Clone, Debug)]
pub struct GraphicsLanguage {
    dictionary: Arc<Dictionary>,
    templates: Vec<Arc<RecordTemplate>>,
}

impl Default for GraphicsLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsLanguage {
    /// Builds the dictionary.
    #[must_use]
    pub fn new() -> Self {
        let mut dictionary = Dictionary::new();
        for kind in RecordKind::ALL {
            let mut template = RecordTemplate::new(kind.name());
            for (field, data_type) in kind.fields() {
                template.add(field, *data_type);
            }
            dictionary.add(template);
        }
        let templates = dictionary.iter().cloned().collect();
        Self { dictionary: Arc::new(dictionary), templates }
    }

    /// The shared dictionary.
    #[inline]
    #[must_use]
    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    /// Empty record of a kind.
    #[must_use]
    pub fn record(&self, kind: RecordKind) -> StructuredRecord {
        StructuredRecord::new(&self.templates[kind as usize])
    }

    /// `make node` record. `id` -1 lets the database choose.
    #[must_use]
    pub fn make_node(&self, parent: i32, id: i32, name: &str, node_type: &str) -> StructuredRecord {
        let mut r = self.record(RecordKind::MakeNode);
        let _ = r.set_int("parent_ID", parent);
        let _ = r.set_int("ID", id);
        let _ = r.set_string("name", name);
        let _ = r.set_string("type", node_type);
        r
    }

    /// `insert` record. `child` -1 adopts every child of `parent`.
    #[must_use]
    pub fn insert(&self, parent: i32, child: i32, id: i32, name: &str, node_type: &str) -> StructuredRecord {
        let mut r = self.record(RecordKind::Insert);
        let _ = r.set_int("parent_ID", parent);
        let _ = r.set_int("child_ID", child);
        let _ = r.set_int("ID", id);
        let _ = r.set_string("name", name);
        let _ = r.set_string("type", node_type);
        r
    }

    /// `erase` record.
    #[must_use]
    pub fn erase(&self, id: i32) -> StructuredRecord {
        self.id_only(RecordKind::Erase, id)
    }

    /// `cut` record.
    #[must_use]
    pub fn cut(&self, id: i32) -> StructuredRecord {
        self.id_only(RecordKind::Cut, id)
    }

    fn id_only(&self, kind: RecordKind, id: i32) -> StructuredRecord {
        let mut r = self.record(kind);
        let _ = r.set_int("ID", id);
        r
    }

    /// `permute` record.
    #[must_use]
    pub fn permute(&self, parent: i32, children: &[i32]) -> StructuredRecord {
        let mut r = self.record(RecordKind::Permute);
        let _ = r.set_int("parent_ID", parent);
        let _ = r.set_ints("child_IDs", children);
        r
    }

    /// `name` record.
    #[must_use]
    pub fn name(&self, id: i32, name: &str, info: &str) -> StructuredRecord {
        let mut r = self.record(RecordKind::Name);
        let _ = r.set_int("ID", id);
        let _ = r.set_string("name", name);
        let _ = r.set_string("info", info);
        r
    }

    /// `transform` record.
    #[must_use]
    pub fn transform(&self, id: i32, matrix: &Matrix4) -> StructuredRecord {
        let mut r = self.record(RecordKind::Transform);
        let _ = r.set_int("ID", id);
        let _ = r.set_floats("matrix", matrix.as_slice());
        r
    }

    /// `graphics admin` record.
    #[must_use]
    pub fn admin(&self, action: &str, node: i32, name: &str) -> StructuredRecord {
        let mut r = self.record(RecordKind::Admin);
        let _ = r.set_string("action", action);
        let _ = r.set_int("node_ID", node);
        let _ = r.set_string("name", name);
        r
    }
}
