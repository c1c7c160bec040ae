//! # Node Payloads
//!
//! The data each node kind carries, and the records that carry it.
//!
//! ## Array Updates
//!
//! Points, colors and indices accept partial updates:
//!
//! ```text
//!  IDs = []          nothing to do
//!  IDs = [-1, ..]    elements packed in order from 0
//!  IDs = [i, j, ..]  element k lands at slot IDs[k], growing the array
//! ```
//!
//! A dump always writes the identity ID list, so receiving a dump
//! reproduces the array exactly.

use szg_core::{FieldData, Matrix4};

use crate::database::node::NodeKind;
use crate::error::{DatabaseError, DatabaseResult};
use crate::protocol::{GraphicsLanguage, RecordKind, StructuredRecord};

/// Texture image or file reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureData {
    /// File to load, empty when pixels are inline.
    pub file: String,
    /// Whether the image has an alpha channel.
    pub alpha: bool,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Inline pixels.
    pub pixels: Vec<u8>,
}

/// Surface material.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialData {
    /// Diffuse RGB.
    pub diffuse: [f32; 3],
    /// Ambient RGB.
    pub ambient: [f32; 3],
    /// Specular RGB.
    pub specular: [f32; 3],
    /// Emissive RGB.
    pub emissive: [f32; 3],
    /// Specular exponent.
    pub exponent: f32,
    /// Opacity.
    pub alpha: f32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            diffuse: [0.8; 3],
            ambient: [0.2; 3],
            specular: [0.0; 3],
            emissive: [0.0; 3],
            exponent: 0.0,
            alpha: 1.0,
        }
    }
}

/// Culling sphere.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundingSphereData {
    /// Whether the sphere itself is drawn.
    pub visible: bool,
    /// Radius.
    pub radius: f32,
    /// Center.
    pub position: [f32; 3],
}

/// Primitive batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawableData {
    /// Primitive type code.
    pub primitive: i32,
    /// Number of primitives.
    pub count: i32,
}

/// Render state key and values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphicsStateData {
    /// State name, e.g. `point_size`.
    pub state: String,
    /// Integer values.
    pub ints: [i32; 2],
    /// Float value.
    pub float: f32,
}

/// Payload of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodePayload {
    /// Root and name nodes.
    Empty,
    /// Transform matrix.
    Transform(Matrix4),
    /// XYZ positions, three floats each.
    Points(Vec<f32>),
    /// RGBA colors, four floats each.
    Color4(Vec<f32>),
    /// Vertex indices.
    Index(Vec<i32>),
    /// Texture.
    Texture(TextureData),
    /// Material.
    Material(MaterialData),
    /// Visibility switch.
    Visibility(bool),
    /// Bounding sphere.
    BoundingSphere(BoundingSphereData),
    /// Drawable.
    Drawable(DrawableData),
    /// Graphics state.
    GraphicsState(GraphicsStateData),
}

impl NodePayload {
    /// Default payload for a kind.
    #[must_use]
    pub fn empty_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Root | NodeKind::Name => Self::Empty,
            NodeKind::Transform => Self::Transform(Matrix4::IDENTITY),
            NodeKind::Points => Self::Points(Vec::new()),
            NodeKind::Color4 => Self::Color4(Vec::new()),
            NodeKind::Index => Self::Index(Vec::new()),
            NodeKind::Texture => Self::Texture(TextureData::default()),
            NodeKind::Material => Self::Material(MaterialData::default()),
            NodeKind::Visibility => Self::Visibility(true),
            NodeKind::BoundingSphere => Self::BoundingSphere(BoundingSphereData::default()),
            NodeKind::Drawable => Self::Drawable(DrawableData::default()),
            NodeKind::GraphicsState => Self::GraphicsState(GraphicsStateData::default()),
        }
    }

    pub(crate) fn dump(&self, id: i32, language: &GraphicsLanguage) -> Option<StructuredRecord> {
        let kind = match self {
            Self::Empty => return None,
            Self::Transform(_) => RecordKind::Transform,
            Self::Points(_) => RecordKind::Points,
            Self::Color4(_) => RecordKind::Color4,
            Self::Index(_) => RecordKind::Index,
            Self::Texture(_) => RecordKind::Texture,
            Self::Material(_) => RecordKind::Material,
            Self::Visibility(_) => RecordKind::Visibility,
            Self::BoundingSphere(_) => RecordKind::BoundingSphere,
            Self::Drawable(_) => RecordKind::Drawable,
            Self::GraphicsState(_) => RecordKind::GraphicsState,
        };
        let mut r = language.record(kind);
        let _ = r.set_int("ID", id);
        let result = match self {
            Self::Empty => Ok(()),
            Self::Transform(m) => r.set_floats("matrix", m.as_slice()),
            Self::Points(v) => dump_array(&mut r, "point_IDs", "positions", FieldData::Float(v.clone()), v.len() / 3),
            Self::Color4(v) => dump_array(&mut r, "color_IDs", "colors", FieldData::Float(v.clone()), v.len() / 4),
            Self::Index(v) => dump_array(&mut r, "index_IDs", "indices", FieldData::Int(v.clone()), v.len()),
            Self::Texture(t) => r
                .set_string("file", &t.file)
                .and_then(|()| r.set_int("alpha", i32::from(t.alpha)))
                .and_then(|()| r.set_int("width", t.width))
                .and_then(|()| r.set_int("height", t.height))
                .and_then(|()| r.set("pixels", FieldData::Char(t.pixels.clone()))),
            Self::Material(m) => r
                .set_floats("diffuse", &m.diffuse)
                .and_then(|()| r.set_floats("ambient", &m.ambient))
                .and_then(|()| r.set_floats("specular", &m.specular))
                .and_then(|()| r.set_floats("emissive", &m.emissive))
                .and_then(|()| r.set_floats("exponent", &[m.exponent]))
                .and_then(|()| r.set_floats("alpha", &[m.alpha])),
            Self::Visibility(v) => r.set_int("visibility", i32::from(*v)),
            Self::BoundingSphere(b) => r
                .set_int("visibility", i32::from(b.visible))
                .and_then(|()| r.set_floats("radius", &[b.radius]))
                .and_then(|()| r.set_floats("position", &b.position)),
            Self::Drawable(d) => r
                .set_int("type", d.primitive)
                .and_then(|()| r.set_int("number", d.count)),
            Self::GraphicsState(g) => r
                .set_string("string", &g.state)
                .and_then(|()| r.set_ints("int", &g.ints))
                .and_then(|()| r.set_floats("float", &[g.float])),
        };
        match result {
            Ok(()) => Some(r),
            Err(err) => {
                tracing::error!(target: "szg::database", "node {id}: dump failed: {err}");
                None
            }
        }
    }

    /// Applies a payload record. The payload is untouched on error.
    pub(crate) fn receive(&mut self, record: &StructuredRecord) -> DatabaseResult<()> {
        match self {
            Self::Empty => Err(DatabaseError::WrongRecord {
                expected: "payload-free".into(),
                actual: record.name().to_owned(),
            }),
            Self::Transform(m) => {
                let values = floats(record, "matrix")?;
                *m = Matrix4::from_slice(values).ok_or_else(|| bad(record, "matrix", "needs 16 floats"))?;
                Ok(())
            }
            Self::Points(v) => merge_elements(record, v, 3, "point_IDs", floats(record, "positions")?, "positions"),
            Self::Color4(v) => merge_elements(record, v, 4, "color_IDs", floats(record, "colors")?, "colors"),
            Self::Index(v) => merge_elements(record, v, 1, "index_IDs", ints(record, "indices")?, "indices"),
            Self::Texture(t) => {
                let next = TextureData {
                    file: record.string("file").unwrap_or_default(),
                    alpha: int(record, "alpha")? != 0,
                    width: int(record, "width")?,
                    height: int(record, "height")?,
                    pixels: record
                        .field("pixels")
                        .and_then(FieldData::as_bytes)
                        .map(<[u8]>::to_vec)
                        .unwrap_or_default(),
                };
                let expected = next.width.max(0) as usize * next.height.max(0) as usize * if next.alpha { 4 } else { 3 };
                if next.file.is_empty() && next.pixels.len() != expected {
                    return Err(bad(record, "pixels", &format!("{} bytes for {expected}", next.pixels.len())));
                }
                *t = next;
                Ok(())
            }
            Self::Material(m) => {
                let next = MaterialData {
                    diffuse: vec3(record, "diffuse")?,
                    ambient: vec3(record, "ambient")?,
                    specular: vec3(record, "specular")?,
                    emissive: vec3(record, "emissive")?,
                    exponent: float(record, "exponent")?,
                    alpha: float(record, "alpha")?,
                };
                *m = next;
                Ok(())
            }
            Self::Visibility(v) => {
                *v = int(record, "visibility")? != 0;
                Ok(())
            }
            Self::BoundingSphere(b) => {
                let next = BoundingSphereData {
                    visible: int(record, "visibility")? != 0,
                    radius: float(record, "radius")?,
                    position: vec3(record, "position")?,
                };
                *b = next;
                Ok(())
            }
            Self::Drawable(d) => {
                let next = DrawableData { primitive: int(record, "type")?, count: int(record, "number")? };
                *d = next;
                Ok(())
            }
            Self::GraphicsState(g) => {
                let values = ints(record, "int")?;
                let mut next = GraphicsStateData {
                    state: record.string("string").unwrap_or_default(),
                    ints: [0; 2],
                    float: record.floats("float").and_then(|f| f.first().copied()).unwrap_or(-1.0),
                };
                for (slot, v) in next.ints.iter_mut().zip(values) {
                    *slot = *v;
                }
                *g = next;
                Ok(())
            }
        }
    }
}

fn dump_array(
    r: &mut StructuredRecord,
    id_field: &str,
    data_field: &str,
    data: FieldData,
    count: usize,
) -> crate::error::NetResult<()> {
    let ids: Vec<i32> = (0..i32::try_from(count).unwrap_or(i32::MAX)).collect();
    r.set_ints(id_field, &ids)?;
    r.set(data_field, data)
}

fn bad(record: &StructuredRecord, field: &'static str, reason: &str) -> DatabaseError {
    DatabaseError::BadField { record: record.name().to_owned(), field, reason: reason.to_owned() }
}

fn missing(record: &StructuredRecord, field: &'static str) -> DatabaseError {
    DatabaseError::MissingField { record: record.name().to_owned(), field }
}

fn ints<'a>(record: &'a StructuredRecord, field: &'static str) -> DatabaseResult<&'a [i32]> {
    record.ints(field).ok_or_else(|| missing(record, field))
}

fn floats<'a>(record: &'a StructuredRecord, field: &'static str) -> DatabaseResult<&'a [f32]> {
    record.floats(field).ok_or_else(|| missing(record, field))
}

fn int(record: &StructuredRecord, field: &'static str) -> DatabaseResult<i32> {
    ints(record, field)?.first().copied().ok_or_else(|| missing(record, field))
}

fn float(record: &StructuredRecord, field: &'static str) -> DatabaseResult<f32> {
    floats(record, field)?.first().copied().ok_or_else(|| missing(record, field))
}

fn vec3(record: &StructuredRecord, field: &'static str) -> DatabaseResult<[f32; 3]> {
    floats(record, field)?
        .try_into()
        .map_err(|_| bad(record, field, "needs 3 floats"))
}

/// Elements an explicit ID may reach past the end of the array, on top of
/// the elements carried in the record.
const ELEMENT_SLACK: usize = 4096;

fn merge_elements<T: Copy + Default>(
    record: &StructuredRecord,
    array: &mut Vec<T>,
    stride: usize,
    id_field: &'static str,
    data: &[T],
    data_field: &'static str,
) -> DatabaseResult<()> {
    let ids = ints(record, id_field)?;
    if ids.is_empty() {
        return Ok(());
    }
    if data.len() % stride != 0 {
        return Err(bad(record, data_field, &format!("length {} is not a multiple of {stride}", data.len())));
    }
    let count = data.len() / stride;
    if ids[0] == -1 {
        array.clear();
        array.extend_from_slice(data);
        return Ok(());
    }
    if ids.len() != count {
        return Err(bad(record, id_field, &format!("{} IDs for {count} elements", ids.len())));
    }
    let limit = array.len() / stride + count + ELEMENT_SLACK;
    let mut slots = Vec::with_capacity(count);
    for &id in ids {
        let slot = usize::try_from(id).map_err(|_| bad(record, id_field, &format!("negative ID {id}")))?;
        if slot >= limit {
            return Err(bad(record, id_field, &format!("ID {id} is past element {limit}")));
        }
        slots.push(slot);
    }
    let needed = slots.iter().max().map_or(0, |m| (m + 1) * stride);
    if array.len() < needed {
        array.resize(needed, T::default());
    }
    for (slot, chunk) in slots.into_iter().zip(data.chunks_exact(stride)) {
        array[slot * stride..(slot + 1) * stride].copy_from_slice(chunk);
    }
    Ok(())
}
