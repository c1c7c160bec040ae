//! # Scene-Graph Database
//!
//! The node tree and `alter()`, its single mutation entry point.
//!
//! ## Design
//!
//! - One tree lock serializes every structural change and every full dump
//! - `alter` validates before it mutates: a rejected record changes nothing
//! - IDs are never reused; `reset` keeps the counter
//! - Erased nodes leave the ID table but live on while an `Arc` is held

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::database::node::{DatabaseNode, NodeKind};
use crate::database::payload::NodePayload;
use crate::database::registry::NodeRegistry;
use crate::error::{DatabaseError, DatabaseResult};
use crate::protocol::{Dictionary, GraphicsLanguage, RecordKind, StructuredRecord, WireWriter};

/// ID of the root node.
pub const ROOT_ID: i32 = 0;

const FILE_MAGIC: &[u8; 8] = b"SZGDB\x001\n";

struct Tree {
    root: Arc<DatabaseNode>,
    nodes: HashMap<i32, Arc<DatabaseNode>>,
    next_id: i32,
}

impl Tree {
    fn new() -> Self {
        let root = Arc::new(DatabaseNode::new(ROOT_ID, NodeKind::Root, "root", NodePayload::Empty));
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Arc::clone(&root));
        Self { root, nodes, next_id: ROOT_ID + 1 }
    }

    fn get(&self, id: i32) -> DatabaseResult<&Arc<DatabaseNode>> {
        self.nodes.get(&id).ok_or(DatabaseError::UnknownNode(id))
    }

    fn take_id(&mut self, requested: i32) -> DatabaseResult<i32> {
        let id = if requested < 0 { self.next_id } else { requested };
        let next = id.checked_add(1).ok_or(DatabaseError::IdsExhausted(id))?;
        self.next_id = self.next_id.max(next);
        Ok(id)
    }

    fn create(
        &mut self,
        registry: &NodeRegistry,
        parent: &Arc<DatabaseNode>,
        requested: i32,
        name: &str,
        type_name: &str,
    ) -> DatabaseResult<Arc<DatabaseNode>> {
        let (kind, payload) = registry
            .construct(type_name)
            .ok_or_else(|| DatabaseError::UnknownType(type_name.to_owned()))?;
        let id = self.take_id(requested)?;
        let name = if name.is_empty() { format!("szg_default_{id}") } else { name.to_owned() };
        let node = Arc::new(DatabaseNode::new(id, kind, &name, payload));
        node.set_parent(parent);
        self.nodes.insert(id, Arc::clone(&node));
        tracing::debug!(target: "szg::database", "created {type_name} '{name}' ({id}) under {}", parent.id());
        Ok(node)
    }

    fn remove_subtree(&mut self, node: &Arc<DatabaseNode>) {
        for child in node.children() {
            self.remove_subtree(&child);
        }
        node.deactivate();
        self.nodes.remove(&node.id());
    }

    fn detach(parent: &DatabaseNode, child_id: i32) -> Option<usize> {
        let mut children = parent.children_mut();
        let pos = children.iter().position(|c| c.id() == child_id)?;
        children.remove(pos);
        Some(pos)
    }

    fn walk(start: &Arc<DatabaseNode>, out: &mut Vec<Arc<DatabaseNode>>) {
        out.push(Arc::clone(start));
        for child in start.children() {
            Self::walk(&child, out);
        }
    }
}

/// A replicated scene graph.
pub struct Database {
    language: GraphicsLanguage,
    registry: NodeRegistry,
    tree: Mutex<Tree>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Empty database holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(NodeRegistry::new())
    }

    /// Empty database with a custom type table.
    #[must_use]
    pub fn with_registry(registry: NodeRegistry) -> Self {
        Self { language: GraphicsLanguage::new(), registry, tree: Mutex::new(Tree::new()) }
    }

    /// Record language.
    #[inline]
    #[must_use]
    pub fn language(&self) -> &GraphicsLanguage {
        &self.language
    }

    /// Root node.
    #[must_use]
    pub fn root(&self) -> Arc<DatabaseNode> {
        Arc::clone(&self.tree.lock().root)
    }

    /// Applies one record and returns the affected node.
    ///
    /// `make node` and `insert` write the assigned ID back into `record`.
    /// Structural removals return the root.
    pub fn alter(&self, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let kind = RecordKind::of(record).ok_or_else(|| DatabaseError::WrongRecord {
            expected: "graphics".into(),
            actual: record.name().to_owned(),
        })?;
        let mut tree = self.tree.lock();
        match kind {
            RecordKind::MakeNode => self.make_node(&mut tree, record),
            RecordKind::Insert => self.insert_node(&mut tree, record),
            RecordKind::Erase => {
                let id = required(record, "ID")?;
                if id == ROOT_ID {
                    return Err(DatabaseError::RootImmutable);
                }
                let node = Arc::clone(tree.get(id)?);
                if let Some(parent) = node.parent() {
                    Tree::detach(&parent, id);
                }
                node.clear_parent();
                tree.remove_subtree(&node);
                tracing::debug!(target: "szg::database", "erased {id}");
                Ok(Arc::clone(&tree.root))
            }
            RecordKind::Cut => {
                let id = required(record, "ID")?;
                if id == ROOT_ID {
                    return Err(DatabaseError::RootImmutable);
                }
                let node = Arc::clone(tree.get(id)?);
                let parent = node.parent().ok_or(DatabaseError::UnknownNode(id))?;
                let pos = Tree::detach(&parent, id).unwrap_or(0);
                let orphans = std::mem::take(&mut *node.children_mut());
                for child in &orphans {
                    child.set_parent(&parent);
                }
                let mut siblings = parent.children_mut();
                let at = pos.min(siblings.len());
                let tail = siblings.split_off(at);
                siblings.extend(orphans);
                siblings.extend(tail);
                drop(siblings);
                node.clear_parent();
                node.deactivate();
                tree.nodes.remove(&id);
                tracing::debug!(target: "szg::database", "cut {id}");
                Ok(Arc::clone(&tree.root))
            }
            RecordKind::Permute => {
                let parent = Arc::clone(tree.get(required(record, "parent_ID")?)?);
                let wanted = record.ints("child_IDs").unwrap_or_default();
                let mut children = parent.children_mut();
                let mut ordered = Vec::with_capacity(children.len());
                for id in wanted {
                    if let Some(pos) = children.iter().position(|c| c.id() == *id) {
                        ordered.push(children.remove(pos));
                    }
                }
                ordered.append(&mut children);
                *children = ordered;
                Ok(Arc::clone(&tree.root))
            }
            RecordKind::Admin => Err(DatabaseError::WrongRecord {
                expected: "database".into(),
                actual: record.name().to_owned(),
            }),
            _ => {
                let node = Arc::clone(tree.get(required(record, "ID")?)?);
                node.receive_data(record)?;
                Ok(node)
            }
        }
    }

    fn make_node(&self, tree: &mut Tree, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let parent = Arc::clone(tree.get(required(record, "parent_ID")?)?);
        let requested = record.int("ID").unwrap_or(-1);
        let name = record.string("name").unwrap_or_default();
        let type_name = record.string("type").unwrap_or_default();
        if requested >= 0 {
            if let Some(existing) = tree.nodes.get(&requested) {
                let matches = self.registry.construct(&type_name).map(|(k, _)| k) == Some(existing.kind());
                if !matches {
                    return Err(DatabaseError::TypeConflict {
                        id: requested,
                        existing: existing.type_name().to_owned(),
                        requested: type_name,
                    });
                }
                return Ok(Arc::clone(existing));
            }
        }
        let node = tree.create(&self.registry, &parent, requested, &name, &type_name)?;
        parent.children_mut().push(Arc::clone(&node));
        record.patch_int("ID", node.id());
        Ok(node)
    }

    fn insert_node(&self, tree: &mut Tree, record: &mut StructuredRecord) -> DatabaseResult<Arc<DatabaseNode>> {
        let parent = Arc::clone(tree.get(required(record, "parent_ID")?)?);
        let child_id = record.int("child_ID").unwrap_or(-1);
        let requested = record.int("ID").unwrap_or(-1);
        if requested >= 0 && tree.nodes.contains_key(&requested) {
            return Err(DatabaseError::BadField {
                record: record.name().to_owned(),
                field: "ID",
                reason: format!("node {requested} already exists"),
            });
        }
        if child_id != -1 {
            let child = tree.get(child_id)?;
            if child.parent_id() != parent.id() {
                return Err(DatabaseError::NotChild { parent: parent.id(), child: child_id });
            }
        }
        let name = record.string("name").unwrap_or_default();
        let type_name = record.string("type").unwrap_or_default();
        let node = tree.create(&self.registry, &parent, requested, &name, &type_name)?;

        let mut siblings = parent.children_mut();
        let adopted = match siblings.iter().position(|c| c.id() == child_id) {
            Some(pos) => vec![std::mem::replace(&mut siblings[pos], Arc::clone(&node))],
            None => {
                let all = std::mem::take(&mut *siblings);
                siblings.push(Arc::clone(&node));
                all
            }
        };
        drop(siblings);
        for child in &adopted {
            child.set_parent(&node);
        }
        node.children_mut().extend(adopted);
        record.patch_int("ID", node.id());
        Ok(node)
    }

    /// Creates a node through `alter`.
    pub fn new_node(&self, parent: i32, name: &str, type_name: &str) -> DatabaseResult<Arc<DatabaseNode>> {
        let mut record = self.language.make_node(parent, -1, name, type_name);
        self.alter(&mut record)
    }

    /// Node by ID.
    #[must_use]
    pub fn get_node_ref(&self, id: i32) -> Option<Arc<DatabaseNode>> {
        self.tree.lock().nodes.get(&id).cloned()
    }

    /// Number of live nodes, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Next ID the database will assign.
    #[must_use]
    pub fn next_id(&self) -> i32 {
        self.tree.lock().next_id
    }

    fn preorder(&self, start: i32) -> DatabaseResult<Vec<Arc<DatabaseNode>>> {
        let tree = self.tree.lock();
        let mut out = Vec::new();
        Tree::walk(tree.get(start)?, &mut out);
        Ok(out)
    }

    /// First node in pre-order with this name.
    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<Arc<DatabaseNode>> {
        self.find_node_below(ROOT_ID, name)
    }

    /// First node at or below `start` with this name.
    #[must_use]
    pub fn find_node_below(&self, start: i32, name: &str) -> Option<Arc<DatabaseNode>> {
        self.preorder(start).ok()?.into_iter().find(|n| n.name() == name)
    }

    /// First node in pre-order of this type.
    #[must_use]
    pub fn find_node_by_type(&self, type_name: &str) -> Option<Arc<DatabaseNode>> {
        self.preorder(ROOT_ID)
            .ok()?
            .into_iter()
            .find(|n| n.type_name() == type_name)
    }

    /// Records that rebuild the whole tree below the root.
    #[must_use]
    pub fn dump(&self) -> Vec<StructuredRecord> {
        self.dump_below(ROOT_ID, false).unwrap_or_default()
    }

    /// Records that rebuild the subtree at `id`, optionally without `id` itself.
    ///
    /// Each node contributes `make node`, a `name` record if it has info, then
    /// its payload.
    pub fn dump_below(&self, id: i32, include_self: bool) -> DatabaseResult<Vec<StructuredRecord>> {
        let tree = self.tree.lock();
        let mut nodes = Vec::new();
        Tree::walk(tree.get(id)?, &mut nodes);
        let mut records = Vec::with_capacity(nodes.len() * 2);
        for node in nodes.iter().skip(usize::from(!include_self)) {
            if node.kind() == NodeKind::Root {
                continue;
            }
            records.push(self.language.make_node(node.parent_id(), node.id(), &node.name(), node.type_name()));
            let info = node.info();
            if !info.is_empty() {
                records.push(self.language.name(node.id(), &node.name(), &info));
            }
            records.extend(node.dump_data(&self.language));
        }
        Ok(records)
    }

    /// Indented tree listing.
    #[must_use]
    pub fn print_structure(&self) -> String {
        fn visit(node: &Arc<DatabaseNode>, depth: usize, out: &mut String) {
            let _ = writeln!(out, "{:indent$}{} ({}, {})", "", node.name(), node.id(), node.type_name(), indent = depth * 2);
            for child in node.children() {
                visit(&child, depth + 1, out);
            }
        }
        let root = self.root();
        let mut out = String::new();
        visit(&root, 0, &mut out);
        out
    }

    /// Applies every record of an encoded stream in order.
    ///
    /// Rejected records are logged and skipped. Returns how many applied.
    pub fn handle_data_queue(&self, bytes: &[u8]) -> usize {
        let mut rest = bytes;
        let mut applied = 0;
        while !rest.is_empty() {
            let (mut record, used) = match StructuredRecord::decode(self.language.dictionary(), rest) {
                Ok(decoded) => decoded,
                Err(err) => {
                    tracing::warn!(target: "szg::database", "data queue unreadable past this point: {err}");
                    break;
                }
            };
            rest = &rest[used..];
            match self.alter(&mut record) {
                Ok(_) => applied += 1,
                Err(err) => tracing::warn!(target: "szg::database", "skipped {}: {err}", record.name()),
            }
        }
        applied
    }

    /// Erases everything below the root. The ID counter is kept.
    pub fn reset(&self) {
        let mut tree = self.tree.lock();
        let root = Arc::clone(&tree.root);
        let children = std::mem::take(&mut *root.children_mut());
        for child in &children {
            child.clear_parent();
            tree.remove_subtree(child);
        }
        tracing::info!(target: "szg::database", "reset, next id {}", tree.next_id);
    }

    /// Copies a record stream under `parent`, giving every node a fresh ID.
    ///
    /// Returns the map from stream IDs to local IDs.
    pub fn attach(&self, parent: i32, records: &[StructuredRecord]) -> DatabaseResult<HashMap<i32, i32>> {
        self.graft(parent, records, false)
    }

    /// Like `attach`, but a node whose parent already has a child with the
    /// same name and type is mapped onto that child instead of duplicated.
    pub fn merge(&self, parent: i32, records: &[StructuredRecord]) -> DatabaseResult<HashMap<i32, i32>> {
        self.graft(parent, records, true)
    }

    fn graft(&self, parent: i32, records: &[StructuredRecord], reuse: bool) -> DatabaseResult<HashMap<i32, i32>> {
        if self.get_node_ref(parent).is_none() {
            return Err(DatabaseError::UnknownNode(parent));
        }
        let mut map = HashMap::new();
        for source in records {
            let mut record = source.clone();
            match RecordKind::of(&record) {
                Some(RecordKind::MakeNode) => {
                    let remote_parent = record.int("parent_ID").unwrap_or(ROOT_ID);
                    let remote_id = record.int("ID").unwrap_or(-1);
                    let local_parent = map.get(&remote_parent).copied().unwrap_or(parent);
                    let name = record.string("name").unwrap_or_default();
                    let type_name = record.string("type").unwrap_or_default();
                    let existing = if reuse {
                        self.get_node_ref(local_parent).and_then(|p| {
                            p.children()
                                .into_iter()
                                .find(|c| c.name() == name && c.type_name() == type_name)
                        })
                    } else {
                        None
                    };
                    let local = match existing {
                        Some(node) => node,
                        None => {
                            record.patch_int("parent_ID", local_parent);
                            record.patch_int("ID", -1);
                            self.alter(&mut record)?
                        }
                    };
                    map.insert(remote_id, local.id());
                }
                Some(kind) if !kind.is_structural() && kind != RecordKind::Admin => {
                    let Some(&local) = record.int("ID").and_then(|id| map.get(&id)) else {
                        continue;
                    };
                    record.patch_int("ID", local);
                    self.alter(&mut record)?;
                }
                _ => tracing::debug!(target: "szg::database", "graft skips {}", record.name()),
            }
        }
        Ok(map)
    }

    /// Writes the dictionary and the full dump.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> DatabaseResult<()> {
        let mut w = WireWriter::new();
        w.write_bytes(FILE_MAGIC);
        self.language.dictionary().encode(&mut w);
        let dictionary_len = w.len();
        for record in self.dump() {
            record.encode(&mut w);
        }
        tracing::info!(
            target: "szg::database",
            "writing {} bytes of records to {}",
            w.len() - dictionary_len,
            path.as_ref().display()
        );
        std::fs::write(path, w.as_slice()).map_err(|e| DatabaseError::File(e.to_string()))
    }

    /// Attaches the contents of a file written by `write_to_file` under `parent`.
    pub fn read_from_file(&self, path: impl AsRef<Path>, parent: i32) -> DatabaseResult<HashMap<i32, i32>> {
        let bytes = std::fs::read(path).map_err(|e| DatabaseError::File(e.to_string()))?;
        let body = bytes
            .strip_prefix(FILE_MAGIC.as_slice())
            .ok_or_else(|| DatabaseError::File("not a database file".into()))?;
        let dictionary = Dictionary::decode(body).map_err(|e| DatabaseError::File(e.to_string()))?;
        if let Some(diff) = self.language.dictionary().difference(&dictionary) {
            return Err(DatabaseError::File(format!("dictionary differs: {diff}")));
        }
        let mut w = WireWriter::new();
        dictionary.encode(&mut w);
        let records = StructuredRecord::decode_all(self.language.dictionary(), &body[w.len()..])
            .map_err(|e| DatabaseError::File(e.to_string()))?;
        self.attach(parent, &records)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("nodes", &self.node_count())
            .field("next_id", &self.next_id())
            .finish_non_exhaustive()
    }
}

fn required(record: &StructuredRecord, field: &'static str) -> DatabaseResult<i32> {
    record
        .int(field)
        .ok_or_else(|| DatabaseError::MissingField { record: record.name().to_owned(), field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use szg_core::Matrix4;

    fn sample() -> Database {
        let db = Database::new();
        let head = db.new_node(ROOT_ID, "head", "transform").unwrap();
        db.new_node(head.id(), "hand", "transform").unwrap();
        db.new_node(head.id(), "dots", "points").unwrap();
        db
    }

    #[test]
    fn test_make_node_assigns_and_writes_back() {
        let db = Database::new();
        let mut r = db.language().make_node(ROOT_ID, -1, "", "transform");
        let node = db.alter(&mut r).unwrap();
        assert_eq!(node.id(), 1);
        assert_eq!(r.int("ID"), Some(1));
        assert_eq!(node.name(), "szg_default_1");
        assert_eq!(node.ref_count(), 3);
    }

    #[test]
    fn test_make_node_reuses_or_conflicts() {
        let db = sample();
        let mut same = db.language().make_node(ROOT_ID, 1, "other", "transform");
        assert_eq!(db.alter(&mut same).unwrap().name(), "head");
        let mut clash = db.language().make_node(ROOT_ID, 1, "x", "points");
        assert!(matches!(db.alter(&mut clash), Err(DatabaseError::TypeConflict { id: 1, .. })));
        let mut explicit = db.language().make_node(ROOT_ID, 40, "far", "name");
        db.alter(&mut explicit).unwrap();
        assert_eq!(db.next_id(), 41);
    }

    #[test]
    fn test_ids_stop_at_the_top_of_the_range() {
        let db = Database::new();
        let mut last = db.language().make_node(ROOT_ID, i32::MAX, "last", "name");
        assert!(matches!(db.alter(&mut last), Err(DatabaseError::IdsExhausted(i32::MAX))));
        let mut edge = db.language().make_node(ROOT_ID, i32::MAX - 1, "edge", "name");
        assert_eq!(db.alter(&mut edge).unwrap().id(), i32::MAX - 1);
        assert_eq!(db.next_id(), i32::MAX);
        let mut auto = db.language().make_node(ROOT_ID, -1, "", "name");
        assert!(matches!(db.alter(&mut auto), Err(DatabaseError::IdsExhausted(i32::MAX))));
        assert_eq!(db.node_count(), 2);
    }

    #[test]
    fn test_cut_keeps_sibling_order() {
        let db = sample();
        db.new_node(ROOT_ID, "tail", "name").unwrap();
        let mut r = db.language().cut(1);
        db.alter(&mut r).unwrap();
        assert_eq!(db.root().child_ids(), vec![2, 3, 4]);
    }

    #[test]
    fn test_failed_alter_leaves_tree() {
        let db = sample();
        let before = db.print_structure();
        for mut r in [
            db.language().make_node(99, -1, "x", "transform"),
            db.language().make_node(ROOT_ID, -1, "x", "teapot"),
            db.language().erase(ROOT_ID),
            db.language().cut(77),
            db.language().insert(ROOT_ID, 2, -1, "x", "transform"),
        ] {
            assert!(db.alter(&mut r).is_err());
        }
        assert_eq!(db.print_structure(), before);
    }

    #[test]
    fn test_erase_keeps_held_reference() {
        let db = sample();
        let hand = db.get_node_ref(2).unwrap();
        let mut r = db.language().erase(1);
        assert_eq!(db.alter(&mut r).unwrap().id(), ROOT_ID);
        assert!(db.get_node_ref(1).is_none());
        assert!(db.get_node_ref(3).is_none());
        assert!(!hand.is_active());
        assert_eq!(hand.name(), "hand");
        assert_eq!(db.node_count(), 1);
    }

    #[test]
    fn test_cut_lifts_children() {
        let db = sample();
        let mut r = db.language().cut(1);
        db.alter(&mut r).unwrap();
        assert_eq!(db.root().child_ids(), vec![2, 3]);
        assert_eq!(db.get_node_ref(2).unwrap().parent_id(), ROOT_ID);
    }

    #[test]
    fn test_insert_and_permute() {
        let db = sample();
        let mut r = db.language().insert(1, 3, -1, "wrap", "visibility");
        let wrap = db.alter(&mut r).unwrap();
        assert_eq!(db.get_node_ref(1).unwrap().child_ids(), vec![2, wrap.id()]);
        assert_eq!(wrap.child_ids(), vec![3]);

        let mut all = db.language().insert(ROOT_ID, -1, -1, "top", "name");
        let top = db.alter(&mut all).unwrap();
        assert_eq!(db.root().child_ids(), vec![top.id()]);
        assert_eq!(top.child_ids(), vec![1]);

        let mut p = db.language().permute(1, &[wrap.id(), 99]);
        db.alter(&mut p).unwrap();
        assert_eq!(db.get_node_ref(1).unwrap().child_ids(), vec![wrap.id(), 2]);
    }

    #[test]
    fn test_dump_rebuilds_identical_tree() {
        let db = sample();
        let mut t = db.language().transform(2, &Matrix4::translation(0.0, 1.0, 0.0));
        db.alter(&mut t).unwrap();
        let mut n = db.language().name(3, "dots", "debug");
        db.alter(&mut n).unwrap();

        let copy = Database::new();
        for mut record in db.dump() {
            copy.alter(&mut record).unwrap();
        }
        assert_eq!(copy.print_structure(), db.print_structure());
        assert_eq!(copy.get_node_ref(2).unwrap().transform(), Some(Matrix4::translation(0.0, 1.0, 0.0)));
        assert_eq!(copy.get_node_ref(3).unwrap().info(), "debug");
        assert_eq!(copy.dump(), db.dump());
    }

    #[test]
    fn test_find_and_reset() {
        let db = sample();
        assert_eq!(db.find_node("hand").map(|n| n.id()), Some(2));
        assert_eq!(db.find_node_by_type("points").map(|n| n.id()), Some(3));
        assert!(db.find_node_below(2, "dots").is_none());
        db.reset();
        assert_eq!(db.node_count(), 1);
        assert_eq!(db.new_node(ROOT_ID, "again", "name").unwrap().id(), 4);
    }

    #[test]
    fn test_handle_data_queue_continues_past_failures() {
        let db = Database::new();
        let lang = db.language().clone();
        let mut w = WireWriter::new();
        lang.make_node(ROOT_ID, -1, "a", "transform").encode(&mut w);
        lang.erase(55).encode(&mut w);
        lang.make_node(ROOT_ID, -1, "b", "name").encode(&mut w);
        assert_eq!(db.handle_data_queue(w.as_slice()), 2);
        assert!(db.find_node("b").is_some());
    }

    #[test]
    fn test_attach_and_merge_map_ids() {
        let src = sample();
        let dst = Database::new();
        let anchor = dst.new_node(ROOT_ID, "anchor", "name").unwrap();
        let map = dst.attach(anchor.id(), &src.dump()).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(dst.get_node_ref(map[&1]).unwrap().parent_id(), anchor.id());
        let count = dst.node_count();
        let again = dst.merge(anchor.id(), &src.dump()).unwrap();
        assert_eq!(again, map);
        assert_eq!(dst.node_count(), count);
    }

    #[test]
    fn test_file_round_trip() {
        let db = sample();
        let path = std::env::temp_dir().join(format!("szg_db_{}.bin", std::process::id()));
        db.write_to_file(&path).unwrap();
        let loaded = Database::new();
        let map = loaded.read_from_file(&path, ROOT_ID).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(map.len(), 3);
        assert_eq!(loaded.print_structure(), db.print_structure());
        assert!(matches!(loaded.read_from_file("/nonexistent/szg", ROOT_ID), Err(DatabaseError::File(_))));
    }
}
