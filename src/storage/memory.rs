//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Indexes
//!
//! - **Label index**: always maintained, `nodes_by_label` never scans.
//! - **Property indexes**: created per `(label, property)` with
//!   `create_index()`. They are backfilled on creation and kept current on
//!   every node write. Only scalar values are indexed; lookups by a
//!   non-scalar value fall back to a label scan.
//!
//! ## Limitations
//!
//! - **No real transactions**: `commit_tx()` and `rollback_tx()` are no-ops.
//!   Writes are applied immediately. Rollback does NOT undo mutations.
//!
//! Lock order is always `nodes` → `label_index` → `property_indexes`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::debug;

use crate::model::*;
use crate::tx::{Transaction, TxMode, TxId};
use crate::index::{IndexDef, IndexType};
use crate::{Error, Result};
use super::StorageBackend;

// ============================================================================
// Property index
// ============================================================================

/// Hashable projection of a scalar `Value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl IndexKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Int(i) => Some(IndexKey::Int(*i)),
            Value::Float(f) if f.is_nan() => None,
            // -0.0 == 0.0 must hash alike
            Value::Float(f) => Some(IndexKey::Float(if *f == 0.0 { 0.0f64.to_bits() } else { f.to_bits() })),
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Date(d) => Some(IndexKey::Date(*d)),
            Value::DateTime(dt) => Some(IndexKey::DateTime(*dt)),
            _ => None,
        }
    }
}

struct PropertyIndex {
    index_type: IndexType,
    entries: hashbrown::HashMap<IndexKey, SmallVec<[NodeId; 4]>>,
}

impl PropertyIndex {
    fn new(index_type: IndexType) -> Self {
        Self { index_type, entries: hashbrown::HashMap::new() }
    }

    fn insert(&mut self, key: IndexKey, id: NodeId) {
        let ids = self.entries.entry(key).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn remove(&mut self, key: &IndexKey, id: NodeId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.retain(|nid| *nid != id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    fn lookup(&self, key: &IndexKey) -> &[NodeId] {
        self.entries.get(key).map(|ids| ids.as_slice()).unwrap_or(&[])
    }

    /// A unique index already holds `key` for a node other than `id`.
    fn conflicts(&self, key: &IndexKey, id: NodeId) -> bool {
        self.index_type == IndexType::Unique && self.lookup(key).iter().any(|nid| *nid != id)
    }
}

type IndexMapByKey = HashMap<(String, String), PropertyIndex>;

fn index_key(label: &str, property: &str) -> (String, String) {
    (label.to_string(), property.to_string())
}

/// Fail if writing `props` under `labels` would break a unique index.
fn check_unique<'a>(
    indexes: &IndexMapByKey,
    id: NodeId,
    labels: impl IntoIterator<Item = &'a String> + Clone,
    props: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Result<()> {
    for (key, value) in props {
        let Some(ikey) = IndexKey::from_value(value) else { continue };
        for label in labels.clone() {
            if let Some(idx) = indexes.get(&index_key(label, key)) {
                if idx.conflicts(&ikey, id) {
                    return Err(Error::ConstraintViolation(format!(
                        "Node with label {label} already has {key} = {value}"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn index_node(indexes: &mut IndexMapByKey, label: &str, node: &Node) {
    for (key, value) in &node.properties {
        if let (Some(idx), Some(ikey)) = (indexes.get_mut(&index_key(label, key)), IndexKey::from_value(value)) {
            idx.insert(ikey, node.id);
        }
    }
}

fn unindex_node(indexes: &mut IndexMapByKey, label: &str, node: &Node) {
    for (key, value) in &node.properties {
        if let (Some(idx), Some(ikey)) = (indexes.get_mut(&index_key(label, key)), IndexKey::from_value(value)) {
            idx.remove(&ikey, node.id);
        }
    }
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    /// label → node IDs
    label_index: RwLock<HashMap<String, Vec<NodeId>>>,
    /// (label, property) → value → node IDs
    property_indexes: RwLock<IndexMapByKey>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                relationships: RwLock::new(HashMap::new()),
                adjacency: RwLock::new(HashMap::new()),
                label_index: RwLock::new(HashMap::new()),
                property_indexes: RwLock::new(HashMap::new()),
                next_node_id: AtomicU64::new(1),
                next_rel_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction (a marker carrying the mode, no MVCC).
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

fn ensure_writable(tx: &MemoryTx) -> Result<()> {
    if tx.is_writable() {
        Ok(())
    } else {
        Err(Error::TxError(format!("transaction {} is read-only", tx.id.0)))
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode })
    }

    /// No-op: memory backend applies writes immediately, not on commit.
    async fn commit_tx(&self, _tx: MemoryTx) -> Result<()> { Ok(()) }

    /// WARNING: No-op. Mutations applied during this transaction are NOT reverted.
    async fn rollback_tx(&self, _tx: MemoryTx) -> Result<()> { Ok(()) }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    async fn create_node(
        &self,
        tx: &mut MemoryTx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId> {
        ensure_writable(tx)?;
        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        let mut node_labels: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels {
            if !node_labels.iter().any(|l| l == label) {
                node_labels.push(label.to_string());
            }
        }
        let node = Node { id, labels: node_labels, properties: props };

        let mut nodes = self.inner.nodes.write();
        let mut label_idx = self.inner.label_index.write();
        let mut prop_idx = self.inner.property_indexes.write();

        check_unique(&prop_idx, id, &node.labels, &node.properties)?;

        for label in &node.labels {
            label_idx.entry(label.clone()).or_default().push(id);
            index_node(&mut prop_idx, label, &node);
        }
        nodes.insert(id, node);
        drop((nodes, label_idx, prop_idx));

        self.inner.adjacency.write().insert(id, Vec::new());
        Ok(id)
    }

    async fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    async fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        ensure_writable(tx)?;
        {
            let adj = self.inner.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(
                        format!("Cannot delete node {id} with {} relationships. Delete relationships first.", rels.len())
                    ));
                }
            }
        }

        let mut nodes = self.inner.nodes.write();
        let mut label_idx = self.inner.label_index.write();
        let mut prop_idx = self.inner.property_indexes.write();

        let removed = nodes.remove(&id);
        if let Some(node) = &removed {
            for label in &node.labels {
                if let Some(ids) = label_idx.get_mut(label) {
                    ids.retain(|nid| *nid != id);
                }
                unindex_node(&mut prop_idx, label, node);
            }
        }
        drop((nodes, label_idx, prop_idx));

        self.inner.adjacency.write().remove(&id);
        Ok(removed.is_some())
    }

    async fn set_node_property(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        key: &str,
        val: Value,
    ) -> Result<()> {
        ensure_writable(tx)?;
        let mut nodes = self.inner.nodes.write();
        let mut prop_idx = self.inner.property_indexes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;

        let key = key.to_string();
        check_unique(&prop_idx, id, &node.labels, [(&key, &val)])?;

        let old_key = node.properties.get(&key).and_then(IndexKey::from_value);
        let new_key = IndexKey::from_value(&val);
        for label in &node.labels {
            if let Some(idx) = prop_idx.get_mut(&index_key(label, &key)) {
                if let Some(old) = &old_key {
                    idx.remove(old, id);
                }
                if let Some(new) = &new_key {
                    idx.insert(new.clone(), id);
                }
            }
        }
        node.properties.insert(key, val);
        Ok(())
    }

    async fn remove_node_property(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        key: &str,
    ) -> Result<()> {
        ensure_writable(tx)?;
        let mut nodes = self.inner.nodes.write();
        let mut prop_idx = self.inner.property_indexes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;

        if let Some(old) = node.properties.remove(key) {
            if let Some(old_key) = IndexKey::from_value(&old) {
                for label in &node.labels {
                    if let Some(idx) = prop_idx.get_mut(&index_key(label, key)) {
                        idx.remove(&old_key, id);
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    async fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        ensure_writable(tx)?;
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed));
        let mut rel = Relationship::new(id, src, dst, rel_type);
        rel.properties = props;

        self.inner.relationships.write().insert(id, rel);

        let mut adj = self.inner.adjacency.write();
        adj.entry(src).or_default().push(id);
        if src != dst {
            adj.entry(dst).or_default().push(id);
        }

        Ok(id)
    }

    async fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        ensure_writable(tx)?;
        let removed = self.inner.relationships.write().remove(&id);
        if let Some(rel) = &removed {
            let mut adj = self.inner.adjacency.write();
            if let Some(rels) = adj.get_mut(&rel.src) {
                rels.retain(|rid| *rid != id);
            }
            if rel.src != rel.dst {
                if let Some(rels) = adj.get_mut(&rel.dst) {
                    rels.retain(|rid| *rid != id);
                }
            }
        }
        Ok(removed.is_some())
    }

    async fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let adj = self.inner.adjacency.read();
        let rels = self.inner.relationships.read();

        let Some(rel_ids) = adj.get(&node) else { return Ok(Vec::new()) };
        Ok(rel_ids
            .iter()
            .filter_map(|rid| rels.get(rid))
            .filter(|rel| rel.touches(node, dir))
            .filter(|rel| rel_type.is_none_or(|t| rel.rel_type == t))
            .cloned()
            .collect())
    }

    // ========================================================================
    // Index
    // ========================================================================

    async fn create_index(&self, label: &str, property: &str, index_type: IndexType) -> Result<()> {
        let nodes = self.inner.nodes.read();
        let label_idx = self.inner.label_index.read();
        let mut prop_idx = self.inner.property_indexes.write();

        let key = index_key(label, property);
        if let Some(existing) = prop_idx.get(&key) {
            if existing.index_type == index_type {
                return Ok(());
            }
            return Err(Error::ConstraintViolation(format!(
                "Index on :{label}({property}) already exists as {:?}", existing.index_type
            )));
        }

        let mut idx = PropertyIndex::new(index_type);
        for id in label_idx.get(label).into_iter().flatten() {
            let Some(ikey) = nodes.get(id).and_then(|n| n.get(property)).and_then(IndexKey::from_value) else {
                continue;
            };
            if idx.conflicts(&ikey, *id) {
                return Err(Error::ConstraintViolation(format!(
                    "Cannot create unique index on :{label}({property}): duplicate values exist"
                )));
            }
            idx.insert(ikey, *id);
        }
        debug!(label, property, entries = idx.entries.len(), "created property index");
        prop_idx.insert(key, idx);
        Ok(())
    }

    async fn drop_index(&self, label: &str, property: &str) -> Result<()> {
        if self.inner.property_indexes.write().remove(&index_key(label, property)).is_some() {
            debug!(label, property, "dropped property index");
        }
        Ok(())
    }

    async fn indexes(&self, label: Option<&str>) -> Result<Vec<IndexDef>> {
        let prop_idx = self.inner.property_indexes.read();
        let mut defs: Vec<IndexDef> = prop_idx
            .iter()
            .filter(|((l, _), _)| label.is_none_or(|want| l == want))
            .map(|((l, p), idx)| IndexDef::new(l.clone(), p.clone(), idx.index_type))
            .collect();
        defs.sort_by(|a, b| (&a.label, &a.property).cmp(&(&b.label, &b.property)));
        Ok(defs)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn nodes_by_label(&self, _tx: &MemoryTx, label: &str) -> Result<Vec<Node>> {
        let nodes = self.inner.nodes.read();
        let idx = self.inner.label_index.read();

        Ok(idx
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(|id| nodes.get(id).cloned())
            .collect())
    }

    async fn nodes_by_property(
        &self,
        _tx: &MemoryTx,
        label: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Node>> {
        let nodes = self.inner.nodes.read();
        let label_idx = self.inner.label_index.read();
        let prop_idx = self.inner.property_indexes.read();

        if let (Some(idx), Some(ikey)) = (prop_idx.get(&index_key(label, key)), IndexKey::from_value(value)) {
            debug!(label, key, "property lookup via index");
            return Ok(idx
                .lookup(&ikey)
                .iter()
                .filter_map(|id| nodes.get(id))
                .filter(|n| n.get(key) == Some(value))
                .cloned()
                .collect());
        }

        debug!(label, key, "property lookup via label scan");
        Ok(label_idx
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(|id| nodes.get(id))
            .filter(|n| n.get(key) == Some(value))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
