//! Session: the entry point tying node classes to a storage backend.
//!
//! A `Session` owns the backend handle, the configuration and the
//! wrapped-class registry. Every operation runs in its own backend
//! transaction.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::active_node::{
    ActiveNode, Cardinality, Labeled, NodeClass, Query, QueryPlan, Source, WrappedClasses,
};
use crate::config::OgmConfig;
use crate::index::{IndexDef, IndexType};
use crate::model::*;
use crate::storage::{BackendConfig, MemoryBackend, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, Result};

pub struct Session<B: StorageBackend> {
    backend: B,
    config: OgmConfig,
    wrapped: WrappedClasses,
}

/// In-memory session for testing and embedding.
impl Session<MemoryBackend> {
    pub fn open_memory() -> Self {
        Self::with_backend(MemoryBackend::new(), OgmConfig::default())
    }

    pub fn from_config(config: OgmConfig) -> Result<Self> {
        match config.backend {
            BackendConfig::Memory => Ok(Self::with_backend(MemoryBackend::new(), config)),
        }
    }
}

impl<B: StorageBackend> Session<B> {
    pub fn with_backend(backend: B, config: OgmConfig) -> Self {
        Self { backend, config, wrapped: WrappedClasses::new() }
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &OgmConfig {
        &self.config
    }

    pub fn wrapped_classes(&self) -> &WrappedClasses {
        &self.wrapped
    }

    // ========================================================================
    // Registration & schema
    // ========================================================================

    /// Make `class` known for wrapping and create its declared indexes.
    pub async fn register(&self, class: &Arc<NodeClass>) -> Result<()> {
        self.wrapped.register(Arc::clone(class));
        if self.config.auto_index {
            self.create_indexes(class.index_definitions()).await?;
        }
        info!(class = class.name(), labels = ?class.labels(), "registered node class");
        Ok(())
    }

    /// Create indexes declared on a mixin label.
    pub async fn register_mixin<T: Labeled + ?Sized>(&self, mixin: &T) -> Result<()> {
        if self.config.auto_index {
            self.create_indexes(mixin.declared_indexes()).await?;
        }
        Ok(())
    }

    async fn create_indexes(&self, defs: Vec<IndexDef>) -> Result<()> {
        for def in defs {
            self.backend.create_index(&def.label, &def.property, def.index_type).await?;
        }
        Ok(())
    }

    async fn ensure_registered(&self, class: &Arc<NodeClass>) -> Result<()> {
        if !self.wrapped.contains(class.name()) {
            self.register(class).await?;
        }
        Ok(())
    }

    /// Handle for managing indexes on a label.
    pub fn label(&self, name: impl Into<String>) -> Label<'_, B> {
        Label { session: self, name: name.into() }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Instantiate and save in one step.
    pub async fn create(&self, class: &Arc<NodeClass>, attributes: PropertyMap) -> Result<ActiveNode> {
        let mut node = ActiveNode::new(class, attributes)?;
        self.save(&mut node).await?;
        Ok(node)
    }

    /// Insert a new node or write the changed attributes of a stored one,
    /// then persist queued relationship assignments.
    ///
    /// Either everything is written or nothing is: on failure, writes
    /// already applied are undone and `node` is left as it was before the
    /// call (no id, no timestamps, same changes and pending relationships).
    pub async fn save(&self, node: &mut ActiveNode) -> Result<()> {
        if node.is_destroyed() {
            return Err(Error::ExecutionError("cannot save a destroyed node".into()));
        }
        let class = Arc::clone(node.class());
        self.ensure_registered(&class).await?;

        let has_pending = !node.pending_relationships().is_empty();
        if node.id().is_some() && !node.is_changed() && !has_pending {
            return Ok(());
        }

        let before = node.clone();
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        if let Err(err) = self.write_node(&mut tx, &class, node).await {
            self.undo_write(&mut tx, &before, node).await;
            let rolled_back = self.backend.rollback_tx(tx).await;
            *node = before;
            warn!(class = class.name(), error = %err, "save failed, rolled back");
            rolled_back?;
            return Err(err);
        }

        self.backend.commit_tx(tx).await?;
        node.clear_pending_relationships();
        node.save_properties();
        Ok(())
    }

    /// Check pending targets, stamp, insert or update, then replace
    /// relationships.
    async fn write_node(&self, tx: &mut B::Tx, class: &NodeClass, node: &mut ActiveNode) -> Result<()> {
        for (name, targets) in node.pending_relationships() {
            for target in targets {
                if self.backend.get_node(tx, *target).await?.is_none() {
                    return Err(Error::NotFound(format!("Node {target} (relationship '{name}')")));
                }
            }
        }

        self.stamp(node)?;

        let id = match node.id() {
            None => {
                let labels = class.labels();
                let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
                let id = self.backend.create_node(tx, &label_refs, node.property_map()).await?;
                node.set_id(id);
                debug!(class = class.name(), %id, "created node");
                id
            }
            Some(id) => {
                for name in node.changed() {
                    match node.read_attribute(name) {
                        Value::Null => self.backend.remove_node_property(tx, id, name).await?,
                        value => self.backend.set_node_property(tx, id, name, value).await?,
                    }
                }
                debug!(class = class.name(), %id, changed = ?node.changed(), "updated node");
                id
            }
        };

        for (name, targets) in node.pending_relationships() {
            let Some(decl) = class.relationships().find(|r| &r.name == name) else { continue };
            let existing = self.backend.get_relationships(tx, id, decl.direction, Some(decl.rel_type.as_str())).await?;
            for rel in existing {
                self.backend.delete_relationship(tx, rel.id).await?;
            }
            let targets = match decl.cardinality {
                Cardinality::One => &targets[..targets.len().min(1)],
                Cardinality::Many => &targets[..],
            };
            for target in targets {
                let (src, dst) = match decl.direction {
                    Direction::Incoming => (*target, id),
                    Direction::Outgoing | Direction::Both => (id, *target),
                };
                self.backend.create_relationship(tx, src, dst, &decl.rel_type, PropertyMap::new()).await?;
            }
        }
        Ok(())
    }

    /// Revert what a failed `write_node` applied: drop a freshly inserted
    /// node, or put changed properties of a stored node back.
    async fn undo_write(&self, tx: &mut B::Tx, before: &ActiveNode, node: &ActiveNode) {
        let undone = match (before.id(), node.id()) {
            (None, Some(id)) => self.backend.detach_delete_node(tx, id).await.map(drop),
            (Some(id), _) => self.restore_properties(tx, id, node).await,
            (None, None) => Ok(()),
        };
        if let Err(err) = undone {
            warn!(class = node.class().name(), error = %err, "could not undo partial save");
        }
    }

    async fn restore_properties(&self, tx: &mut B::Tx, id: NodeId, node: &ActiveNode) -> Result<()> {
        for name in node.changed() {
            match node.attribute_was(name) {
                Value::Null => self.backend.remove_node_property(tx, id, name).await?,
                value => self.backend.set_node_property(tx, id, name, value).await?,
            }
        }
        Ok(())
    }

    /// Set `created_at` on insert and `updated_at` on every write, when declared.
    fn stamp(&self, node: &mut ActiveNode) -> Result<()> {
        if !self.config.timestamps {
            return Ok(());
        }
        let now = Value::DateTime(Utc::now());
        if node.is_new_record() && node.class().has_property("created_at") && node["created_at"].is_null() {
            node.write_attribute("created_at", now.clone())?;
        }
        if node.class().has_property("updated_at") {
            node.write_attribute("updated_at", now)?;
        }
        Ok(())
    }

    /// Delete the node and its relationships. Returns false for unsaved nodes.
    pub async fn destroy(&self, node: &mut ActiveNode) -> Result<bool> {
        let Some(id) = node.id().filter(|_| !node.is_destroyed()) else {
            return Ok(false);
        };
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let existed = self.backend.detach_delete_node(&mut tx, id).await?;
        self.backend.commit_tx(tx).await?;
        node.mark_destroyed();
        debug!(class = node.class().name(), %id, "destroyed node");
        Ok(existed)
    }

    /// Reload stored attributes, discarding unsaved changes.
    pub async fn reload(&self, node: &mut ActiveNode) -> Result<()> {
        let id = node.id().ok_or(Error::NotPersisted)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let stored = self.backend.get_node(&tx, id).await?;
        self.backend.commit_tx(tx).await?;
        let stored = stored.ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        node.reset_from(stored);
        Ok(())
    }

    /// Labels the stored node carries.
    pub async fn labels(&self, node: &ActiveNode) -> Result<Vec<String>> {
        let id = node.id().filter(|_| node.is_persisted()).ok_or(Error::NotPersisted)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let stored = self.backend.get_node(&tx, id).await?;
        self.backend.commit_tx(tx).await?;
        stored
            .map(|n| n.labels)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// How `query` would be answered for `target`.
    pub async fn explain<T: Labeled + ?Sized>(&self, target: &T, query: &Query) -> Result<QueryPlan> {
        let indexed: HashSet<String> = self
            .backend
            .indexes(Some(target.mapped_label_name()))
            .await?
            .into_iter()
            .map(|idx| idx.property)
            .collect();
        QueryPlan::resolve(target, query, &indexed)
    }

    /// Every node of `target` matching `query`, wrapped into its class.
    pub async fn all<T: Labeled + ?Sized>(&self, target: &T, query: Query) -> Result<Vec<ActiveNode>> {
        let plan = self.explain(target, &query).await?;
        debug!(plan = %plan, "resolved query");
        let nodes = self.execute(&plan).await?;
        Ok(nodes.into_iter().filter_map(|n| self.wrap_or_skip(n, &plan)).collect())
    }

    /// First match that maps to a registered class, if any.
    pub async fn find<T: Labeled + ?Sized>(&self, target: &T, query: Query) -> Result<Option<ActiveNode>> {
        let plan = self.explain(target, &query).await?;
        debug!(plan = %plan, "resolved query");
        let nodes = self.execute(&plan).await?;
        Ok(nodes.into_iter().find_map(|n| self.wrap_or_skip(n, &plan)))
    }

    fn wrap_or_skip(&self, node: Node, plan: &QueryPlan) -> Option<ActiveNode> {
        let id = node.id;
        let wrapped = self.wrapped.wrap(node);
        if wrapped.is_none() {
            warn!(%id, label = plan.label(), "no registered class for node, skipping");
        }
        wrapped
    }

    /// Load a node by id if it carries `class`'s label.
    pub async fn find_by_id(&self, class: &Arc<NodeClass>, id: NodeId) -> Result<Option<ActiveNode>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let stored = self.backend.get_node(&tx, id).await?;
        self.backend.commit_tx(tx).await?;
        Ok(stored
            .filter(|n| n.has_label(class.name()))
            .map(|n| ActiveNode::load(class, n)))
    }

    pub async fn count<T: Labeled + ?Sized>(&self, target: &T, query: Query) -> Result<usize> {
        let plan = self.explain(target, &query).await?;
        Ok(self.execute(&plan).await?.len())
    }

    /// Delete every node of `target` along with its relationships.
    pub async fn destroy_all<T: Labeled + ?Sized>(&self, target: &T) -> Result<usize> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let nodes = self.backend.nodes_by_label(&tx, target.mapped_label_name()).await?;
        let mut deleted = 0;
        for node in nodes {
            if self.backend.detach_delete_node(&mut tx, node.id).await? {
                deleted += 1;
            }
        }
        self.backend.commit_tx(tx).await?;
        info!(label = target.mapped_label_name(), deleted, "destroyed all nodes");
        Ok(deleted)
    }

    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<Node>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let mut nodes = match &plan.source {
            Source::LabelScan { label } => self.backend.nodes_by_label(&tx, label).await?,
            Source::IndexLookup { label, property, value } => {
                self.backend.nodes_by_property(&tx, label, property, value).await?
            }
        };
        nodes.retain(|n| plan.matches_properties(n));

        if !plan.relationship_filters.is_empty() {
            let mut kept = Vec::with_capacity(nodes.len());
            'nodes: for node in nodes {
                for filter in &plan.relationship_filters {
                    let rels = self
                        .backend
                        .get_relationships(&tx, node.id, filter.direction, Some(filter.rel_type.as_str()))
                        .await?;
                    let linked: HashSet<NodeId> = rels.iter().filter_map(|r| r.other_node(node.id)).collect();
                    let ok = if filter.targets.is_empty() {
                        linked.is_empty()
                    } else {
                        filter.targets.iter().all(|t| linked.contains(t))
                    };
                    if !ok {
                        continue 'nodes;
                    }
                }
                kept.push(node);
            }
            nodes = kept;
        }

        self.backend.commit_tx(tx).await?;
        plan.finish(&mut nodes);
        Ok(nodes)
    }
}

// ============================================================================
// Label handle
// ============================================================================

/// Index management for one label.
pub struct Label<'s, B: StorageBackend> {
    session: &'s Session<B>,
    name: String,
}

impl<'s, B: StorageBackend> Label<'s, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create_index(&self, property: &str) -> Result<()> {
        self.session.backend.create_index(&self.name, property, IndexType::BTree).await
    }

    pub async fn create_unique_index(&self, property: &str) -> Result<()> {
        self.session.backend.create_index(&self.name, property, IndexType::Unique).await
    }

    pub async fn drop_index(&self, property: &str) -> Result<()> {
        self.session.backend.drop_index(&self.name, property).await
    }

    /// Indexed property names on this label.
    pub async fn indexes(&self) -> Result<Vec<String>> {
        Ok(self
            .session
            .backend
            .indexes(Some(&self.name))
            .await?
            .into_iter()
            .map(|idx| idx.property)
            .collect())
    }
}
