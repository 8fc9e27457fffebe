//! Node class declarations.
//!
//! A [`NodeClass`] is the Rust counterpart of a mapped model: a name (which
//! is also its primary label), declared properties, relationships, custom
//! writers and included label mixins. Classes are immutable once built and
//! shared as `Arc<NodeClass>`.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::index::{IndexDef, IndexType};
use crate::model::{Direction, PropertyMap, Value};
use crate::Result;
use super::node::ActiveNode;
use super::property::{PropertyDef, PropertyOptions, PropertyType};

/// Custom attribute writer, consulted during mass assignment for keys that
/// are not declared properties.
pub type WriterFn = Arc<dyn Fn(&mut ActiveNode, Value) -> Result<()> + Send + Sync>;

// ============================================================================
// Labeled: anything that can be searched by label
// ============================================================================

/// A label-bearing search target: node classes and label mixins.
pub trait Labeled: Send + Sync {
    /// The label nodes of this target carry.
    fn mapped_label_name(&self) -> &str;

    /// Indexes declared on the mapped label.
    fn declared_indexes(&self) -> Vec<IndexDef>;

    /// Declared type of a property, used to typecast query conditions.
    fn property_type(&self, _name: &str) -> Option<PropertyType> {
        None
    }

    /// Declared relationship with this name.
    fn relationship(&self, _name: &str) -> Option<&RelationshipDecl> {
        None
    }
}

// ============================================================================
// Relationships
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A `has_one` / `has_many` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDecl {
    pub name: String,
    pub rel_type: String,
    pub direction: Direction,
    pub cardinality: Cardinality,
}

impl RelationshipDecl {
    /// Relationship type `#<name>`, outgoing.
    pub fn new(name: impl Into<String>, cardinality: Cardinality) -> Self {
        let name = name.into();
        Self {
            rel_type: format!("#{name}"),
            name,
            direction: Direction::Outgoing,
            cardinality,
        }
    }

    pub fn with_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_type = rel_type.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

// ============================================================================
// LabelMixin
// ============================================================================

/// A label shared by every class that includes it. Mixins are searchable on
/// their own: `session.all(&mixin, ..)` finds nodes of all including classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMixin {
    label: String,
    indexes: Vec<(String, IndexType)>,
}

impl LabelMixin {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), indexes: Vec::new() }
    }

    pub fn index(mut self, property: impl Into<String>) -> Self {
        self.indexes.push((property.into(), IndexType::BTree));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Labeled for LabelMixin {
    fn mapped_label_name(&self) -> &str {
        &self.label
    }

    fn declared_indexes(&self) -> Vec<IndexDef> {
        self.indexes
            .iter()
            .map(|(prop, ty)| IndexDef::new(self.label.clone(), prop.clone(), *ty))
            .collect()
    }
}

// ============================================================================
// NodeClass
// ============================================================================

pub struct NodeClass {
    name: String,
    properties: IndexMap<String, PropertyDef>,
    relationships: IndexMap<String, RelationshipDecl>,
    writers: IndexMap<String, WriterFn>,
    mixins: SmallVec<[Arc<LabelMixin>; 2]>,
}

impl NodeClass {
    pub fn builder(name: impl Into<String>) -> NodeClassBuilder {
        NodeClassBuilder {
            class: NodeClass {
                name: name.into(),
                properties: IndexMap::new(),
                relationships: IndexMap::new(),
                writers: IndexMap::new(),
                mixins: SmallVec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class label followed by each included mixin's label.
    pub fn labels(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.mixins.iter().map(|m| m.label.clone()))
            .collect()
    }

    pub fn mixins(&self) -> &[Arc<LabelMixin>] {
        &self.mixins
    }

    pub fn includes(&self, mixin_label: &str) -> bool {
        self.mixins.iter().any(|m| m.label == mixin_label)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.get(name)
    }

    /// Declared properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.values()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn attribute_type(&self, name: &str) -> Option<PropertyType> {
        self.properties.get(name).map(|p| p.property_type)
    }

    /// Properties indexed on the class label, in declaration order.
    pub fn indexed_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .values()
            .filter(|p| p.index.is_some())
            .map(|p| p.name.as_str())
    }

    pub fn has_relationship(&self, name: &str) -> bool {
        self.relationships.contains_key(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDecl> {
        self.relationships.values()
    }

    pub(crate) fn custom_writer(&self, name: &str) -> Option<&WriterFn> {
        self.writers.get(name)
    }

    pub(crate) fn writer_names(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }

    /// A declared property or a custom writer accepts `name` during mass assignment.
    pub fn responds_to_writer(&self, name: &str) -> bool {
        self.properties.contains_key(name) || self.writers.contains_key(name)
    }

    /// Every index this class needs: its own indexed properties plus those
    /// of included mixins.
    pub fn index_definitions(&self) -> Vec<IndexDef> {
        let mut defs = self.declared_indexes();
        for mixin in &self.mixins {
            defs.extend(mixin.declared_indexes());
        }
        defs
    }

    /// Remove relationship keys from `attributes`, returning them.
    pub fn extract_relationship_attributes(&self, attributes: &mut PropertyMap) -> PropertyMap {
        let keys: Vec<String> = attributes
            .keys()
            .filter(|k| self.has_relationship(k))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| attributes.remove_entry(&k))
            .collect()
    }
}

impl Labeled for NodeClass {
    fn mapped_label_name(&self) -> &str {
        &self.name
    }

    fn declared_indexes(&self) -> Vec<IndexDef> {
        self.properties
            .values()
            .filter_map(|p| p.index.map(|ty| IndexDef::new(self.name.clone(), p.name.clone(), ty)))
            .collect()
    }

    fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.attribute_type(name)
    }

    fn relationship(&self, name: &str) -> Option<&RelationshipDecl> {
        self.relationships.get(name)
    }
}

impl fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClass")
            .field("name", &self.name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("relationships", &self.relationships.keys().collect::<Vec<_>>())
            .field("writers", &self.writers.keys().collect::<Vec<_>>())
            .field("mixins", &self.mixins.iter().map(|m| m.label()).collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Declarative construction of a [`NodeClass`].
///
/// ```
/// use neo4j_ogm::{NodeClass, PropertyOptions, PropertyType};
///
/// let person = NodeClass::builder("Person")
///     .property("name", PropertyOptions::typed(PropertyType::String))
///     .property("created_at", PropertyOptions::new())
///     .index("name")
///     .has_one("employer")
///     .build();
///
/// assert_eq!(person.attribute_type("created_at"), Some(PropertyType::DateTime));
/// assert!(person.has_relationship("employer"));
/// ```
pub struct NodeClassBuilder {
    class: NodeClass,
}

impl NodeClassBuilder {
    /// Declare a property, normalizing timestamp and `Time` types first.
    pub fn property(self, name: impl Into<String>, options: PropertyOptions) -> Self {
        let name = name.into();
        let options = options.with_magic(&name);
        self.attribute(name, options)
    }

    /// Declare a property exactly as given.
    pub fn attribute(mut self, name: impl Into<String>, options: PropertyOptions) -> Self {
        let name = name.into();
        self.class.properties.insert(name.clone(), PropertyDef::new(name, options));
        self
    }

    /// Index a property on the class label, declaring it untyped if needed.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let def = self
            .class
            .properties
            .entry(name.clone())
            .or_insert_with(|| PropertyDef::new(name, PropertyOptions::new()));
        if def.index.is_none() {
            def.index = Some(IndexType::BTree);
        }
        self
    }

    pub fn has_one(self, name: impl Into<String>) -> Self {
        self.relationship(RelationshipDecl::new(name, Cardinality::One))
    }

    pub fn has_many(self, name: impl Into<String>) -> Self {
        self.relationship(RelationshipDecl::new(name, Cardinality::Many))
    }

    pub fn relationship(mut self, decl: RelationshipDecl) -> Self {
        self.class.relationships.insert(decl.name.clone(), decl);
        self
    }

    /// Accept `name` in mass assignment and route it through `f`.
    pub fn writer(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut ActiveNode, Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.class.writers.insert(name.into(), Arc::new(f));
        self
    }

    pub fn include(mut self, mixin: Arc<LabelMixin>) -> Self {
        if !self.class.includes(mixin.label()) {
            self.class.mixins.push(mixin);
        }
        self
    }

    pub fn build(self) -> Arc<NodeClass> {
        Arc::new(self.class)
    }
}
