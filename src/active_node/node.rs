//! Node instances: mass assignment, typed attribute access and dirty tracking.

use std::ops::Index;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::model::{Node, NodeId, PropertyMap, Value};
use crate::{Error, Result};
use super::class::{Cardinality, NodeClass};
use super::property::PropertyType;

static NULL: Value = Value::Null;

/// Options for mass assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignOptions {
    /// Assign protected properties too.
    pub without_protection: bool,
}

/// An instance of a [`NodeClass`].
///
/// Every declared property is always present in the attribute map (as
/// `Null` when unset). Writes go through the declared type's typecaster and
/// are recorded as changes until [`save_properties`](Self::save_properties).
#[derive(Debug, Clone)]
pub struct ActiveNode {
    class: Arc<NodeClass>,
    id: Option<NodeId>,
    attributes: IndexMap<String, Value>,
    /// name → value before the first unsaved change
    changed_attributes: IndexMap<String, Value>,
    previous_changes: IndexMap<String, (Value, Value)>,
    /// relationship name → target nodes, written on save
    pending_relationships: IndexMap<String, Vec<NodeId>>,
    destroyed: bool,
}

impl ActiveNode {
    /// Instantiate with defaults applied and `attributes` mass-assigned.
    pub fn new(class: &Arc<NodeClass>, attributes: PropertyMap) -> Result<Self> {
        Self::new_with_options(class, attributes, AssignOptions::default())
    }

    pub fn new_with_options(
        class: &Arc<NodeClass>,
        attributes: PropertyMap,
        options: AssignOptions,
    ) -> Result<Self> {
        let mut node = Self::blank(class);
        node.assign_attributes_with_options(attributes, options)?;
        Ok(node)
    }

    /// An unsaved instance holding only defaults. Defaults are not changes.
    fn blank(class: &Arc<NodeClass>) -> Self {
        let attributes = class
            .properties()
            .map(|p| (p.name.clone(), p.default_value()))
            .collect();
        Self {
            class: Arc::clone(class),
            id: None,
            attributes,
            changed_attributes: IndexMap::new(),
            previous_changes: IndexMap::new(),
            pending_relationships: IndexMap::new(),
            destroyed: false,
        }
    }

    /// Wrap a stored node. Undeclared stored properties are ignored.
    pub fn load(class: &Arc<NodeClass>, node: Node) -> Self {
        let Node { id, mut properties, .. } = node;
        let attributes = class
            .properties()
            .map(|p| {
                let stored = properties.remove(&p.name).unwrap_or(Value::Null);
                (p.name.clone(), p.typecast(stored))
            })
            .collect();
        Self {
            class: Arc::clone(class),
            id: Some(id),
            attributes,
            changed_attributes: IndexMap::new(),
            previous_changes: IndexMap::new(),
            pending_relationships: IndexMap::new(),
            destroyed: false,
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        if self.class.has_property(name) {
            return self.write_attribute(name, value);
        }
        match self.class.custom_writer(name).cloned() {
            Some(writer) => writer(self, value),
            None => Err(Error::UnknownAttribute(name.to_string())),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn class(&self) -> &Arc<NodeClass> {
        &self.class
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn is_new_record(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some() && !self.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// This node as a `Value::Node`, for relationship assignments and query
    /// conditions.
    pub fn as_value(&self) -> Result<Value> {
        let id = self.id.filter(|_| !self.destroyed).ok_or(Error::NotPersisted)?;
        Ok(Value::Node(Box::new(Node {
            id,
            labels: self.class.labels(),
            properties: self.property_map(),
        })))
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = Some(id);
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Current value of `name`; `Null` for unknown names.
    pub fn read_attribute(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Typecast and store `value`, recording a change only when the stored
    /// value actually differs.
    pub fn write_attribute(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let def = self
            .class
            .property(name)
            .ok_or_else(|| Error::UnknownAttribute(name.to_string()))?;
        let value = def.typecast(value.into());
        let Some(current) = self.attributes.get_mut(name) else {
            return Err(Error::UnknownAttribute(name.to_string()));
        };
        if *current != value {
            if !self.changed_attributes.contains_key(name) {
                self.changed_attributes.insert(name.to_string(), current.clone());
            }
            *current = value;
        }
        Ok(())
    }

    /// Mass-assign after construction, with the same validation and
    /// protection as `new`.
    pub fn assign_attributes(&mut self, attributes: PropertyMap) -> Result<()> {
        self.assign_attributes_with_options(attributes, AssignOptions::default())
    }

    /// Validate every key before writing any. Writer keys are applied in
    /// declaration order (properties, then custom writers); relationship
    /// keys are queued afterwards.
    pub fn assign_attributes_with_options(
        &mut self,
        mut attributes: PropertyMap,
        options: AssignOptions,
    ) -> Result<()> {
        let class = Arc::clone(&self.class);
        let relationship_props = class.extract_relationship_attributes(&mut attributes);
        let mut writer_props = extract_writer_attributes(&class, &mut attributes);

        if !attributes.is_empty() {
            let mut invalid: Vec<String> = attributes.into_keys().collect();
            invalid.sort();
            return Err(Error::UndefinedProperty(invalid));
        }

        let order = class.attribute_names().chain(class.writer_names());
        for name in order {
            let Some(value) = writer_props.remove(name) else { continue };
            if !options.without_protection && class.property(name).is_some_and(|p| p.protected) {
                debug!(class = class.name(), property = name, "skipping protected property in mass assignment");
                continue;
            }
            self.assign(name, value)?;
        }

        for (name, value) in relationship_props {
            self.assign_relationship(&name, value)?;
        }
        Ok(())
    }

    /// All declared attributes in declaration order.
    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    /// Presence check: the attribute read as a boolean.
    pub fn query_attribute(&self, name: &str) -> bool {
        PropertyType::Boolean.typecast(self.read_attribute(name)).is_truthy()
    }

    /// Non-null attributes as a storable map.
    pub fn property_map(&self) -> PropertyMap {
        self.attributes
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Queue a relationship assignment. `Null` clears, a node sets, a list of
    /// nodes sets many (`has_many` only).
    pub fn assign_relationship(&mut self, name: &str, value: Value) -> Result<()> {
        let decl = self
            .class
            .relationships()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::UnknownAttribute(name.to_string()))?;

        let targets = match &value {
            Value::Null => Vec::new(),
            Value::Node(n) => vec![n.id],
            Value::List(items) if decl.cardinality == Cardinality::Many => items
                .iter()
                .map(|v| {
                    v.as_node_id().ok_or_else(|| Error::TypeError {
                        expected: "NODE".into(),
                        got: v.type_name().into(),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(Error::TypeError {
                    expected: if decl.cardinality == Cardinality::Many { "LIST<NODE>" } else { "NODE" }.into(),
                    got: other.type_name().into(),
                });
            }
        };
        self.pending_relationships.insert(name.to_string(), targets);
        Ok(())
    }

    /// Point relationship `name` at `target` (which must be saved).
    pub fn relate(&mut self, name: &str, target: &ActiveNode) -> Result<()> {
        let value = target.as_value()?;
        self.assign_relationship(name, value)
    }

    pub fn pending_relationships(&self) -> &IndexMap<String, Vec<NodeId>> {
        &self.pending_relationships
    }

    pub(crate) fn clear_pending_relationships(&mut self) {
        self.pending_relationships.clear();
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    /// Names of attributes changed since the last save, in change order.
    pub fn changed(&self) -> Vec<&str> {
        self.changed_attributes.keys().map(String::as_str).collect()
    }

    pub fn is_changed(&self) -> bool {
        !self.changed_attributes.is_empty()
    }

    pub fn attribute_changed(&self, name: &str) -> bool {
        self.changed_attributes.contains_key(name)
    }

    /// Value before the unsaved change, or the current value.
    pub fn attribute_was(&self, name: &str) -> Value {
        match self.changed_attributes.get(name) {
            Some(original) => original.clone(),
            None => self.read_attribute(name),
        }
    }

    /// name → (original, current) for every changed attribute.
    pub fn changes(&self) -> IndexMap<String, (Value, Value)> {
        self.changed_attributes
            .iter()
            .map(|(name, original)| (name.clone(), (original.clone(), self.read_attribute(name))))
            .collect()
    }

    /// Changes rolled up by the last save.
    pub fn previous_changes(&self) -> &IndexMap<String, (Value, Value)> {
        &self.previous_changes
    }

    /// Roll current changes into previous changes and start clean.
    pub fn save_properties(&mut self) {
        self.previous_changes = self.changes();
        self.changed_attributes.clear();
    }

    /// Undo unsaved attribute changes.
    pub fn restore_attributes(&mut self) {
        for (name, original) in self.changed_attributes.drain(..) {
            if let Some(slot) = self.attributes.get_mut(&name) {
                *slot = original;
            }
        }
    }

    /// Replace attributes with freshly stored state, dropping unsaved changes.
    pub(crate) fn reset_from(&mut self, node: Node) {
        let fresh = Self::load(&self.class, node);
        self.attributes = fresh.attributes;
        self.changed_attributes.clear();
        self.pending_relationships.clear();
    }
}

/// Remove keys accepted by a writer (declared property or custom writer).
fn extract_writer_attributes(class: &NodeClass, attributes: &mut PropertyMap) -> PropertyMap {
    let keys: Vec<String> = attributes
        .keys()
        .filter(|k| class.responds_to_writer(k))
        .cloned()
        .collect();
    keys.into_iter()
        .filter_map(|k| attributes.remove_entry(&k))
        .collect()
}

impl Index<&str> for ActiveNode {
    type Output = Value;

    /// `node["name"]`; `Null` for unknown names.
    fn index(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&NULL)
    }
}

/// Two instances are equal when they are the same stored node.
impl PartialEq for ActiveNode {
    fn eq(&self, other: &Self) -> bool {
        self.id.is_some() && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_node::class::LabelMixin;
    use crate::active_node::property::PropertyOptions;
    use crate::props;
    use pretty_assertions::assert_eq;

    fn person() -> Arc<NodeClass> {
        NodeClass::builder("Person")
            .property("name", PropertyOptions::typed(PropertyType::String))
            .property("age", PropertyOptions::typed(PropertyType::Integer).default_value(18))
            .property("admin", PropertyOptions::typed(PropertyType::Boolean).protected())
            .property("created_at", PropertyOptions::new())
            .writer("full_name", |node, value| {
                let text = value.as_str().unwrap_or_default().to_string();
                let first = text.split_whitespace().next().unwrap_or_default().to_string();
                node.write_attribute("name", first)
            })
            .has_one("employer")
            .build()
    }

    #[test]
    fn test_defaults_are_not_changes() {
        let node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        assert_eq!(node["age"], Value::Int(18));
        assert!(!node.is_changed());
        assert!(node.is_new_record());
    }

    #[test]
    fn test_undefined_properties_rejected() {
        let err = ActiveNode::new(&person(), props! { "zeta" => 1, "alpha" => 2, "name" => "x" }).unwrap_err();
        assert_eq!(err.to_string(), "Undefined properties: alpha,zeta");
    }

    #[test]
    fn test_unknown_reads_are_null() {
        let node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        assert_eq!(node.read_attribute("nope"), Value::Null);
        assert_eq!(node["nope"], Value::Null);
    }

    #[test]
    fn test_unknown_write_fails() {
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        assert!(matches!(node.write_attribute("nope", 1), Err(Error::UnknownAttribute(_))));
    }

    #[test]
    fn test_mass_assignment_typecasts_and_marks_dirty() {
        let node = ActiveNode::new(&person(), props! { "name" => 42, "age" => "33" }).unwrap();
        assert_eq!(node["name"], Value::from("42"));
        assert_eq!(node["age"], Value::Int(33));
        let mut changed = node.changed();
        changed.sort();
        assert_eq!(changed, vec!["age", "name"]);
        assert_eq!(node.attribute_was("age"), Value::Int(18));
    }

    #[test]
    fn test_write_same_typecast_value_is_not_a_change() {
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        node.write_attribute("age", "18").unwrap();
        assert!(!node.attribute_changed("age"));
        node.write_attribute("age", 19).unwrap();
        assert!(node.attribute_changed("age"));
    }

    #[test]
    fn test_save_properties_rolls_changes() {
        let mut node = ActiveNode::new(&person(), props! { "name" => "andreas" }).unwrap();
        node.save_properties();
        assert!(!node.is_changed());
        assert_eq!(
            node.previous_changes().get("name"),
            Some(&(Value::Null, Value::from("andreas")))
        );
        node.save_properties();
        assert!(node.previous_changes().is_empty());
    }

    #[test]
    fn test_restore_attributes() {
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        node.write_attribute("name", "kalle").unwrap();
        node.restore_attributes();
        assert_eq!(node["name"], Value::Null);
        assert!(!node.is_changed());
    }

    #[test]
    fn test_protected_skipped_unless_without_protection() {
        let class = person();
        let node = ActiveNode::new(&class, props! { "admin" => true }).unwrap();
        assert_eq!(node["admin"], Value::Null);

        let opts = AssignOptions { without_protection: true };
        let node = ActiveNode::new_with_options(&class, props! { "admin" => "yes" }, opts).unwrap();
        assert_eq!(node["admin"], Value::Bool(true));
    }

    #[test]
    fn test_assign_attributes_respects_protection() {
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        node.assign_attributes(props! { "admin" => true, "name" => "kalle" }).unwrap();
        assert_eq!(node["admin"], Value::Null);
        assert_eq!(node["name"], Value::from("kalle"));

        let opts = AssignOptions { without_protection: true };
        node.assign_attributes_with_options(props! { "admin" => true }, opts).unwrap();
        assert_eq!(node["admin"], Value::Bool(true));
    }

    #[test]
    fn test_assign_attributes_in_declaration_order() {
        // "full_name" sorts before "name" but its writer runs after the property
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        node.assign_attributes(props! { "name" => "Bob", "full_name" => "Ada Lovelace" }).unwrap();
        assert_eq!(node["name"], Value::from("Ada"));
    }

    #[test]
    fn test_assign_attributes_validates_before_writing() {
        let mut node = ActiveNode::new(&person(), PropertyMap::new()).unwrap();
        let err = node.assign_attributes(props! { "name" => "kalle", "bogus" => 1 }).unwrap_err();
        assert!(matches!(err, Error::UndefinedProperty(_)));
        assert_eq!(node["name"], Value::Null);
        assert!(!node.is_changed());
    }

    #[test]
    fn test_custom_writer() {
        let node = ActiveNode::new(&person(), props! { "full_name" => "Ada Lovelace" }).unwrap();
        assert_eq!(node["name"], Value::from("Ada"));
    }

    #[test]
    fn test_query_attribute() {
        let node = ActiveNode::new(&person(), props! { "name" => "x" }).unwrap();
        assert!(node.query_attribute("name"));
        assert!(node.query_attribute("age"));
        assert!(!node.query_attribute("created_at"));
        assert!(!node.query_attribute("missing"));
    }

    #[test]
    fn test_relationship_needs_saved_target() {
        let class = person();
        let target = ActiveNode::new(&class, PropertyMap::new()).unwrap();
        let mut node = ActiveNode::new(&class, PropertyMap::new()).unwrap();
        assert!(matches!(node.relate("employer", &target), Err(Error::NotPersisted)));
    }

    #[test]
    fn test_relationship_value_kept_pending() {
        let class = person();
        let target = Value::from(Node::new(NodeId(7)));
        let node = ActiveNode::new(&class, props! { "employer" => target }).unwrap();
        assert_eq!(node.pending_relationships().get("employer"), Some(&vec![NodeId(7)]));

        let err = ActiveNode::new(&class, props! { "employer" => "not a node" }).unwrap_err();
        assert!(matches!(err, Error::TypeError { .. }));
    }

    #[test]
    fn test_load_typecasts_and_is_clean() {
        let mixin = Arc::new(LabelMixin::new("m"));
        let class = NodeClass::builder("Thing")
            .property("count", PropertyOptions::typed(PropertyType::Integer))
            .include(mixin)
            .build();
        let stored = Node::new(NodeId(3)).with_property("count", "5").with_property("stray", 1);
        let node = ActiveNode::load(&class, stored);
        assert_eq!(node["count"], Value::Int(5));
        assert_eq!(node["stray"], Value::Null);
        assert!(node.is_persisted());
        assert!(!node.is_changed());
    }

    #[test]
    fn test_equality_by_id() {
        let class = person();
        let a = ActiveNode::load(&class, Node::new(NodeId(1)));
        let b = ActiveNode::load(&class, Node::new(NodeId(1)));
        let fresh = ActiveNode::new(&class, PropertyMap::new()).unwrap();
        assert_eq!(a, b);
        assert_ne!(fresh.clone(), fresh);
    }
}
