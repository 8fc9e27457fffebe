//! Declarative queries over a label and their resolution into a lookup plan.
//!
//! A query is a set of equality conditions plus optional ordering and limit.
//! Resolution decides, per target label, whether the backend can answer
//! with a property index lookup or has to scan every node with the label.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::model::{Direction, Node, NodeId, PropertyMap, Value};
use crate::{Error, Result};
use super::class::Labeled;

/// Keys accepted in hash-style query arguments.
const QUERY_KEYS: &[&str] = &["conditions", "order", "limit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Equality conditions, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<(String, Value)>,
    order: Option<(String, SortOrder)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`. A relationship name matches on the target node.
    pub fn condition(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.conditions.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.conditions.push((key, value)),
        }
        self
    }

    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order = Some((property.into(), SortOrder::Asc));
        self
    }

    pub fn order_by_desc(mut self, property: impl Into<String>) -> Self {
        self.order = Some((property.into(), SortOrder::Desc));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }
}

/// Hash-style arguments: `{conditions: {..}, order: "prop", limit: n}`.
impl TryFrom<PropertyMap> for Query {
    type Error = Error;

    fn try_from(args: PropertyMap) -> Result<Self> {
        let mut unknown: Vec<&String> = args.keys().filter(|k| !QUERY_KEYS.contains(&k.as_str())).collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(Error::InvalidQuery(format!(
                "unknown query keys: {}",
                unknown.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",")
            )));
        }

        let mut query = Query::new();
        for (key, value) in args {
            match (key.as_str(), value) {
                ("conditions", Value::Map(map)) => {
                    let mut conditions: Vec<(String, Value)> = map.into_iter().collect();
                    conditions.sort_by(|a, b| a.0.cmp(&b.0));
                    query.conditions = conditions;
                }
                ("order", Value::String(prop)) => query = query.order_by(prop),
                ("limit", Value::Int(n)) if n >= 0 => query = query.limit(n as usize),
                (key, other) => {
                    return Err(Error::InvalidQuery(format!(
                        "invalid value for '{key}': {}", other.type_name()
                    )));
                }
            }
        }
        Ok(query)
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Where candidate nodes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Every node carrying the label.
    LabelScan { label: String },
    /// Nodes whose indexed property equals `value`.
    IndexLookup { label: String, property: String, value: Value },
}

/// Nodes must be linked to every target through `rel_type`; no targets
/// means the node must have no such relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipFilter {
    pub name: String,
    pub rel_type: String,
    pub direction: Direction,
    pub targets: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub source: Source,
    pub property_filters: Vec<(String, Value)>,
    pub relationship_filters: Vec<RelationshipFilter>,
    pub order: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl QueryPlan {
    /// Resolve `query` against `target`, given which of its label's
    /// properties are indexed.
    pub fn resolve<T: Labeled + ?Sized>(target: &T, query: &Query, indexed: &HashSet<String>) -> Result<Self> {
        let label = target.mapped_label_name().to_string();
        let mut property_filters = Vec::new();
        let mut relationship_filters = Vec::new();

        for (key, value) in &query.conditions {
            if let Some(decl) = target.relationship(key) {
                let targets = relationship_targets(key, value)?;
                relationship_filters.push(RelationshipFilter {
                    name: decl.name.clone(),
                    rel_type: decl.rel_type.clone(),
                    direction: decl.direction,
                    targets,
                });
                continue;
            }
            // an uncastable value stays raw so it matches no stored value
            let value = match target.property_type(key).map(|ty| ty.typecast(value.clone())) {
                Some(cast) if !cast.is_null() || value.is_null() => cast,
                _ => value.clone(),
            };
            property_filters.push((key.clone(), value));
        }

        let lookup = property_filters
            .iter()
            .position(|(key, value)| value.is_scalar() && indexed.contains(key));
        let source = match lookup {
            Some(pos) => {
                let (property, value) = property_filters.remove(pos);
                Source::IndexLookup { label, property, value }
            }
            None => Source::LabelScan { label },
        };

        Ok(QueryPlan {
            source,
            property_filters,
            relationship_filters,
            order: query.order.clone(),
            limit: query.limit,
        })
    }

    pub fn uses_index(&self) -> bool {
        matches!(self.source, Source::IndexLookup { .. })
    }

    pub fn label(&self) -> &str {
        match &self.source {
            Source::LabelScan { label } | Source::IndexLookup { label, .. } => label.as_str(),
        }
    }

    /// Property filters hold; a `Null` condition means the property is unset.
    pub fn matches_properties(&self, node: &Node) -> bool {
        self.property_filters.iter().all(|(key, want)| match node.get(key) {
            Some(have) => have == want,
            None => want.is_null(),
        })
    }

    /// Apply ordering (nulls last) and limit.
    pub fn finish(&self, nodes: &mut Vec<Node>) {
        if let Some((prop, order)) = &self.order {
            nodes.sort_by(|a, b| {
                compare_nulls_last(
                    a.get(prop).unwrap_or(&Value::Null),
                    b.get(prop).unwrap_or(&Value::Null),
                    *order,
                )
            });
        }
        if let Some(limit) = self.limit {
            nodes.truncate(limit);
        }
    }
}

fn relationship_targets(key: &str, value: &Value) -> Result<Vec<NodeId>> {
    let invalid = || Error::InvalidQuery(format!("condition on relationship '{key}' needs a node, got {}", value.type_name()));
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Node(n) => Ok(vec![n.id]),
        Value::List(items) => items.iter().map(|v| v.as_node_id().ok_or_else(invalid)).collect(),
        _ => Err(invalid()),
    }
}

fn compare_nulls_last(a: &Value, b: &Value, order: SortOrder) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            if order == SortOrder::Desc { ord.reverse() } else { ord }
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::LabelScan { label } => write!(f, "LabelScan(:{label})")?,
            Source::IndexLookup { label, property, value } => {
                write!(f, "IndexLookup(:{label}({property}) = {value})")?
            }
        }
        for (key, value) in &self.property_filters {
            write!(f, " -> Filter({key} = {value})")?;
        }
        for rel in &self.relationship_filters {
            write!(f, " -> Expand({}, {} targets)", rel.rel_type, rel.targets.len())?;
        }
        if let Some((prop, order)) = &self.order {
            write!(f, " -> Sort({prop} {order:?})")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " -> Limit({limit})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_node::class::{LabelMixin, NodeClass};
    use crate::active_node::property::{PropertyOptions, PropertyType};
    use crate::props;

    fn indexed(props: &[&str]) -> HashSet<String> {
        props.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_unknown_query_key_rejected() {
        let err = Query::try_from(props! { "unknown" => "test" }).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_hash_args() {
        let conditions = Value::from(vec![("name", "kalle")]);
        let query = Query::try_from(props! { "conditions" => conditions, "limit" => 2, "order" => "name" }).unwrap();
        assert_eq!(query, Query::new().condition("name", "kalle").order_by("name").limit(2));
    }

    #[test]
    fn test_bad_arg_value_rejected() {
        assert!(Query::try_from(props! { "limit" => "ten" }).is_err());
        assert!(Query::try_from(props! { "conditions" => 1 }).is_err());
    }

    #[test]
    fn test_index_lookup_chosen_when_indexed() {
        let class = NodeClass::builder("IndexedTestClass").index("name").build();
        let query = Query::new().condition("name", "kalle");

        let plan = QueryPlan::resolve(&*class, &query, &indexed(&["name"])).unwrap();
        assert!(plan.uses_index());
        assert!(plan.property_filters.is_empty());

        let plan = QueryPlan::resolve(&*class, &query, &indexed(&[])).unwrap();
        assert!(!plan.uses_index());
        assert_eq!(plan.property_filters, vec![("name".to_string(), Value::from("kalle"))]);
    }

    #[test]
    fn test_conditions_typecast_by_declared_type() {
        let class = NodeClass::builder("Person")
            .property("age", PropertyOptions::typed(PropertyType::Integer))
            .build();
        let plan = QueryPlan::resolve(&*class, &Query::new().condition("age", "3"), &indexed(&[])).unwrap();
        assert_eq!(plan.property_filters, vec![("age".to_string(), Value::Int(3))]);
    }

    #[test]
    fn test_uncastable_condition_matches_nothing() {
        let class = NodeClass::builder("Person")
            .property("age", PropertyOptions::typed(PropertyType::Integer))
            .build();
        let plan = QueryPlan::resolve(&*class, &Query::new().condition("age", "abc"), &indexed(&[])).unwrap();
        assert_eq!(plan.property_filters, vec![("age".to_string(), Value::from("abc"))]);
        assert!(!plan.matches_properties(&Node::new(NodeId(1))));
        assert!(!plan.matches_properties(&Node::new(NodeId(2)).with_property("age", 3)));

        let unset = QueryPlan::resolve(&*class, &Query::new().condition("age", Value::Null), &indexed(&[])).unwrap();
        assert!(unset.matches_properties(&Node::new(NodeId(1))));
    }

    #[test]
    fn test_relationship_condition() {
        let class = NodeClass::builder("RelationTestClass").has_one("test_class").build();
        let target = Value::from(Node::new(NodeId(9)));
        let plan = QueryPlan::resolve(&*class, &Query::new().condition("test_class", target), &indexed(&[])).unwrap();
        assert_eq!(plan.relationship_filters.len(), 1);
        assert_eq!(plan.relationship_filters[0].rel_type, "#test_class");
        assert_eq!(plan.relationship_filters[0].targets, vec![NodeId(9)]);

        let bad = QueryPlan::resolve(&*class, &Query::new().condition("test_class", 1), &indexed(&[]));
        assert!(matches!(bad, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_mixin_conditions_are_raw() {
        let mixin = LabelMixin::new("some_label");
        let plan = QueryPlan::resolve(&mixin, &Query::new().condition("anything", "3"), &indexed(&[])).unwrap();
        assert_eq!(plan.label(), "some_label");
        assert_eq!(plan.property_filters, vec![("anything".to_string(), Value::from("3"))]);
    }

    #[test]
    fn test_finish_orders_nulls_last_and_limits() {
        let plan = QueryPlan::resolve(&LabelMixin::new("L"), &Query::new().order_by_desc("n").limit(2), &indexed(&[])).unwrap();
        let mut nodes = vec![
            Node::new(NodeId(1)),
            Node::new(NodeId(2)).with_property("n", 1),
            Node::new(NodeId(3)).with_property("n", 5),
        ];
        plan.finish(&mut nodes);
        let ids: Vec<u64> = nodes.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(plan.to_string(), "LabelScan(:L) -> Sort(n Desc) -> Limit(2)");
    }
}
