//! Wrapped-class registry: maps stored labels back to node classes so raw
//! nodes coming out of the backend can be returned as typed instances.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::Node;
use super::class::NodeClass;
use super::node::ActiveNode;

#[derive(Default)]
pub struct WrappedClasses {
    classes: RwLock<Vec<Arc<NodeClass>>>,
    /// mapped label → class; rebuilt lazily after any registry change
    by_label: RwLock<Option<HashMap<String, Arc<NodeClass>>>>,
}

impl WrappedClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `class`, replacing a class registered under the same name.
    pub fn register(&self, class: Arc<NodeClass>) {
        let mut classes = self.classes.write();
        classes.retain(|c| c.name() != class.name());
        classes.push(class);
        *self.by_label.write() = None;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().iter().any(|c| c.name() == name)
    }

    pub fn classes(&self) -> Vec<Arc<NodeClass>> {
        self.classes.read().clone()
    }

    pub fn clear(&self) {
        let mut classes = self.classes.write();
        classes.clear();
        *self.by_label.write() = None;
    }

    /// Current registrations, for a later [`restore`](Self::restore).
    pub fn snapshot(&self) -> Vec<Arc<NodeClass>> {
        self.classes()
    }

    pub fn restore(&self, saved: Vec<Arc<NodeClass>>) {
        let mut classes = self.classes.write();
        *classes = saved;
        *self.by_label.write() = None;
    }

    /// The class mapped to the first of `labels` that has one.
    ///
    /// Lock order is `classes` then `by_label`; the cache is rebuilt and
    /// stored under the `classes` read lock.
    pub fn class_for_labels(&self, labels: &[String]) -> Option<Arc<NodeClass>> {
        if let Some(map) = self.by_label.read().as_ref() {
            return labels.iter().find_map(|l| map.get(l).cloned());
        }

        let classes = self.classes.read();
        let mut cache = self.by_label.write();
        let map = cache.get_or_insert_with(|| {
            classes
                .iter()
                .map(|c| (c.name().to_string(), Arc::clone(c)))
                .collect()
        });
        labels.iter().find_map(|l| map.get(l).cloned())
    }

    /// Wrap a raw node into an instance of its mapped class.
    pub fn wrap(&self, node: Node) -> Option<ActiveNode> {
        let class = self.class_for_labels(&node.labels)?;
        Some(ActiveNode::load(&class, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_node::class::LabelMixin;
    use crate::model::NodeId;

    #[test]
    fn test_mixin_label_maps_to_class() {
        let registry = WrappedClasses::new();
        let mixin = Arc::new(LabelMixin::new("some_label"));
        registry.register(NodeClass::builder("SomeLabelClass").include(mixin).build());

        let node = Node::new(NodeId(1)).with_labels(["some_label", "SomeLabelClass"]);
        let wrapped = registry.wrap(node).unwrap();
        assert_eq!(wrapped.class().name(), "SomeLabelClass");
    }

    #[test]
    fn test_cache_invalidated_on_register() {
        let registry = WrappedClasses::new();
        let labels = vec!["TestClass".to_string()];
        assert!(registry.class_for_labels(&labels).is_none());

        registry.register(NodeClass::builder("TestClass").build());
        assert!(registry.class_for_labels(&labels).is_some());
    }

    #[test]
    fn test_snapshot_restore() {
        let registry = WrappedClasses::new();
        registry.register(NodeClass::builder("A").build());
        let saved = registry.snapshot();

        registry.clear();
        assert!(!registry.contains("A"));
        registry.restore(saved);
        assert!(registry.contains("A"));
    }

    #[test]
    fn test_concurrent_register_and_wrap() {
        let registry = WrappedClasses::new();
        let names: Vec<String> = (0..32).map(|i| format!("Class{i}")).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for name in &names {
                    registry.register(NodeClass::builder(name.as_str()).build());
                }
            });
            s.spawn(|| {
                for name in names.iter().cycle().take(2_000) {
                    registry.class_for_labels(std::slice::from_ref(name));
                }
            });
        });

        for name in &names {
            assert!(registry.class_for_labels(std::slice::from_ref(name)).is_some(), "{name} not wrapped");
        }
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = WrappedClasses::new();
        registry.register(NodeClass::builder("A").build());
        registry.register(NodeClass::builder("A").index("name").build());
        assert_eq!(registry.classes().len(), 1);
        assert!(registry.classes()[0].has_property("name"));
    }
}
