//! End-to-end tests for label-based creation and lookup.
//!
//! Each test exercises: class declaration -> registration -> create ->
//! all/find against a MemoryBackend-backed Session.

use std::sync::Arc;

use neo4j_ogm::{
    props, ActiveNode, Error, LabelMixin, MemoryBackend, Node, NodeClass, NodeId, PropertyMap,
    PropertyOptions, Query, Session, Value,
};

struct Fixture {
    session: Session<MemoryBackend>,
    test_class: Arc<NodeClass>,
    indexed: Arc<NodeClass>,
    some_label: Arc<LabelMixin>,
    some_label_class: Arc<NodeClass>,
    relation: Arc<NodeClass>,
}

async fn fixture() -> Fixture {
    let session = Session::open_memory();
    session.label("IndexedTestClass").drop_index("name").await.unwrap();

    let test_class = NodeClass::builder("TestClass").build();
    let indexed = NodeClass::builder("IndexedTestClass")
        .property("name", PropertyOptions::new())
        .index("name")
        .build();
    let some_label = Arc::new(LabelMixin::new("some_label"));
    let some_label_class = NodeClass::builder("SomeLabelClass")
        .include(some_label.clone())
        .build();
    let relation = NodeClass::builder("RelationTestClass")
        .has_one("test_class")
        .build();

    for class in [&test_class, &indexed, &some_label_class, &relation] {
        session.register(class).await.unwrap();
    }

    Fixture { session, test_class, indexed, some_label, some_label_class, relation }
}

// ============================================================================
// 1. create
// ============================================================================

#[tokio::test]
async fn test_create_sets_class_label() {
    let f = fixture().await;
    let p = f.session.create(&f.test_class, PropertyMap::new()).await.unwrap();
    assert_eq!(f.session.labels(&p).await.unwrap(), vec!["TestClass"]);
}

#[tokio::test]
async fn test_create_with_missing_target_stores_nothing() {
    let f = fixture().await;
    let dangling = Value::from(Node::new(NodeId(999)));

    let err = f
        .session
        .create(&f.relation, props! { "test_class" => dangling.clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(f.session.count(&*f.relation, Query::new()).await.unwrap(), 0);

    let mut node = ActiveNode::new(&f.relation, props! { "test_class" => dangling }).unwrap();
    assert!(f.session.save(&mut node).await.is_err());
    assert!(node.is_new_record());
    assert_eq!(node.pending_relationships().get("test_class"), Some(&vec![NodeId(999)]));
    assert_eq!(f.session.count(&*f.relation, Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_sets_mixin_label() {
    let f = fixture().await;
    let p = f.session.create(&f.some_label_class, PropertyMap::new()).await.unwrap();

    let mut labels = f.session.labels(&p).await.unwrap();
    labels.sort();
    assert_eq!(labels, vec!["SomeLabelClass", "some_label"]);
}

// ============================================================================
// 2. all
// ============================================================================

#[tokio::test]
async fn test_all_without_index() {
    let f = fixture().await;
    let p = f.session.create(&f.test_class, PropertyMap::new()).await.unwrap();

    let all = f.session.all(&*f.test_class, Query::new()).await.unwrap();
    assert!(all.contains(&p));
}

#[tokio::test]
async fn test_all_when_indexed_without_using_index() {
    let f = fixture().await;
    let andreas = f.session.create(&f.indexed, props! { "name" => "andreas" }).await.unwrap();

    let plan = f.session.explain(&*f.indexed, &Query::new()).await.unwrap();
    assert!(!plan.uses_index());
    assert!(f.session.all(&*f.indexed, Query::new()).await.unwrap().contains(&andreas));
}

#[tokio::test]
async fn test_all_skips_destroyed() {
    let f = fixture().await;
    let mut jimmy = f.session.create(&f.indexed, props! { "name" => "jimmy" }).await.unwrap();
    assert!(f.session.all(&*f.indexed, Query::new()).await.unwrap().contains(&jimmy));

    let gone = jimmy.clone();
    assert!(f.session.destroy(&mut jimmy).await.unwrap());
    assert!(jimmy.is_destroyed());
    assert!(!f.session.all(&*f.indexed, Query::new()).await.unwrap().contains(&gone));
}

// ============================================================================
// 3. find
// ============================================================================

#[tokio::test]
async fn test_find_rejects_unknown_query_key() {
    let f = fixture().await;
    let err = Query::try_from(props! { "unknown" => "test" }).unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    // the session never sees an invalid query
    assert_eq!(f.session.count(&*f.indexed, Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_find_using_index() {
    let f = fixture().await;
    f.session.destroy_all(&*f.indexed).await.unwrap();
    let kalle = f.session.create(&f.indexed, props! { "name" => "kalle" }).await.unwrap();

    let query = Query::try_from(props! { "conditions" => Value::from(vec![("name", "kalle")]) }).unwrap();
    let plan = f.session.explain(&*f.indexed, &query).await.unwrap();
    assert!(plan.uses_index());

    let found = f.session.find(&*f.indexed, query).await.unwrap();
    assert_eq!(found, Some(kalle));
}

#[tokio::test]
async fn test_find_skips_deleted() {
    let f = fixture().await;
    f.session.destroy_all(&*f.indexed).await.unwrap();
    let mut kalle2 = f.session.create(&f.indexed, props! { "name" => "kalle2" }).await.unwrap();
    let query = Query::new().condition("name", "kalle2");

    let found = f.session.find(&*f.indexed, query.clone()).await.unwrap();
    assert_eq!(found.as_ref(), Some(&kalle2));

    let gone = kalle2.clone();
    f.session.destroy(&mut kalle2).await.unwrap();
    assert!(!f.session.all(&*f.indexed, query).await.unwrap().contains(&gone));
}

#[tokio::test]
async fn test_find_by_relationship() {
    let f = fixture().await;
    let n1 = f.session.create(&f.test_class, PropertyMap::new()).await.unwrap();
    let n2 = f
        .session
        .create(&f.relation, props! { "test_class" => n1.as_value().unwrap() })
        .await
        .unwrap();

    let hit = f
        .session
        .find(&*f.relation, Query::new().condition("test_class", n1.as_value().unwrap()))
        .await
        .unwrap();
    assert_eq!(hit, Some(n2.clone()));

    let miss = f
        .session
        .find(&*f.relation, Query::new().condition("test_class", n2.as_value().unwrap()))
        .await
        .unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_find_through_mixin() {
    let f = fixture().await;
    let thing = f.session.create(&f.some_label_class, PropertyMap::new()).await.unwrap();

    let found = f.session.all(&*f.some_label, Query::new()).await.unwrap();
    assert!(found.contains(&thing));
    assert_eq!(found[0].class().name(), "SomeLabelClass");
}

#[tokio::test]
async fn test_indexed_mixin_lookup() {
    let f = fixture().await;
    let bar = Arc::new(LabelMixin::new("BarIndexedLabel").index("baaz"));
    let with_bar = NodeClass::builder("TestClassWithBar")
        .property("baaz", PropertyOptions::new())
        .include(bar.clone())
        .build();
    f.session.register(&with_bar).await.unwrap();
    assert_eq!(f.session.label("BarIndexedLabel").indexes().await.unwrap(), vec!["baaz"]);

    let hej = f.session.create(&with_bar, props! { "baaz" => "hej" }).await.unwrap();

    let plan = f.session.explain(&*bar, &Query::new().condition("baaz", "hej")).await.unwrap();
    assert!(plan.uses_index());
    assert!(f.session.all(&*bar, Query::new().condition("baaz", "hej")).await.unwrap().contains(&hej));
    assert!(f.session.all(&*with_bar, Query::new().condition("baaz", "hej")).await.unwrap().contains(&hej));
    assert!(!f.session.all(&*bar, Query::new().condition("baaz", "hej2")).await.unwrap().contains(&hej));
}

// ============================================================================
// 4. registry
// ============================================================================

#[tokio::test]
async fn test_unregistered_nodes_are_skipped() {
    let f = fixture().await;
    f.session.create(&f.test_class, PropertyMap::new()).await.unwrap();

    let saved = f.session.wrapped_classes().snapshot();
    f.session.wrapped_classes().clear();
    assert!(f.session.all(&*f.test_class, Query::new()).await.unwrap().is_empty());
    assert_eq!(f.session.count(&*f.test_class, Query::new()).await.unwrap(), 1);

    f.session.wrapped_classes().restore(saved);
    assert_eq!(f.session.all(&*f.test_class, Query::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_find_skips_unregistered_first_match() {
    let f = fixture().await;
    let other = NodeClass::builder("OtherLabelClass")
        .include(f.some_label.clone())
        .build();
    f.session.create(&other, PropertyMap::new()).await.unwrap();
    let wrapped = f.session.create(&f.some_label_class, PropertyMap::new()).await.unwrap();

    f.session.wrapped_classes().restore(vec![f.some_label_class.clone()]);
    assert_eq!(f.session.count(&*f.some_label, Query::new()).await.unwrap(), 2);

    let found = f.session.find(&*f.some_label, Query::new()).await.unwrap();
    assert_eq!(found, Some(wrapped));
}

#[tokio::test]
async fn test_find_by_id_checks_label() {
    let f = fixture().await;
    let p = f.session.create(&f.test_class, PropertyMap::new()).await.unwrap();
    let id = p.id().unwrap();

    assert_eq!(f.session.find_by_id(&f.test_class, id).await.unwrap(), Some(p));
    assert!(f.session.find_by_id(&f.indexed, id).await.unwrap().is_none());
}
