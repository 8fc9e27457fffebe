//! # neo4j-ogm — Object-Graph Mapping for property graphs
//!
//! Declare node classes with typed properties and relationships, then
//! create, find and update them through a [`Session`] backed by any
//! [`StorageBackend`].
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the mapping layer and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross the storage boundary
//! 3. **Typed at the edge**: every attribute write is typecast to its declared type
//! 4. **Label-driven lookup**: queries resolve to an index lookup or a label scan per label
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neo4j_ogm::{props, NodeClass, PropertyOptions, PropertyType, Query, Session};
//!
//! # async fn example() -> neo4j_ogm::Result<()> {
//! let session = Session::open_memory();
//!
//! let person = NodeClass::builder("Person")
//!     .property("name", PropertyOptions::typed(PropertyType::String))
//!     .index("name")
//!     .build();
//! session.register(&person).await?;
//!
//! let ada = session.create(&person, props! { "name" => "Ada" }).await?;
//! let found = session.find(&*person, Query::new().condition("name", "Ada")).await?;
//! assert_eq!(found, Some(ada));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod tx;
pub mod index;
pub mod active_node;
pub mod config;
pub mod session;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{StorageBackend, BackendConfig, MemoryBackend};
pub use index::{IndexDef, IndexType};
pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Mapping
// ============================================================================

pub use active_node::{
    ActiveNode, AssignOptions, Cardinality, LabelMixin, Labeled, NodeClass, NodeClassBuilder,
    PropertyDef, PropertyOptions, PropertyType, Query, QueryPlan, RelationshipDecl, SortOrder,
    Source, WrappedClasses,
};
pub use config::OgmConfig;
pub use session::{Label, Session};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Undefined properties: {}", .0.join(","))]
    UndefinedProperty(Vec<String>),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Node is not persisted")]
    NotPersisted,

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
