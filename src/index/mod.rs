//! Property index definitions.

use serde::{Deserialize, Serialize};

/// Type of property index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IndexType {
    /// Equality lookups on label + property.
    #[default]
    BTree,
    /// Like `BTree`, but a value may be held by at most one node per label.
    Unique,
}

/// A property index on `(label, property)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDef {
    pub label: String,
    pub property: String,
    pub index_type: IndexType,
}

impl IndexDef {
    pub fn new(label: impl Into<String>, property: impl Into<String>, index_type: IndexType) -> Self {
        Self { label: label.into(), property: property.into(), index_type }
    }
}
