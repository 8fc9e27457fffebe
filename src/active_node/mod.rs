//! # Active nodes
//!
//! The mapping layer: node classes declared in Rust, instances with typed,
//! dirty-tracked attributes, and the label registry and query planner that
//! turn stored nodes back into instances.

pub mod property;
pub mod class;
pub mod node;
pub mod labels;
pub mod query;

pub use property::{PropertyDef, PropertyDefault, PropertyOptions, PropertyType};
pub use class::{Cardinality, LabelMixin, Labeled, NodeClass, NodeClassBuilder, RelationshipDecl, WriterFn};
pub use node::{ActiveNode, AssignOptions};
pub use labels::WrappedClasses;
pub use query::{Query, QueryPlan, RelationshipFilter, SortOrder, Source};
