//! Document model: identities, values, the closed class schema, and the
//! arena graph the merge engine reads and writes.

pub mod code_refs;
pub mod graph;
pub mod schema;
pub mod types;
pub mod value;

pub use graph::{Graph, GraphError, Node, OwnerIndex, Placement};
pub use schema::{Class, FieldMerge, FieldShape, FieldSpec, GroupKind, ListOrder, MergeKey, OnDelete};
pub use types::{IdError, NodeId, PackageId, Side};
pub use value::Value;
