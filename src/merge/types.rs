//! Change-set types produced by the COLLECT step.
//!
//! A [`ChangeSet`] describes how one branch differs from the ancestor:
//! created and removed nodes (reported once per outermost subtree root) plus
//! per-field [`Change`] records for nodes present on both sides.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::{Class, NodeId, Side, Value};

// ---------------------------------------------------------------------------
// ChangeKind
// ---------------------------------------------------------------------------

/// The observed difference at one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// A scalar, code, or single-reference field changed value.
    Set {
        /// Ancestor value.
        old: Value,
        /// Branch value.
        new: Value,
    },
    /// A contiguous run of list elements was replaced at `index`.
    /// Pure inserts have empty `removed`; pure deletes have empty `inserted`.
    Splice {
        /// Position of the first affected element in the ancestor list.
        index: usize,
        /// Ancestor elements removed.
        removed: Vec<Value>,
        /// Branch elements inserted.
        inserted: Vec<Value>,
    },
    /// Elements were reordered in a way a single splice cannot express.
    Replace {
        /// Ancestor list.
        old: Vec<Value>,
        /// Branch list.
        new: Vec<Value>,
    },
    /// One map key was added, updated, or deleted.
    MapEntry {
        /// The map key.
        key: String,
        /// Ancestor value, `None` when added.
        old: Option<Value>,
        /// Branch value, `None` when deleted.
        new: Option<Value>,
    },
}

// ---------------------------------------------------------------------------
// Change / LeafKey
// ---------------------------------------------------------------------------

/// One atomic difference at one field of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Change {
    /// The changed node.
    pub node: NodeId,
    /// Its class.
    pub class: Class,
    /// The changed field.
    pub field: &'static str,
    /// What changed.
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl Change {
    /// The leaf this change touches.
    #[must_use]
    pub fn leaf(&self) -> LeafKey {
        let entry = match &self.kind {
            ChangeKind::MapEntry { key, .. } => Some(key.clone()),
            _ => None,
        };
        LeafKey {
            node: self.node,
            field: self.field,
            entry,
        }
    }
}

/// The finest unit of conflict detection: a field, or one key of a map field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LeafKey {
    /// Owning node.
    pub node: NodeId,
    /// Field name.
    pub field: &'static str,
    /// Map key, for map fields.
    pub entry: Option<String>,
}

impl fmt::Display for LeafKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(key) => write!(f, "{}/{}[{key}]", self.node, self.field),
            None => write!(f, "{}/{}", self.node, self.field),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// Everything one branch changed relative to the ancestor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Which branch this describes.
    pub side: Side,
    /// Outermost roots of newly created subtrees, in id order.
    pub created_roots: Vec<NodeId>,
    /// Outermost roots of removed subtrees, in id order.
    pub removed_roots: Vec<NodeId>,
    /// Every created node.
    pub created: BTreeSet<NodeId>,
    /// Every removed node.
    pub removed: BTreeSet<NodeId>,
    /// Field changes on surviving nodes, sorted by node then schema order.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// An empty change set for `side`.
    #[must_use]
    pub const fn empty(side: Side) -> Self {
        Self {
            side,
            created_roots: Vec::new(),
            removed_roots: Vec::new(),
            created: BTreeSet::new(),
            removed: BTreeSet::new(),
            changes: Vec::new(),
        }
    }

    /// `true` if the branch made no change at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty() && self.changes.is_empty()
    }

    /// Field changes recorded on `node`.
    pub fn changes_for(&self, node: NodeId) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.node == node)
    }

    /// `true` if the branch changed `field` on `node` (any map key counts).
    #[must_use]
    pub fn touched(&self, node: NodeId, field: &str) -> bool {
        self.changes_for(node).any(|c| c.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_key_display() {
        let node = NodeId::from_u128(5);
        let plain = LeafKey {
            node,
            field: "name",
            entry: None,
        };
        assert_eq!(plain.to_string(), format!("{node}/name"));
        let keyed = LeafKey {
            node,
            field: "rules",
            entry: Some("color".to_owned()),
        };
        assert_eq!(keyed.to_string(), format!("{node}/rules[color]"));
    }

    #[test]
    fn map_entry_changes_have_distinct_leaves() {
        let node = NodeId::from_u128(5);
        let change = |key: &str| Change {
            node,
            class: Class::Mixin,
            field: "rules",
            kind: ChangeKind::MapEntry {
                key: key.to_owned(),
                old: None,
                new: Some(Value::from("1")),
            },
        };
        assert_ne!(change("a").leaf(), change("b").leaf());
    }
}
