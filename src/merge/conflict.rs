//! Conflict records and the resolution map.
//!
//! Conflicts come in two shapes:
//!
//! - [`GenericConflict`]: one per conflict group, listing every leaf both
//!   branches set to different values. Each leaf is picked independently;
//!   non-overlapping leaves of the same group were already merged.
//! - [`SpecialConflict`]: one structural clash (a node moved to two parents,
//!   children reordered two ways, a tree re-rooted two ways).
//!
//! Every conflict carries a [`ConflictKey`] derived only from node identities
//! and field names, so the same `(ancestor, left, right)` triple always
//! produces the same keys. A [`Resolution`] maps keys to sides.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Class, GroupKind, Node, NodeId, Placement, Side, Value};

use super::types::LeafKey;

// ---------------------------------------------------------------------------
// ConflictKey
// ---------------------------------------------------------------------------

/// Stable identifier of a pickable conflict.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictKey(String);

impl ConflictKey {
    /// Wrap a raw key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key of a leaf-level conflict: `<node>/<field>` or `<node>/<field>[<key>]`.
    #[must_use]
    pub fn leaf(leaf: &LeafKey) -> Self {
        Self(leaf.to_string())
    }

    /// Key of a reparent conflict.
    #[must_use]
    pub fn reparent(node: NodeId) -> Self {
        Self(format!("move:{node}"))
    }

    /// Key of a children-order conflict.
    #[must_use]
    pub fn order(parent: NodeId, field: &str) -> Self {
        Self(format!("order:{parent}/{field}"))
    }

    /// Key of a re-root conflict.
    #[must_use]
    pub fn reroot(parent: NodeId, field: &str) -> Self {
        Self(format!("reroot:{parent}/{field}"))
    }

    /// The key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// GenericConflict
// ---------------------------------------------------------------------------

/// One overlapping leaf inside a generic conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeafUpdate {
    /// Pick key for this leaf.
    pub key: ConflictKey,
    /// Node holding the leaf.
    pub node: NodeId,
    /// Its class.
    pub class: Class,
    /// Field name.
    pub field: &'static str,
    /// Map key, for map fields.
    pub entry: Option<String>,
    /// Ancestor value (`None` when absent).
    pub ancestor: Option<Value>,
    /// Left's value (`None` when removed).
    pub left: Option<Value>,
    /// Right's value (`None` when removed).
    pub right: Option<Value>,
}

/// Both branches changed the same leaves of one group to different values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenericConflict {
    /// Kind of the group.
    pub group: GroupKind,
    /// Group root as identified in the left branch.
    pub left_root: NodeId,
    /// Group root as identified in the right branch.
    pub right_root: NodeId,
    /// Left's snapshot of the group root node, for display.
    pub left_snapshot: Option<Node>,
    /// Right's snapshot of the group root node, for display.
    pub right_snapshot: Option<Node>,
    /// Overlapping leaf updates, sorted by key.
    pub details: Vec<LeafUpdate>,
}

impl GenericConflict {
    /// Pick keys of every leaf in this conflict.
    pub fn keys(&self) -> impl Iterator<Item = &ConflictKey> {
        self.details.iter().map(|d| &d.key)
    }
}

// ---------------------------------------------------------------------------
// SpecialConflict
// ---------------------------------------------------------------------------

/// The structural operation that clashed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StructuralOp {
    /// The same node was moved to two different parents.
    Reparent {
        /// The moved node.
        node: NodeId,
        /// Its placement in the ancestor (`None` if created on both sides).
        ancestor: Option<Placement>,
        /// Left's destination.
        left: Placement,
        /// Right's destination.
        right: Placement,
    },
    /// The shared children of one list were reordered differently.
    ChildrenOrder {
        /// Owner of the list.
        parent: NodeId,
        /// List field.
        field: &'static str,
        /// Left's order of the shared children.
        left: Vec<NodeId>,
        /// Right's order of the shared children.
        right: Vec<NodeId>,
    },
    /// A single-child slot (a component's tree root) was given two different
    /// nodes.
    Reroot {
        /// Owner of the slot.
        parent: NodeId,
        /// Slot field.
        field: &'static str,
        /// Ancestor occupant.
        ancestor: Option<NodeId>,
        /// Left's occupant.
        left: Option<NodeId>,
        /// Right's occupant.
        right: Option<NodeId>,
    },
}

impl StructuralOp {
    /// Short operation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Reparent { .. } => "reparent",
            Self::ChildrenOrder { .. } => "children_order",
            Self::Reroot { .. } => "reroot",
        }
    }

    /// The pick key for this operation.
    #[must_use]
    pub fn key(&self) -> ConflictKey {
        match self {
            Self::Reparent { node, .. } => ConflictKey::reparent(*node),
            Self::ChildrenOrder { parent, field, .. } => ConflictKey::order(*parent, field),
            Self::Reroot { parent, field, .. } => ConflictKey::reroot(*parent, field),
        }
    }

    /// Entities the given side's version of the operation involves.
    #[must_use]
    pub fn involved(&self, side: Side) -> Vec<NodeId> {
        let pick = |l: &Placement, r: &Placement| match side {
            Side::Left => l.parent,
            Side::Right => r.parent,
        };
        match self {
            Self::Reparent {
                node, left, right, ..
            } => vec![*node, pick(left, right)],
            Self::ChildrenOrder {
                parent,
                left,
                right,
                ..
            } => {
                let mut out = vec![*parent];
                out.extend(match side {
                    Side::Left => left,
                    Side::Right => right,
                });
                out
            }
            Self::Reroot {
                parent,
                left,
                right,
                ..
            } => {
                let mut out = vec![*parent];
                out.extend(match side {
                    Side::Left => *left,
                    Side::Right => *right,
                });
                out
            }
        }
    }
}

/// A clash on a structural field shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpecialConflict {
    /// Pick key.
    pub key: ConflictKey,
    /// Group the clash is attributed to.
    pub group: GroupKind,
    /// The clashing operation.
    pub op: StructuralOp,
    /// Entities involved on the left.
    pub left_entities: Vec<NodeId>,
    /// Entities involved on the right.
    pub right_entities: Vec<NodeId>,
}

impl SpecialConflict {
    /// Build a special conflict from its operation.
    #[must_use]
    pub fn new(group: GroupKind, op: StructuralOp) -> Self {
        Self {
            key: op.key(),
            group,
            left_entities: op.involved(Side::Left),
            right_entities: op.involved(Side::Right),
            op,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingConflicts
// ---------------------------------------------------------------------------

/// Everything a human must decide before the merge can complete.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PendingConflicts {
    /// Generic conflicts, one per group, in group order.
    pub generic: Vec<GenericConflict>,
    /// Special conflicts, in key order.
    pub special: Vec<SpecialConflict>,
}

impl PendingConflicts {
    /// `true` if there is nothing to resolve.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generic.is_empty() && self.special.is_empty()
    }

    /// Total number of pickable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Every pickable key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ConflictKey> {
        let mut keys: Vec<ConflictKey> = self
            .generic
            .iter()
            .flat_map(GenericConflict::keys)
            .chain(self.special.iter().map(|s| &s.key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Caller-chosen sides per conflict key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resolution {
    picks: BTreeMap<ConflictKey, Side>,
}

impl Resolution {
    /// An empty resolution map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick `side` for every conflict in `pending`.
    #[must_use]
    pub fn pick_all(pending: &PendingConflicts, side: Side) -> Self {
        Self {
            picks: pending.keys().into_iter().map(|k| (k, side)).collect(),
        }
    }

    /// Record a pick (builder style).
    #[must_use]
    pub fn with(mut self, key: ConflictKey, side: Side) -> Self {
        self.picks.insert(key, side);
        self
    }

    /// Record a pick.
    pub fn pick(&mut self, key: ConflictKey, side: Side) {
        self.picks.insert(key, side);
    }

    /// The picked side for `key`.
    #[must_use]
    pub fn get(&self, key: &ConflictKey) -> Option<Side> {
        self.picks.get(key).copied()
    }

    /// Picked keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &ConflictKey> {
        self.picks.keys()
    }

    /// Number of picks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.picks.len()
    }

    /// `true` if no picks were made.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }
}
