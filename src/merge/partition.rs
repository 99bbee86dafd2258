//! GROUP step: attribute every change to its conflict group and pair up the
//! two branches' changes per leaf.
//!
//! A change's group is found by walking owners upward from the changed node
//! until a group-stopping point: an owning field that declares a group for
//! the child it holds, or a class that roots a group on its own. A walk that
//! reaches nothing falls back to the document root's `Site` group.
//!
//! Leaves touched by exactly one branch go to `unique` and are applied
//! directly. Leaves touched by both go to `shared` and need resolution.
//! Both lists are sorted by leaf for determinism.
//!
//! ```text
//! L: token.value, tag#7.children       R: tag#7.children, mixin.rules[color]
//!
//!   unique: token.value → (L), mixin.rules[color] → (R)
//!   shared: tag#7.children → (L, R)   group = tpl-tree(root of #7)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::{Graph, GroupKind, NodeId, OwnerIndex};

use super::types::{Change, ChangeSet, LeafKey};

// ---------------------------------------------------------------------------
// GroupRef
// ---------------------------------------------------------------------------

/// A conflict group: its kind plus the node it is rooted at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupRef {
    /// Group kind.
    pub kind: GroupKind,
    /// Group root node.
    pub root: NodeId,
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.root)
    }
}

/// Find the group `node` belongs to in `graph`.
#[must_use]
pub fn group_of(graph: &Graph, owners: &OwnerIndex, node: NodeId, max_depth: usize) -> GroupRef {
    let fallback = GroupRef {
        kind: GroupKind::Site,
        root: graph.root(),
    };
    let mut cur = node;
    for _ in 0..=max_depth {
        let owner = owners.owner(cur);
        if let Some(p) = owner
            && let Some(parent) = graph.get(p.parent)
            && let Some(kind) = parent.class.field(p.field).and_then(|s| s.group)
        {
            return GroupRef { kind, root: cur };
        }
        if let Some(kind) = graph.class_of(cur).and_then(|c| c.group()) {
            return GroupRef { kind, root: cur };
        }
        match owner {
            Some(p) => cur = p.parent,
            None => return fallback,
        }
    }
    fallback
}

// ---------------------------------------------------------------------------
// LeafEntry / PartitionResult
// ---------------------------------------------------------------------------

/// Both branches' view of one leaf.
#[derive(Clone, Debug)]
pub struct LeafEntry<'a> {
    /// The leaf.
    pub key: LeafKey,
    /// Left's change, if left touched it.
    pub left: Option<&'a Change>,
    /// Right's change, if right touched it.
    pub right: Option<&'a Change>,
    /// Group of the leaf's node as seen in the left branch (or right, if
    /// only right touched it).
    pub group: GroupRef,
}

impl LeafEntry<'_> {
    /// `true` if both branches touched this leaf.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

/// Changes partitioned by how many branches touched each leaf.
#[derive(Clone, Debug, Default)]
pub struct PartitionResult<'a> {
    /// Leaves touched by exactly one branch.
    pub unique: Vec<LeafEntry<'a>>,
    /// Leaves touched by both branches.
    pub shared: Vec<LeafEntry<'a>>,
}

impl<'a> PartitionResult<'a> {
    /// Total number of leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.unique.len() + self.shared.len()
    }

    /// `true` when neither branch changed any field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unique.is_empty() && self.shared.is_empty()
    }

    /// Shared leaves bundled by group, in group order.
    #[must_use]
    pub fn shared_by_group(&self) -> BTreeMap<GroupRef, Vec<&LeafEntry<'a>>> {
        let mut out: BTreeMap<GroupRef, Vec<&LeafEntry<'a>>> = BTreeMap::new();
        for entry in &self.shared {
            out.entry(entry.group).or_default().push(entry);
        }
        out
    }

    /// All leaves, merged back into leaf order.
    pub fn all(&self) -> impl Iterator<Item = &LeafEntry<'a>> {
        let mut all: Vec<&LeafEntry<'a>> = self.unique.iter().chain(&self.shared).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all.into_iter()
    }
}

/// Pair both branches' changes per leaf and attribute each leaf to a group.
#[must_use]
pub fn partition_changes<'a>(
    left: &'a ChangeSet,
    left_graph: &Graph,
    right: &'a ChangeSet,
    right_graph: &Graph,
    max_depth: usize,
) -> PartitionResult<'a> {
    let mut index: BTreeMap<LeafKey, (Option<&'a Change>, Option<&'a Change>)> = BTreeMap::new();
    for c in &left.changes {
        index.entry(c.leaf()).or_default().0 = Some(c);
    }
    for c in &right.changes {
        index.entry(c.leaf()).or_default().1 = Some(c);
    }

    let left_owners = left_graph.owner_index();
    let right_owners = right_graph.owner_index();

    let mut result = PartitionResult::default();
    for (key, (l, r)) in index {
        let group = if l.is_some() {
            group_of(left_graph, &left_owners, key.node, max_depth)
        } else {
            group_of(right_graph, &right_owners, key.node, max_depth)
        };
        let entry = LeafEntry {
            key,
            left: l,
            right: r,
            group,
        };
        if entry.is_shared() {
            result.shared.push(entry);
        } else {
            result.unique.push(entry);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::collect::collect_changes;
    use crate::model::{Class, Node, Side, Value};

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn base() -> Graph {
        let mut g = Graph::new_site(id(1));
        g.attach(
            id(1),
            "tokens",
            Node::new(id(2), Class::StyleToken).with("name", "Brand"),
        )
        .unwrap();
        g.attach(id(1), "components", Node::new(id(10), Class::Component))
            .unwrap();
        g.attach(id(10), "tpl_tree", Node::new(id(11), Class::TplTag))
            .unwrap();
        g.attach(id(11), "children", Node::new(id(12), Class::TplTag))
            .unwrap();
        g.attach(
            id(12),
            "vsettings",
            Node::new(id(13), Class::VariantSetting),
        )
        .unwrap();
        g.attach(
            id(1),
            "global_variant_groups",
            Node::new(id(20), Class::VariantGroup),
        )
        .unwrap();
        g
    }

    #[test]
    fn nested_tpl_nodes_group_at_tree_root() {
        let g = base();
        let owners = g.owner_index();
        assert_eq!(
            group_of(&g, &owners, id(13), 64),
            GroupRef {
                kind: GroupKind::TplTree,
                root: id(11)
            }
        );
    }

    #[test]
    fn class_groups_and_field_groups() {
        let g = base();
        let owners = g.owner_index();
        assert_eq!(group_of(&g, &owners, id(2), 64).kind, GroupKind::StyleToken);
        assert_eq!(group_of(&g, &owners, id(10), 64).kind, GroupKind::Component);
        assert_eq!(
            group_of(&g, &owners, id(20), 64).kind,
            GroupKind::GlobalVariantGroup
        );
        assert_eq!(group_of(&g, &owners, id(1), 64).kind, GroupKind::Site);
    }

    #[test]
    fn unowned_node_falls_back_to_site() {
        let mut g = base();
        g.insert(Node::new(id(99), Class::TplTag));
        let owners = g.owner_index();
        assert_eq!(
            group_of(&g, &owners, id(99), 64),
            GroupRef {
                kind: GroupKind::Site,
                root: id(1)
            }
        );
    }

    #[test]
    fn partition_splits_unique_and_shared() {
        let a = base();
        let mut l = a.clone();
        l.set_field(id(2), "value", "#fff").unwrap();
        l.set_field(id(12), "tag", "span").unwrap();
        let mut r = a.clone();
        r.set_field(id(12), "tag", "a").unwrap();
        r.set_field(id(10), "name", Value::from("Card")).unwrap();

        let lc = collect_changes(&a, &l, Side::Left).unwrap();
        let rc = collect_changes(&a, &r, Side::Right).unwrap();
        let parts = partition_changes(&lc, &l, &rc, &r, 64);

        assert_eq!(parts.unique.len(), 2);
        assert_eq!(parts.shared.len(), 1);
        assert_eq!(parts.shared[0].key.node, id(12));
        assert_eq!(parts.shared[0].group.kind, GroupKind::TplTree);
        let grouped = parts.shared_by_group();
        assert_eq!(grouped.len(), 1);
        assert_eq!(parts.all().count(), 3);
    }
}
