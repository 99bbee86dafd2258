//! Per-invocation merge context.
//!
//! Everything the resolver steps share is held here and passed explicitly:
//! the read-only inputs, their owner indexes, the effective deletion set, the
//! caller's resolution map, and the conflicts and reconciliations collected
//! so far. The destination graph is passed alongside it, never stored in it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::model::{Graph, GroupKind, NodeId, OwnerIndex, Side};

use super::conflict::{
    ConflictKey, GenericConflict, LeafUpdate, PendingConflicts, Resolution, SpecialConflict,
    StructuralOp,
};
use super::partition::{GroupRef, group_of};
use super::reconcile::Reconciliation;
use super::types::ChangeSet;

/// Where a surviving node comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    /// Present in the ancestor.
    Ancestor,
    /// Created by the left branch.
    Left,
    /// Created by both branches under the same identity.
    Both,
    /// Created by the right branch.
    Right,
}

impl Origin {
    /// The branch a created node came from (`Left` for `Both`).
    #[must_use]
    pub const fn creator(self) -> Option<Side> {
        match self {
            Self::Ancestor => None,
            Self::Left | Self::Both => Some(Side::Left),
            Self::Right => Some(Side::Right),
        }
    }
}

/// Shared state of one merge invocation.
pub struct MergeContext<'a> {
    /// Engine configuration.
    pub config: &'a MergeConfig,
    /// Common ancestor.
    pub ancestor: &'a Graph,
    /// Left branch (after the name pre-pass).
    pub left: &'a Graph,
    /// Right branch (after the name pre-pass).
    pub right: &'a Graph,
    /// `ChangeSet(ancestor → left)`.
    pub left_changes: &'a ChangeSet,
    /// `ChangeSet(ancestor → right)`.
    pub right_changes: &'a ChangeSet,
    /// Nodes deleted by the effective merge.
    pub deleted: BTreeSet<NodeId>,
    /// Folded node → node it was folded into.
    pub aliases: BTreeMap<NodeId, NodeId>,
    /// Repairs made while resolving (cycle breaks).
    pub reconciliations: Vec<Reconciliation>,
    ancestor_owners: OwnerIndex,
    left_owners: OwnerIndex,
    right_owners: OwnerIndex,
    resolution: Option<&'a Resolution>,
    used_picks: BTreeSet<ConflictKey>,
    generic: BTreeMap<GroupRef, GenericConflict>,
    special: BTreeMap<ConflictKey, SpecialConflict>,
}

impl<'a> MergeContext<'a> {
    /// Build a context over the three inputs.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a MergeConfig,
        ancestor: &'a Graph,
        left: &'a Graph,
        right: &'a Graph,
        left_changes: &'a ChangeSet,
        right_changes: &'a ChangeSet,
        deleted: BTreeSet<NodeId>,
        resolution: Option<&'a Resolution>,
    ) -> Self {
        Self {
            config,
            ancestor,
            left,
            right,
            left_changes,
            right_changes,
            deleted,
            aliases: BTreeMap::new(),
            reconciliations: Vec::new(),
            ancestor_owners: ancestor.owner_index(),
            left_owners: left.owner_index(),
            right_owners: right.owner_index(),
            resolution,
            used_picks: BTreeSet::new(),
            generic: BTreeMap::new(),
            special: BTreeMap::new(),
        }
    }

    // -- lookups -------------------------------------------------------------

    /// The branch graph for `side`.
    #[must_use]
    pub const fn branch(&self, side: Side) -> &'a Graph {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// The change set for `side`.
    #[must_use]
    pub const fn changes(&self, side: Side) -> &'a ChangeSet {
        match side {
            Side::Left => self.left_changes,
            Side::Right => self.right_changes,
        }
    }

    /// Owner index of the ancestor.
    #[must_use]
    pub const fn ancestor_owners(&self) -> &OwnerIndex {
        &self.ancestor_owners
    }

    /// Owner index of a branch.
    #[must_use]
    pub const fn owners(&self, side: Side) -> &OwnerIndex {
        match side {
            Side::Left => &self.left_owners,
            Side::Right => &self.right_owners,
        }
    }

    /// Where `id` comes from, or `None` if no input knows it.
    #[must_use]
    pub fn origin(&self, id: NodeId) -> Option<Origin> {
        let l = self.left_changes.created.contains(&id);
        let r = self.right_changes.created.contains(&id);
        match (l, r) {
            (true, true) => Some(Origin::Both),
            (true, false) => Some(Origin::Left),
            (false, true) => Some(Origin::Right),
            (false, false) => self.ancestor.contains(id).then_some(Origin::Ancestor),
        }
    }

    /// Follow fold aliases to the surviving node.
    #[must_use]
    pub fn resolve_alias(&self, mut id: NodeId) -> NodeId {
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&id) {
                Some(next) => id = *next,
                None => break,
            }
        }
        id
    }

    /// Conflict group of `id`, preferring the left branch's structure.
    #[must_use]
    pub fn group_for(&self, id: NodeId) -> GroupRef {
        let depth = self.config.limits.max_depth;
        if self.left.contains(id) {
            group_of(self.left, &self.left_owners, id, depth)
        } else if self.right.contains(id) {
            group_of(self.right, &self.right_owners, id, depth)
        } else {
            group_of(self.ancestor, &self.ancestor_owners, id, depth)
        }
    }

    // -- conflicts -----------------------------------------------------------

    /// Look up the caller's pick for `key`.
    ///
    /// Returns `Ok(None)` when no resolution map was supplied; the caller
    /// then records the conflict and continues provisionally.
    ///
    /// # Errors
    /// Returns [`MergeError::MissingPick`] when a map was supplied without
    /// an entry for `key`.
    pub fn decide(&mut self, key: &ConflictKey) -> Result<Option<Side>, MergeError> {
        let Some(resolution) = self.resolution else {
            return Ok(None);
        };
        match resolution.get(key) {
            Some(side) => {
                debug!(%key, %side, "applying pick");
                self.used_picks.insert(key.clone());
                Ok(Some(side))
            }
            None => Err(MergeError::MissingPick { key: key.clone() }),
        }
    }

    /// Root of the group holding `node` as seen by `side`, falling back to
    /// `group`'s root when that branch no longer has the node.
    fn side_root(&self, side: Side, node: NodeId, group: GroupRef) -> NodeId {
        let graph = match side {
            Side::Left => self.left,
            Side::Right => self.right,
        };
        if graph.contains(node) {
            group_of(graph, self.owners(side), node, self.config.limits.max_depth).root
        } else {
            group.root
        }
    }

    /// Record one overlapping leaf under its group's generic conflict.
    pub fn record_generic(&mut self, group: GroupRef, detail: LeafUpdate) {
        let left_root = self.side_root(Side::Left, detail.node, group);
        let right_root = self.side_root(Side::Right, detail.node, group);
        let left = self.left;
        let right = self.right;
        let conflict = self
            .generic
            .entry(group)
            .or_insert_with(|| GenericConflict {
                group: group.kind,
                left_root,
                right_root,
                left_snapshot: left.get(left_root).cloned(),
                right_snapshot: right.get(right_root).cloned(),
                details: Vec::new(),
            });
        if conflict.details.iter().any(|d| d.key == detail.key) {
            return;
        }
        debug!(key = %detail.key, %group, "generic conflict");
        conflict.details.push(detail);
        conflict.details.sort_by(|a, b| a.key.cmp(&b.key));
    }

    /// Record a structural clash.
    pub fn record_special(&mut self, group: GroupKind, op: StructuralOp) {
        let conflict = SpecialConflict::new(group, op);
        debug!(key = %conflict.key, op = conflict.op.name(), "special conflict");
        self.special.entry(conflict.key.clone()).or_insert(conflict);
    }

    /// `true` once any conflict was recorded.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.generic.is_empty() || !self.special.is_empty()
    }

    /// Check picks that matched no conflict.
    ///
    /// # Errors
    /// Returns [`MergeError::UnknownPicks`] when strict checking is enabled.
    pub fn check_unused_picks(&self) -> Result<(), MergeError> {
        let Some(resolution) = self.resolution else {
            return Ok(());
        };
        let unused: Vec<_> = resolution
            .keys()
            .filter(|k| !self.used_picks.contains(*k))
            .cloned()
            .collect();
        if unused.is_empty() {
            return Ok(());
        }
        if self.config.resolve.strict_picks {
            return Err(MergeError::UnknownPicks { keys: unused });
        }
        warn!(count = unused.len(), "ignoring picks that match no conflict");
        Ok(())
    }

    /// Hand over the recorded conflicts.
    #[must_use]
    pub fn take_pending(&mut self) -> PendingConflicts {
        PendingConflicts {
            generic: std::mem::take(&mut self.generic).into_values().collect(),
            special: std::mem::take(&mut self.special).into_values().collect(),
        }
    }
}
