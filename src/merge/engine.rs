//! Merge driver: runs the pipeline phases in order and produces the outcome.
//!
//! ```text
//! Collecting → Grouping → Resolving ─┬→ NeedsResolution   (conflicts, no picks)
//!                                    └→ Reconciling → Merged
//! ```
//!
//! A resolution map never resumes a previous attempt. The caller re-invokes
//! [`Merger::merge`] with the map and the whole pipeline runs from scratch,
//! so the same `(ancestor, left, right, picks)` always yields the same graph.

use std::fmt;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::model::{Graph, Side};

use super::cascade::apply_deletions;
use super::collect::{collect_changes, effective_deletions};
use super::conflict::{PendingConflicts, Resolution};
use super::context::MergeContext;
use super::deps::unify_dependencies;
use super::names::prefix_branch_names;
use super::partition::partition_changes;
use super::reconcile::{Reconciliation, reconcile};
use super::registered::merge_registered_components;
use super::resolve::{adopt_created, resolve_leaves};
use super::slots::{changed_slots, refresh_virtual_args};
use super::structure::{break_cycles, compute_placements, fold_equivalents, rebuild_owned_fields};
use super::swap::rebind_swapped_instances;
use super::validate::validate;

// ---------------------------------------------------------------------------
// MergePhase
// ---------------------------------------------------------------------------

/// Phases of one merge invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    /// Diffing each branch against the ancestor.
    Collecting,
    /// Attributing changes to conflict groups.
    Grouping,
    /// Applying changes and detecting conflicts.
    Resolving,
    /// Conflicts found and no picks supplied.
    NeedsResolution,
    /// Repairing invariants on the merged document.
    Reconciling,
    /// Done.
    Merged,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collecting => "collecting",
            Self::Grouping => "grouping",
            Self::Resolving => "resolving",
            Self::NeedsResolution => "needs-resolution",
            Self::Reconciling => "reconciling",
            Self::Merged => "merged",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// A finished merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergedDocument {
    /// The merged graph.
    pub graph: Graph,
    /// Every auto-reconciliation action, in the order applied.
    pub reconciliations: Vec<Reconciliation>,
}

/// Result of one merge invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The merge completed.
    Merged(MergedDocument),
    /// Conflicts need a pick; re-run with a [`Resolution`].
    NeedsResolution(PendingConflicts),
}

impl MergeOutcome {
    /// The merged document, if the merge completed.
    #[must_use]
    pub const fn merged(&self) -> Option<&MergedDocument> {
        match self {
            Self::Merged(doc) => Some(doc),
            Self::NeedsResolution(_) => None,
        }
    }

    /// The pending conflicts, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingConflicts> {
        match self {
            Self::Merged(_) => None,
            Self::NeedsResolution(p) => Some(p),
        }
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// The three-way merge engine.
#[derive(Clone, Debug, Default)]
pub struct Merger {
    config: MergeConfig,
}

impl Merger {
    /// An engine with the given configuration.
    #[must_use]
    pub const fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `left` and `right` against `ancestor`, seeding the destination
    /// from the ancestor.
    ///
    /// # Errors
    /// See [`Merger::merge_into`].
    pub fn merge(
        &self,
        ancestor: &Graph,
        left: &Graph,
        right: &Graph,
        resolution: Option<&Resolution>,
    ) -> Result<MergeOutcome, MergeError> {
        self.merge_into(ancestor, left, right, ancestor.clone(), resolution)
    }

    /// Merge into an explicit destination seed, which must be a structural
    /// copy of the ancestor.
    ///
    /// # Errors
    /// - [`MergeError::SeedMismatch`] if the seed differs from the ancestor.
    /// - [`MergeError::MalformedGraph`] if an input violates the schema.
    /// - [`MergeError::NotDerived`] if a branch does not derive from the ancestor.
    /// - [`MergeError::MissingPick`] / [`MergeError::UnknownPicks`] for a bad resolution map.
    /// - [`MergeError::InvariantViolated`] if the merged document is invalid.
    #[instrument(skip_all, fields(nodes = ancestor.len(), picks = resolution.map_or(0, Resolution::len)))]
    pub fn merge_into(
        &self,
        ancestor: &Graph,
        left: &Graph,
        right: &Graph,
        seed: Graph,
        resolution: Option<&Resolution>,
    ) -> Result<MergeOutcome, MergeError> {
        let mut phase = MergePhase::Collecting;
        let result = self.run(ancestor, left, right, seed, resolution, &mut phase);
        if let Err(e) = &result {
            warn!(%phase, error = %e, "merge failed");
        }
        result
    }

    fn run(
        &self,
        ancestor: &Graph,
        left: &Graph,
        right: &Graph,
        seed: Graph,
        resolution: Option<&Resolution>,
        phase: &mut MergePhase,
    ) -> Result<MergeOutcome, MergeError> {
        let mut a = ancestor.clone();
        let mut l = left.clone();
        let mut r = right.clone();
        let mut dest = seed;
        for g in [&mut a, &mut l, &mut r, &mut dest] {
            g.normalize();
        }
        if dest != a {
            return Err(MergeError::SeedMismatch);
        }
        for g in [&a, &l, &r] {
            g.check_schema()?;
        }

        // -- collect ---------------------------------------------------------
        let mut records = unify_dependencies(&a, &mut l, &mut r);
        let deleted = effective_deletions(&a, &l, &r);
        records.extend(prefix_branch_names(&a, &l, &mut r, &deleted, &self.config.reconcile));
        let left_changes = collect_changes(&a, &l, Side::Left)?;
        let right_changes = collect_changes(&a, &r, Side::Right)?;
        info!(
            left = left_changes.changes.len(),
            right = right_changes.changes.len(),
            deleted = deleted.len(),
            "collected changes"
        );

        // -- group -----------------------------------------------------------
        *phase = MergePhase::Grouping;
        let depth = self.config.limits.max_depth;
        let partition = partition_changes(&left_changes, &l, &right_changes, &r, depth);
        info!(
            unique = partition.unique.len(),
            shared = partition.shared.len(),
            "grouped changes"
        );

        // -- resolve ---------------------------------------------------------
        *phase = MergePhase::Resolving;
        let mut ctx = MergeContext::new(
            &self.config,
            &a,
            &l,
            &r,
            &left_changes,
            &right_changes,
            deleted,
            resolution,
        );
        dest.extend_imports(&l);
        dest.extend_imports(&r);

        adopt_created(&mut ctx, &mut dest)?;
        resolve_leaves(&mut ctx, &mut dest, &partition)?;
        let mut placements = compute_placements(&mut ctx, &dest)?;
        break_cycles(&mut ctx, &dest, &mut placements);
        let repointed = merge_registered_components(&mut ctx, &mut dest, &mut placements);
        let mut slots = changed_slots(&ctx);
        slots.extend(rebind_swapped_instances(&ctx, &mut dest, &mut placements, &repointed));
        fold_equivalents(&mut ctx, &mut dest, &mut placements)?;
        rebuild_owned_fields(&mut ctx, &mut dest, &placements)?;
        let cascaded = apply_deletions(&ctx, &mut dest)?;
        ctx.check_unused_picks()?;

        if ctx.has_conflicts() {
            *phase = MergePhase::NeedsResolution;
            let pending = ctx.take_pending();
            info!(
                generic = pending.generic.len(),
                special = pending.special.len(),
                "merge needs resolution"
            );
            return Ok(MergeOutcome::NeedsResolution(pending));
        }

        // -- reconcile -------------------------------------------------------
        *phase = MergePhase::Reconciling;
        refresh_virtual_args(&mut dest, &mut slots, depth)?;
        records.append(&mut ctx.reconciliations);
        records.extend(cascaded.into_iter().map(Reconciliation::from));
        records.extend(reconcile(&ctx, &mut dest)?);
        validate(&dest)?;

        *phase = MergePhase::Merged;
        info!(
            nodes = dest.len(),
            reconciliations = records.len(),
            "merge complete"
        );
        Ok(MergeOutcome::Merged(MergedDocument {
            graph: dest,
            reconciliations: records,
        }))
    }
}

/// Merge with the default configuration.
///
/// # Errors
/// See [`Merger::merge_into`].
pub fn merge(
    ancestor: &Graph,
    left: &Graph,
    right: &Graph,
    resolution: Option<&Resolution>,
) -> Result<MergeOutcome, MergeError> {
    Merger::default().merge(ancestor, left, right, resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Class, Node, NodeId};

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn base() -> Graph {
        let mut g = Graph::new_site(id(1));
        g.attach(
            id(1),
            "tokens",
            Node::new(id(2), Class::StyleToken)
                .with("name", "Brand")
                .with("value", "#000"),
        )
        .unwrap();
        g
    }

    #[test]
    fn seed_must_match_ancestor() {
        let a = base();
        let mut seed = a.clone();
        seed.set_field(id(2), "value", "#fff").unwrap();
        let err = Merger::default()
            .merge_into(&a, &a, &a, seed, None)
            .unwrap_err();
        assert_eq!(err, MergeError::SeedMismatch);
    }

    #[test]
    fn foreign_root_is_not_derived() {
        let a = base();
        let other = Graph::new_site(id(9));
        let err = merge(&a, &other, &a, None).unwrap_err();
        assert!(matches!(err, MergeError::NotDerived { .. }));
    }

    #[test]
    fn class_change_is_not_derived() {
        let a = base();
        let mut l = Graph::new_site(id(1));
        l.attach(id(1), "mixins", Node::new(id(2), Class::Mixin)).unwrap();
        let err = merge(&a, &l, &a, None).unwrap_err();
        assert!(matches!(err, MergeError::NotDerived { node, .. } if node == id(2)));
    }

    #[test]
    fn phase_names() {
        assert_eq!(MergePhase::NeedsResolution.to_string(), "needs-resolution");
        assert_eq!(MergePhase::Merged.to_string(), "merged");
    }

    #[test]
    fn outcome_accessors() {
        let a = base();
        let out = merge(&a, &a, &a, None).unwrap();
        assert!(out.merged().is_some());
        assert!(out.pending().is_none());
    }
}
