//! Auto-reconciliation: repair invariants that only break once both
//! branches' changes coexist.
//!
//! Runs once on the fully merged destination, in a fixed order:
//!
//! 1. orphan sweep (nodes no longer reachable from the root);
//! 2. dangling weak references, per their on-delete policy;
//! 3. same-named registered tokens, merged into one;
//! 4. duplicate names per scope (registered entities keep their names, then
//!    ancestor entities, then left-created, then right-created, then
//!    declaration order);
//! 5. duplicate page paths, in component declaration order.
//!
//! Every action yields a [`Reconciliation`] record. Nothing is silent.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, instrument};

use crate::error::MergeError;
use crate::model::{Class, Graph, Node, NodeId, OnDelete, PackageId, Placement, Side};

use super::cascade::{RefRepair, RepairReason, repair_references};
use super::context::MergeContext;
use super::names::{collect_scopes, rename_node, unique_name};
use super::registered::merge_registered_tokens;
use super::structure::origin_rank;

/// One auto-reconciliation action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconciliation {
    /// A name collided within a scope and was suffixed.
    DuplicateName {
        /// The renamed node.
        node: NodeId,
        /// Node owning the scope.
        scope_owner: NodeId,
        /// Scope label (owned list field, or `elements`).
        scope: String,
        /// Name before.
        original: String,
        /// Name after.
        renamed: String,
    },
    /// Two pages claimed the same path.
    DuplicatePagePath {
        /// The component whose path changed.
        component: NodeId,
        /// Path before.
        original: String,
        /// Path after.
        renamed: String,
    },
    /// A weak reference did not resolve and was repaired.
    DanglingReference {
        /// The referencing node.
        node: NodeId,
        /// The weak field.
        field: &'static str,
        /// The missing target.
        target: NodeId,
        /// `clear` or `remove_referrer`.
        action: OnDelete,
        /// Why the target did not resolve.
        reason: RepairReason,
    },
    /// A subtree no longer reachable from the root was removed.
    OrphanRemoved {
        /// Root of the orphaned subtree.
        node: NodeId,
        /// Its class.
        class: Class,
    },
    /// An ownership cycle was broken by moving one node.
    CycleBroken {
        /// The moved node.
        node: NodeId,
        /// Where it went, or `None` if it was detached.
        restored: Option<Placement>,
    },
    /// A branch pinned an older version of a package and was upgraded to the
    /// newest pin.
    DependencyUpgraded {
        /// The upgraded branch.
        side: Side,
        /// The dropped pin.
        from: PackageId,
        /// The winning pin.
        to: PackageId,
        /// Weak references moved to the new version's imports.
        retargeted: usize,
    },
    /// Two registered components shared a name and were merged.
    RegisteredComponentMerged {
        /// Registered name.
        name: String,
        /// The surviving component.
        kept: NodeId,
        /// The dropped component.
        removed: NodeId,
        /// Instances repointed from `removed` to `kept`.
        instances: Vec<NodeId>,
    },
    /// Two registered tokens shared a name; the duplicate was removed.
    RegisteredTokenMerged {
        /// Registered name.
        name: String,
        /// The surviving token.
        kept: NodeId,
        /// The dropped token.
        removed: NodeId,
    },
}

impl From<RefRepair> for Reconciliation {
    fn from(r: RefRepair) -> Self {
        Self::DanglingReference {
            node: r.node,
            field: r.field,
            target: r.target,
            action: r.action,
            reason: r.reason,
        }
    }
}

/// Run every reconciliation step over `dest`.
///
/// # Errors
/// Returns [`MergeError::MalformedGraph`] if a repair cannot be applied.
#[instrument(skip_all)]
pub fn reconcile(
    ctx: &MergeContext<'_>,
    dest: &mut Graph,
) -> Result<Vec<Reconciliation>, MergeError> {
    let mut out = sweep_orphans(dest);
    out.extend(repair_references(dest)?.into_iter().map(Reconciliation::from));
    out.extend(merge_registered_tokens(ctx, dest)?);
    out.extend(dedupe_names(ctx, dest));
    out.extend(dedupe_page_paths(ctx, dest));
    if !out.is_empty() {
        info!(count = out.len(), "auto-reconciled merged document");
    }
    Ok(out)
}

/// Remove every node unreachable from the root. One record per orphaned
/// subtree root.
fn sweep_orphans(dest: &mut Graph) -> Vec<Reconciliation> {
    let reachable = dest.reachable();
    let orphans: BTreeSet<NodeId> = dest.ids().difference(&reachable).copied().collect();
    if orphans.is_empty() {
        return Vec::new();
    }
    let owners = dest.owner_index();
    let records = orphans
        .iter()
        .filter(|id| owners.owner(**id).is_none_or(|p| !orphans.contains(&p.parent)))
        .filter_map(|id| {
            Some(Reconciliation::OrphanRemoved {
                node: *id,
                class: dest.class_of(*id)?,
            })
        })
        .collect();
    for id in &orphans {
        dest.remove(*id);
    }
    records
}

fn dedupe_names(ctx: &MergeContext<'_>, dest: &mut Graph) -> Vec<Reconciliation> {
    let cfg = &ctx.config.reconcile;
    let mut out = Vec::new();
    for scope in collect_scopes(dest) {
        let named: Vec<(usize, NodeId, String)> = scope
            .named(dest)
            .enumerate()
            .map(|(pos, (id, name))| (pos, id, name.to_owned()))
            .collect();
        let mut by_name: BTreeMap<&str, Vec<(bool, u8, usize, NodeId)>> = BTreeMap::new();
        for (pos, id, name) in &named {
            let unregistered = !dest.get(*id).is_some_and(Node::is_registered);
            by_name.entry(name.as_str()).or_default().push((
                unregistered,
                origin_rank(ctx.origin(*id)),
                *pos,
                *id,
            ));
        }
        let mut taken: BTreeSet<String> = named.iter().map(|(_, _, n)| n.clone()).collect();
        let collisions: Vec<(String, Vec<NodeId>)> = by_name
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, mut ids)| {
                ids.sort_unstable();
                (name.to_owned(), ids.into_iter().map(|(_, _, _, id)| id).collect())
            })
            .collect();

        for (original, group) in collisions {
            for &node in &group[1..] {
                let renamed = unique_name(&taken, &original, cfg);
                taken.insert(renamed.clone());
                let rewrite = rewrite_filter(ctx, node, &group);
                rename_node(dest, node, &renamed, cfg, &rewrite);
                out.push(Reconciliation::DuplicateName {
                    node,
                    scope_owner: scope.owner,
                    scope: scope.label.to_owned(),
                    original: original.clone(),
                    renamed,
                });
            }
        }
    }
    out
}

/// Sides that gave `node` its current name: the branch that created it, or
/// the branches that renamed it.
fn naming_sides(ctx: &MergeContext<'_>, node: NodeId) -> Vec<Side> {
    if let Some(side) = ctx.origin(node).and_then(super::context::Origin::creator) {
        return vec![side];
    }
    [Side::Left, Side::Right]
        .into_iter()
        .filter(|side| ctx.changes(*side).touched(node, "name"))
        .collect()
}

fn touched_by(ctx: &MergeContext<'_>, side: Side, id: NodeId) -> bool {
    let changes = ctx.changes(side);
    changes.created.contains(&id) || changes.changes.iter().any(|c| c.node == id)
}

/// Nodes whose references to the colliding name mean `node`.
///
/// If a branch named `node`, only nodes that branch touched follow the
/// rename. If `node` kept its ancestor name, every node follows except those
/// touched by a branch that gave the name to another member of `group`.
fn rewrite_filter<'c>(
    ctx: &'c MergeContext<'_>,
    node: NodeId,
    group: &[NodeId],
) -> impl Fn(NodeId) -> bool + 'c {
    let own = naming_sides(ctx, node);
    let others: Vec<Side> = if own.is_empty() {
        let mut sides: Vec<Side> = group
            .iter()
            .filter(|g| **g != node)
            .flat_map(|g| naming_sides(ctx, *g))
            .collect();
        sides.sort_unstable();
        sides.dedup();
        sides
    } else {
        Vec::new()
    };
    move |id| {
        if own.is_empty() {
            !others.iter().any(|side| touched_by(ctx, *side, id))
        } else {
            own.iter().any(|side| touched_by(ctx, *side, id))
        }
    }
}

fn dedupe_page_paths(ctx: &MergeContext<'_>, dest: &mut Graph) -> Vec<Reconciliation> {
    let cfg = &ctx.config.reconcile;
    let components = dest
        .get(dest.root())
        .map(|r| r.get("components").ref_ids())
        .unwrap_or_default();
    let paths: Vec<(NodeId, String)> = components
        .iter()
        .filter_map(|c| Some((*c, dest.get(*c)?.get("page_path").as_str()?.to_owned())))
        .collect();
    let mut taken: BTreeSet<String> = paths.iter().map(|(_, p)| p.clone()).collect();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for (component, path) in paths {
        if seen.insert(path.clone()) {
            continue;
        }
        let mut n = cfg.first_suffix;
        let renamed = loop {
            let candidate = cfg.suffixed_path(&path, n);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n = n.saturating_add(1);
        };
        taken.insert(renamed.clone());
        seen.insert(renamed.clone());
        if let Some(node) = dest.get_mut(component) {
            node.set("page_path", renamed.as_str().into());
        }
        out.push(Reconciliation::DuplicatePagePath {
            component,
            original: path,
            renamed,
        });
    }
    out
}
