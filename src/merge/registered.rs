//! Registered entities: components and tokens registered from host code.
//!
//! A registered entity is identified by its name, not its id. Registering
//! the same thing on two branches (or unregistering and registering it again)
//! yields two ids for one entity, so same-named registered entities are
//! merged instead of renamed. The kept entity is the one from the ancestor,
//! else the left-created one, else the right-created one, ties broken by id.
//!
//! Components are merged on placements, before identity swaps: instances of
//! the dropped copy are repointed to the kept one and then rebound by param
//! name like any swapped instance. Tokens are only referenced by name, so the
//! duplicate is simply removed after the merge.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::error::MergeError;
use crate::model::{Class, Graph, NodeId, Value};

use super::context::MergeContext;
use super::reconcile::Reconciliation;
use super::structure::{Placements, origin_rank};

const COMPONENTS: &str = "components";
const TOKENS: &str = "tokens";

/// Registered members of `ids` grouped by name, each group ordered by keep
/// priority.
fn registered_by_name(
    ctx: &MergeContext<'_>,
    dest: &Graph,
    ids: impl IntoIterator<Item = NodeId>,
) -> BTreeMap<String, Vec<NodeId>> {
    let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for id in ids {
        let Some(node) = dest.get(id).filter(|n| n.is_registered()) else {
            continue;
        };
        if let Some(name) = node.name() {
            groups.entry(name.to_owned()).or_default().push(id);
        }
    }
    for members in groups.values_mut() {
        members.sort_by_key(|id| (origin_rank(ctx.origin(*id)), *id));
    }
    groups
}

fn instances_of(ctx: &MergeContext<'_>, dest: &Graph, component: NodeId) -> Vec<NodeId> {
    dest.nodes()
        .filter(|n| {
            n.class == Class::TplComponent
                && !ctx.deleted.contains(&n.id)
                && n.get("component").as_ref_id() == Some(component)
        })
        .map(|n| n.id)
        .collect()
}

fn repoint(dest: &mut Graph, instances: &[NodeId], to: NodeId) {
    for instance in instances {
        if let Some(node) = dest.get_mut(*instance) {
            node.set("component", Value::Ref(to));
        }
    }
}

/// Merge same-named registered components into one.
///
/// Also repoints instances of a registered component one branch deleted to
/// a surviving registered component of the same name. Returns every
/// repointed instance; their args still need rebinding.
#[instrument(skip_all)]
pub fn merge_registered_components(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    placements: &mut Placements,
) -> BTreeSet<NodeId> {
    let root = dest.root();
    let groups = registered_by_name(ctx, dest, placements.members(root, COMPONENTS));
    let mut repointed = BTreeSet::new();

    for (name, members) in &groups {
        let Some((&kept, dropped)) = members.split_first() else {
            continue;
        };
        for &removed in dropped {
            let subtree = placements.subtree(removed);
            let mut instances = instances_of(ctx, dest, removed);
            instances.retain(|i| !subtree.contains(i));
            repoint(dest, &instances, kept);
            for id in subtree {
                placements.remove(id);
                dest.remove(id);
            }
            debug!(%kept, %removed, instances = instances.len(), "merged registered component");
            repointed.extend(instances.iter().copied());
            ctx.reconciliations.push(Reconciliation::RegisteredComponentMerged {
                name: name.clone(),
                kept,
                removed,
                instances,
            });
        }
    }

    // Re-registered: the old id was deleted, a new one carries the name.
    let deleted: Vec<(NodeId, String)> = ctx
        .deleted
        .iter()
        .filter_map(|id| {
            let node = ctx
                .ancestor
                .get(*id)
                .filter(|n| n.class == Class::Component && n.is_registered())?;
            Some((*id, node.name()?.to_owned()))
        })
        .collect();
    for (removed, name) in deleted {
        let Some(&kept) = groups.get(&name).and_then(|m| m.first()) else {
            continue;
        };
        let instances = instances_of(ctx, dest, removed);
        if instances.is_empty() {
            continue;
        }
        repoint(dest, &instances, kept);
        debug!(%kept, %removed, instances = instances.len(), "repointed re-registered component");
        repointed.extend(instances.iter().copied());
        ctx.reconciliations.push(Reconciliation::RegisteredComponentMerged {
            name,
            kept,
            removed,
            instances,
        });
    }
    repointed
}

/// Remove duplicate registered tokens from the merged document.
///
/// # Errors
/// Returns [`MergeError::MalformedGraph`] if a duplicate cannot be detached.
pub fn merge_registered_tokens(
    ctx: &MergeContext<'_>,
    dest: &mut Graph,
) -> Result<Vec<Reconciliation>, MergeError> {
    let tokens = dest
        .get(dest.root())
        .map(|r| r.get(TOKENS).ref_ids())
        .unwrap_or_default();
    let mut out = Vec::new();
    for (name, members) in registered_by_name(ctx, dest, tokens) {
        let Some((&kept, dropped)) = members.split_first() else {
            continue;
        };
        for &removed in dropped {
            dest.remove_subtree(removed)?;
            debug!(%kept, %removed, "merged registered token");
            out.push(Reconciliation::RegisteredTokenMerged {
                name: name.clone(),
                kept,
                removed,
            });
        }
    }
    Ok(out)
}
