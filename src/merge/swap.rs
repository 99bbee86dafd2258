//! Identity swap: an instance whose component reference now points at a
//! different definition keeps its argument bindings by parameter *name*.
//!
//! Runs on placements, before keyed-list folding, so that two args landing on
//! the same parameter after rebinding are folded like any other duplicates.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::model::{Class, Graph, Node, NodeId, Placement, Value};

use super::context::MergeContext;
use super::structure::Placements;

const ARGS: &str = "args";
const PARAMS: &str = "params";

/// Rebind the args of every swapped instance, plus the `repointed` ones
/// whose definition was merged away.
///
/// Returns the `TplSlot`s of the new definitions that received fresh virtual
/// args; their contents are refreshed later.
#[instrument(skip_all)]
pub fn rebind_swapped_instances(
    ctx: &MergeContext<'_>,
    dest: &mut Graph,
    placements: &mut Placements,
    repointed: &BTreeSet<NodeId>,
) -> BTreeSet<NodeId> {
    let mut marked = BTreeSet::new();
    let instances: Vec<(NodeId, NodeId)> = dest
        .nodes()
        .filter(|n| n.class == Class::TplComponent && !ctx.deleted.contains(&n.id))
        .filter_map(|n| {
            let after = n.get("component").as_ref_id()?;
            let swapped = ctx
                .ancestor
                .get(n.id)
                .and_then(|a| a.get("component").as_ref_id())
                .is_some_and(|before| before != after);
            (swapped || repointed.contains(&n.id)).then_some((n.id, after))
        })
        .collect();

    for (instance, component) in instances {
        if !dest.contains(component) {
            continue;
        }
        let params: BTreeMap<String, NodeId> = placements
            .members(component, PARAMS)
            .into_iter()
            .filter_map(|q| Some((param_name(ctx, dest, q)?, q)))
            .collect();
        let param_ids: BTreeSet<NodeId> = params.values().copied().collect();
        debug!(%instance, %component, params = params.len(), "rebinding swapped instance");

        let mut bound = BTreeSet::new();
        for arg in placements.members(instance, ARGS) {
            let Some(old) = dest.get(arg).and_then(|a| a.get("param").as_ref_id()) else {
                continue;
            };
            if param_ids.contains(&old) {
                bound.insert(old);
                continue;
            }
            let target = param_name(ctx, dest, old).and_then(|name| params.get(&name).copied());
            match target {
                Some(q) => {
                    let Some(node) = dest.get_mut(arg) else { continue };
                    node.set("param", Value::Ref(q));
                    if node.get("is_virtual").as_bool() == Some(true) {
                        marked.extend(slots_of(dest, q));
                    }
                    bound.insert(q);
                }
                None => {
                    debug!(%arg, "dropping arg with no matching param");
                    for id in placements.subtree(arg) {
                        placements.remove(id);
                        dest.remove(id);
                    }
                }
            }
        }

        for q in param_ids.difference(&bound) {
            let is_slot = dest
                .get(*q)
                .is_some_and(|p| p.get("kind").as_str() == Some("slot"));
            if !is_slot {
                continue;
            }
            let arg = NodeId::derive("arg", &[instance, *q]);
            if !dest.contains(arg) {
                dest.insert(
                    Node::new(arg, Class::Arg)
                        .with("param", *q)
                        .with("is_virtual", true),
                );
            }
            placements.set(
                arg,
                Placement {
                    parent: instance,
                    field: ARGS,
                },
            );
            marked.extend(slots_of(dest, *q));
        }
    }
    marked
}

fn slots_of(dest: &Graph, param: NodeId) -> Vec<NodeId> {
    dest.nodes()
        .filter(|n| n.class == Class::TplSlot && n.get("param").as_ref_id() == Some(param))
        .map(|n| n.id)
        .collect()
}

/// Name of a param, looked up in the destination first, then the inputs.
fn param_name(ctx: &MergeContext<'_>, dest: &Graph, param: NodeId) -> Option<String> {
    [dest, ctx.ancestor, ctx.left, ctx.right]
        .into_iter()
        .find_map(|g| g.get(param).and_then(Node::name).map(str::to_owned))
}
