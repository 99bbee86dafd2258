//! Virtual slot contents.
//!
//! An instance that does not override a slot carries a *virtual* arg whose
//! contents are deep copies of the slot's default contents. After the merge
//! those copies are re-derived, but only for slots whose defaults actually
//! changed on a branch (or that an identity swap marked), so unrelated virtual
//! content is left untouched.
//!
//! Components are processed dependency-first: a refresh inside one
//! component's slot defaults marks that slot changed for everything that uses
//! the component.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::error::MergeError;
use crate::model::{Class, Graph, Node, NodeId, OwnerIndex, Side, Value};

use super::context::MergeContext;

const DEFAULT_CONTENTS: &str = "default_contents";

/// Slots whose default contents were touched by either branch.
#[must_use]
pub fn changed_slots(ctx: &MergeContext<'_>) -> BTreeSet<NodeId> {
    let depth = ctx.config.limits.max_depth;
    let mut out = BTreeSet::new();
    for side in [Side::Left, Side::Right] {
        let changes = ctx.changes(side);
        let branch = ctx.branch(side);
        let owners = ctx.owners(side);
        for change in &changes.changes {
            if change.field == DEFAULT_CONTENTS && branch.class_of(change.node) == Some(Class::TplSlot) {
                out.insert(change.node);
            }
            enclosing_slots(owners, change.node, depth, &mut out);
        }
        for root in &changes.created_roots {
            enclosing_slots(owners, *root, depth, &mut out);
        }
        for root in &changes.removed_roots {
            enclosing_slots(ctx.ancestor_owners(), *root, depth, &mut out);
        }
    }
    out.retain(|id| !ctx.deleted.contains(id));
    out
}

fn enclosing_slots(owners: &OwnerIndex, node: NodeId, depth: usize, out: &mut BTreeSet<NodeId>) {
    for p in owners.ancestors(node, depth) {
        if p.field == DEFAULT_CONTENTS {
            out.insert(p.parent);
        }
    }
}

/// Re-derive the virtual args of every instance of a component owning one of
/// `slots`. Slots marked along the way are added to `slots`.
///
/// # Errors
/// Returns [`MergeError::MalformedGraph`] if a copy cannot be attached.
#[instrument(skip_all, fields(slots = slots.len()))]
pub fn refresh_virtual_args(
    dest: &mut Graph,
    slots: &mut BTreeSet<NodeId>,
    max_depth: usize,
) -> Result<(), MergeError> {
    if slots.is_empty() {
        return Ok(());
    }
    for component in dependency_order(dest) {
        let Some(tree) = dest.get(component).and_then(|c| c.get("tpl_tree").as_ref_id()) else {
            continue;
        };
        let instances: Vec<NodeId> = dest
            .subtree(tree)
            .into_iter()
            .filter(|id| dest.class_of(*id) == Some(Class::TplComponent))
            .collect();
        for instance in instances {
            if refresh_instance(dest, instance, slots)? {
                let owners = dest.owner_index();
                enclosing_slots(&owners, instance, max_depth, slots);
            }
        }
    }
    Ok(())
}

/// Components with the components they instantiate listed first.
fn dependency_order(dest: &Graph) -> Vec<NodeId> {
    let declared: Vec<NodeId> = dest
        .get(dest.root())
        .map(|r| r.get("components").ref_ids())
        .unwrap_or_default();
    let mut uses: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for &c in &declared {
        let Some(tree) = dest.get(c).and_then(|n| n.get("tpl_tree").as_ref_id()) else {
            continue;
        };
        let deps = dest
            .subtree(tree)
            .into_iter()
            .filter_map(|id| dest.get(id))
            .filter(|n| n.class == Class::TplComponent)
            .filter_map(|n| n.get("component").as_ref_id())
            .collect();
        uses.insert(c, deps);
    }

    let mut order = Vec::new();
    let mut visited = BTreeSet::new();
    for &c in &declared {
        visit(c, &uses, &mut visited, &mut order);
    }
    order
}

fn visit(
    c: NodeId,
    uses: &BTreeMap<NodeId, Vec<NodeId>>,
    visited: &mut BTreeSet<NodeId>,
    order: &mut Vec<NodeId>,
) {
    let mut stack = vec![(c, false)];
    while let Some((cur, expanded)) = stack.pop() {
        if expanded {
            order.push(cur);
            continue;
        }
        if !uses.contains_key(&cur) || !visited.insert(cur) {
            continue;
        }
        stack.push((cur, true));
        for dep in uses[&cur].iter().rev() {
            stack.push((*dep, false));
        }
    }
}

/// Refresh the virtual args of one instance. Returns `true` if any changed.
fn refresh_instance(
    dest: &mut Graph,
    instance: NodeId,
    slots: &BTreeSet<NodeId>,
) -> Result<bool, MergeError> {
    let Some(node) = dest.get(instance) else {
        return Ok(false);
    };
    let Some(component) = node.get("component").as_ref_id() else {
        return Ok(false);
    };
    let args = node.get("args").ref_ids();
    let Some(tree) = dest.get(component).and_then(|c| c.get("tpl_tree").as_ref_id()) else {
        return Ok(false);
    };
    let targets: Vec<(NodeId, NodeId)> = dest
        .subtree(tree)
        .into_iter()
        .filter(|id| slots.contains(id))
        .filter_map(|slot| Some((slot, dest.get(slot)?.get("param").as_ref_id()?)))
        .collect();

    let mut changed = false;
    for (slot, param) in targets {
        let existing = args
            .iter()
            .copied()
            .find(|a| dest.get(*a).and_then(|n| n.get("param").as_ref_id()) == Some(param));
        let arg = match existing {
            Some(a) if dest.get(a).and_then(|n| n.get("is_virtual").as_bool()) != Some(true) => {
                continue;
            }
            Some(a) => a,
            None => {
                let id = NodeId::derive("arg", &[instance, param]);
                dest.attach(
                    instance,
                    "args",
                    Node::new(id, Class::Arg)
                        .with("param", param)
                        .with("is_virtual", true),
                )?;
                id
            }
        };
        changed |= replace_contents(dest, arg, slot)?;
    }
    Ok(changed)
}

/// Replace the contents of `arg` with fresh copies of `slot`'s defaults.
fn replace_contents(dest: &mut Graph, arg: NodeId, slot: NodeId) -> Result<bool, MergeError> {
    let sources = dest
        .get(slot)
        .map(|s| s.get(DEFAULT_CONTENTS).ref_ids())
        .unwrap_or_default();

    let mut copies: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut originals = Vec::new();
    for src in &sources {
        for id in dest.subtree(*src) {
            copies.insert(id, NodeId::derive("copy", &[arg, id]));
            if let Some(n) = dest.get(id) {
                originals.push(n.clone());
            }
        }
    }

    let fresh: Vec<Node> = originals
        .iter()
        .map(|original| {
            let mut copy = Node::new(copies[&original.id], original.class);
            for (spec, value) in original.entries() {
                let mut value = value.clone();
                for (from, to) in &copies {
                    value.redirect(*from, *to);
                }
                copy.set(spec.name, value);
            }
            copy
        })
        .collect();

    let old = dest
        .get(arg)
        .map(|a| a.get("contents").ref_ids())
        .unwrap_or_default();
    let new: Vec<NodeId> = sources.iter().filter_map(|s| copies.get(s).copied()).collect();
    let old_ids: BTreeSet<NodeId> = old.iter().flat_map(|id| dest.subtree(*id)).collect();
    let new_ids: BTreeSet<NodeId> = fresh.iter().map(|n| n.id).collect();
    if old == new && old_ids == new_ids && fresh.iter().all(|n| dest.get(n.id) == Some(n)) {
        return Ok(false);
    }
    debug!(%arg, %slot, copies = fresh.len(), "refreshing virtual contents");

    for id in old {
        if dest.contains(id) {
            dest.remove_subtree(id)?;
        }
    }
    for copy in fresh {
        dest.insert(copy);
    }
    if let Some(node) = dest.get_mut(arg) {
        node.set("contents", Value::refs(new));
    }
    Ok(true)
}
