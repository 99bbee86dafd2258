//! RESOLVE step for non-structural leaves.
//!
//! Applies every scalar, code, weak-reference, map-entry, and non-owning list
//! leaf to the destination graph:
//!
//! - leaves of deleted nodes are skipped (deletion dominates, no conflict);
//! - a leaf changed by one branch takes that branch's value;
//! - a leaf changed identically by both takes the shared value once;
//! - unordered lists union additions and drop removals; ordered lists merge
//!   through the common-member order rule;
//! - harmless fields take the configured side;
//! - anything else is a generic conflict on that leaf, settled by a pick or
//!   recorded for the caller.
//!
//! Owned fields are left alone here. They are rebuilt from final placements
//! by [`structure`](super::structure).

use tracing::{debug, instrument};

use crate::error::MergeError;
use crate::model::{FieldMerge, FieldShape, FieldSpec, Graph, ListOrder, Node, NodeId, Side, Value};

use super::conflict::{ConflictKey, LeafUpdate};
use super::context::MergeContext;
use super::ordering::{OrderOutcome, merge_ordered, merge_unordered};
use super::partition::{LeafEntry, PartitionResult};
use super::types::{Change, ChangeKind, LeafKey};

// ---------------------------------------------------------------------------
// Adoption
// ---------------------------------------------------------------------------

/// Copy every node created by a branch into the destination.
///
/// A node created by both branches under the same identity is two-way merged
/// into a single node.
///
/// # Errors
/// Returns an error if both branches created the same id with different
/// classes, or if a pick is missing for a field clash between the two copies.
#[instrument(skip_all, fields(left = ctx.left_changes.created.len(), right = ctx.right_changes.created.len()))]
pub fn adopt_created(ctx: &mut MergeContext<'_>, dest: &mut Graph) -> Result<(), MergeError> {
    for id in &ctx.left_changes.created {
        if let Some(node) = ctx.left.get(*id) {
            dest.insert(node.clone());
        }
    }
    for id in &ctx.right_changes.created {
        let Some(node) = ctx.right.get(*id) else {
            continue;
        };
        match dest.get(*id) {
            Some(existing) if existing.class != node.class => {
                return Err(MergeError::NotDerived {
                    node: *id,
                    detail: format!(
                        "created as {} on the left and {} on the right",
                        existing.class, node.class
                    ),
                });
            }
            Some(_) => fold_fields(ctx, dest, *id, node, Side::Left)?,
            None => {
                dest.insert(node.clone());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// Apply every non-owning leaf from the partition to the destination.
///
/// # Errors
/// Returns [`MergeError::MissingPick`] when a resolution map lacks a pick for
/// a leaf conflict.
#[instrument(skip_all, fields(unique = partition.unique.len(), shared = partition.shared.len()))]
pub fn resolve_leaves(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    partition: &PartitionResult<'_>,
) -> Result<(), MergeError> {
    for entry in partition.all() {
        let node = entry.key.node;
        if ctx.deleted.contains(&node) {
            debug!(leaf = %entry.key, "leaf of deleted node discarded");
            continue;
        }
        let Some(spec) = dest.class_of(node).and_then(|c| c.field(entry.key.field)) else {
            continue;
        };
        if spec.shape.is_owned() {
            continue;
        }
        match (entry.left, entry.right) {
            (Some(change), None) => apply_change(dest, change, ctx.left),
            (None, Some(change)) => apply_change(dest, change, ctx.right),
            (Some(_), Some(_)) => resolve_shared(ctx, dest, entry, spec)?,
            (None, None) => {}
        }
    }
    Ok(())
}

fn apply_change(dest: &mut Graph, change: &Change, branch: &Graph) {
    match &change.kind {
        ChangeKind::MapEntry { key, new, .. } => {
            set_map_entry(dest, change.node, change.field, key, new.clone());
        }
        _ => {
            let Some(value) = branch.get(change.node).map(|n| n.get(change.field).clone()) else {
                return;
            };
            if let Some(node) = dest.get_mut(change.node) {
                node.set(change.field, value);
            }
        }
    }
}

fn resolve_shared(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    entry: &LeafEntry<'_>,
    spec: &'static FieldSpec,
) -> Result<(), MergeError> {
    let node = entry.key.node;
    let read = |g: &Graph| -> Option<Value> {
        let v = g.get(node)?.get(spec.name);
        match &entry.key.entry {
            Some(k) => v.as_map().and_then(|m| m.get(k)).cloned(),
            None => Some(v.clone()),
        }
    };
    let anc = read(ctx.ancestor);
    let lv = read(ctx.left);
    let rv = read(ctx.right);

    if lv == rv {
        write_leaf(dest, &entry.key, lv);
        return Ok(());
    }

    if entry.key.entry.is_none()
        && let Some(order) = spec.shape.order()
    {
        let a = anc.clone().unwrap_or_default();
        let l = lv.clone().unwrap_or_default();
        let r = rv.clone().unwrap_or_default();
        let merged = match order {
            ListOrder::Unordered => merge_unordered(a.as_list(), l.as_list(), r.as_list()),
            ListOrder::Ordered => match merge_ordered(a.as_list(), l.as_list(), r.as_list(), None) {
                OrderOutcome::Merged(v) => v,
                OrderOutcome::Conflict { .. } => {
                    let side = match leaf_conflict(ctx, entry, anc, lv, rv)? {
                        Some(side) => side,
                        None => return Ok(()),
                    };
                    match merge_ordered(a.as_list(), l.as_list(), r.as_list(), Some(side)) {
                        OrderOutcome::Merged(v) => v,
                        OrderOutcome::Conflict { .. } => return Ok(()),
                    }
                }
            },
        };
        write_leaf(dest, &entry.key, Some(Value::List(merged)));
        return Ok(());
    }

    if spec.merge == FieldMerge::Harmless {
        let side = ctx.config.resolve.harmless_side;
        debug!(leaf = %entry.key, %side, "harmless field takes configured side");
        write_leaf(dest, &entry.key, pick_value(side, lv, rv));
        return Ok(());
    }

    if let Some(side) = leaf_conflict(ctx, entry, anc, lv.clone(), rv.clone())? {
        write_leaf(dest, &entry.key, pick_value(side, lv, rv));
    }
    Ok(())
}

/// Settle a leaf conflict by pick, or record it. Returns the picked side.
fn leaf_conflict(
    ctx: &mut MergeContext<'_>,
    entry: &LeafEntry<'_>,
    ancestor: Option<Value>,
    left: Option<Value>,
    right: Option<Value>,
) -> Result<Option<Side>, MergeError> {
    let key = ConflictKey::leaf(&entry.key);
    if let Some(side) = ctx.decide(&key)? {
        return Ok(Some(side));
    }
    let class = ctx
        .ancestor
        .class_of(entry.key.node)
        .or_else(|| ctx.left.class_of(entry.key.node))
        .unwrap_or(crate::model::Class::Site);
    ctx.record_generic(
        entry.group,
        LeafUpdate {
            key,
            node: entry.key.node,
            class,
            field: entry.key.field,
            entry: entry.key.entry.clone(),
            ancestor,
            left,
            right,
        },
    );
    Ok(None)
}

fn pick_value(side: Side, left: Option<Value>, right: Option<Value>) -> Option<Value> {
    match side {
        Side::Left => left,
        Side::Right => right,
    }
}

/// Write a leaf value. `None` removes a map entry, or nulls a plain field.
fn write_leaf(dest: &mut Graph, leaf: &LeafKey, value: Option<Value>) {
    match &leaf.entry {
        Some(key) => set_map_entry(dest, leaf.node, leaf.field, key, value),
        None => {
            if let Some(node) = dest.get_mut(leaf.node) {
                node.set(leaf.field, value.unwrap_or_default());
            }
        }
    }
}

fn set_map_entry(dest: &mut Graph, node: NodeId, field: &str, key: &str, value: Option<Value>) {
    let Some(n) = dest.get_mut(node) else { return };
    let mut map = n.get(field).as_map().cloned().unwrap_or_default();
    match value {
        Some(v) => {
            map.insert(key.to_owned(), v);
        }
        None => {
            map.remove(key);
        }
    }
    n.set(field, Value::Map(map));
}

// ---------------------------------------------------------------------------
// Two-way folding
// ---------------------------------------------------------------------------

/// Merge the non-owning fields of `from` into the destination node `into`.
///
/// Used when two entries turn out to be the same logical node: same identity
/// created on both branches, or equal merge keys in a keyed list. There is no
/// ancestor, so a side that left a field at its default yields to the other.
/// Both sides setting different values is a generic conflict keyed on `into`.
/// `into_side` names the branch `into`'s current values are attributed to.
///
/// # Errors
/// Returns [`MergeError::MissingPick`] when a resolution map lacks a pick.
pub fn fold_fields(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    into: NodeId,
    from: &Node,
    into_side: Side,
) -> Result<(), MergeError> {
    let Some(class) = dest.class_of(into) else {
        return Ok(());
    };
    let group = ctx.group_for(into);
    for spec in class.fields() {
        if spec.shape.is_owned() {
            continue;
        }
        let Some(current) = dest.get(into).map(|n| n.get(spec.name).clone()) else {
            return Ok(());
        };
        let incoming = from.get(spec.name).clone();
        if current == incoming {
            continue;
        }
        let (lv, rv) = match into_side {
            Side::Left => (current.clone(), incoming.clone()),
            Side::Right => (incoming.clone(), current.clone()),
        };
        let merged = match spec.shape {
            FieldShape::Map => {
                let mut map = current.as_map().cloned().unwrap_or_default();
                for (k, v) in incoming.as_map().into_iter().flatten() {
                    match map.get(k) {
                        None => {
                            map.insert(k.clone(), v.clone());
                        }
                        Some(existing) if existing == v => {}
                        Some(existing) => {
                            let leaf = LeafKey {
                                node: into,
                                field: spec.name,
                                entry: Some(k.clone()),
                            };
                            let (l, r) = match into_side {
                                Side::Left => (existing.clone(), v.clone()),
                                Side::Right => (v.clone(), existing.clone()),
                            };
                            if let Some(side) = fold_conflict(ctx, group, class, &leaf, l.clone(), r.clone())? {
                                map.insert(k.clone(), if side == Side::Left { l } else { r });
                            }
                        }
                    }
                }
                Value::Map(map)
            }
            shape if shape.is_list() => {
                let (l, r) = (lv.as_list(), rv.as_list());
                match shape.order() {
                    Some(ListOrder::Ordered) => match merge_ordered(&[], l, r, None) {
                        OrderOutcome::Merged(v) => Value::List(v),
                        OrderOutcome::Conflict { .. } => current,
                    },
                    _ => Value::List(merge_unordered(&[], l, r)),
                }
            }
            _ if current.is_null() => incoming,
            _ if incoming.is_null() => current,
            _ if spec.merge == FieldMerge::Harmless => {
                if ctx.config.resolve.harmless_side == Side::Left { lv } else { rv }
            }
            _ => {
                let leaf = LeafKey {
                    node: into,
                    field: spec.name,
                    entry: None,
                };
                match fold_conflict(ctx, group, class, &leaf, lv.clone(), rv.clone())? {
                    Some(Side::Left) => lv,
                    Some(Side::Right) => rv,
                    None => current,
                }
            }
        };
        if let Some(node) = dest.get_mut(into) {
            node.set(spec.name, merged);
        }
    }
    Ok(())
}

fn fold_conflict(
    ctx: &mut MergeContext<'_>,
    group: super::partition::GroupRef,
    class: crate::model::Class,
    leaf: &LeafKey,
    left: Value,
    right: Value,
) -> Result<Option<Side>, MergeError> {
    let key = ConflictKey::leaf(leaf);
    if let Some(side) = ctx.decide(&key)? {
        return Ok(Some(side));
    }
    ctx.record_generic(
        group,
        LeafUpdate {
            key,
            node: leaf.node,
            class,
            field: leaf.field,
            entry: leaf.entry.clone(),
            ancestor: None,
            left: Some(left),
            right: Some(right),
        },
    );
    Ok(None)
}
