//! Ownership placement for every surviving node, and the rebuild of owned
//! fields from those placements.
//!
//! Owned fields are never merged leaf by leaf. Instead each surviving node is
//! given exactly one final `(parent, field)` [`Placement`]:
//!
//! ```text
//!   ancestor node:  pl == pa → pr      pr == pa → pl      pl == pr → pl
//!                   otherwise          reparent conflict (move:<id>)
//!   created node:   its creator's placement
//!   both created:   equal → that one, else reparent conflict
//! ```
//!
//! Single-child slots claimed differently by both sides raise a re-root
//! conflict whose pick also decides where the displaced roots go. Cycles are
//! broken, keyed lists are folded, and finally every owned field is rebuilt
//! from the placements, merging list order three ways.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, warn};

use crate::error::MergeError;
use crate::model::{
    Class, FieldMerge, FieldShape, FieldSpec, Graph, ListOrder, MergeKey, NodeId, Placement,
    Side, Value,
};

use super::conflict::{ConflictKey, LeafUpdate, StructuralOp};
use super::context::{MergeContext, Origin};
use super::ordering::{OrderOutcome, merge_ordered, merge_unordered};
use super::reconcile::Reconciliation;
use super::resolve::fold_fields;
use super::types::LeafKey;

// ---------------------------------------------------------------------------
// Placements
// ---------------------------------------------------------------------------

/// Final owner of every placed node, plus the sides that won clashed slots.
#[derive(Clone, Debug, Default)]
pub struct Placements {
    map: BTreeMap<NodeId, Placement>,
    slot_sides: BTreeMap<(NodeId, &'static str), Side>,
}

impl Placements {
    /// Placement of `id`.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<Placement> {
        self.map.get(&id).copied()
    }

    /// Place `id`.
    pub fn set(&mut self, id: NodeId, placement: Placement) {
        self.map.insert(id, placement);
    }

    /// Unplace `id`.
    pub fn remove(&mut self, id: NodeId) -> Option<Placement> {
        self.map.remove(&id)
    }

    /// Number of placed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if nothing is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Every placement, in node id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Placement)> + '_ {
        self.map.iter().map(|(id, p)| (*id, *p))
    }

    /// Nodes placed at `(parent, field)`, in id order.
    #[must_use]
    pub fn members(&self, parent: NodeId, field: &str) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, p)| p.parent == parent && p.field == field)
            .map(|(id, _)| id)
            .collect()
    }

    /// Members grouped by slot.
    #[must_use]
    pub fn by_slot(&self) -> BTreeMap<Placement, Vec<NodeId>> {
        let mut out: BTreeMap<Placement, Vec<NodeId>> = BTreeMap::new();
        for (id, p) in self.iter() {
            out.entry(p).or_default().push(id);
        }
        out
    }

    /// `root` and everything placed beneath it, parents before children.
    #[must_use]
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for (id, p) in self.iter() {
            children.entry(p.parent).or_default().push(id);
        }
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            out.push(cur);
            if let Some(kids) = children.get(&cur) {
                stack.extend(kids.iter().rev());
            }
        }
        out
    }

    /// Move every child of `from` to the same field of `to`.
    pub fn rehome(&mut self, from: NodeId, to: NodeId) {
        for p in self.map.values_mut() {
            if p.parent == from {
                p.parent = to;
            }
        }
    }

    /// The side that won a clashed single-child slot.
    #[must_use]
    pub fn slot_winner(&self, slot: Placement) -> Option<Side> {
        self.slot_sides.get(&(slot.parent, slot.field)).copied()
    }
}

// ---------------------------------------------------------------------------
// Placement computation
// ---------------------------------------------------------------------------

/// Decide the final placement of every surviving node in `dest`.
///
/// # Errors
/// Returns [`MergeError::MissingPick`] when a resolution map lacks a pick for
/// a reparent or re-root clash.
#[instrument(skip_all)]
pub fn compute_placements(
    ctx: &mut MergeContext<'_>,
    dest: &Graph,
) -> Result<Placements, MergeError> {
    let survivors = survivors(ctx, dest);
    let mut out = Placements::default();
    detect_slot_clashes(ctx, &survivors, &mut out)?;

    for &id in &survivors {
        if id == dest.root() {
            continue;
        }
        let placement = match ctx.origin(id) {
            Some(Origin::Ancestor) => place_existing(ctx, id, &out)?,
            Some(Origin::Both) => place_twice_created(ctx, id)?,
            Some(origin) => {
                let side = origin.creator().unwrap_or(Side::Left);
                ctx.owners(side)
                    .owner(id)
                    .filter(|p| out.slot_winner(*p).is_none_or(|w| w == side))
            }
            None => None,
        };
        match placement {
            Some(p) if survivors.contains(&p.parent) => out.set(id, p),
            Some(p) => debug!(node = %id, parent = %p.parent, "parent did not survive"),
            None => {}
        }
    }

    guard_single_slots(ctx, dest, &survivors, &mut out);
    debug!(placed = out.len(), "placements computed");
    Ok(out)
}

fn survivors(ctx: &MergeContext<'_>, dest: &Graph) -> BTreeSet<NodeId> {
    dest.ids()
        .into_iter()
        .filter(|id| !ctx.deleted.contains(id))
        .collect()
}

fn single_ref(graph: &Graph, node: NodeId, field: &str) -> Option<NodeId> {
    graph.get(node).and_then(|n| n.get(field).as_ref_id())
}

/// Find single-child slots given different occupants by both sides.
fn detect_slot_clashes(
    ctx: &mut MergeContext<'_>,
    survivors: &BTreeSet<NodeId>,
    out: &mut Placements,
) -> Result<(), MergeError> {
    for &id in survivors {
        let Some(node) = ctx.ancestor.get(id) else {
            continue;
        };
        if !ctx.left.contains(id) || !ctx.right.contains(id) {
            continue;
        }
        let class = node.class;
        for spec in class.fields().iter().filter(|s| s.shape == FieldShape::Owned) {
            let va = single_ref(ctx.ancestor, id, spec.name);
            let vl = single_ref(ctx.left, id, spec.name);
            let vr = single_ref(ctx.right, id, spec.name);
            if vl == va || vr == va || vl == vr {
                continue;
            }
            let key = ConflictKey::reroot(id, spec.name);
            let side = match ctx.decide(&key)? {
                Some(side) => side,
                None => {
                    let group = spec.group.unwrap_or_else(|| ctx.group_for(id).kind);
                    ctx.record_special(
                        group,
                        StructuralOp::Reroot {
                            parent: id,
                            field: spec.name,
                            ancestor: va,
                            left: vl,
                            right: vr,
                        },
                    );
                    Side::Left
                }
            };
            out.slot_sides.insert((id, spec.name), side);
        }
    }
    Ok(())
}

fn place_existing(
    ctx: &mut MergeContext<'_>,
    id: NodeId,
    out: &Placements,
) -> Result<Option<Placement>, MergeError> {
    let pa = ctx.ancestor_owners().owner(id);
    let pl = ctx.owners(Side::Left).owner(id);
    let pr = ctx.owners(Side::Right).owner(id);

    if let Some(side) = [pa, pl, pr].into_iter().flatten().find_map(|p| out.slot_winner(p)) {
        return Ok(match side {
            Side::Left => pl,
            Side::Right => pr,
        });
    }
    if pl == pa {
        return Ok(pr);
    }
    if pr == pa || pl == pr {
        return Ok(pl);
    }
    let (Some(left), Some(right)) = (pl, pr) else {
        return Ok(pa);
    };
    let key = ConflictKey::reparent(id);
    Ok(match ctx.decide(&key)? {
        Some(Side::Left) => pl,
        Some(Side::Right) => pr,
        None => {
            let group = ctx.group_for(id).kind;
            ctx.record_special(
                group,
                StructuralOp::Reparent {
                    node: id,
                    ancestor: pa,
                    left,
                    right,
                },
            );
            pa
        }
    })
}

fn place_twice_created(
    ctx: &mut MergeContext<'_>,
    id: NodeId,
) -> Result<Option<Placement>, MergeError> {
    let pl = ctx.owners(Side::Left).owner(id);
    let pr = ctx.owners(Side::Right).owner(id);
    let (Some(left), Some(right)) = (pl, pr) else {
        return Ok(pl.or(pr));
    };
    if left == right {
        return Ok(pl);
    }
    let key = ConflictKey::reparent(id);
    Ok(match ctx.decide(&key)? {
        Some(Side::Right) => pr,
        Some(Side::Left) => pl,
        None => {
            let group = ctx.group_for(id).kind;
            ctx.record_special(
                group,
                StructuralOp::Reparent {
                    node: id,
                    ancestor: None,
                    left,
                    right,
                },
            );
            pl
        }
    })
}

/// A single-child slot keeps one occupant. The others fall back to another
/// of their placements that is a list, or stay unplaced.
fn guard_single_slots(
    ctx: &MergeContext<'_>,
    dest: &Graph,
    survivors: &BTreeSet<NodeId>,
    out: &mut Placements,
) {
    for (slot, members) in out.by_slot() {
        if members.len() < 2 {
            continue;
        }
        let single = dest
            .class_of(slot.parent)
            .and_then(|c| c.field(slot.field))
            .is_some_and(|s| s.shape == FieldShape::Owned);
        if !single {
            continue;
        }
        let va = single_ref(ctx.ancestor, slot.parent, slot.field);
        let vl = single_ref(ctx.left, slot.parent, slot.field);
        let vr = single_ref(ctx.right, slot.parent, slot.field);
        let expected = match out.slot_winner(slot) {
            Some(Side::Left) => vl,
            Some(Side::Right) => vr,
            None if vl == va => vr,
            None => vl,
        };
        let keep = expected
            .filter(|e| members.contains(e))
            .unwrap_or(members[0]);
        for id in members.into_iter().filter(|m| *m != keep) {
            let fallback = [
                ctx.owners(Side::Left).owner(id),
                ctx.owners(Side::Right).owner(id),
                ctx.ancestor_owners().owner(id),
            ]
            .into_iter()
            .flatten()
            .find(|p| {
                *p != slot
                    && survivors.contains(&p.parent)
                    && dest
                        .class_of(p.parent)
                        .and_then(|c| c.field(p.field))
                        .is_some_and(|s| s.shape.is_list())
            });
            warn!(node = %id, %slot, "single-child slot already occupied");
            match fallback {
                Some(p) => out.set(id, p),
                None => {
                    out.remove(id);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

/// Break every ownership cycle the placements form.
///
/// The smallest-id node in the cycle that some branch moved goes back to its
/// ancestor placement when that parent survives, and is detached otherwise.
pub fn break_cycles(ctx: &mut MergeContext<'_>, dest: &Graph, placements: &mut Placements) {
    while let Some(cycle) = find_cycle(placements) {
        let ancestor_of = |id: NodeId| ctx.ancestor_owners().owner(id);
        let node = cycle
            .iter()
            .copied()
            .find(|id| placements.get(*id) != ancestor_of(*id))
            .unwrap_or(cycle[0]);
        let restored = ancestor_of(node).filter(|p| {
            placements.get(node) != Some(*p)
                && dest.contains(p.parent)
                && !ctx.deleted.contains(&p.parent)
        });
        match restored {
            Some(p) => placements.set(node, p),
            None => {
                placements.remove(node);
            }
        }
        warn!(node = %node, len = cycle.len(), "broke ownership cycle");
        ctx.reconciliations
            .push(Reconciliation::CycleBroken { node, restored });
    }
}

/// Members of one placement cycle, sorted, if any exists.
fn find_cycle(placements: &Placements) -> Option<Vec<NodeId>> {
    let mut done = BTreeSet::new();
    for (start, _) in placements.iter() {
        if done.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut cur = start;
        loop {
            if let Some(pos) = path.iter().position(|n| *n == cur) {
                let mut cycle: Vec<NodeId> = path[pos..].to_vec();
                cycle.sort_unstable();
                return Some(cycle);
            }
            if done.contains(&cur) {
                break;
            }
            path.push(cur);
            match placements.get(cur) {
                Some(p) => cur = p.parent,
                None => break,
            }
        }
        done.extend(path);
    }
    None
}

// ---------------------------------------------------------------------------
// Merge-key folding
// ---------------------------------------------------------------------------

/// Fold members of keyed owned lists that share a merge key.
///
/// Runs to a fixpoint, since folding can bring equivalent grandchildren
/// together under the kept node.
///
/// # Errors
/// Returns [`MergeError::MissingPick`] when a resolution map lacks a pick for
/// a field clash between folded nodes.
#[instrument(skip_all)]
pub fn fold_equivalents(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    placements: &mut Placements,
) -> Result<(), MergeError> {
    loop {
        let mut folded = false;
        for (slot, members) in placements.by_slot() {
            let Some(key_kind) = dest
                .class_of(slot.parent)
                .and_then(|c| c.field(slot.field))
                .and_then(FieldSpec::merge_key)
            else {
                continue;
            };
            if key_kind == MergeKey::Identity {
                continue;
            }
            let mut buckets: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
            for m in members {
                if let Some(k) = merge_key_of(dest, m, key_kind) {
                    buckets.entry(k).or_default().push(m);
                }
            }
            for mut ids in buckets.into_values().filter(|ids| ids.len() > 1) {
                if ids.iter().all(|id| ctx.origin(*id) == Some(Origin::Ancestor)) {
                    continue;
                }
                ids.sort_by_key(|id| (origin_rank(ctx.origin(*id)), *id));
                let keep = ids[0];
                for dup in &ids[1..] {
                    fold_into(ctx, dest, placements, keep, *dup)?;
                    folded = true;
                }
            }
            if folded {
                break;
            }
        }
        if !folded {
            return Ok(());
        }
    }
}

/// Ancestor entities first, then left-created, then right-created.
pub(crate) const fn origin_rank(origin: Option<Origin>) -> u8 {
    match origin {
        Some(Origin::Ancestor) => 0,
        Some(Origin::Left | Origin::Both) => 1,
        Some(Origin::Right) => 2,
        None => 3,
    }
}

fn merge_key_of(dest: &Graph, id: NodeId, kind: MergeKey) -> Option<String> {
    let node = dest.get(id)?;
    match kind {
        MergeKey::Identity => Some(id.to_string()),
        MergeKey::Field(field) => {
            let v = node.get(field);
            (!v.is_null()).then(|| v.to_string())
        }
        MergeKey::RefSet(field) => {
            let mut ids = node.get(field).ref_ids();
            ids.sort_unstable();
            ids.dedup();
            Some(
                ids.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }
}

fn fold_into(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    placements: &mut Placements,
    keep: NodeId,
    dup: NodeId,
) -> Result<(), MergeError> {
    let Some(node) = dest.remove(dup) else {
        return Ok(());
    };
    debug!(%keep, %dup, class = %node.class, "folding equivalent entry");
    let into_side = match ctx.origin(dup) {
        Some(Origin::Right) => Side::Left,
        _ => Side::Right,
    };
    fold_fields(ctx, dest, keep, &node, into_side)?;
    placements.rehome(dup, keep);
    placements.remove(dup);
    redirect_weak(dest, dup, keep);
    ctx.aliases.insert(dup, keep);
    Ok(())
}

/// Point every weak reference at `from` to `to` instead.
pub(crate) fn redirect_weak(dest: &mut Graph, from: NodeId, to: NodeId) {
    for id in dest.ids() {
        let Some(node) = dest.get_mut(id) else {
            continue;
        };
        let weak: Vec<&'static str> = node
            .class
            .fields()
            .iter()
            .filter(|s| s.shape.is_weak())
            .map(|s| s.name)
            .collect();
        for field in weak {
            let mut value = node.get(field).clone();
            if value.redirect(from, to) {
                node.set(field, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rebuild
// ---------------------------------------------------------------------------

/// Rewrite every owned field of every surviving node from the placements.
///
/// # Errors
/// Returns [`MergeError::MissingPick`] when a resolution map lacks a pick for
/// an order clash.
#[instrument(skip_all, fields(placed = placements.len()))]
pub fn rebuild_owned_fields(
    ctx: &mut MergeContext<'_>,
    dest: &mut Graph,
    placements: &Placements,
) -> Result<(), MergeError> {
    let slots = placements.by_slot();
    for id in survivors(ctx, dest) {
        let Some(class) = dest.class_of(id) else {
            continue;
        };
        for spec in class.fields().iter().filter(|s| s.shape.is_owned()) {
            let slot = Placement {
                parent: id,
                field: spec.name,
            };
            let members: BTreeSet<NodeId> = slots
                .get(&slot)
                .map(|v| v.iter().copied().collect())
                .unwrap_or_default();
            let value = if spec.shape == FieldShape::Owned {
                members.first().map_or(Value::Null, |c| Value::Ref(*c))
            } else {
                Value::refs(merge_members(ctx, id, class, spec, &members)?)
            };
            if let Some(node) = dest.get_mut(id)
                && node.get(spec.name) != &value
            {
                node.set(spec.name, value);
            }
        }
    }
    Ok(())
}

fn merge_members(
    ctx: &mut MergeContext<'_>,
    parent: NodeId,
    class: Class,
    spec: &'static FieldSpec,
    members: &BTreeSet<NodeId>,
) -> Result<Vec<NodeId>, MergeError> {
    let a = side_sequence(ctx, ctx.ancestor, parent, spec.name, members);
    let l = side_sequence(ctx, ctx.left, parent, spec.name, members);
    let r = side_sequence(ctx, ctx.right, parent, spec.name, members);

    let mut merged = match spec.shape.order() {
        Some(ListOrder::Ordered) => match merge_ordered(&a, &l, &r, None) {
            OrderOutcome::Merged(v) => v,
            OrderOutcome::Conflict { left, right } => {
                let side = order_conflict(ctx, parent, class, spec, (&a, &l, &r), left, right)?;
                match merge_ordered(&a, &l, &r, Some(side)) {
                    OrderOutcome::Merged(v) => v,
                    OrderOutcome::Conflict { .. } => l.clone(),
                }
            }
        },
        _ => merge_unordered(&a, &l, &r),
    };
    merged.retain(|id| members.contains(id));
    for m in members {
        if !merged.contains(m) {
            merged.push(*m);
        }
    }
    Ok(merged)
}

/// One side's list at `parent.field`, including lists of nodes folded into
/// `parent`, mapped through aliases and limited to `members`.
fn side_sequence(
    ctx: &MergeContext<'_>,
    graph: &Graph,
    parent: NodeId,
    field: &str,
    members: &BTreeSet<NodeId>,
) -> Vec<NodeId> {
    let sources = std::iter::once(parent).chain(
        ctx.aliases
            .keys()
            .copied()
            .filter(|src| ctx.resolve_alias(*src) == parent),
    );
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for src in sources {
        let Some(node) = graph.get(src) else { continue };
        for id in node.get(field).ref_ids() {
            let id = ctx.resolve_alias(id);
            if members.contains(&id) && seen.insert(id) {
                out.push(id);
            }
        }
    }
    out
}

fn order_conflict(
    ctx: &mut MergeContext<'_>,
    parent: NodeId,
    class: Class,
    spec: &'static FieldSpec,
    (a, l, r): (&[NodeId], &[NodeId], &[NodeId]),
    left: Vec<NodeId>,
    right: Vec<NodeId>,
) -> Result<Side, MergeError> {
    if spec.merge == FieldMerge::Structural {
        let key = ConflictKey::order(parent, spec.name);
        if let Some(side) = ctx.decide(&key)? {
            return Ok(side);
        }
        let group = ctx.group_for(parent).kind;
        ctx.record_special(
            group,
            StructuralOp::ChildrenOrder {
                parent,
                field: spec.name,
                left,
                right,
            },
        );
        return Ok(Side::Left);
    }
    let leaf = LeafKey {
        node: parent,
        field: spec.name,
        entry: None,
    };
    let key = ConflictKey::leaf(&leaf);
    if let Some(side) = ctx.decide(&key)? {
        return Ok(side);
    }
    let group = ctx.group_for(parent);
    ctx.record_generic(
        group,
        LeafUpdate {
            key,
            node: parent,
            class,
            field: spec.name,
            entry: None,
            ancestor: Some(Value::refs(a.iter().copied())),
            left: Some(Value::refs(l.iter().copied())),
            right: Some(Value::refs(r.iter().copied())),
        },
    );
    Ok(Side::Left)
}
