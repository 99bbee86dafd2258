//! Weak-reference repair.
//!
//! Every weak reference must resolve: to a node stored in the graph, or to an
//! import of a package the document declares. A reference that does not is
//! handled per its field's [`OnDelete`] policy. `Clear` nulls the field (or
//! drops the list element); `RemoveReferrer` removes the referencing node with
//! its subtree. Removing a node can strand further references, so the scan
//! repeats until nothing changes.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::MergeError;
use crate::model::{Graph, NodeId, OnDelete, PackageId, Value};

use super::context::MergeContext;

/// Why a reference was repaired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "package", rename_all = "snake_case")]
pub enum RepairReason {
    /// The target is not in the graph.
    Missing,
    /// The target is an import of a package the document does not declare.
    UndeclaredPackage(PackageId),
}

/// One repaired weak reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefRepair {
    /// The referencing node.
    pub node: NodeId,
    /// The weak field.
    pub field: &'static str,
    /// The unresolvable target.
    pub target: NodeId,
    /// What was done.
    pub action: OnDelete,
    /// Why.
    pub reason: RepairReason,
}

/// Repair every unresolvable weak reference in `graph`.
///
/// # Errors
/// Returns [`MergeError::MalformedGraph`] if a referrer cannot be removed
/// (the document root never carries weak fields, so this is not expected).
pub fn repair_references(graph: &mut Graph) -> Result<Vec<RefRepair>, MergeError> {
    let mut repairs = Vec::new();
    loop {
        let declared = graph.declared_packages();
        let Some(repair) = graph.nodes().find_map(|node| {
            node.weak_targets().into_iter().find_map(|(spec, target)| {
                if graph.resolves(target, &declared) {
                    return None;
                }
                let reason = match graph.imports().get(&target) {
                    Some(pkg) => RepairReason::UndeclaredPackage(pkg.clone()),
                    None => RepairReason::Missing,
                };
                Some(RefRepair {
                    node: node.id,
                    field: spec.name,
                    target,
                    action: spec.shape.on_delete().unwrap_or(OnDelete::Clear),
                    reason,
                })
            })
        }) else {
            return Ok(repairs);
        };

        debug!(node = %repair.node, field = repair.field, target = %repair.target, "repairing weak reference");
        match repair.action {
            OnDelete::Clear => clear_reference(graph, repair.node, repair.field, repair.target),
            OnDelete::RemoveReferrer => {
                graph.remove_subtree(repair.node)?;
            }
        }
        repairs.push(repair);
    }
}

fn clear_reference(graph: &mut Graph, node: NodeId, field: &str, target: NodeId) {
    let Some(n) = graph.get_mut(node) else { return };
    let updated = match n.get(field) {
        Value::List(items) => Value::List(
            items
                .iter()
                .filter(|v| v.as_ref_id() != Some(target))
                .cloned()
                .collect(),
        ),
        _ => Value::Null,
    };
    n.set(field, updated);
}

/// Remove every node the effective merge deletes, then cascade to the weak
/// references that pointed at them. Returns the repairs made.
///
/// Owned fields have already been rebuilt without the deleted nodes, so they
/// are simply dropped from the arena.
///
/// # Errors
/// Propagates [`repair_references`] failures.
#[instrument(skip_all, fields(deleted = ctx.deleted.len()))]
pub fn apply_deletions(
    ctx: &MergeContext<'_>,
    dest: &mut Graph,
) -> Result<Vec<RefRepair>, MergeError> {
    for id in &ctx.deleted {
        dest.remove(*id);
    }
    let cascaded = repair_references(dest)?;
    if !cascaded.is_empty() {
        debug!(count = cascaded.len(), "cascaded deletions to weak references");
    }
    Ok(cascaded)
}
