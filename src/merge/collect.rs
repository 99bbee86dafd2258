//! COLLECT step: diff one branch against the ancestor.
//!
//! Pure function over two graphs. Presence is decided by reachability from
//! the root, so garbage left in an arena never counts as a live node. Field
//! changes are computed only for nodes present on both sides; nodes present
//! on one side are reported as created/removed subtrees instead.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::MergeError;
use crate::model::{FieldShape, Graph, Node, NodeId, OwnerIndex, Side, Value};

use super::types::{Change, ChangeKind, ChangeSet};

/// Compute `ChangeSet(ancestor → branch)`.
///
/// # Errors
/// Returns [`MergeError::NotDerived`] if the branch has a different root or
/// reuses an ancestor identity with a different class.
pub fn collect_changes(
    ancestor: &Graph,
    branch: &Graph,
    side: Side,
) -> Result<ChangeSet, MergeError> {
    if ancestor.root() != branch.root() {
        return Err(MergeError::NotDerived {
            node: branch.root(),
            detail: format!("document root differs from ancestor root {}", ancestor.root()),
        });
    }

    let before = ancestor.reachable();
    let after = branch.reachable();

    let created: BTreeSet<NodeId> = after.difference(&before).copied().collect();
    let removed: BTreeSet<NodeId> = before.difference(&after).copied().collect();

    let created_roots = subtree_roots(&created, &branch.owner_index());
    let removed_roots = subtree_roots(&removed, &ancestor.owner_index());

    let mut changes = Vec::new();
    for id in before.intersection(&after) {
        let (Some(old), Some(new)) = (ancestor.get(*id), branch.get(*id)) else {
            continue;
        };
        if old.class != new.class {
            return Err(MergeError::NotDerived {
                node: *id,
                detail: format!("class changed from {} to {}", old.class, new.class),
            });
        }
        diff_node(old, new, &mut changes);
    }

    debug!(
        %side,
        created = created.len(),
        removed = removed.len(),
        changes = changes.len(),
        "collected branch changes"
    );

    Ok(ChangeSet {
        side,
        created_roots,
        removed_roots,
        created,
        removed,
        changes,
    })
}

/// Nodes reachable in the ancestor but not in at least one branch.
#[must_use]
pub fn effective_deletions(ancestor: &Graph, left: &Graph, right: &Graph) -> BTreeSet<NodeId> {
    let l = left.reachable();
    let r = right.reachable();
    ancestor
        .reachable()
        .into_iter()
        .filter(|id| !l.contains(id) || !r.contains(id))
        .collect()
}

/// Members of `set` whose owner is not itself in `set`.
fn subtree_roots(set: &BTreeSet<NodeId>, owners: &OwnerIndex) -> Vec<NodeId> {
    set.iter()
        .copied()
        .filter(|id| owners.owner(*id).is_none_or(|p| !set.contains(&p.parent)))
        .collect()
}

fn diff_node(old: &Node, new: &Node, out: &mut Vec<Change>) {
    for spec in old.class.fields() {
        let a = old.get(spec.name);
        let b = new.get(spec.name);
        if a == b {
            continue;
        }
        let push = |out: &mut Vec<Change>, kind| {
            out.push(Change {
                node: old.id,
                class: old.class,
                field: spec.name,
                kind,
            });
        };
        match spec.shape {
            FieldShape::Map => {
                let (ma, mb) = (a.as_map(), b.as_map());
                let keys: BTreeSet<&String> = ma
                    .into_iter()
                    .flat_map(|m| m.keys())
                    .chain(mb.into_iter().flat_map(|m| m.keys()))
                    .collect();
                for key in keys {
                    let va = ma.and_then(|m| m.get(key));
                    let vb = mb.and_then(|m| m.get(key));
                    if va != vb {
                        push(
                            out,
                            ChangeKind::MapEntry {
                                key: key.clone(),
                                old: va.cloned(),
                                new: vb.cloned(),
                            },
                        );
                    }
                }
            }
            shape if shape.is_list() => push(out, list_change(a.as_list(), b.as_list())),
            _ => push(
                out,
                ChangeKind::Set {
                    old: a.clone(),
                    new: b.clone(),
                },
            ),
        }
    }
}

/// Describe a list edit as one splice when possible, else a whole replace.
fn list_change(old: &[Value], new: &[Value]) -> ChangeKind {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    let removed = &old[prefix..old.len() - suffix];
    let inserted = &new[prefix..new.len() - suffix];
    if removed.iter().any(|v| inserted.contains(v)) {
        ChangeKind::Replace {
            old: old.to_vec(),
            new: new.to_vec(),
        }
    } else {
        ChangeKind::Splice {
            index: prefix,
            removed: removed.to_vec(),
            inserted: inserted.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Class;

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn base() -> Graph {
        let mut g = Graph::new_site(id(1));
        g.attach(
            id(1),
            "mixins",
            Node::new(id(5), Class::Mixin).with("name", "Card"),
        )
        .unwrap();
        g.attach(id(1), "components", Node::new(id(10), Class::Component))
            .unwrap();
        g.attach(id(10), "tpl_tree", Node::new(id(11), Class::TplTag))
            .unwrap();
        for n in 12..=14 {
            g.attach(id(11), "children", Node::new(id(n), Class::TplTag))
                .unwrap();
        }
        g
    }

    #[test]
    fn identical_graphs_have_no_changes() {
        let a = base();
        let cs = collect_changes(&a, &a.clone(), Side::Left).unwrap();
        assert!(cs.is_empty());
    }

    #[test]
    fn new_subtree_reported_once_at_root() {
        let a = base();
        let mut b = a.clone();
        b.attach(id(12), "children", Node::new(id(20), Class::TplTag))
            .unwrap();
        b.attach(id(20), "children", Node::new(id(21), Class::TplTag))
            .unwrap();
        let cs = collect_changes(&a, &b, Side::Right).unwrap();
        assert_eq!(cs.created_roots, vec![id(20)]);
        assert_eq!(cs.created, BTreeSet::from([id(20), id(21)]));
        assert_eq!(cs.changes.len(), 1);
        assert!(matches!(
            &cs.changes[0].kind,
            ChangeKind::Splice { index: 0, removed, inserted }
                if removed.is_empty() && inserted == &vec![Value::Ref(id(20))]
        ));
    }

    #[test]
    fn removed_subtree_reported_once_at_root() {
        let a = base();
        let mut b = a.clone();
        b.remove_subtree(id(11)).unwrap();
        let cs = collect_changes(&a, &b, Side::Left).unwrap();
        assert_eq!(cs.removed_roots, vec![id(11)]);
        assert_eq!(cs.removed.len(), 4);
    }

    #[test]
    fn reorder_is_a_replace() {
        let a = base();
        let mut b = a.clone();
        b.set_field(id(11), "children", Value::refs([id(14), id(12), id(13)]))
            .unwrap();
        let cs = collect_changes(&a, &b, Side::Left).unwrap();
        assert!(matches!(cs.changes[0].kind, ChangeKind::Replace { .. }));
    }

    #[test]
    fn middle_delete_is_a_splice() {
        let a = base();
        let mut b = a.clone();
        b.remove_subtree(id(13)).unwrap();
        let cs = collect_changes(&a, &b, Side::Left).unwrap();
        assert!(matches!(
            &cs.changes[0].kind,
            ChangeKind::Splice { index: 1, removed, inserted }
                if removed == &vec![Value::Ref(id(13))] && inserted.is_empty()
        ));
    }

    #[test]
    fn map_changes_are_per_key() {
        let a = base();
        let mut b = a.clone();
        let mut rules = std::collections::BTreeMap::new();
        rules.insert("color".to_owned(), Value::from("red"));
        rules.insert("width".to_owned(), Value::from("1px"));
        b.set_field(id(5), "rules", Value::Map(rules)).unwrap();
        let cs = collect_changes(&a, &b, Side::Left).unwrap();
        let leaves: Vec<String> = cs.changes.iter().map(|c| c.leaf().to_string()).collect();
        assert_eq!(
            leaves,
            vec![format!("{}/rules[color]", id(5)), format!("{}/rules[width]", id(5))]
        );
    }

    #[test]
    fn class_change_is_not_derived() {
        let a = base();
        let mut b = a.clone();
        b.insert(Node::new(id(13), Class::TplSlot));
        let err = collect_changes(&a, &b, Side::Left).unwrap_err();
        assert!(matches!(err, MergeError::NotDerived { node, .. } if node == id(13)));
    }

    #[test]
    fn different_root_is_not_derived() {
        let a = base();
        let b = Graph::new_site(id(2));
        assert!(collect_changes(&a, &b, Side::Left).is_err());
    }

    #[test]
    fn effective_deletions_unions_both_sides() {
        let a = base();
        let mut l = a.clone();
        l.remove_subtree(id(12)).unwrap();
        let mut r = a.clone();
        r.remove_subtree(id(5)).unwrap();
        assert_eq!(
            effective_deletions(&a, &l, &r),
            BTreeSet::from([id(5), id(12)])
        );
    }
}
