//! Dependency version unification.
//!
//! Sites pin external packages as `name@version`, and each pinned version is
//! imported under its own local ids. When the branches pin different versions
//! of one package the newest pin wins. Before diffing, each branch copy that
//! pins an older version is upgraded: its `dependencies` entry is replaced and
//! every weak reference into the older version is retargeted to the import of
//! the same source node in the winning version. Both branches then agree on
//! the upgrade, so it merges like an identical edit.
//!
//! References whose source node the winning version no longer exports are
//! left alone; once the old pin is gone they are repaired as undeclared
//! imports.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::model::{Graph, NodeId, PackageId, Side, Value};

use super::reconcile::Reconciliation;

/// Upgrade both branch copies to the newest pinned version of every package.
#[instrument(skip_all)]
pub fn unify_dependencies(
    ancestor: &Graph,
    left: &mut Graph,
    right: &mut Graph,
) -> Vec<Reconciliation> {
    let mut newest: BTreeMap<String, PackageId> = BTreeMap::new();
    for pkg in left.declared_packages().into_iter().chain(right.declared_packages()) {
        if newest
            .get(pkg.name())
            .is_none_or(|current| current.version_key() < pkg.version_key())
        {
            newest.insert(pkg.name().to_owned(), pkg);
        }
    }

    let mut records = Vec::new();
    for side in [Side::Left, Side::Right] {
        let (branch, other) = match side {
            Side::Left => (&mut *left, &*right),
            Side::Right => (&mut *right, &*left),
        };
        for from in branch.declared_packages() {
            let Some(to) = newest.get(from.name()).filter(|to| **to != from).cloned() else {
                continue;
            };
            let retargeted = upgrade(branch, [ancestor, other], &from, &to);
            info!(%side, %from, %to, retargeted, "upgraded dependency pin");
            records.push(Reconciliation::DependencyUpgraded {
                side,
                from,
                to,
                retargeted,
            });
        }
    }
    records
}

/// Replace the pin `from` with `to` in `branch` and retarget references.
/// Returns the number of references moved.
fn upgrade(branch: &mut Graph, others: [&Graph; 2], from: &PackageId, to: &PackageId) -> usize {
    let mut remap = BTreeMap::new();
    let old_imports: Vec<NodeId> = branch
        .imports()
        .iter()
        .filter(|(_, pkg)| *pkg == from)
        .map(|(id, _)| *id)
        .collect();
    for old in old_imports {
        let source = branch.import_source(old);
        let found = branch
            .find_import(to, source)
            .or_else(|| others.iter().find_map(|g| g.find_import(to, source)));
        if let Some(new) = found {
            branch.import_from(new, to.clone(), source);
            remap.insert(old, new);
        }
    }

    let root = branch.root();
    if let Some(node) = branch.get_mut(root) {
        let mut deps: Vec<Value> = Vec::new();
        for v in node.get("dependencies").as_list() {
            let v = if v.as_str() == Some(from.as_str()) {
                Value::from(to.as_str())
            } else {
                v.clone()
            };
            if !deps.contains(&v) {
                deps.push(v);
            }
        }
        node.set("dependencies", Value::List(deps));
    }

    retarget(branch, &remap)
}

/// Rewrite every weak reference found in `remap`. Returns how many moved.
fn retarget(graph: &mut Graph, remap: &BTreeMap<NodeId, NodeId>) -> usize {
    if remap.is_empty() {
        return 0;
    }
    let mut moved = 0;
    for id in graph.ids() {
        let Some(node) = graph.get_mut(id) else { continue };
        let weak: Vec<&'static str> = node
            .class
            .fields()
            .iter()
            .filter(|s| s.shape.is_weak())
            .map(|s| s.name)
            .collect();
        for field in weak {
            let (value, n) = remap_value(node.get(field), remap);
            if n > 0 {
                node.set(field, value);
                moved += n;
            }
        }
    }
    moved
}

fn remap_value(value: &Value, remap: &BTreeMap<NodeId, NodeId>) -> (Value, usize) {
    let swap = |v: &Value| v.as_ref_id().and_then(|t| remap.get(&t)).map(|n| Value::Ref(*n));
    match value {
        Value::List(items) => {
            let mut n = 0;
            let items = items
                .iter()
                .map(|item| match swap(item) {
                    Some(new) => {
                        n += 1;
                        new
                    }
                    None => item.clone(),
                })
                .collect();
            (Value::List(items), n)
        }
        other => match swap(other) {
            Some(new) => (new, 1),
            None => (other.clone(), 0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Class, Node};

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    /// A site pinning `pin`, with one image imported per known version and a
    /// setting that uses the image of version `uses`.
    fn site(pin: &str, uses: NodeId) -> Graph {
        let mut g = Graph::new_site(id(1));
        g.set_field(id(1), "dependencies", Value::List(vec![pin.into()]))
            .unwrap();
        g.import_from(id(900), PackageId::new("icons@1"), id(5));
        g.import_from(id(901), PackageId::new("icons@2"), id(5));
        g.attach(id(1), "components", Node::new(id(10), Class::Component))
            .unwrap();
        g.attach(id(10), "tpl_tree", Node::new(id(11), Class::TplTag))
            .unwrap();
        g.attach(
            id(11),
            "vsettings",
            Node::new(id(12), Class::VariantSetting).with("image", uses),
        )
        .unwrap();
        g
    }

    #[test]
    fn older_pin_is_upgraded_and_retargeted() {
        let a = site("icons@1", id(900));
        let mut l = a.clone();
        let mut r = site("icons@2", id(901));

        let records = unify_dependencies(&a, &mut l, &mut r);
        assert_eq!(
            records,
            vec![Reconciliation::DependencyUpgraded {
                side: Side::Left,
                from: PackageId::new("icons@1"),
                to: PackageId::new("icons@2"),
                retargeted: 1,
            }]
        );
        assert_eq!(l.get(id(12)).unwrap().get("image"), &Value::Ref(id(901)));
        assert_eq!(
            l.declared_packages().into_iter().collect::<Vec<_>>(),
            vec![PackageId::new("icons@2")]
        );
        assert_eq!(l, r);
    }

    #[test]
    fn matching_pins_are_left_alone() {
        let a = site("icons@1", id(900));
        let mut l = a.clone();
        let mut r = a.clone();
        assert!(unify_dependencies(&a, &mut l, &mut r).is_empty());
        assert_eq!(l, a);
    }

    #[test]
    fn missing_source_in_new_version_keeps_old_reference() {
        let a = site("icons@1", id(900));
        let mut l = a.clone();
        l.import(id(950), PackageId::new("icons@1"));
        l.set_field(id(12), "image", id(950)).unwrap();
        let mut r = site("icons@2", id(901));

        let records = unify_dependencies(&a, &mut l, &mut r);
        assert!(matches!(
            &records[..],
            [Reconciliation::DependencyUpgraded { retargeted: 0, .. }]
        ));
        assert_eq!(l.get(id(12)).unwrap().get("image"), &Value::Ref(id(950)));
    }
}
