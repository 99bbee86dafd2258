//! Name scopes, unique-name generation, and reference-preserving renames.
//!
//! Names are unique within a *scope*: each owned list declared with unique
//! names, plus one element scope per component (its params and named
//! render-tree nodes). Code fields refer to entities by name, so a rename
//! rewrites `${prefix:Name}` placeholders along with the `name` field.
//! Component-local prefixes (`prop`, `elem`) are rewritten only inside the
//! owning component.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::config::ReconcileConfig;
use crate::model::code_refs::rewrite_value;
use crate::model::{Class, FieldShape, Graph, Node, NodeId, Value};

use super::reconcile::Reconciliation;

/// Label of a component's element scope.
pub const ELEMENTS: &str = "elements";

/// A set of entities whose names must not collide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    /// Node owning the scope.
    pub owner: NodeId,
    /// The owned list field, or [`ELEMENTS`].
    pub label: &'static str,
    /// Members in declaration order.
    pub members: Vec<NodeId>,
}

impl Scope {
    /// Named members with their names, in declaration order.
    pub fn named<'g>(&'g self, graph: &'g Graph) -> impl Iterator<Item = (NodeId, &'g str)> {
        self.members
            .iter()
            .filter_map(move |id| Some((*id, graph.get(*id)?.name()?)))
    }
}

/// Every name scope reachable from the root, in traversal order.
#[must_use]
pub fn collect_scopes(graph: &Graph) -> Vec<Scope> {
    let mut out = Vec::new();
    for id in graph.subtree(graph.root()) {
        let Some(node) = graph.get(id) else { continue };
        for spec in node.class.fields().iter().filter(|s| s.unique_names) {
            out.push(Scope {
                owner: id,
                label: spec.name,
                members: node.get(spec.name).ref_ids(),
            });
        }
        if node.class == Class::Component {
            out.push(Scope {
                owner: id,
                label: ELEMENTS,
                members: element_members(graph, id),
            });
        }
    }
    out
}

/// Params plus named render-tree nodes of a component, skipping the contents
/// of virtual args (they are derived copies).
fn element_members(graph: &Graph, component: NodeId) -> Vec<NodeId> {
    let Some(node) = graph.get(component) else {
        return Vec::new();
    };
    let mut out = node.get("params").ref_ids();
    let mut stack: Vec<NodeId> = node.get("tpl_tree").ref_ids();
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(n) = graph.get(id) else { continue };
        if n.class == Class::Arg && n.get("is_virtual").as_bool() == Some(true) {
            continue;
        }
        if matches!(n.class, Class::TplTag | Class::TplComponent) && n.name().is_some() {
            out.push(id);
        }
        let children = n.owned_children();
        stack.extend(
            children
                .into_iter()
                .rev()
                .filter(|(_, c)| graph.class_of(*c) != Some(Class::VariantSetting))
                .map(|(_, c)| c),
        );
    }
    out
}

/// `base` with the smallest free numeric suffix.
#[must_use]
pub fn unique_name(taken: &BTreeSet<String>, base: &str, cfg: &ReconcileConfig) -> String {
    let mut n = cfg.first_suffix;
    loop {
        let candidate = cfg.suffixed_name(base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}

/// Rename `node` and rewrite references to it in every node `touched`
/// accepts. Returns the old name.
pub fn rename_node(
    graph: &mut Graph,
    node: NodeId,
    new_name: &str,
    cfg: &ReconcileConfig,
    touched: &dyn Fn(NodeId) -> bool,
) -> Option<String> {
    let n = graph.get_mut(node)?;
    let class = n.class;
    let old = n.name()?.to_owned();
    n.set("name", Value::from(new_name));
    debug!(%node, %old, new = new_name, "renamed");

    let Some(prefix) = class.ref_prefix().filter(|_| cfg.rewrite_references) else {
        return Some(old);
    };
    let scope: Vec<NodeId> = if class.is_component_local() {
        enclosing_component(graph, node)
            .map(|c| graph.subtree(c))
            .unwrap_or_default()
    } else {
        graph.ids().into_iter().collect()
    };
    for id in scope.into_iter().filter(|id| touched(*id)) {
        let Some(n) = graph.get_mut(id) else { continue };
        let code_fields: Vec<&'static str> = n
            .class
            .fields()
            .iter()
            .filter(|s| matches!(s.shape, FieldShape::Code | FieldShape::Map))
            .map(|s| s.name)
            .collect();
        for field in code_fields {
            if let Some(v) = rewrite_value(n.get(field), prefix, &old, new_name) {
                n.set(field, v);
            }
        }
    }
    Some(old)
}

fn enclosing_component(graph: &Graph, node: NodeId) -> Option<NodeId> {
    graph
        .owner_index()
        .ancestors(node, graph.len())
        .into_iter()
        .map(|p| p.parent)
        .find(|p| graph.class_of(*p) == Some(Class::Component))
}

/// Rename right-created entities whose names collide with a name the left
/// branch introduced in the same scope. Runs on working copies before
/// diffing, so the renamed entity merges as if the right branch had created
/// it under the new name.
#[instrument(skip_all)]
pub fn prefix_branch_names(
    ancestor: &Graph,
    left: &Graph,
    right: &mut Graph,
    deleted: &BTreeSet<NodeId>,
    cfg: &ReconcileConfig,
) -> Vec<Reconciliation> {
    let introduced: BTreeMap<(NodeId, &'static str), BTreeSet<String>> = collect_scopes(left)
        .into_iter()
        .map(|scope| {
            let names = scope
                .named(left)
                .filter(|(id, name)| {
                    !deleted.contains(id)
                        && ancestor.get(*id).and_then(|a| a.name()) != Some(*name)
                })
                .map(|(_, name)| name.to_owned())
                .collect();
            ((scope.owner, scope.label), names)
        })
        .collect();

    let mut records = Vec::new();
    for scope in collect_scopes(right) {
        let Some(left_names) = introduced.get(&(scope.owner, scope.label)) else {
            continue;
        };
        if left_names.is_empty() {
            continue;
        }
        let mut taken: BTreeSet<String> = left_names.clone();
        taken.extend(scope.named(right).map(|(_, name)| name.to_owned()));

        let candidates: Vec<(NodeId, String)> = scope
            .named(right)
            .filter(|(id, name)| {
                !ancestor.contains(*id)
                    && !left.contains(*id)
                    && left_names.contains(*name)
                    && !right.get(*id).is_some_and(Node::is_registered)
            })
            .map(|(id, name)| (id, name.to_owned()))
            .collect();
        for (id, original) in candidates {
            let renamed = unique_name(&taken, &original, cfg);
            taken.insert(renamed.clone());
            rename_node(right, id, &renamed, cfg, &|_| true);
            records.push(Reconciliation::DuplicateName {
                node: id,
                scope_owner: scope.owner,
                scope: scope.label.to_owned(),
                original,
                renamed,
            });
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn cfg() -> ReconcileConfig {
        ReconcileConfig::default()
    }

    #[test]
    fn unique_name_skips_taken_suffixes() {
        let taken: BTreeSet<String> = ["Brand", "Brand 2"].map(String::from).into();
        assert_eq!(unique_name(&taken, "Brand", &cfg()), "Brand 3");
        assert_eq!(unique_name(&BTreeSet::new(), "X", &cfg()), "X 2");
    }

    #[test]
    fn scopes_cover_lists_and_elements() {
        let mut g = Graph::new_site(id(1));
        g.attach(id(1), "components", Node::new(id(10), Class::Component).with("name", "Card"))
            .unwrap();
        g.attach(id(10), "params", Node::new(id(11), Class::Param).with("name", "title"))
            .unwrap();
        g.attach(id(10), "tpl_tree", Node::new(id(12), Class::TplTag).with("name", "root"))
            .unwrap();
        g.attach(id(12), "children", Node::new(id(13), Class::TplTag)).unwrap();

        let scopes = collect_scopes(&g);
        let elements = scopes
            .iter()
            .find(|s| s.owner == id(10) && s.label == ELEMENTS)
            .unwrap();
        assert_eq!(elements.members, vec![id(11), id(12)]);
        assert!(scopes.iter().any(|s| s.owner == id(1) && s.label == "tokens"));
    }

    #[test]
    fn rename_rewrites_global_references() {
        let mut g = Graph::new_site(id(1));
        g.attach(id(1), "tokens", Node::new(id(2), Class::StyleToken).with("name", "Brand"))
            .unwrap();
        g.attach(
            id(1),
            "tokens",
            Node::new(id(3), Class::StyleToken)
                .with("name", "Accent")
                .with("value", "mix(${token:Brand}, white)"),
        )
        .unwrap();
        let old = rename_node(&mut g, id(2), "Brand 2", &cfg(), &|_| true);
        assert_eq!(old.as_deref(), Some("Brand"));
        assert_eq!(
            g.get(id(3)).unwrap().get("value"),
            &Value::from("mix(${token:Brand 2}, white)")
        );
    }

    #[test]
    fn rename_respects_touched_filter() {
        let mut g = Graph::new_site(id(1));
        g.attach(id(1), "tokens", Node::new(id(2), Class::StyleToken).with("name", "Brand"))
            .unwrap();
        g.attach(
            id(1),
            "tokens",
            Node::new(id(3), Class::StyleToken).with("value", "${token:Brand}"),
        )
        .unwrap();
        rename_node(&mut g, id(2), "Brand 2", &cfg(), &|n| n != id(3));
        assert_eq!(g.get(id(3)).unwrap().get("value"), &Value::from("${token:Brand}"));
    }

    #[test]
    fn prepass_renames_right_created_collision() {
        let a = Graph::new_site(id(1));
        let mut l = a.clone();
        l.attach(id(1), "tokens", Node::new(id(2), Class::StyleToken).with("name", "Brand"))
            .unwrap();
        let mut r = a.clone();
        r.attach(id(1), "tokens", Node::new(id(3), Class::StyleToken).with("name", "Brand"))
            .unwrap();
        r.attach(
            id(1),
            "mixins",
            Node::new(id(4), Class::Mixin)
                .with("name", "m")
                .with("rules", Value::Map([("color".to_owned(), Value::from("${token:Brand}"))].into())),
        )
        .unwrap();

        let records = prefix_branch_names(&a, &l, &mut r, &BTreeSet::new(), &cfg());
        assert_eq!(records.len(), 1);
        assert_eq!(r.get(id(3)).unwrap().name(), Some("Brand 2"));
        assert_eq!(
            r.get(id(4)).unwrap().get("rules").as_map().unwrap()["color"],
            Value::from("${token:Brand 2}")
        );
        assert_eq!(l.get(id(2)).unwrap().name(), Some("Brand"));
    }
}
