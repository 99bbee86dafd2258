//! Post-merge validation.
//!
//! The merged document must be structurally valid before it is returned.
//! [`check_invariants`] reports every violation it finds; [`validate`] turns
//! a non-empty report into [`MergeError::InvariantViolated`] so the merge
//! fails closed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::MergeError;
use crate::model::{Class, Graph, NodeId, PackageId};

use super::names::collect_scopes;

/// A broken structural invariant in a merged document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// The root is missing or is not a `Site`.
    RootMissing {
        /// The expected root id.
        root: NodeId,
    },
    /// An owned field refers to a node that is not stored.
    DanglingOwned {
        /// The owning node.
        parent: NodeId,
        /// The owned field.
        field: String,
        /// The missing child.
        child: NodeId,
    },
    /// An owned field holds a node of a class it does not accept.
    OwnedClassMismatch {
        /// The owning node.
        parent: NodeId,
        /// The owned field.
        field: String,
        /// The child.
        child: NodeId,
        /// The child's class.
        class: Class,
    },
    /// A node is owned more than once.
    MultipleOwners {
        /// The node.
        node: NodeId,
    },
    /// A stored node is not reachable from the root.
    Unreachable {
        /// The node.
        node: NodeId,
    },
    /// A node is its own owner through a chain of owning edges.
    Cycle {
        /// A node on the cycle.
        node: NodeId,
    },
    /// A weak reference points at nothing.
    DanglingWeak {
        /// The referencing node.
        node: NodeId,
        /// The weak field.
        field: String,
        /// The missing target.
        target: NodeId,
    },
    /// A weak reference points at an import of an undeclared package.
    ExternalLeak {
        /// The referencing node.
        node: NodeId,
        /// The imported target.
        target: NodeId,
        /// Its package.
        package: PackageId,
    },
    /// Two members of one scope share a name.
    DuplicateName {
        /// Node owning the scope.
        scope_owner: NodeId,
        /// Scope label.
        scope: String,
        /// The shared name.
        name: String,
    },
    /// Two pages share a path.
    DuplicatePagePath {
        /// The shared path.
        path: String,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootMissing { root } => write!(f, "root {root} is missing or not a Site"),
            Self::DanglingOwned {
                parent,
                field,
                child,
            } => write!(f, "{parent}/{field} owns missing node {child}"),
            Self::OwnedClassMismatch {
                parent,
                field,
                child,
                class,
            } => write!(f, "{parent}/{field} cannot own {class} node {child}"),
            Self::MultipleOwners { node } => write!(f, "node {node} has more than one owner"),
            Self::Unreachable { node } => write!(f, "node {node} is unreachable from the root"),
            Self::Cycle { node } => write!(f, "node {node} is part of an ownership cycle"),
            Self::DanglingWeak {
                node,
                field,
                target,
            } => write!(f, "{node}/{field} refers to missing node {target}"),
            Self::ExternalLeak {
                node,
                target,
                package,
            } => write!(
                f,
                "{node} refers to {target} from undeclared package '{package}'"
            ),
            Self::DuplicateName {
                scope_owner,
                scope,
                name,
            } => write!(f, "name '{name}' is used twice in {scope_owner}/{scope}"),
            Self::DuplicatePagePath { path } => write!(f, "page path '{path}' is used twice"),
        }
    }
}

/// Every invariant violation in `graph`, in a stable order.
#[must_use]
pub fn check_invariants(graph: &Graph) -> Vec<InvariantViolation> {
    let mut out = Vec::new();
    let root = graph.root();
    if graph.class_of(root) != Some(Class::Site) {
        out.push(InvariantViolation::RootMissing { root });
        return out;
    }

    let mut owned_count: BTreeMap<NodeId, usize> = BTreeMap::new();
    let declared = graph.declared_packages();
    for node in graph.nodes() {
        for (spec, child) in node.owned_children() {
            *owned_count.entry(child).or_default() += 1;
            match graph.class_of(child) {
                None => out.push(InvariantViolation::DanglingOwned {
                    parent: node.id,
                    field: spec.name.to_owned(),
                    child,
                }),
                Some(class) if !spec.targets.contains(&class) => {
                    out.push(InvariantViolation::OwnedClassMismatch {
                        parent: node.id,
                        field: spec.name.to_owned(),
                        child,
                        class,
                    });
                }
                Some(_) => {}
            }
        }
        for (spec, target) in node.weak_targets() {
            if graph.resolves(target, &declared) {
                continue;
            }
            out.push(match graph.imports().get(&target) {
                Some(package) => InvariantViolation::ExternalLeak {
                    node: node.id,
                    target,
                    package: package.clone(),
                },
                None => InvariantViolation::DanglingWeak {
                    node: node.id,
                    field: spec.name.to_owned(),
                    target,
                },
            });
        }
    }
    out.extend(
        owned_count
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(node, _)| InvariantViolation::MultipleOwners { node }),
    );

    let reachable = graph.reachable();
    let owners = graph.owner_index();
    for id in graph.ids() {
        if on_cycle(&owners, id, graph.len()) {
            out.push(InvariantViolation::Cycle { node: id });
        } else if !reachable.contains(&id) {
            out.push(InvariantViolation::Unreachable { node: id });
        }
    }

    for scope in collect_scopes(graph) {
        let mut seen = BTreeSet::new();
        let mut reported = BTreeSet::new();
        for (_, name) in scope.named(graph) {
            if !seen.insert(name) && reported.insert(name) {
                out.push(InvariantViolation::DuplicateName {
                    scope_owner: scope.owner,
                    scope: scope.label.to_owned(),
                    name: name.to_owned(),
                });
            }
        }
    }

    let mut paths = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for component in graph.nodes().filter(|n| n.class == Class::Component) {
        if let Some(path) = component.get("page_path").as_str()
            && !paths.insert(path)
            && reported.insert(path)
        {
            out.push(InvariantViolation::DuplicatePagePath {
                path: path.to_owned(),
            });
        }
    }
    out
}

fn on_cycle(owners: &crate::model::OwnerIndex, id: NodeId, limit: usize) -> bool {
    let mut cur = id;
    for _ in 0..=limit {
        match owners.owner(cur) {
            Some(p) if p.parent == id => return true,
            Some(p) => cur = p.parent,
            None => return false,
        }
    }
    false
}

/// Fail closed unless `graph` satisfies every invariant.
///
/// # Errors
/// Returns [`MergeError::InvariantViolated`] listing every violation.
pub fn validate(graph: &Graph) -> Result<(), MergeError> {
    let violations = check_invariants(graph);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(MergeError::InvariantViolated { violations })
    }
}
