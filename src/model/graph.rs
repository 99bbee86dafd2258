//! Arena-backed document graph.
//!
//! A [`Graph`] owns every [`Node`] of one document snapshot, keyed by
//! [`NodeId`]. Owning edges are `Ref` values stored in owned fields with a
//! single-owner discipline. Weak edges are plain `Ref` values resolved through
//! the arena with explicit presence checks. Nodes from other packages are not
//! stored at all; they appear only in the `imports` catalog.
//!
//! All maps are [`BTreeMap`]s so iteration, canonical JSON, and
//! [`Graph::digest`] are deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::schema::{Class, FieldShape, FieldSpec};
use super::types::{NodeId, PackageId};
use super::value::{EMPTY_LIST, EMPTY_MAP, NULL, Value};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// An identity-bearing record of a fixed class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity shared across branches.
    pub id: NodeId,
    /// The node's class; fixes its field table.
    pub class: Class,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl Node {
    /// Create a node with every declared field at its shape default.
    #[must_use]
    pub fn new(id: NodeId, class: Class) -> Self {
        let fields = class
            .fields()
            .iter()
            .map(|spec| (spec.name.to_owned(), default_value(spec.shape)))
            .collect();
        Self { id, class, fields }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value.into());
        self
    }

    /// Read a field, falling back to its shape default when absent.
    #[must_use]
    pub fn get(&self, field: &str) -> &Value {
        if let Some(v) = self.fields.get(field) {
            return v;
        }
        match self.class.field(field).map(|s| s.shape) {
            Some(FieldShape::Map) => &EMPTY_MAP,
            Some(shape) if shape.is_list() => &EMPTY_LIST,
            _ => &NULL,
        }
    }

    /// Write a field without schema validation. Returns the previous value.
    pub fn set(&mut self, field: &str, value: Value) -> Option<Value> {
        self.fields.insert(field.to_owned(), value)
    }

    /// The node's `name`, when it has a string one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("name").as_str()
    }

    /// Iterate declared fields in schema order with their current values.
    pub fn entries(&self) -> impl Iterator<Item = (&'static FieldSpec, &Value)> {
        self.class.fields().iter().map(|spec| (spec, self.get(spec.name)))
    }

    /// Owned children in schema-field order, then list order.
    #[must_use]
    pub fn owned_children(&self) -> Vec<(&'static FieldSpec, NodeId)> {
        self.entries()
            .filter(|(spec, _)| spec.shape.is_owned())
            .flat_map(|(spec, v)| v.ref_ids().into_iter().map(move |id| (spec, id)))
            .collect()
    }

    /// Weak reference targets in schema-field order.
    #[must_use]
    pub fn weak_targets(&self) -> Vec<(&'static FieldSpec, NodeId)> {
        self.entries()
            .filter(|(spec, _)| spec.shape.is_weak())
            .flat_map(|(spec, v)| v.ref_ids().into_iter().map(move |id| (spec, id)))
            .collect()
    }

    /// `true` for entities registered from host code: a component or token
    /// whose identity is its name rather than its id.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.get("registered").as_bool() == Some(true)
    }

    /// Fill any missing declared field with its default.
    pub fn normalize(&mut self) {
        for spec in self.class.fields() {
            self.fields
                .entry(spec.name.to_owned())
                .or_insert_with(|| default_value(spec.shape));
        }
    }

    fn undeclared_field(&self) -> Option<&str> {
        self.fields
            .keys()
            .find(|k| self.class.field(k).is_none())
            .map(String::as_str)
    }
}

/// The default value for a field shape.
#[must_use]
pub fn default_value(shape: FieldShape) -> Value {
    match shape {
        FieldShape::Map => Value::Map(BTreeMap::new()),
        s if s.is_list() => Value::List(Vec::new()),
        _ => Value::Null,
    }
}

/// `true` if `value` is storable in a field of `shape`.
#[must_use]
pub fn value_fits(shape: FieldShape, value: &Value) -> bool {
    let scalar = |v: &Value| {
        matches!(
            v,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_)
        )
    };
    match shape {
        FieldShape::Scalar => scalar(value),
        FieldShape::Code => matches!(value, Value::Null | Value::Str(_)),
        FieldShape::Map => value.as_map().is_some_and(|m| m.values().all(scalar)),
        FieldShape::ScalarList(_) => {
            matches!(value, Value::List(items) if items.iter().all(scalar))
        }
        FieldShape::Weak(_) | FieldShape::Owned => matches!(value, Value::Null | Value::Ref(_)),
        FieldShape::WeakList(..) | FieldShape::OwnedList(..) => {
            matches!(value, Value::List(items) if items.iter().all(|v| v.as_ref_id().is_some()))
        }
    }
}

// ---------------------------------------------------------------------------
// Placement / OwnerIndex
// ---------------------------------------------------------------------------

/// Where a node is owned: the owning node and the owned field holding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Placement {
    /// The owning node.
    pub parent: NodeId,
    /// The owned field on the parent.
    pub field: &'static str,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.field)
    }
}

/// Child → owner lookup table for one graph.
#[derive(Clone, Debug, Default)]
pub struct OwnerIndex {
    owners: BTreeMap<NodeId, Placement>,
    duplicates: Vec<(NodeId, Placement)>,
}

impl OwnerIndex {
    /// The owner of `id`, if it is owned.
    #[must_use]
    pub fn owner(&self, id: NodeId) -> Option<Placement> {
        self.owners.get(&id).copied()
    }

    /// Extra owning edges beyond the first one seen for a child.
    #[must_use]
    pub fn duplicates(&self) -> &[(NodeId, Placement)] {
        &self.duplicates
    }

    /// Owner chain of `id`, nearest first. Stops on cycles or after
    /// `max_depth` steps.
    #[must_use]
    pub fn ancestors(&self, id: NodeId, max_depth: usize) -> Vec<Placement> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut cur = id;
        while let Some(p) = self.owner(cur) {
            if out.len() >= max_depth || !seen.insert(p.parent) {
                break;
            }
            out.push(p);
            cur = p.parent;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A document snapshot: a rooted arena of nodes plus an import catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    root: NodeId,
    nodes: BTreeMap<NodeId, Node>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    imports: BTreeMap<NodeId, PackageId>,
    /// Import → id of the same node inside its package, when it differs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    import_sources: BTreeMap<NodeId, NodeId>,
}

impl Graph {
    /// A graph holding a single empty `Site` root.
    #[must_use]
    pub fn new_site(root: NodeId) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root, Node::new(root, Class::Site));
        Self {
            root,
            nodes,
            imports: BTreeMap::new(),
            import_sources: BTreeMap::new(),
        }
    }

    /// The root node id.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look up a node mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// `true` if `id` is stored in this graph.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// The class of `id`, if present.
    #[must_use]
    pub fn class_of(&self, id: NodeId) -> Option<Class> {
        self.nodes.get(&id).map(|n| n.class)
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if the arena is empty (never the case for a valid graph).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All node ids in order.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Insert or replace a node without attaching it anywhere.
    pub fn insert(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id, node)
    }

    /// Remove a single node from the arena. Owning edges pointing at it are
    /// left untouched.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    // -- imports -------------------------------------------------------------

    /// Register `id` as a node of an external package.
    pub fn import(&mut self, id: NodeId, package: PackageId) {
        self.imports.insert(id, package);
    }

    /// The external import catalog.
    #[must_use]
    pub const fn imports(&self) -> &BTreeMap<NodeId, PackageId> {
        &self.imports
    }

    /// Register `id` as the local copy of node `source` of `package`.
    ///
    /// Each version of a package is imported under fresh local ids; the
    /// source id ties the copies of one package node together.
    pub fn import_from(&mut self, id: NodeId, package: PackageId, source: NodeId) {
        self.imports.insert(id, package);
        if source == id {
            self.import_sources.remove(&id);
        } else {
            self.import_sources.insert(id, source);
        }
    }

    /// Id of an import inside its package (the import's own id by default).
    #[must_use]
    pub fn import_source(&self, id: NodeId) -> NodeId {
        self.import_sources.get(&id).copied().unwrap_or(id)
    }

    /// The import of `package` whose source is `source`, if catalogued.
    #[must_use]
    pub fn find_import(&self, package: &PackageId, source: NodeId) -> Option<NodeId> {
        self.imports
            .iter()
            .find(|(id, pkg)| *pkg == package && self.import_source(**id) == source)
            .map(|(id, _)| *id)
    }

    /// Add every import of `other` to this catalog.
    pub fn extend_imports(&mut self, other: &Self) {
        self.imports
            .extend(other.imports.iter().map(|(k, v)| (*k, v.clone())));
        self.import_sources
            .extend(other.import_sources.iter().map(|(k, v)| (*k, *v)));
    }

    /// Packages listed in the root's `dependencies`.
    #[must_use]
    pub fn declared_packages(&self) -> BTreeSet<PackageId> {
        self.get(self.root)
            .map(|root| {
                root.get("dependencies")
                    .as_list()
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PackageId::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `true` if a weak reference to `target` is satisfiable: the node is
    /// stored here, or it is an import of a declared package.
    #[must_use]
    pub fn resolves(&self, target: NodeId, declared: &BTreeSet<PackageId>) -> bool {
        self.contains(target)
            || self
                .imports
                .get(&target)
                .is_some_and(|pkg| declared.contains(pkg))
    }

    // -- editing -------------------------------------------------------------

    /// Set a field after checking it is declared and the value fits its shape.
    ///
    /// # Errors
    /// Returns an error for unknown nodes, undeclared fields, or ill-shaped values.
    pub fn set_field(
        &mut self,
        id: NodeId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, GraphError> {
        let value = value.into();
        let node = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        let spec = node
            .class
            .field(field)
            .ok_or_else(|| GraphError::UnknownField {
                class: node.class,
                field: field.to_owned(),
            })?;
        if !value_fits(spec.shape, &value) {
            return Err(GraphError::ShapeMismatch {
                node: id,
                field: field.to_owned(),
                detail: format!("{value} does not fit {:?}", spec.shape),
            });
        }
        Ok(node.set(field, value))
    }

    /// Insert `node` and append it to the owned field `field` of `parent`.
    ///
    /// # Errors
    /// Returns an error if the parent or field is invalid, the node id is
    /// already used, or a single-child field is already occupied.
    pub fn attach(
        &mut self,
        parent: NodeId,
        field: &str,
        node: Node,
    ) -> Result<NodeId, GraphError> {
        let id = node.id;
        if self.contains(id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let len = self
            .get(parent)
            .map_or(0, |p| p.get(field).as_list().len());
        self.check_owned(parent, field)?;
        self.nodes.insert(id, node);
        if let Err(e) = self.insert_child(parent, field, len, id) {
            self.nodes.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Place an already-stored, currently unowned node into an owned field at
    /// `index` (clamped to the list length).
    ///
    /// # Errors
    /// Returns an error if the field is not owned or a single slot is occupied.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        field: &str,
        index: usize,
        child: NodeId,
    ) -> Result<(), GraphError> {
        if !self.contains(child) {
            return Err(GraphError::UnknownNode(child));
        }
        let shape = self.check_owned(parent, field)?;
        let node = self
            .nodes
            .get_mut(&parent)
            .ok_or(GraphError::UnknownNode(parent))?;
        match shape {
            FieldShape::Owned => {
                if !node.get(field).is_null() {
                    return Err(GraphError::SlotOccupied {
                        parent,
                        field: field.to_owned(),
                    });
                }
                node.set(field, Value::Ref(child));
            }
            _ => {
                let mut items = node.get(field).as_list().to_vec();
                items.insert(index.min(items.len()), Value::Ref(child));
                node.set(field, Value::List(items));
            }
        }
        Ok(())
    }

    /// Remove `child` from its owner's field. The node stays in the arena.
    ///
    /// # Errors
    /// Returns an error if `child` is not owned by any node.
    pub fn detach(&mut self, child: NodeId) -> Result<Placement, GraphError> {
        let placement = self
            .owner_index()
            .owner(child)
            .ok_or(GraphError::NotAttached(child))?;
        if let Some(parent) = self.nodes.get_mut(&placement.parent) {
            let updated = match parent.get(placement.field) {
                Value::Ref(_) => Value::Null,
                other => Value::List(
                    other
                        .as_list()
                        .iter()
                        .filter(|v| v.as_ref_id() != Some(child))
                        .cloned()
                        .collect(),
                ),
            };
            parent.set(placement.field, updated);
        }
        Ok(placement)
    }

    /// Detach `id` (if owned) and remove it with its owned subtree.
    /// Returns the removed ids in pre-order.
    ///
    /// # Errors
    /// Returns an error if `id` is not stored or is the root.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        if !self.contains(id) || id == self.root {
            return Err(GraphError::UnknownNode(id));
        }
        // Unowned nodes (orphans) are removed as-is.
        let _ = self.detach(id);
        let removed = self.subtree(id);
        for r in &removed {
            self.nodes.remove(r);
        }
        Ok(removed)
    }

    fn check_owned(&self, parent: NodeId, field: &str) -> Result<FieldShape, GraphError> {
        let node = self.get(parent).ok_or(GraphError::UnknownNode(parent))?;
        let spec = node
            .class
            .field(field)
            .ok_or_else(|| GraphError::UnknownField {
                class: node.class,
                field: field.to_owned(),
            })?;
        if !spec.shape.is_owned() {
            return Err(GraphError::NotOwning {
                class: node.class,
                field: field.to_owned(),
            });
        }
        Ok(spec.shape)
    }

    // -- traversal -----------------------------------------------------------

    /// Build the child → owner index over every stored node.
    #[must_use]
    pub fn owner_index(&self) -> OwnerIndex {
        let mut index = OwnerIndex::default();
        for node in self.nodes.values() {
            for (spec, child) in node.owned_children() {
                let placement = Placement {
                    parent: node.id,
                    field: spec.name,
                };
                if index.owners.contains_key(&child) {
                    index.duplicates.push((child, placement));
                } else {
                    index.owners.insert(child, placement);
                }
            }
        }
        index
    }

    /// Ids reachable from the root over owning edges.
    #[must_use]
    pub fn reachable(&self) -> BTreeSet<NodeId> {
        self.subtree(self.root).into_iter().collect()
    }

    /// Pre-order ids of the owned subtree rooted at `id` (present nodes only).
    /// Each node is visited once even if owning edges form a cycle.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.get(cur) else { continue };
            if !seen.insert(cur) {
                continue;
            }
            out.push(cur);
            let children = node.owned_children();
            for (_, child) in children.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    // -- schema --------------------------------------------------------------

    /// Check every stored node against its class's field table.
    ///
    /// # Errors
    /// Returns the first undeclared field or ill-shaped value found.
    pub fn check_schema(&self) -> Result<(), GraphError> {
        match self.get(self.root) {
            Some(n) if n.class == Class::Site => {}
            _ => return Err(GraphError::UnknownNode(self.root)),
        }
        for node in self.nodes.values() {
            if let Some(field) = node.undeclared_field() {
                return Err(GraphError::UnknownField {
                    class: node.class,
                    field: field.to_owned(),
                });
            }
            for (spec, value) in node.entries() {
                if !value_fits(spec.shape, value) {
                    return Err(GraphError::ShapeMismatch {
                        node: node.id,
                        field: spec.name.to_owned(),
                        detail: format!("{value} does not fit {:?}", spec.shape),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fill missing declared fields on every node with their defaults.
    pub fn normalize(&mut self) {
        for node in self.nodes.values_mut() {
            node.normalize();
        }
    }

    // -- serialization -------------------------------------------------------

    /// Canonical JSON: deterministic key order, no insignificant whitespace.
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// SHA-256 hex digest of the canonical JSON.
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let hash = Sha256::digest(&bytes);
        Ok(hash.iter().map(|b| format!("{b:02x}")).collect())
    }
}

// ---------------------------------------------------------------------------
// GraphError
// ---------------------------------------------------------------------------

/// Errors from graph editing and schema checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// No node with this id is stored (or it is the root where not allowed).
    UnknownNode(NodeId),
    /// A node with this id is already stored.
    DuplicateNode(NodeId),
    /// The class does not declare this field.
    UnknownField {
        /// Node class.
        class: Class,
        /// Offending field name.
        field: String,
    },
    /// The field exists but does not own its targets.
    NotOwning {
        /// Node class.
        class: Class,
        /// Offending field name.
        field: String,
    },
    /// The value does not fit the field's declared shape.
    ShapeMismatch {
        /// Node holding the value.
        node: NodeId,
        /// Field name.
        field: String,
        /// What was wrong.
        detail: String,
    },
    /// A single-child owned field already holds a child.
    SlotOccupied {
        /// Owning node.
        parent: NodeId,
        /// Field name.
        field: String,
    },
    /// The node has no owner.
    NotAttached(NodeId),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(id) => write!(f, "unknown node {id}"),
            Self::DuplicateNode(id) => write!(f, "node {id} already exists"),
            Self::UnknownField { class, field } => {
                write!(f, "{class} has no field `{field}`")
            }
            Self::NotOwning { class, field } => {
                write!(f, "{class}.{field} is not an owning field")
            }
            Self::ShapeMismatch {
                node,
                field,
                detail,
            } => write!(f, "{node}.{field}: {detail}"),
            Self::SlotOccupied { parent, field } => {
                write!(f, "{parent}.{field} already holds a child")
            }
            Self::NotAttached(id) => write!(f, "node {id} has no owner"),
        }
    }
}

impl std::error::Error for GraphError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn sample() -> Graph {
        let mut g = Graph::new_site(id(1));
        g.attach(
            id(1),
            "components",
            Node::new(id(10), Class::Component).with("name", "Button"),
        )
        .unwrap();
        g.attach(id(10), "tpl_tree", Node::new(id(11), Class::TplTag))
            .unwrap();
        g.attach(id(11), "children", Node::new(id(12), Class::TplTag))
            .unwrap();
        g.attach(id(11), "children", Node::new(id(13), Class::TplTag))
            .unwrap();
        g
    }

    #[test]
    fn attach_builds_owner_index() {
        let g = sample();
        let owners = g.owner_index();
        assert_eq!(
            owners.owner(id(12)),
            Some(Placement {
                parent: id(11),
                field: "children"
            })
        );
        assert!(owners.duplicates().is_empty());
        assert_eq!(owners.ancestors(id(12), 16).len(), 3);
    }

    #[test]
    fn attach_rejects_occupied_slot_and_weak_field() {
        let mut g = sample();
        let err = g
            .attach(id(10), "tpl_tree", Node::new(id(20), Class::TplTag))
            .unwrap_err();
        assert!(matches!(err, GraphError::SlotOccupied { .. }));
        assert!(!g.contains(id(20)));
        g.attach(id(11), "children", Node::new(id(21), Class::TplSlot))
            .unwrap();
        let err = g
            .attach(id(21), "param", Node::new(id(22), Class::Param))
            .unwrap_err();
        assert!(matches!(err, GraphError::NotOwning { .. }));
    }

    #[test]
    fn detach_and_reinsert_moves_a_node() {
        let mut g = sample();
        g.detach(id(13)).unwrap();
        g.insert_child(id(11), "children", 0, id(13)).unwrap();
        assert_eq!(
            g.get(id(11)).unwrap().get("children"),
            &Value::refs([id(13), id(12)])
        );
    }

    #[test]
    fn remove_subtree_drops_descendants() {
        let mut g = sample();
        let removed = g.remove_subtree(id(11)).unwrap();
        assert_eq!(removed, vec![id(11), id(12), id(13)]);
        assert!(g.get(id(10)).unwrap().get("tpl_tree").is_null());
        assert_eq!(g.reachable(), BTreeSet::from([id(1), id(10)]));
    }

    #[test]
    fn set_field_checks_shape() {
        let mut g = sample();
        assert!(g.set_field(id(10), "name", "Card").is_ok());
        assert!(matches!(
            g.set_field(id(10), "params", "oops"),
            Err(GraphError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            g.set_field(id(10), "colour", "red"),
            Err(GraphError::UnknownField { .. })
        ));
    }

    #[test]
    fn get_returns_shape_defaults_for_missing_fields() {
        let json = format!(
            r#"{{"root":"{r}","nodes":{{"{r}":{{"id":"{r}","class":"site"}}}}}}"#,
            r = id(1)
        );
        let mut g: Graph = serde_json::from_str(&json).unwrap();
        let root = g.get(id(1)).unwrap();
        assert_eq!(root.get("components"), &Value::List(Vec::new()));
        assert_eq!(root.get("default_styles"), &Value::Map(BTreeMap::new()));
        g.normalize();
        assert_eq!(g, Graph::new_site(id(1)));
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let a = sample();
        let b = sample();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        let mut c = sample();
        c.set_field(id(10), "name", "Other").unwrap();
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn resolves_checks_declared_imports() {
        let mut g = sample();
        let ext = id(900);
        g.import(ext, PackageId::new("pkg-a"));
        assert!(!g.resolves(ext, &g.declared_packages()));
        g.set_field(id(1), "dependencies", Value::List(vec![Value::from("pkg-a")]))
            .unwrap();
        assert!(g.resolves(ext, &g.declared_packages()));
    }

    #[test]
    fn imports_of_one_source_are_found_per_version() {
        let mut g = sample();
        g.import_from(id(900), PackageId::new("kit@1"), id(5));
        g.import_from(id(901), PackageId::new("kit@2"), id(5));
        g.import(id(902), PackageId::new("kit@2"));
        assert_eq!(g.import_source(id(901)), id(5));
        assert_eq!(g.import_source(id(902)), id(902));
        assert_eq!(g.find_import(&PackageId::new("kit@2"), id(5)), Some(id(901)));
        assert_eq!(g.find_import(&PackageId::new("kit@3"), id(5)), None);
    }
}
