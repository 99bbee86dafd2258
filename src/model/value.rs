//! Field values stored on document nodes.
//!
//! A [`Value`] is shape-agnostic: whether a `Ref` owns its target or merely
//! points at it is decided by the field's schema entry, not by the value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::NodeId;

/// A single field value.
///
/// Ordering and equality are structural, which keeps sets of values and
/// canonical serialization deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Absent / unset.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// String scalar (also used for code fields).
    Str(String),
    /// Reference to another node by identity.
    Ref(NodeId),
    /// Ordered list of values.
    List(Vec<Self>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Self>),
}

pub(crate) static NULL: Value = Value::Null;
pub(crate) static EMPTY_LIST: Value = Value::List(Vec::new());
pub(crate) static EMPTY_MAP: Value = Value::Map(BTreeMap::new());

impl Value {
    /// Build a list of references.
    #[must_use]
    pub fn refs(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self::List(ids.into_iter().map(Self::Ref).collect())
    }

    /// `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The referenced id, if this is a single reference.
    #[must_use]
    pub const fn as_ref_id(&self) -> Option<NodeId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// List elements; empty for non-lists.
    #[must_use]
    pub fn as_list(&self) -> &[Self] {
        match self {
            Self::List(items) => items,
            _ => &[],
        }
    }

    /// Map entries, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Every node id referenced directly by this value (one level of list).
    #[must_use]
    pub fn ref_ids(&self) -> Vec<NodeId> {
        match self {
            Self::Ref(id) => vec![*id],
            Self::List(items) => items.iter().filter_map(Self::as_ref_id).collect(),
            _ => Vec::new(),
        }
    }

    /// Replace every reference to `from` with `to`. Returns `true` if changed.
    pub fn redirect(&mut self, from: NodeId, to: NodeId) -> bool {
        match self {
            Self::Ref(id) if *id == from => {
                *id = to;
                true
            }
            Self::List(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    changed |= item.redirect(from, to);
                }
                if changed {
                    dedup_preserving_order(items);
                }
                changed
            }
            _ => false,
        }
    }
}

/// Remove later duplicates, keeping first occurrences in place.
fn dedup_preserving_order(items: &mut Vec<Value>) {
    let mut seen = std::collections::BTreeSet::new();
    items.retain(|v| seen.insert(v.clone()));
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ref(id) => write!(f, "@{id}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k:?}:{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Self::Ref(id)
    }
}
