//! Merge error types.
//!
//! Defines [`MergeError`], the error type for every fatal merge outcome.
//! Conflicts are *not* errors: they come back as
//! [`MergeOutcome::NeedsResolution`](crate::merge::MergeOutcome). What lands
//! here is a precondition violation (inputs not derived from a common
//! ancestor, a malformed resolution map) or a post-merge invariant that
//! reconciliation could not repair. Each message says what went wrong and how
//! a caller should react.

use std::fmt;

use crate::merge::conflict::ConflictKey;
use crate::merge::validate::InvariantViolation;
use crate::model::{GraphError, NodeId};

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Fatal merge failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeError {
    /// A branch does not derive from the ancestor: a reused identity changed
    /// class, or the document root differs.
    NotDerived {
        /// The offending node.
        node: NodeId,
        /// What mismatched.
        detail: String,
    },

    /// The destination seed is not a structural copy of the ancestor.
    SeedMismatch,

    /// An input graph violates the node schema.
    MalformedGraph(GraphError),

    /// A resolution map was supplied but lacks a pick for an encountered
    /// conflict.
    MissingPick {
        /// The conflict key with no pick.
        key: ConflictKey,
    },

    /// Strict pick checking found keys that match no conflict.
    UnknownPicks {
        /// The unmatched keys, sorted.
        keys: Vec<ConflictKey>,
    },

    /// The merged document still violates structural invariants after
    /// reconciliation. The merge fails closed.
    InvariantViolated {
        /// Every violation found.
        violations: Vec<InvariantViolation>,
    },
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDerived { node, detail } => {
                write!(
                    f,
                    "branch is not derived from the ancestor at node {node}: {detail}\n  To fix: merge against the lowest common ancestor revision of both branches."
                )
            }
            Self::SeedMismatch => {
                write!(
                    f,
                    "destination seed differs from the ancestor.\n  To fix: seed the destination with a structural copy of the ancestor."
                )
            }
            Self::MalformedGraph(err) => {
                write!(
                    f,
                    "input graph is malformed: {err}\n  To fix: re-export the document snapshot; the serializer produced an invalid graph."
                )
            }
            Self::MissingPick { key } => {
                write!(
                    f,
                    "resolution map has no pick for conflict '{key}'.\n  To fix: supply a side for every conflict reported by the previous run."
                )
            }
            Self::UnknownPicks { keys } => {
                write!(f, "resolution map has {} unknown key(s):", keys.len())?;
                for k in keys {
                    write!(f, "\n  - {k}")?;
                }
                write!(
                    f,
                    "\n  To fix: only submit keys reported for this (ancestor, left, right) triple."
                )
            }
            Self::InvariantViolated { violations } => {
                write!(
                    f,
                    "merged document violates {} invariant(s):",
                    violations.len()
                )?;
                for v in violations {
                    write!(f, "\n  - {v}")?;
                }
                write!(
                    f,
                    "\n  The merge was aborted; no document was produced. This is an engine defect."
                )
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedGraph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for MergeError {
    fn from(err: GraphError) -> Self {
        Self::MalformedGraph(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_derived() {
        let err = MergeError::NotDerived {
            node: NodeId::from_u128(7),
            detail: "class changed from TplTag to TplSlot".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("00000000-0000-0000-0000-000000000007"));
        assert!(msg.contains("class changed"));
        assert!(msg.contains("To fix"));
    }

    #[test]
    fn display_missing_pick() {
        let err = MergeError::MissingPick {
            key: ConflictKey::new("move:abc"),
        };
        assert!(err.to_string().contains("'move:abc'"));
    }

    #[test]
    fn display_unknown_picks_lists_keys() {
        let err = MergeError::UnknownPicks {
            keys: vec![ConflictKey::new("a"), ConflictKey::new("b")],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 unknown"));
        assert!(msg.contains("\n  - a"));
        assert!(msg.contains("\n  - b"));
    }

    #[test]
    fn malformed_graph_has_source() {
        let err: MergeError = GraphError::UnknownNode(NodeId::from_u128(1)).into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
