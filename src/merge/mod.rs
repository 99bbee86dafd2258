//! Deterministic three-way merge engine for document graphs.
//!
//! Implements the collect → group → resolve → reconcile pipeline. Each phase
//! is a separate module.
//!
//! - **deps**: upgrade branches pinning an older package version to the
//!   newest pin, before anything is diffed.
//! - **collect**: diff each branch against the ancestor into a [`ChangeSet`].
//! - **partition**: attribute every changed leaf to a conflict group and split
//!   leaves into unique (one side) and shared (both sides).
//! - **resolve** / **structure** / **swap**: seed the destination from the
//!   ancestor, apply leaves, decide ownership placements, fold keyed
//!   duplicates, merge same-named registered components, and rebuild owned
//!   fields.
//! - **cascade**: drop deleted nodes and repair the weak references they held.
//! - **slots**: recompute virtual slot contents.
//! - **reconcile** / **validate**: repair cross-branch invariant breaks and
//!   fail closed on anything left.
//!
//! # Determinism guarantee
//!
//! The same `(ancestor, left, right, picks)` always produces the same merged
//! graph and the same conflict keys:
//!
//! - Nodes, leaves, and groups are visited in identity order (`BTreeMap`).
//! - Conflict keys and derived ids are functions of identities only.
//! - A resolution map re-runs the whole pipeline; nothing is resumed.

pub mod cascade;
pub mod collect;
pub mod conflict;
pub mod context;
pub mod deps;
pub mod engine;
pub mod names;
pub mod ordering;
pub mod partition;
pub mod reconcile;
pub mod registered;
pub mod resolve;
pub mod slots;
pub mod structure;
pub mod swap;
pub mod types;
pub mod validate;

pub use conflict::{
    ConflictKey, GenericConflict, LeafUpdate, PendingConflicts, Resolution, SpecialConflict,
    StructuralOp,
};
pub use engine::{MergeOutcome, MergePhase, MergedDocument, Merger, merge};
pub use reconcile::Reconciliation;
pub use types::{Change, ChangeKind, ChangeSet};
pub use validate::{InvariantViolation, check_invariants};

#[cfg(all(test, feature = "proptests"))]
mod determinism_tests;
