//! docmerge library crate.
//!
//! A three-way merge engine for identity-bearing design documents. Callers
//! hand in an ancestor snapshot and two branch snapshots; the engine returns
//! either a merged document with a log of every automatic repair, or the set
//! of conflicts a human must pick a side for.

pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod telemetry;

pub use config::MergeConfig;
pub use error::MergeError;
pub use merge::{
    ConflictKey, MergeOutcome, MergePhase, MergedDocument, Merger, PendingConflicts,
    Reconciliation, Resolution, merge,
};
pub use model::{Class, Graph, Node, NodeId, PackageId, Side, Value};
