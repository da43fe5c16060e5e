//! # evalsys-core
//!
//! The deterministic evaluation engine for Evalsys.
//!
//! This crate decides three things about teaching evaluations:
//! - which lifecycle phase an evaluation is in at a given instant (`lifecycle`)
//! - which fields may still be edited in that phase (`policy`, `mutation`)
//! - who may act on which part of an organizational hierarchy (`hierarchy`)
//!
//! Around that core it provides notification planning (`scheduling`), an
//! in-process service layer (`session`) and persistence (`formats`, `storage`).
//!
//! ## Architectural Constraints
//!
//! - Time is an input: nothing in this crate reads the clock
//! - BTreeMap/BTreeSet only, so every iteration order is stable
//! - No async, no network dependencies, no global state
//! - Lookup misses are `None`/empty, never errors

// =============================================================================
// MODULES
// =============================================================================

pub mod formats;
pub mod hierarchy;
pub mod lifecycle;
pub mod mutation;
pub mod policy;
pub mod primitives;
pub mod scheduling;
pub mod session;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    EvalGroup, EvalGroupId, Evaluation, EvaluationChange, EvaluationDraft, EvaluationField,
    EvaluationId, EvalsysError, NodeId, Permission, UserId,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use hierarchy::{AccessControl, Hierarchy, HierarchyNode, NodeBindings};
pub use lifecycle::{EvaluationDates, EvaluationState, derive_state};
pub use mutation::EvaluationMutation;
pub use policy::{FieldRule, ModificationPolicy};
pub use scheduling::{
    InMemoryScheduler, JobKind, JobScheduler, NotificationPayload, NotificationPlanner,
    PlannedJob, ReconcileReport, ScheduledJob,
};
pub use session::{Session, SessionStats, StorageBackend, UpdateOutcome};
pub use storage::{RedbStore, StoreWrite};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use formats::{Snapshot, snapshot_checksum, snapshot_from_bytes, snapshot_to_bytes};
