//! # Core Type Definitions
//!
//! This module contains the core types shared across Evalsys:
//! - Identifiers (`EvaluationId`, `NodeId`, `EvalGroupId`, `UserId`, `Permission`)
//! - The evaluation snapshot (`Evaluation`, `EvaluationDraft`)
//! - Field names and field writes (`EvaluationField`, `EvaluationChange`)
//! - Externally provided groups (`EvalGroup`)
//! - Error types (`EvalsysError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier types implement `Ord` so they can key `BTreeMap`/`BTreeSet`.
//! Iteration order of every collection in the core is therefore stable.

use crate::lifecycle::{self, EvaluationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub u64);

/// Unique identifier of a hierarchy node, scoped to one hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of an externally resolved evaluation group (e.g. a course site).
    EvalGroupId
);
string_id!(
    /// Identifier of a user, as issued by the external user directory.
    UserId
);
string_id!(
    /// Opaque capability token checked against a user at a hierarchy node.
    Permission
);

// =============================================================================
// EVALUATION GROUP
// =============================================================================

/// An opaque, externally owned collection of users.
///
/// The hierarchy only references groups as leaves attached beneath nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalGroup {
    pub id: EvalGroupId,
    pub title: String,
    pub group_type: String,
}

impl EvalGroup {
    #[must_use]
    pub fn new(id: EvalGroupId, title: impl Into<String>, group_type: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            group_type: group_type.into(),
        }
    }
}

// =============================================================================
// EVALUATION FIELDS
// =============================================================================

/// Named fields of an evaluation, as understood by the modification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvaluationField {
    Title,
    Instructions,
    StartDate,
    DueDate,
    StopDate,
    ViewDate,
    ReminderDays,
    ResultsPrivate,
    InstructorsDate,
    StudentsDate,
    /// Pseudo-field covering node and group assignment.
    Assignments,
}

impl EvaluationField {
    /// All known fields in declaration order.
    pub const ALL: [EvaluationField; 11] = [
        EvaluationField::Title,
        EvaluationField::Instructions,
        EvaluationField::StartDate,
        EvaluationField::DueDate,
        EvaluationField::StopDate,
        EvaluationField::ViewDate,
        EvaluationField::ReminderDays,
        EvaluationField::ResultsPrivate,
        EvaluationField::InstructorsDate,
        EvaluationField::StudentsDate,
        EvaluationField::Assignments,
    ];

    /// The field name used in policy tables.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationField::Title => "title",
            EvaluationField::Instructions => "instructions",
            EvaluationField::StartDate => "startDate",
            EvaluationField::DueDate => "dueDate",
            EvaluationField::StopDate => "stopDate",
            EvaluationField::ViewDate => "viewDate",
            EvaluationField::ReminderDays => "reminderDays",
            EvaluationField::ResultsPrivate => "resultsPrivate",
            EvaluationField::InstructorsDate => "instructorsDate",
            EvaluationField::StudentsDate => "studentsDate",
            EvaluationField::Assignments => "assignments",
        }
    }
}

impl fmt::Display for EvaluationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationField {
    type Err = EvalsysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| EvalsysError::InvalidInput(format!("Unknown evaluation field: {s}")))
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Snapshot of an evaluation as seen by the core.
///
/// The expected ordering `start <= due <= stop <= view` is not enforced.
/// A missing date collapses the lifecycle to [`EvaluationState::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub title: String,
    pub owner: UserId,
    pub instructions: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub stop_date: Option<DateTime<Utc>>,
    pub view_date: Option<DateTime<Utc>>,
    pub students_date: Option<DateTime<Utc>>,
    pub instructors_date: Option<DateTime<Utc>>,
    pub reminder_days: u32,
    pub results_private: bool,
    pub assigned_nodes: BTreeSet<NodeId>,
    pub assigned_groups: BTreeSet<EvalGroupId>,
}

impl Evaluation {
    /// Build an evaluation from a draft, with no assignments yet.
    #[must_use]
    pub fn from_draft(id: EvaluationId, draft: EvaluationDraft) -> Self {
        Self {
            id,
            title: draft.title,
            owner: draft.owner,
            instructions: draft.instructions,
            start_date: draft.start_date,
            due_date: draft.due_date,
            stop_date: draft.stop_date,
            view_date: draft.view_date,
            students_date: draft.students_date,
            instructors_date: draft.instructors_date,
            reminder_days: draft.reminder_days,
            results_private: draft.results_private,
            assigned_nodes: BTreeSet::new(),
            assigned_groups: BTreeSet::new(),
        }
    }

    /// Lifecycle state of this evaluation at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> EvaluationState {
        lifecycle::derive_state(
            now,
            self.start_date,
            self.due_date,
            self.stop_date,
            self.view_date,
        )
    }
}

/// Caller-supplied data for creating an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationDraft {
    pub title: String,
    pub owner: UserId,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub students_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub instructors_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_days: u32,
    #[serde(default)]
    pub results_private: bool,
}

// =============================================================================
// EVALUATION CHANGES
// =============================================================================

/// A single pending write to an evaluation field.
///
/// Serialized as `{"field": "<name>", "value": ...}` using the policy names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum EvaluationChange {
    Title(String),
    Instructions(Option<String>),
    StartDate(Option<DateTime<Utc>>),
    DueDate(Option<DateTime<Utc>>),
    StopDate(Option<DateTime<Utc>>),
    ViewDate(Option<DateTime<Utc>>),
    ReminderDays(u32),
    ResultsPrivate(bool),
    InstructorsDate(Option<DateTime<Utc>>),
    StudentsDate(Option<DateTime<Utc>>),
}

impl EvaluationChange {
    /// The field this change writes.
    #[must_use]
    pub fn field(&self) -> EvaluationField {
        match self {
            EvaluationChange::Title(_) => EvaluationField::Title,
            EvaluationChange::Instructions(_) => EvaluationField::Instructions,
            EvaluationChange::StartDate(_) => EvaluationField::StartDate,
            EvaluationChange::DueDate(_) => EvaluationField::DueDate,
            EvaluationChange::StopDate(_) => EvaluationField::StopDate,
            EvaluationChange::ViewDate(_) => EvaluationField::ViewDate,
            EvaluationChange::ReminderDays(_) => EvaluationField::ReminderDays,
            EvaluationChange::ResultsPrivate(_) => EvaluationField::ResultsPrivate,
            EvaluationChange::InstructorsDate(_) => EvaluationField::InstructorsDate,
            EvaluationChange::StudentsDate(_) => EvaluationField::StudentsDate,
        }
    }

    /// Write this change into the evaluation. Performs no policy check.
    pub fn apply_to(&self, evaluation: &mut Evaluation) {
        match self {
            EvaluationChange::Title(v) => evaluation.title.clone_from(v),
            EvaluationChange::Instructions(v) => evaluation.instructions.clone_from(v),
            EvaluationChange::StartDate(v) => evaluation.start_date = *v,
            EvaluationChange::DueDate(v) => evaluation.due_date = *v,
            EvaluationChange::StopDate(v) => evaluation.stop_date = *v,
            EvaluationChange::ViewDate(v) => evaluation.view_date = *v,
            EvaluationChange::ReminderDays(v) => evaluation.reminder_days = *v,
            EvaluationChange::ResultsPrivate(v) => evaluation.results_private = *v,
            EvaluationChange::InstructorsDate(v) => evaluation.instructors_date = *v,
            EvaluationChange::StudentsDate(v) => evaluation.students_date = *v,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in Evalsys.
///
/// Lookup misses on read paths are never errors; they surface as `None` or
/// empty collections. The core never panics.
#[derive(Debug, Error)]
pub enum EvalsysError {
    /// The data is in a state that makes the operation impossible
    /// (e.g. no root node, deleting an evaluation that already started).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The requested evaluation does not exist.
    #[error("Evaluation not found: {0}")]
    EvaluationNotFound(EvaluationId),

    /// The requested hierarchy node does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The modification policy forbids writing this field in this state.
    #[error("Field '{field}' cannot be modified while the evaluation is {state}")]
    ModificationDenied {
        field: String,
        state: EvaluationState,
    },

    /// Linking `node` under `parent` would create a cycle.
    #[error("Cycle detected: node {node} cannot be placed under {parent}")]
    CycleDetected { node: NodeId, parent: NodeId },

    /// Caller input could not be interpreted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The notification scheduler rejected an operation.
    #[error("Scheduler error: {0}")]
    SchedulerError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn field_names_round_trip() {
        for field in EvaluationField::ALL {
            let parsed: EvaluationField = field.as_str().parse().expect("parse");
            assert_eq!(parsed, field);
        }
    }

    #[test]
    fn unknown_field_name_rejected() {
        assert!("colour".parse::<EvaluationField>().is_err());
        assert!("".parse::<EvaluationField>().is_err());
    }

    #[test]
    fn change_reports_its_field() {
        assert_eq!(
            EvaluationChange::DueDate(None).field(),
            EvaluationField::DueDate
        );
        assert_eq!(
            EvaluationChange::Title("x".into()).field(),
            EvaluationField::Title
        );
    }

    #[test]
    fn apply_change_writes_field() {
        let mut evaluation = Evaluation::from_draft(
            EvaluationId(1),
            EvaluationDraft {
                title: "Intro to Rust".into(),
                owner: UserId::new("admin"),
                ..EvaluationDraft::default()
            },
        );
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single();

        EvaluationChange::DueDate(due).apply_to(&mut evaluation);
        EvaluationChange::ResultsPrivate(true).apply_to(&mut evaluation);

        assert_eq!(evaluation.due_date, due);
        assert!(evaluation.results_private);
    }

    #[test]
    fn missing_dates_yield_unknown_state() {
        let evaluation = Evaluation::from_draft(EvaluationId(7), EvaluationDraft::default());
        assert_eq!(evaluation.state_at(Utc::now()), EvaluationState::Unknown);
    }
}
