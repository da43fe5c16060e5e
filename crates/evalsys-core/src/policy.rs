//! # Modification Policy
//!
//! Decides whether a field of an evaluation may be written in a given
//! lifecycle state.
//!
//! ## Standard Table
//!
//! | State | Permitted fields |
//! |-------|------------------|
//! | InQueue | all |
//! | Active | dueDate, stopDate, viewDate, reminderDays, resultsPrivate, instructorsDate, studentsDate |
//! | GracePeriod | stopDate, viewDate, resultsPrivate, instructorsDate, studentsDate |
//! | Closed | viewDate, resultsPrivate, instructorsDate, studentsDate |
//! | Viewable | none |
//!
//! ## Lookup Rules
//!
//! 1. A state with an entry uses that entry.
//! 2. `Due` without its own entry uses the `GracePeriod` entry: the due-to-stop
//!    window is the grace period.
//! 3. Any other state without an entry (including `Unknown`) permits every
//!    field. This default is permissive on purpose and kept for compatibility;
//!    an evaluation in an unrecognized state is unrestricted.

use crate::lifecycle::EvaluationState;
use crate::types::EvaluationField;
use std::collections::{BTreeMap, BTreeSet};

/// Field names permitted in every non-wildcard state that still allows edits.
const RESULT_RELEASE_FIELDS: [&str; 3] = ["resultsPrivate", "instructorsDate", "studentsDate"];

// =============================================================================
// FIELD RULE
// =============================================================================

/// What a single table entry permits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// Every field may be modified.
    Any,
    /// Only the named fields may be modified. An empty set denies everything.
    Only(BTreeSet<String>),
}

impl FieldRule {
    /// Build an allow-set rule from field names.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(fields.into_iter().map(Into::into).collect())
    }

    /// A rule that denies every field.
    #[must_use]
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    #[must_use]
    pub fn permits(&self, field: &str) -> bool {
        match self {
            FieldRule::Any => true,
            FieldRule::Only(fields) => fields.contains(field),
        }
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// Immutable state-to-rule table.
///
/// Constructed explicitly and owned by whoever enforces it; there is no
/// process-wide instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationPolicy {
    rules: BTreeMap<EvaluationState, FieldRule>,
}

impl Default for ModificationPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ModificationPolicy {
    /// The standard table described in the module docs.
    #[must_use]
    pub fn standard() -> Self {
        let mut active: Vec<&str> = vec!["dueDate", "stopDate", "viewDate", "reminderDays"];
        active.extend(RESULT_RELEASE_FIELDS);

        let mut grace: Vec<&str> = vec!["stopDate", "viewDate"];
        grace.extend(RESULT_RELEASE_FIELDS);

        let mut closed: Vec<&str> = vec!["viewDate"];
        closed.extend(RESULT_RELEASE_FIELDS);

        Self::empty()
            .with_rule(EvaluationState::InQueue, FieldRule::Any)
            .with_rule(EvaluationState::Active, FieldRule::only(active))
            .with_rule(EvaluationState::GracePeriod, FieldRule::only(grace))
            .with_rule(EvaluationState::Closed, FieldRule::only(closed))
            .with_rule(EvaluationState::Viewable, FieldRule::none())
    }

    /// A table with no entries: every state permits every field.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Return a copy of this table with `state` mapped to `rule`.
    #[must_use]
    pub fn with_rule(mut self, state: EvaluationState, rule: FieldRule) -> Self {
        self.rules.insert(state, rule);
        self
    }

    /// The entry governing `state`, after applying the lookup rules.
    ///
    /// `None` means table miss, which permits everything.
    #[must_use]
    pub fn rule_for(&self, state: EvaluationState) -> Option<&FieldRule> {
        match self.rules.get(&state) {
            Some(rule) => Some(rule),
            None if state == EvaluationState::Due => {
                self.rules.get(&EvaluationState::GracePeriod)
            }
            None => None,
        }
    }

    /// Whether `field` may be written while the evaluation is in `state`.
    ///
    /// Unrecognized field names are simply not members of any allow-set.
    #[must_use]
    pub fn is_modification_permitted(&self, state: EvaluationState, field: &str) -> bool {
        self.rule_for(state).is_none_or(|rule| rule.permits(field))
    }

    /// Typed variant of [`Self::is_modification_permitted`].
    #[must_use]
    pub fn permits_field(&self, state: EvaluationState, field: EvaluationField) -> bool {
        self.is_modification_permitted(state, field.as_str())
    }

    /// Check by state name. A name that is not a known state is a table miss
    /// and therefore permits every field.
    #[must_use]
    pub fn is_modification_permitted_by_name(&self, state: &str, field: &str) -> bool {
        match state.parse::<EvaluationState>() {
            Ok(state) => self.is_modification_permitted(state, field),
            Err(_) => true,
        }
    }

    /// Known fields that may be written in `state`, in declaration order.
    #[must_use]
    pub fn permitted_fields(&self, state: EvaluationState) -> Vec<EvaluationField> {
        EvaluationField::ALL
            .iter()
            .copied()
            .filter(|field| self.permits_field(state, *field))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
