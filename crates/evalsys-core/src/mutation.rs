//! # Evaluation Mutation
//!
//! The single write boundary for evaluation fields.
//!
//! Every write goes through [`EvaluationMutation`]: the lifecycle state is
//! derived once at `now`, every requested field is checked against the
//! [`ModificationPolicy`], and only when all checks pass are the changes
//! applied. A denied batch leaves the evaluation untouched.
//!
//! The state used for the check is the state *before* the batch. Moving a date
//! in the same batch does not unlock other fields.

use crate::lifecycle::EvaluationState;
use crate::policy::ModificationPolicy;
use crate::{Evaluation, EvaluationChange, EvaluationField, EvalsysError};
use chrono::{DateTime, Utc};

/// Policy-gated writer for evaluations.
#[derive(Debug, Clone, Default)]
pub struct EvaluationMutation {
    policy: ModificationPolicy,
}

impl EvaluationMutation {
    #[must_use]
    pub fn new(policy: ModificationPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &ModificationPolicy {
        &self.policy
    }

    /// Check a single field in `state`.
    pub fn check_field(
        &self,
        state: EvaluationState,
        field: EvaluationField,
    ) -> Result<(), EvalsysError> {
        if self.policy.permits_field(state, field) {
            Ok(())
        } else {
            Err(EvalsysError::ModificationDenied {
                field: field.as_str().to_string(),
                state,
            })
        }
    }

    /// Check every change against the state of `evaluation` at `now`.
    ///
    /// Returns the state on success, or the first denied field.
    pub fn check(
        &self,
        evaluation: &Evaluation,
        changes: &[EvaluationChange],
        now: DateTime<Utc>,
    ) -> Result<EvaluationState, EvalsysError> {
        let state = evaluation.state_at(now);
        for change in changes {
            self.check_field(state, change.field())?;
        }
        Ok(state)
    }

    /// Check, then apply all changes. All-or-nothing.
    pub fn apply(
        &self,
        evaluation: &mut Evaluation,
        changes: &[EvaluationChange],
        now: DateTime<Utc>,
    ) -> Result<EvaluationState, EvalsysError> {
        let state = self.check(evaluation, changes, now)?;
        for change in changes {
            change.apply_to(evaluation);
        }
        Ok(state)
    }
}

// =============================================================================
// TESTS
// =============================================================================
