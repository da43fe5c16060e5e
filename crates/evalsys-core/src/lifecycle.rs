//! # Evaluation Lifecycle
//!
//! Derives the phase of an evaluation from its four configured instants.
//!
//! ## State Ladder
//!
//! | Condition (first match wins) | State |
//! |------------------------------|-------|
//! | any date missing | `Unknown` |
//! | `now < start` | `InQueue` |
//! | `now < due` | `Active` |
//! | `now < stop` | `Due` |
//! | `now < view` | `Closed` |
//! | otherwise | `Viewable` |
//!
//! Each bound is exclusive, so an evaluation enters a phase exactly at the
//! instant configured for it (`now == start` is already `Active`).
//!
//! ## Grace Period
//!
//! The ladder never yields [`EvaluationState::GracePeriod`]. The window between
//! the due date and the stop date is reported as `Due`; responses are still
//! accepted there, which is what the grace period means. The modification
//! policy resolves `Due` to its `GracePeriod` entry (see `policy`). No separate
//! grace-period end instant exists.
//!
//! Malformed date orderings are not rejected: the ladder runs anyway and
//! reports the first condition that matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// STATE ENUM
// =============================================================================

/// Lifecycle phase of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EvaluationState {
    /// Created, not yet started.
    InQueue,
    /// Open for responses.
    Active,
    /// Past the due date, still accepting late responses until the stop date.
    Due,
    /// Named phase of the modification policy; not produced by [`derive_state`].
    GracePeriod,
    /// Stopped, results not yet released.
    Closed,
    /// Results released.
    Viewable,
    /// At least one lifecycle date is missing. Do not act automatically.
    Unknown,
}

impl EvaluationState {
    /// All states in ladder order, `Unknown` last.
    pub const ALL: [EvaluationState; 7] = [
        EvaluationState::InQueue,
        EvaluationState::Active,
        EvaluationState::Due,
        EvaluationState::GracePeriod,
        EvaluationState::Closed,
        EvaluationState::Viewable,
        EvaluationState::Unknown,
    ];

    /// Canonical state name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EvaluationState::InQueue => "InQueue",
            EvaluationState::Active => "Active",
            EvaluationState::Due => "Due",
            EvaluationState::GracePeriod => "GracePeriod",
            EvaluationState::Closed => "Closed",
            EvaluationState::Viewable => "Viewable",
            EvaluationState::Unknown => "Unknown",
        }
    }

    /// Whether respondents may still submit answers.
    #[must_use]
    pub fn accepts_responses(&self) -> bool {
        matches!(
            self,
            EvaluationState::Active | EvaluationState::Due | EvaluationState::GracePeriod
        )
    }

    /// Whether no later phase exists.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationState::Viewable)
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unrecognized state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStateName(pub String);

impl fmt::Display for UnknownStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown evaluation state: {}", self.0)
    }
}

impl std::error::Error for UnknownStateName {}

impl FromStr for EvaluationState {
    type Err = UnknownStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name() == s)
            .ok_or_else(|| UnknownStateName(s.to_string()))
    }
}

// =============================================================================
// STATE DERIVATION
// =============================================================================

/// The four instants that drive the lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationDates {
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
    pub view: Option<DateTime<Utc>>,
}

impl EvaluationDates {
    #[must_use]
    pub fn new(
        start: DateTime<Utc>,
        due: DateTime<Utc>,
        stop: DateTime<Utc>,
        view: DateTime<Utc>,
    ) -> Self {
        Self {
            start: Some(start),
            due: Some(due),
            stop: Some(stop),
            view: Some(view),
        }
    }

    /// State at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> EvaluationState {
        derive_state(now, self.start, self.due, self.stop, self.view)
    }

    /// The instant at which the state after `state` begins, if any.
    ///
    /// Used to find the next transition; `None` for terminal or unknown states.
    #[must_use]
    pub fn next_transition(&self, state: EvaluationState) -> Option<DateTime<Utc>> {
        match state {
            EvaluationState::InQueue => self.start,
            EvaluationState::Active => self.due,
            EvaluationState::Due | EvaluationState::GracePeriod => self.stop,
            EvaluationState::Closed => self.view,
            EvaluationState::Viewable | EvaluationState::Unknown => None,
        }
    }
}

/// Map the evaluation dates and `now` to exactly one state.
///
/// Pure and total: never fails, never reads the clock.
#[must_use]
pub fn derive_state(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    due: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    view: Option<DateTime<Utc>>,
) -> EvaluationState {
    let (Some(start), Some(due), Some(stop), Some(view)) = (start, due, stop, view) else {
        return EvaluationState::Unknown;
    };

    if now < start {
        EvaluationState::InQueue
    } else if now < due {
        EvaluationState::Active
    } else if now < stop {
        EvaluationState::Due
    } else if now < view {
        EvaluationState::Closed
    } else {
        EvaluationState::Viewable
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0)
            .single()
            .expect("valid date")
    }

    fn ladder() -> EvaluationDates {
        let start = t0();
        EvaluationDates::new(
            start,
            start + Duration::days(7),
            start + Duration::days(8),
            start + Duration::days(30),
        )
    }

    #[test]
    fn boundaries_enter_next_phase() {
        let dates = ladder();
        let (start, due, stop, view) = (
            dates.start.expect("start"),
            dates.due.expect("due"),
            dates.stop.expect("stop"),
            dates.view.expect("view"),
        );

        assert_eq!(
            dates.state_at(start - Duration::seconds(1)),
            EvaluationState::InQueue
        );
        assert_eq!(dates.state_at(start), EvaluationState::Active);
        assert_eq!(dates.state_at(due), EvaluationState::Due);
        assert_eq!(dates.state_at(stop), EvaluationState::Closed);
        assert_eq!(dates.state_at(view), EvaluationState::Viewable);
    }

    #[test]
    fn any_missing_date_is_unknown() {
        let full = ladder();
        let now = t0();

        for mask in 0..4 {
            let mut dates = full;
            match mask {
                0 => dates.start = None,
                1 => dates.due = None,
                2 => dates.stop = None,
                _ => dates.view = None,
            }
            assert_eq!(dates.state_at(now), EvaluationState::Unknown);
        }
    }

    #[test]
    fn reversed_dates_still_produce_a_state() {
        // due before start: the ladder reports the first match
        let start = t0();
        let state = derive_state(
            start,
            Some(start),
            Some(start - Duration::days(1)),
            Some(start + Duration::days(1)),
            Some(start + Duration::days(2)),
        );
        assert_eq!(state, EvaluationState::Due);
    }

    #[test]
    fn grace_period_is_never_derived() {
        let dates = ladder();
        let start = dates.start.expect("start");
        for hours in (-48..(40 * 24)).step_by(7) {
            let state = dates.state_at(start + Duration::hours(hours));
            assert_ne!(state, EvaluationState::GracePeriod);
        }
    }

    #[test]
    fn names_parse_back() {
        for state in EvaluationState::ALL {
            assert_eq!(state.name().parse::<EvaluationState>(), Ok(state));
        }
        assert!("Archived".parse::<EvaluationState>().is_err());
    }

    #[test]
    fn next_transition_follows_ladder() {
        let dates = ladder();
        assert_eq!(dates.next_transition(EvaluationState::InQueue), dates.start);
        assert_eq!(dates.next_transition(EvaluationState::Due), dates.stop);
        assert_eq!(dates.next_transition(EvaluationState::Viewable), None);
    }

    #[test]
    fn responses_accepted_only_while_open() {
        assert!(EvaluationState::Active.accepts_responses());
        assert!(EvaluationState::Due.accepts_responses());
        assert!(!EvaluationState::InQueue.accepts_responses());
        assert!(!EvaluationState::Closed.accepts_responses());
        assert!(EvaluationState::Viewable.is_terminal());
    }
}
