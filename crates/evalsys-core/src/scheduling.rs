//! # Notification Scheduling
//!
//! Plans the notification jobs an evaluation needs and keeps a scheduler in
//! line with that plan.
//!
//! ## Job Kinds
//!
//! | Kind | Fires at | Condition |
//! |------|----------|-----------|
//! | `active` | start date | |
//! | `reminder` | next `start + k * reminder_days` after now | `reminder_days > 0`, before due |
//! | `due` | due date | |
//! | `closed` | stop date | |
//! | `viewable` | view date | results public |
//! | `viewable-instructors` | instructors date | set, results public |
//! | `viewable-students` | students date | set, results public |
//!
//! Only instants strictly after `now` are planned. An evaluation in the
//! `Unknown` state plans nothing: with a date missing the lifecycle cannot be
//! trusted, so no notification is sent automatically.
//!
//! Job ids are `eval-{id}-{kind}`, so at most one job of each kind exists per
//! evaluation and reconciliation is idempotent.

use crate::lifecycle::EvaluationState;
use crate::{Evaluation, EvaluationId, EvalsysError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// JOB KIND
// =============================================================================

/// What a notification job announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Active,
    Reminder,
    Due,
    Closed,
    Viewable,
    ViewableInstructors,
    ViewableStudents,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Active,
        JobKind::Reminder,
        JobKind::Due,
        JobKind::Closed,
        JobKind::Viewable,
        JobKind::ViewableInstructors,
        JobKind::ViewableStudents,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Active => "active",
            JobKind::Reminder => "reminder",
            JobKind::Due => "due",
            JobKind::Closed => "closed",
            JobKind::Viewable => "viewable",
            JobKind::ViewableInstructors => "viewable-instructors",
            JobKind::ViewableStudents => "viewable-students",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable id of the `kind` job for `evaluation`.
#[must_use]
pub fn job_id(evaluation: EvaluationId, kind: JobKind) -> String {
    format!("eval-{evaluation}-{kind}")
}

// =============================================================================
// JOBS
// =============================================================================

/// Data carried by a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub evaluation_id: EvaluationId,
    pub kind: JobKind,
}

/// A job held by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub run_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

/// A job the planner wants to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedJob {
    pub kind: JobKind,
    pub run_at: DateTime<Utc>,
}

// =============================================================================
// SCHEDULER CONTRACT
// =============================================================================

/// The contract Evalsys needs from a job scheduler.
pub trait JobScheduler {
    /// Register a new job. Fails if `job_id` is already scheduled.
    fn schedule(
        &mut self,
        job_id: &str,
        run_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), EvalsysError>;

    /// Move an existing job. Fails if `job_id` is not scheduled.
    fn reschedule(&mut self, job_id: &str, run_at: DateTime<Utc>) -> Result<(), EvalsysError>;

    /// Remove a job. Returns `false` if it was not scheduled.
    fn cancel(&mut self, job_id: &str) -> bool;

    fn job(&self, job_id: &str) -> Option<&ScheduledJob>;

    /// All jobs, in id order.
    fn jobs(&self) -> Vec<&ScheduledJob>;
}

/// In-process scheduler. Jobs are only run when the owner drains them with
/// [`InMemoryScheduler::take_due`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryScheduler {
    jobs: BTreeMap<String, ScheduledJob>,
}

impl InMemoryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove and return every job with `run_at <= now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let due_ids: Vec<String> = self
            .jobs
            .values()
            .filter(|job| job.run_at <= now)
            .map(|job| job.id.clone())
            .collect();

        let mut due: Vec<ScheduledJob> = due_ids
            .iter()
            .filter_map(|id| self.jobs.remove(id))
            .collect();
        due.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Earliest pending run time.
    #[must_use]
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.jobs.values().map(|job| job.run_at).min()
    }
}

impl JobScheduler for InMemoryScheduler {
    fn schedule(
        &mut self,
        job_id: &str,
        run_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), EvalsysError> {
        if self.jobs.contains_key(job_id) {
            return Err(EvalsysError::SchedulerError(format!(
                "Job already scheduled: {job_id}"
            )));
        }
        self.jobs.insert(
            job_id.to_string(),
            ScheduledJob {
                id: job_id.to_string(),
                run_at,
                payload,
            },
        );
        Ok(())
    }

    fn reschedule(&mut self, job_id: &str, run_at: DateTime<Utc>) -> Result<(), EvalsysError> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| EvalsysError::SchedulerError(format!("Job not scheduled: {job_id}")))?;
        job.run_at = run_at;
        Ok(())
    }

    fn cancel(&mut self, job_id: &str) -> bool {
        self.jobs.remove(job_id).is_some()
    }

    fn job(&self, job_id: &str) -> Option<&ScheduledJob> {
        self.jobs.get(job_id)
    }

    fn jobs(&self) -> Vec<&ScheduledJob> {
        self.jobs.values().collect()
    }
}

// =============================================================================
// PLANNER
// =============================================================================

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scheduled: Vec<String>,
    pub rescheduled: Vec<String>,
    pub cancelled: Vec<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.scheduled.is_empty() && self.rescheduled.is_empty() && self.cancelled.is_empty()
    }
}

/// Stateless notification planner.
pub struct NotificationPlanner;

impl NotificationPlanner {
    /// The jobs `evaluation` needs at `now`, ordered by run time.
    #[must_use]
    pub fn plan(evaluation: &Evaluation, now: DateTime<Utc>) -> Vec<PlannedJob> {
        if evaluation.state_at(now) == EvaluationState::Unknown {
            return Vec::new();
        }

        let mut planned = Vec::new();
        let mut push = |kind: JobKind, at: Option<DateTime<Utc>>| {
            if let Some(run_at) = at.filter(|at| *at > now) {
                planned.push(PlannedJob { kind, run_at });
            }
        };

        push(JobKind::Active, evaluation.start_date);
        push(JobKind::Reminder, Self::next_reminder(evaluation, now));
        push(JobKind::Due, evaluation.due_date);
        push(JobKind::Closed, evaluation.stop_date);
        if !evaluation.results_private {
            push(JobKind::Viewable, evaluation.view_date);
            push(JobKind::ViewableInstructors, evaluation.instructors_date);
            push(JobKind::ViewableStudents, evaluation.students_date);
        }

        planned.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.kind.cmp(&b.kind)));
        planned
    }

    /// Next reminder instant strictly after `now`, if one falls before the
    /// due date. Reminders sit on a fixed grid `start + k * reminder_days`
    /// (k >= 1), so re-planning never moves them.
    #[must_use]
    pub fn next_reminder(evaluation: &Evaluation, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if evaluation.reminder_days == 0 {
            return None;
        }
        let (start, due) = (evaluation.start_date?, evaluation.due_date?);
        let interval = Duration::try_days(i64::from(evaluation.reminder_days))?;

        let periods = if now < start {
            1
        } else {
            (now - start)
                .num_seconds()
                .checked_div(interval.num_seconds())?
                .checked_add(1)?
        };
        let offset = interval.checked_mul(i32::try_from(periods).ok()?)?;
        let at = start.checked_add_signed(offset)?;
        (at < due).then_some(at)
    }

    /// Bring `scheduler` in line with the plan for `evaluation`.
    pub fn reconcile<S: JobScheduler + ?Sized>(
        scheduler: &mut S,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, EvalsysError> {
        let desired: BTreeMap<JobKind, DateTime<Utc>> = Self::plan(evaluation, now)
            .into_iter()
            .map(|job| (job.kind, job.run_at))
            .collect();

        let mut report = ReconcileReport::default();
        for kind in JobKind::ALL {
            let id = job_id(evaluation.id, kind);
            let existing = scheduler.job(&id).map(|job| job.run_at);
            match (existing, desired.get(&kind)) {
                (Some(_), None) => {
                    scheduler.cancel(&id);
                    report.cancelled.push(id);
                }
                (Some(current), Some(run_at)) if current != *run_at => {
                    scheduler.reschedule(&id, *run_at)?;
                    report.rescheduled.push(id);
                }
                (None, Some(run_at)) => {
                    let payload = NotificationPayload {
                        evaluation_id: evaluation.id,
                        kind,
                    };
                    scheduler.schedule(&id, *run_at, payload)?;
                    report.scheduled.push(id);
                }
                _ => {}
            }
        }
        Ok(report)
    }

    /// Cancel every job belonging to `evaluation`. Returns the cancelled ids.
    pub fn cancel_all<S: JobScheduler + ?Sized>(
        scheduler: &mut S,
        evaluation: EvaluationId,
    ) -> Vec<String> {
        JobKind::ALL
            .iter()
            .map(|kind| job_id(evaluation, *kind))
            .filter(|id| scheduler.cancel(id))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
