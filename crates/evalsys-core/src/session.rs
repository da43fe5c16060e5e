//! # Session Module
//!
//! The in-process service owning every piece of Evalsys state: evaluations,
//! the hierarchy and its bindings, the notification scheduler and the
//! modification policy.
//!
//! All evaluation writes go through [`EvaluationMutation`], and every write
//! that touches evaluation dates is followed by a scheduler reconciliation.
//! Time is always passed in; the session never reads the clock.
//!
//! ## Storage Backends
//!
//! - `InMemory`: state lives only in the session (fast, volatile unless
//!   exported)
//! - `Persistent`: every mutation is written through to a [`RedbStore`] in one
//!   transaction before it becomes visible in memory

use crate::formats::Snapshot;
use crate::hierarchy::{AccessControl, Hierarchy, HierarchyNode, NodeBindings};
use crate::lifecycle::EvaluationState;
use crate::mutation::EvaluationMutation;
use crate::policy::ModificationPolicy;
use crate::primitives::{
    DEFAULT_HIERARCHY_ID, MAX_QUERY_NODES, MAX_REMINDER_DAYS, MAX_TEXT_LENGTH, MAX_TITLE_LENGTH,
};
use crate::scheduling::{
    InMemoryScheduler, JobScheduler, NotificationPlanner, ReconcileReport, ScheduledJob,
};
use crate::storage::{RedbStore, StoreWrite};
use crate::{
    EvalGroup, EvalGroupId, Evaluation, EvaluationChange, EvaluationDraft, EvaluationField,
    EvaluationId, EvalsysError, NodeId, Permission, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// INPUT VALIDATION
// =============================================================================

fn check_length(label: &str, value: &str, max: usize) -> Result<(), EvalsysError> {
    if value.len() > max {
        return Err(EvalsysError::InvalidInput(format!(
            "{label} exceeds maximum length of {max} bytes"
        )));
    }
    Ok(())
}

fn check_title(label: &str, value: &str) -> Result<(), EvalsysError> {
    if value.trim().is_empty() {
        return Err(EvalsysError::InvalidInput(format!("{label} must not be empty")));
    }
    check_length(label, value, MAX_TITLE_LENGTH)
}

fn check_reminder_days(days: u32) -> Result<(), EvalsysError> {
    if days > MAX_REMINDER_DAYS {
        return Err(EvalsysError::InvalidInput(format!(
            "Reminder interval of {days} days exceeds maximum of {MAX_REMINDER_DAYS}"
        )));
    }
    Ok(())
}

fn check_change(change: &EvaluationChange) -> Result<(), EvalsysError> {
    match change {
        EvaluationChange::Title(title) => check_title("Title", title),
        EvaluationChange::Instructions(Some(text)) => {
            check_length("Instructions", text, MAX_TEXT_LENGTH)
        }
        EvaluationChange::ReminderDays(days) => check_reminder_days(*days),
        _ => Ok(()),
    }
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a Session.
#[derive(Debug, Default)]
pub enum StorageBackend {
    /// State lives only in memory.
    #[default]
    InMemory,
    /// Mutations are written through to redb.
    Persistent(RedbStore),
}

// =============================================================================
// RESULTS
// =============================================================================

/// Outcome of a successful evaluation update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// State the update was checked against.
    pub state: EvaluationState,
    pub jobs: ReconcileReport,
}

/// Counts reported by `/status` and the `status` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub evaluations: usize,
    pub nodes: usize,
    pub groups: usize,
    pub grants: usize,
    pub jobs: usize,
}

// =============================================================================
// SESSION
// =============================================================================

/// Owner of all Evalsys state.
///
/// Session does not implement `Clone`: a redb handle cannot be shared. Use
/// [`Session::snapshot`] to copy the state.
#[derive(Debug)]
pub struct Session {
    hierarchy: Hierarchy,
    bindings: NodeBindings,
    evaluations: BTreeMap<EvaluationId, Evaluation>,
    scheduler: InMemoryScheduler,
    next_evaluation_id: u64,
    mutation: EvaluationMutation,
    backend: StorageBackend,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an empty in-memory session with the standard policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hierarchy_id(DEFAULT_HIERARCHY_ID)
    }

    /// Create an empty in-memory session for the named hierarchy.
    #[must_use]
    pub fn with_hierarchy_id(hierarchy_id: impl Into<String>) -> Self {
        Self {
            hierarchy: Hierarchy::new(hierarchy_id),
            bindings: NodeBindings::new(),
            evaluations: BTreeMap::new(),
            scheduler: InMemoryScheduler::new(),
            next_evaluation_id: 1,
            mutation: EvaluationMutation::default(),
            backend: StorageBackend::InMemory,
        }
    }

    /// Restore an in-memory session from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let next_free = snapshot
            .evaluations
            .keys()
            .last()
            .map_or(1, |id| id.0.saturating_add(1));
        Self {
            hierarchy: snapshot.hierarchy,
            bindings: snapshot.bindings,
            evaluations: snapshot.evaluations,
            scheduler: snapshot.scheduler,
            next_evaluation_id: snapshot.next_evaluation_id.max(next_free),
            mutation: EvaluationMutation::default(),
            backend: StorageBackend::InMemory,
        }
    }

    /// Open (or create) a redb database and restore its state.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, EvalsysError> {
        let store = RedbStore::open(path)?;
        Self::with_store(store)
    }

    /// Restore from an open store and write through to it.
    pub fn with_store(store: RedbStore) -> Result<Self, EvalsysError> {
        let snapshot = store.load()?;
        let mut session = Self::from_snapshot(snapshot);
        session.backend = StorageBackend::Persistent(store);
        Ok(session)
    }

    /// Replace the modification policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ModificationPolicy) -> Self {
        self.mutation = EvaluationMutation::new(policy);
        self
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn policy(&self) -> &ModificationPolicy {
        self.mutation.policy()
    }

    #[must_use]
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    #[must_use]
    pub fn bindings(&self) -> &NodeBindings {
        &self.bindings
    }

    #[must_use]
    pub fn scheduler(&self) -> &InMemoryScheduler {
        &self.scheduler
    }

    /// Read-only access-control view over the current hierarchy.
    #[must_use]
    pub fn access(&self) -> AccessControl<'_> {
        AccessControl::new(&self.hierarchy, &self.bindings)
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            evaluations: self.evaluations.len(),
            nodes: self.hierarchy.len(),
            groups: self.bindings.groups().count(),
            grants: self.bindings.grant_count(),
            jobs: self.scheduler.len(),
        }
    }

    /// Compact the backing database. Returns `false` for in-memory sessions
    /// and when nothing was reclaimed.
    pub fn compact(&mut self) -> Result<bool, EvalsysError> {
        match &mut self.backend {
            StorageBackend::InMemory => Ok(false),
            StorageBackend::Persistent(store) => store.compact(),
        }
    }

    /// Write staged state through to the store, if any.
    ///
    /// Callers stage changes on copies and swap them in only after this
    /// returns `Ok`, so a failed write leaves the session as it was.
    fn persist(&self, write: StoreWrite<'_>) -> Result<(), EvalsysError> {
        match &self.backend {
            StorageBackend::InMemory => Ok(()),
            StorageBackend::Persistent(store) => store.commit(&write),
        }
    }

    // =========================================================================
    // EVALUATIONS
    // =========================================================================

    /// Create an evaluation and plan its notifications.
    pub fn create_evaluation(
        &mut self,
        draft: EvaluationDraft,
        now: DateTime<Utc>,
    ) -> Result<EvaluationId, EvalsysError> {
        check_title("Title", &draft.title)?;
        if let Some(text) = &draft.instructions {
            check_length("Instructions", text, MAX_TEXT_LENGTH)?;
        }
        check_reminder_days(draft.reminder_days)?;

        let id = EvaluationId(self.next_evaluation_id);
        let next = self.next_evaluation_id.saturating_add(1);
        let evaluation = Evaluation::from_draft(id, draft);
        let mut scheduler = self.scheduler.clone();
        NotificationPlanner::reconcile(&mut scheduler, &evaluation, now)?;

        self.persist(
            StoreWrite::new()
                .evaluation(&evaluation, next)
                .scheduler(&scheduler),
        )?;
        self.next_evaluation_id = next;
        self.evaluations.insert(id, evaluation);
        self.scheduler = scheduler;
        Ok(id)
    }

    #[must_use]
    pub fn evaluation(&self, id: EvaluationId) -> Option<&Evaluation> {
        self.evaluations.get(&id)
    }

    /// All evaluations in id order.
    pub fn evaluations(&self) -> impl Iterator<Item = &Evaluation> {
        self.evaluations.values()
    }

    #[must_use]
    pub fn evaluation_state(
        &self,
        id: EvaluationId,
        now: DateTime<Utc>,
    ) -> Option<EvaluationState> {
        self.evaluations.get(&id).map(|evaluation| evaluation.state_at(now))
    }

    /// Apply a batch of field changes, gated by the modification policy.
    ///
    /// All-or-nothing: a denied or invalid change leaves the evaluation and
    /// its notification jobs untouched.
    pub fn update_evaluation(
        &mut self,
        id: EvaluationId,
        changes: &[EvaluationChange],
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, EvalsysError> {
        for change in changes {
            check_change(change)?;
        }
        let mut updated = self
            .evaluations
            .get(&id)
            .cloned()
            .ok_or(EvalsysError::EvaluationNotFound(id))?;

        let state = self.mutation.apply(&mut updated, changes, now)?;
        let mut scheduler = self.scheduler.clone();
        let jobs = NotificationPlanner::reconcile(&mut scheduler, &updated, now)?;

        self.persist(
            StoreWrite::new()
                .evaluation(&updated, self.next_evaluation_id)
                .scheduler(&scheduler),
        )?;
        self.evaluations.insert(id, updated);
        self.scheduler = scheduler;
        Ok(UpdateOutcome { state, jobs })
    }

    /// Delete an evaluation that has not started.
    ///
    /// Only `InQueue` and `Unknown` evaluations may be deleted; anything that
    /// has been open for responses is kept.
    pub fn delete_evaluation(
        &mut self,
        id: EvaluationId,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvalsysError> {
        let state = self
            .evaluation_state(id, now)
            .ok_or(EvalsysError::EvaluationNotFound(id))?;
        if !matches!(state, EvaluationState::InQueue | EvaluationState::Unknown) {
            return Err(EvalsysError::InvalidState(format!(
                "Evaluation {id} is {state} and can no longer be deleted"
            )));
        }

        let mut scheduler = self.scheduler.clone();
        NotificationPlanner::cancel_all(&mut scheduler, id);
        self.persist(StoreWrite::new().remove_evaluation(id).scheduler(&scheduler))?;

        self.scheduler = scheduler;
        self.evaluations
            .remove(&id)
            .ok_or(EvalsysError::EvaluationNotFound(id))
    }

    /// Assign an evaluation to hierarchy nodes and individual groups.
    ///
    /// Each node contributes every group attached at or below it. Governed by
    /// the `assignments` policy field. Returns the groups newly assigned.
    pub fn assign_evaluation(
        &mut self,
        id: EvaluationId,
        node_ids: &[NodeId],
        group_ids: &[EvalGroupId],
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<EvalGroupId>, EvalsysError> {
        if node_ids.len() > MAX_QUERY_NODES {
            return Err(EvalsysError::InvalidInput(format!(
                "At most {MAX_QUERY_NODES} nodes per assignment"
            )));
        }
        let evaluation = self
            .evaluations
            .get(&id)
            .ok_or(EvalsysError::EvaluationNotFound(id))?;
        self.mutation
            .check_field(evaluation.state_at(now), EvaluationField::Assignments)?;
        if let Some(missing) = node_ids.iter().find(|node| !self.hierarchy.contains(**node)) {
            return Err(EvalsysError::NodeNotFound(*missing));
        }

        let access = self.access();
        let mut groups: BTreeSet<EvalGroupId> = node_ids
            .iter()
            .flat_map(|node| access.groups_in_subtree(*node))
            .collect();
        groups.extend(group_ids.iter().cloned());

        let added: BTreeSet<EvalGroupId> = groups
            .difference(&evaluation.assigned_groups)
            .cloned()
            .collect();

        let mut updated = evaluation.clone();
        updated.assigned_nodes.extend(node_ids.iter().copied());
        updated.assigned_groups.extend(groups);

        self.persist(StoreWrite::new().evaluation(&updated, self.next_evaluation_id))?;
        self.evaluations.insert(id, updated);
        Ok(added)
    }

    // =========================================================================
    // HIERARCHY
    // =========================================================================

    /// Run `f` on a copy of the hierarchy, persist it, then swap it in.
    fn stage_hierarchy<T, F>(&mut self, f: F) -> Result<T, EvalsysError>
    where
        F: FnOnce(&mut Hierarchy) -> Result<T, EvalsysError>,
    {
        let mut hierarchy = self.hierarchy.clone();
        let out = f(&mut hierarchy)?;
        self.persist(StoreWrite::new().hierarchy(&hierarchy))?;
        self.hierarchy = hierarchy;
        Ok(out)
    }

    /// Run `f` on a copy of the bindings, persist it, then swap it in.
    fn stage_bindings<T, F>(&mut self, f: F) -> Result<T, EvalsysError>
    where
        F: FnOnce(&mut NodeBindings) -> T,
    {
        let mut bindings = self.bindings.clone();
        let out = f(&mut bindings);
        self.persist(StoreWrite::new().bindings(&bindings))?;
        self.bindings = bindings;
        Ok(out)
    }

    pub fn create_root(
        &mut self,
        title: &str,
        description: &str,
    ) -> Result<NodeId, EvalsysError> {
        check_title("Node title", title)?;
        check_length("Node description", description, MAX_TEXT_LENGTH)?;
        self.stage_hierarchy(|hierarchy| hierarchy.create_root(title, description))
    }

    pub fn add_node(
        &mut self,
        parent: NodeId,
        title: &str,
        description: &str,
        permission_token: Option<String>,
    ) -> Result<NodeId, EvalsysError> {
        check_title("Node title", title)?;
        check_length("Node description", description, MAX_TEXT_LENGTH)?;
        self.stage_hierarchy(|hierarchy| {
            hierarchy.add_node(parent, title, description, permission_token)
        })
    }

    pub fn update_node(
        &mut self,
        id: NodeId,
        title: &str,
        description: &str,
        permission_token: Option<String>,
    ) -> Result<(), EvalsysError> {
        check_title("Node title", title)?;
        check_length("Node description", description, MAX_TEXT_LENGTH)?;
        self.stage_hierarchy(|hierarchy| {
            hierarchy.update_node(id, title, description, permission_token)
        })
    }

    /// Link `node` under an additional parent. Returns `false` if it already was.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId) -> Result<bool, EvalsysError> {
        self.stage_hierarchy(|hierarchy| hierarchy.add_parent(node, parent))
    }

    pub fn remove_parent(&mut self, node: NodeId, parent: NodeId) -> Result<bool, EvalsysError> {
        self.stage_hierarchy(|hierarchy| hierarchy.remove_parent(node, parent))
    }

    /// Detach `node` from all its parents and put it under `new_parent`.
    pub fn move_node(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), EvalsysError> {
        self.stage_hierarchy(|hierarchy| hierarchy.move_node(node, new_parent))
    }

    /// Remove a leaf node together with its group attachments and grants.
    pub fn remove_node(&mut self, id: NodeId) -> Result<HierarchyNode, EvalsysError> {
        let mut hierarchy = self.hierarchy.clone();
        let removed = hierarchy.remove_node(id)?;
        let mut bindings = self.bindings.clone();
        bindings.remove_node(id);

        self.persist(StoreWrite::new().hierarchy(&hierarchy).bindings(&bindings))?;
        self.hierarchy = hierarchy;
        self.bindings = bindings;
        Ok(removed)
    }

    // =========================================================================
    // BINDINGS
    // =========================================================================

    pub fn register_group(&mut self, group: EvalGroup) -> Result<(), EvalsysError> {
        check_title("Group title", &group.title)?;
        self.stage_bindings(|bindings| bindings.register_group(group))
    }

    /// Attach groups beneath a node.
    pub fn attach_groups(
        &mut self,
        node: NodeId,
        groups: &[EvalGroupId],
    ) -> Result<(), EvalsysError> {
        if !self.hierarchy.contains(node) {
            return Err(EvalsysError::NodeNotFound(node));
        }
        self.stage_bindings(|bindings| bindings.add_node_groups(node, groups.iter().cloned()))
    }

    /// Detach groups from a node. Returns how many were attached.
    pub fn detach_groups(
        &mut self,
        node: NodeId,
        groups: &[EvalGroupId],
    ) -> Result<usize, EvalsysError> {
        let attached = self
            .bindings
            .node_groups(node)
            .is_some_and(|attached| groups.iter().any(|group| attached.contains(group)));
        if !attached {
            return Ok(0);
        }
        self.stage_bindings(|bindings| bindings.remove_node_groups(node, groups))
    }

    pub fn grant_permission(
        &mut self,
        user: UserId,
        node: NodeId,
        permission: Permission,
    ) -> Result<bool, EvalsysError> {
        if !self.hierarchy.contains(node) {
            return Err(EvalsysError::NodeNotFound(node));
        }
        if self.bindings.holds(&user, node, &permission) {
            return Ok(false);
        }
        self.stage_bindings(|bindings| bindings.grant_permission(user, node, permission))
    }

    pub fn revoke_permission(
        &mut self,
        user: &UserId,
        node: NodeId,
        permission: &Permission,
    ) -> Result<bool, EvalsysError> {
        if !self.bindings.holds(user, node, permission) {
            return Ok(false);
        }
        self.stage_bindings(|bindings| bindings.revoke_permission(user, node, permission))
    }

    // =========================================================================
    // NOTIFICATIONS
    // =========================================================================

    /// Pending notification jobs in id order.
    #[must_use]
    pub fn jobs(&self) -> Vec<&ScheduledJob> {
        self.scheduler.jobs()
    }

    /// Drain every job due at `now`, then re-plan the evaluations they
    /// belonged to (a fired reminder schedules the next one).
    pub fn take_due_notifications(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, EvalsysError> {
        let mut scheduler = self.scheduler.clone();
        let due = scheduler.take_due(now);
        if due.is_empty() {
            return Ok(due);
        }

        let affected: BTreeSet<EvaluationId> =
            due.iter().map(|job| job.payload.evaluation_id).collect();
        for id in affected {
            if let Some(evaluation) = self.evaluations.get(&id) {
                NotificationPlanner::reconcile(&mut scheduler, evaluation, now)?;
            }
        }

        self.persist(StoreWrite::new().scheduler(&scheduler))?;
        self.scheduler = scheduler;
        Ok(due)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Copy of the complete state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            hierarchy: self.hierarchy.clone(),
            bindings: self.bindings.clone(),
            evaluations: self.evaluations.clone(),
            scheduler: self.scheduler.clone(),
            next_evaluation_id: self.next_evaluation_id,
        }
    }

    /// Replace the complete state, keeping backend and policy.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), EvalsysError> {
        let restored = Self::from_snapshot(snapshot);
        if let StorageBackend::Persistent(store) = &self.backend {
            store.save_snapshot(&restored.snapshot())?;
        }
        self.hierarchy = restored.hierarchy;
        self.bindings = restored.bindings;
        self.evaluations = restored.evaluations;
        self.scheduler = restored.scheduler;
        self.next_evaluation_id = restored.next_evaluation_id;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::JobKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0)
            .single()
            .expect("valid date")
    }

    fn draft() -> EvaluationDraft {
        EvaluationDraft {
            title: "End of term survey".into(),
            owner: UserId::new("admin"),
            start_date: Some(t0()),
            due_date: Some(t0() + Duration::days(7)),
            stop_date: Some(t0() + Duration::days(8)),
            view_date: Some(t0() + Duration::days(30)),
            reminder_days: 2,
            ..EvaluationDraft::default()
        }
    }

    #[test]
    fn create_plans_notifications() {
        let mut session = Session::new();
        let id = session
            .create_evaluation(draft(), t0() - Duration::days(1))
            .expect("create");

        assert_eq!(id, EvaluationId(1));
        assert_eq!(
            session.evaluation_state(id, t0() - Duration::days(1)),
            Some(EvaluationState::InQueue)
        );
        assert_eq!(session.jobs().len(), 5);
    }

    #[test]
    fn create_rejects_blank_title() {
        let mut session = Session::new();
        let result = session.create_evaluation(
            EvaluationDraft {
                title: "  ".into(),
                ..draft()
            },
            t0(),
        );
        assert!(matches!(result, Err(EvalsysError::InvalidInput(_))));
    }

    #[test]
    fn update_is_policy_gated() {
        let mut session = Session::new();
        let id = session.create_evaluation(draft(), t0()).expect("create");
        let now = t0() + Duration::days(1);

        let denied = session.update_evaluation(id, &[EvaluationChange::Title("x".into())], now);
        assert!(matches!(
            denied,
            Err(EvalsysError::ModificationDenied { .. })
        ));

        let outcome = session
            .update_evaluation(
                id,
                &[EvaluationChange::DueDate(Some(t0() + Duration::days(6)))],
                now,
            )
            .expect("update");
        assert_eq!(outcome.state, EvaluationState::Active);
        assert_eq!(outcome.jobs.rescheduled, vec!["eval-1-due".to_string()]);
    }

    #[test]
    fn update_missing_evaluation() {
        let mut session = Session::new();
        assert!(matches!(
            session.update_evaluation(EvaluationId(9), &[], t0()),
            Err(EvalsysError::EvaluationNotFound(EvaluationId(9)))
        ));
    }

    #[test]
    fn delete_only_before_start() {
        let mut session = Session::new();
        let id = session.create_evaluation(draft(), t0()).expect("create");
        assert!(matches!(
            session.delete_evaluation(id, t0()),
            Err(EvalsysError::InvalidState(_))
        ));

        session
            .delete_evaluation(id, t0() - Duration::hours(1))
            .expect("delete");
        assert!(session.evaluation(id).is_none());
        assert!(session.jobs().is_empty());
    }

    #[test]
    fn assign_expands_subtree_groups() {
        let mut session = Session::new();
        let root = session.create_root("University", "").expect("root");
        let college = session.add_node(root, "Sciences", "", None).expect("college");
        let dept = session.add_node(college, "Chemistry", "", None).expect("dept");
        session
            .attach_groups(college, &[EvalGroupId::new("sci-seminar")])
            .expect("attach");
        session
            .attach_groups(dept, &[EvalGroupId::new("chem-101")])
            .expect("attach");

        let id = session
            .create_evaluation(draft(), t0() - Duration::days(1))
            .expect("create");
        let added = session
            .assign_evaluation(
                id,
                &[college],
                &[EvalGroupId::new("guest-course")],
                t0() - Duration::days(1),
            )
            .expect("assign");

        assert_eq!(added.len(), 3);
        let evaluation = session.evaluation(id).expect("evaluation");
        assert!(evaluation.assigned_nodes.contains(&college));
        assert!(evaluation.assigned_groups.contains(&EvalGroupId::new("chem-101")));

        // second pass adds nothing new
        let again = session
            .assign_evaluation(id, &[dept], &[], t0() - Duration::days(1))
            .expect("assign");
        assert!(again.is_empty());
    }

    #[test]
    fn assign_rejects_unknown_node_and_late_assignment() {
        let mut session = Session::new();
        let root = session.create_root("University", "").expect("root");
        let id = session.create_evaluation(draft(), t0()).expect("create");

        assert!(matches!(
            session.assign_evaluation(id, &[NodeId(77)], &[], t0() - Duration::days(1)),
            Err(EvalsysError::NodeNotFound(NodeId(77)))
        ));
        assert!(matches!(
            session.assign_evaluation(id, &[root], &[], t0()),
            Err(EvalsysError::ModificationDenied { .. })
        ));
    }

    #[test]
    fn due_notifications_reschedule_reminders() {
        let mut session = Session::new();
        let id = session
            .create_evaluation(draft(), t0() - Duration::days(1))
            .expect("create");

        let fired = session
            .take_due_notifications(t0() + Duration::days(2))
            .expect("tick");
        let kinds: Vec<JobKind> = fired.iter().map(|job| job.payload.kind).collect();
        assert_eq!(kinds, vec![JobKind::Active, JobKind::Reminder]);

        let next = session
            .scheduler()
            .job(&crate::scheduling::job_id(id, JobKind::Reminder))
            .map(|job| job.run_at);
        assert_eq!(next, Some(t0() + Duration::days(4)));
    }

    #[test]
    fn remove_node_drops_bindings() {
        let mut session = Session::new();
        let root = session.create_root("University", "").expect("root");
        let dept = session.add_node(root, "Music", "", None).expect("dept");
        session
            .grant_permission(UserId::new("carol"), dept, Permission::new("view_node_data"))
            .expect("grant");

        session.remove_node(dept).expect("remove");
        assert_eq!(session.bindings().grant_count(), 0);
        assert!(matches!(
            session.grant_permission(UserId::new("carol"), dept, Permission::new("x")),
            Err(EvalsysError::NodeNotFound(_))
        ));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut session = Session::new();
        session.create_root("University", "").expect("root");
        session.create_evaluation(draft(), t0()).expect("create");

        let mut other = Session::new();
        other.restore(session.snapshot()).expect("restore");
        assert_eq!(other.stats(), session.stats());
        let id = other.create_evaluation(draft(), t0()).expect("create");
        assert_eq!(id, EvaluationId(2));
    }

    #[test]
    fn persistent_session_survives_reopen() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("session.redb");
        {
            let mut session = Session::with_redb(&path).expect("open");
            let root = session.create_root("University", "").expect("root");
            session
                .attach_groups(root, &[EvalGroupId::new("all")])
                .expect("attach");
            session.create_evaluation(draft(), t0()).expect("create");
        }
        let session = Session::with_redb(&path).expect("reopen");
        assert!(session.is_persistent());
        let stats = session.stats();
        assert_eq!(stats.evaluations, 1);
        assert_eq!(stats.nodes, 1);
        assert!(stats.jobs > 0);
        assert!(session.access().root_node().is_ok());
    }

    #[test]
    fn persistent_session_keeps_restructured_hierarchy() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("moves.redb");
        let (college, dept, other) = {
            let mut session = Session::with_redb(&path).expect("open");
            let root = session.create_root("University", "").expect("root");
            let college = session.add_node(root, "Sciences", "", None).expect("college");
            let other = session.add_node(root, "Arts", "", None).expect("other");
            let dept = session.add_node(college, "Physics", "", None).expect("dept");

            session.move_node(dept, other).expect("move");
            assert!(session.add_parent(dept, college).expect("add parent"));
            assert!(session.remove_parent(dept, other).expect("remove parent"));
            session
                .update_node(dept, "Applied Physics", "", Some("phys".into()))
                .expect("update");
            (college, dept, other)
        };

        let session = Session::with_redb(&path).expect("reopen");
        let node = session.access().node(dept).expect("dept");
        assert_eq!(node.direct_parent_ids, BTreeSet::from([college]));
        assert!(node.parent_ids.contains(&college));
        assert!(!node.parent_ids.contains(&other));
        assert_eq!(node.title, "Applied Physics");
        assert_eq!(node.permission_token.as_deref(), Some("phys"));
    }

    fn rejecting(session: &Session, reject: bool) {
        if let StorageBackend::Persistent(store) = &session.backend {
            store.reject_writes(reject);
        }
    }

    #[test]
    fn failed_write_leaves_evaluations_untouched() {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("failing.redb")).expect("open");
        let mut session = Session::with_store(store).expect("session");
        let before = t0() - Duration::days(1);
        let id = session.create_evaluation(draft(), before).expect("create");
        let jobs = session.jobs().len();

        rejecting(&session, true);
        assert!(matches!(
            session.create_evaluation(draft(), before),
            Err(EvalsysError::IoError(_))
        ));
        assert!(session.evaluation(EvaluationId(2)).is_none());
        assert_eq!(session.jobs().len(), jobs);

        let moved = Some(t0() + Duration::days(3));
        assert!(
            session
                .update_evaluation(id, &[EvaluationChange::DueDate(moved)], before)
                .is_err()
        );
        assert_eq!(
            session.evaluation(id).and_then(|e| e.due_date),
            Some(t0() + Duration::days(7))
        );
        assert!(session.delete_evaluation(id, before).is_err());
        assert!(session.evaluation(id).is_some());
        assert_eq!(session.jobs().len(), jobs);

        // the id is not used up by the failed create
        rejecting(&session, false);
        let next = session.create_evaluation(draft(), before).expect("create");
        assert_eq!(next, EvaluationId(2));
    }

    #[test]
    fn failed_write_leaves_hierarchy_untouched() {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("failing-tree.redb")).expect("open");
        let mut session = Session::with_store(store).expect("session");
        let root = session.create_root("University", "").expect("root");
        let dept = session.add_node(root, "Law", "", None).expect("dept");

        rejecting(&session, true);
        assert!(session.add_node(root, "Medicine", "", None).is_err());
        assert!(session.remove_node(dept).is_err());
        assert!(
            session
                .grant_permission(UserId::new("dean"), dept, Permission::new("control_node"))
                .is_err()
        );
        assert_eq!(session.stats().nodes, 2);
        assert_eq!(session.stats().grants, 0);

        rejecting(&session, false);
        drop(session);
        let reopened = Session::with_redb(temp.path().join("failing-tree.redb")).expect("reopen");
        assert_eq!(reopened.stats().nodes, 2);
    }

    #[test]
    fn custom_policy_gates_updates() {
        use crate::policy::FieldRule;

        let policy = ModificationPolicy::empty()
            .with_rule(EvaluationState::InQueue, FieldRule::only(["title"]))
            .with_rule(EvaluationState::Active, FieldRule::Only(BTreeSet::new()));
        let mut session = Session::new().with_policy(policy);
        let before = t0() - Duration::days(1);
        let id = session.create_evaluation(draft(), before).expect("create");

        assert!(matches!(
            session.update_evaluation(id, &[EvaluationChange::ReminderDays(1)], before),
            Err(EvalsysError::ModificationDenied { .. })
        ));
        session
            .update_evaluation(id, &[EvaluationChange::Title("Renamed".into())], before)
            .expect("title allowed");
        assert!(matches!(
            session.assign_evaluation(id, &[], &[EvalGroupId::new("g")], t0()),
            Err(EvalsysError::ModificationDenied { .. })
        ));
    }

    #[test]
    fn compact_only_touches_persistent_sessions() {
        let mut memory = Session::new();
        assert!(!memory.compact().expect("compact"));

        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("compact.redb");
        let mut session = Session::with_redb(&path).expect("open");
        session.create_evaluation(draft(), t0()).expect("create");
        session.compact().expect("compact");
        drop(session);
        assert_eq!(Session::with_redb(&path).expect("reopen").stats().evaluations, 1);
    }
}
