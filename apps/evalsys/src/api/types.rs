//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use chrono::{DateTime, Utc};
use evalsys_core::{
    EvalGroup, EvalGroupId, Evaluation, EvaluationChange, EvaluationDraft, EvalsysError,
    HierarchyNode, NodeId, ReconcileReport, ScheduledJob, SessionStats, UserId,
    primitives::{KNOWN_PERMISSIONS, MAX_QUERY_NODES, MAX_TEXT_LENGTH, MAX_TITLE_LENGTH},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn check_length(label: &str, value: &str, max: usize) -> Result<(), EvalsysError> {
    if value.len() > max {
        return Err(EvalsysError::InvalidInput(format!(
            "{} length {} exceeds maximum {} bytes",
            label,
            value.len(),
            max
        )));
    }
    Ok(())
}

fn check_node_count(count: usize) -> Result<(), EvalsysError> {
    if count > MAX_QUERY_NODES {
        return Err(EvalsysError::InvalidInput(format!(
            "Node count {count} exceeds maximum {MAX_QUERY_NODES}"
        )));
    }
    Ok(())
}

fn to_node_ids(ids: &[u64]) -> Vec<NodeId> {
    ids.iter().map(|id| NodeId(*id)).collect()
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Session status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub hierarchy_id: String,
    pub persistent: bool,
    pub evaluations: usize,
    pub nodes: usize,
    pub groups: usize,
    pub grants: usize,
    pub jobs: usize,
    pub next_job_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    pub fn new(
        hierarchy_id: &str,
        persistent: bool,
        stats: SessionStats,
        next_job_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            hierarchy_id: hierarchy_id.to_string(),
            persistent,
            evaluations: stats.evaluations,
            nodes: stats.nodes,
            groups: stats.groups,
            grants: stats.grants,
            jobs: stats.jobs,
            next_job_at,
        }
    }
}

// =============================================================================
// EVALUATIONS
// =============================================================================

/// Evaluation creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvaluationRequest {
    pub title: String,
    pub owner: String,
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

impl CreateEvaluationRequest {
    /// Convert to a draft, rejecting oversized or empty text at the boundary.
    pub fn to_draft(&self) -> Result<EvaluationDraft, EvalsysError> {
        if self.owner.trim().is_empty() {
            return Err(EvalsysError::InvalidInput("Owner must not be empty".to_string()));
        }
        check_length("Title", &self.title, MAX_TITLE_LENGTH)?;
        check_length("Owner", &self.owner, MAX_TITLE_LENGTH)?;
        if let Some(text) = &self.instructions {
            check_length("Instructions", text, MAX_TEXT_LENGTH)?;
        }

        Ok(EvaluationDraft {
            title: self.title.clone(),
            owner: UserId::new(&self.owner),
            instructions: self.instructions.clone(),
            start_date: self.start_date,
            due_date: self.due_date,
            stop_date: self.stop_date,
            view_date: self.view_date,
            students_date: self.students_date,
            instructors_date: self.instructors_date,
            reminder_days: self.reminder_days,
            results_private: self.results_private,
        })
    }
}

/// Evaluation as returned by the API, with its state at response time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJson {
    pub id: u64,
    pub title: String,
    pub owner: String,
    pub state: String,
    pub instructions: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub stop_date: Option<DateTime<Utc>>,
    pub view_date: Option<DateTime<Utc>>,
    pub students_date: Option<DateTime<Utc>>,
    pub instructors_date: Option<DateTime<Utc>>,
    pub reminder_days: u32,
    pub results_private: bool,
    pub assigned_nodes: Vec<u64>,
    pub assigned_groups: Vec<String>,
}

impl EvaluationJson {
    pub fn from_evaluation(evaluation: &Evaluation, now: DateTime<Utc>) -> Self {
        Self {
            id: evaluation.id.0,
            title: evaluation.title.clone(),
            owner: evaluation.owner.as_str().to_string(),
            state: evaluation.state_at(now).to_string(),
            instructions: evaluation.instructions.clone(),
            start_date: evaluation.start_date,
            due_date: evaluation.due_date,
            stop_date: evaluation.stop_date,
            view_date: evaluation.view_date,
            students_date: evaluation.students_date,
            instructors_date: evaluation.instructors_date,
            reminder_days: evaluation.reminder_days,
            results_private: evaluation.results_private,
            assigned_nodes: evaluation.assigned_nodes.iter().map(|n| n.0).collect(),
            assigned_groups: evaluation
                .assigned_groups
                .iter()
                .map(|g| g.as_str().to_string())
                .collect(),
        }
    }
}

/// Response carrying a single evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub success: bool,
    pub evaluation: Option<EvaluationJson>,
    pub error: Option<String>,
}

impl EvaluationResponse {
    pub fn success(evaluation: EvaluationJson) -> Self {
        Self {
            success: true,
            evaluation: Some(evaluation),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            evaluation: None,
            error: Some(msg.into()),
        }
    }
}

/// Batch of field changes.
///
/// ```json
/// {"changes": [{"field": "stopDate", "value": "2026-01-22T08:00:00Z"}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvaluationRequest {
    pub changes: Vec<EvaluationChange>,
}

/// Update response: the state the batch was checked against and the job
/// changes it caused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvaluationResponse {
    pub success: bool,
    pub state: Option<String>,
    #[serde(default)]
    pub scheduled: Vec<String>,
    #[serde(default)]
    pub rescheduled: Vec<String>,
    #[serde(default)]
    pub cancelled: Vec<String>,
    pub error: Option<String>,
}

impl UpdateEvaluationResponse {
    pub fn success(state: impl Into<String>, jobs: ReconcileReport) -> Self {
        Self {
            success: true,
            state: Some(state.into()),
            scheduled: jobs.scheduled,
            rescheduled: jobs.rescheduled,
            cancelled: jobs.cancelled,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            state: None,
            scheduled: vec![],
            rescheduled: vec![],
            cancelled: vec![],
            error: Some(msg.into()),
        }
    }
}

/// Assignment request: nodes contribute every group attached beneath them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignRequest {
    #[serde(default)]
    pub node_ids: Vec<u64>,
    #[serde(default)]
    pub group_ids: Vec<String>,
}

impl AssignRequest {
    pub fn parts(&self) -> Result<(Vec<NodeId>, Vec<EvalGroupId>), EvalsysError> {
        check_node_count(self.node_ids.len())?;
        let groups = self.group_ids.iter().map(EvalGroupId::new).collect();
        Ok((to_node_ids(&self.node_ids), groups))
    }
}

/// Generic mutation acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    /// Whether anything changed (e.g. a grant that already existed is `false`).
    pub changed: bool,
    #[serde(default)]
    pub ids: Vec<String>,
    pub error: Option<String>,
}

impl MutationResponse {
    pub fn success(changed: bool) -> Self {
        Self {
            success: true,
            changed,
            ids: vec![],
            error: None,
        }
    }

    pub fn with_ids(ids: Vec<String>) -> Self {
        Self {
            success: true,
            changed: !ids.is_empty(),
            ids,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: false,
            ids: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// Modification policy lookup by state and field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheckRequest {
    pub state: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheckResponse {
    pub state: String,
    pub field: String,
    pub permitted: bool,
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// Hierarchy node JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeJson {
    pub id: u64,
    pub hierarchy_id: String,
    pub title: String,
    pub description: String,
    pub permission_token: Option<String>,
    pub parent_ids: Vec<u64>,
    pub child_ids: Vec<u64>,
    pub depth: usize,
}

impl NodeJson {
    /// `None` for a node without an id.
    pub fn from_node(node: &HierarchyNode) -> Option<Self> {
        Some(Self {
            id: node.id?.0,
            hierarchy_id: node.hierarchy_id.clone(),
            title: node.title.clone(),
            description: node.description.clone(),
            permission_token: node.permission_token.clone(),
            parent_ids: node.direct_parent_ids.iter().map(|n| n.0).collect(),
            child_ids: node.direct_child_ids.iter().map(|n| n.0).collect(),
            depth: node.depth(),
        })
    }

    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a HierarchyNode>) -> Vec<Self> {
        nodes.into_iter().filter_map(Self::from_node).collect()
    }
}

/// Node creation request. Without `parent_id` the node becomes the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    #[serde(default)]
    pub parent_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permission_token: Option<String>,
}

impl CreateNodeRequest {
    pub fn validate(&self) -> Result<(), EvalsysError> {
        check_length("Title", &self.title, MAX_TITLE_LENGTH)?;
        check_length("Description", &self.description, MAX_TEXT_LENGTH)?;
        if let Some(token) = &self.permission_token {
            check_length("Permission token", token, MAX_TITLE_LENGTH)?;
        }
        Ok(())
    }
}

/// Replace a node's title, description and permission token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permission_token: Option<String>,
}

impl UpdateNodeRequest {
    pub fn validate(&self) -> Result<(), EvalsysError> {
        check_length("Title", &self.title, MAX_TITLE_LENGTH)?;
        check_length("Description", &self.description, MAX_TEXT_LENGTH)?;
        if let Some(token) = &self.permission_token {
            check_length("Permission token", token, MAX_TITLE_LENGTH)?;
        }
        Ok(())
    }
}

/// How a parent link is changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentAction {
    /// Link under an additional parent.
    #[default]
    Add,
    /// Unlink from one parent.
    Remove,
    /// Unlink from every parent, then link under this one.
    Move,
}

/// Change one parent link of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeParentRequest {
    pub parent_id: u64,
    #[serde(default)]
    pub action: ParentAction,
}

/// Response carrying nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub success: bool,
    /// `false` when the requested node does not exist.
    pub found: bool,
    pub nodes: Vec<NodeJson>,
    pub error: Option<String>,
}

impl NodesResponse {
    pub fn with_nodes(nodes: Vec<NodeJson>) -> Self {
        Self {
            success: true,
            found: true,
            nodes,
            error: None,
        }
    }

    /// Lookup miss: still a success, with no nodes.
    pub fn not_found() -> Self {
        Self {
            found: false,
            ..Self::with_nodes(vec![])
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            found: false,
            nodes: vec![],
            error: Some(msg.into()),
        }
    }
}

/// `?direct=` on the children endpoint. Defaults to direct children only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildrenQuery {
    #[serde(default = "default_direct")]
    pub direct: bool,
}

fn default_direct() -> bool {
    true
}

/// Group JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupJson {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub group_type: Option<String>,
}

impl GroupJson {
    /// A registration record, if the entry carries a title.
    pub fn to_group(&self) -> Option<EvalGroup> {
        self.title.as_ref().map(|title| {
            EvalGroup::new(
                EvalGroupId::new(&self.id),
                title.clone(),
                self.group_type.clone().unwrap_or_default(),
            )
        })
    }
}

/// Attach (or detach) groups at a node. Entries with a title are registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsRequest {
    pub node_id: u64,
    pub groups: Vec<GroupJson>,
    #[serde(default)]
    pub detach: bool,
}

/// Grant (or revoke) a permission at a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub user_id: String,
    pub node_id: u64,
    pub permission: String,
    #[serde(default)]
    pub revoke: bool,
}

impl PermissionRequest {
    pub fn validate(&self) -> Result<(), EvalsysError> {
        if self.user_id.is_empty() || self.permission.is_empty() {
            return Err(EvalsysError::InvalidInput(
                "user_id and permission must not be empty".to_string(),
            ));
        }
        check_length("User id", &self.user_id, MAX_TITLE_LENGTH)?;
        check_length("Permission", &self.permission, MAX_TITLE_LENGTH)
    }

    /// Whether the permission is one of the well-known tokens.
    pub fn is_known_permission(&self) -> bool {
        KNOWN_PERMISSIONS.contains(&self.permission.as_str())
    }
}

// =============================================================================
// HIERARCHY QUERY
// =============================================================================

/// Access-control query (tagged union).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HierarchyQueryRequest {
    GroupsUnderNodes {
        node_ids: Vec<u64>,
    },
    CountGroupsUnderNodes {
        node_ids: Vec<u64>,
    },
    GroupsInSubtree {
        node_id: u64,
    },
    UsersWithPermission {
        node_ids: Vec<u64>,
        permission: String,
    },
    NodesForUserPermission {
        user_id: String,
        permission: String,
    },
    HasPermission {
        user_id: String,
        node_id: u64,
        permission: String,
        #[serde(default)]
        inherited: bool,
    },
    AncestorPath {
        group_id: String,
    },
    NodesAboveGroup {
        group_id: String,
    },
}

impl HierarchyQueryRequest {
    /// Reject oversized batches before touching the session.
    pub fn validate(&self) -> Result<(), EvalsysError> {
        match self {
            Self::GroupsUnderNodes { node_ids }
            | Self::CountGroupsUnderNodes { node_ids }
            | Self::UsersWithPermission { node_ids, .. } => check_node_count(node_ids.len()),
            _ => Ok(()),
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        match self {
            Self::GroupsUnderNodes { node_ids }
            | Self::CountGroupsUnderNodes { node_ids }
            | Self::UsersWithPermission { node_ids, .. } => to_node_ids(node_ids),
            _ => vec![],
        }
    }
}

/// Query response. Only the fields relevant to the query kind are filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyQueryResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups_by_node: BTreeMap<u64, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counts: BTreeMap<u64, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted: Option<bool>,
    pub error: Option<String>,
}

impl HierarchyQueryResponse {
    pub fn with_groups_by_node(groups: BTreeMap<u64, Vec<String>>) -> Self {
        Self {
            success: true,
            groups_by_node: groups,
            ..Self::default()
        }
    }

    pub fn with_counts(counts: BTreeMap<u64, usize>) -> Self {
        Self {
            success: true,
            counts,
            ..Self::default()
        }
    }

    pub fn with_groups(groups: Vec<String>) -> Self {
        Self {
            success: true,
            groups,
            ..Self::default()
        }
    }

    pub fn with_users(users: Vec<String>) -> Self {
        Self {
            success: true,
            users,
            ..Self::default()
        }
    }

    pub fn with_nodes(nodes: Vec<NodeJson>) -> Self {
        Self {
            success: true,
            nodes,
            ..Self::default()
        }
    }

    pub fn with_permitted(permitted: bool) -> Self {
        Self {
            success: true,
            permitted: Some(permitted),
            ..Self::default()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Scheduled notification job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobJson {
    pub id: String,
    pub run_at: DateTime<Utc>,
    pub evaluation_id: u64,
    pub kind: String,
}

impl From<&ScheduledJob> for JobJson {
    fn from(job: &ScheduledJob) -> Self {
        Self {
            id: job.id.clone(),
            run_at: job.run_at,
            evaluation_id: job.payload.evaluation_id.0,
            kind: job.payload.kind.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobJson>,
}

// =============================================================================
// EXPORT RESPONSE
// =============================================================================

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    /// Base64 encoded snapshot bytes.
    pub data: Option<String>,
    pub checksum: Option<u64>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: &[u8], checksum: u64) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            checksum: Some(checksum),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// HASH RESPONSE
// =============================================================================

/// BLAKE3 hash of the exported snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    pub success: bool,
    pub algorithm: String,
    pub hash: Option<String>,
    pub error: Option<String>,
}

impl HashResponse {
    pub fn success(hash: String) -> Self {
        Self {
            success: true,
            algorithm: "blake3".to_string(),
            hash: Some(hash),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            algorithm: "blake3".to_string(),
            hash: None,
            error: Some(msg.into()),
        }
    }
}
