//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Handlers read the wall clock once per request and pass it into the
//! session; the core never reads it itself.

use super::{
    AppState,
    types::{
        AssignRequest, ChildrenQuery, CreateEvaluationRequest, CreateNodeRequest,
        EvaluationJson, EvaluationResponse, ExportResponse, GroupsRequest, HashResponse,
        HealthResponse, HierarchyQueryRequest, HierarchyQueryResponse, JobJson, JobsResponse,
        MutationResponse, NodeJson, NodeParentRequest, NodesResponse, ParentAction,
        PermissionRequest, PolicyCheckRequest, PolicyCheckResponse, StatusResponse,
        UpdateEvaluationRequest, UpdateEvaluationResponse, UpdateNodeRequest,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use evalsys_core::{
    EvalGroupId, EvaluationId, EvalsysError, NodeId, Permission, Session, UserId,
    formats::{snapshot_checksum, snapshot_crypto_hash, snapshot_to_bytes},
};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP status for a core error.
pub fn error_status(error: &EvalsysError) -> StatusCode {
    match error {
        EvalsysError::EvaluationNotFound(_) | EvalsysError::NodeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EvalsysError::ModificationDenied { .. }
        | EvalsysError::InvalidState(_)
        | EvalsysError::CycleDetected { .. } => StatusCode::CONFLICT,
        EvalsysError::InvalidInput(_) | EvalsysError::SerializationError(_) => {
            StatusCode::BAD_REQUEST
        }
        EvalsysError::IoError(_) | EvalsysError::SchedulerError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Session counts.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let response = StatusResponse::new(
        session.hierarchy().hierarchy_id(),
        session.is_persistent(),
        session.stats(),
        session.scheduler().next_run_at(),
    );
    (StatusCode::OK, Json(response))
}

// =============================================================================
// EVALUATIONS
// =============================================================================

/// Create an evaluation and schedule its notifications.
pub async fn create_evaluation_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateEvaluationRequest>,
) -> impl IntoResponse {
    let draft = match request.to_draft() {
        Ok(d) => d,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(EvaluationResponse::error(format!("Invalid evaluation: {}", e))),
            );
        }
    };

    let now = Utc::now();
    let mut session = state.session.write().await;
    match session.create_evaluation(draft, now) {
        Ok(id) => match session.evaluation(id) {
            Some(evaluation) => {
                tracing::info!(evaluation_id = id.0, "Evaluation created");
                (
                    StatusCode::CREATED,
                    Json(EvaluationResponse::success(EvaluationJson::from_evaluation(
                        evaluation, now,
                    ))),
                )
            }
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(EvaluationResponse::error(format!(
                    "Evaluation {} missing after create",
                    id
                ))),
            ),
        },
        Err(e) => (error_status(&e), Json(EvaluationResponse::error(e.to_string()))),
    }
}

/// Fetch an evaluation with its current state.
pub async fn get_evaluation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    match session.evaluation(EvaluationId(id)) {
        Some(evaluation) => (
            StatusCode::OK,
            Json(EvaluationResponse::success(EvaluationJson::from_evaluation(
                evaluation,
                Utc::now(),
            ))),
        ),
        None => {
            let e = EvalsysError::EvaluationNotFound(EvaluationId(id));
            (error_status(&e), Json(EvaluationResponse::error(e.to_string())))
        }
    }
}

/// Apply a batch of field changes, gated by the modification policy.
pub async fn update_evaluation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<UpdateEvaluationRequest>,
) -> impl IntoResponse {
    let mut session = state.session.write().await;
    match session.update_evaluation(EvaluationId(id), &request.changes, Utc::now()) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(UpdateEvaluationResponse::success(
                outcome.state.name(),
                outcome.jobs,
            )),
        ),
        Err(e) => {
            if matches!(e, EvalsysError::ModificationDenied { .. }) {
                tracing::info!(evaluation_id = id, error = %e, "Update denied");
            }
            (
                error_status(&e),
                Json(UpdateEvaluationResponse::error(e.to_string())),
            )
        }
    }
}

/// Delete an evaluation that has not started yet.
pub async fn delete_evaluation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let mut session = state.session.write().await;
    match session.delete_evaluation(EvaluationId(id), Utc::now()) {
        Ok(removed) => {
            tracing::info!(evaluation_id = id, "Evaluation deleted");
            (
                StatusCode::OK,
                Json(MutationResponse::with_ids(vec![removed.id.to_string()])),
            )
        }
        Err(e) => (error_status(&e), Json(MutationResponse::error(e.to_string()))),
    }
}

/// Assign an evaluation to nodes and groups. Returns the newly added groups.
pub async fn assign_evaluation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AssignRequest>,
) -> impl IntoResponse {
    let (nodes, groups) = match request.parts() {
        Ok(parts) => parts,
        Err(e) => return (error_status(&e), Json(MutationResponse::error(e.to_string()))),
    };

    let mut session = state.session.write().await;
    match session.assign_evaluation(EvaluationId(id), &nodes, &groups, Utc::now()) {
        Ok(added) => (
            StatusCode::OK,
            Json(MutationResponse::with_ids(
                added.iter().map(|g| g.as_str().to_string()).collect(),
            )),
        ),
        Err(e) => (error_status(&e), Json(MutationResponse::error(e.to_string()))),
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// Look up the modification policy by state and field name.
///
/// Unknown state names are permissive, matching the table-miss rule.
pub async fn policy_check_handler(
    State(state): State<AppState>,
    Json(request): Json<PolicyCheckRequest>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    let permitted = session
        .policy()
        .is_modification_permitted_by_name(&request.state, &request.field);
    Json(PolicyCheckResponse {
        state: request.state,
        field: request.field,
        permitted,
    })
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// The root node. 409 when the hierarchy has none.
pub async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    match session.access().root_node() {
        Ok(root) => (
            StatusCode::OK,
            Json(NodesResponse::with_nodes(NodeJson::from_nodes([root]))),
        ),
        Err(e) => (error_status(&e), Json(NodesResponse::error(e.to_string()))),
    }
}

/// Create the root (no `parent_id`) or a child node.
pub async fn create_node_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateNodeRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (error_status(&e), Json(NodesResponse::error(e.to_string())));
    }

    let mut session = state.session.write().await;
    let created = match request.parent_id {
        None => session.create_root(&request.title, &request.description),
        Some(parent) => session.add_node(
            NodeId(parent),
            &request.title,
            &request.description,
            request.permission_token.clone(),
        ),
    };

    match created {
        Ok(id) => {
            tracing::info!(node_id = id.0, "Hierarchy node created");
            let nodes = NodeJson::from_nodes(session.access().node(id));
            (StatusCode::CREATED, Json(NodesResponse::with_nodes(nodes)))
        }
        Err(e) => (error_status(&e), Json(NodesResponse::error(e.to_string()))),
    }
}

/// A single node.
pub async fn get_node_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    match session.access().node(NodeId(id)) {
        Some(node) => (
            StatusCode::OK,
            Json(NodesResponse::with_nodes(NodeJson::from_nodes([node]))),
        ),
        None => {
            let e = EvalsysError::NodeNotFound(NodeId(id));
            (error_status(&e), Json(NodesResponse::error(e.to_string())))
        }
    }
}

/// Replace a node's title, description and permission token.
pub async fn update_node_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<UpdateNodeRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (error_status(&e), Json(NodesResponse::error(e.to_string())));
    }

    let mut session = state.session.write().await;
    let node = NodeId(id);
    match session.update_node(
        node,
        &request.title,
        &request.description,
        request.permission_token.clone(),
    ) {
        Ok(()) => {
            tracing::info!(node_id = id, "Hierarchy node updated");
            let nodes = NodeJson::from_nodes(session.access().node(node));
            (StatusCode::OK, Json(NodesResponse::with_nodes(nodes)))
        }
        Err(e) => (error_status(&e), Json(NodesResponse::error(e.to_string()))),
    }
}

/// Add, remove or move a parent link. Returns the node afterwards.
pub async fn node_parent_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<NodeParentRequest>,
) -> impl IntoResponse {
    let node = NodeId(id);
    let parent = NodeId(request.parent_id);

    let mut session = state.session.write().await;
    let result = match request.action {
        ParentAction::Add => session.add_parent(node, parent).map(|_| ()),
        ParentAction::Remove => session.remove_parent(node, parent).map(|_| ()),
        ParentAction::Move => session.move_node(node, parent),
    };

    match result {
        Ok(()) => {
            tracing::info!(
                node_id = id,
                parent_id = request.parent_id,
                action = ?request.action,
                "Hierarchy parent link changed"
            );
            let nodes = NodeJson::from_nodes(session.access().node(node));
            (StatusCode::OK, Json(NodesResponse::with_nodes(nodes)))
        }
        Err(e) => (error_status(&e), Json(NodesResponse::error(e.to_string()))),
    }
}

/// Children of a node; `?direct=false` returns every descendant.
pub async fn children_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<ChildrenQuery>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    let access = session.access();
    if access.node(NodeId(id)).is_none() {
        return Json(NodesResponse::not_found());
    }
    let children = access.child_nodes(NodeId(id), query.direct);
    Json(NodesResponse::with_nodes(NodeJson::from_nodes(children)))
}

/// Attach or detach groups at a node, registering titled entries.
pub async fn groups_handler(
    State(state): State<AppState>,
    Json(request): Json<GroupsRequest>,
) -> impl IntoResponse {
    let node = NodeId(request.node_id);
    let ids: Vec<EvalGroupId> = request
        .groups
        .iter()
        .map(|g| EvalGroupId::new(&g.id))
        .collect();

    let mut session = state.session.write().await;
    let result = if request.detach {
        session
            .detach_groups(node, &ids)
            .map(|removed| MutationResponse::success(removed > 0))
    } else {
        attach_groups(&mut session, node, &request, &ids)
    };

    match result {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(e) => (error_status(&e), Json(MutationResponse::error(e.to_string()))),
    }
}

fn attach_groups(
    session: &mut Session,
    node: NodeId,
    request: &GroupsRequest,
    ids: &[EvalGroupId],
) -> Result<MutationResponse, EvalsysError> {
    if session.access().node(node).is_none() {
        return Err(EvalsysError::NodeNotFound(node));
    }
    for group in request.groups.iter().filter_map(|g| g.to_group()) {
        session.register_group(group)?;
    }
    session.attach_groups(node, ids)?;
    Ok(MutationResponse::with_ids(
        ids.iter().map(|g| g.as_str().to_string()).collect(),
    ))
}

/// Grant or revoke a permission at a node.
pub async fn permissions_handler(
    State(state): State<AppState>,
    Json(request): Json<PermissionRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (error_status(&e), Json(MutationResponse::error(e.to_string())));
    }

    if !request.is_known_permission() {
        tracing::warn!(permission = %request.permission, "Non-standard permission token");
    }
    let user = UserId::new(&request.user_id);
    let node = NodeId(request.node_id);
    let permission = Permission::new(&request.permission);

    let mut session = state.session.write().await;
    let result = if request.revoke {
        session.revoke_permission(&user, node, &permission)
    } else {
        session.grant_permission(user, node, permission)
    };

    match result {
        Ok(changed) => {
            tracing::info!(
                user_id = %request.user_id,
                node_id = request.node_id,
                permission = %request.permission,
                revoke = request.revoke,
                changed,
                "Permission updated"
            );
            (StatusCode::OK, Json(MutationResponse::success(changed)))
        }
        Err(e) => (error_status(&e), Json(MutationResponse::error(e.to_string()))),
    }
}

/// Execute an access-control query.
pub async fn hierarchy_query_handler(
    State(state): State<AppState>,
    Json(request): Json<HierarchyQueryRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            error_status(&e),
            Json(HierarchyQueryResponse::error(format!("Query failed: {}", e))),
        );
    }

    let session = state.session.read().await;
    (StatusCode::OK, Json(execute_hierarchy_query(&session, &request)))
}

fn group_names<'a>(groups: impl IntoIterator<Item = &'a EvalGroupId>) -> Vec<String> {
    groups.into_iter().map(|g| g.as_str().to_string()).collect()
}

/// Run a query against the session's access view. Lookup misses are empty
/// results, never errors.
fn execute_hierarchy_query(
    session: &Session,
    request: &HierarchyQueryRequest,
) -> HierarchyQueryResponse {
    let access = session.access();

    match request {
        HierarchyQueryRequest::GroupsUnderNodes { .. } => {
            let groups = access
                .groups_under_nodes(&request.node_ids())
                .iter()
                .map(|(id, set)| (id.0, group_names(set)))
                .collect();
            HierarchyQueryResponse::with_groups_by_node(groups)
        }

        HierarchyQueryRequest::CountGroupsUnderNodes { .. } => {
            let counts = access
                .count_groups_under_nodes(&request.node_ids())
                .into_iter()
                .map(|(id, count)| (id.0, count))
                .collect();
            HierarchyQueryResponse::with_counts(counts)
        }

        HierarchyQueryRequest::GroupsInSubtree { node_id } => {
            HierarchyQueryResponse::with_groups(group_names(
                &access.groups_in_subtree(NodeId(*node_id)),
            ))
        }

        HierarchyQueryRequest::UsersWithPermission { permission, .. } => {
            let users = access
                .user_ids_with_permission(&request.node_ids(), &Permission::new(permission))
                .iter()
                .map(|u| u.as_str().to_string())
                .collect();
            HierarchyQueryResponse::with_users(users)
        }

        HierarchyQueryRequest::NodesForUserPermission {
            user_id,
            permission,
        } => HierarchyQueryResponse::with_nodes(NodeJson::from_nodes(
            access.nodes_for_user_permission(&UserId::new(user_id), &Permission::new(permission)),
        )),

        HierarchyQueryRequest::HasPermission {
            user_id,
            node_id,
            permission,
            inherited,
        } => {
            let user = UserId::new(user_id);
            let permission = Permission::new(permission);
            let permitted = if *inherited {
                access.has_permission_inherited(&user, NodeId(*node_id), &permission)
            } else {
                access.has_permission(&user, NodeId(*node_id), &permission)
            };
            HierarchyQueryResponse::with_permitted(permitted)
        }

        HierarchyQueryRequest::AncestorPath { group_id } => HierarchyQueryResponse::with_nodes(
            NodeJson::from_nodes(access.ancestor_path(&EvalGroupId::new(group_id))),
        ),

        HierarchyQueryRequest::NodesAboveGroup { group_id } => HierarchyQueryResponse::with_nodes(
            NodeJson::from_nodes(access.nodes_above_group(&EvalGroupId::new(group_id))),
        ),
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Pending notification jobs.
pub async fn jobs_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    Json(JobsResponse {
        jobs: session.jobs().into_iter().map(JobJson::from).collect(),
    })
}

// =============================================================================
// EXPORT / HASH
// =============================================================================

/// Export the full session as a base64 snapshot with its checksum.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let snapshot = session.snapshot();

    let exported = snapshot_to_bytes(&snapshot)
        .and_then(|data| snapshot_checksum(&snapshot).map(|checksum| (data, checksum)));
    match exported {
        Ok((data, checksum)) => (
            StatusCode::OK,
            Json(ExportResponse::success(&data, checksum)),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::error(format!("Export failed: {}", e))),
        ),
    }
}

/// BLAKE3 hash of the exported snapshot.
pub async fn hash_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    match snapshot_crypto_hash(&session.snapshot()) {
        Ok(hash) => (StatusCode::OK, Json(HashResponse::success(hash))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HashResponse::error(format!("Hash failed: {}", e))),
        ),
    }
}
