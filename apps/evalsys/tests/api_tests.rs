//! Integration tests for the Evalsys HTTP API.
//!
//! Uses axum-test to exercise the handlers without starting a real server.

#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::HeaderValue;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use evalsys::api::{
    AppState, EvaluationResponse, ExportResponse, HashResponse, HealthResponse,
    HierarchyQueryResponse, JobsResponse, MutationResponse, NodesResponse, PolicyCheckResponse,
    StatusResponse, UpdateEvaluationResponse, create_router,
};
use evalsys_core::{Session, snapshot_from_bytes};
use serde_json::json;
use std::sync::Mutex;

/// Serializes tests that touch `EVALSYS_API_KEY`.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Holds the env mutex and clears the key on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("EVALSYS_API_KEY") };
    }
}

fn create_test_server() -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("EVALSYS_API_KEY") };
    let router = create_router(AppState::new(Session::new()));
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

/// Root (0) -> College (1) -> Department (2), with `course-101` attached at
/// the department and `dean` holding `view_node_data` at the college.
async fn populate_hierarchy(server: &TestServer) {
    server
        .post("/hierarchy/nodes")
        .json(&json!({"title": "University"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/hierarchy/nodes")
        .json(&json!({"parent_id": 0, "title": "College"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/hierarchy/nodes")
        .json(&json!({"parent_id": 1, "title": "Department", "permission_token": "dept"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/hierarchy/groups")
        .json(&json!({
            "node_id": 2,
            "groups": [{"id": "course-101", "title": "Course 101", "group_type": "course"}]
        }))
        .await
        .assert_status_ok();
    server
        .post("/hierarchy/permissions")
        .json(&json!({"user_id": "dean", "node_id": 1, "permission": "view_node_data"}))
        .await
        .assert_status_ok();
}

/// Creates an evaluation whose dates place it in the `Due` phase right now.
async fn create_due_evaluation(server: &TestServer) -> u64 {
    let now = Utc::now();
    let response = server
        .post("/evaluations")
        .json(&json!({
            "title": "Midterm feedback",
            "owner": "instructor",
            "start_date": now - Duration::days(8),
            "due_date": now - Duration::hours(1),
            "stop_date": now + Duration::days(2),
            "view_date": now + Duration::days(10),
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let created: EvaluationResponse = response.json();
    let evaluation = created.evaluation.unwrap();
    assert_eq!(evaluation.state, "Due");
    evaluation.id
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_empty_session() {
    let (server, _guard) = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.hierarchy_id, "default");
    assert!(!status.persistent);
    assert_eq!(status.evaluations, 0);
    assert_eq!(status.nodes, 0);
    assert!(status.next_job_at.is_none());
}

// =============================================================================
// EVALUATIONS
// =============================================================================

#[tokio::test]
async fn test_create_evaluation_without_dates_is_unknown() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/evaluations")
        .json(&json!({"title": "Draft", "owner": "instructor"}))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);
    let created: EvaluationResponse = response.json();
    assert!(created.success);
    assert_eq!(created.evaluation.unwrap().state, "Unknown");
}

#[tokio::test]
async fn test_create_evaluation_rejects_empty_owner() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/evaluations")
        .json(&json!({"title": "Draft", "owner": "  "}))
        .await;

    response.assert_status_bad_request();
    let body: EvaluationResponse = response.json();
    assert!(!body.success);
    assert!(body.error.is_some());
}

#[tokio::test]
async fn test_get_missing_evaluation_is_not_found() {
    let (server, _guard) = create_test_server();

    let response = server.get("/evaluations/42").await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn test_due_evaluation_denies_title_edit() {
    let (server, _guard) = create_test_server();
    let id = create_due_evaluation(&server).await;

    let response = server
        .patch(&format!("/evaluations/{id}"))
        .json(&json!({"changes": [{"field": "title", "value": "Renamed"}]}))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: UpdateEvaluationResponse = response.json();
    assert!(!body.success);

    let unchanged: EvaluationResponse = server.get(&format!("/evaluations/{id}")).await.json();
    assert_eq!(unchanged.evaluation.unwrap().title, "Midterm feedback");
}

#[tokio::test]
async fn test_due_evaluation_allows_stop_date_edit() {
    let (server, _guard) = create_test_server();
    let id = create_due_evaluation(&server).await;
    let new_stop = Utc::now() + Duration::days(4);

    let response = server
        .patch(&format!("/evaluations/{id}"))
        .json(&json!({"changes": [{"field": "stopDate", "value": new_stop}]}))
        .await;

    response.assert_status_ok();
    let body: UpdateEvaluationResponse = response.json();
    assert!(body.success);
    assert_eq!(body.state.as_deref(), Some("Due"));
}

#[tokio::test]
async fn test_mixed_batch_is_all_or_nothing() {
    let (server, _guard) = create_test_server();
    let id = create_due_evaluation(&server).await;

    let response = server
        .patch(&format!("/evaluations/{id}"))
        .json(&json!({"changes": [
            {"field": "stopDate", "value": Utc::now() + Duration::days(5)},
            {"field": "title", "value": "Renamed"}
        ]}))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let after: EvaluationResponse = server.get(&format!("/evaluations/{id}")).await.json();
    let evaluation = after.evaluation.unwrap();
    assert_eq!(evaluation.title, "Midterm feedback");
    assert!(evaluation.stop_date.unwrap() < Utc::now() + Duration::days(3));
}

#[tokio::test]
async fn test_delete_only_before_start() {
    let (server, _guard) = create_test_server();
    let now = Utc::now();

    let queued: EvaluationResponse = server
        .post("/evaluations")
        .json(&json!({
            "title": "Next term",
            "owner": "instructor",
            "start_date": now + Duration::days(30),
            "due_date": now + Duration::days(37),
            "stop_date": now + Duration::days(38),
            "view_date": now + Duration::days(60),
        }))
        .await
        .json();
    let queued = queued.evaluation.unwrap();
    assert_eq!(queued.state, "InQueue");

    let due_id = create_due_evaluation(&server).await;

    server
        .delete(&format!("/evaluations/{}", queued.id))
        .await
        .assert_status_ok();
    server
        .delete(&format!("/evaluations/{due_id}"))
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.evaluations, 1);
}

#[tokio::test]
async fn test_assign_expands_subtree_groups() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let created: EvaluationResponse = server
        .post("/evaluations")
        .json(&json!({"title": "Course survey", "owner": "instructor"}))
        .await
        .json();
    let id = created.evaluation.unwrap().id;

    let response = server
        .post(&format!("/evaluations/{id}/assign"))
        .json(&json!({"node_ids": [1]}))
        .await;

    response.assert_status_ok();
    let body: MutationResponse = response.json();
    assert_eq!(body.ids, vec!["course-101".to_string()]);

    let again: MutationResponse = server
        .post(&format!("/evaluations/{id}/assign"))
        .json(&json!({"node_ids": [2]}))
        .await
        .json();
    assert!(!again.changed);
}

#[tokio::test]
async fn test_assign_to_missing_node_is_not_found() {
    let (server, _guard) = create_test_server();
    let created: EvaluationResponse = server
        .post("/evaluations")
        .json(&json!({"title": "Course survey", "owner": "instructor"}))
        .await
        .json();
    let id = created.evaluation.unwrap().id;

    let response = server
        .post(&format!("/evaluations/{id}/assign"))
        .json(&json!({"node_ids": [99]}))
        .await;

    response.assert_status_not_found();
}

// =============================================================================
// POLICY
// =============================================================================

#[tokio::test]
async fn test_policy_check() {
    let (server, _guard) = create_test_server();

    let denied: PolicyCheckResponse = server
        .post("/policy/check")
        .json(&json!({"state": "GracePeriod", "field": "title"}))
        .await
        .json();
    assert!(!denied.permitted);

    let allowed: PolicyCheckResponse = server
        .post("/policy/check")
        .json(&json!({"state": "GracePeriod", "field": "stopDate"}))
        .await
        .json();
    assert!(allowed.permitted);

    let unknown: PolicyCheckResponse = server
        .post("/policy/check")
        .json(&json!({"state": "NoSuchState", "field": "title"}))
        .await
        .json();
    assert!(unknown.permitted);
}

// =============================================================================
// HIERARCHY
// =============================================================================

#[tokio::test]
async fn test_root_without_hierarchy_is_conflict() {
    let (server, _guard) = create_test_server();

    let response = server.get("/hierarchy/root").await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_second_root_rejected() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let response = server
        .post("/hierarchy/nodes")
        .json(&json!({"title": "Another University"}))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_children_direct_and_transitive() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let direct: NodesResponse = server.get("/hierarchy/nodes/0/children").await.json();
    let titles: Vec<&str> = direct.nodes.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["College"]);

    let all: NodesResponse = server
        .get("/hierarchy/nodes/0/children?direct=false")
        .await
        .json();
    assert_eq!(all.nodes.len(), 2);
}

#[tokio::test]
async fn test_children_of_unknown_node_is_empty() {
    let (server, _guard) = create_test_server();

    let response = server.get("/hierarchy/nodes/7/children").await;

    response.assert_status_ok();
    let body: NodesResponse = response.json();
    assert!(body.success);
    assert!(!body.found);
    assert!(body.nodes.is_empty());
}

#[tokio::test]
async fn test_children_of_leaf_is_found() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let response = server.get("/hierarchy/nodes/2/children").await;

    response.assert_status_ok();
    let body: NodesResponse = response.json();
    assert!(body.found);
    assert!(body.nodes.is_empty());
}

#[tokio::test]
async fn test_get_node() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let body: NodesResponse = server.get("/hierarchy/nodes/2").await.json();
    let node = &body.nodes[0];
    assert_eq!(node.title, "Department");
    assert_eq!(node.parent_ids, vec![1]);
    assert_eq!(node.permission_token.as_deref(), Some("dept"));
    assert_eq!(node.depth, 2);

    server
        .get("/hierarchy/nodes/50")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_update_node() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let response = server
        .patch("/hierarchy/nodes/2")
        .json(&json!({"title": "Chemistry", "permission_token": "chem"}))
        .await;

    response.assert_status_ok();
    let body: NodesResponse = response.json();
    assert_eq!(body.nodes[0].title, "Chemistry");
    assert_eq!(body.nodes[0].permission_token.as_deref(), Some("chem"));

    server
        .patch("/hierarchy/nodes/50")
        .json(&json!({"title": "Nowhere"}))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_node_parent_links() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let moved: NodesResponse = server
        .post("/hierarchy/nodes/2/parents")
        .json(&json!({"parent_id": 0, "action": "move"}))
        .await
        .json();
    assert_eq!(moved.nodes[0].parent_ids, vec![0]);

    let linked: NodesResponse = server
        .post("/hierarchy/nodes/2/parents")
        .json(&json!({"parent_id": 1}))
        .await
        .json();
    assert_eq!(linked.nodes[0].parent_ids, vec![0, 1]);

    let unlinked: NodesResponse = server
        .post("/hierarchy/nodes/2/parents")
        .json(&json!({"parent_id": 0, "action": "remove"}))
        .await
        .json();
    assert_eq!(unlinked.nodes[0].parent_ids, vec![1]);

    // the last parent cannot be removed
    server
        .post("/hierarchy/nodes/2/parents")
        .json(&json!({"parent_id": 1, "action": "remove"}))
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_node_parent_cycle_is_conflict() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let response = server
        .post("/hierarchy/nodes/1/parents")
        .json(&json!({"parent_id": 2, "action": "add"}))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let children: NodesResponse = server.get("/hierarchy/nodes/1/children").await.json();
    assert_eq!(children.nodes.len(), 1);
}

#[tokio::test]
async fn test_detach_groups() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let body: MutationResponse = server
        .post("/hierarchy/groups")
        .json(&json!({"node_id": 2, "groups": [{"id": "course-101"}], "detach": true}))
        .await
        .json();
    assert!(body.changed);

    let groups: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "groups_in_subtree", "node_id": 0}))
        .await
        .json();
    assert!(groups.groups.is_empty());
}

// =============================================================================
// HIERARCHY QUERIES
// =============================================================================

#[tokio::test]
async fn test_query_groups_under_nodes() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let body: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "groups_under_nodes", "node_ids": [1, 2, 99]}))
        .await
        .json();

    assert!(body.success);
    assert_eq!(body.groups_by_node.len(), 2);
    assert!(body.groups_by_node[&1].is_empty());
    assert_eq!(body.groups_by_node[&2], vec!["course-101".to_string()]);

    let counts: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "count_groups_under_nodes", "node_ids": [2]}))
        .await
        .json();
    assert_eq!(counts.counts[&2], 1);
}

#[tokio::test]
async fn test_query_permissions() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let inherited: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({
            "type": "has_permission",
            "user_id": "dean",
            "node_id": 2,
            "permission": "view_node_data",
            "inherited": true
        }))
        .await
        .json();
    assert_eq!(inherited.permitted, Some(true));

    let direct: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({
            "type": "has_permission",
            "user_id": "dean",
            "node_id": 2,
            "permission": "view_node_data"
        }))
        .await
        .json();
    assert_eq!(direct.permitted, Some(false));

    let users: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({
            "type": "users_with_permission",
            "node_ids": [1],
            "permission": "view_node_data"
        }))
        .await
        .json();
    assert_eq!(users.users, vec!["dean".to_string()]);

    let nodes: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({
            "type": "nodes_for_user_permission",
            "user_id": "dean",
            "permission": "view_node_data"
        }))
        .await
        .json();
    assert_eq!(nodes.nodes.len(), 1);
    assert_eq!(nodes.nodes[0].id, 1);
}

#[tokio::test]
async fn test_query_ancestor_path() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let body: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "ancestor_path", "group_id": "course-101"}))
        .await
        .json();
    let ids: Vec<u64> = body.nodes.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![0, 1]);

    let above: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "nodes_above_group", "group_id": "course-101"}))
        .await
        .json();
    assert_eq!(above.nodes.len(), 3);

    let missing: HierarchyQueryResponse = server
        .post("/hierarchy/query")
        .json(&json!({"type": "ancestor_path", "group_id": "nope"}))
        .await
        .json();
    assert!(missing.success);
    assert!(missing.nodes.is_empty());
}

// =============================================================================
// JOBS / EXPORT / HASH
// =============================================================================

#[tokio::test]
async fn test_jobs_listed_for_dated_evaluation() {
    let (server, _guard) = create_test_server();
    create_due_evaluation(&server).await;

    let body: JobsResponse = server.get("/jobs").await.json();

    // Only the stop and view transitions are still ahead.
    let kinds: Vec<&str> = body.jobs.iter().map(|job| job.kind.as_str()).collect();
    assert_eq!(body.jobs.len(), 2);
    assert!(body.jobs.iter().all(|job| job.evaluation_id == 1));
    assert!(!kinds.contains(&"due"));
}

#[tokio::test]
async fn test_export_decodes_to_snapshot() {
    use base64::Engine;

    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let response = server.post("/export").await;

    response.assert_status_ok();
    let export: ExportResponse = response.json();
    assert!(export.success);
    let data = base64::engine::general_purpose::STANDARD
        .decode(export.data.unwrap())
        .unwrap();
    let snapshot = snapshot_from_bytes(&data).unwrap();
    assert_eq!(snapshot.hierarchy.len(), 3);
}

#[tokio::test]
async fn test_hash_is_stable() {
    let (server, _guard) = create_test_server();
    populate_hierarchy(&server).await;

    let first: HashResponse = server.get("/hash").await.json();
    let second: HashResponse = server.get("/hash").await.json();

    assert_eq!(first.algorithm, "blake3");
    assert_eq!(first.hash.as_ref().unwrap().len(), 64);
    assert_eq!(first.hash, second.hash);
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[tokio::test]
async fn test_invalid_json_body() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/evaluations")
        .bytes(bytes::Bytes::from("not valid json"))
        .content_type("application/json")
        .await;

    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_unknown_query_type_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/hierarchy/query")
        .json(&json!({"type": "everything"}))
        .await;

    assert!(response.status_code().is_client_error());
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

fn create_auth_test_server(api_key: &str) -> TestServer {
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("EVALSYS_API_KEY", api_key) };
    TestServer::new(create_router(AppState::new(Session::new()))).unwrap()
}

fn cleanup_auth_env() {
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("EVALSYS_API_KEY") };
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse::<HeaderValue>().unwrap(),
        )
        .await;

    cleanup_auth_env();

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_missing_or_wrong_key_rejected() {
    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let server = create_auth_test_server("correct-key");

    let missing = server.get("/status").await;
    let wrong = server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .await;

    cleanup_auth_env();

    assert_eq!(missing.status_code().as_u16(), 401);
    assert_eq!(wrong.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypasses_auth() {
    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let server = create_auth_test_server("secret-key-for-bypass-test");

    let response = server.get("/health").await;

    cleanup_auth_env();

    response.assert_status_ok();
}
