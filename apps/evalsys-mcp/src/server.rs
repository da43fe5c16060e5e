//! # Evalsys MCP Server
//!
//! Implements `ServerHandler` with read-only tools that proxy to the Evalsys
//! HTTP API.

use crate::client::{ClientError, EvalsysClient};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::Value;

// =============================================================================
// MCP SERVER
// =============================================================================

/// MCP server that bridges to an Evalsys HTTP API.
#[derive(Clone)]
pub struct EvalsysMcp {
    client: EvalsysClient,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

// =============================================================================
// TOOL PARAMETER STRUCTS
// =============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EvaluationParams {
    #[schemars(description = "The evaluation ID")]
    pub evaluation_id: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CheckModificationParams {
    #[schemars(description = "State name: InQueue, Active, Due, GracePeriod, Closed, Viewable or Unknown")]
    pub state: String,
    #[schemars(description = "Field name (e.g. 'title', 'dueDate', 'stopDate')")]
    pub field: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ChildrenParams {
    #[schemars(description = "The hierarchy node ID")]
    pub node_id: u64,
    #[schemars(description = "Only direct children (default: true)")]
    pub direct: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GroupsParams {
    #[schemars(description = "Hierarchy node IDs to list directly attached groups for")]
    pub node_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PermissionUsersParams {
    #[schemars(description = "Hierarchy node IDs to check")]
    pub node_ids: Vec<u64>,
    #[schemars(description = "Permission name (e.g. 'view_node_data')")]
    pub permission: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct HasPermissionParams {
    #[schemars(description = "The user ID")]
    pub user_id: String,
    #[schemars(description = "The hierarchy node ID")]
    pub node_id: u64,
    #[schemars(description = "Permission name (e.g. 'view_node_data')")]
    pub permission: String,
    #[schemars(description = "Also accept grants at ancestor nodes (default: true)")]
    pub inherited: Option<bool>,
}

fn internal(e: ClientError) -> McpError {
    McpError::internal_error(format!("{e}"), None)
}

fn text_result(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

// =============================================================================
// TOOL IMPLEMENTATIONS
// =============================================================================

#[tool_router]
impl EvalsysMcp {
    pub fn new(client: EvalsysClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get current Evalsys counts (evaluations, nodes, groups, grants, jobs)")]
    async fn evalsys_status(&self) -> Result<CallToolResult, McpError> {
        let resp = self.client.status().await.map_err(internal)?;
        let count = |key: &str| resp.get(key).and_then(Value::as_u64).unwrap_or(0);
        let next = resp
            .get("next_job_at")
            .and_then(Value::as_str)
            .unwrap_or("none");
        text_result(format!(
            "Evalsys Status:\n  Evaluations: {}\n  Nodes: {}\n  Groups: {}\n  Grants: {}\n  Jobs: {}\n  Next job: {next}",
            count("evaluations"),
            count("nodes"),
            count("groups"),
            count("grants"),
            count("jobs"),
        ))
    }

    #[tool(description = "Show an evaluation with its current lifecycle state")]
    async fn evalsys_evaluation(
        &self,
        params: Parameters<EvaluationParams>,
    ) -> Result<CallToolResult, McpError> {
        let resp = self
            .client
            .evaluation(params.0.evaluation_id)
            .await
            .map_err(internal)?;
        text_result(format_evaluation(&resp))
    }

    #[tool(description = "Check whether a field may be modified while an evaluation is in a given state")]
    async fn evalsys_check_modification(
        &self,
        params: Parameters<CheckModificationParams>,
    ) -> Result<CallToolResult, McpError> {
        let CheckModificationParams { state, field } = params.0;
        let resp = self
            .client
            .check_modification(&state, &field)
            .await
            .map_err(internal)?;
        let permitted = resp
            .get("permitted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let verdict = if permitted { "permitted" } else { "denied" };
        text_result(format!("Modifying '{field}' in state {state}: {verdict}"))
    }

    #[tool(description = "List the children of a hierarchy node")]
    async fn evalsys_children(
        &self,
        params: Parameters<ChildrenParams>,
    ) -> Result<CallToolResult, McpError> {
        let direct = params.0.direct.unwrap_or(true);
        let resp = self
            .client
            .children(params.0.node_id, direct)
            .await
            .map_err(internal)?;
        text_result(format_nodes(&resp))
    }

    #[tool(description = "List the groups attached directly under each hierarchy node")]
    async fn evalsys_groups(
        &self,
        params: Parameters<GroupsParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = serde_json::json!({
            "type": "groups_under_nodes",
            "node_ids": params.0.node_ids,
        });
        let resp = self.client.query(query).await.map_err(internal)?;
        text_result(format_groups_by_node(&resp))
    }

    #[tool(description = "List users holding a permission at any of the given hierarchy nodes")]
    async fn evalsys_permission_users(
        &self,
        params: Parameters<PermissionUsersParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = serde_json::json!({
            "type": "users_with_permission",
            "node_ids": params.0.node_ids,
            "permission": params.0.permission,
        });
        let resp = self.client.query(query).await.map_err(internal)?;
        let users = string_list(&resp, "users");
        if users.is_empty() {
            return text_result("No users hold that permission at those nodes.".to_string());
        }
        text_result(format!("Users ({}):\n  {}", users.len(), users.join("\n  ")))
    }

    #[tool(description = "Check whether a user holds a permission at a hierarchy node")]
    async fn evalsys_has_permission(
        &self,
        params: Parameters<HasPermissionParams>,
    ) -> Result<CallToolResult, McpError> {
        let HasPermissionParams {
            user_id,
            node_id,
            permission,
            inherited,
        } = params.0;
        let query = serde_json::json!({
            "type": "has_permission",
            "user_id": user_id,
            "node_id": node_id,
            "permission": permission,
            "inherited": inherited.unwrap_or(true),
        });
        let resp = self.client.query(query).await.map_err(internal)?;
        let permitted = resp
            .get("permitted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let verdict = if permitted { "holds" } else { "does not hold" };
        text_result(format!("{user_id} {verdict} '{permission}' at node {node_id}"))
    }

    #[tool(description = "List pending notification jobs")]
    async fn evalsys_jobs(&self) -> Result<CallToolResult, McpError> {
        let resp = self.client.jobs().await.map_err(internal)?;
        let jobs = resp
            .get("jobs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if jobs.is_empty() {
            return text_result("No pending jobs.".to_string());
        }
        let mut parts = vec![format!("Pending jobs ({}):", jobs.len())];
        for job in &jobs {
            let run_at = job.get("run_at").and_then(Value::as_str).unwrap_or("?");
            let id = job.get("id").and_then(Value::as_str).unwrap_or("?");
            parts.push(format!("  {run_at}  {id}"));
        }
        text_result(parts.join("\n"))
    }
}

// =============================================================================
// SERVER HANDLER
// =============================================================================

#[tool_handler]
impl ServerHandler for EvalsysMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Evalsys teaching evaluation server. Use tools to inspect evaluations \
                 and their lifecycle state, check the modification policy, and query \
                 the organizational hierarchy and its permissions."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// =============================================================================
// RESPONSE FORMATTING
// =============================================================================

fn error_text(resp: &Value) -> Option<String> {
    resp.get("error")
        .and_then(Value::as_str)
        .map(|e| format!("Error: {e}"))
}

fn string_list(resp: &Value, key: &str) -> Vec<String> {
    resp.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn format_evaluation(resp: &Value) -> String {
    let Some(evaluation) = resp.get("evaluation").filter(|v| !v.is_null()) else {
        return error_text(resp).unwrap_or_else(|| "Not found.".to_string());
    };
    let field = |key: &str| {
        evaluation
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };
    let groups = evaluation
        .get("assigned_groups")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    [
        format!(
            "Evaluation {}: {}",
            evaluation.get("id").and_then(Value::as_u64).unwrap_or(0),
            field("title")
        ),
        format!("  State: {}", field("state")),
        format!("  Owner: {}", field("owner")),
        format!("  Start: {}", field("start_date")),
        format!("  Due:   {}", field("due_date")),
        format!("  Stop:  {}", field("stop_date")),
        format!("  View:  {}", field("view_date")),
        format!("  Assigned groups: {groups}"),
    ]
    .join("\n")
}

fn format_nodes(resp: &Value) -> String {
    if let Some(err) = error_text(resp) {
        return err;
    }
    let nodes = resp
        .get("nodes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if resp.get("found").and_then(Value::as_bool) == Some(false) {
        return "Node not found.".to_string();
    }
    if nodes.is_empty() {
        return "No nodes.".to_string();
    }
    let mut parts = vec![format!("Nodes ({}):", nodes.len())];
    for node in &nodes {
        let id = node.get("id").and_then(Value::as_u64).unwrap_or(0);
        let title = node.get("title").and_then(Value::as_str).unwrap_or("?");
        let depth = node.get("depth").and_then(Value::as_u64).unwrap_or(0);
        parts.push(format!("  [{id}] {title} (depth {depth})"));
    }
    parts.join("\n")
}

fn format_groups_by_node(resp: &Value) -> String {
    if let Some(err) = error_text(resp) {
        return err;
    }
    let Some(map) = resp.get("groups_by_node").and_then(Value::as_object) else {
        return "No known nodes.".to_string();
    };
    let mut parts = Vec::new();
    for (node, groups) in map {
        let names: Vec<&str> = groups
            .as_array()
            .map(|g| g.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        parts.push(format!("Node {node}: {}", names.join(", ")));
    }
    parts.join("\n")
}
