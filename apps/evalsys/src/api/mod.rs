//! # Evalsys HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Session counts
//! - `POST /evaluations` - Create an evaluation
//! - `GET|PATCH|DELETE /evaluations/{id}` - Read, update or delete an evaluation
//! - `POST /evaluations/{id}/assign` - Assign to nodes and groups
//! - `POST /policy/check` - Modification policy lookup
//! - `GET /hierarchy/root` - Root node
//! - `POST /hierarchy/nodes` - Create a node
//! - `GET|PATCH /hierarchy/nodes/{id}` - Read or edit a node
//! - `POST /hierarchy/nodes/{id}/parents` - Add, remove or move a parent link
//! - `GET /hierarchy/nodes/{id}/children?direct=bool` - Children of a node
//! - `POST /hierarchy/groups` - Attach or detach groups
//! - `POST /hierarchy/permissions` - Grant or revoke a permission
//! - `POST /hierarchy/query` - Access-control queries
//! - `GET /jobs` - Pending notification jobs
//! - `POST /export` - Export the session snapshot
//! - `GET /hash` - BLAKE3 hash of the session snapshot
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `EVALSYS_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `EVALSYS_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `EVALSYS_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use handlers::error_status;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    AssignRequest, ChildrenQuery, CreateEvaluationRequest, CreateNodeRequest, EvaluationJson,
    EvaluationResponse, ExportResponse, GroupJson, GroupsRequest, HashResponse, HealthResponse,
    HierarchyQueryRequest, HierarchyQueryResponse, JobJson, JobsResponse, MutationResponse,
    NodeJson, NodeParentRequest, NodesResponse, ParentAction, PermissionRequest,
    PolicyCheckRequest, PolicyCheckResponse, StatusResponse, UpdateEvaluationRequest,
    UpdateEvaluationResponse, UpdateNodeRequest,
};

use crate::config::{Config, DEFAULT_BODY_LIMIT};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use evalsys_core::{EvalsysError, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the session.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<Session>>,
}

impl AppState {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build CORS layer from `EVALSYS_CORS_ORIGINS`.
///
/// - `*`: allows all origins (development only)
/// - unset, or no valid entries: localhost only
/// - otherwise: the comma-separated list
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("EVALSYS_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (EVALSYS_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in EVALSYS_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods(ALLOWED_METHODS)
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No EVALSYS_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with the default body limit.
pub fn create_router(state: AppState) -> Router {
    build_router(state, DEFAULT_BODY_LIMIT)
}

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Authentication (if configured)
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set EVALSYS_API_KEY environment variable to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/evaluations", post(handlers::create_evaluation_handler))
        .route(
            "/evaluations/{id}",
            get(handlers::get_evaluation_handler)
                .patch(handlers::update_evaluation_handler)
                .delete(handlers::delete_evaluation_handler),
        )
        .route(
            "/evaluations/{id}/assign",
            post(handlers::assign_evaluation_handler),
        )
        .route("/policy/check", post(handlers::policy_check_handler))
        .route("/hierarchy/root", get(handlers::root_handler))
        .route("/hierarchy/nodes", post(handlers::create_node_handler))
        .route(
            "/hierarchy/nodes/{id}",
            get(handlers::get_node_handler).patch(handlers::update_node_handler),
        )
        .route(
            "/hierarchy/nodes/{id}/children",
            get(handlers::children_handler),
        )
        .route(
            "/hierarchy/nodes/{id}/parents",
            post(handlers::node_parent_handler),
        )
        .route("/hierarchy/groups", post(handlers::groups_handler))
        .route("/hierarchy/permissions", post(handlers::permissions_handler))
        .route("/hierarchy/query", post(handlers::hierarchy_query_handler))
        .route("/jobs", get(handlers::jobs_handler))
        .route("/export", post(handlers::export_handler))
        .route("/hash", get(handlers::hash_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// NOTIFICATION TICKER
// =============================================================================

/// Drain due notification jobs once. Returns how many fired.
///
/// Delivery (email) is external; each fired job is logged.
pub async fn run_notification_tick(state: &AppState) -> Result<usize, EvalsysError> {
    let mut session = state.session.write().await;
    let fired = session.take_due_notifications(chrono::Utc::now())?;
    for job in &fired {
        tracing::info!(
            event = "notification",
            job_id = %job.id,
            evaluation_id = job.payload.evaluation_id.0,
            kind = %job.payload.kind,
            run_at = %job.run_at,
            "Notification due"
        );
    }
    Ok(fired.len())
}

/// Spawn the ticker task that drains due jobs every `period`.
pub fn spawn_notification_ticker(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = run_notification_tick(&state).await {
                tracing::error!(error = %e, "Notification tick failed");
            }
        }
    })
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server (and the notification ticker, when enabled).
pub async fn run_server(config: &Config, session: Session) -> Result<(), EvalsysError> {
    let state = AppState::new(session);

    let ticker = if config.notifications.enabled {
        tracing::info!(
            "Notification ticker enabled: every {}s",
            config.notifications.tick_seconds
        );
        Some(spawn_notification_ticker(
            state.clone(),
            Duration::from_secs(config.notifications.tick_seconds),
        ))
    } else {
        tracing::info!("Notification ticker disabled");
        None
    };

    let router = build_router(state, config.server.body_limit_bytes);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EvalsysError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Evalsys HTTP server listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| EvalsysError::IoError(format!("Server error: {}", e)));

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// =============================================================================
// TESTS
// =============================================================================
