//! # Evalsys HTTP Client
//!
//! Thin wrapper around the Evalsys REST API for the MCP server.

use serde_json::Value;

/// Errors from the HTTP client layer.
#[derive(Debug)]
pub enum ClientError {
    /// Cannot reach the Evalsys server.
    ConnectionFailed(String),
    /// 401 Unauthorized - invalid or missing API key.
    Unauthorized,
    /// 429 Too Many Requests.
    RateLimited,
    /// Server returned a 5xx error.
    ServerError(u16, String),
    /// Failed to parse response body.
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(url) => write!(f, "Cannot connect to Evalsys at {url}"),
            Self::Unauthorized => write!(f, "Unauthorized: invalid or missing API key"),
            Self::RateLimited => write!(f, "Rate limited: too many requests"),
            Self::ServerError(status, msg) => write!(f, "Server error ({status}): {msg}"),
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// HTTP client for the Evalsys REST API.
#[derive(Clone)]
pub struct EvalsysClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EvalsysClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// 4xx bodies other than 401/429 are JSON error envelopes and are
    /// returned as values so tools can show the message.
    async fn handle_response(&self, resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status.as_u16(), body));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", self.base_url)))?;
        self.handle_response(resp).await
    }

    /// GET /status
    pub async fn status(&self) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::GET, "/status")).await
    }

    /// GET /evaluations/{id}
    pub async fn evaluation(&self, id: u64) -> Result<Value, ClientError> {
        let path = format!("/evaluations/{id}");
        self.send(self.request(reqwest::Method::GET, &path)).await
    }

    /// POST /policy/check
    pub async fn check_modification(&self, state: &str, field: &str) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "state": state, "field": field });
        self.send(self.request(reqwest::Method::POST, "/policy/check").json(&body))
            .await
    }

    /// GET /hierarchy/nodes/{id}/children
    pub async fn children(&self, node_id: u64, direct: bool) -> Result<Value, ClientError> {
        let path = format!("/hierarchy/nodes/{node_id}/children?direct={direct}");
        self.send(self.request(reqwest::Method::GET, &path)).await
    }

    /// POST /hierarchy/query (generic JSON body).
    pub async fn query(&self, request: Value) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::POST, "/hierarchy/query").json(&request))
            .await
    }

    /// GET /jobs
    pub async fn jobs(&self) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::GET, "/jobs")).await
    }
}
