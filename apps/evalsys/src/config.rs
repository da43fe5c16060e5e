//! # Configuration
//!
//! Optional TOML configuration for the server.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! body_limit_bytes = 2097152
//!
//! [notifications]
//! enabled = true
//! tick_seconds = 60
//! ```
//!
//! Every key is optional. CLI flags override the file; secrets and limits
//! (`EVALSYS_API_KEY`, `EVALSYS_RATE_LIMIT`, `EVALSYS_CORS_ORIGINS`) stay in
//! the environment.

use evalsys_core::EvalsysError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default request body limit: 2 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Maximum config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

/// `[notifications]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationSection {
    /// Run the ticker that drains due jobs.
    pub enabled: bool,
    pub tick_seconds: u64,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: 60,
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub notifications: NotificationSection,
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, EvalsysError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EvalsysError::InvalidInput(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, EvalsysError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            EvalsysError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(EvalsysError::InvalidInput(format!(
                "Config file exceeds maximum of {MAX_CONFIG_FILE_SIZE} bytes"
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalsysError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, EvalsysError> {
        match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), EvalsysError> {
        if self.server.body_limit_bytes == 0 {
            return Err(EvalsysError::InvalidInput(
                "server.body_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if self.notifications.tick_seconds == 0 {
            return Err(EvalsysError::InvalidInput(
                "notifications.tick_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// =============================================================================
// TESTS
// =============================================================================
