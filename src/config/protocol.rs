//! Protocol configuration module.

use serde::{Deserialize, Serialize};

use super::{ConfigResult, Validate};
use crate::error::config::ConfigError;

/// Protocol versions and the identity advertised during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Protocol versions this endpoint accepts
    pub supported_versions: Vec<String>,

    /// Implementation name sent in `serverInfo` / `clientInfo`
    pub server_name: String,

    /// Implementation version sent in `serverInfo` / `clientInfo`
    pub server_version: String,

    /// Instructions returned to clients from `initialize`
    pub instructions: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            supported_versions: vec!["2025-06-18".to_string(), "2025-03-26".to_string()],
            server_name: "mcp-conduit".to_string(),
            server_version: crate::VERSION.to_string(),
            instructions: None,
        }
    }
}

impl Validate for ProtocolConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.supported_versions.is_empty() {
            return Err(ConfigError::ValidationError(
                "supported_versions cannot be empty".to_string(),
            ));
        }

        if self.supported_versions.iter().any(|v| v.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "supported_versions cannot contain empty entries".to_string(),
            ));
        }

        if self.server_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Server name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
