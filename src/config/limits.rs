//! Rate limits configuration module.
//!
//! Every limiter uses the same fixed window; each scope has its own budget.

use serde::{Deserialize, Serialize};

use super::{ConfigResult, Validate};
use crate::error::config::ConfigError;

/// Rate limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Window length in milliseconds
    pub window_ms: u64,

    /// Progress notifications per token per window
    pub progress_per_window: u32,

    /// Tool calls per tool per window
    pub tools_per_window: u32,

    /// Completion requests per argument per window
    pub completions_per_window: u32,

    /// Log messages per logger per window
    pub logs_per_window: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            progress_per_window: 20,
            tools_per_window: 5,
            completions_per_window: 10,
            logs_per_window: 20,
        }
    }
}

impl Validate for LimitsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "window_ms must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("progress_per_window", self.progress_per_window),
            ("tools_per_window", self.tools_per_window),
            ("completions_per_window", self.completions_per_window),
            ("logs_per_window", self.logs_per_window),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }
}
