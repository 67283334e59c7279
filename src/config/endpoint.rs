//! Endpoint configuration module.
//!
//! Request id seeding, call timeouts, liveness probing and runtime sizing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigResult, Validate};
use crate::error::config::ConfigError;

/// Largest seed accepted for request ids. Peers that decode numbers as doubles
/// still see every issued id exactly.
pub const MAX_INITIAL_REQUEST_ID: i64 = 9_007_199_254_740_991;

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// First id issued to an outgoing request
    pub initial_request_id: i64,

    /// Timeout for outgoing requests in milliseconds
    pub default_timeout_ms: u64,

    /// Interval between liveness pings in milliseconds (0 disables probing)
    pub ping_interval_ms: u64,

    /// Timeout for a single ping in milliseconds
    pub ping_timeout_ms: u64,

    /// Consecutive ping failures tolerated before the failure callback runs
    pub max_ping_failures: u32,

    /// Number of runtime worker threads
    pub worker_threads: usize,
}

impl EndpointConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// The ping interval, or `None` when probing is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            initial_request_id: 1,
            default_timeout_ms: 30000,
            ping_interval_ms: 0,
            ping_timeout_ms: 5000,
            max_ping_failures: 2,
            worker_threads: num_cpus::get(),
        }
    }
}

impl Validate for EndpointConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(0..=MAX_INITIAL_REQUEST_ID).contains(&self.initial_request_id) {
            return Err(ConfigError::ValidationError(format!(
                "initial_request_id must be between 0 and {}",
                MAX_INITIAL_REQUEST_ID
            )));
        }

        if self.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "default_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.ping_interval_ms > 0 {
            if self.ping_timeout_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "ping_timeout_ms must be greater than 0".to_string(),
                ));
            }
            if self.max_ping_failures == 0 {
                return Err(ConfigError::ValidationError(
                    "max_ping_failures must be greater than 0".to_string(),
                ));
            }
        }

        if self.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
