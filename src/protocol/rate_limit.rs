//! Fixed-window rate limiter.
//!
//! Each key owns a window that starts at its first admitted call. Once the time since
//! the window started exceeds the window length, the window restarts at the current
//! instant with a zero count. Keys are created on first use and never pruned.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::limits::LimitsConfig;
use crate::config::ConfigResult;
use crate::error::{ConfigError, ProtocolError};

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window admission control keyed by an arbitrary string.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Arc<Mutex<Window>>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` calls per key in each `window`.
    pub fn new(limit: u32, window: Duration) -> ConfigResult<Self> {
        if limit == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(ConfigError::ValidationError(
                "rate limit window must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            limit,
            window,
            windows: DashMap::new(),
        })
    }

    /// Admits one call for `key`, or fails once the key's window is full.
    pub fn require_allowance(&self, key: &str) -> Result<(), ProtocolError> {
        if self.try_acquire(key) {
            Ok(())
        } else {
            Err(ProtocolError::RateLimitExceeded(key.to_string()))
        }
    }

    /// Same as [`require_allowance`](Self::require_allowance) but reports a bool.
    pub fn try_acquire(&self, key: &str) -> bool {
        // The map shard lock is released before the window lock is taken.
        let window = match self.windows.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => Arc::clone(
                self.windows
                    .entry(key.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(Window {
                            start: Instant::now(),
                            count: 0,
                        }))
                    })
                    .value(),
            ),
        };

        let mut window = window.lock();
        let now = Instant::now();
        if now.duration_since(window.start) > self.window {
            window.start = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            tracing::debug!(key, limit = self.limit, "Rate limit reached");
            return false;
        }
        window.count += 1;
        true
    }

    /// The number of calls admitted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// What a limiter throttles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Progress notifications, keyed by token
    Progress,
    /// Tool invocations, keyed by tool name
    Tools,
    /// Completion requests, keyed by argument reference
    Completions,
    /// Log messages, keyed by logger name
    Logs,
}

/// The limiters one connection applies.
#[derive(Debug)]
pub struct RateLimits {
    progress: Arc<RateLimiter>,
    tools: Arc<RateLimiter>,
    completions: Arc<RateLimiter>,
    logs: Arc<RateLimiter>,
}

impl RateLimits {
    /// Builds every limiter from configuration.
    pub fn from_config(config: &LimitsConfig) -> ConfigResult<Self> {
        let window = Duration::from_millis(config.window_ms);
        Ok(Self {
            progress: Arc::new(RateLimiter::new(config.progress_per_window, window)?),
            tools: Arc::new(RateLimiter::new(config.tools_per_window, window)?),
            completions: Arc::new(RateLimiter::new(config.completions_per_window, window)?),
            logs: Arc::new(RateLimiter::new(config.logs_per_window, window)?),
        })
    }

    /// The limiter for `scope`.
    pub fn get(&self, scope: LimitScope) -> &Arc<RateLimiter> {
        match scope {
            LimitScope::Progress => &self.progress,
            LimitScope::Tools => &self.tools,
            LimitScope::Completions => &self.completions,
            LimitScope::Logs => &self.logs,
        }
    }

    /// Admits one call for `key` under `scope`.
    pub fn require_allowance(&self, scope: LimitScope, key: &str) -> Result<(), ProtocolError> {
        self.get(scope).require_allowance(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_length_elapses() {
        let limiter = RateLimiter::new(2, Duration::from_millis(1000)).unwrap();

        assert!(limiter.require_allowance("k").is_ok());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.require_allowance("k").is_ok());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(
            limiter.require_allowance("k"),
            Err(ProtocolError::RateLimitExceeded("k".to_string()))
        );

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(limiter.require_allowance("k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary_is_exclusive() {
        let limiter = RateLimiter::new(1, Duration::from_millis(1000)).unwrap();
        assert!(limiter.try_acquire("k"));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!limiter.try_acquire("k"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.try_acquire("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1)).unwrap();
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
        assert!(!limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("b"));
    }

    #[test]
    fn test_rejects_zero_limit_or_window() {
        assert!(RateLimiter::new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimiter::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_scoped_limits_are_separate() {
        let config = LimitsConfig {
            tools_per_window: 1,
            logs_per_window: 3,
            ..LimitsConfig::default()
        };
        let limits = RateLimits::from_config(&config).unwrap();

        assert!(limits.require_allowance(LimitScope::Tools, "echo").is_ok());
        assert!(limits.require_allowance(LimitScope::Tools, "echo").is_err());
        assert!(limits.require_allowance(LimitScope::Logs, "echo").is_ok());
        assert_eq!(limits.get(LimitScope::Logs).limit(), 3);
    }

    #[test]
    fn test_concurrent_callers_admit_exactly_limit() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(3600)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..25).filter(|_| limiter.try_acquire("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
