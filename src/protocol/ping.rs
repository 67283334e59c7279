//! Periodic liveness probing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ConfigResult;
use crate::error::ConfigError;
use crate::protocol::endpoint::Endpoint;
use crate::protocol::methods::RequestMethod;

/// Sends `ping` to the peer on a fixed interval.
///
/// Consecutive failures are counted; when the count reaches the configured maximum
/// it is reset and the failure callback runs. A successful ping resets the count.
/// The task stops when the handle is closed or dropped, or once the endpoint closes.
#[derive(Debug)]
pub struct PingScheduler {
    task: JoinHandle<()>,
    failures: Arc<AtomicU32>,
}

impl PingScheduler {
    /// Starts probing `endpoint`. The first ping goes out one `interval` from now.
    pub fn start<F>(
        endpoint: Arc<Endpoint>,
        interval: Duration,
        timeout: Duration,
        max_failures: u32,
        on_failure: F,
    ) -> ConfigResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() || timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "ping interval and timeout must be greater than 0".to_string(),
            ));
        }
        if max_failures == 0 {
            return Err(ConfigError::ValidationError(
                "max_ping_failures must be greater than 0".to_string(),
            ));
        }

        let failures = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&failures);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if endpoint.is_closed() {
                    break;
                }

                match endpoint.request(RequestMethod::Ping.as_str(), None, Some(timeout)).await {
                    Ok(_) => counter.store(0, Ordering::Relaxed),
                    Err(e) => {
                        let failed = counter.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(error = %e, failed, max_failures, "Ping failed");
                        if failed >= max_failures {
                            counter.store(0, Ordering::Relaxed);
                            on_failure();
                        }
                    }
                }
            }
            tracing::debug!("Ping scheduler stopped");
        });

        Ok(Self { task, failures })
    }

    /// Consecutive failures since the last success or callback.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Stops probing.
    pub fn close(self) {}
}

impl Drop for PingScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
