// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Request/response correlation.
//!
//! Every outgoing request gets a fresh numeric id and a pending-call entry. The caller
//! awaits the entry's completion slot until a matching response arrives, the timeout
//! elapses, or the call is interrupted. The entry is removed on every path, including
//! when the caller drops the future.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

use super::error::JsonRpcError;
use super::types::{Id, Request, Response};
use crate::error::{report, ErrorContext, ProtocolError, TransportError};
use crate::protocol::cancellation::CancelledNotification;
use crate::transport::MessageSink;

/// Default timeout for waiting for a response.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

/// Reason carried by the advisory notice sent when a call times out.
pub const TIMEOUT_REASON: &str = "timeout";

/// Failure of an outgoing call.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// No response was received within the timeout period.
    #[error("Request {id} ({method}) timed out after {} ms", .elapsed.as_millis())]
    Timeout {
        /// Id of the abandoned request
        id: Id,
        /// Method of the abandoned request
        method: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// The wait was interrupted because the connection went away.
    #[error("Request {0} was interrupted")]
    Interrupted(Id),

    /// The call was cancelled locally.
    #[error("Request {id} was cancelled")]
    Cancelled {
        /// Id of the cancelled request
        id: Id,
        /// Reason given for cancelling
        reason: Option<String>,
    },

    /// The request could not be written.
    #[error(transparent)]
    Send(#[from] TransportError),

    /// The call was refused before it was sent.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Every request id has been issued.
    #[error("Request ids exhausted")]
    IdsExhausted,

    /// The peer answered with an error.
    #[error("Peer returned error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),
}

type Outcome = Result<Response, CorrelationError>;

#[derive(Debug)]
struct PendingCall {
    method: String,
    issued_at: Instant,
    sender: oneshot::Sender<Outcome>,
}

/// Removes the pending entry however the waiting future ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<Id, PendingCall>,
    id: Id,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Matches responses to the requests this endpoint sent.
pub struct RequestCorrelator {
    next_id: AtomicI64,
    pending: DashMap<Id, PendingCall>,
    sink: Arc<dyn MessageSink>,
    default_timeout: Duration,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestCorrelator {
    /// Creates a correlator writing through `sink`, issuing ids from `initial_id`.
    pub fn new(sink: Arc<dyn MessageSink>, initial_id: i64) -> Self {
        Self {
            next_id: AtomicI64::new(initial_id),
            pending: DashMap::new(),
            sink,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Sets the timeout used when `send` is given none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Allocates the next request id. Ids are never reissued, so allocation fails
    /// once the counter reaches `i64::MAX`.
    pub fn next_id(&self) -> Result<Id, CorrelationError> {
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map(Id::Number)
            .map_err(|_| CorrelationError::IdsExhausted)
    }

    /// Sends a request and waits for its response.
    ///
    /// On timeout a `notifications/cancelled` notice is sent in the background and
    /// the call fails with [`CorrelationError::Timeout`]. Failure to deliver the
    /// notice is reported but never returned.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_after: Option<Duration>,
    ) -> Result<Response, CorrelationError> {
        let id = self.next_id()?;
        self.send_with_id(id, method, params, timeout_after).await
    }

    /// Like [`send`](Self::send), for an id already taken from [`next_id`](Self::next_id).
    pub async fn send_with_id(
        &self,
        id: Id,
        method: &str,
        params: Option<Value>,
        timeout_after: Option<Duration>,
    ) -> Result<Response, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();

        self.pending.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                issued_at,
                sender: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        tracing::debug!(%id, method, "Sending request");
        self.sink.send(Request::new(id.clone(), method, params).into()).await?;

        let wait = timeout_after.unwrap_or(self.default_timeout);
        match timeout(wait, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CorrelationError::Interrupted(id)),
            Err(_) => {
                let elapsed = issued_at.elapsed();
                self.pending.remove(&id);
                tracing::warn!(%id, method, elapsed_ms = elapsed.as_millis() as u64, "Request timed out");
                self.spawn_cancel_notice(id.clone());
                Err(CorrelationError::Timeout {
                    id,
                    method: method.to_string(),
                    elapsed,
                })
            }
        }
    }

    fn spawn_cancel_notice(&self, id: Id) {
        let sink = Arc::clone(&self.sink);
        let notice = CancelledNotification::new(id.clone(), Some(TIMEOUT_REASON.to_string()));
        tokio::spawn(async move {
            if let Err(e) = sink.send(notice.to_notification().into()).await {
                report(
                    ErrorContext::new(e, "correlation")
                        .with_details(format!("cancellation notice for timed-out request {}", id)),
                );
            }
        });
    }

    /// Delivers a response to its pending call.
    ///
    /// Returns false, and does nothing else, if no call is waiting on that id.
    pub fn complete(&self, response: Response) -> bool {
        match self.pending.remove(&response.id) {
            Some((id, call)) => {
                tracing::trace!(%id, method = %call.method, "Response correlated");
                // The caller may have stopped waiting.
                let _ = call.sender.send(Ok(response));
                true
            }
            None => {
                tracing::debug!(id = %response.id, "Ignoring response with no pending request");
                false
            }
        }
    }

    /// Fails a pending call as cancelled. Returns false if nothing was pending.
    pub fn cancel(&self, id: &Id, reason: Option<String>) -> bool {
        match self.pending.remove(id) {
            Some((id, call)) => {
                let _ = call.sender.send(Err(CorrelationError::Cancelled { id, reason }));
                true
            }
            None => false,
        }
    }

    /// Interrupts every pending call. Returns how many were waiting.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<Id> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((id, call)) = self.pending.remove(&id) {
                let _ = call.sender.send(Err(CorrelationError::Interrupted(id)));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::debug!(failed, "Interrupted pending requests");
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &Id) -> bool {
        self.pending.contains_key(id)
    }
}
