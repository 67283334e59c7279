// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Inbound message dispatch.
//!
//! This module routes inbound requests and notifications to registered handlers by
//! method name. Around each request it applies duplicate-id detection, progress token
//! registration with start and completion updates, cancellation checks before and
//! after the handler runs, and mapping of handler failures onto wire errors.
//!
//! The method tables are fixed once the [`Dispatcher`] is built.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::error::{HandlerError, JsonRpcError};
use super::types::{Id, Notification, Request, Response};
use crate::error::{report, ErrorContext, ProtocolError, TransportError};
use crate::protocol::cancellation::CancellationRegistry;
use crate::protocol::progress::{ProgressCoordinator, ProgressNotification, ProgressToken};
use crate::protocol::rate_limit::{LimitScope, RateLimits};
use crate::transport::MessageSink;

/// Type alias for request handler results.
pub type HandlerResult = Result<Value, HandlerError>;

/// Per-request view handed to every request handler.
#[derive(Clone)]
pub struct RequestContext {
    id: Id,
    progress_token: Option<ProgressToken>,
    progress: Arc<ProgressCoordinator>,
    cancellation: Arc<CancellationRegistry>,
    limits: Arc<RateLimits>,
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("progress_token", &self.progress_token)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// The id of the request being handled.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The progress token the requester supplied, if any.
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Reports progress to the requester.
    ///
    /// Does nothing when the requester did not ask for progress. Updates that are
    /// rate limited or out of order are dropped.
    pub async fn progress(&self, progress: f64, total: Option<f64>, message: Option<String>) -> Result<(), TransportError> {
        match &self.progress_token {
            Some(token) => {
                let update = ProgressNotification::new(token.clone(), progress, total, message);
                self.progress.send(update, self.sink.as_ref()).await
            }
            None => Ok(()),
        }
    }

    /// Whether the requester has cancelled this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled(&self.id)
    }

    /// Consumes one call of the connection's `scope` limit for `key`.
    pub fn require_allowance(&self, scope: LimitScope, key: &str) -> Result<(), ProtocolError> {
        self.limits.require_allowance(scope, key)
    }
}

/// Handles one request method.
pub trait RequestHandler: Send + Sync {
    /// Handle a call with its params.
    fn handle(&self, params: Option<Value>, context: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RequestHandler for F
where
    F: Send + Sync + 'static + Fn(Option<Value>, RequestContext) -> Fut,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, params: Option<Value>, context: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(params, context))
    }
}

/// Handles one notification method.
pub trait NotificationHandler: Send + Sync {
    /// Handle a notification with its params.
    fn handle(&self, params: Option<Value>) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> NotificationHandler for F
where
    F: Send + Sync + 'static + Fn(Option<Value>) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, params: Option<Value>) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin((self)(params))
    }
}

/// Collects handlers before the dispatcher is built.
#[derive(Default)]
pub struct DispatcherBuilder {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request handler function. A later registration for the same method wins.
    pub fn register_request<F, Fut>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Send + Sync + 'static + Fn(Option<Value>, RequestContext) -> Fut,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_request_handler(method, Arc::new(handler))
    }

    /// Registers a request handler object.
    pub fn register_request_handler(&mut self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) -> &mut Self {
        self.requests.insert(method.into(), handler);
        self
    }

    /// Registers a notification handler function. A later registration for the same method wins.
    pub fn register_notification<F, Fut>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Send + Sync + 'static + Fn(Option<Value>) -> Fut,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_notification_handler(method, Arc::new(handler))
    }

    /// Registers a notification handler object.
    pub fn register_notification_handler(
        &mut self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> &mut Self {
        self.notifications.insert(method.into(), handler);
        self
    }

    /// Whether a request handler is registered for `method`.
    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    /// Freezes the tables.
    pub fn build(
        self,
        progress: Arc<ProgressCoordinator>,
        cancellation: Arc<CancellationRegistry>,
        limits: Arc<RateLimits>,
        sink: Arc<dyn MessageSink>,
    ) -> Dispatcher {
        Dispatcher {
            requests: self.requests,
            notifications: self.notifications,
            progress,
            cancellation,
            limits,
            sink,
        }
    }
}

/// Releases per-request state however handling ends.
struct ReleaseGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: Id,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.progress.release(&self.id);
        self.dispatcher.cancellation.release(&self.id);
    }
}

/// Routes inbound messages to handlers.
pub struct Dispatcher {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    progress: Arc<ProgressCoordinator>,
    cancellation: Arc<CancellationRegistry>,
    limits: Arc<RateLimits>,
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut requests: Vec<_> = self.requests.keys().collect();
        requests.sort();
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        notifications.sort();
        f.debug_struct("Dispatcher")
            .field("requests", &requests)
            .field("notifications", &notifications)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Handles one request.
    ///
    /// Returns `None` when the request was cancelled and must not be answered.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        let id = request.id.clone();

        if let Err(e) = self.cancellation.register(&id) {
            tracing::warn!(%id, error = %e, "Rejecting request");
            return Some(Response::error(id, e.to_jsonrpc_error()));
        }

        let token = match self.progress.register(&id, request.params.as_ref()) {
            Ok(token) => token,
            Err(e) => {
                self.cancellation.release(&id);
                return Some(Response::error(id, e.to_jsonrpc_error()));
            }
        };

        let _release = ReleaseGuard {
            dispatcher: self,
            id: id.clone(),
        };

        if let Some(token) = &token {
            self.emit_progress(token, 0.0).await;
        }
        if self.cancellation.is_cancelled(&id) {
            tracing::debug!(%id, "Request cancelled before dispatch");
            return None;
        }

        let response = self.invoke(request, token.clone()).await;

        if self.cancellation.is_cancelled(&id) {
            tracing::debug!(%id, reason = ?self.cancellation.reason(&id), "Suppressing response to cancelled request");
            return None;
        }
        if let Some(token) = &token {
            self.emit_progress(token, 1.0).await;
        }
        Some(response)
    }

    async fn invoke(&self, request: Request, token: Option<ProgressToken>) -> Response {
        let Request { id, method, params, .. } = request;

        let Some(handler) = self.requests.get(&method) else {
            return Response::error(id, JsonRpcError::method_not_found(method));
        };

        let context = RequestContext {
            id: id.clone(),
            progress_token: token,
            progress: Arc::clone(&self.progress),
            cancellation: Arc::clone(&self.cancellation),
            limits: Arc::clone(&self.limits),
            sink: Arc::clone(&self.sink),
        };

        match AssertUnwindSafe(handler.handle(params, context)).catch_unwind().await {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(e)) => {
                match &e {
                    HandlerError::Internal(cause) => {
                        tracing::error!(%id, method = %method, error = ?cause, "Request handler failed");
                    }
                    other => {
                        tracing::debug!(%id, method = %method, error = %other, "Request rejected by handler");
                    }
                }
                Response::error(id, e.to_jsonrpc_error())
            }
            Err(_) => {
                tracing::error!(%id, method = %method, "Request handler panicked");
                Response::error(id, JsonRpcError::internal_error())
            }
        }
    }

    async fn emit_progress(&self, token: &ProgressToken, value: f64) {
        let message = if value >= 1.0 { "completed" } else { "in progress" };
        let update = ProgressNotification::new(token.clone(), value, Some(1.0), Some(message.to_string()));
        if let Err(e) = self.progress.send(update, self.sink.as_ref()).await {
            report(ErrorContext::new(e, "dispatcher").with_details(format!("progress update for token {}", token)));
        }
    }

    /// Handles one notification. Unknown methods are ignored.
    pub async fn handle_notification(&self, notification: Notification) {
        let Some(handler) = self.notifications.get(&notification.method) else {
            tracing::trace!(method = %notification.method, "Ignoring unhandled notification");
            return;
        };

        match AssertUnwindSafe(handler.handle(notification.params)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(method = %notification.method, error = %e, "Notification handler failed");
            }
            Err(_) => {
                tracing::error!(method = %notification.method, "Notification handler panicked");
            }
        }
    }

    /// Whether a request handler is registered for `method`.
    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    pub fn cancellation(&self) -> &Arc<CancellationRegistry> {
        &self.cancellation
    }

    pub fn progress(&self) -> &Arc<ProgressCoordinator> {
        &self.progress
    }
}
