//! One side of a connection.
//!
//! An [`Endpoint`] owns the transport and every piece of per-connection state. Its
//! [`run`](Endpoint::run) loop is the only reader: it decodes each inbound message,
//! applies the lifecycle and capability gates, dispatches, and writes the reply
//! before reading the next message. Writes from other tasks (outgoing requests,
//! notifications, pings, progress) go through the same guarded send path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::{report, ErrorContext, McpError, McpResult, ProtocolError, TransportError};
use crate::protocol::cancellation::{CancellationRegistry, CancelledNotification};
use crate::protocol::jsonrpc::correlation::{CorrelationError, RequestCorrelator};
use crate::protocol::jsonrpc::dispatcher::{
    Dispatcher, DispatcherBuilder, HandlerResult, NotificationHandler, RequestContext, RequestHandler,
};
use crate::protocol::jsonrpc::error::{HandlerError, JsonRpcError};
use crate::protocol::jsonrpc::types::{Id, Message, Notification, Response};
use crate::protocol::jsonrpc::validation::validate_message;
use crate::protocol::lifecycle::{InitializeResult, LifecycleCoordinator, LifecycleState, PeerInfo, Role};
use crate::protocol::logging::{level_from_params, LoggingLevel, LoggingMessage};
use crate::protocol::methods::{
    capabilities_from_value, capabilities_to_value, required_capability, Capability, CapabilitySet,
    NotificationMethod, RequestMethod,
};
use crate::protocol::progress::{ProgressCoordinator, ProgressNotification};
use crate::protocol::rate_limit::{LimitScope, RateLimiter, RateLimits};
use crate::transport::{MessageSink, SendPath, Transport};

/// Receives accepted progress updates for this endpoint's outgoing requests.
pub type ProgressListener = Arc<dyn Fn(ProgressNotification) + Send + Sync>;

/// Assembles an [`Endpoint`].
pub struct EndpointBuilder {
    role: Role,
    config: EngineConfig,
    capabilities: CapabilitySet,
    info: PeerInfo,
    instructions: Option<String>,
    handlers: DispatcherBuilder,
    progress_listener: Option<ProgressListener>,
}

impl EndpointBuilder {
    /// Starts a builder for `role`. Identity and instructions default to the
    /// protocol section of `config`.
    pub fn new(role: Role, config: &EngineConfig) -> Self {
        Self {
            role,
            capabilities: CapabilitySet::new(),
            info: PeerInfo::new(&config.protocol.server_name, &config.protocol.server_version),
            instructions: config.protocol.instructions.clone(),
            config: config.clone(),
            handlers: DispatcherBuilder::new(),
            progress_listener: None,
        }
    }

    /// Capabilities this endpoint declares to its peer.
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Identity advertised in `serverInfo` or `clientInfo`.
    pub fn info(mut self, info: PeerInfo) -> Self {
        self.info = info;
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Called with each progress update the peer sends for one of our requests,
    /// once the update has passed the ordering checks.
    pub fn progress_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(ProgressNotification) + Send + Sync + 'static,
    {
        self.progress_listener = Some(Arc::new(listener));
        self
    }

    /// Registers a request handler. Built-in protocol methods cannot be replaced.
    pub fn request_handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Send + Sync + 'static + Fn(Option<Value>, RequestContext) -> Fut,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register_request(method, handler);
        self
    }

    /// Registers a request handler object.
    pub fn request_handler_object(mut self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.register_request_handler(method, handler);
        self
    }

    /// Registers a notification handler. Built-in protocol notifications cannot be replaced.
    pub fn notification_handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Send + Sync + 'static + Fn(Option<Value>) -> Fut,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.register_notification(method, handler);
        self
    }

    /// Registers a notification handler object.
    pub fn notification_handler_object(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        self.handlers.register_notification_handler(method, handler);
        self
    }

    /// Wires the endpoint to `transport`. Call [`Endpoint::run`] to start reading.
    pub fn build(self, transport: Arc<dyn Transport>) -> McpResult<Arc<Endpoint>> {
        let Self {
            role,
            config,
            capabilities,
            info,
            instructions,
            mut handlers,
            progress_listener,
        } = self;

        let sink: Arc<dyn MessageSink> = Arc::new(SendPath::new(Arc::clone(&transport)));
        let limits = Arc::new(RateLimits::from_config(&config.limits)?);
        let progress = Arc::new(ProgressCoordinator::new(Arc::clone(limits.get(LimitScope::Progress))));
        let outgoing_progress = Arc::new(ProgressCoordinator::new(Arc::new(RateLimiter::new(
            config.limits.progress_per_window,
            Duration::from_millis(config.limits.window_ms),
        )?)));
        let cancellation = Arc::new(CancellationRegistry::new());
        let lifecycle = Arc::new(LifecycleCoordinator::new(
            role,
            capabilities,
            info,
            instructions,
            config.protocol.supported_versions.clone(),
        )?);
        let log_level = Arc::new(RwLock::new(LoggingLevel::default()));

        register_builtins(&mut handlers, &lifecycle, &cancellation, &progress, &log_level);
        register_progress_receiver(&mut handlers, &outgoing_progress, progress_listener);

        let correlator = RequestCorrelator::new(Arc::clone(&sink), config.endpoint.initial_request_id)
            .with_default_timeout(config.endpoint.default_timeout());
        let dispatcher = handlers.build(progress, cancellation, Arc::clone(&limits), Arc::clone(&sink));
        let (shutdown_tx, _) = watch::channel(false);

        tracing::debug!(?role, dispatcher = ?dispatcher, "Endpoint assembled");

        Ok(Arc::new(Endpoint {
            transport,
            sink,
            correlator,
            dispatcher,
            lifecycle,
            limits,
            outgoing_progress,
            log_level,
            shutdown_tx,
            closed: AtomicBool::new(false),
        }))
    }
}

fn register_builtins(
    handlers: &mut DispatcherBuilder,
    lifecycle: &Arc<LifecycleCoordinator>,
    cancellation: &Arc<CancellationRegistry>,
    progress: &Arc<ProgressCoordinator>,
    log_level: &Arc<RwLock<LoggingLevel>>,
) {
    handlers.register_request(RequestMethod::Ping.as_str(), |_params: Option<Value>, _ctx: RequestContext| async {
        Ok(json!({}))
    });

    {
        let cancellation = Arc::clone(cancellation);
        let progress = Arc::clone(progress);
        handlers.register_notification(NotificationMethod::Cancelled.as_str(), move |params: Option<Value>| {
            let cancellation = Arc::clone(&cancellation);
            let progress = Arc::clone(&progress);
            async move {
                let notice = CancelledNotification::from_params(params.as_ref())?;
                if cancellation.cancel(&notice.request_id, notice.reason.clone()) {
                    tracing::info!(id = %notice.request_id, reason = ?notice.reason, "Peer cancelled request");
                }
                progress.release(&notice.request_id);
                Ok::<(), HandlerError>(())
            }
        });
    }

    if lifecycle.role() != Role::Server {
        return;
    }

    {
        let lifecycle = Arc::clone(lifecycle);
        handlers.register_request(
            RequestMethod::Initialize.as_str(),
            move |params: Option<Value>, _ctx: RequestContext| {
                let lifecycle = Arc::clone(&lifecycle);
                async move {
                    let params = params.unwrap_or(Value::Null);
                    let version = params
                        .get("protocolVersion")
                        .and_then(Value::as_str)
                        .ok_or_else(|| HandlerError::invalid_params("protocolVersion is required"))?;
                    let capabilities = params.get("capabilities").map(capabilities_from_value).unwrap_or_default();
                    let client_info = params
                        .get("clientInfo")
                        .cloned()
                        .map(serde_json::from_value::<PeerInfo>)
                        .transpose()?;

                    let result = lifecycle.negotiate(version, capabilities, client_info)?;
                    Ok::<Value, HandlerError>(result.to_value())
                }
            },
        );
    }

    {
        let lifecycle = Arc::clone(lifecycle);
        handlers.register_notification(NotificationMethod::Initialized.as_str(), move |_params: Option<Value>| {
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.confirm_ready().map_err(HandlerError::from) }
        });
    }

    if lifecycle.local_capabilities().contains(&Capability::Logging) {
        let log_level = Arc::clone(log_level);
        handlers.register_request(
            RequestMethod::LoggingSetLevel.as_str(),
            move |params: Option<Value>, _ctx: RequestContext| {
                let log_level = Arc::clone(&log_level);
                async move {
                    let level = level_from_params(params.as_ref())?;
                    *log_level.write() = level;
                    tracing::debug!(%level, "Peer changed log level");
                    Ok::<Value, HandlerError>(json!({}))
                }
            },
        );
    }
}

/// Records inbound `notifications/progress` against the tokens of our outgoing
/// requests. Updates for unknown tokens are ignored; out-of-order ones are dropped.
fn register_progress_receiver(
    handlers: &mut DispatcherBuilder,
    outgoing_progress: &Arc<ProgressCoordinator>,
    listener: Option<ProgressListener>,
) {
    let outgoing = Arc::clone(outgoing_progress);
    handlers.register_notification(NotificationMethod::Progress.as_str(), move |params: Option<Value>| {
        let outgoing = Arc::clone(&outgoing);
        let listener = listener.clone();
        async move {
            let update = ProgressNotification::from_params(params.as_ref())?;
            if !outgoing.is_active(&update.progress_token) {
                tracing::debug!(token = %update.progress_token, "Ignoring progress for inactive token");
                return Ok(());
            }
            outgoing.advance(&update.progress_token, update.progress, update.total)?;
            if let Some(listener) = &listener {
                listener(update);
            }
            Ok::<(), HandlerError>(())
        }
    });
}

/// Unbinds an outgoing request from its progress token when the call ends.
struct OutgoingProgressGuard<'a> {
    progress: &'a ProgressCoordinator,
    id: Id,
}

impl Drop for OutgoingProgressGuard<'_> {
    fn drop(&mut self) {
        self.progress.release(&self.id);
    }
}

/// A running connection.
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn MessageSink>,
    correlator: RequestCorrelator,
    dispatcher: Dispatcher,
    lifecycle: Arc<LifecycleCoordinator>,
    limits: Arc<RateLimits>,
    outgoing_progress: Arc<ProgressCoordinator>,
    log_level: Arc<RwLock<LoggingLevel>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.lifecycle.role())
            .field("state", &self.lifecycle.state())
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Reads and handles inbound messages until the peer goes away or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// On return the lifecycle is in SHUTDOWN and every pending outgoing call has
    /// been interrupted.
    pub async fn run(&self) -> McpResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                received = self.transport.receive() => received,
            };

            match received {
                Ok(value) => self.process(value).await,
                Err(TransportError::Encode(e)) => {
                    tracing::warn!(error = %e, "Received undecodable message");
                    self.reply(Response::error(Id::Null, JsonRpcError::parse_error(e.to_string())))
                        .await;
                }
                Err(TransportError::Timeout(_)) => continue,
                Err(TransportError::EndOfStream) | Err(TransportError::Closed) => {
                    tracing::info!("Peer closed the connection");
                    break Ok(());
                }
                Err(e) => break Err(McpError::from(e)),
            }
        };

        if let Err(e) = self.shutdown().await {
            report(ErrorContext::new(e, "endpoint").with_details("closing transport after reader exit"));
        }
        result
    }

    async fn process(&self, value: Value) {
        let message = match Message::from_value(value) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(error = %error.message, "Received malformed message");
                self.reply(Response::error(Id::Null, error)).await;
                return;
            }
        };

        if let Err(error) = validate_message(&message) {
            tracing::warn!(error = %error.message, "Received invalid message");
            match &message {
                Message::Request(request) => self.reply(Response::error(request.id.clone(), error)).await,
                _ => self.reply(Response::error(Id::Null, error)).await,
            }
            return;
        }

        match message {
            Message::Request(request) => {
                let allowed_early = RequestMethod::from_name(&request.method)
                    .map_or(false, |m| m.allowed_before_operation());
                if !allowed_early {
                    if let Some(response) = self.lifecycle.ensure_operational(&request.id) {
                        tracing::debug!(id = %request.id, method = %request.method, "Rejecting request before initialization");
                        self.reply(response).await;
                        return;
                    }
                }

                if let Some(capability) = required_capability(&request.method) {
                    if let Err(e) = self.lifecycle.require_local_capability(capability) {
                        tracing::debug!(id = %request.id, method = %request.method, error = %e, "Rejecting request");
                        self.reply(Response::error(request.id.clone(), e.to_jsonrpc_error())).await;
                        return;
                    }
                }

                if let Some(response) = self.dispatcher.handle(request).await {
                    self.reply(response).await;
                }
            }
            Message::Notification(notification) => self.dispatcher.handle_notification(notification).await,
            Message::Response(response) => {
                self.correlator.complete(response);
            }
        }
    }

    async fn reply(&self, response: Response) {
        let id = response.id.clone();
        if let Err(e) = self.sink.send(response.into()).await {
            report(ErrorContext::new(e, "endpoint").with_details(format!("response to request {}", id)));
        }
    }

    /// Sends a request to the peer and waits for its result.
    ///
    /// Only `initialize` and `ping` may be sent before the connection is operational.
    /// Methods that need a capability are refused unless the peer declared it. A
    /// progress token in `params._meta` is tracked until the call ends; a token
    /// already in use by another outgoing call is refused.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CorrelationError> {
        let allowed_early = RequestMethod::from_name(method).map_or(false, |m| m.allowed_before_operation());
        match self.lifecycle.state() {
            LifecycleState::Operation => {}
            LifecycleState::Init if allowed_early => {}
            LifecycleState::Init => return Err(ProtocolError::NotInitialized.into()),
            LifecycleState::Shutdown => {
                return Err(ProtocolError::InvalidState {
                    expected: LifecycleState::Operation,
                    actual: LifecycleState::Shutdown,
                }
                .into())
            }
        }

        if let Some(capability) = required_capability(method) {
            self.lifecycle.require_capability(capability)?;
        }

        let id = self.correlator.next_id()?;
        self.outgoing_progress.register(&id, params.as_ref())?;
        let _progress = OutgoingProgressGuard {
            progress: &self.outgoing_progress,
            id: id.clone(),
        };

        self.correlator
            .send_with_id(id, method, params, timeout)
            .await?
            .into_result()
            .map_err(CorrelationError::Remote)
    }

    /// Sends a notification to the peer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.sink.send(Notification::new(method, params).into()).await
    }

    /// Cancels one of this endpoint's outgoing requests.
    ///
    /// The local call fails with [`CorrelationError::Cancelled`] and the peer is told
    /// to stop. Returns false if no such request was in flight.
    pub async fn cancel(&self, id: &Id, reason: Option<String>) -> Result<bool, TransportError> {
        let notice = CancelledNotification::new(id.clone(), reason.clone());
        if !self.correlator.cancel(id, reason) {
            return Ok(false);
        }
        self.sink.send(notice.to_notification().into()).await?;
        Ok(true)
    }

    /// Performs the client side of the handshake.
    ///
    /// The connection is shut down if the server picks a version this endpoint does
    /// not support.
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        if self.lifecycle.role() != Role::Client {
            return Err(McpError::Custom("only a client endpoint sends initialize".to_string()));
        }

        let params = json!({
            "protocolVersion": self.lifecycle.latest_version(),
            "capabilities": capabilities_to_value(self.lifecycle.local_capabilities()),
            "clientInfo": self.lifecycle.local_info(),
        });
        let value = self.request(RequestMethod::Initialize.as_str(), Some(params), None).await?;
        let result = InitializeResult::from_value(&value)?;

        if !self.lifecycle.supports_version(&result.protocol_version) {
            tracing::error!(protocol_version = %result.protocol_version, "Server chose an unsupported protocol version");
            self.shutdown().await?;
            return Err(ProtocolError::UnsupportedVersion(result.protocol_version).into());
        }

        self.lifecycle.adopt(&result)?;
        self.notify(NotificationMethod::Initialized.as_str(), None).await?;
        self.lifecycle.confirm_ready()?;
        tracing::info!(
            protocol_version = %result.protocol_version,
            server = %result.server_info.name,
            "Connection initialized"
        );
        Ok(result)
    }

    /// Sends a `notifications/message` log entry to the peer.
    ///
    /// Returns false if the entry was below the level the peer asked for. Fails if
    /// this endpoint did not declare logging or the logger's rate limit is spent.
    pub async fn send_log(&self, level: LoggingLevel, logger: Option<&str>, data: Value) -> McpResult<bool> {
        self.lifecycle.require_local_capability(Capability::Logging)?;
        if level < *self.log_level.read() {
            return Ok(false);
        }
        self.limits.require_allowance(LimitScope::Logs, logger.unwrap_or(""))?;

        let message = LoggingMessage {
            level,
            logger: logger.map(str::to_string),
            data,
        };
        self.sink.send(message.to_notification().into()).await?;
        Ok(true)
    }

    /// Stops the reader, interrupts pending calls and closes the transport.
    ///
    /// Only the first call has any effect.
    pub async fn shutdown(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.lifecycle.shutdown();
        self.correlator.fail_all();
        self.shutdown_tx.send_replace(true);
        self.transport.close().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleCoordinator> {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn role(&self) -> Role {
        self.lifecycle.role()
    }

    /// The minimum level of log entries sent to the peer.
    pub fn log_level(&self) -> LoggingLevel {
        *self.log_level.read()
    }

    /// Outgoing requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Progress state of this endpoint's outgoing requests.
    pub fn outgoing_progress(&self) -> &Arc<ProgressCoordinator> {
        &self.outgoing_progress
    }

    /// The connection's rate limiters.
    pub fn limits(&self) -> &Arc<RateLimits> {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::error::ErrorCode;
    use crate::protocol::progress::ProgressToken;
    use crate::transport::MemoryTransport;
    use tokio_test::assert_ok;

    /// A server endpoint plus the raw peer end of its transport.
    struct Harness {
        endpoint: Arc<Endpoint>,
        peer: MemoryTransport,
        reader: tokio::task::JoinHandle<McpResult<()>>,
    }

    fn harness(configure: impl FnOnce(EndpointBuilder) -> EndpointBuilder) -> Harness {
        let (local, peer) = MemoryTransport::pair();
        let builder = EndpointBuilder::new(Role::Server, &EngineConfig::default())
            .capabilities([Capability::Tools, Capability::Logging]);
        let endpoint = configure(builder).build(Arc::new(local)).unwrap();
        let reader = {
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { endpoint.run().await })
        };
        Harness { endpoint, peer, reader }
    }

    impl Harness {
        async fn call(&self, id: i64, method: &str, params: Value) -> Value {
            self.peer
                .send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
                .await
                .unwrap();
            self.peer.receive().await.unwrap()
        }

        async fn handshake(&self) {
            let reply = self
                .call(
                    0,
                    "initialize",
                    json!({"protocolVersion": "2025-06-18", "capabilities": {}, "clientInfo": {"name": "t", "version": "1"}}),
                )
                .await;
            assert_eq!(reply["result"]["protocolVersion"], json!("2025-06-18"));
            self.peer
                .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .await
                .unwrap();
            // A ping round trip guarantees the notification was processed.
            self.call(-1, "ping", json!({})).await;
            assert_eq!(self.endpoint.state(), LifecycleState::Operation);
        }
    }

    #[tokio::test]
    async fn test_requests_before_initialization_are_rejected() {
        let h = harness(|b| b.request_handler("tools/list", |_p, _c| async { Ok(json!({"tools": []})) }));

        let reply = h.call(1, "tools/list", json!({})).await;
        assert_eq!(reply["error"]["code"], json!(ErrorCode::ServerNotInitialized.code()));
        assert_eq!(reply["id"], json!(1));

        let reply = h.call(2, "ping", json!({})).await;
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn test_handshake_then_operation() {
        let h = harness(|b| b.request_handler("tools/list", |_p, _c| async { Ok(json!({"tools": []})) }));
        h.handshake().await;

        let reply = h.call(1, "tools/list", json!({})).await;
        assert_eq!(reply["result"], json!({"tools": []}));
        assert_eq!(h.endpoint.lifecycle().peer_info().unwrap().name, "t");
    }

    #[tokio::test]
    async fn test_undeclared_capability_is_rejected() {
        let h = harness(|b| b.request_handler("prompts/list", |_p, _c| async { Ok(json!({"prompts": []})) }));
        h.handshake().await;

        let reply = h.call(1, "prompts/list", json!({})).await;
        assert_eq!(reply["error"]["code"], json!(ErrorCode::MethodNotFound.code()));
    }

    #[tokio::test]
    async fn test_malformed_messages_get_null_id_errors() {
        let h = harness(|b| b);

        h.peer.send(json!({"jsonrpc": "2.0", "id": 1})).await.unwrap();
        let reply = h.peer.receive().await.unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], json!(ErrorCode::InvalidRequest.code()));

        h.peer.send(json!({"jsonrpc": "1.0", "id": 4, "method": "ping"})).await.unwrap();
        let reply = h.peer.receive().await.unwrap();
        assert_eq!(reply["id"], json!(4));
        assert_eq!(reply["error"]["code"], json!(ErrorCode::InvalidRequest.code()));
    }

    #[tokio::test]
    async fn test_null_request_id_is_never_dispatched() {
        let h = harness(|b| b);

        for _ in 0..2 {
            h.peer.send(json!({"jsonrpc": "2.0", "id": null, "method": "ping"})).await.unwrap();
            let reply = h.peer.receive().await.unwrap();
            assert_eq!(reply["id"], Value::Null);
            assert_eq!(reply["error"]["code"], json!(ErrorCode::InvalidRequest.code()));
            assert!(reply.get("result").is_none());
        }

        let reply = h.call(3, "ping", json!({})).await;
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn test_progress_for_outgoing_calls_is_ordered() {
        let (tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
        let h = harness(move |b| {
            b.progress_listener(move |update: ProgressNotification| {
                let _ = tx.send(update.progress);
            })
        });
        h.handshake().await;

        let token = ProgressToken::String("t".into());
        let call = {
            let endpoint = Arc::clone(&h.endpoint);
            tokio::spawn(async move {
                endpoint
                    .request("ping", Some(json!({"_meta": {"progressToken": "t"}})), None)
                    .await
            })
        };
        let outbound = h.peer.receive().await.unwrap();
        assert_eq!(outbound["params"]["_meta"]["progressToken"], json!("t"));
        assert!(h.endpoint.outgoing_progress().is_active(&token));

        for (token, value) in [("t", 0.5), ("t", 0.3), ("other", 0.9), ("t", 0.8)] {
            h.peer
                .send(json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": {"progressToken": token, "progress": value, "total": 1.0}
                }))
                .await
                .unwrap();
        }
        h.peer
            .send(json!({"jsonrpc": "2.0", "id": outbound["id"], "result": {}}))
            .await
            .unwrap();

        assert_ok!(call.await.unwrap());
        assert_eq!(seen.recv().await, Some(0.5));
        assert_eq!(seen.recv().await, Some(0.8));
        assert!(seen.try_recv().is_err());
        assert!(!h.endpoint.outgoing_progress().is_active(&token));
    }

    #[tokio::test]
    async fn test_set_level_filters_logs() {
        let h = harness(|b| b);
        h.handshake().await;

        let reply = h.call(1, "logging/setLevel", json!({"level": "warning"})).await;
        assert_eq!(reply["result"], json!({}));
        assert_eq!(h.endpoint.log_level(), LoggingLevel::Warning);

        assert!(!assert_ok!(h.endpoint.send_log(LoggingLevel::Info, Some("db"), json!("quiet")).await));
        assert!(assert_ok!(h.endpoint.send_log(LoggingLevel::Error, Some("db"), json!("loud")).await));

        let message = h.peer.receive().await.unwrap();
        assert_eq!(message["method"], json!("notifications/message"));
        assert_eq!(message["params"]["level"], json!("error"));
        assert_eq!(message["params"]["data"], json!("loud"));

        let reply = h.call(2, "logging/setLevel", json!({"level": "loudest"})).await;
        assert_eq!(reply["error"]["code"], json!(ErrorCode::InvalidParams.code()));
    }

    #[tokio::test]
    async fn test_log_rate_limit_is_per_logger() {
        let mut config = EngineConfig::default();
        config.limits.logs_per_window = 1;
        config.limits.window_ms = 60_000;
        let (local, _peer) = MemoryTransport::pair();
        let endpoint = EndpointBuilder::new(Role::Server, &config)
            .capabilities([Capability::Logging])
            .build(Arc::new(local))
            .unwrap();

        assert_ok!(endpoint.send_log(LoggingLevel::Info, Some("a"), json!(1)).await);
        let err = endpoint.send_log(LoggingLevel::Info, Some("a"), json!(2)).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(ProtocolError::RateLimitExceeded(ref key)) if key == "a"));
        assert_ok!(endpoint.send_log(LoggingLevel::Info, Some("b"), json!(3)).await);
    }

    #[tokio::test]
    async fn test_logging_requires_declared_capability() {
        let (local, _peer) = MemoryTransport::pair();
        let endpoint = EndpointBuilder::new(Role::Server, &EngineConfig::default())
            .build(Arc::new(local))
            .unwrap();
        let err = endpoint.send_log(LoggingLevel::Error, None, json!("x")).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(ProtocolError::MissingCapability(Capability::Logging))));
    }

    #[tokio::test]
    async fn test_outbound_requests_need_operation_and_peer_capability() {
        let h = harness(|b| b);

        let err = h.endpoint.request("roots/list", None, None).await.unwrap_err();
        assert!(matches!(err, CorrelationError::Protocol(ProtocolError::NotInitialized)));

        h.handshake().await;
        let err = h.endpoint.request("roots/list", None, None).await.unwrap_err();
        assert!(matches!(err, CorrelationError::Protocol(ProtocolError::MissingCapability(Capability::Roots))));
    }

    #[tokio::test]
    async fn test_peer_closing_shuts_down_and_interrupts_calls() {
        let h = harness(|b| b);

        let pending = {
            let endpoint = Arc::clone(&h.endpoint);
            tokio::spawn(async move { endpoint.request("ping", None, None).await })
        };
        let outbound = h.peer.receive().await.unwrap();
        assert_eq!(outbound["method"], json!("ping"));

        h.peer.close().await.unwrap();
        assert_ok!(h.reader.await.unwrap());
        assert_eq!(h.endpoint.state(), LifecycleState::Shutdown);
        assert!(matches!(pending.await.unwrap(), Err(CorrelationError::Interrupted(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_stops_reader() {
        let h = harness(|b| b);
        assert_ok!(h.endpoint.shutdown().await);
        assert_ok!(h.endpoint.shutdown().await);
        assert_ok!(h.reader.await.unwrap());
        assert!(h.endpoint.is_closed());
        assert_eq!(h.endpoint.state(), LifecycleState::Shutdown);
    }
}
