// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Integration tests for the JSON-RPC layer.
//! A correlator on one end of an in-process transport drives a dispatcher on the
//! other, with hand-written reader loops standing in for the endpoint.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::limits::LimitsConfig;
use crate::protocol::cancellation::CancellationRegistry;
use crate::protocol::jsonrpc::{
    CorrelationError, DispatcherBuilder, ErrorCode, HandlerError, Message, Notification, RequestContext,
    RequestCorrelator,
};
use crate::protocol::progress::ProgressCoordinator;
use crate::protocol::rate_limit::{LimitScope, RateLimits};
use crate::transport::{MemoryTransport, MessageSink, SendPath, Transport};

struct Wiring {
    correlator: Arc<RequestCorrelator>,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

fn wire(configure: impl FnOnce(&mut DispatcherBuilder)) -> Wiring {
    let (client_end, server_end) = MemoryTransport::pair();
    let client_end: Arc<dyn Transport> = Arc::new(client_end);
    let server_end: Arc<dyn Transport> = Arc::new(server_end);

    let server_sink: Arc<dyn MessageSink> = Arc::new(SendPath::new(Arc::clone(&server_end)));
    let limits = Arc::new(RateLimits::from_config(&LimitsConfig::default()).unwrap());
    let progress = Arc::new(ProgressCoordinator::new(Arc::clone(limits.get(LimitScope::Progress))));
    let mut builder = DispatcherBuilder::new();
    configure(&mut builder);
    let dispatcher = builder.build(progress, Arc::new(CancellationRegistry::new()), limits, Arc::clone(&server_sink));

    tokio::spawn(async move {
        while let Ok(value) = server_end.receive().await {
            match Message::from_value(value) {
                Ok(Message::Request(request)) => {
                    if let Some(response) = dispatcher.handle(request).await {
                        let _ = server_sink.send(response.into()).await;
                    }
                }
                Ok(Message::Notification(notification)) => dispatcher.handle_notification(notification).await,
                _ => {}
            }
        }
    });

    let correlator = Arc::new(RequestCorrelator::new(
        Arc::new(SendPath::new(Arc::clone(&client_end))),
        1,
    ));
    let (notify_tx, notifications) = mpsc::unbounded_channel();
    {
        let correlator = Arc::clone(&correlator);
        tokio::spawn(async move {
            while let Ok(value) = client_end.receive().await {
                match Message::from_value(value) {
                    Ok(Message::Response(response)) => {
                        correlator.complete(response);
                    }
                    Ok(Message::Notification(notification)) => {
                        let _ = notify_tx.send(notification);
                    }
                    _ => {}
                }
            }
            correlator.fail_all();
        });
    }

    Wiring {
        correlator,
        notifications,
    }
}

#[tokio::test]
async fn test_concurrent_calls_each_get_their_own_reply() {
    let w = wire(|b| {
        b.register_request("double", |params: Option<Value>, _ctx: RequestContext| async move {
            let n = params
                .as_ref()
                .and_then(|p| p.get("n"))
                .and_then(Value::as_i64)
                .ok_or_else(|| HandlerError::invalid_params("n is required"))?;
            Ok::<Value, HandlerError>(json!(n * 2))
        });
    });

    let calls = (0..20).map(|n| {
        let correlator = Arc::clone(&w.correlator);
        async move { correlator.send("double", Some(json!({"n": n})), None).await }
    });
    let results = join_all(calls).await;

    for (n, result) in results.into_iter().enumerate() {
        let response = result.unwrap();
        assert_eq!(response.result, Some(json!(n as i64 * 2)));
    }
    assert_eq!(w.correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_handler_errors_reach_the_caller() {
    let w = wire(|b| {
        b.register_request("double", |_params: Option<Value>, _ctx: RequestContext| async move {
            Err(HandlerError::invalid_params("n is required"))
        });
    });

    let response = w.correlator.send("double", None, None).await.unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidParams.code());
    assert_eq!(error.message, "n is required");

    let response = w.correlator.send("missing", None, None).await.unwrap();
    assert_eq!(response.error.unwrap().code, ErrorCode::MethodNotFound.code());
}

#[tokio::test]
async fn test_progress_reaches_the_requester() {
    let mut w = wire(|b| {
        b.register_request("work", |_params: Option<Value>, ctx: RequestContext| async move {
            for step in 1..=3 {
                ctx.progress(step as f64 / 4.0, Some(1.0), None)
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok::<Value, HandlerError>(json!("done"))
        });
    });

    let params = json!({"_meta": {"progressToken": "job-1"}});
    let response = w.correlator.send("work", Some(params), None).await.unwrap();
    assert_eq!(response.result, Some(json!("done")));

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let notification = w.notifications.recv().await.unwrap();
        assert_eq!(notification.method, "notifications/progress");
        let params = notification.params.unwrap();
        assert_eq!(params["progressToken"], json!("job-1"));
        seen.push(params["progress"].as_f64().unwrap());
    }
    assert_eq!(seen, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
}

#[tokio::test]
async fn test_progress_token_reusable_after_release() {
    let w = wire(|b| {
        b.register_request("echo", |params: Option<Value>, _ctx: RequestContext| async move {
            Ok(params.unwrap_or(Value::Null))
        });
    });

    // Sequential calls release the token in between, so reuse is fine.
    let params = json!({"_meta": {"progressToken": 5}});
    assert!(w.correlator.send("echo", Some(params.clone()), None).await.unwrap().is_success());
    assert!(w.correlator.send("echo", Some(params), None).await.unwrap().is_success());
}

#[tokio::test]
async fn test_fail_all_interrupts_blocked_caller() {
    let w = wire(|b| {
        b.register_request("hang", |_params: Option<Value>, _ctx: RequestContext| async move {
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        });
    });

    let caller = {
        let correlator = Arc::clone(&w.correlator);
        tokio::spawn(async move { correlator.send("hang", None, None).await })
    };
    tokio::task::yield_now().await;
    while w.correlator.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(w.correlator.fail_all(), 1);
    assert!(matches!(caller.await.unwrap(), Err(CorrelationError::Interrupted(_))));
}
