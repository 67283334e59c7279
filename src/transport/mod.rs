//! Transport collaborators.
//!
//! The engine talks to the wire only through [`Transport`]: send a value, receive a
//! value, close. Everything it writes goes through a single [`SendPath`] per
//! endpoint so concurrent writers never interleave on the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::protocol::jsonrpc::types::Message;

pub mod memory;
pub mod stream;

pub use memory::MemoryTransport;
pub use stream::LineTransport;

/// A bidirectional message channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one message.
    async fn send(&self, message: Value) -> Result<(), TransportError>;

    /// Waits for the next message. Fails with `EndOfStream` once the peer is gone.
    async fn receive(&self) -> Result<Value, TransportError>;

    /// Waits for the next message for at most `timeout`.
    async fn receive_timeout(&self, timeout: Duration) -> Result<Value, TransportError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Closes the transport. Further sends fail with `Closed`.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Destination for outbound messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Writes one complete message.
    async fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// The single guarded write path of an endpoint.
pub struct SendPath {
    transport: Arc<dyn Transport>,
    lock: tokio::sync::Mutex<()>,
}

impl SendPath {
    /// Wraps `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl std::fmt::Debug for SendPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPath").finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSink for SendPath {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let value = message.to_value()?;
        let _guard = self.lock.lock().await;
        self.transport.send(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::types::Notification;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_path_encodes_messages() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|value| value == &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .times(1)
            .returning(|_| Ok(()));

        let path = SendPath::new(Arc::new(transport));
        let message = Message::Notification(Notification::new("notifications/initialized", None));
        assert!(path.send(message).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_path_reports_transport_failure() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_| Err(TransportError::Closed));

        let path = SendPath::new(Arc::new(transport));
        let result = path.send(Notification::new("ping", None).into()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
