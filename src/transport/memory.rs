//! In-process transport pair.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::Transport;
use crate::error::TransportError;

/// One end of a linked in-process channel.
///
/// Whatever one end sends, the other receives. Closing either end ends the stream
/// for the peer once buffered messages are drained.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl MemoryTransport {
    /// Creates two linked ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: Mutex::new(Some(a_tx)),
                inbound: tokio::sync::Mutex::new(b_rx),
            },
            Self {
                outbound: Mutex::new(Some(b_tx)),
                inbound: tokio::sync::Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(TransportError::Closed)?;
        sender.send(message).map_err(|_| TransportError::EndOfStream)
    }

    async fn receive(&self) -> Result<Value, TransportError> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(TransportError::EndOfStream)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.outbound.lock().take();
        Ok(())
    }
}
