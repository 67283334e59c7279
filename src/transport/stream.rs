//! Newline-delimited JSON over a pair of async streams.
//!
//! This is what the binary uses over stdin/stdout, and it is also handy for tests
//! that want to look at the exact bytes an endpoint writes.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::*;

use super::Transport;
use crate::error::TransportError;

/// One JSON message per line.
pub struct LineTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl<R, W> Debug for LineTransport<R, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }
}

impl LineTransport<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// A transport over the process's standard streams.
    pub fn stdio() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Value, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                debug!("EOF on reader");
                return Err(TransportError::EndOfStream);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line)?);
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_one_message_per_line() {
        let input: &[u8] = b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n\n{\"a\":2}\n";
        let transport = LineTransport::new(BufReader::new(input), Vec::new());

        assert_eq!(
            transport.receive().await.unwrap(),
            json!({"jsonrpc": "2.0", "method": "ping", "id": 1})
        );
        assert_eq!(transport.receive().await.unwrap(), json!({"a": 2}));
        assert!(matches!(transport.receive().await, Err(TransportError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_invalid_line_is_an_encoding_error() {
        let input: &[u8] = b"{not json\n{\"ok\":true}\n";
        let transport = LineTransport::new(BufReader::new(input), Vec::new());

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Encode(_)));
        assert!(!err.is_terminal());
        assert_eq!(transport.receive().await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_writes_newline_terminated_json() {
        let transport = LineTransport::new(BufReader::new(&b""[..]), Vec::new());
        transport.send(json!({"id": 1, "result": {}})).await.unwrap();
        transport.send(json!({"id": 2, "result": {}})).await.unwrap();

        let written = transport.writer.lock().await.clone();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "{\"id\":1,\"result\":{}}\n{\"id\":2,\"result\":{}}\n"
        );

        transport.close().await.unwrap();
        assert!(matches!(transport.send(json!({})).await, Err(TransportError::Closed)));
    }
}
