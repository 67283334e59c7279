//! Transport error module.
//!
//! This module defines error types reported by transport collaborators. The engine
//! never looks inside a transport; it only distinguishes a clean end of stream from
//! other failures.

use std::io;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was closed locally.
    #[error("Transport closed")]
    Closed,

    /// The peer closed its side of the stream.
    #[error("End of stream")]
    EndOfStream,

    /// No message arrived within the receive timeout.
    #[error("Transport timeout after {0} milliseconds")]
    Timeout(u64),

    /// Error reading from or writing to the underlying stream.
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("Transport encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A failure specific to a custom transport implementation.
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns true if this error means the connection is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::EndOfStream | TransportError::Io(_))
    }
}
