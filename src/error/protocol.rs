//! Protocol error module.
//!
//! This module defines the engine's protocol-state taxonomy: violations by the peer
//! (duplicate ids, misplaced metadata), lifecycle state violations, and rate-limit
//! rejections. Every variant maps onto a stable wire error code.

use thiserror::Error;

use crate::protocol::jsonrpc::error::{ErrorCode, JsonRpcError};
use crate::protocol::jsonrpc::types::Id;
use crate::protocol::lifecycle::LifecycleState;
use crate::protocol::methods::Capability;
use crate::protocol::progress::ProgressToken;

/// Errors that can occur during protocol operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A request id was registered that this endpoint has already seen.
    #[error("Duplicate request id: {0}")]
    DuplicateRequest(Id),

    /// A progress token is already bound to an active request.
    #[error("Duplicate progress token: {0}")]
    DuplicateToken(ProgressToken),

    /// Request parameters or metadata are malformed.
    #[error("{0}")]
    InvalidParams(String),

    /// A progress update referenced a token that is not active.
    #[error("Unknown progress token: {0}")]
    UnknownToken(ProgressToken),

    /// A progress update did not strictly increase.
    #[error("Progress for token {token} must increase: {attempted} <= {previous}")]
    ProgressNotIncreasing {
        /// The token being advanced
        token: ProgressToken,
        /// The last recorded value
        previous: f64,
        /// The rejected value
        attempted: f64,
    },

    /// A progress update exceeded its declared total.
    #[error("Progress for token {token} exceeds total: {progress} > {total}")]
    ProgressExceedsTotal {
        /// The token being advanced
        token: ProgressToken,
        /// The rejected value
        progress: f64,
        /// The declared total
        total: f64,
    },

    /// The fixed-window rate limit for a key has been reached.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The connection has not completed initialization.
    #[error("Server not initialized")]
    NotInitialized,

    /// A lifecycle transition was attempted from the wrong state.
    #[error("Invalid lifecycle state: expected {expected}, was {actual}")]
    InvalidState {
        /// The state the operation requires
        expected: LifecycleState,
        /// The state the connection is in
        actual: LifecycleState,
    },

    /// Capability negotiation was attempted a second time.
    #[error("Capabilities have already been negotiated")]
    AlreadyNegotiated,

    /// A required capability was not declared.
    #[error("Capability not supported: {0}")]
    MissingCapability(Capability),

    /// No handler exists for the method.
    #[error("Unknown method: {0}")]
    MethodNotFound(String),

    /// The peer agreed on a protocol version this endpoint does not speak.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// The wire error code this violation is reported with.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::DuplicateRequest(_) => ErrorCode::InvalidRequest,
            ProtocolError::DuplicateToken(_)
            | ProtocolError::InvalidParams(_)
            | ProtocolError::UnknownToken(_)
            | ProtocolError::ProgressNotIncreasing { .. }
            | ProtocolError::ProgressExceedsTotal { .. } => ErrorCode::InvalidParams,
            ProtocolError::RateLimitExceeded(_) => ErrorCode::RateLimitExceeded,
            ProtocolError::UnsupportedVersion(_) => ErrorCode::InvalidRequest,
            ProtocolError::NotInitialized => ErrorCode::ServerNotInitialized,
            ProtocolError::MissingCapability(_) | ProtocolError::MethodNotFound(_) => {
                ErrorCode::MethodNotFound
            }
            ProtocolError::InvalidState { .. } | ProtocolError::AlreadyNegotiated => {
                ErrorCode::InternalError
            }
        }
    }

    /// Converts the violation into a wire error object.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.code(), self.to_string())
    }
}
