// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Error codes and error types for the JSON-RPC layer.
//!
//! This module defines the stable wire error codes, the wire error object, and the
//! error type request handlers return. Handler failures are mapped onto wire errors
//! here so no stack trace or unrelated internal message ever reaches the peer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProtocolError;

/// Wire error codes surfaced to the peer.
///
/// The codes -32700 through -32603 are standard JSON-RPC 2.0 errors. The remaining
/// codes sit in the implementation-defined server range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Parse error (-32700)
    /// Invalid JSON was received.
    ParseError = -32700,

    /// Invalid Request (-32600)
    /// The message is not a valid request, or its id was already used.
    InvalidRequest = -32600,

    /// Method not found (-32601)
    /// The method does not exist or its capability was not declared.
    MethodNotFound = -32601,

    /// Invalid params (-32602)
    /// Invalid method parameter(s) or metadata.
    InvalidParams = -32602,

    /// Internal error (-32603)
    InternalError = -32603,

    /// Rate limit exceeded (-32001)
    /// Too many calls for one key within the current window.
    RateLimitExceeded = -32001,

    /// Server not initialized (-32002)
    /// A request arrived before the lifecycle reached OPERATION.
    ServerNotInitialized = -32002,

    /// Request cancelled (-32800)
    /// The request was cancelled locally before a reply arrived.
    RequestCancelled = -32800,
}

impl ErrorCode {
    /// Returns a string description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::RateLimitExceeded => "Rate limit exceeded",
            ErrorCode::ServerNotInitialized => "Server not initialized",
            ErrorCode::RequestCancelled => "Request cancelled",
        }
    }

    /// Create an ErrorCode from a raw integer value.
    ///
    /// Returns None if the code is not one this engine produces.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32001 => Some(ErrorCode::RateLimitExceeded),
            -32002 => Some(ErrorCode::ServerNotInitialized),
            -32800 => Some(ErrorCode::RequestCancelled),
            _ => None,
        }
    }

    /// Returns the integer error code.
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code as i32
    }
}

/// JSON-RPC error object as carried in an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// The error code
    pub code: i32,

    /// A short description of the error
    pub message: String,

    /// Additional information about the error (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Creates a new JSON-RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a new JSON-RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Creates a standard parse error.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, format!("Parse error: {}", detail.into()))
    }

    /// Creates a standard invalid request error.
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, format!("Invalid request: {}", detail.into()))
    }

    /// Creates a standard method not found error.
    pub fn method_not_found<S: Into<String>>(method: S) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Unknown method: {}", method.into()))
    }

    /// Creates a standard invalid params error carrying the validation message.
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorCode::InvalidParams, msg)
    }

    /// Creates the generic internal error. The cause is never included.
    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError, ErrorCode::InternalError.description())
    }

    /// Returns the typed code, if it is one this engine knows.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// Error returned by request and notification handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A local validation failure. The message is forwarded to the peer.
    #[error("{0}")]
    InvalidParams(String),

    /// A protocol violation, forwarded with its own code.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Any other failure. Logged locally and reported as a generic internal error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Shorthand for a validation failure.
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        HandlerError::InvalidParams(msg.into())
    }

    /// Converts the error to a wire error object.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            HandlerError::InvalidParams(msg) => JsonRpcError::invalid_params(msg.clone()),
            HandlerError::Protocol(e) => e.to_jsonrpc_error(),
            HandlerError::Internal(_) => JsonRpcError::internal_error(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::InvalidParams(error.to_string())
    }
}
