// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Message validation utilities.
//!
//! This module checks the structural rules every message must follow before it is
//! dispatched: protocol version, method names, parameter shapes, and the key grammar
//! of the `_meta` envelope.

use serde_json::Value;

use super::error::JsonRpcError;
use super::types::{Id, Message, JSONRPC_VERSION};
use crate::error::ProtocolError;

/// Parses raw text into a classified, validated message.
///
/// Returns a parse error for invalid JSON and an invalid-request error for any
/// structural violation.
pub fn parse_message<T: AsRef<str>>(text: T) -> Result<Message, JsonRpcError> {
    let value: Value =
        serde_json::from_str(text.as_ref()).map_err(|e| JsonRpcError::parse_error(e.to_string()))?;
    let message = Message::from_value(value)?;
    validate_message(&message)?;
    Ok(message)
}

/// Validates a single message.
///
/// Performs the following checks:
/// - Verifies the jsonrpc version is "2.0"
/// - Checks that method, if any, is a non-empty string
/// - Rejects requests whose id is null
/// - Validates that params, if present, is an object, array, or null
pub fn validate_message(message: &Message) -> Result<(), JsonRpcError> {
    let (jsonrpc, method, params) = match message {
        Message::Request(r) => (&r.jsonrpc, Some(&r.method), r.params.as_ref()),
        Message::Notification(n) => (&n.jsonrpc, Some(&n.method), n.params.as_ref()),
        Message::Response(r) => (&r.jsonrpc, None, None),
    };

    if jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcError::invalid_request(format!(
            "Invalid JSON-RPC version: {}, must be 2.0",
            jsonrpc
        )));
    }

    if let Some(method) = method {
        if method.is_empty() {
            return Err(JsonRpcError::invalid_request("Method cannot be empty"));
        }
    }

    if let Message::Request(request) = message {
        if request.id == Id::Null {
            return Err(JsonRpcError::invalid_request("Request id must not be null"));
        }
    }

    if let Some(params) = params {
        if !params.is_object() && !params.is_array() && !params.is_null() {
            return Err(JsonRpcError::invalid_request(
                "Params must be an object, array, or null",
            ));
        }
    }

    Ok(())
}

/// Validates a `_meta` envelope.
///
/// The envelope must be an object. Each key is an optional prefix ending in `/`
/// followed by a name. The prefix is a dot-separated list of labels; a label starts
/// with a letter, ends with a letter or digit, and may contain hyphens in between.
/// A name is empty or starts and ends with an alphanumeric, with `.`, `_` and `-`
/// allowed in between.
pub fn validate_meta(meta: &Value) -> Result<(), ProtocolError> {
    let obj = meta
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidParams("_meta must be an object".to_string()))?;

    for key in obj.keys() {
        if !is_valid_meta_key(key) {
            return Err(ProtocolError::InvalidParams(format!("Invalid _meta key: {}", key)));
        }
    }
    Ok(())
}

fn is_valid_meta_key(key: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, name)) => {
            !prefix.is_empty()
                && !name.contains('/')
                && prefix.split('.').all(is_valid_label)
                && is_valid_name(name)
        }
        None => is_valid_name(key),
    }
}

fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphabetic()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (None, _) => true,
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        (Some(_), None) => false,
    }
}
