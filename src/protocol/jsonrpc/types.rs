// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Message shapes exchanged between the two endpoints.
//!
//! Messages travel as opaque `serde_json::Value`s through the transport. This module
//! gives them structure: requests, notifications, and responses, plus the
//! classification from a raw value into one of the three.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::JsonRpcError;

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request identifier.
///
/// `Null` is only ever seen on error replies to input that could not be parsed.
/// Outgoing requests always use a string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier
    String(String),

    /// Numeric identifier
    Number(i64),

    /// Null identifier
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "{}", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// A request for the peer to invoke a method and reply.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// Name of the method to be invoked
    pub method: String,

    /// Method parameters. `_meta` lives inside these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Request identifier
    pub id: Id,
}

impl Request {
    /// Creates a new request.
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Returns the `_meta` object of the params, if any.
    pub fn meta(&self) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get("_meta"))
    }
}

/// A one-way message. Notifications are never answered.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Notification {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// Name of the notification
    pub method: String,

    /// Notification parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A reply to a request, carrying either a result or an error.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Response {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// The result of the method invocation, if successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// The error object, if an error occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Same identifier as the request this is responding to
    pub id: Id,
}

impl Response {
    /// Creates a new successful response.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Creates a new error response.
    pub fn error(id: Id, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Returns true if this response contains a successful result.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if this response contains an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits the response into its result or its error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any message that can travel over a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request expecting a response
    Request(Request),
    /// A one-way notification
    Notification(Notification),
    /// A response to an earlier request
    Response(Response),
}

impl Message {
    /// Classifies a decoded value.
    ///
    /// An object with `method` and `id` is a request, `method` alone a notification,
    /// and `result` or `error` alongside `id` a response. Anything else is rejected
    /// as an invalid request.
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        let obj = value
            .as_object()
            .ok_or_else(|| JsonRpcError::invalid_request("message must be a JSON object"))?;

        let has_method = obj.contains_key("method");
        let has_id = obj.contains_key("id");
        let has_outcome = obj.contains_key("result") || obj.contains_key("error");

        let decoded = if has_method && has_id {
            serde_json::from_value(value).map(Message::Request)
        } else if has_method {
            serde_json::from_value(value).map(Message::Notification)
        } else if has_outcome && has_id {
            serde_json::from_value(value).map(Message::Response)
        } else {
            return Err(JsonRpcError::invalid_request(
                "message is neither a request, notification, nor response",
            ));
        };

        decoded.map_err(|e| JsonRpcError::invalid_request(e.to_string()))
    }

    /// Encodes the message as a value for the transport.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Message::Request(r) => serde_json::to_value(r),
            Message::Notification(n) => serde_json::to_value(n),
            Message::Response(r) => serde_json::to_value(r),
        }
    }

    /// Returns the method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new(1, "tools/call", Some(json!({"name": "echo"})));

        let json_str = serde_json::to_string(&request).unwrap();
        let expected = r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"echo"},"id":1}"#;
        assert_eq!(json_str, expected);

        let deserialized: Request = serde_json::from_str(expected).unwrap();
        assert_eq!(deserialized.method, "tools/call");
        assert_eq!(deserialized.id, Id::Number(1));
    }

    #[test]
    fn test_response_serialization() {
        let success = Response::success(Id::Number(1), json!(19));
        let json_str = serde_json::to_string(&success).unwrap();
        assert_eq!(json_str, r#"{"jsonrpc":"2.0","result":19,"id":1}"#);

        let error = Response::error(
            Id::String("abc".to_string()),
            JsonRpcError::new(ErrorCode::MethodNotFound, "Method not found"),
        );
        let json_str = serde_json::to_string(&error).unwrap();
        let expected = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":"abc"}"#;
        assert_eq!(json_str, expected);
    }

    #[test]
    fn test_message_classification() {
        let request = Message::from_value(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).unwrap();
        assert!(matches!(request, Message::Request(ref r) if r.id == Id::Number(7)));

        let notification =
            Message::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).unwrap();
        assert!(matches!(notification, Message::Notification(_)));

        let response = Message::from_value(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert!(matches!(response, Message::Response(ref r) if r.is_success()));

        let error_response = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "Parse error"}
        }))
        .unwrap();
        assert!(matches!(error_response, Message::Response(ref r) if r.id == Id::Null && r.is_error()));
    }

    #[test]
    fn test_message_classification_rejects_shapeless_values() {
        for value in [json!([1, 2]), json!("ping"), json!({"jsonrpc": "2.0"}), json!({"result": 1})] {
            let err = Message::from_value(value).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidRequest.code());
        }
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(Response::success(Id::Number(1), json!({"ok": true})).into_result(), Ok(json!({"ok": true})));

        let err = Response::error(Id::Number(2), JsonRpcError::internal_error()).into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());
    }

    #[test]
    fn test_request_meta() {
        let request = Request::new("r-1", "tools/call", Some(json!({"_meta": {"progressToken": "t"}})));
        assert_eq!(request.meta(), Some(&json!({"progressToken": "t"})));
        assert_eq!(Request::new(2, "ping", None).meta(), None);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(Id::String("abc".to_string()).to_string(), "abc");
        assert_eq!(Id::Number(123).to_string(), "123");
        assert_eq!(Id::Null.to_string(), "null");
    }
}
