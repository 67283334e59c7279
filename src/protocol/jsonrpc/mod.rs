// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! JSON-RPC 2.0 layer for MCP Conduit.
//!
//! This module implements the [JSON-RPC 2.0 specification](https://www.jsonrpc.org/specification)
//! message model and the two halves of a bidirectional JSON-RPC peer: the
//! [`Dispatcher`] that answers inbound requests, and the [`RequestCorrelator`] that
//! matches responses to outbound ones.
//!
//! # Example
//!
//! ```
//! use mcp_conduit::protocol::jsonrpc::{parse_message, Message};
//!
//! let message = parse_message(r#"{"jsonrpc": "2.0", "id": 1, "method": "ping"}"#).unwrap();
//! assert!(matches!(message, Message::Request(ref r) if r.method == "ping"));
//! ```

pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod types;
pub mod validation;

pub use correlation::{CorrelationError, RequestCorrelator};
pub use dispatcher::{Dispatcher, DispatcherBuilder, HandlerResult, RequestContext};
pub use error::{ErrorCode, HandlerError, JsonRpcError};
pub use types::{Id, Message, Notification, Request, Response};
pub use validation::{parse_message, validate_message};

#[cfg(test)]
mod tests;
