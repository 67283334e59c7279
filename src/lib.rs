//! MCP Conduit Library
//!
//! This library contains the transport-agnostic engine of a bidirectional MCP
//! JSON-RPC peer: connection lifecycle and capability negotiation, request/response
//! correlation with timeouts and cooperative cancellation, progress tracking, and
//! fixed-window rate limiting.
//!
//! # Architecture
//!
//! - [`protocol::endpoint::Endpoint`] owns one connection and its single reader loop
//! - [`protocol::jsonrpc`] holds the message model, dispatcher and correlator
//! - [`transport`] defines the collaborator interface and two stock transports
//! - [`config`] loads and validates [`config::EngineConfig`]

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Internal modules that are not part of the public API
#[cfg(test)]
pub(crate) mod tests;

/// Version information for MCP Conduit.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization function.
///
/// Installs the tracing-backed reporter for errors that are logged rather than
/// returned. Safe to call more than once.
pub fn init() {
    error::set_error_reporter(std::sync::Arc::new(error::TracingErrorReporter));
}
