//! Error module for MCP Conduit.
//!
//! This module provides the error handling framework for the engine. Each layer has
//! its own explicit error type (configuration, protocol state, transport); this module
//! ties them together under [`McpError`] and provides the reporting hook used for
//! failures that are deliberately swallowed rather than propagated.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_error::SpanTrace;

pub mod config;
pub mod protocol;
pub mod transport;

pub use self::config::ConfigError;
pub use self::protocol::ProtocolError;
pub use self::transport::TransportError;
pub use crate::protocol::jsonrpc::correlation::CorrelationError;

/// Result type alias used throughout MCP Conduit.
pub type McpResult<T> = Result<T, McpError>;

/// Core error enum for MCP Conduit.
#[derive(Error, Debug)]
pub enum McpError {
    /// Errors occurring during configuration loading or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to protocol state or message handling.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Errors related to the transport collaborator.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An outgoing call failed.
    #[error("Request failed: {0}")]
    Correlation(#[from] CorrelationError),

    /// IO errors that may occur during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error with message for cases where specific error types are not defined.
    #[error("{0}")]
    Custom(String),
}

/// Error reporting structure to provide context and debugging information.
#[derive(Debug)]
pub struct ErrorContext {
    /// Description of the failure.
    pub error: String,

    /// The component where the error occurred.
    pub component: String,

    /// Additional context information to help with debugging.
    pub details: Option<String>,

    /// Span trace captured when the context was created.
    pub trace: Option<String>,
}

impl ErrorContext {
    /// Creates a new error context for a failure in `component`.
    ///
    /// The current span trace is captured so the report can be tied back to the
    /// request being processed.
    pub fn new<E: Display, S: Into<String>>(error: E, component: S) -> Self {
        Self {
            error: error.to_string(),
            component: component.into(),
            details: None,
            trace: Some(SpanTrace::capture().to_string()),
        }
    }

    /// Adds detail information to the error context.
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error in {}: {}", self.component, self.error)?;
        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }
        Ok(())
    }
}

/// Error reporter trait for reporting swallowed errors to various sinks.
pub trait ErrorReporter: Send + Sync + std::fmt::Debug {
    /// Report an error with context.
    fn report(&self, context: ErrorContext);
}

/// Error reporter that logs through the tracing framework.
#[derive(Default, Debug)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, context: ErrorContext) {
        tracing::warn!(
            error = %context.error,
            component = %context.component,
            details = context.details.as_deref().unwrap_or("None"),
            trace = context.trace.as_deref().unwrap_or("None"),
            "Error reported"
        );
    }
}

static ERROR_REPORTER: OnceCell<Arc<dyn ErrorReporter>> = OnceCell::new();

/// Install the global error reporter.
///
/// Only the first call takes effect; returns `false` if a reporter was already set.
pub fn set_error_reporter(reporter: Arc<dyn ErrorReporter>) -> bool {
    ERROR_REPORTER.set(reporter).is_ok()
}

/// Report an error through the global reporter, falling back to tracing.
pub fn report(context: ErrorContext) {
    match ERROR_REPORTER.get() {
        Some(reporter) => reporter.report(context),
        None => TracingErrorReporter.report(context),
    }
}
