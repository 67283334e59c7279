//! Protocol module for MCP Conduit.
//!
//! This module implements the engine: JSON-RPC framing and dispatch, request
//! correlation, the connection lifecycle, progress and cancellation tracking, rate
//! limiting, and the endpoint that assembles them over a transport.

pub mod cancellation;
pub mod endpoint;
pub mod jsonrpc;
pub mod lifecycle;
pub mod logging;
pub mod methods;
pub mod ping;
pub mod progress;
pub mod rate_limit;

pub use endpoint::{Endpoint, EndpointBuilder, ProgressListener};
pub use lifecycle::{InitializeResult, LifecycleState, PeerInfo, Role};
pub use logging::LoggingLevel;
pub use methods::{Capability, CapabilitySet};
pub use ping::PingScheduler;
pub use progress::{ProgressNotification, ProgressToken};
