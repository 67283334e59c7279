//! Test modules for MCP Conduit.
//!
//! Component unit tests live next to their components; this module holds the
//! shared fixtures and the cross-cutting configuration and error tests.

pub mod config_tests;
