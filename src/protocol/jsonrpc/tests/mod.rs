// Copyright (c) 2025 MCP Conduit Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Cross-component tests for the JSON-RPC layer.

mod integration_tests;
