//! Connection lifecycle and capability negotiation.
//!
//! A connection moves INIT → OPERATION → SHUTDOWN and never back. Version and
//! capabilities are agreed once while in INIT and are read-only afterwards.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ConfigResult;
use crate::error::{ConfigError, ProtocolError};
use crate::protocol::jsonrpc::error::{ErrorCode, JsonRpcError};
use crate::protocol::jsonrpc::types::{Id, Response};
use crate::protocol::methods::{capabilities_from_value, capabilities_to_value, Capability, CapabilitySet};

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Negotiating
    Init,
    /// Normal operation
    Operation,
    /// Terminal
    Shutdown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "INIT",
            LifecycleState::Operation => "OPERATION",
            LifecycleState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `initialize`
    Client,
    /// Answers `initialize`
    Server,
}

/// Name and version an implementation advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PeerInfo {
    /// Creates peer info without a title.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }
}

/// The answer to `initialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeResult {
    /// Agreed protocol version
    pub protocol_version: String,
    /// Capabilities of the answering side
    pub capabilities: CapabilitySet,
    /// Identity of the answering side
    pub server_info: PeerInfo,
    /// Usage instructions for the client
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Encodes the result for the wire.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "protocolVersion": self.protocol_version,
            "capabilities": capabilities_to_value(&self.capabilities),
            "serverInfo": self.server_info,
        });
        if let Some(instructions) = &self.instructions {
            value["instructions"] = Value::String(instructions.clone());
        }
        value
    }

    /// Decodes an `initialize` result.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let protocol_version = value
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidParams("protocolVersion is required".to_string()))?
            .to_string();
        let server_info = value
            .get("serverInfo")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ProtocolError::InvalidParams(format!("invalid serverInfo: {}", e)))?
            .ok_or_else(|| ProtocolError::InvalidParams("serverInfo is required".to_string()))?;
        Ok(Self {
            protocol_version,
            capabilities: value.get("capabilities").map(capabilities_from_value).unwrap_or_default(),
            server_info,
            instructions: value.get("instructions").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    negotiated: bool,
    protocol_version: Option<String>,
    peer_capabilities: CapabilitySet,
    peer_info: Option<PeerInfo>,
}

/// Lifecycle state machine for one connection.
#[derive(Debug)]
pub struct LifecycleCoordinator {
    role: Role,
    local_capabilities: CapabilitySet,
    local_info: PeerInfo,
    instructions: Option<String>,
    supported_versions: Vec<String>,
    inner: RwLock<Inner>,
}

impl LifecycleCoordinator {
    /// Creates a coordinator in INIT.
    ///
    /// `supported_versions` is sorted newest first. It must not be empty.
    pub fn new(
        role: Role,
        local_capabilities: CapabilitySet,
        local_info: PeerInfo,
        instructions: Option<String>,
        mut supported_versions: Vec<String>,
    ) -> ConfigResult<Self> {
        if supported_versions.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one protocol version must be supported".to_string(),
            ));
        }
        supported_versions.sort_by(|a, b| b.cmp(a));
        supported_versions.dedup();

        Ok(Self {
            role,
            local_capabilities,
            local_info,
            instructions,
            supported_versions,
            inner: RwLock::new(Inner {
                state: LifecycleState::Init,
                negotiated: false,
                protocol_version: None,
                peer_capabilities: CapabilitySet::new(),
                peer_info: None,
            }),
        })
    }

    /// Answers a client's `initialize`. Callable once, only in INIT.
    ///
    /// A supported requested version is echoed back; otherwise the latest supported
    /// version is offered and the client decides whether to continue.
    pub fn negotiate(
        &self,
        requested_version: &str,
        requested_capabilities: CapabilitySet,
        client_info: Option<PeerInfo>,
    ) -> Result<InitializeResult, ProtocolError> {
        let mut inner = self.inner.write();
        Self::check_negotiable(&inner)?;

        let version = if self.supports_version(requested_version) {
            requested_version.to_string()
        } else {
            self.latest_version().to_string()
        };
        inner.negotiated = true;
        inner.protocol_version = Some(version.clone());
        inner.peer_capabilities = requested_capabilities;
        inner.peer_info = client_info;
        drop(inner);

        tracing::info!(protocol_version = %version, "Negotiated protocol version");
        Ok(InitializeResult {
            protocol_version: version,
            capabilities: self.local_capabilities.clone(),
            server_info: self.local_info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    /// Records a server's answer to our `initialize`. Callable once, only in INIT.
    pub fn adopt(&self, result: &InitializeResult) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        Self::check_negotiable(&inner)?;
        inner.negotiated = true;
        inner.protocol_version = Some(result.protocol_version.clone());
        inner.peer_capabilities = result.capabilities.clone();
        inner.peer_info = Some(result.server_info.clone());
        Ok(())
    }

    fn check_negotiable(inner: &Inner) -> Result<(), ProtocolError> {
        if inner.state != LifecycleState::Init {
            return Err(ProtocolError::InvalidState {
                expected: LifecycleState::Init,
                actual: inner.state,
            });
        }
        if inner.negotiated {
            return Err(ProtocolError::AlreadyNegotiated);
        }
        Ok(())
    }

    /// Moves INIT → OPERATION.
    pub fn confirm_ready(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        if inner.state != LifecycleState::Init {
            return Err(ProtocolError::InvalidState {
                expected: LifecycleState::Init,
                actual: inner.state,
            });
        }
        inner.state = LifecycleState::Operation;
        tracing::debug!("Connection is operational");
        Ok(())
    }

    /// Moves to SHUTDOWN from any state. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        if inner.state != LifecycleState::Shutdown {
            tracing::debug!(from = %inner.state, "Connection shutting down");
            inner.state = LifecycleState::Shutdown;
        }
    }

    /// Returns the error response for `id` if the connection is not operational.
    pub fn ensure_operational(&self, id: &Id) -> Option<Response> {
        if self.state() == LifecycleState::Operation {
            return None;
        }
        Some(Response::error(
            id.clone(),
            JsonRpcError::new(ErrorCode::ServerNotInitialized, ProtocolError::NotInitialized.to_string()),
        ))
    }

    /// Fails if the peer did not declare `capability`.
    pub fn require_capability(&self, capability: Capability) -> Result<(), ProtocolError> {
        if self.inner.read().peer_capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(ProtocolError::MissingCapability(capability))
        }
    }

    /// Fails if this endpoint did not declare `capability`.
    pub fn require_local_capability(&self, capability: Capability) -> Result<(), ProtocolError> {
        if self.local_capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(ProtocolError::MissingCapability(capability))
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.read().state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.inner.read().protocol_version.clone()
    }

    pub fn peer_capabilities(&self) -> CapabilitySet {
        self.inner.read().peer_capabilities.clone()
    }

    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.inner.read().peer_info.clone()
    }

    pub fn local_capabilities(&self) -> &CapabilitySet {
        &self.local_capabilities
    }

    pub fn local_info(&self) -> &PeerInfo {
        &self.local_info
    }

    /// Supported versions, newest first.
    pub fn supported_versions(&self) -> &[String] {
        &self.supported_versions
    }

    pub fn latest_version(&self) -> &str {
        // Non-empty by construction.
        &self.supported_versions[0]
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }
}
