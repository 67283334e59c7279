//! Method and capability registry.
//!
//! Every request method declares the capability the receiving side must have
//! advertised before the method may be invoked. Notifications carry no gate.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named optional feature that either peer may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Client exposes filesystem roots
    Roots,
    /// Client can sample from a model
    Sampling,
    /// Client can ask the user for input
    Elicitation,
    /// Server exposes resources
    Resources,
    /// Server exposes tools
    Tools,
    /// Server exposes prompts
    Prompts,
    /// Server emits log messages
    Logging,
    /// Server offers argument completion
    Completions,
}

impl Capability {
    /// All capabilities, in wire order.
    pub const ALL: [Capability; 8] = [
        Capability::Roots,
        Capability::Sampling,
        Capability::Elicitation,
        Capability::Resources,
        Capability::Tools,
        Capability::Prompts,
        Capability::Logging,
        Capability::Completions,
    ];

    /// The key under which the capability appears in a capabilities object.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Roots => "roots",
            Capability::Sampling => "sampling",
            Capability::Elicitation => "elicitation",
            Capability::Resources => "resources",
            Capability::Tools => "tools",
            Capability::Prompts => "prompts",
            Capability::Logging => "logging",
            Capability::Completions => "completions",
        }
    }

    /// Looks a capability up by its wire key.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities one side declared.
pub type CapabilitySet = BTreeSet<Capability>;

/// Reads a capabilities object into a set. Unknown keys are ignored.
pub fn capabilities_from_value(value: &Value) -> CapabilitySet {
    value
        .as_object()
        .map(|obj| obj.keys().filter_map(|k| Capability::from_name(k)).collect())
        .unwrap_or_default()
}

/// Writes a capability set as a capabilities object.
pub fn capabilities_to_value(capabilities: &CapabilitySet) -> Value {
    let obj: Map<String, Value> = capabilities
        .iter()
        .map(|c| (c.as_str().to_string(), Value::Object(Map::new())))
        .collect();
    Value::Object(obj)
}

/// Request methods known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesTemplatesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    PromptsList,
    PromptsGet,
    LoggingSetLevel,
    CompletionComplete,
    RootsList,
    SamplingCreateMessage,
    ElicitationCreate,
}

impl RequestMethod {
    const ALL: [RequestMethod; 16] = [
        RequestMethod::Initialize,
        RequestMethod::Ping,
        RequestMethod::ToolsList,
        RequestMethod::ToolsCall,
        RequestMethod::ResourcesList,
        RequestMethod::ResourcesTemplatesList,
        RequestMethod::ResourcesRead,
        RequestMethod::ResourcesSubscribe,
        RequestMethod::ResourcesUnsubscribe,
        RequestMethod::PromptsList,
        RequestMethod::PromptsGet,
        RequestMethod::LoggingSetLevel,
        RequestMethod::CompletionComplete,
        RequestMethod::RootsList,
        RequestMethod::SamplingCreateMessage,
        RequestMethod::ElicitationCreate,
    ];

    /// The method name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Initialize => "initialize",
            RequestMethod::Ping => "ping",
            RequestMethod::ToolsList => "tools/list",
            RequestMethod::ToolsCall => "tools/call",
            RequestMethod::ResourcesList => "resources/list",
            RequestMethod::ResourcesTemplatesList => "resources/templates/list",
            RequestMethod::ResourcesRead => "resources/read",
            RequestMethod::ResourcesSubscribe => "resources/subscribe",
            RequestMethod::ResourcesUnsubscribe => "resources/unsubscribe",
            RequestMethod::PromptsList => "prompts/list",
            RequestMethod::PromptsGet => "prompts/get",
            RequestMethod::LoggingSetLevel => "logging/setLevel",
            RequestMethod::CompletionComplete => "completion/complete",
            RequestMethod::RootsList => "roots/list",
            RequestMethod::SamplingCreateMessage => "sampling/createMessage",
            RequestMethod::ElicitationCreate => "elicitation/create",
        }
    }

    /// Looks a method up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == name)
    }

    /// The capability the receiving side must have declared, if any.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            RequestMethod::Initialize | RequestMethod::Ping => None,
            RequestMethod::ToolsList | RequestMethod::ToolsCall => Some(Capability::Tools),
            RequestMethod::ResourcesList
            | RequestMethod::ResourcesTemplatesList
            | RequestMethod::ResourcesRead
            | RequestMethod::ResourcesSubscribe
            | RequestMethod::ResourcesUnsubscribe => Some(Capability::Resources),
            RequestMethod::PromptsList | RequestMethod::PromptsGet => Some(Capability::Prompts),
            RequestMethod::LoggingSetLevel => Some(Capability::Logging),
            RequestMethod::CompletionComplete => Some(Capability::Completions),
            RequestMethod::RootsList => Some(Capability::Roots),
            RequestMethod::SamplingCreateMessage => Some(Capability::Sampling),
            RequestMethod::ElicitationCreate => Some(Capability::Elicitation),
        }
    }

    /// Whether the method may be invoked before the connection is operational.
    pub fn allowed_before_operation(&self) -> bool {
        matches!(self, RequestMethod::Initialize | RequestMethod::Ping)
    }
}

/// Capability required to receive the named request method. Custom methods have none.
pub fn required_capability(method: &str) -> Option<Capability> {
    RequestMethod::from_name(method).and_then(|m| m.required_capability())
}

/// Notification methods known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationMethod {
    Initialized,
    Cancelled,
    Progress,
    Message,
    ToolsListChanged,
    ResourcesListChanged,
    ResourceUpdated,
    PromptsListChanged,
    RootsListChanged,
}

impl NotificationMethod {
    /// The method name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Initialized => "notifications/initialized",
            NotificationMethod::Cancelled => "notifications/cancelled",
            NotificationMethod::Progress => "notifications/progress",
            NotificationMethod::Message => "notifications/message",
            NotificationMethod::ToolsListChanged => "notifications/tools/list_changed",
            NotificationMethod::ResourcesListChanged => "notifications/resources/list_changed",
            NotificationMethod::ResourceUpdated => "notifications/resources/updated",
            NotificationMethod::PromptsListChanged => "notifications/prompts/list_changed",
            NotificationMethod::RootsListChanged => "notifications/roots/list_changed",
        }
    }
}

impl fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
