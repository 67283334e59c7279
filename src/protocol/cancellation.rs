//! Duplicate-request and cancellation registry.
//!
//! Tracks which inbound request ids are being processed and which of those the peer
//! asked to cancel. Ids are remembered for the lifetime of the endpoint so a request
//! id can never be processed twice.

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::jsonrpc::types::{Id, Notification};
use crate::protocol::methods::NotificationMethod;

/// Params of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotification {
    /// The request to abandon
    pub request_id: Id,
    /// Why it was cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelledNotification {
    pub fn new(request_id: Id, reason: Option<String>) -> Self {
        Self { request_id, reason }
    }

    /// Reads the notice from notification params.
    pub fn from_params(params: Option<&Value>) -> Result<Self, ProtocolError> {
        let params = params.ok_or_else(|| ProtocolError::InvalidParams("requestId is required".to_string()))?;
        serde_json::from_value(params.clone()).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
    }

    pub fn to_notification(&self) -> Notification {
        Notification::new(
            NotificationMethod::Cancelled.as_str(),
            serde_json::to_value(self).ok(),
        )
    }
}

/// Registry of active and cancelled request ids.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    used: DashSet<Id>,
    active: DashSet<Id>,
    cancelled: DashMap<Id, Option<String>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as active. Fails if the id was ever registered before.
    pub fn register(&self, id: &Id) -> Result<(), ProtocolError> {
        if !self.used.insert(id.clone()) {
            return Err(ProtocolError::DuplicateRequest(id.clone()));
        }
        self.active.insert(id.clone());
        Ok(())
    }

    /// Records a cancellation for `id` if it is currently active.
    ///
    /// Returns true if the cancellation was recorded.
    pub fn cancel(&self, id: &Id, reason: Option<String>) -> bool {
        // Holding the active entry keeps a concurrent release from interleaving.
        match self.active.get(id) {
            Some(_guard) => {
                self.cancelled.insert(id.clone(), reason);
                true
            }
            None => {
                tracing::debug!(%id, "Ignoring cancellation for inactive request");
                false
            }
        }
    }

    /// Whether `id` has been cancelled and not yet released.
    pub fn is_cancelled(&self, id: &Id) -> bool {
        self.cancelled.contains_key(id)
    }

    /// The reason given for cancelling `id`, if any.
    pub fn reason(&self, id: &Id) -> Option<String> {
        self.cancelled.get(id).and_then(|r| r.value().clone())
    }

    /// Whether `id` is currently being processed.
    pub fn is_active(&self, id: &Id) -> bool {
        self.active.contains(id)
    }

    /// Clears the active and cancelled state for `id`. The id stays used.
    pub fn release(&self, id: &Id) {
        self.active.remove(id);
        self.cancelled.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cancelled_notification_params() {
        let notice = CancelledNotification::new(Id::Number(3), Some("timeout".into()));
        let notification = notice.to_notification();
        assert_eq!(notification.method, "notifications/cancelled");
        assert_eq!(notification.params, Some(json!({"requestId": 3, "reason": "timeout"})));
        assert_eq!(CancelledNotification::from_params(notification.params.as_ref()).unwrap(), notice);

        assert!(CancelledNotification::from_params(None).is_err());
        assert!(CancelledNotification::from_params(Some(&json!({"reason": "x"}))).is_err());
    }

    #[test]
    fn test_register_rejects_reuse_even_after_release() {
        let registry = CancellationRegistry::new();
        let id = Id::Number(1);

        assert!(registry.register(&id).is_ok());
        assert_eq!(registry.register(&id), Err(ProtocolError::DuplicateRequest(id.clone())));

        registry.release(&id);
        assert!(!registry.is_active(&id));
        assert_eq!(registry.register(&id), Err(ProtocolError::DuplicateRequest(id)));
    }

    #[test]
    fn test_cancel_only_applies_to_active_requests() {
        let registry = CancellationRegistry::new();
        let id = Id::String("req".into());

        assert!(!registry.cancel(&id, Some("early".into())));
        assert!(!registry.is_cancelled(&id));

        registry.register(&id).unwrap();
        assert!(registry.cancel(&id, Some("user abort".into())));
        assert!(registry.is_cancelled(&id));
        assert_eq!(registry.reason(&id).as_deref(), Some("user abort"));
    }

    #[test]
    fn test_release_clears_cancellation() {
        let registry = CancellationRegistry::new();
        let id = Id::Number(9);
        registry.register(&id).unwrap();
        registry.cancel(&id, None);
        assert!(registry.is_cancelled(&id));
        assert_eq!(registry.reason(&id), None);

        registry.release(&id);
        assert!(!registry.is_cancelled(&id));
        assert!(!registry.cancel(&id, None));
    }
}
