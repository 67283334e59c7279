//! Progress token coordination.
//!
//! The party that wants progress updates puts a token into a request's `_meta`. While
//! the request runs, the token is active and every update for it must strictly
//! increase. The token goes away when an update reaches completion or when the last
//! request bound to it is released, whichever happens first.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, TransportError};
use crate::protocol::jsonrpc::types::{Id, Notification};
use crate::protocol::jsonrpc::validation::validate_meta;
use crate::protocol::methods::NotificationMethod;
use crate::protocol::rate_limit::RateLimiter;
use crate::transport::MessageSink;

/// Largest integer magnitude an `f64` holds without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Opaque progress token supplied by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token
    String(String),
    /// Integer token
    Number(i64),
}

impl ProgressToken {
    /// Decodes a token, accepting strings and integral numbers only.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        match value {
            Value::String(s) => Ok(ProgressToken::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(ProgressToken::Number(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
                        Ok(ProgressToken::Number(f as i64))
                    }
                    _ => Err(ProtocolError::InvalidParams(format!(
                        "progressToken must be an integer without precision loss: {}",
                        n
                    ))),
                }
            }
            _ => Err(ProtocolError::InvalidParams(
                "progressToken must be a string or integer".to_string(),
            )),
        }
    }

    /// Extracts the token from request params, validating its placement.
    ///
    /// A `progressToken` outside `_meta` is rejected.
    pub fn from_params(params: Option<&Value>) -> Result<Option<Self>, ProtocolError> {
        let Some(params) = params.and_then(Value::as_object) else {
            return Ok(None);
        };
        if params.contains_key("progressToken") {
            return Err(ProtocolError::InvalidParams(
                "progressToken must be in _meta".to_string(),
            ));
        }
        let Some(meta) = params.get("_meta") else {
            return Ok(None);
        };
        validate_meta(meta)?;
        meta.get("progressToken").map(Self::from_value).transpose()
    }

    /// The token as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            ProgressToken::String(s) => Value::String(s.clone()),
            ProgressToken::Number(n) => Value::from(*n),
        }
    }
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressToken::String(s) => f.write_str(s),
            ProgressToken::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// The token the update belongs to
    pub progress_token: ProgressToken,
    /// Current progress
    pub progress: f64,
    /// Expected total, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressNotification {
    /// Creates an update.
    pub fn new(token: ProgressToken, progress: f64, total: Option<f64>, message: Option<String>) -> Self {
        Self {
            progress_token: token,
            progress,
            total,
            message,
        }
    }

    /// Reads an update from `notifications/progress` params.
    pub fn from_params(params: Option<&Value>) -> Result<Self, ProtocolError> {
        let params = params.cloned().unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
    }

    /// Encodes the update as a `notifications/progress` message.
    pub fn to_notification(&self) -> Notification {
        let mut params = Map::new();
        params.insert("progressToken".to_string(), self.progress_token.to_value());
        params.insert("progress".to_string(), Value::from(self.progress));
        if let Some(total) = self.total {
            params.insert("total".to_string(), Value::from(total));
        }
        if let Some(message) = &self.message {
            params.insert("message".to_string(), Value::String(message.clone()));
        }
        Notification::new(NotificationMethod::Progress.as_str(), Some(Value::Object(params)))
    }
}

#[derive(Debug, Default)]
struct TokenState {
    request_ids: HashSet<Id>,
    last_progress: Option<f64>,
}

/// Per-connection progress state.
#[derive(Debug)]
pub struct ProgressCoordinator {
    tokens: DashMap<ProgressToken, TokenState>,
    by_request: DashMap<Id, ProgressToken>,
    limiter: Arc<RateLimiter>,
}

impl ProgressCoordinator {
    /// Creates a coordinator that throttles emission with `limiter`.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            tokens: DashMap::new(),
            by_request: DashMap::new(),
            limiter,
        }
    }

    /// Binds the progress token in `params`, if any, to `request_id`.
    pub fn register(&self, request_id: &Id, params: Option<&Value>) -> Result<Option<ProgressToken>, ProtocolError> {
        let Some(token) = ProgressToken::from_params(params)? else {
            return Ok(None);
        };

        match self.tokens.entry(token.clone()) {
            Entry::Occupied(_) => return Err(ProtocolError::DuplicateToken(token)),
            Entry::Vacant(slot) => {
                let mut state = TokenState::default();
                state.request_ids.insert(request_id.clone());
                slot.insert(state);
            }
        }
        self.by_request.insert(request_id.clone(), token.clone());
        tracing::trace!(%request_id, %token, "Progress token registered");
        Ok(Some(token))
    }

    /// Records an update for an active token.
    ///
    /// Returns true if the update completed the token, in which case the token and
    /// every request bound to it are released.
    pub fn advance(&self, token: &ProgressToken, progress: f64, total: Option<f64>) -> Result<bool, ProtocolError> {
        if !progress.is_finite() || total.map_or(false, |t| !t.is_finite()) {
            return Err(ProtocolError::InvalidParams(format!(
                "progress and total must be finite numbers for token {}",
                token
            )));
        }
        {
            let mut state = self
                .tokens
                .get_mut(token)
                .ok_or_else(|| ProtocolError::UnknownToken(token.clone()))?;

            if let Some(previous) = state.last_progress {
                if progress <= previous {
                    return Err(ProtocolError::ProgressNotIncreasing {
                        token: token.clone(),
                        previous,
                        attempted: progress,
                    });
                }
            }
            if let Some(total) = total {
                if progress > total {
                    return Err(ProtocolError::ProgressExceedsTotal {
                        token: token.clone(),
                        progress,
                        total,
                    });
                }
            }
            state.last_progress = Some(progress);
        }

        let completed = progress >= total.unwrap_or(1.0);
        if completed {
            if let Some((_, state)) = self.tokens.remove(token) {
                for id in &state.request_ids {
                    self.by_request.remove(id);
                }
            }
            tracing::trace!(%token, "Progress token completed");
        }
        Ok(completed)
    }

    /// Emits an update through `sink`.
    ///
    /// Updates for inactive tokens are dropped silently. Updates rejected by the rate
    /// limiter or by ordering rules are logged and dropped. Only a failure of the sink
    /// itself is returned.
    pub async fn send(&self, update: ProgressNotification, sink: &dyn MessageSink) -> Result<(), TransportError> {
        let token = &update.progress_token;
        if !self.is_active(token) {
            tracing::debug!(%token, "Dropping progress update for inactive token");
            return Ok(());
        }

        let admitted = self
            .limiter
            .require_allowance(&token.to_string())
            .and_then(|_| self.advance(token, update.progress, update.total));
        if let Err(e) = admitted {
            tracing::warn!(%token, error = %e, "Dropping progress update");
            return Ok(());
        }

        sink.send(update.to_notification().into()).await
    }

    /// Unbinds `request_id` from its token, removing the token if it was the last one.
    pub fn release(&self, request_id: &Id) {
        let Some((_, token)) = self.by_request.remove(request_id) else {
            return;
        };
        let now_empty = match self.tokens.get_mut(&token) {
            Some(mut state) => {
                state.request_ids.remove(request_id);
                state.request_ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.tokens.remove_if(&token, |_, state| state.request_ids.is_empty());
        }
    }

    /// Whether `token` is bound to a running request.
    pub fn is_active(&self, token: &ProgressToken) -> bool {
        self.tokens.contains_key(token)
    }

    /// Whether any update has been recorded for an active `token`.
    pub fn has_progress(&self, token: &ProgressToken) -> bool {
        self.tokens
            .get(token)
            .map(|state| state.last_progress.is_some())
            .unwrap_or(false)
    }

    /// The token bound to `request_id`, if any.
    pub fn token_for(&self, request_id: &Id) -> Option<ProgressToken> {
        self.by_request.get(request_id).map(|t| t.value().clone())
    }
}
