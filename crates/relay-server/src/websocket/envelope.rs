//! Wire message envelope.
//!
//! Every JSON frame in either direction is an [`Envelope`]. Payload fields
//! are accessed through typed decode helpers that return a typed error
//! instead of panicking on a wrong shape.

use chrono::{DateTime, Utc};
use relay_core::{EventId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel tag for system traffic.
pub const CHANNEL_SYSTEM: &str = "system";

/// Channel tag for user traffic.
pub const CHANNEL_USER: &str = "user";

/// Recognized wire message types.
///
/// `Ping`/`Pong` exist for completeness; liveness in practice rides the
/// transport's native ping/pong control frames, not JSON envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Server challenge sent immediately after the upgrade.
    AuthRequest,
    /// Client reply carrying `data.token`.
    AuthResponse,
    /// Server acknowledgement of a successful handshake.
    AuthSuccess,
    /// Server notice of a failed handshake, `data.reason` set.
    AuthFailure,
    /// Liveness probe.
    Ping,
    /// Liveness acknowledgment.
    Pong,
    /// Generic application payload.
    Message,
    /// Server fan-out to authenticated clients.
    Broadcast,
    /// A user came online.
    UserJoin,
    /// A user went offline.
    UserLeave,
    /// Server-reported error.
    Error,
}

/// Typed-decode failures for payload fields.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// A required payload field is absent.
    #[error("missing field: {field}")]
    MissingField {
        /// Dotted path of the missing field.
        field: &'static str,
    },

    /// A payload field has the wrong JSON type.
    #[error("invalid type for field {field}: expected {expected}")]
    InvalidFieldType {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What the decoder expected to find.
        expected: &'static str,
    },
}

/// The bidirectional wire envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message id. Inbound frames without one get a fresh id.
    #[serde(default)]
    pub id: EventId,
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Channel tag (`system` or `user`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Action tag within the channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Originating user, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Free-form payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Creation time. Inbound frames without one are stamped on receipt.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    fn system(kind: MessageType, action: &str) -> Self {
        Self {
            id: EventId::new(),
            kind,
            channel: Some(CHANNEL_SYSTEM.into()),
            action: Some(action.into()),
            user_id: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// The challenge sent to every freshly upgraded connection.
    #[must_use]
    pub fn auth_request() -> Self {
        Self::system(MessageType::AuthRequest, "authenticate")
    }

    /// Handshake success, echoing the resolved user id.
    #[must_use]
    pub fn auth_success(user_id: &UserId) -> Self {
        let mut data = Map::new();
        let _ = data.insert("userId".into(), Value::from(user_id.as_str()));
        let mut envelope = Self::system(MessageType::AuthSuccess, "authenticated");
        envelope.data = Some(data);
        envelope
    }

    /// Handshake failure with a human-readable reason.
    #[must_use]
    pub fn auth_failure(reason: &str) -> Self {
        let mut data = Map::new();
        let _ = data.insert("reason".into(), Value::from(reason));
        let mut envelope = Self::system(MessageType::AuthFailure, "authentication_failed");
        envelope.data = Some(data);
        envelope
    }

    /// A user-login notice fanned out on the system channel.
    #[must_use]
    pub fn user_join(user_id: &UserId, attributes: Map<String, Value>) -> Self {
        let mut envelope = Self::system(MessageType::UserJoin, "user_login");
        envelope.user_id = Some(user_id.clone());
        envelope.data = Some(attributes);
        envelope
    }

    /// A broadcast carrying an event-bus payload.
    #[must_use]
    pub fn broadcast(data: Map<String, Value>) -> Self {
        let mut envelope = Self::system(MessageType::Broadcast, "broadcast");
        envelope.data = Some(data);
        envelope
    }

    /// Typed decode of `data.token` from an `auth_response`.
    ///
    /// The type check runs before any token verification: a missing payload,
    /// a non-string value, or an empty string is rejected here.
    pub fn auth_token(&self) -> Result<&str, EnvelopeError> {
        let data = self
            .data
            .as_ref()
            .ok_or(EnvelopeError::MissingField { field: "data" })?;
        let value = data
            .get("token")
            .ok_or(EnvelopeError::MissingField { field: "data.token" })?;
        let token = value.as_str().ok_or(EnvelopeError::InvalidFieldType {
            field: "data.token",
            expected: "string",
        })?;
        if token.is_empty() {
            return Err(EnvelopeError::InvalidFieldType {
                field: "data.token",
                expected: "non-empty string",
            });
        }
        Ok(token)
    }

    /// The failure reason from an `auth_failure`, when present.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.data.as_ref()?.get("reason")?.as_str()
    }
}
