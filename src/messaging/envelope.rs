//! Wire envelope and publish results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::MessagingError;

/// JSON wrapper carried from producer through the backend to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub event: String,
    pub datetime: DateTime<Utc>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl MessageEnvelope {
    pub fn new(
        event: impl Into<String>,
        datetime: DateTime<Utc>,
        payload: Value,
        message_id: Uuid,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            event: event.into(),
            datetime,
            payload,
            message_id: Some(message_id),
            correlation_id,
        }
    }

    pub fn to_json(&self) -> Result<String, MessagingError> {
        serde_json::to_string(self)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, MessagingError> {
        serde_json::from_str(text)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }

    /// Payload as JSON text, the form handed to consumers as the message body
    pub fn payload_text(&self) -> String {
        self.payload.to_string()
    }
}

/// Outcome of a single publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub is_success: bool,
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
}

impl PublishResult {
    pub fn success(message_id: Uuid, correlation_id: Option<Uuid>) -> Self {
        Self {
            is_success: true,
            message_id,
            correlation_id,
        }
    }

    pub fn failure(message_id: Uuid, correlation_id: Option<Uuid>) -> Self {
        Self {
            is_success: false,
            message_id,
            correlation_id,
        }
    }
}
