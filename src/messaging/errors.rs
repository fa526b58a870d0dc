//! # Messaging Error Types
//!
//! Structured error types for everything that talks to the message backend:
//! publishing, receiving, acknowledging and provisioning.

use std::time::Duration;
use thiserror::Error;

/// Messaging error types
#[derive(Error, Debug, Clone)]
pub enum MessagingError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// The message was already deleted or its receipt has expired
    #[error("Message not in flight: {message_id}")]
    MessageNotInFlight { message_id: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Delivery failed for {queue_name}: {operation}: {message}")]
    Delivery {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Backend error: {operation}: {message}")]
    Backend {
        operation: String,
        message: String,
        /// Whether retrying the same call later may succeed
        transient: bool,
    },

    #[error("Timeout: operation {operation} timed out after {timeout_millis}ms")]
    Timeout {
        operation: String,
        timeout_millis: u64,
    },

    #[error("Encryption key not found: {key_alias}")]
    EncryptionKeyNotFound { key_alias: String },
}

impl MessagingError {
    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create a topic not found error
    pub fn topic_not_found(topic: impl Into<String>) -> Self {
        Self::TopicNotFound {
            topic: topic.into(),
        }
    }

    pub fn message_not_in_flight(message_id: impl Into<String>) -> Self {
        Self::MessageNotInFlight {
            message_id: message_id.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Delivery {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a backend error that is worth retrying on the next poll
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Create a backend error that will not go away by itself
    pub fn unrecoverable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_millis: timeout.as_millis() as u64,
        }
    }

    pub fn encryption_key_not_found(key_alias: impl Into<String>) -> Self {
        Self::EncryptionKeyNotFound {
            key_alias: key_alias.into(),
        }
    }

    /// Whether a poller should treat this failure as an empty batch and try again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend { transient, .. } => *transient,
            Self::Timeout { .. } | Self::Delivery { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() || err.is_data() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MessagingError::transient("receive", "throttled").is_transient());
        assert!(MessagingError::timeout("receive", Duration::from_secs(1)).is_transient());
        assert!(!MessagingError::unrecoverable("receive", "access denied").is_transient());
        assert!(!MessagingError::queue_not_found("orders").is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: MessagingError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }
}
