//! # Porter Error Types
//!
//! Top-level error returned by the public API. Component errors keep their
//! own structured enums and are wrapped here.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::consumer::DispatchError;
use crate::messaging::MessagingError;

#[derive(Debug, Error)]
pub enum PorterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Topic is missing and auto-creation is disabled
    #[error("Topic '{topic}' for '{event}' does not exist")]
    TopicNotProvisioned { topic: String, event: String },

    #[error("Unable to publish message {message_id} (correlation: {})", display_correlation(.correlation_id))]
    PublishFailed {
        message_id: Uuid,
        correlation_id: Option<Uuid>,
    },

    /// A polling or consumer task ended abnormally
    #[error("Worker for topic '{topic}' failed: {message}")]
    Worker { topic: String, message: String },
}

impl PorterError {
    pub fn topic_not_provisioned(topic: impl Into<String>, event: impl Into<String>) -> Self {
        Self::TopicNotProvisioned {
            topic: topic.into(),
            event: event.into(),
        }
    }

    pub fn worker(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Whether this error is fatal at startup rather than a per-message failure
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::TopicNotProvisioned { .. }
        )
    }
}

fn display_correlation(correlation_id: &Option<Uuid>) -> String {
    correlation_id.map_or_else(|| "none".to_string(), |id| id.to_string())
}

pub type Result<T> = std::result::Result<T, PorterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_classification() {
        let err = PorterError::topic_not_provisioned("MyTopic", "my_topic");
        assert_eq!(err.to_string(), "Topic 'MyTopic' for 'my_topic' does not exist");
        assert!(err.is_startup_error());

        let id = Uuid::new_v4();
        let err = PorterError::PublishFailed {
            message_id: id,
            correlation_id: None,
        };
        assert_eq!(
            err.to_string(),
            format!("Unable to publish message {id} (correlation: none)")
        );
        assert!(!err.is_startup_error());

        let err: PorterError = ConfigurationError::duplicate_topic("my_topic").into();
        assert!(err.is_startup_error());
    }
}
