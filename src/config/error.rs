//! Configuration Error Types
//!
//! Startup-time failures: invalid naming, duplicate registrations and
//! inconsistent timing options. None of these are ever retried.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Raw topic name does not satisfy the naming rules
    #[error("Invalid topic name '{topic}': {reason}")]
    InvalidTopicName { topic: String, reason: String },

    /// The same topic was registered by more than one consumer
    #[error("Duplicated topic definition: {topic}")]
    DuplicateTopic { topic: String },

    /// A consumer polls faster than the receive call may block
    #[error(
        "Polling interval for '{topic}' ({polling_interval_seconds}s) can't be less than long polling wait ({long_polling_wait_seconds}s)"
    )]
    PollingIntervalTooShort {
        topic: String,
        polling_interval_seconds: f64,
        long_polling_wait_seconds: u32,
    },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Failure reading or deserializing configuration sources
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },
}

impl ConfigurationError {
    /// Create an invalid topic name error
    pub fn invalid_topic_name(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopicName {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate topic error
    pub fn duplicate_topic(topic: impl Into<String>) -> Self {
        Self::DuplicateTopic {
            topic: topic.into(),
        }
    }

    /// Create a missing required field error
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create a load error
    pub fn load_error(error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::load_error(error)
    }
}
