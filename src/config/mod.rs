//! # Porter Configuration System
//!
//! Recognized options for naming, queue provisioning, polling and error
//! propagation. Values are loaded in layers by [`ConfigManager`]: defaults,
//! an optional configuration file, then `PORTER__*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use porter_core::config::{ConfigManager, PorterConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config: &PorterConfig = manager.config();
//! println!("polling every {:?}", config.polling_interval());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;
use crate::naming::TopicNameOverride;

pub use error::ConfigurationError;
pub use loader::ConfigManager;

/// Naming inputs used to derive topic and queue identities
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicNameConfig {
    pub prefix: String,
    pub suffix: String,
    pub source: String,
}

impl TopicNameConfig {
    /// Apply a per-call override. Only prefix and suffix can change, never the source.
    pub fn from_override(&self, name_override: Option<&TopicNameOverride>) -> Self {
        Self {
            source: self.source.clone(),
            prefix: name_override
                .and_then(|o| o.prefix.clone())
                .unwrap_or_else(|| self.prefix.clone()),
            suffix: name_override
                .and_then(|o| o.suffix.clone())
                .unwrap_or_else(|| self.suffix.clone()),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PorterConfig {
    /// Naming prefix applied to topics and queues
    pub prefix: String,
    /// Naming suffix applied to topics and queues
    pub suffix: String,
    /// Name of the consuming application, part of every queue name
    pub source: String,
    /// Application name for resource tags (defaults to `source`)
    pub app_name: Option<String>,
    /// Batch size of a single receive call
    pub queue_max_receive_count: u32,
    /// Receive count after which the backend moves a message to its dead-letter queue
    pub retries_before_dead_letter: u32,
    /// Alias of the encryption key used for new resources
    pub pub_key: String,
    pub message_retention_days: u32,
    /// Visibility timeout and default consume timeout
    pub message_timeout_seconds: u32,
    /// Publish-side delivery delay
    pub message_delay_seconds: u32,
    pub polling_interval_seconds: f64,
    /// Receive wait time; must not exceed the polling interval
    pub long_polling_wait_seconds: u32,
    /// Backend endpoint override
    pub service_url: Option<String>,
    pub localstack: bool,
    pub auto_create_new_topic: bool,
    /// Propagate dispatch and polling failures to the process
    pub raise_exceptions: bool,
    pub region: String,
    pub queue_ready_timeout_seconds: u64,
    pub queue_ready_poll_interval_millis: u64,
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            source: String::new(),
            app_name: None,
            queue_max_receive_count: 5,
            retries_before_dead_letter: 3,
            pub_key: "alias/PubSubKey".to_string(),
            message_retention_days: 7,
            message_timeout_seconds: 30,
            message_delay_seconds: 0,
            polling_interval_seconds: 5.0,
            long_polling_wait_seconds: 0,
            service_url: None,
            localstack: false,
            auto_create_new_topic: true,
            raise_exceptions: false,
            region: "us-east-1".to_string(),
            queue_ready_timeout_seconds: constants::DEFAULT_QUEUE_READY_TIMEOUT.as_secs(),
            queue_ready_poll_interval_millis: constants::DEFAULT_QUEUE_READY_POLL_INTERVAL
                .as_millis() as u64,
        }
    }
}

impl PorterConfig {
    /// Configuration with the given source name and defaults for everything else
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.source.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "source",
                "naming configuration",
            ));
        }

        if self.queue_max_receive_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_max_receive_count",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.retries_before_dead_letter == 0 {
            return Err(ConfigurationError::invalid_value(
                "retries_before_dead_letter",
                "0",
                "redrive threshold must be greater than 0",
            ));
        }

        if !(self.polling_interval_seconds.is_finite() && self.polling_interval_seconds > 0.0) {
            return Err(ConfigurationError::invalid_value(
                "polling_interval_seconds",
                self.polling_interval_seconds.to_string(),
                "polling interval must be a positive number of seconds",
            ));
        }

        if self.polling_interval() < self.long_polling_wait() {
            return Err(ConfigurationError::PollingIntervalTooShort {
                topic: "<default>".to_string(),
                polling_interval_seconds: self.polling_interval_seconds,
                long_polling_wait_seconds: self.long_polling_wait_seconds,
            });
        }

        Ok(())
    }

    /// Naming inputs without overrides
    pub fn naming(&self) -> TopicNameConfig {
        TopicNameConfig {
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            source: self.source.clone(),
        }
    }

    /// Naming inputs with a per-call override applied
    pub fn naming_with(&self, name_override: Option<&TopicNameOverride>) -> TopicNameConfig {
        self.naming().from_override(name_override)
    }

    /// Application name used in resource tags
    pub fn app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(&self.source)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_interval_seconds.max(0.0))
    }

    pub fn long_polling_wait(&self) -> Duration {
        Duration::from_secs(u64::from(self.long_polling_wait_seconds))
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.message_timeout_seconds))
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.message_delay_seconds))
    }

    pub fn message_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.message_retention_days) * 24 * 60 * 60)
    }

    pub fn queue_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_ready_timeout_seconds)
    }

    pub fn queue_ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_ready_poll_interval_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PorterConfig::default();
        assert_eq!(config.queue_max_receive_count, 5);
        assert_eq!(config.retries_before_dead_letter, 3);
        assert_eq!(config.message_timeout(), Duration::from_secs(30));
        assert_eq!(config.polling_interval(), Duration::from_secs(5));
        assert!(config.auto_create_new_topic);
        assert!(!config.raise_exceptions);
        assert_eq!(config.region, "us-east-1");
    }

    #[test]
    fn test_validate_requires_source() {
        let config = PorterConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
        assert!(PorterConfig::with_source("orders").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_long_poll_above_polling_interval() {
        let config = PorterConfig {
            polling_interval_seconds: 1.0,
            long_polling_wait_seconds: 10,
            ..PorterConfig::with_source("orders")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::PollingIntervalTooShort { .. })
        ));
    }

    #[test]
    fn test_override_keeps_source() {
        let config = PorterConfig {
            prefix: "pre".to_string(),
            suffix: "suf".to_string(),
            ..PorterConfig::with_source("billing")
        };
        let name_override = TopicNameOverride::default().with_prefix("other");
        let naming = config.naming_with(Some(&name_override));

        assert_eq!(naming.prefix, "other");
        assert_eq!(naming.suffix, "suf");
        assert_eq!(naming.source, "billing");
    }

    #[test]
    fn test_app_name_falls_back_to_source() {
        let mut config = PorterConfig::with_source("billing");
        assert_eq!(config.app_name(), "billing");
        config.app_name = Some("billing-api".to_string());
        assert_eq!(config.app_name(), "billing-api");
    }
}
