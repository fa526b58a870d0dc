//! # Topic Naming
//!
//! The single naming authority for publish, consume and provisioning paths.
//! A raw topic name plus the naming configuration deterministically yields
//! the event name, the fan-out topic name and the consumer queue name.

pub mod case;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ConfigurationError, TopicNameConfig};
use crate::constants::{DEAD_LETTER_PREFIX, MIN_TOPIC_NAME_LENGTH};

pub use case::{to_pascal_case, to_snake_case, trim_underscores};

/// Per-call replacement of the configured prefix and/or suffix
///
/// `Some("")` removes the configured value, `None` keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicNameOverride {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl TopicNameOverride {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn without_prefix(self) -> Self {
        self.with_prefix("")
    }

    pub fn without_suffix(self) -> Self {
        self.with_suffix("")
    }

    /// Use the raw topic name with neither prefix nor suffix
    pub fn raw_topic_name() -> Self {
        Self::default().without_prefix().without_suffix()
    }

    pub fn has_values(&self) -> bool {
        self.prefix.is_some() || self.suffix.is_some()
    }
}

/// Resolved identity of a topic for one naming configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicId {
    raw_name: String,
    event: String,
    topic_name: String,
    queue_name: String,
    source: String,
    prefix: String,
    suffix: String,
}

impl TopicId {
    /// Resolve a raw topic name against naming configuration
    pub fn new(raw_topic: &str, config: &TopicNameConfig) -> Result<Self, ConfigurationError> {
        Self::validate_raw_name(raw_topic)?;

        let prefix = to_snake_case(&config.prefix);
        let suffix = to_snake_case(&config.suffix);
        let source = to_snake_case(&config.source);
        let event = to_snake_case(raw_topic);

        let topic_name = format!(
            "{}{}{}",
            to_pascal_case(&prefix),
            to_pascal_case(&event),
            to_pascal_case(&suffix)
        );
        let queue_name =
            trim_underscores(&format!("{prefix}_{source}_{event}_{suffix}")).to_string();

        Ok(Self {
            raw_name: raw_topic.to_string(),
            event,
            topic_name,
            queue_name,
            source,
            prefix,
            suffix,
        })
    }

    /// Resolve with an optional per-call override of prefix/suffix
    pub fn resolve(
        raw_topic: &str,
        config: &TopicNameConfig,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(raw_topic, &config.from_override(name_override))
    }

    /// At least six characters, starting with a letter, only `[A-Za-z0-9_]`
    pub fn is_valid_topic_name(raw_topic: &str) -> bool {
        Self::validate_raw_name(raw_topic).is_ok()
    }

    fn validate_raw_name(raw_topic: &str) -> Result<(), ConfigurationError> {
        if raw_topic.chars().count() < MIN_TOPIC_NAME_LENGTH {
            return Err(ConfigurationError::invalid_topic_name(
                raw_topic,
                format!("must be at least {MIN_TOPIC_NAME_LENGTH} characters"),
            ));
        }
        if !raw_topic.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(ConfigurationError::invalid_topic_name(
                raw_topic,
                "must start with a letter",
            ));
        }
        if !raw_topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigurationError::invalid_topic_name(
                raw_topic,
                "may only contain letters, digits and underscores",
            ));
        }
        Ok(())
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// snake_case event name carried in every envelope
    pub fn event(&self) -> &str {
        &self.event
    }

    /// PascalCase fan-out topic name
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// snake_case durable queue name for this source
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn dead_letter_queue_name(&self) -> String {
        format!("{DEAD_LETTER_PREFIX}{}", self.queue_name)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic_name)
    }
}
