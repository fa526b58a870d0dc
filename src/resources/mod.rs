//! # Resource Provisioning
//!
//! Idempotent creation of fan-out topics and durable consumer queues.
//!
//! ## Guarantees
//!
//! - `ensure_*` calls may run concurrently or repeatedly for the same topic;
//!   the final resource state is the same and "already exists" is never an
//!   error for the caller
//! - Every queue gets a dead-letter queue created first and a redrive policy
//!   of `retries_before_dead_letter` receives
//! - Queue attribute updates only touch the backend when a value changed

pub mod cache;
pub mod provisioner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::PorterConfig;
use crate::constants::{self, tags};
use crate::error::PorterError;
use crate::messaging::{FanoutInfo, QueueInfo};
use crate::naming::TopicId;

pub use cache::QueueCache;
pub use provisioner::ResourceProvisioner;

/// Provisioning capability used by producers and the host
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// Make the topic's fan-out exist
    async fn ensure_topic_exists(&self, topic: &TopicId) -> Result<FanoutInfo, PorterError>;

    /// Make the consumer queue, its dead-letter queue and the subscription exist
    async fn ensure_queue_exists(&self, topic: &TopicId) -> Result<QueueInfo, PorterError>;

    /// Apply a new visibility timeout if it differs from the known one
    async fn update_queue_attributes(
        &self,
        topic: &TopicId,
        visibility_timeout: Duration,
    ) -> Result<(), PorterError>;

    /// Prepare an emulated local backend (encryption key)
    async fn setup_local_environment(&self) -> Result<(), PorterError>;
}

/// Standard metadata attached to every created resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTags {
    pub source: String,
    pub app: String,
}

impl ResourceTags {
    pub fn from_config(config: &PorterConfig) -> Self {
        Self {
            source: config.source.clone(),
            app: config.app_name().to_string(),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (tags::CREATED_BY.to_string(), constants::CREATED_BY.to_string()),
            (tags::SOURCE.to_string(), self.source.clone()),
            (tags::APP.to_string(), self.app.clone()),
        ])
    }
}
