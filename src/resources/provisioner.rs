//! Resource provisioner over the low-level [`BrokerAdmin`] port.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{QueueCache, ResourceManager, ResourceTags};
use crate::config::PorterConfig;
use crate::error::PorterError;
use crate::messaging::{
    BrokerAdmin, FanoutInfo, FanoutSpec, KeyId, KeyProvider, MessagingError, QueueInfo,
    QueueSpec, RedrivePolicy,
};
use crate::naming::TopicId;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Idempotent [`ResourceManager`] implementation
///
/// Concurrent ensures for the same resource are serialized through a
/// per-name async lock, and every ensure re-checks existence after taking
/// the lock, so creation happens at most once per process.
pub struct ResourceProvisioner {
    config: Arc<PorterConfig>,
    admin: Arc<dyn BrokerAdmin>,
    keys: Arc<dyn KeyProvider>,
    cache: QueueCache,
    fanouts: DashMap<String, FanoutInfo>,
    topic_locks: LockMap,
    queue_locks: LockMap,
    tags: ResourceTags,
}

impl std::fmt::Debug for ResourceProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProvisioner")
            .field("cached_queues", &self.cache.len())
            .field("cached_fanouts", &self.fanouts.len())
            .field("tags", &self.tags)
            .finish()
    }
}

impl ResourceProvisioner {
    pub fn new(
        config: Arc<PorterConfig>,
        admin: Arc<dyn BrokerAdmin>,
        keys: Arc<dyn KeyProvider>,
    ) -> Self {
        Self::with_cache(config, admin, keys, QueueCache::new())
    }

    /// Share a queue cache with other components of the same process
    pub fn with_cache(
        config: Arc<PorterConfig>,
        admin: Arc<dyn BrokerAdmin>,
        keys: Arc<dyn KeyProvider>,
        cache: QueueCache,
    ) -> Self {
        let tags = ResourceTags::from_config(&config);
        Self {
            config,
            admin,
            keys,
            cache,
            fanouts: DashMap::new(),
            topic_locks: DashMap::new(),
            queue_locks: DashMap::new(),
            tags,
        }
    }

    pub fn cache(&self) -> &QueueCache {
        &self.cache
    }

    fn lock_for(locks: &LockMap, name: &str) -> Arc<Mutex<()>> {
        locks.entry(name.to_string()).or_default().clone()
    }

    async fn encryption_key(&self) -> Result<KeyId, MessagingError> {
        self.keys
            .get_encryption_key()
            .await?
            .ok_or_else(|| MessagingError::encryption_key_not_found(&self.config.pub_key))
    }

    async fn queue_info(&self, queue_name: &str) -> Result<Option<QueueInfo>, MessagingError> {
        if let Some(info) = self.cache.get(queue_name) {
            return Ok(Some(info));
        }
        let found = self.admin.find_queue(queue_name).await?;
        if let Some(info) = &found {
            self.cache.upsert(info.clone());
        }
        Ok(found)
    }

    async fn create_queue_pair(
        &self,
        topic: &TopicId,
        fanout: &FanoutInfo,
    ) -> Result<(), MessagingError> {
        let key = self.encryption_key().await?;
        let tags = self.tags.to_map();

        info!(queue = %topic.dead_letter_queue_name(), "Creating dead letter queue");
        let dead_letter = self
            .admin
            .create_queue(&QueueSpec {
                queue_name: topic.dead_letter_queue_name(),
                tags: tags.clone(),
                visibility_timeout: self.config.message_timeout(),
                delivery_delay: Duration::ZERO,
                retention: self.config.message_retention(),
                encryption_key: Some(key.clone()),
                redrive: None,
            })
            .await?;

        info!(queue = %topic.queue_name(), "Creating queue");
        let queue = self
            .admin
            .create_queue(&QueueSpec {
                queue_name: topic.queue_name().to_string(),
                tags,
                visibility_timeout: self.config.message_timeout(),
                delivery_delay: self.config.message_delay(),
                retention: self.config.message_retention(),
                encryption_key: Some(key),
                redrive: Some(RedrivePolicy {
                    dead_letter_queue_ref: dead_letter.queue_ref,
                    max_receive_count: self.config.retries_before_dead_letter,
                }),
            })
            .await?;

        info!(
            queue = %queue.queue_name,
            queue_ref = %queue.queue_ref,
            topic = %fanout.topic_name,
            topic_ref = %fanout.topic_ref,
            "Subscribing queue on topic"
        );
        self.admin.subscribe_queue(fanout, &queue).await
    }

    /// Poll until the backend reports the queue, bounded by the configured timeout
    async fn wait_for_queue(&self, queue_name: &str) -> Result<QueueInfo, MessagingError> {
        let timeout = self.config.queue_ready_timeout();
        let poll_interval = self.config.queue_ready_poll_interval();

        let wait = async {
            loop {
                if let Some(info) = self.admin.find_queue(queue_name).await? {
                    info!(queue = %queue_name, "Queue available");
                    return Ok::<_, MessagingError>(info);
                }
                info!(queue = %queue_name, "Waiting for queue to become available");
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| MessagingError::timeout(format!("wait_for_queue({queue_name})"), timeout))?
    }
}

#[async_trait]
impl ResourceManager for ResourceProvisioner {
    #[instrument(skip(self, topic), fields(topic = %topic.topic_name()))]
    async fn ensure_topic_exists(&self, topic: &TopicId) -> Result<FanoutInfo, PorterError> {
        if let Some(info) = self.fanouts.get(topic.topic_name()) {
            return Ok(info.clone());
        }

        let lock = Self::lock_for(&self.topic_locks, topic.topic_name());
        let _guard = lock.lock().await;

        if let Some(info) = self.fanouts.get(topic.topic_name()) {
            return Ok(info.clone());
        }

        if let Some(info) = self.admin.find_fanout(topic).await? {
            info!(topic = %topic.topic_name(), "Topic already exists");
            self.fanouts.insert(topic.topic_name().to_string(), info.clone());
            return Ok(info);
        }

        info!(
            topic = %topic.topic_name(),
            event = %topic.event(),
            region = %self.config.region,
            "Setting topic up"
        );

        if !self.config.auto_create_new_topic {
            return Err(PorterError::topic_not_provisioned(
                topic.topic_name(),
                topic.event(),
            ));
        }

        let key = self.encryption_key().await?;
        let info = self
            .admin
            .create_fanout(&FanoutSpec {
                topic_name: topic.topic_name().to_string(),
                event: topic.event().to_string(),
                tags: self.tags.to_map(),
                encryption_key: Some(key),
            })
            .await?;

        self.fanouts.insert(topic.topic_name().to_string(), info.clone());
        Ok(info)
    }

    #[instrument(skip(self, topic), fields(queue = %topic.queue_name()))]
    async fn ensure_queue_exists(&self, topic: &TopicId) -> Result<QueueInfo, PorterError> {
        let queue_name = topic.queue_name();
        if let Some(info) = self.cache.get(queue_name) {
            return Ok(info);
        }

        let lock = Self::lock_for(&self.queue_locks, queue_name);
        let _guard = lock.lock().await;

        info!(queue = %queue_name, region = %self.config.region, "Setting queue up");

        if let Some(info) = self.queue_info(queue_name).await? {
            debug!(queue = %queue_name, "Queue already exists");
            return Ok(info);
        }

        let fanout = self.ensure_topic_exists(topic).await?;
        self.create_queue_pair(topic, &fanout).await?;

        let info = self.wait_for_queue(queue_name).await?;
        self.cache.upsert(info.clone());
        Ok(info)
    }

    async fn update_queue_attributes(
        &self,
        topic: &TopicId,
        visibility_timeout: Duration,
    ) -> Result<(), PorterError> {
        let queue_name = topic.queue_name();
        let Some(queue) = self.queue_info(queue_name).await? else {
            return Ok(());
        };

        if queue.visibility_timeout == visibility_timeout {
            return Ok(());
        }

        info!(
            queue = %queue_name,
            visibility_timeout_seconds = visibility_timeout.as_secs(),
            "Updating queue attributes"
        );
        self.admin
            .set_queue_visibility(&queue, visibility_timeout)
            .await?;
        self.cache.upsert(QueueInfo {
            visibility_timeout,
            ..queue
        });
        Ok(())
    }

    async fn setup_local_environment(&self) -> Result<(), PorterError> {
        if self.keys.get_encryption_key().await?.is_none() {
            let key = self.keys.create_key().await?;
            info!(key_alias = %self.config.pub_key, key = %key, "Created local encryption key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::in_memory::InMemoryBroker;

    fn provisioner(config: PorterConfig, broker: &Arc<InMemoryBroker>) -> ResourceProvisioner {
        ResourceProvisioner::new(Arc::new(config), broker.clone(), broker.clone())
    }

    fn topic(config: &PorterConfig) -> TopicId {
        TopicId::new("my_topic", &config.naming()).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_topic_creates_once() {
        let config = PorterConfig::with_source("orders");
        let broker = Arc::new(InMemoryBroker::new());
        let provisioner = provisioner(config.clone(), &broker);
        let topic = topic(&config);

        provisioner.ensure_topic_exists(&topic).await.unwrap();
        provisioner.ensure_topic_exists(&topic).await.unwrap();

        assert_eq!(broker.fanout_creation_count("MyTopic"), 1);
        assert_eq!(
            broker.fanout_tags("MyTopic").get("Source").map(String::as_str),
            Some("orders")
        );
    }

    #[tokio::test]
    async fn test_missing_topic_without_auto_create() {
        let config = PorterConfig {
            auto_create_new_topic: false,
            ..PorterConfig::with_source("orders")
        };
        let broker = Arc::new(InMemoryBroker::new());
        let result = provisioner(config.clone(), &broker)
            .ensure_topic_exists(&topic(&config))
            .await;

        assert!(matches!(result, Err(PorterError::TopicNotProvisioned { .. })));
        assert!(!broker.fanout_exists("MyTopic"));
    }

    #[tokio::test]
    async fn test_ensure_queue_creates_dead_letter_and_subscription() {
        let config = PorterConfig::with_source("orders");
        let broker = Arc::new(InMemoryBroker::new());
        let provisioner = provisioner(config.clone(), &broker);
        let topic = topic(&config);

        let info = provisioner.ensure_queue_exists(&topic).await.unwrap();

        assert_eq!(info.queue_name, "orders_my_topic");
        assert_eq!(
            broker.queue_names(),
            vec!["dead_letter_orders_my_topic", "orders_my_topic"]
        );
        assert_eq!(broker.subscribers("MyTopic"), vec!["orders_my_topic"]);
        assert_eq!(provisioner.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_encryption_key_fails_creation() {
        let config = PorterConfig::with_source("orders");
        let broker = Arc::new(InMemoryBroker::new().without_encryption_key());
        let result = provisioner(config.clone(), &broker)
            .ensure_topic_exists(&topic(&config))
            .await;

        assert!(matches!(
            result,
            Err(PorterError::Messaging(MessagingError::EncryptionKeyNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_setup_local_environment_creates_key() {
        let broker = Arc::new(InMemoryBroker::new().without_encryption_key());
        let provisioner = provisioner(PorterConfig::with_source("orders"), &broker);

        provisioner.setup_local_environment().await.unwrap();
        assert!(broker.encryption_key().is_some());
    }

    #[tokio::test]
    async fn test_update_queue_attributes_only_when_changed() {
        let config = PorterConfig::with_source("orders");
        let broker = Arc::new(InMemoryBroker::new());
        let provisioner = provisioner(config.clone(), &broker);
        let topic = topic(&config);
        provisioner.ensure_queue_exists(&topic).await.unwrap();

        provisioner
            .update_queue_attributes(&topic, config.message_timeout())
            .await
            .unwrap();
        assert!(broker.visibility_updates().is_empty());

        provisioner
            .update_queue_attributes(&topic, Duration::from_secs(90))
            .await
            .unwrap();
        provisioner
            .update_queue_attributes(&topic, Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(
            broker.visibility_updates(),
            vec![("orders_my_topic".to_string(), Duration::from_secs(90))]
        );
        assert_eq!(
            broker.queue_visibility_timeout("orders_my_topic"),
            Some(Duration::from_secs(90))
        );
    }
}
