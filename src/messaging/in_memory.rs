//! # In-Memory Broker
//!
//! Test backend implementing every capability port with the semantics of a
//! managed fan-out topic + durable queue bus:
//!
//! - **Fan-out**: a publish is copied into every queue subscribed to the topic
//! - **Visibility timeout**: received messages are hidden until deleted,
//!   released or their timeout expires
//! - **Redrive**: a message already received `max_receive_count` times is
//!   moved to the dead-letter queue on the next receive attempt
//! - **Bookkeeping**: resource creation counts and release delays are recorded
//!   for assertions
//!
//! Time is measured with [`tokio::time::Instant`], so tests running with a
//! paused clock can advance through visibility timeouts and release delays.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use porter_core::messaging::{in_memory::InMemoryBroker, Backend};
//! use std::sync::Arc;
//!
//! let broker = Arc::new(InMemoryBroker::new());
//! let backend = Backend::from_shared(broker.clone());
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::traits::{
    BrokerAdmin, ConsumeDriver, FanoutInfo, FanoutSpec, KeyId, KeyProvider, ProduceDriver,
    QueueInfo, QueueSpec,
};
use super::{
    Message, MessageAcknowledger, MessageEnvelope, MessagingError, PublishResult, ReceiptHandle,
};
use crate::config::PorterConfig;
use crate::naming::TopicId;

const QUEUE_REF_PREFIX: &str = "memory://queues/";
const TOPIC_REF_PREFIX: &str = "memory:fanout:";
/// Upper bound on how far in the future a released message becomes visible
const MAX_RELEASE_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Knobs an adapter would normally take from configuration
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Maximum messages returned by one receive call
    pub batch_size: usize,
    /// Publish-side delivery delay
    pub message_delay: Duration,
    pub key_alias: String,
    /// Lookups a freshly created queue stays invisible for
    pub queue_visibility_lag: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from(&PorterConfig::default())
    }
}

impl From<&PorterConfig> for BrokerSettings {
    fn from(config: &PorterConfig) -> Self {
        Self {
            batch_size: config.queue_max_receive_count.max(1) as usize,
            message_delay: config.message_delay(),
            key_alias: config.pub_key.clone(),
            queue_visibility_lag: 0,
        }
    }
}

/// One `release` call observed by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub queue_name: String,
    pub message_id: Uuid,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    envelope: MessageEnvelope,
    topic_ref: String,
    visible_at: Instant,
    receive_count: u32,
    receipt: Option<ReceiptHandle>,
}

#[derive(Debug)]
struct QueueEntry {
    info: QueueInfo,
    tags: BTreeMap<String, String>,
    delivery_delay: Duration,
    /// Dead-letter queue name and redrive threshold
    redrive: Option<(String, u32)>,
    hidden_lookups: u32,
    messages: VecDeque<StoredMessage>,
}

#[derive(Debug)]
struct FanoutEntry {
    info: FanoutInfo,
    tags: BTreeMap<String, String>,
    subscribers: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    fanouts: HashMap<String, FanoutEntry>,
    queues: HashMap<String, QueueEntry>,
    fanout_creations: HashMap<String, usize>,
    queue_creations: HashMap<String, usize>,
    visibility_updates: Vec<(String, Duration)>,
    releases: Vec<ReleaseRecord>,
    encryption_key: Option<KeyId>,
    publish_failures: VecDeque<MessagingError>,
    receive_failures: VecDeque<MessagingError>,
}

#[derive(Debug, Default)]
struct BrokerCore {
    state: Mutex<BrokerState>,
    next_receipt: AtomicU64,
}

fn queue_name_from_ref(queue_ref: &str) -> &str {
    queue_ref.strip_prefix(QUEUE_REF_PREFIX).unwrap_or(queue_ref)
}

#[async_trait]
impl MessageAcknowledger for BrokerCore {
    async fn delete(&self, queue_ref: &str, receipt: &ReceiptHandle) -> Result<(), MessagingError> {
        let queue_name = queue_name_from_ref(queue_ref);
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| MessagingError::message_not_in_flight(receipt.to_string()))?;

        if let Some(message) = queue.messages.remove(position) {
            debug!(queue = %queue_name, message_id = %message.id, "In-memory message deleted");
        }
        Ok(())
    }

    async fn release(
        &self,
        queue_ref: &str,
        receipt: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let queue_name = queue_name_from_ref(queue_ref);
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let message = queue
            .messages
            .iter_mut()
            .find(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| MessagingError::message_not_in_flight(receipt.to_string()))?;

        message.receipt = None;
        let now = Instant::now();
        message.visible_at = now
            .checked_add(delay.min(MAX_RELEASE_DELAY))
            .unwrap_or(now);
        let record = ReleaseRecord {
            queue_name: queue_name.to_string(),
            message_id: message.id,
            delay,
        };
        state.releases.push(record);
        Ok(())
    }
}

/// In-memory implementation of every backend port
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    core: Arc<BrokerCore>,
    settings: BrokerSettings,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with default settings and an existing encryption key
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn from_config(config: &PorterConfig) -> Self {
        Self::with_settings(BrokerSettings::from(config))
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        let broker = Self {
            core: Arc::new(BrokerCore::default()),
            settings,
        };
        broker.core.state.lock().encryption_key = Some(format!("memory-key/{}", broker.settings.key_alias));
        broker
    }

    /// Forget the encryption key, as a fresh local emulator would
    pub fn without_encryption_key(self) -> Self {
        self.core.state.lock().encryption_key = None;
        self
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Make the next publish fail with `error`
    pub fn fail_next_publish(&self, error: MessagingError) {
        self.core.state.lock().publish_failures.push_back(error);
    }

    /// Make the next receive call (main or dead-letter) fail with `error`
    pub fn fail_next_receive(&self, error: MessagingError) {
        self.core.state.lock().receive_failures.push_back(error);
    }

    pub fn queue_exists(&self, queue_name: &str) -> bool {
        self.core.state.lock().queues.contains_key(queue_name)
    }

    pub fn fanout_exists(&self, topic_name: &str) -> bool {
        self.core.state.lock().fanouts.contains_key(topic_name)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.core.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages stored in a queue, visible or not
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.core
            .state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, |q| q.messages.len())
    }

    /// Messages currently receivable from a queue
    pub fn visible_count(&self, queue_name: &str) -> usize {
        let now = Instant::now();
        self.core
            .state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, |q| q.messages.iter().filter(|m| m.visible_at <= now).count())
    }

    pub fn queue_creation_count(&self, queue_name: &str) -> usize {
        self.core
            .state
            .lock()
            .queue_creations
            .get(queue_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn fanout_creation_count(&self, topic_name: &str) -> usize {
        self.core
            .state
            .lock()
            .fanout_creations
            .get(topic_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn subscribers(&self, topic_name: &str) -> Vec<String> {
        self.core
            .state
            .lock()
            .fanouts
            .get(topic_name)
            .map(|f| f.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue_tags(&self, queue_name: &str) -> BTreeMap<String, String> {
        self.core
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|q| q.tags.clone())
            .unwrap_or_default()
    }

    pub fn fanout_tags(&self, topic_name: &str) -> BTreeMap<String, String> {
        self.core
            .state
            .lock()
            .fanouts
            .get(topic_name)
            .map(|f| f.tags.clone())
            .unwrap_or_default()
    }

    pub fn queue_visibility_timeout(&self, queue_name: &str) -> Option<Duration> {
        self.core
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|q| q.info.visibility_timeout)
    }

    pub fn visibility_updates(&self) -> Vec<(String, Duration)> {
        self.core.state.lock().visibility_updates.clone()
    }

    pub fn releases(&self) -> Vec<ReleaseRecord> {
        self.core.state.lock().releases.clone()
    }

    pub fn encryption_key(&self) -> Option<KeyId> {
        self.core.state.lock().encryption_key.clone()
    }

    fn receive_from(&self, queue_name: &str) -> Result<Vec<Message>, MessagingError> {
        let now = Instant::now();
        let acknowledger: Arc<dyn MessageAcknowledger> = self.core.clone();
        let mut state = self.core.state.lock();

        if let Some(error) = state.receive_failures.pop_front() {
            return Err(error);
        }

        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let visibility = queue.info.visibility_timeout;
        let redrive = queue.redrive.clone();

        let mut received = Vec::new();
        let mut dead_lettered = Vec::new();
        let mut index = 0;

        while index < queue.messages.len() && received.len() < self.settings.batch_size {
            if queue.messages[index].visible_at > now {
                index += 1;
                continue;
            }

            if let Some((_, max_receive_count)) = &redrive {
                if queue.messages[index].receive_count >= *max_receive_count {
                    if let Some(message) = queue.messages.remove(index) {
                        dead_lettered.push(message);
                    }
                    continue;
                }
            }

            let receipt = ReceiptHandle(format!(
                "{}-{}",
                queue_name,
                self.core.next_receipt.fetch_add(1, Ordering::Relaxed)
            ));
            let stored = &mut queue.messages[index];
            stored.receive_count += 1;
            stored.visible_at = now + visibility;
            stored.receipt = Some(receipt.clone());

            received.push(Message::new(
                stored.id,
                stored.envelope.correlation_id,
                stored.envelope.datetime,
                stored.envelope.payload_text(),
                stored.receive_count - 1,
                format!("{QUEUE_REF_PREFIX}{queue_name}"),
                stored.topic_ref.clone(),
                receipt,
                acknowledger.clone(),
            ));
            index += 1;
        }

        if let Some((dead_letter_queue, _)) = redrive {
            if let Some(dlq) = state.queues.get_mut(&dead_letter_queue) {
                for mut message in dead_lettered {
                    debug!(
                        queue = %queue_name,
                        dead_letter_queue = %dead_letter_queue,
                        message_id = %message.id,
                        "In-memory message moved to dead-letter queue"
                    );
                    message.receive_count = 0;
                    message.receipt = None;
                    message.visible_at = now;
                    dlq.messages.push_back(message);
                }
            }
        }

        Ok(received)
    }
}

#[async_trait]
impl ProduceDriver for InMemoryBroker {
    async fn produce(
        &self,
        topic: &TopicId,
        envelope: &MessageEnvelope,
    ) -> Result<PublishResult, MessagingError> {
        let mut state = self.core.state.lock();

        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error);
        }

        let fanout = state
            .fanouts
            .get(topic.topic_name())
            .ok_or_else(|| MessagingError::topic_not_found(topic.topic_name()))?;
        let topic_ref = fanout.info.topic_ref.clone();
        let subscribers: Vec<String> = fanout.subscribers.iter().cloned().collect();

        let message_id = envelope.message_id.unwrap_or_else(Uuid::new_v4);
        let now = Instant::now();

        for queue_name in subscribers {
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                let delay = queue.delivery_delay.max(self.settings.message_delay);
                queue.messages.push_back(StoredMessage {
                    id: message_id,
                    envelope: envelope.clone(),
                    topic_ref: topic_ref.clone(),
                    visible_at: now + delay,
                    receive_count: 0,
                    receipt: None,
                });
            }
        }

        Ok(PublishResult::success(message_id, envelope.correlation_id))
    }
}

#[async_trait]
impl ConsumeDriver for InMemoryBroker {
    async fn receive_messages(&self, topic: &TopicId) -> Result<Vec<Message>, MessagingError> {
        self.receive_from(topic.queue_name())
    }

    async fn receive_dead_letters(&self, topic: &TopicId) -> Result<Vec<Message>, MessagingError> {
        self.receive_from(&topic.dead_letter_queue_name())
    }
}

#[async_trait]
impl KeyProvider for InMemoryBroker {
    async fn get_encryption_key(&self) -> Result<Option<KeyId>, MessagingError> {
        Ok(self.core.state.lock().encryption_key.clone())
    }

    async fn create_key(&self) -> Result<KeyId, MessagingError> {
        let key = format!("memory-key/{}", self.settings.key_alias);
        self.core.state.lock().encryption_key = Some(key.clone());
        Ok(key)
    }
}

#[async_trait]
impl BrokerAdmin for InMemoryBroker {
    async fn find_fanout(&self, topic: &TopicId) -> Result<Option<FanoutInfo>, MessagingError> {
        Ok(self
            .core
            .state
            .lock()
            .fanouts
            .get(topic.topic_name())
            .map(|f| f.info.clone()))
    }

    async fn create_fanout(&self, spec: &FanoutSpec) -> Result<FanoutInfo, MessagingError> {
        let mut state = self.core.state.lock();
        *state
            .fanout_creations
            .entry(spec.topic_name.clone())
            .or_default() += 1;

        let entry = state
            .fanouts
            .entry(spec.topic_name.clone())
            .or_insert_with(|| FanoutEntry {
                info: FanoutInfo {
                    topic_name: spec.topic_name.clone(),
                    topic_ref: format!("{TOPIC_REF_PREFIX}{}", spec.topic_name),
                },
                tags: spec.tags.clone(),
                subscribers: BTreeSet::new(),
            });
        Ok(entry.info.clone())
    }

    async fn find_queue(&self, queue_name: &str) -> Result<Option<QueueInfo>, MessagingError> {
        let mut state = self.core.state.lock();
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return Ok(None);
        };
        if queue.hidden_lookups > 0 {
            queue.hidden_lookups -= 1;
            return Ok(None);
        }
        Ok(Some(queue.info.clone()))
    }

    async fn create_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, MessagingError> {
        let mut state = self.core.state.lock();
        *state
            .queue_creations
            .entry(spec.queue_name.clone())
            .or_default() += 1;

        let redrive = spec.redrive.as_ref().map(|policy| {
            (
                queue_name_from_ref(&policy.dead_letter_queue_ref).to_string(),
                policy.max_receive_count,
            )
        });

        let entry = state
            .queues
            .entry(spec.queue_name.clone())
            .or_insert_with(|| QueueEntry {
                info: QueueInfo {
                    queue_name: spec.queue_name.clone(),
                    queue_ref: format!("{QUEUE_REF_PREFIX}{}", spec.queue_name),
                    visibility_timeout: spec.visibility_timeout,
                },
                tags: spec.tags.clone(),
                delivery_delay: spec.delivery_delay,
                redrive,
                hidden_lookups: self.settings.queue_visibility_lag,
                messages: VecDeque::new(),
            });
        Ok(entry.info.clone())
    }

    async fn subscribe_queue(
        &self,
        fanout: &FanoutInfo,
        queue: &QueueInfo,
    ) -> Result<(), MessagingError> {
        let mut state = self.core.state.lock();
        let entry = state
            .fanouts
            .get_mut(&fanout.topic_name)
            .ok_or_else(|| MessagingError::topic_not_found(&fanout.topic_name))?;
        entry.subscribers.insert(queue.queue_name.clone());
        Ok(())
    }

    async fn set_queue_visibility(
        &self,
        queue: &QueueInfo,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError> {
        let mut state = self.core.state.lock();
        let entry = state
            .queues
            .get_mut(&queue.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&queue.queue_name))?;
        entry.info.visibility_timeout = visibility_timeout;
        state
            .visibility_updates
            .push((queue.queue_name.clone(), visibility_timeout));
        Ok(())
    }
}
