//! # Backend Capability Ports
//!
//! Provider-agnostic traits the core talks to. A concrete adapter for a
//! managed event bus implements all of them; [`InMemoryBroker`] does the
//! same for tests.
//!
//! [`InMemoryBroker`]: super::in_memory::InMemoryBroker

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Message, MessageEnvelope, MessagingError, PublishResult};
use crate::naming::TopicId;

/// Identifier of an encryption key
pub type KeyId = String;

/// Publishes envelopes to a topic's fan-out
#[async_trait]
pub trait ProduceDriver: Send + Sync + 'static {
    async fn produce(
        &self,
        topic: &TopicId,
        envelope: &MessageEnvelope,
    ) -> Result<PublishResult, MessagingError>;
}

/// Batch receive from a consumer's queue and its dead-letter queue
#[async_trait]
pub trait ConsumeDriver: Send + Sync + 'static {
    /// Receive one batch, possibly empty
    async fn receive_messages(&self, topic: &TopicId) -> Result<Vec<Message>, MessagingError>;

    async fn receive_dead_letters(&self, topic: &TopicId) -> Result<Vec<Message>, MessagingError>;
}

/// Supplies the encryption key for new resources
#[async_trait]
pub trait KeyProvider: Send + Sync + 'static {
    async fn get_encryption_key(&self) -> Result<Option<KeyId>, MessagingError>;

    /// Create the configured key; only used against local emulated backends
    async fn create_key(&self) -> Result<KeyId, MessagingError>;
}

/// A fan-out topic as known by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutInfo {
    pub topic_name: String,
    pub topic_ref: String,
}

/// Parameters for creating a fan-out topic and its routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutSpec {
    pub topic_name: String,
    pub event: String,
    pub tags: BTreeMap<String, String>,
    pub encryption_key: Option<KeyId>,
}

/// A durable queue as known by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue_name: String,
    pub queue_ref: String,
    pub visibility_timeout: Duration,
}

/// Link from a queue to its dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_queue_ref: String,
    pub max_receive_count: u32,
}

/// Parameters for creating a durable queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub queue_name: String,
    pub tags: BTreeMap<String, String>,
    pub visibility_timeout: Duration,
    pub delivery_delay: Duration,
    pub retention: Duration,
    pub encryption_key: Option<KeyId>,
    pub redrive: Option<RedrivePolicy>,
}

/// Low-level resource administration calls
///
/// Creation calls are not required to be idempotent; the resource
/// provisioner checks existence before creating and serializes concurrent
/// attempts for the same resource.
#[async_trait]
pub trait BrokerAdmin: Send + Sync + 'static {
    async fn find_fanout(&self, topic: &TopicId) -> Result<Option<FanoutInfo>, MessagingError>;

    async fn create_fanout(&self, spec: &FanoutSpec) -> Result<FanoutInfo, MessagingError>;

    async fn find_queue(&self, queue_name: &str) -> Result<Option<QueueInfo>, MessagingError>;

    async fn create_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, MessagingError>;

    /// Subscribe a queue to a fan-out. An existing subscription is success.
    async fn subscribe_queue(
        &self,
        fanout: &FanoutInfo,
        queue: &QueueInfo,
    ) -> Result<(), MessagingError>;

    async fn set_queue_visibility(
        &self,
        queue: &QueueInfo,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError>;
}

/// Every port a running system needs, behind shared pointers
#[derive(Clone)]
pub struct Backend {
    pub producer: Arc<dyn ProduceDriver>,
    pub consumer: Arc<dyn ConsumeDriver>,
    pub admin: Arc<dyn BrokerAdmin>,
    pub keys: Arc<dyn KeyProvider>,
}

impl Backend {
    /// Use one adapter for every port
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: ProduceDriver + ConsumeDriver + BrokerAdmin + KeyProvider,
    {
        Self {
            producer: backend.clone(),
            consumer: backend.clone(),
            admin: backend.clone(),
            keys: backend,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
