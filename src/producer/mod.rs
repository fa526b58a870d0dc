//! # Producer
//!
//! [`PorterClient`] is the publish and direct-receive surface. Every publish
//! resolves the topic identity, makes sure the fan-out exists, resolves the
//! effective correlation id and hands an envelope to the produce driver.
//!
//! ## Correlation
//!
//! A client carries a [`CorrelationContext`]. The client given to a
//! consumer through its dispatch context is bound to the inbound message's
//! correlation id, so publishes made while handling a message inherit it
//! unless an explicit id is passed.
//!
//! ## Failure reporting
//!
//! `try_publish*` never fails because the backend rejected a publish; the
//! rejection is reported as a [`PublishResult`] with `is_success == false`.
//! `publish*` turns that into [`PorterError::PublishFailed`]. Naming and
//! provisioning errors fail both variants.

pub mod typed;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, UtcClock};
use crate::config::{ConfigurationError, PorterConfig};
use crate::correlation::CorrelationContext;
use crate::diagnostics::{Diagnostics, PorterMetrics};
use crate::error::PorterError;
use crate::messaging::{
    Backend, Message, MessageEnvelope, MessagingError, PublishResult, TypedMessage,
};
use crate::naming::{TopicId, TopicNameOverride};
use crate::resources::{ResourceManager, ResourceProvisioner};

pub use typed::TypedProducer;

#[derive(Clone)]
struct ClientShared {
    config: Arc<PorterConfig>,
    backend: Backend,
    resources: Arc<dyn ResourceManager>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<dyn Diagnostics>,
}

/// Publish and receive client, cheap to clone
#[derive(Clone)]
pub struct PorterClient {
    shared: Arc<ClientShared>,
    correlation: CorrelationContext,
}

impl std::fmt::Debug for PorterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PorterClient")
            .field("source", &self.shared.config.source)
            .field("correlation", &self.correlation)
            .field("backend", &self.shared.backend)
            .finish()
    }
}

impl PorterClient {
    /// Client with a [`ResourceProvisioner`], the UTC clock and fresh [`PorterMetrics`]
    pub fn new(config: Arc<PorterConfig>, backend: Backend) -> Self {
        let resources: Arc<dyn ResourceManager> = Arc::new(ResourceProvisioner::new(
            config.clone(),
            backend.admin.clone(),
            backend.keys.clone(),
        ));
        Self {
            shared: Arc::new(ClientShared {
                config,
                backend,
                resources,
                clock: Arc::new(UtcClock),
                diagnostics: Arc::new(PorterMetrics::new()),
            }),
            correlation: CorrelationContext::none(),
        }
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceManager>) -> Self {
        Arc::make_mut(&mut self.shared).resources = resources;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        Arc::make_mut(&mut self.shared).clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Arc::make_mut(&mut self.shared).diagnostics = diagnostics;
        self
    }

    /// A client sharing this one's backend whose publishes default to `correlation`
    pub fn with_correlation(&self, correlation: CorrelationContext) -> Self {
        Self {
            shared: self.shared.clone(),
            correlation,
        }
    }

    pub fn correlation(&self) -> CorrelationContext {
        self.correlation
    }

    pub fn config(&self) -> &PorterConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &Backend {
        &self.shared.backend
    }

    pub fn resources(&self) -> &Arc<dyn ResourceManager> {
        &self.shared.resources
    }

    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.shared.diagnostics
    }

    /// Resolve a raw topic name with the client's naming configuration
    pub fn topic_id(
        &self,
        topic: &str,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<TopicId, ConfigurationError> {
        let naming = self.shared.config.naming();
        let topic_id = TopicId::resolve(topic, &naming, name_override)?;

        if name_override.is_some_and(TopicNameOverride::has_values) {
            let default_name = TopicId::new(topic, &naming)?;
            if default_name.topic_name() != topic_id.topic_name() {
                info!(
                    from = %default_name.topic_name(),
                    to = %topic_id.topic_name(),
                    "Overriding topic name"
                );
            }
        }
        Ok(topic_id)
    }

    /// Typed publisher bound to one topic
    pub fn producer<T: Serialize>(
        &self,
        topic: &str,
        name_override: Option<TopicNameOverride>,
    ) -> Result<TypedProducer<T>, ConfigurationError> {
        self.topic_id(topic, name_override.as_ref())?;
        Ok(TypedProducer::new(self.clone(), topic, name_override))
    }

    /// Publish a serializable message, reporting backend rejection in the result
    pub async fn try_publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        message: &T,
        correlation_id: Option<Uuid>,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<PublishResult, PorterError> {
        let payload = serde_json::to_value(message).map_err(MessagingError::from)?;
        self.publish_payload(topic, payload, correlation_id, name_override)
            .await
    }

    /// Publish a message body that is already JSON text
    pub async fn try_publish_raw(
        &self,
        topic: &str,
        body: &str,
        correlation_id: Option<Uuid>,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<PublishResult, PorterError> {
        let payload: Value = serde_json::from_str(body).map_err(|e| {
            MessagingError::message_serialization(format!("message body is not JSON: {e}"))
        })?;
        self.publish_payload(topic, payload, correlation_id, name_override)
            .await
    }

    /// Publish, failing with [`PorterError::PublishFailed`] when the backend rejects it
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        message: &T,
        correlation_id: Option<Uuid>,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<PublishResult, PorterError> {
        let result = self
            .try_publish(topic, message, correlation_id, name_override)
            .await?;
        ensure_published(result)
    }

    pub async fn publish_raw(
        &self,
        topic: &str,
        body: &str,
        correlation_id: Option<Uuid>,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<PublishResult, PorterError> {
        let result = self
            .try_publish_raw(topic, body, correlation_id, name_override)
            .await?;
        ensure_published(result)
    }

    async fn publish_payload(
        &self,
        topic: &str,
        payload: Value,
        correlation_id: Option<Uuid>,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<PublishResult, PorterError> {
        let topic_id = self.topic_id(topic, name_override)?;
        self.shared.resources.ensure_topic_exists(&topic_id).await?;

        let correlation_id = self.correlation.resolve(correlation_id);
        let message_id = Uuid::new_v4();
        let envelope = MessageEnvelope::new(
            topic_id.event(),
            self.shared.clock.now(),
            payload,
            message_id,
            correlation_id,
        );

        match self
            .shared
            .backend
            .producer
            .produce(&topic_id, &envelope)
            .await
        {
            Ok(result) if result.is_success => {
                self.shared.diagnostics.record_produced(&topic_id);
                debug!(
                    topic = %topic_id.topic_name(),
                    message_id = %result.message_id,
                    correlation_id = %CorrelationContext::from_option(result.correlation_id),
                    "Message published"
                );
                Ok(result)
            }
            Ok(result) => {
                warn!(
                    topic = %topic_id.topic_name(),
                    message_id = %result.message_id,
                    "Backend did not accept message"
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    topic = %topic_id.topic_name(),
                    message_id = %message_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Unable to publish message"
                );
                Ok(PublishResult::failure(message_id, correlation_id))
            }
        }
    }

    /// Receive one batch from the topic's consumer queue, creating it if needed
    pub async fn receive(
        &self,
        topic: &str,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<Vec<Message>, PorterError> {
        let topic_id = self.topic_id(topic, name_override)?;
        self.shared.resources.ensure_queue_exists(&topic_id).await?;
        let messages = self
            .shared
            .backend
            .consumer
            .receive_messages(&topic_id)
            .await?;
        self.shared
            .diagnostics
            .record_retrieved(&topic_id, messages.len());
        Ok(messages)
    }

    pub async fn receive_as<T: DeserializeOwned>(
        &self,
        topic: &str,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<Vec<TypedMessage<T>>, PorterError> {
        typed_batch(self.receive(topic, name_override).await?)
    }

    /// Receive one batch from the topic's dead-letter queue
    pub async fn dead_letters(
        &self,
        topic: &str,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<Vec<Message>, PorterError> {
        let topic_id = self.topic_id(topic, name_override)?;
        self.shared.resources.ensure_queue_exists(&topic_id).await?;
        Ok(self
            .shared
            .backend
            .consumer
            .receive_dead_letters(&topic_id)
            .await?)
    }

    pub async fn dead_letters_as<T: DeserializeOwned>(
        &self,
        topic: &str,
        name_override: Option<&TopicNameOverride>,
    ) -> Result<Vec<TypedMessage<T>>, PorterError> {
        typed_batch(self.dead_letters(topic, name_override).await?)
    }
}

fn ensure_published(result: PublishResult) -> Result<PublishResult, PorterError> {
    if result.is_success {
        Ok(result)
    } else {
        Err(PorterError::PublishFailed {
            message_id: result.message_id,
            correlation_id: result.correlation_id,
        })
    }
}

fn typed_batch<T: DeserializeOwned>(
    messages: Vec<Message>,
) -> Result<Vec<TypedMessage<T>>, PorterError> {
    messages
        .into_iter()
        .map(|m| TypedMessage::try_from(m).map_err(PorterError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::messaging::in_memory::InMemoryBroker;
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        id: String,
        name: String,
    }

    fn client(broker: &Arc<InMemoryBroker>) -> PorterClient {
        PorterClient::new(
            Arc::new(PorterConfig::with_source("orders")),
            Backend::from_shared(broker.clone()),
        )
    }

    fn order() -> OrderPlaced {
        OrderPlaced {
            id: "42".to_string(),
            name: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_creates_topic_and_reaches_queue() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(&broker);
        assert!(client.receive("order_placed", None).await.unwrap().is_empty());

        let result = client.publish("order_placed", &order(), None, None).await.unwrap();
        assert!(result.is_success);
        assert_eq!(result.correlation_id, None);

        let received = client
            .receive_as::<OrderPlaced>("order_placed", None)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, order());
        assert_eq!(received[0].message.id, result.message_id);
        received[0].delete().await.unwrap();
        assert_eq!(broker.queue_depth("orders_order_placed"), 0);
    }

    #[tokio::test]
    async fn test_correlation_resolution() {
        let broker = Arc::new(InMemoryBroker::new());
        let ambient = Uuid::new_v4();
        let explicit = Uuid::new_v4();
        let client = client(&broker).with_correlation(CorrelationContext::new(ambient));

        let inherited = client.try_publish("order_placed", &order(), None, None).await.unwrap();
        assert_eq!(inherited.correlation_id, Some(ambient));

        let overridden = client
            .try_publish("order_placed", &order(), Some(explicit), None)
            .await
            .unwrap();
        assert_eq!(overridden.correlation_id, Some(explicit));
    }

    #[tokio::test]
    async fn test_backend_rejection_is_reported_in_result() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(&broker);

        broker.fail_next_publish(MessagingError::transient("publish", "throttled"));
        let result = client.try_publish("order_placed", &order(), None, None).await.unwrap();
        assert!(!result.is_success);

        broker.fail_next_publish(MessagingError::transient("publish", "throttled"));
        let err = client
            .publish("order_placed", &order(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::PublishFailed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_raw_body_and_topic_are_errors() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(&broker);

        assert!(client
            .try_publish_raw("order_placed", "{not json", None, None)
            .await
            .is_err());
        assert!(matches!(
            client.try_publish("bad", &order(), None, None).await,
            Err(PorterError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_envelope_uses_clock_and_override() {
        let broker = Arc::new(InMemoryBroker::new());
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let client = client(&broker).with_clock(Arc::new(FixedClock(at)));
        let name_override = TopicNameOverride::default().with_prefix("staging");

        client
            .receive("order_placed", Some(&name_override))
            .await
            .unwrap();
        client
            .publish_raw("order_placed", r#"{"id":"1"}"#, None, Some(&name_override))
            .await
            .unwrap();

        assert!(broker.fanout_exists("StagingOrderPlaced"));
        let received = client
            .receive("order_placed", Some(&name_override))
            .await
            .unwrap();
        assert_eq!(received[0].datetime, at);
        assert_eq!(received[0].body, r#"{"id":"1"}"#);
    }
}
