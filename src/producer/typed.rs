//! Publisher bound to one topic and message type.

use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

use super::PorterClient;
use crate::config::ConfigurationError;
use crate::error::PorterError;
use crate::messaging::PublishResult;
use crate::naming::{TopicId, TopicNameOverride};

pub struct TypedProducer<T> {
    client: PorterClient,
    topic: String,
    name_override: Option<TopicNameOverride>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Clone for TypedProducer<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            topic: self.topic.clone(),
            name_override: self.name_override.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedProducer")
            .field("topic", &self.topic)
            .field("message_type", &std::any::type_name::<T>())
            .field("name_override", &self.name_override)
            .finish()
    }
}

impl<T: Serialize> TypedProducer<T> {
    pub(crate) fn new(
        client: PorterClient,
        topic: impl Into<String>,
        name_override: Option<TopicNameOverride>,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            name_override,
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_id(&self) -> Result<TopicId, ConfigurationError> {
        self.client.topic_id(&self.topic, self.name_override.as_ref())
    }

    /// Same producer publishing through another client, e.g. a dispatch context's
    pub fn bind(&self, client: &PorterClient) -> Self {
        Self::new(client.clone(), self.topic.clone(), self.name_override.clone())
    }

    pub async fn try_publish(
        &self,
        message: &T,
        correlation_id: Option<Uuid>,
    ) -> Result<PublishResult, PorterError> {
        self.client
            .try_publish(
                &self.topic,
                message,
                correlation_id,
                self.name_override.as_ref(),
            )
            .await
    }

    pub async fn publish(
        &self,
        message: &T,
        correlation_id: Option<Uuid>,
    ) -> Result<PublishResult, PorterError> {
        self.client
            .publish(
                &self.topic,
                message,
                correlation_id,
                self.name_override.as_ref(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PorterConfig;
    use crate::correlation::CorrelationContext;
    use crate::messaging::{in_memory::InMemoryBroker, Backend};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_typed_producer_publishes_to_override_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = PorterClient::new(
            Arc::new(PorterConfig {
                suffix: "v2".to_string(),
                ..PorterConfig::with_source("billing")
            }),
            Backend::from_shared(broker.clone()),
        );
        let producer = client
            .producer::<serde_json::Value>("invoice_issued", Some(TopicNameOverride::default().without_suffix()))
            .unwrap();
        assert_eq!(producer.topic_id().unwrap().topic_name(), "InvoiceIssued");

        let correlation = Uuid::new_v4();
        let bound = producer.bind(&client.with_correlation(CorrelationContext::new(correlation)));
        let result = bound
            .publish(&serde_json::json!({"total": 10}), None)
            .await
            .unwrap();

        assert_eq!(result.correlation_id, Some(correlation));
        assert!(broker.fanout_exists("InvoiceIssued"));
        assert!(!broker.fanout_exists("InvoiceIssuedV2"));
    }

    #[test]
    fn test_invalid_topic_rejected_at_construction() {
        let client = PorterClient::new(
            Arc::new(PorterConfig::with_source("billing")),
            Backend::from_shared(Arc::new(InMemoryBroker::new())),
        );
        assert!(client.producer::<String>("0invoice", None).is_err());
    }
}
