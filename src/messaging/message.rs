//! # Received Messages
//!
//! A [`Message`] is one delivery of an envelope from a durable queue. It
//! carries the receipt needed to delete or release it through the backend it
//! came from, so consumers never need a handle on the driver itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::MessagingError;

/// Opaque backend token identifying one in-flight delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delete/release operations bound to a received message
#[async_trait]
pub trait MessageAcknowledger: Send + Sync + 'static {
    /// Permanently remove the delivery from its queue
    async fn delete(&self, queue_ref: &str, receipt: &ReceiptHandle) -> Result<(), MessagingError>;

    /// Make the delivery visible again after `delay`
    ///
    /// Fails with [`MessagingError::MessageNotInFlight`] when the receipt is
    /// no longer valid.
    async fn release(
        &self,
        queue_ref: &str,
        receipt: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError>;
}

/// One delivery of a message from a queue
#[derive(Clone)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub datetime: DateTime<Utc>,
    /// Payload JSON text
    pub body: String,
    /// Number of earlier deliveries of this message
    pub retry_count: u32,
    pub queue_ref: String,
    pub topic_ref: String,
    receipt: ReceiptHandle,
    acknowledger: Arc<dyn MessageAcknowledger>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        correlation_id: Option<Uuid>,
        datetime: DateTime<Utc>,
        body: String,
        retry_count: u32,
        queue_ref: impl Into<String>,
        topic_ref: impl Into<String>,
        receipt: ReceiptHandle,
        acknowledger: Arc<dyn MessageAcknowledger>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            datetime,
            body,
            retry_count,
            queue_ref: queue_ref.into(),
            topic_ref: topic_ref.into(),
            receipt,
            acknowledger,
        }
    }

    pub fn receipt(&self) -> &ReceiptHandle {
        &self.receipt
    }

    pub async fn delete(&self) -> Result<(), MessagingError> {
        self.acknowledger.delete(&self.queue_ref, &self.receipt).await
    }

    /// Return the message to its queue, visible again after `delay`.
    /// A message that is no longer in flight is left alone.
    pub async fn release(&self, delay: Duration) -> Result<(), MessagingError> {
        match self
            .acknowledger
            .release(&self.queue_ref, &self.receipt, delay)
            .await
        {
            Err(MessagingError::MessageNotInFlight { .. }) => Ok(()),
            other => other,
        }
    }

    /// Deserialize the body into a typed payload
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_str(&self.body)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }

    /// `topic.queue` using the last segment of each reference
    pub fn location(&self) -> String {
        let topic = self.topic_ref.rsplit(':').next().unwrap_or(&self.topic_ref);
        let queue = self.queue_ref.rsplit('/').next().unwrap_or(&self.queue_ref);
        format!("{topic}.{queue}")
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("correlation_id", &self.correlation_id)
            .field("datetime", &self.datetime)
            .field("retry_count", &self.retry_count)
            .field("queue_ref", &self.queue_ref)
            .field("topic_ref", &self.topic_ref)
            .field("body", &self.body)
            .finish()
    }
}

/// A received message with its body already deserialized
#[derive(Debug, Clone)]
pub struct TypedMessage<T> {
    pub payload: T,
    pub message: Message,
}

impl<T> TypedMessage<T> {
    pub async fn delete(&self) -> Result<(), MessagingError> {
        self.message.delete().await
    }

    pub async fn release(&self, delay: Duration) -> Result<(), MessagingError> {
        self.message.release(delay).await
    }
}

impl<T: DeserializeOwned> TryFrom<Message> for TypedMessage<T> {
    type Error = MessagingError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        Ok(Self {
            payload: message.body_as()?,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingAcknowledger {
        deleted: Mutex<Vec<String>>,
        in_flight: bool,
    }

    #[async_trait]
    impl MessageAcknowledger for RecordingAcknowledger {
        async fn delete(&self, _queue_ref: &str, receipt: &ReceiptHandle) -> Result<(), MessagingError> {
            self.deleted.lock().push(receipt.0.clone());
            Ok(())
        }

        async fn release(
            &self,
            _queue_ref: &str,
            receipt: &ReceiptHandle,
            _delay: Duration,
        ) -> Result<(), MessagingError> {
            if self.in_flight {
                Ok(())
            } else {
                Err(MessagingError::message_not_in_flight(receipt.0.clone()))
            }
        }
    }

    fn message(ack: Arc<RecordingAcknowledger>) -> Message {
        Message::new(
            Uuid::new_v4(),
            None,
            Utc::now(),
            r#"{"name":"x"}"#.to_string(),
            0,
            "http://localhost/000000000000/orders_my_topic",
            "arn:aws:sns:us-east-1:000000000000:MyTopic",
            ReceiptHandle("r-1".to_string()),
            ack,
        )
    }

    #[tokio::test]
    async fn test_release_ignores_message_not_in_flight() {
        let ack = Arc::new(RecordingAcknowledger::default());
        assert!(message(ack).release(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_goes_through_acknowledger() {
        let ack = Arc::new(RecordingAcknowledger {
            in_flight: true,
            ..Default::default()
        });
        message(ack.clone()).delete().await.unwrap();
        assert_eq!(ack.deleted.lock().as_slice(), ["r-1".to_string()]);
    }

    #[test]
    fn test_location_and_typed_body() {
        let msg = message(Arc::new(RecordingAcknowledger::default()));
        assert_eq!(msg.location(), "MyTopic.orders_my_topic");

        let typed: TypedMessage<serde_json::Value> = msg.try_into().unwrap();
        assert_eq!(typed.payload["name"], "x");
    }
}
