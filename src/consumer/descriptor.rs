//! Validated consumer and producer registrations.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::{Consumer, DispatchContext, DispatchError, ErrorListener, Outcome};
use crate::naming::{TopicId, TopicNameOverride};

/// Type-erased consumer bound to its wire type at registration
#[async_trait]
pub trait ErasedConsumer: Send + Sync + 'static {
    /// Decode `body` and invoke the consumer
    async fn dispatch(&self, body: &str, ctx: &DispatchContext) -> Result<Outcome, DispatchError>;

    fn message_type(&self) -> &'static str;
}

/// Deserializes `T` from the wire and hands `M` to the consumer
pub(crate) struct TypedConsumer<T, M, C> {
    consumer: C,
    _marker: PhantomData<fn(T) -> M>,
}

impl<T, M, C> TypedConsumer<T, M, C> {
    pub(crate) fn new(consumer: C) -> Self {
        Self {
            consumer,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, M, C> ErasedConsumer for TypedConsumer<T, M, C>
where
    T: DeserializeOwned + Into<M> + Send + 'static,
    M: Send + 'static,
    C: Consumer<M>,
{
    async fn dispatch(&self, body: &str, ctx: &DispatchContext) -> Result<Outcome, DispatchError> {
        let payload: T = decode_body(body)?;
        Ok(self.consumer.consume(payload.into(), ctx).await)
    }

    fn message_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Decode a message body into `T`
///
/// `String` receives the body unchanged. For every other type a JSON `null`
/// or a body that does not match the type is an error.
pub fn decode_body<T>(body: &str) -> Result<T, DispatchError>
where
    T: DeserializeOwned + 'static,
{
    let type_name = std::any::type_name::<T>();

    if TypeId::of::<T>() == TypeId::of::<String>() {
        let raw: Box<dyn Any> = Box::new(body.to_string());
        return raw
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| DispatchError::deserialization(type_name, "raw body downcast failed"));
    }

    if body.trim() == "null" {
        return Err(DispatchError::deserialization(type_name, "message body is null"));
    }

    serde_json::from_str(body).map_err(|e| DispatchError::deserialization(type_name, e.to_string()))
}

/// A registered consumer for one topic
#[derive(Clone)]
pub struct ConsumerDescriptor {
    /// Raw topic name as registered
    pub topic: String,
    pub topic_id: TopicId,
    pub name_override: Option<TopicNameOverride>,
    pub max_concurrency: usize,
    pub polling_interval: Duration,
    /// Receive timeout and queue visibility timeout
    pub consume_timeout: Duration,
    pub error_listener: Option<Arc<dyn ErrorListener>>,
    pub(crate) consumer: Arc<dyn ErasedConsumer>,
}

impl ConsumerDescriptor {
    pub fn message_type(&self) -> &'static str {
        self.consumer.message_type()
    }

    pub(crate) fn consumer(&self) -> &Arc<dyn ErasedConsumer> {
        &self.consumer
    }
}

impl fmt::Debug for ConsumerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerDescriptor")
            .field("topic", &self.topic)
            .field("queue", &self.topic_id.queue_name())
            .field("message_type", &self.message_type())
            .field("max_concurrency", &self.max_concurrency)
            .field("polling_interval", &self.polling_interval)
            .field("consume_timeout", &self.consume_timeout)
            .field("has_error_listener", &self.error_listener.is_some())
            .finish()
    }
}

/// A topic this process publishes to, provisioned at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerDescriptor {
    pub topic: String,
    pub topic_id: TopicId,
    pub message_type: &'static str,
    pub name_override: Option<TopicNameOverride>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: String,
        name: String,
    }

    #[test]
    fn test_decode_string_is_raw() {
        let body = r#"{"id":"1","name":"x"}"#;
        assert_eq!(decode_body::<String>(body).unwrap(), body);
    }

    #[test]
    fn test_decode_typed() {
        let order: Order = decode_body(r#"{"id":"1","name":"x"}"#).unwrap();
        assert_eq!(
            order,
            Order {
                id: "1".to_string(),
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_decode_null_and_mismatch_fail() {
        assert!(matches!(
            decode_body::<serde_json::Value>("null"),
            Err(DispatchError::Deserialization { .. })
        ));
        assert!(matches!(
            decode_body::<Order>(r#"{"id":"1"}"#),
            Err(DispatchError::Deserialization { .. })
        ));
    }
}
