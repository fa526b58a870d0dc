//! Registration of consumers and producers, validated once at build time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::Porter;
use crate::clock::{Clock, UtcClock};
use crate::config::{ConfigurationError, PorterConfig};
use crate::consumer::descriptor::{ErasedConsumer, TypedConsumer};
use crate::consumer::{
    handler_fn, Consumer, ConsumerDescriptor, DeliveryHandler, DispatchContext, ErrorListener,
    Outcome, ProducerDescriptor,
};
use crate::diagnostics::{Diagnostics, PorterMetrics};
use crate::error::PorterError;
use crate::messaging::Backend;
use crate::naming::{TopicId, TopicNameOverride};
use crate::producer::PorterClient;
use crate::resources::ResourceManager;
use crate::retry::{Power2RetryStrategy, RetryStrategy};

/// Pending consumer registration
struct TopicRegistration {
    topic: String,
    name_override: TopicNameOverride,
    max_concurrency: Option<usize>,
    polling_interval: Option<Duration>,
    consume_timeout: Option<Duration>,
    error_listener: Option<Arc<dyn ErrorListener>>,
    consumer: Option<Arc<dyn ErasedConsumer>>,
}

impl TopicRegistration {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            name_override: TopicNameOverride::default(),
            max_concurrency: None,
            polling_interval: None,
            consume_timeout: None,
            error_listener: None,
            consumer: None,
        }
    }

    fn into_descriptor(self, config: &PorterConfig) -> Result<ConsumerDescriptor, ConfigurationError> {
        let name_override = self.name_override.has_values().then_some(self.name_override);
        let topic_id = TopicId::resolve(&self.topic, &config.naming(), name_override.as_ref())?;

        let consumer = self.consumer.ok_or_else(|| {
            ConfigurationError::missing_required_field("consumer", format!("topic '{}'", self.topic))
        })?;

        let polling_interval = self
            .polling_interval
            .unwrap_or_else(|| config.polling_interval());
        if polling_interval < config.long_polling_wait() {
            return Err(ConfigurationError::PollingIntervalTooShort {
                topic: self.topic,
                polling_interval_seconds: polling_interval.as_secs_f64(),
                long_polling_wait_seconds: config.long_polling_wait_seconds,
            });
        }
        if polling_interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "polling_interval",
                "0",
                format!("topic '{}' must poll at a positive interval", self.topic),
            ));
        }

        let max_concurrency = self
            .max_concurrency
            .unwrap_or(config.queue_max_receive_count as usize);
        if max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_concurrency",
                "0",
                format!("topic '{}' needs at least one consumer worker", self.topic),
            ));
        }

        Ok(ConsumerDescriptor {
            topic: self.topic,
            topic_id,
            name_override,
            max_concurrency,
            polling_interval,
            consume_timeout: self
                .consume_timeout
                .unwrap_or_else(|| config.message_timeout()),
            error_listener: self.error_listener,
            consumer,
        })
    }
}

/// Options for one consumed topic whose wire type is `T`
pub struct TopicBuilder<T> {
    registration: TopicRegistration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for TopicBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBuilder")
            .field("topic", &self.registration.topic)
            .field("message_type", &std::any::type_name::<T>())
            .field("has_consumer", &self.registration.consumer.is_some())
            .finish()
    }
}

impl<T> TopicBuilder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn new(topic: &str) -> Self {
        Self {
            registration: TopicRegistration::new(topic),
            _marker: PhantomData,
        }
    }

    /// Register the consumer; it accepts any `M` the wire type converts into
    pub fn consumer<M, C>(mut self, consumer: C) -> Self
    where
        T: Into<M>,
        M: Send + 'static,
        C: Consumer<M>,
    {
        self.registration.consumer = Some(Arc::new(TypedConsumer::<T, M, C>::new(consumer)));
        self
    }

    /// Register an async closure as the consumer
    pub fn handler<F, Fut>(self, f: F) -> Self
    where
        F: Fn(T, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<Outcome>,
    {
        self.consumer::<T, _>(handler_fn(f))
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.registration.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.registration.polling_interval = Some(polling_interval);
        self
    }

    /// Receive timeout, also applied as the queue's visibility timeout
    pub fn consume_timeout(mut self, consume_timeout: Duration) -> Self {
        self.registration.consume_timeout = Some(consume_timeout);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.registration.name_override = self.registration.name_override.with_prefix(prefix);
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.registration.name_override = self.registration.name_override.with_suffix(suffix);
        self
    }

    pub fn without_prefix(mut self) -> Self {
        self.registration.name_override = self.registration.name_override.without_prefix();
        self
    }

    pub fn without_suffix(mut self) -> Self {
        self.registration.name_override = self.registration.name_override.without_suffix();
        self
    }

    pub fn raw_topic_name(mut self) -> Self {
        self.registration.name_override = TopicNameOverride::raw_topic_name();
        self
    }

    /// Listener invoked for this topic before the global listeners
    pub fn on_error(mut self, listener: impl ErrorListener) -> Self {
        self.registration.error_listener = Some(Arc::new(listener));
        self
    }
}

struct ProducerRegistration {
    topic: String,
    message_type: &'static str,
    name_override: Option<TopicNameOverride>,
}

/// Builder for a [`Porter`] host
///
/// ```rust,no_run
/// use porter_core::config::PorterConfig;
/// use porter_core::consumer::Outcome;
/// use porter_core::host::PorterBuilder;
/// use porter_core::messaging::{in_memory::InMemoryBroker, Backend};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), porter_core::PorterError> {
/// let backend = Backend::from_shared(Arc::new(InMemoryBroker::new()));
/// let porter = PorterBuilder::new(PorterConfig::with_source("billing"), backend)
///     .topic::<serde_json::Value>("invoice_issued", |t| {
///         t.max_concurrency(4)
///             .handler(|invoice, _ctx| async move {
///                 tracing::info!(%invoice, "invoice received");
///                 Outcome::Success
///             })
///     })
///     .producer::<serde_json::Value>("invoice_paid")
///     .build()?;
///
/// porter.run(tokio_util::sync::CancellationToken::new()).await
/// # }
/// ```
pub struct PorterBuilder {
    config: PorterConfig,
    backend: Backend,
    retry: Arc<dyn RetryStrategy>,
    clock: Arc<dyn Clock>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    resources: Option<Arc<dyn ResourceManager>>,
    listeners: Vec<Arc<dyn ErrorListener>>,
    topics: Vec<TopicRegistration>,
    producers: Vec<ProducerRegistration>,
}

impl fmt::Debug for PorterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PorterBuilder")
            .field("source", &self.config.source)
            .field("topics", &self.topics.len())
            .field("producers", &self.producers.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl PorterBuilder {
    pub fn new(config: PorterConfig, backend: Backend) -> Self {
        Self {
            config,
            backend,
            retry: Arc::new(Power2RetryStrategy),
            clock: Arc::new(UtcClock),
            diagnostics: None,
            resources: None,
            listeners: Vec::new(),
            topics: Vec::new(),
            producers: Vec::new(),
        }
    }

    pub fn retry_strategy(mut self, retry: impl RetryStrategy) -> Self {
        self.retry = Arc::new(retry);
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Replace the default [`ResourceProvisioner`](crate::resources::ResourceProvisioner)
    pub fn resource_manager(mut self, resources: Arc<dyn ResourceManager>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Listener invoked for dispatch failures on every topic
    pub fn on_error(mut self, listener: impl ErrorListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Consume `topic`, decoding message bodies as `T`
    pub fn topic<T>(
        mut self,
        topic: &str,
        configure: impl FnOnce(TopicBuilder<T>) -> TopicBuilder<T>,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.topics
            .push(configure(TopicBuilder::new(topic)).registration);
        self
    }

    /// Declare a topic this process publishes to
    pub fn producer<T: Serialize>(self, topic: &str) -> Self {
        self.producer_with_override::<T>(topic, None)
    }

    pub fn producer_with_override<T: Serialize>(
        mut self,
        topic: &str,
        name_override: Option<TopicNameOverride>,
    ) -> Self {
        self.producers.push(ProducerRegistration {
            topic: topic.to_string(),
            message_type: std::any::type_name::<T>(),
            name_override,
        });
        self
    }

    /// Validate every registration and assemble the host
    pub fn build(self) -> Result<Porter, PorterError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(PorterMetrics::new()));
        let mut client = PorterClient::new(config.clone(), self.backend)
            .with_clock(self.clock)
            .with_diagnostics(diagnostics.clone());
        if let Some(resources) = self.resources {
            client = client.with_resources(resources);
        }

        let mut seen = HashSet::new();
        let mut consumers = Vec::with_capacity(self.topics.len());
        for registration in self.topics {
            if !seen.insert(registration.topic.clone()) {
                return Err(ConfigurationError::duplicate_topic(&registration.topic).into());
            }
            let descriptor = registration.into_descriptor(&config)?;
            debug!(
                topic = %descriptor.topic,
                queue = %descriptor.topic_id.queue_name(),
                message_type = descriptor.message_type(),
                "Registered consumer"
            );
            consumers.push(Arc::new(descriptor));
        }

        let mut producers: Vec<ProducerDescriptor> = Vec::with_capacity(self.producers.len());
        for registration in self.producers {
            let topic_id = client.topic_id(&registration.topic, registration.name_override.as_ref())?;
            if producers.iter().any(|p| p.topic_id == topic_id) {
                debug!(topic = %registration.topic, "Producer already registered");
                continue;
            }
            producers.push(ProducerDescriptor {
                topic: registration.topic,
                topic_id,
                message_type: registration.message_type,
                name_override: registration.name_override,
            });
        }

        let handler = DeliveryHandler::new(
            client.clone(),
            self.retry,
            diagnostics,
            self.listeners,
            config.raise_exceptions,
        );

        info!(
            source = %config.source,
            consumers = consumers.len(),
            producers = producers.len(),
            "Porter host built"
        );
        Ok(Porter::new(client, consumers, producers, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::in_memory::InMemoryBroker;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct OrderPlaced {
        id: String,
    }

    struct Order {
        id: String,
    }

    impl From<OrderPlaced> for Order {
        fn from(placed: OrderPlaced) -> Self {
            Self { id: placed.id }
        }
    }

    struct OrderConsumer;

    #[async_trait::async_trait]
    impl Consumer<Order> for OrderConsumer {
        async fn consume(&self, message: Order, _ctx: &DispatchContext) -> Outcome {
            if message.id.is_empty() {
                Outcome::ignore("empty id")
            } else {
                Outcome::Success
            }
        }
    }

    fn builder(config: PorterConfig) -> PorterBuilder {
        PorterBuilder::new(config, Backend::from_shared(Arc::new(InMemoryBroker::new())))
    }

    #[test]
    fn test_defaults_come_from_config() {
        let config = PorterConfig {
            queue_max_receive_count: 7,
            message_timeout_seconds: 45,
            ..PorterConfig::with_source("orders")
        };
        let porter = builder(config)
            .topic::<OrderPlaced>("order_placed", |t| t.consumer::<Order, _>(OrderConsumer))
            .build()
            .unwrap();

        let descriptor = &porter.consumers()[0];
        assert_eq!(descriptor.max_concurrency, 7);
        assert_eq!(descriptor.consume_timeout, Duration::from_secs(45));
        assert_eq!(descriptor.polling_interval, Duration::from_secs(5));
        assert!(descriptor.message_type().contains("OrderPlaced"));
        assert!(descriptor.name_override.is_none());
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let result = builder(PorterConfig::with_source("orders"))
            .topic::<String>("order_placed", |t| t.handler(|_, _| async { Outcome::Success }))
            .topic::<String>("order_placed", |t| t.handler(|_, _| async { Outcome::Success }))
            .build();

        assert!(matches!(
            result,
            Err(PorterError::Configuration(ConfigurationError::DuplicateTopic { .. }))
        ));
    }

    #[test]
    fn test_polling_shorter_than_long_poll_rejected() {
        let config = PorterConfig {
            long_polling_wait_seconds: 5,
            ..PorterConfig::with_source("orders")
        };
        let result = builder(config)
            .topic::<String>("order_placed", |t| {
                t.polling_interval(Duration::from_secs(1))
                    .handler(|_, _| async { Outcome::Success })
            })
            .build();

        assert!(matches!(
            result,
            Err(PorterError::Configuration(
                ConfigurationError::PollingIntervalTooShort { .. }
            ))
        ));
    }

    #[test]
    fn test_registration_errors() {
        let invalid_name = builder(PorterConfig::with_source("orders"))
            .topic::<String>("order", |t| t.handler(|_, _| async { Outcome::Success }))
            .build();
        assert!(matches!(
            invalid_name,
            Err(PorterError::Configuration(ConfigurationError::InvalidTopicName { .. }))
        ));

        let missing_consumer = builder(PorterConfig::with_source("orders"))
            .topic::<String>("order_placed", |t| t.max_concurrency(2))
            .build();
        assert!(matches!(
            missing_consumer,
            Err(PorterError::Configuration(ConfigurationError::MissingRequiredField { .. }))
        ));

        let zero_workers = builder(PorterConfig::with_source("orders"))
            .topic::<String>("order_placed", |t| {
                t.max_concurrency(0).handler(|_, _| async { Outcome::Success })
            })
            .build();
        assert!(matches!(
            zero_workers,
            Err(PorterError::Configuration(ConfigurationError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_name_overrides_and_producers() {
        let config = PorterConfig {
            prefix: "dev".to_string(),
            ..PorterConfig::with_source("orders")
        };
        let porter = builder(config)
            .topic::<String>("order_placed", |t| {
                t.without_prefix().handler(|_, _| async { Outcome::Success })
            })
            .producer::<String>("order_shipped")
            .producer::<String>("order_shipped")
            .build()
            .unwrap();

        assert_eq!(porter.consumers()[0].topic_id.topic_name(), "OrderPlaced");
        assert_eq!(porter.producers().len(), 1);
        assert_eq!(porter.producers()[0].topic_id.topic_name(), "DevOrderShipped");
    }
}
