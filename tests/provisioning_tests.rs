//! Resource provisioning through the public API.

mod common;

use common::*;
use porter_core::messaging::in_memory::{BrokerSettings, InMemoryBroker};
use porter_core::messaging::MessagingError;
use porter_core::resources::{ResourceManager, ResourceProvisioner};
use porter_core::{Backend, Outcome, PorterBuilder, PorterConfig, PorterError, TopicId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn lagging_provisioner(
    config: PorterConfig,
    queue_visibility_lag: u32,
) -> (Arc<InMemoryBroker>, ResourceProvisioner, TopicId) {
    let broker = Arc::new(InMemoryBroker::with_settings(BrokerSettings {
        queue_visibility_lag,
        ..BrokerSettings::default()
    }));
    let topic = TopicId::new("order_placed", &config.naming()).unwrap();
    let provisioner = ResourceProvisioner::new(Arc::new(config), broker.clone(), broker.clone());
    (broker, provisioner, topic)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_queue_creates_one_queue_pair() {
    let config = Arc::new(PorterConfig::with_source(SOURCE));
    let broker = Arc::new(InMemoryBroker::new());
    let provisioner = Arc::new(ResourceProvisioner::new(
        config.clone(),
        broker.clone(),
        broker.clone(),
    ));
    let topic = TopicId::new("order_placed", &config.naming()).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let provisioner = provisioner.clone();
            let topic = topic.clone();
            tokio::spawn(async move { provisioner.ensure_queue_exists(&topic).await })
        })
        .collect();

    for task in tasks {
        let info = task.await.unwrap().unwrap();
        assert_eq!(info.queue_name, QUEUE);
    }

    assert_eq!(broker.queue_creation_count(QUEUE), 1);
    assert_eq!(broker.queue_creation_count(DEAD_LETTER_QUEUE), 1);
    assert_eq!(broker.fanout_creation_count("OrderPlaced"), 1);
    assert_eq!(broker.queue_names(), vec![DEAD_LETTER_QUEUE, QUEUE]);
    assert_eq!(broker.subscribers("OrderPlaced"), vec![QUEUE]);
}

#[tokio::test]
async fn test_bootstrap_provisions_consumers_and_producers() {
    let bus = TestBus::new();
    let config = PorterConfig {
        app_name: Some("orders-api".to_string()),
        ..test_config()
    };
    let porter = bus
        .builder(config)
        .topic::<String>("order_placed", |t| {
            t.consume_timeout(std::time::Duration::from_secs(90))
                .handler(|_, _| async { Outcome::Success })
        })
        .producer::<String>("order_shipped")
        .build()
        .unwrap();

    porter.bootstrap().await.unwrap();
    porter.bootstrap().await.unwrap();

    assert!(bus.broker.fanout_exists("OrderPlaced"));
    assert!(bus.broker.fanout_exists("OrderShipped"));
    assert_eq!(bus.broker.queue_creation_count(QUEUE), 1);
    assert_eq!(
        bus.broker.queue_visibility_timeout(QUEUE),
        Some(std::time::Duration::from_secs(90))
    );
    assert_eq!(
        bus.broker.queue_tags(QUEUE).get("App").map(String::as_str),
        Some("orders-api")
    );
    assert_eq!(
        bus.broker
            .fanout_tags("OrderShipped")
            .get("CreatedBy")
            .map(String::as_str),
        Some("porter-rs")
    );
}

#[tokio::test]
async fn test_bootstrap_without_auto_create_fails() {
    let bus = TestBus::new();
    let config = PorterConfig {
        auto_create_new_topic: false,
        ..test_config()
    };
    let porter = bus
        .builder(config)
        .producer::<String>("order_shipped")
        .build()
        .unwrap();

    let err = porter.bootstrap().await.unwrap_err();
    assert!(matches!(err, PorterError::TopicNotProvisioned { .. }));
    assert!(err.is_startup_error());
}

#[tokio::test]
async fn test_localstack_bootstrap_creates_encryption_key() {
    let broker = Arc::new(InMemoryBroker::new().without_encryption_key());
    let config = PorterConfig {
        localstack: true,
        service_url: Some("http://localhost:4566".to_string()),
        ..test_config()
    };
    let porter = PorterBuilder::new(config, Backend::from_shared(broker.clone()))
        .producer::<String>("order_shipped")
        .build()
        .unwrap();

    porter.bootstrap().await.unwrap();
    assert!(broker.encryption_key().is_some());
    assert!(broker.fanout_exists("OrderShipped"));
}

#[tokio::test]
async fn test_bootstrap_skipped_without_registrations() {
    let bus = TestBus::new();
    let porter = bus.builder(test_config()).build().unwrap();

    porter.bootstrap().await.unwrap();
    assert!(bus.broker.queue_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ensure_queue_waits_for_queue_to_become_visible() {
    let config = PorterConfig {
        queue_ready_timeout_seconds: 30,
        queue_ready_poll_interval_millis: 2_000,
        ..PorterConfig::with_source(SOURCE)
    };
    let (broker, provisioner, topic) = lagging_provisioner(config, 3);

    let started = Instant::now();
    let info = provisioner.ensure_queue_exists(&topic).await.unwrap();

    assert_eq!(info.queue_name, QUEUE);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(broker.queue_creation_count(QUEUE), 1);
    assert_eq!(broker.subscribers("OrderPlaced"), vec![QUEUE]);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_queue_times_out_when_queue_never_appears() {
    let config = PorterConfig {
        queue_ready_timeout_seconds: 5,
        queue_ready_poll_interval_millis: 1_000,
        ..PorterConfig::with_source(SOURCE)
    };
    let (broker, provisioner, topic) = lagging_provisioner(config, u32::MAX);

    let started = Instant::now();
    let result = provisioner.ensure_queue_exists(&topic).await;

    assert!(
        matches!(result, Err(PorterError::Messaging(MessagingError::Timeout { .. }))),
        "unexpected result: {result:?}"
    );
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(broker.queue_creation_count(QUEUE), 1);
    assert!(provisioner.cache().is_empty());
}
