//! Shared helpers for integration tests against the in-memory broker.

#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use porter_core::messaging::in_memory::{BrokerSettings, InMemoryBroker};
use porter_core::{Backend, Porter, PorterBuilder, PorterConfig, PorterError, PorterMetrics};

pub const SOURCE: &str = "orders";
pub const QUEUE: &str = "orders_order_placed";
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_orders_order_placed";

/// Broker plus metrics shared with the host under test
pub struct TestBus {
    pub broker: Arc<InMemoryBroker>,
    pub metrics: PorterMetrics,
}

impl TestBus {
    pub fn new() -> Self {
        Self::with_batch_size(BrokerSettings::default().batch_size)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::with_settings(BrokerSettings {
                batch_size,
                ..BrokerSettings::default()
            })),
            metrics: PorterMetrics::new(),
        }
    }

    pub fn builder(&self, config: PorterConfig) -> PorterBuilder {
        PorterBuilder::new(config, Backend::from_shared(self.broker.clone()))
            .diagnostics(Arc::new(self.metrics.clone()))
    }
}

/// One-second polling, defaults otherwise
pub fn test_config() -> PorterConfig {
    PorterConfig {
        polling_interval_seconds: 1.0,
        ..PorterConfig::with_source(SOURCE)
    }
}

/// Run the host for `duration`, then cancel it and return its result
pub async fn run_for(porter: Arc<Porter>, duration: Duration) -> Result<(), PorterError> {
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let token = token.clone();
        async move { porter.run(token).await }
    });

    tokio::time::sleep(duration).await;
    token.cancel();
    handle.await.expect("porter task panicked")
}
