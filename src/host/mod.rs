//! # Porter Host
//!
//! Owns every registered consumer and producer of a process. `bootstrap`
//! provisions their resources; `run` starts one [`ConsumptionEngine`] per
//! consumer and waits for all of them.
//!
//! ## Lifecycle
//!
//! 1. [`PorterBuilder::build`] validates registrations (naming, duplicates,
//!    polling intervals) and fails fast with a configuration error
//! 2. [`Porter::bootstrap`] creates the local encryption key when running
//!    against an emulated backend, then ensures topics and queues
//! 3. [`Porter::run`] polls until the cancellation token fires. With
//!    `raise_exceptions` the first engine failure cancels the others and is
//!    returned; otherwise failures stay isolated to their engine.

pub mod builder;

use futures::future::try_join_all;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consumer::{ConsumerDescriptor, ConsumptionEngine, DeliveryHandler, ProducerDescriptor};
use crate::error::PorterError;
use crate::producer::PorterClient;

pub use builder::{PorterBuilder, TopicBuilder};

/// A built host ready to bootstrap and run
#[derive(Debug)]
pub struct Porter {
    client: PorterClient,
    consumers: Vec<Arc<ConsumerDescriptor>>,
    producers: Vec<ProducerDescriptor>,
    handler: DeliveryHandler,
}

impl Porter {
    pub(crate) fn new(
        client: PorterClient,
        consumers: Vec<Arc<ConsumerDescriptor>>,
        producers: Vec<ProducerDescriptor>,
        handler: DeliveryHandler,
    ) -> Self {
        Self {
            client,
            consumers,
            producers,
            handler,
        }
    }

    /// Client sharing the host's backend, provisioner and diagnostics
    pub fn client(&self) -> &PorterClient {
        &self.client
    }

    pub fn consumers(&self) -> &[Arc<ConsumerDescriptor>] {
        &self.consumers
    }

    pub fn producers(&self) -> &[ProducerDescriptor] {
        &self.producers
    }

    /// Provision every registered topic and queue
    pub async fn bootstrap(&self) -> Result<(), PorterError> {
        if self.consumers.is_empty() && self.producers.is_empty() {
            info!("No consumers or producers registered, skipping bootstrap");
            return Ok(());
        }

        let config = self.client.config();
        let resources = self.client.resources();

        if config.localstack {
            info!(service_url = ?config.service_url, "Setting up local environment");
            resources.setup_local_environment().await?;
        }

        try_join_all(self.consumers.iter().map(|descriptor| async move {
            resources.ensure_topic_exists(&descriptor.topic_id).await?;
            resources.ensure_queue_exists(&descriptor.topic_id).await?;
            resources
                .update_queue_attributes(&descriptor.topic_id, descriptor.consume_timeout)
                .await
        }))
        .await?;

        try_join_all(
            self.producers
                .iter()
                .map(|descriptor| resources.ensure_topic_exists(&descriptor.topic_id)),
        )
        .await?;

        info!(
            consumers = self.consumers.len(),
            producers = self.producers.len(),
            "Bootstrap complete"
        );
        Ok(())
    }

    /// Bootstrap, then consume until `cancellation` fires or a failure propagates
    pub async fn run(&self, cancellation: CancellationToken) -> Result<(), PorterError> {
        self.bootstrap().await?;

        let token = cancellation.child_token();
        let backend = self.client.backend();
        let mut engines = JoinSet::new();

        for descriptor in &self.consumers {
            let engine = ConsumptionEngine::new(
                descriptor.clone(),
                backend.consumer.clone(),
                self.handler.clone(),
                self.client.diagnostics().clone(),
                self.client.config().raise_exceptions,
            );
            engines.spawn(engine.run(token.clone()));
        }

        info!(engines = engines.len(), "Porter running");

        let mut first_error = None;
        while let Some(joined) = engines.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Consumption engine aborted");
                    if !self.client.config().raise_exceptions {
                        continue;
                    }
                    Err(PorterError::worker("consumption engine", e.to_string()))
                }
            };
            if let Err(e) = result {
                error!(error = %e, "Consumption engine failed");
                if first_error.is_none() {
                    token.cancel();
                    first_error = Some(e);
                }
            }
        }

        info!("Porter stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
