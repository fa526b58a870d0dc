//! # Consumption Engine
//!
//! One engine runs per registered consumer: a polling worker feeding a
//! bounded channel and a pool of `max_concurrency` consumer workers
//! draining it.
//!
//! ## Backpressure
//!
//! The channel capacity equals `max_concurrency`. Before every receive the
//! poller reserves a slot, so polling pauses while consumers are behind;
//! the remaining messages of a batch wait on `send` for further capacity.
//!
//! ## Shutdown
//!
//! Cancellation stops the poller at its next suspension point and drops the
//! sender. Consumer workers finish the message they are handling and stop
//! reading. Messages left in the channel were never acknowledged and become
//! visible again when their visibility timeout expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConsumerDescriptor, DeliveryHandler};
use crate::diagnostics::Diagnostics;
use crate::error::PorterError;
use crate::messaging::{ConsumeDriver, Message, MessagingError};

/// Runtime statistics for one engine
#[derive(Debug, Default)]
pub struct EngineStats {
    pub polling_cycles: AtomicU64,
    pub messages_received: AtomicU64,
    pub polling_errors: AtomicU64,
    pub messages_dispatched: AtomicU64,
}

/// Polling worker plus consumer worker pool for one descriptor
pub struct ConsumptionEngine {
    descriptor: Arc<ConsumerDescriptor>,
    driver: Arc<dyn ConsumeDriver>,
    handler: DeliveryHandler,
    diagnostics: Arc<dyn Diagnostics>,
    raise_exceptions: bool,
    stats: Arc<EngineStats>,
}

impl std::fmt::Debug for ConsumptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumptionEngine")
            .field("descriptor", &self.descriptor)
            .field("raise_exceptions", &self.raise_exceptions)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ConsumptionEngine {
    pub fn new(
        descriptor: Arc<ConsumerDescriptor>,
        driver: Arc<dyn ConsumeDriver>,
        handler: DeliveryHandler,
        diagnostics: Arc<dyn Diagnostics>,
        raise_exceptions: bool,
    ) -> Self {
        Self {
            descriptor,
            driver,
            handler,
            diagnostics,
            raise_exceptions,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    /// Run until cancelled, until polling stops, or until a failure propagates
    pub async fn run(self, cancellation: CancellationToken) -> Result<(), PorterError> {
        let engine_token = cancellation.child_token();
        let capacity = self.descriptor.max_concurrency.max(1);
        let (sender, receiver) = mpsc::channel::<Message>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        info!(
            topic = %self.descriptor.topic,
            queue = %self.descriptor.topic_id.queue_name(),
            max_concurrency = capacity,
            polling_interval = ?self.descriptor.polling_interval,
            "Starting consumption engine"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..capacity {
            workers.spawn(Self::consume_loop(
                worker_id,
                receiver.clone(),
                self.handler.clone(),
                self.descriptor.clone(),
                engine_token.clone(),
                self.stats.clone(),
            ));
        }

        let mut first_error = self.poll(sender, &engine_token).await.err();

        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(topic = %self.descriptor.topic, error = %e, "Consumer worker aborted");
                    if !self.raise_exceptions {
                        continue;
                    }
                    Err(PorterError::worker(&self.descriptor.topic, e.to_string()))
                }
            };
            if let Err(e) = result {
                if first_error.is_none() {
                    engine_token.cancel();
                    first_error = Some(e);
                }
            }
        }

        info!(topic = %self.descriptor.topic, "Consumption engine stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Periodic receive into the channel; the sender is dropped on return
    async fn poll(
        &self,
        sender: mpsc::Sender<Message>,
        cancellation: &CancellationToken,
    ) -> Result<(), PorterError> {
        let descriptor = &self.descriptor;
        let mut ticker = tokio::time::interval(descriptor.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'polling: loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break 'polling,
                _ = ticker.tick() => {}
            }

            let permit = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break 'polling,
                permit = sender.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'polling,
                },
            };

            self.stats.polling_cycles.fetch_add(1, Ordering::Relaxed);
            let received = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break 'polling,
                result = tokio::time::timeout(
                    descriptor.consume_timeout,
                    self.driver.receive_messages(&descriptor.topic_id),
                ) => result,
            };

            let messages = match received {
                Ok(Ok(messages)) => messages,
                Ok(Err(e)) if e.is_transient() => {
                    self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %descriptor.topic, error = %e, "Transient receive failure");
                    Vec::new()
                }
                Ok(Err(e)) => {
                    self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                    return self.polling_failed(e);
                }
                Err(_) => {
                    self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %descriptor.topic,
                        timeout_ms = descriptor.consume_timeout.as_millis() as u64,
                        "Receive timed out"
                    );
                    Vec::new()
                }
            };

            if messages.is_empty() {
                debug!(topic = %descriptor.topic, "No messages received");
                continue;
            }

            self.stats
                .messages_received
                .fetch_add(messages.len() as u64, Ordering::Relaxed);
            self.diagnostics
                .record_retrieved(&descriptor.topic_id, messages.len());
            debug!(topic = %descriptor.topic, count = messages.len(), "Received messages");

            let mut messages = messages.into_iter();
            if let Some(first) = messages.next() {
                permit.send(first);
            }
            for message in messages {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => break 'polling,
                    sent = sender.send(message) => {
                        if sent.is_err() {
                            break 'polling;
                        }
                    }
                }
            }
        }

        debug!(topic = %descriptor.topic, "Polling worker finished");
        Ok(())
    }

    fn polling_failed(&self, e: MessagingError) -> Result<(), PorterError> {
        error!(
            topic = %self.descriptor.topic,
            error = %e,
            "Unrecoverable receive failure, stopping polling"
        );
        if self.raise_exceptions {
            return Err(e.into());
        }
        Ok(())
    }

    async fn consume_loop(
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
        handler: DeliveryHandler,
        descriptor: Arc<ConsumerDescriptor>,
        cancellation: CancellationToken,
        stats: Arc<EngineStats>,
    ) -> Result<(), PorterError> {
        loop {
            let next = {
                let mut receiver = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => break,
                    guard = receiver.lock() => guard,
                };
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    message = receiver.recv() => message,
                }
            };

            let Some(message) = next else {
                break;
            };

            stats.messages_dispatched.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = handler.handle(&descriptor, message, &cancellation).await {
                error!(
                    topic = %descriptor.topic,
                    worker_id,
                    error = %e,
                    "Consumer worker failed"
                );
                cancellation.cancel();
                return Err(e);
            }
        }

        debug!(topic = %descriptor.topic, worker_id, "Consumer worker finished");
        Ok(())
    }
}
