//! # Delivery Lifecycle
//!
//! Per-message dispatch: establish the correlation, decode, invoke the
//! consumer and apply the action matching its [`Outcome`].
//!
//! | Outcome | Action | Counter |
//! | --- | --- | --- |
//! | `Success` | delete | consumed |
//! | `Ignore` | delete | ignored |
//! | `Delay(d)` | release after `d` | none |
//! | `Error` / undecodable body / consumer panic | release after backoff, notify listeners | failed |

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConsumerDescriptor, DispatchContext, DispatchError, ErrorListener, MessageMeta, Outcome};
use crate::constants::NO_CORRELATION_ID;
use crate::correlation::CorrelationContext;
use crate::diagnostics::Diagnostics;
use crate::error::PorterError;
use crate::messaging::Message;
use crate::producer::PorterClient;
use crate::retry::RetryStrategy;

/// Applies the outcome state machine to received messages
#[derive(Clone)]
pub struct DeliveryHandler {
    client: PorterClient,
    retry: Arc<dyn RetryStrategy>,
    diagnostics: Arc<dyn Diagnostics>,
    listeners: Arc<Vec<Arc<dyn ErrorListener>>>,
    raise_exceptions: bool,
}

impl std::fmt::Debug for DeliveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandler")
            .field("global_listeners", &self.listeners.len())
            .field("raise_exceptions", &self.raise_exceptions)
            .finish()
    }
}

impl DeliveryHandler {
    pub fn new(
        client: PorterClient,
        retry: Arc<dyn RetryStrategy>,
        diagnostics: Arc<dyn Diagnostics>,
        listeners: Vec<Arc<dyn ErrorListener>>,
        raise_exceptions: bool,
    ) -> Self {
        Self {
            client,
            retry,
            diagnostics,
            listeners: Arc::new(listeners),
            raise_exceptions,
        }
    }

    /// Handle one message
    ///
    /// Returns an error only when dispatch failed and exceptions are
    /// configured to propagate.
    pub async fn handle(
        &self,
        descriptor: &ConsumerDescriptor,
        message: Message,
        cancellation: &CancellationToken,
    ) -> Result<(), PorterError> {
        let header = format!(
            "{}[{}.{}({})]",
            descriptor.topic,
            message
                .correlation_id
                .map_or_else(|| NO_CORRELATION_ID.to_string(), |id| id.to_string()),
            message.id,
            message.retry_count
        );

        let correlation = CorrelationContext::for_inbound(message.correlation_id);
        let meta = MessageMeta::from_message(&descriptor.topic, &message);
        let ctx = DispatchContext::new(
            meta,
            correlation,
            cancellation.child_token(),
            self.client.with_correlation(correlation),
        );

        debug!(location = %ctx.meta().location, "{header} dispatching");
        let started = Instant::now();

        let dispatched = AssertUnwindSafe(descriptor.consumer().dispatch(&message.body, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(DispatchError::Consumer(anyhow::anyhow!(
                    "consumer panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let outcome = match dispatched {
            Ok(outcome) => outcome,
            Err(error) => {
                return self
                    .fail(descriptor, &message, ctx.meta(), &header, started, error)
                    .await
            }
        };

        let result = match outcome {
            Outcome::Success => match message.delete().await {
                Ok(()) => {
                    info!("{header} [DELETED]");
                    self.diagnostics
                        .record_consumed(&descriptor.topic_id, started.elapsed());
                    Ok(())
                }
                Err(error) => {
                    self.fail(descriptor, &message, ctx.meta(), &header, started, error.into())
                        .await
                }
            },
            Outcome::Ignore(reason) => match message.delete().await {
                Ok(()) => {
                    info!(reason = %reason, "{header} [IGNORED]");
                    self.diagnostics
                        .record_ignored(&descriptor.topic_id, started.elapsed());
                    Ok(())
                }
                Err(error) => {
                    self.fail(descriptor, &message, ctx.meta(), &header, started, error.into())
                        .await
                }
            },
            Outcome::Delay(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "{header} [DELAYED]");
                self.release(&message, &header, delay).await;
                Ok(())
            }
            Outcome::Error(error) => {
                self.fail(
                    descriptor,
                    &message,
                    ctx.meta(),
                    &header,
                    started,
                    DispatchError::Consumer(error),
                )
                .await
            }
        };

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "{header} [FINISH]");
        result
    }

    async fn release(&self, message: &Message, header: &str, delay: Duration) {
        if let Err(error) = message.release(delay).await {
            warn!(error = %error, "{header} unable to release message");
        }
    }

    async fn fail(
        &self,
        descriptor: &ConsumerDescriptor,
        message: &Message,
        meta: &MessageMeta,
        header: &str,
        started: Instant,
        error: DispatchError,
    ) -> Result<(), PorterError> {
        error!(error = %error, "{header} [ERROR]");
        self.diagnostics
            .record_failed(&descriptor.topic_id, started.elapsed());

        let backoff = self.retry.evaluate(message.retry_count);
        info!(delay_ms = backoff.as_millis() as u64, "{header} [RELEASING]");
        self.release(message, header, backoff).await;

        if let Some(listener) = &descriptor.error_listener {
            listener.on_error(&error, meta).await;
        }
        for listener in self.listeners.iter() {
            listener.on_error(&error, meta).await;
        }

        if self.raise_exceptions {
            return Err(error.into());
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
