//! # Consumers
//!
//! Typed consumer registration and the per-topic consumption pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ConsumeDriver ──receive──▶ PollingWorker ──bounded channel (max_concurrency)──▶ ConsumerWorker × N
//!                                                                                    │
//!                                                                            DeliveryHandler
//!                                                                                    │
//!                                                          Consumer<M>::consume ──▶ Outcome
//!                                                                                    │
//!                                              delete / release(delay) / release(backoff) + listeners
//! ```
//!
//! Consumers return an explicit [`Outcome`]. Only [`Outcome::Error`] (and a
//! body that cannot be deserialized) consumes a retry; redelivery past the
//! configured threshold is routed to the dead-letter queue by the backend.

pub mod delivery;
pub mod descriptor;
pub mod engine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::correlation::CorrelationContext;
use crate::messaging::{Message, MessagingError};
use crate::producer::PorterClient;

pub use delivery::DeliveryHandler;
pub use descriptor::{ConsumerDescriptor, ProducerDescriptor};
pub use engine::ConsumptionEngine;

/// Result of handling one message
#[derive(Debug)]
pub enum Outcome {
    /// Handled; the message is deleted
    Success,
    /// Never processable; the message is deleted without a retry
    Ignore(String),
    /// Retry after exactly this delay without consuming a retry
    Delay(Duration),
    /// Failed; the message is released with backoff
    Error(anyhow::Error),
}

impl Outcome {
    pub fn ignore(reason: impl Into<String>) -> Self {
        Self::Ignore(reason.into())
    }

    pub fn delay(delay: Duration) -> Self {
        Self::Delay(delay)
    }

    pub fn error(error: impl Into<anyhow::Error>) -> Self {
        Self::Error(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<anyhow::Result<()>> for Outcome {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) => Self::Error(error),
        }
    }
}

/// Handles messages of type `M`
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use porter_core::consumer::{Consumer, DispatchContext, Outcome};
///
/// struct AuditLog;
///
/// #[async_trait]
/// impl Consumer<String> for AuditLog {
///     async fn consume(&self, message: String, ctx: &DispatchContext) -> Outcome {
///         println!("{} {}", ctx.meta().message_id, message);
///         Outcome::Success
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer<M>: Send + Sync + 'static
where
    M: Send + 'static,
{
    async fn consume(&self, message: M, ctx: &DispatchContext) -> Outcome;
}

/// Consumer backed by an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a consumer from `|message, ctx| async move { ... }`
///
/// The closure may return [`Outcome`] or `anyhow::Result<()>`.
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<M, F, Fut> Consumer<M> for HandlerFn<F>
where
    M: Send + 'static,
    F: Fn(M, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Into<Outcome>,
{
    async fn consume(&self, message: M, ctx: &DispatchContext) -> Outcome {
        (self.f)(message, ctx.clone()).await.into()
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// Failures of a single dispatch, handed to error listeners
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Consumer failed: {0:#}")]
    Consumer(anyhow::Error),

    #[error("Unable to deserialize message body as {type_name}: {message}")]
    Deserialization {
        type_name: &'static str,
        message: String,
    },

    #[error(transparent)]
    Acknowledge(#[from] MessagingError),
}

impl DispatchError {
    pub fn deserialization(type_name: &'static str, message: impl Into<String>) -> Self {
        Self::Deserialization {
            type_name,
            message: message.into(),
        }
    }
}

/// Metadata of the message being dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub datetime: DateTime<Utc>,
    pub retry_count: u32,
    /// Raw topic name the consumer was registered for
    pub topic: String,
    pub queue_ref: String,
    pub topic_ref: String,
    pub body: String,
    /// `topic.queue`
    pub location: String,
}

impl MessageMeta {
    pub fn from_message(topic: &str, message: &Message) -> Self {
        Self {
            message_id: message.id,
            correlation_id: message.correlation_id,
            datetime: message.datetime,
            retry_count: message.retry_count,
            topic: topic.to_string(),
            queue_ref: message.queue_ref.clone(),
            topic_ref: message.topic_ref.clone(),
            body: message.body.clone(),
            location: message.location(),
        }
    }
}

/// Per-dispatch context passed to consumers
///
/// Holds the message metadata, the correlation established for this
/// dispatch, a cancellation token derived from the engine's stop token and
/// a client whose publishes inherit the correlation id.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    meta: MessageMeta,
    correlation: CorrelationContext,
    cancellation: CancellationToken,
    client: PorterClient,
}

impl DispatchContext {
    pub fn new(
        meta: MessageMeta,
        correlation: CorrelationContext,
        cancellation: CancellationToken,
        client: PorterClient,
    ) -> Self {
        Self {
            meta,
            correlation,
            cancellation,
            client,
        }
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    pub fn correlation(&self) -> CorrelationContext {
        self.correlation
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation.correlation_id()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Client bound to this dispatch's correlation
    pub fn client(&self) -> &PorterClient {
        &self.client
    }
}

/// Receives dispatch failures before the raise policy is applied
#[async_trait]
pub trait ErrorListener: Send + Sync + 'static {
    async fn on_error(&self, error: &DispatchError, meta: &MessageMeta);
}

/// Listener backed by a synchronous closure
pub struct FnErrorListener<F> {
    f: F,
}

pub fn listener_fn<F>(f: F) -> FnErrorListener<F>
where
    F: Fn(&DispatchError, &MessageMeta) + Send + Sync + 'static,
{
    FnErrorListener { f }
}

#[async_trait]
impl<F> ErrorListener for FnErrorListener<F>
where
    F: Fn(&DispatchError, &MessageMeta) + Send + Sync + 'static,
{
    async fn on_error(&self, error: &DispatchError, meta: &MessageMeta) {
        (self.f)(error, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        assert!(Outcome::from(Ok::<(), anyhow::Error>(())).is_success());
        assert!(matches!(
            Outcome::from(Err::<(), _>(anyhow::anyhow!("boom"))),
            Outcome::Error(_)
        ));
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::Consumer(anyhow::anyhow!("inner").context("outer"));
        assert_eq!(err.to_string(), "Consumer failed: outer: inner");

        let err = DispatchError::deserialization("Order", "missing field `id`");
        assert!(err.to_string().contains("Order"));
    }
}
