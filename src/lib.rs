#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Porter Core Rust
//!
//! Typed, reliable publish/subscribe on top of a managed event bus that
//! offers fan-out topics and durable per-consumer queues.
//!
//! ## Overview
//!
//! Applications register typed consumers per topic and publish typed
//! messages. Porter owns the plumbing in between: deterministic naming,
//! idempotent provisioning of topics, queues and dead-letter queues, a
//! bounded polling/consumption pipeline per topic, explicit retry and
//! dead-letter semantics and correlation-id propagation across hops.
//!
//! ## Architecture
//!
//! - **Naming** ([`naming`]): one authority for topic, queue and event names
//! - **Provisioning** ([`resources`]): `ensure_*` operations serialized per resource
//! - **Producer** ([`producer`]): envelope construction and correlation resolution
//! - **Consumption** ([`consumer`]): polling worker, bounded channel, worker pool and
//!   the outcome state machine (`Success`, `Ignore`, `Delay`, `Error`)
//! - **Host** ([`host`]): registration, validation, bootstrap and run
//!
//! Backends plug in through the capability ports in [`messaging`]. The
//! [`messaging::in_memory::InMemoryBroker`] implements all of them for tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use porter_core::config::PorterConfig;
//! use porter_core::consumer::Outcome;
//! use porter_core::host::PorterBuilder;
//! use porter_core::messaging::{in_memory::InMemoryBroker, Backend};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     id: String,
//!     name: String,
//! }
//!
//! # async fn example() -> porter_core::Result<()> {
//! porter_core::logging::init_structured_logging();
//!
//! let backend = Backend::from_shared(Arc::new(InMemoryBroker::new()));
//! let porter = PorterBuilder::new(PorterConfig::with_source("orders"), backend)
//!     .topic::<OrderPlaced>("order_placed", |t| {
//!         t.handler(|order, ctx| async move {
//!             tracing::info!(id = %order.id, correlation = ?ctx.correlation_id(), "order placed");
//!             Outcome::Success
//!         })
//!     })
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! porter.run(shutdown).await
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod correlation;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod logging;
pub mod messaging;
pub mod naming;
pub mod producer;
pub mod resources;
pub mod retry;

pub use config::{ConfigManager, ConfigurationError, PorterConfig};
pub use consumer::{Consumer, DispatchContext, DispatchError, MessageMeta, Outcome};
pub use correlation::CorrelationContext;
pub use diagnostics::{Diagnostics, MetricsSnapshot, PorterMetrics};
pub use error::{PorterError, Result};
pub use host::{Porter, PorterBuilder, TopicBuilder};
pub use messaging::{Backend, Message, MessageEnvelope, MessagingError, PublishResult};
pub use naming::{TopicId, TopicNameOverride};
pub use producer::{PorterClient, TypedProducer};
pub use retry::{NoDelayRetryStrategy, Power2RetryStrategy, RetryStrategy};
