//! # Messaging Module
//!
//! Wire envelope, received messages and the backend capability ports the
//! rest of the crate is written against, plus an in-memory backend.

pub mod envelope;
pub mod errors;
pub mod in_memory;
pub mod message;
pub mod traits;

pub use envelope::{MessageEnvelope, PublishResult};
pub use errors::MessagingError;
pub use message::{Message, MessageAcknowledger, ReceiptHandle, TypedMessage};
pub use traits::{
    Backend, BrokerAdmin, ConsumeDriver, FanoutInfo, FanoutSpec, KeyId, KeyProvider,
    ProduceDriver, QueueInfo, QueueSpec, RedrivePolicy,
};
