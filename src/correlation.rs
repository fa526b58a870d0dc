//! # Correlation Context
//!
//! Correlation ids link a chain of publish/consume hops. A context is
//! created for each dispatch from the inbound message and carried by the
//! [`PorterClient`](crate::producer::PorterClient) handed to the consumer,
//! so publishes made while handling a message inherit its correlation id.
//! Outside of a dispatch the context is empty.

use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CorrelationContext {
    correlation_id: Option<Uuid>,
}

impl CorrelationContext {
    /// No ambient correlation
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
        }
    }

    pub fn from_option(correlation_id: Option<Uuid>) -> Self {
        Self { correlation_id }
    }

    /// Context for dispatching an inbound message, generating a fresh id when it has none
    pub fn for_inbound(correlation_id: Option<Uuid>) -> Self {
        Self::new(correlation_id.unwrap_or_else(Uuid::new_v4))
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn is_active(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Explicit id wins over the ambient one
    pub fn resolve(&self, explicit: Option<Uuid>) -> Option<Uuid> {
        explicit.or(self.correlation_id)
    }
}

impl fmt::Display for CorrelationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.correlation_id {
            Some(id) => write!(f, "{id}"),
            None => f.write_str(crate::constants::NO_CORRELATION_ID),
        }
    }
}
