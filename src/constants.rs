//! # Porter Constants
//!
//! Shared constants for resource naming, tagging and default timings.

use std::time::Duration;

/// Prefix prepended to a queue name to derive its dead-letter queue
pub const DEAD_LETTER_PREFIX: &str = "dead_letter_";

/// Minimum length of a raw topic name
pub const MIN_TOPIC_NAME_LENGTH: usize = 6;

/// Value of the `CreatedBy` tag on every resource this crate creates
pub const CREATED_BY: &str = "porter-rs";

/// Resource tag keys
pub mod tags {
    pub const CREATED_BY: &str = "CreatedBy";
    pub const SOURCE: &str = "Source";
    pub const APP: &str = "App";
}

/// Header used in dispatch logs when a message carries no correlation id
pub const NO_CORRELATION_ID: &str = "NO-CORRELATION-ID";

/// Default bound for waiting on a freshly created queue to become visible
pub const DEFAULT_QUEUE_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause between queue visibility checks
pub const DEFAULT_QUEUE_READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Environment variable that overrides the configured region
pub const REGION_ENV_VAR: &str = "PORTER_AWS_REGION";

/// Prefix for environment variable configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "PORTER";
