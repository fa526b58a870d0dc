//! # Retry Strategies
//!
//! Map the retry count of a failed delivery to the delay before it becomes
//! visible again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Backoff policy applied when a consumer fails
pub trait RetryStrategy: Send + Sync + 'static {
    fn evaluate(&self, retry_count: u32) -> Duration;
}

/// `2^retry_count` seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct Power2RetryStrategy;

impl RetryStrategy for Power2RetryStrategy {
    fn evaluate(&self, retry_count: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(retry_count))
    }
}

/// Always retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelayRetryStrategy;

impl RetryStrategy for NoDelayRetryStrategy {
    fn evaluate(&self, _retry_count: u32) -> Duration {
        Duration::ZERO
    }
}

/// Strategy backed by a closure
#[derive(Clone)]
pub struct FnRetryStrategy {
    eval: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl FnRetryStrategy {
    pub fn new(eval: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            eval: Arc::new(eval),
        }
    }
}

impl RetryStrategy for FnRetryStrategy {
    fn evaluate(&self, retry_count: u32) -> Duration {
        (self.eval)(retry_count)
    }
}

impl fmt::Debug for FnRetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRetryStrategy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power2_backoff() {
        let strategy = Power2RetryStrategy;
        let delays: Vec<u64> = (0..5).map(|n| strategy.evaluate(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_power2_saturates() {
        assert_eq!(Power2RetryStrategy.evaluate(200), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_custom_strategies() {
        assert_eq!(NoDelayRetryStrategy.evaluate(7), Duration::ZERO);
        let linear = FnRetryStrategy::new(|n| Duration::from_millis(100 * u64::from(n)));
        assert_eq!(linear.evaluate(3), Duration::from_millis(300));
    }
}
