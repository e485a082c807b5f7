//! Retry backoff for failed handler invocations and store errors

use std::time::Duration;

use inkstream_core::config::MessagingConfig;

/// Exponential backoff with a cap and ±25% jitter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound before jitter
    pub max: Duration,
    /// Deliveries allowed before an entry is a dead letter
    pub max_delivery_count: u64,
    /// Apply jitter to computed delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

impl RetryPolicy {
    /// Build the policy from messaging settings
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            base: config.retry_base(),
            max: config.retry_max(),
            max_delivery_count: config.max_delivery_count,
            jitter: true,
        }
    }

    /// Enable/disable jitter
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `max`, then jittered by up to 25% in
    /// either direction.
    pub fn backoff_delay(&self, attempt: u64) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as u32;
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let capped = base_ms.saturating_mul(1u64 << exp).min(max_ms);

        if !self.jitter || capped < 4 {
            return Duration::from_millis(capped);
        }

        let spread = capped / 4;
        let offset = rand::random::<u64>() % (2 * spread + 1);
        Duration::from_millis(capped - spread + offset)
    }

    /// Whether an entry delivered `delivery_count` times should no longer be
    /// handed to the handler
    pub fn is_exhausted(&self, delivery_count: u64) -> bool {
        delivery_count > self.max_delivery_count
    }
}
