use std::time::Duration;

use crate::config::Config;

/// Bounded retry for transient remote failures. Zero retries reproduces the
/// single-attempt behaviour editors have always had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Exponential backoff: base, 2x base, 4x base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPolicy {
    pub retry: RetryPolicy,
    /// Publish invalidations even when neither channel accepted the write.
    pub notify_on_total_failure: bool,
    /// Roll the mirror back and fail when the remote answers 4xx, instead of
    /// keeping the local write as the degraded source of truth.
    pub reject_on_validation_error: bool,
}

impl MutationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy {
                max_retries: config.mutation_max_retries,
                base_delay: config.retry_base_delay(),
            },
            notify_on_total_failure: config.notify_on_total_failure,
            reject_on_validation_error: config.reject_on_validation_error,
        }
    }
}
