//! Engine tuning.

use std::time::Duration;

use phoenix_stack_common::defaults::DEFAULT_STACK_NAME;

use crate::wait::WaitConfig;

/// Bounds for retrying transient provider errors on one node.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_times: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stack name written into every resource's tags
    pub stack_name: String,
    /// Upper bound on provider calls in flight, never zero
    pub(crate) max_concurrency: usize,
    pub retry: RetryConfig,
    pub wait: WaitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            max_concurrency: 8,
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Millisecond-scale delays, for simulations and tests.
    pub fn fast(stack_name: impl Into<String>) -> Self {
        Self::new(stack_name)
            .with_retry(RetryConfig {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                max_times: 5,
            })
            .with_wait(WaitConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                timeout: Duration::from_secs(5),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_is_at_least_one() {
        assert_eq!(EngineConfig::new("demo").with_max_concurrency(0).max_concurrency(), 1);
        assert_eq!(EngineConfig::new("demo").with_max_concurrency(3).max_concurrency(), 3);
        assert_eq!(EngineConfig::default().max_concurrency(), 8);
    }
}
