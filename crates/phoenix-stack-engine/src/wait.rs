//! Readiness polling with exponential backoff and cancellation.
//!
//! A provider may accept a create call long before the resource can be used
//! (a database cluster takes minutes). Dependents are only released once
//! [`wait_for_resource`] sees the readiness check pass.

use std::future::Future;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider_error::ProviderError;

/// Configuration for readiness polling.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    /// Maximum total time to wait
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("wait for {resource} cancelled")]
    Cancelled { resource: String },

    #[error("timeout waiting for {resource} after {elapsed:?} ({attempts} attempts)")]
    Timeout {
        resource: String,
        elapsed: Duration,
        attempts: u32,
    },

    #[error("readiness check for {resource} failed: {source}")]
    Check {
        resource: String,
        #[source]
        source: ProviderError,
    },
}

/// Poll `check` until it reports ready.
///
/// `check` returns `Ok(true)` when ready and `Ok(false)` to poll again; an
/// error ends the wait immediately.
pub async fn wait_for_resource<F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource: &str,
) -> Result<(), WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    let cancelled = || WaitError::Cancelled {
        resource: resource.to_string(),
    };

    loop {
        attempts += 1;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(cancelled());
        }
        if start.elapsed() >= config.timeout {
            return Err(WaitError::Timeout {
                resource: resource.to_string(),
                elapsed: start.elapsed(),
                attempts,
            });
        }

        match check().await {
            Ok(true) => {
                debug!(resource, attempts, "Resource ready");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    resource,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, polling again"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => return Err(cancelled()),
                }
            }
            Err(e) => {
                warn!(resource, error = %e, "Readiness check failed");
                return Err(WaitError::Check {
                    resource: resource.to_string(),
                    source: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_ready_after_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        wait_for_resource(
            &fast(),
            None,
            || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
            },
            "db",
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = wait_for_resource(&fast(), None, || async { Ok(false) }, "db")
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_check() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wait_for_resource(&fast(), Some(&token), || async { Ok(true) }, "db")
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_check_error_stops_waiting() {
        let err = wait_for_resource(
            &fast(),
            None,
            || async { Err(ProviderError::other("boom")) },
            "db",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::Check { .. }));
    }
}
