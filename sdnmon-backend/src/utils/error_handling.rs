//! Retry helpers for control-plane operations.
//!
//! A switch that has just attached may not accept commands immediately. Flow
//! installation is retried with exponential backoff instead of failing the
//! whole attach handler.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for [`retry_async`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or the policy's attempts run out.
///
/// The last error is returned unchanged so callers can match on it.
pub async fn retry_async<F, Fut, T, E>(
    operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err) if attempt < max_attempts => {
                warn!(
                    "Operation '{}' failed on attempt {}/{}: {}",
                    operation_name, attempt, max_attempts, err
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f32(policy.backoff_multiplier);
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    "Operation '{}' failed after {} attempts: {}",
                    operation_name, max_attempts, err
                );
                return Err(err);
            }
        }
    }
}
