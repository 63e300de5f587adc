use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::api_error::ApiError;

/// How many times a whole store transaction is attempted when the store
/// aborts it with a serialization failure or deadlock.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delays between attempts; one fewer than `max_attempts`.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) yields 2, 4, 8 ... ms; factor scales it to the base delay
        ExponentialBackoff::from_millis(2)
            .factor((self.base_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Run `action` until it succeeds, fails with a non-transient error, or
/// the policy is exhausted. Exhaustion surfaces as `ApiError::Conflict`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    action: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let result = RetryIf::spawn(policy.strategy(), action, |e: &ApiError| {
        let transient = e.is_transient();
        if transient {
            warn!(operation, error = %e, "Transient store failure");
        }
        transient
    })
    .await;

    match result {
        Err(e) if e.is_transient() => {
            warn!(
                operation,
                attempts = policy.max_attempts,
                "Giving up after repeated transient failures"
            );
            Err(ApiError::conflict(format!(
                "{} could not complete due to concurrent updates, please retry",
                operation
            )))
        }
        other => other,
    }
}
