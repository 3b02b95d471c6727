use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use super::provider_error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 2u64.saturating_pow(exponent);
        let base = self.backoff_base_ms.saturating_mul(multiplier);
        Duration::from_millis(base.min(self.backoff_max_ms))
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, or the attempt
/// budget (`max_retries + 1`) is spent. Backoff doubles per attempt up to the cap.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1).max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let start = Instant::now();

        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error_kind = %err.kind,
                    error = %err,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    backoff_ms = backoff.as_millis() as u64,
                    "payment provider call failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
