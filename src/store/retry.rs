use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

use crate::settings::RetryPolicy;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Runs `call` until it succeeds or `policy.max_attempts` is exhausted.
pub(crate) async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, label, call, |_| true).await
}

/// Like [`with_retry`], but gives up at once on errors `retryable` rejects.
pub(crate) async fn with_retry_if<T, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
    retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&anyhow::Error) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && retryable(&err) => {
                let delay = policy.backoff(attempt) + jitter(policy.jitter_ms);
                log_warn!(
                    "{label} failed (attempt {attempt}/{max_attempts}), retrying in {}ms: {err:#}",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
