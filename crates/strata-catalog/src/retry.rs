//! Retry policy for metadata reads.
//!
//! Permanent failures (not found, bad input, name collisions, forbidden,
//! unprocessable) are never retried. For the rest, the deepest error in the
//! source chain decides: a provider-marked retryable failure retries, an
//! access-denied failure does not, and anything unrecognized retries.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use strata_core::ProviderError;

use crate::error::{CatalogError, CatalogResult};
use crate::metrics;

const ACCESS_DENIED_PATTERNS: &[&str] = &[
    "Access Denied",
    "This request is not authorized to perform this operation",
    "Forbidden",
];

const BACKOFF_FACTOR: u32 = 4;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Delay ceiling.
    pub max: Duration,
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base
            .saturating_mul(BACKOFF_FACTOR.saturating_pow(exponent))
            .min(self.max)
    }
}

/// Decides whether a failed metadata read should be attempted again.
#[must_use]
pub fn should_retry(err: &CatalogError) -> bool {
    if err.is_permanent() {
        return false;
    }
    let root = root_cause(err);
    if let Some(provider) = root.downcast_ref::<ProviderError>() {
        if provider.retryable {
            return true;
        }
        if matches!(provider.status, Some(401 | 403)) {
            return false;
        }
    }
    let message = root.to_string();
    !ACCESS_DENIED_PATTERNS.iter().any(|p| message.contains(p))
}

fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}

/// Runs `op` until it succeeds, fails permanently, or `max_attempts` is
/// reached. The last error is returned unchanged.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_read<T, F, Fut>(max_attempts: u32, backoff: Backoff, mut op: F) -> CatalogResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CatalogResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && should_retry(&err) => {
                metrics::record_refresh_retry();
                tracing::warn!(attempt, error = %err, "metadata read failed; retrying");
                tokio::time::sleep(backoff.delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
