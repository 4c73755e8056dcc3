//! Bounded retry for remote operations.
//!
//! Every network-facing call goes through this wrapper: on failure, wait a
//! fixed interval and try again, up to a bounded number of attempts. The
//! final error is returned exactly as the operation produced it so callers
//! can still match on the error type.

use std::fmt;
use std::time::Duration;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Retry `op` with the default policy (3 attempts, 1 s apart).
pub async fn retry<T, E, F, Fut>(op: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with(op, DEFAULT_ATTEMPTS, DEFAULT_INTERVAL).await
}

/// Retry `op` up to `attempts` total calls, sleeping `interval` between
/// them. Each failure is logged with the full error detail; after the last
/// attempt the original error propagates unmodified.
pub async fn retry_with<T, E, F, Fut>(mut op: F, attempts: u32, interval: Duration) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts {
                    eprintln!("    Failed {} attempts; giving up", attempts);
                    return Err(err);
                }
                eprintln!("    Warning: attempt {} failed, retrying: {}", attempt, err);
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
        }
    }
}
