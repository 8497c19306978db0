//! Fixed-delay retry primitive
//!
//! One retry helper shared by every call site that needs it (reconnect
//! scheduling, background persistence reconciliation) instead of ad-hoc
//! loops scattered through the codebase.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Run `op` up to `attempts` times with a fixed `delay` between failures.
/// Returns the first success, or the final error.
pub async fn retry_fixed<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut last_attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if last_attempt < attempts => {
                warn!(
                    what,
                    attempt = last_attempt,
                    error = %e,
                    "Operation failed, retrying after fixed delay"
                );
                sleep(delay).await;
                last_attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
