//! Reusable exponential-backoff-with-jitter wrapper around any bus call.
//!
//! Not a method on the client — any `Future`-returning closure can be
//! wrapped, so toolbox/journal code can retry bus pushes the same way the
//! scheduler retries its reads.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::BusError;

/// Retries `op` up to `max_attempts` times on [`BusError::Transient`],
/// sleeping `base * 2^attempt` seconds plus up to `base` seconds of jitter
/// between attempts. [`BusError::Permanent`] is never retried.
pub async fn with_retry<T, F, Fut>(
    base: Duration,
    max_attempts: u32,
    mut op: F,
) -> Result<T, BusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BusError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(BusError::Permanent(msg)) => return Err(BusError::Permanent(msg)),
            Err(err @ BusError::Transient(_)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(attempt, max_attempts, %err, "bus call exhausted retries");
                    return Err(err);
                }
                let backoff = base.mul_f64(2f64.powi(attempt as i32 - 1));
                let jitter = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..base.as_secs_f64().max(0.001)));
                warn!(attempt, max_attempts, %err, delay_ms = (backoff + jitter).as_millis(), "retrying bus call");
                tokio::time::sleep(backoff + jitter).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_ok() {
        let calls = AtomicU32::new(0);
        let result = with_retry(Duration::from_millis(1), 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BusError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(Duration::from_millis(1), 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BusError::Transient("connection refused".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_permanent() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, BusError> = with_retry(Duration::from_millis(1), 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BusError::Permanent("auth failure".into())) }
        })
        .await;
        assert!(matches!(result, Err(BusError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, BusError> = with_retry(Duration::from_millis(1), 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BusError::Transient("timeout".into())) }
        })
        .await;
        assert!(matches!(result, Err(BusError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
