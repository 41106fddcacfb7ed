//! Bounded retry with exponential backoff for the collaborator calls
//! (intermediary HTTP, EVM/Bitcoin RPC) this crate treats as unreliable.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Backoff schedule for [`try_with_retries`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to the backoff delay.
    pub max_delay: Duration,
    /// Total attempts, including the first (non-retry) one.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

/// Run `op` until it succeeds, `classify` declares the error non-retryable,
/// or `retry.max_attempts` is exhausted.
///
/// `classify` defaults to [`Error::is_retryable`] at call sites that don't
/// need a narrower policy.
pub async fn try_with_retries<T, F, Fut>(
    retry: &RetryConfig,
    classify: impl Fn(&Error) -> bool,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= retry.max_attempts || !classify(&e) {
                    return Err(e);
                }
                let exp = 2u32.saturating_pow((attempt - 1).min(10));
                let delay = retry.base_delay.saturating_mul(exp).min(retry.max_delay);
                log::debug!(
                    "retrying after {delay:?} (attempt {attempt}/{}): {e}",
                    retry.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let retry = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
        };
        let result = try_with_retries(&retry, Error::is_retryable, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Network("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let retry = RetryConfig::default();
        let result: Result<(), Error> = try_with_retries(&retry, Error::is_retryable, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::SignatureVerification("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let retry = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = try_with_retries(&retry, Error::is_retryable, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
