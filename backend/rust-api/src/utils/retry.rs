use rand::Rng;
use std::fmt::Display;
use std::time::Duration;

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based), without jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn jitter(&self) -> Duration {
        match self.jitter_max {
            Some(max) if !max.is_zero() => {
                Duration::from_millis(rand::rng().random_range(0..=max.as_millis() as u64))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Runs `f` until it succeeds or `max_attempts` calls have failed, returning
/// the last error.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let wait = config.backoff(attempt as u32) + config.jitter();
                tracing::warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);

        let res: Result<usize, &'static str> = retry_async_with_config(quick(3), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> = retry_async_with_config(quick(2), || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fail")
        })
        .await;

        assert_eq!(res, Err("always fail"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let config = quick(5);
        assert_eq!(config.backoff(1), Duration::from_millis(1));
        assert_eq!(config.backoff(3), Duration::from_millis(4));
        assert_eq!(config.backoff(10), Duration::from_millis(10));
    }
}
