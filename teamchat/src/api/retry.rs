//! Bounded retry with multiplicative backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// How often and how patiently to retry a failing operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        self.base_delay.mul_f64(factor)
    }

    /// Every delay the policy would wait, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|retry| self.delay_for(retry))
    }
}

/// Waits between attempts. Swappable so tests never touch real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` until it succeeds or the policy's retries are spent.
///
/// `op` receives the 0-based attempt number. Every `Err` is treated as
/// transient; callers map application-level failures into `Ok` so they are
/// not retried.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "attempt failed, retrying"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records requested delays instead of sleeping.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingSleeper {
        pub delays: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        pub fn recorded(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn delays_grow_multiplicatively() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            [
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
            ]
        );
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), String> =
            retry_with_backoff(&RetryPolicy::default(), &sleeper, |_| {
                calls += 1;
                async { Err("connection refused".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 4);
        assert_eq!(sleeper.recorded().len(), 3);
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let sleeper = RecordingSleeper::default();
        let result: Result<u32, String> =
            retry_with_backoff(&RetryPolicy::default(), &sleeper, |attempt| async move {
                if attempt < 2 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(
            sleeper.recorded(),
            [Duration::from_millis(1000), Duration::from_millis(1500)]
        );
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let _: Result<(), &str> = retry_with_backoff(&policy, &sleeper, |_| {
            calls += 1;
            async { Err("down") }
        })
        .await;
        assert_eq!(calls, 1);
        assert!(sleeper.recorded().is_empty());
    }
}
