//! Bounded polling and retry with backoff.
//!
//! Every wait on an external system goes through [`poll_until`], which
//! enforces an interval, optional exponential backoff, a timeout and a
//! cancellation token. Exceeding the timeout yields
//! [`MigrationError::Timeout`] instead of stalling the run.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{MigrationError, Result};

/// Configuration for polling and retry behavior.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second probe.
    pub interval: Duration,
    /// Maximum delay cap.
    pub max_interval: Duration,
    /// Exponential base applied per attempt (1.0 keeps a fixed interval).
    pub backoff: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
    /// Give up after this much time. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            backoff: 1.0,
            jitter: false,
            timeout: None,
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: f64) -> Self {
        self.backoff = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Calculate the delay after a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff.max(1.0).powi(attempt as i32);
        let delay_secs = self.interval.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_interval.as_secs_f64().max(self.interval.as_secs_f64()));

        let final_secs = if self.jitter {
            // Factor in [0.5, 1.5) keeps the mean delay and never approaches zero
            let mut rng = rand::rng();
            let jitter_factor = rng.random_range(0.5..1.5);
            capped_secs * jitter_factor
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Probe `probe` until it yields a value, the timeout passes, or `cancel` fires.
///
/// The probe returns `Ok(Some(value))` when the awaited condition holds and
/// `Ok(None)` to keep waiting. Retryable errors (transient network/API
/// failures) are logged and the poll continues; any other error is returned
/// immediately.
pub async fn poll_until<T, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    what: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        cancel.check()?;

        match probe().await {
            Ok(Some(value)) => {
                debug!("{} ready after {} probes", what, attempt + 1);
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!("Transient error while waiting for {}: {}", what, e);
            }
            Err(e) => return Err(e),
        }

        let delay = config.calculate_delay(attempt);
        if let Some(timeout) = config.timeout {
            let elapsed = started.elapsed();
            if elapsed + delay > timeout {
                return Err(MigrationError::Timeout {
                    what: what.to_string(),
                    elapsed,
                });
            }
        }

        cancel.sleep(delay).await?;
        attempt += 1;
    }
}

/// Retry an async operation up to `max_attempts` times with backoff.
pub async fn retry_async<F, Fut, T, E>(
    config: &PollConfig,
    max_attempts: u32,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(&e) || attempt + 1 >= max_attempts.max(1) {
                    return Err(e);
                }
                let delay = config.calculate_delay(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fixed_interval_by_default() {
        let config = PollConfig::new().with_interval(Duration::from_secs(10));
        assert_eq!(config.calculate_delay(0), Duration::from_secs(10));
        assert_eq!(config.calculate_delay(5), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let config = PollConfig::new()
            .with_interval(Duration::from_secs(10))
            .with_max_interval(Duration::from_secs(30))
            .with_backoff(2.0);

        assert_eq!(config.calculate_delay(0), Duration::from_secs(10));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(20));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let config = PollConfig::new()
            .with_interval(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let config = PollConfig::new().with_interval(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let probes = Arc::new(AtomicU32::new(0));

        let counter = probes.clone();
        let value = poll_until(&config, &cancel, "transfer", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(if n >= 2 { Some(n) } else { None })
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let config = PollConfig::new()
            .with_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(35));
        let cancel = CancellationToken::new();

        let result: Result<()> =
            poll_until(&config, &cancel, "transfer", || async { Ok(None) }).await;

        match result {
            Err(MigrationError::Timeout { what, elapsed }) => {
                assert_eq!(what, "transfer");
                assert!(elapsed <= Duration::from_secs(35));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_honours_cancellation() {
        let config = PollConfig::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> =
            poll_until(&config, &cancel, "transfer", || async { Ok(None) }).await;
        assert!(matches!(result, Err(MigrationError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_a_long_interval() {
        let config = PollConfig::new().with_interval(Duration::from_secs(600));
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        let start = Instant::now();

        let waiter = tokio::spawn(async move {
            let result: Result<()> =
                poll_until(&config, &cancel, "transfer", || async { Ok(None) }).await;
            result
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        on_signal.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(MigrationError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_propagates_hard_errors() {
        let config = PollConfig::new();
        let cancel = CancellationToken::new();

        let result: Result<()> = poll_until(&config, &cancel, "transfer", || async {
            Err(MigrationError::lookup("relationship", "svm:vol"))
        })
        .await;
        assert!(matches!(result, Err(MigrationError::Lookup { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let config = PollConfig::new().with_interval(Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_async(
            &config,
            3,
            || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("temporary failure".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_non_retryable_error() {
        let config = PollConfig::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: std::result::Result<i32, String> = retry_async(
            &config,
            3,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("permanent failure".to_string())
                }
            },
            |e: &String| !e.contains("permanent"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
