//! Retry logic with exponential backoff
//!
//! Every attempt first takes a slot from the [`RateLimiter`], so retries obey the
//! same per-engine pacing and cooldowns as first attempts. Auth failures and
//! cancellation are never retried.
//!
//! # Example
//!
//! ```no_run
//! use batch_translator::config::{RateLimitConfig, RetryConfig};
//! use batch_translator::rate_limiter::RateLimiter;
//! use batch_translator::retry::{RetryPolicy, with_retry};
//! use batch_translator::types::EngineId;
//!
//! # async fn example() -> batch_translator::Result<()> {
//! let config = RetryConfig::default();
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! let engine = EngineId::new("openai");
//! let policy = RetryPolicy::new(&config, 3, &limiter, &engine);
//!
//! let text = with_retry(&policy, || async {
//!     // Your provider call here
//!     Ok::<_, batch_translator::Error>("Bonjour".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use crate::rate_limiter::RateLimiter;
use crate::types::{EngineId, Event};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, connection resets, malformed responses)
/// should return `true`. Permanent failures (bad credentials, cancellation) should
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns true if the provider signalled overload
    fn is_overload(&self) -> bool {
        false
    }

    /// Provider-suggested wait before the next request
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        if self.is_auth_failure() {
            return false;
        }
        match self {
            Error::Cancelled => false,
            Error::UnknownEngine(_) | Error::Config { .. } => false,
            Error::Auth { .. } => false,
            Error::RateLimited { .. }
            | Error::Timeout(_)
            | Error::Network(_)
            | Error::Provider { .. }
            | Error::Protocol(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Other(_) => true,
        }
    }

    fn is_overload(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Everything a retried request needs besides the operation itself
pub struct RetryPolicy<'a> {
    /// Backoff shape
    pub config: &'a RetryConfig,
    /// Total attempts (at least one is always made)
    pub attempts: u32,
    /// Limiter consulted before every attempt
    pub limiter: &'a RateLimiter,
    /// Engine the requests go to
    pub engine: &'a EngineId,
    /// Where overload cooldowns are announced
    pub event_tx: Option<&'a broadcast::Sender<Event>>,
}

impl<'a> RetryPolicy<'a> {
    /// Create a policy without event reporting
    pub fn new(
        config: &'a RetryConfig,
        attempts: u32,
        limiter: &'a RateLimiter,
        engine: &'a EngineId,
    ) -> Self {
        Self {
            config,
            attempts,
            limiter,
            engine,
            event_tx: None,
        }
    }

    /// Announce cooldowns on `event_tx`
    #[must_use]
    pub fn with_events(mut self, event_tx: &'a broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }
}

/// Execute an async operation with rate limiting and exponential backoff
///
/// Attempt `n` (0-indexed) that fails with a retryable error is followed by a
/// wait of `initial_delay * backoff_multiplier^n`, capped at `max_delay`.
/// Overload errors additionally put the engine into cooldown.
///
/// # Returns
///
/// Returns the first success, the first non-retryable error, or the last error
/// once all attempts are used.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy<'_>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        policy.limiter.acquire(policy.engine).await;

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        engine = %policy.engine,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if e.is_overload() {
                    let cooldown = policy.limiter.report_overload(policy.engine, e.retry_after());
                    if let Some(tx) = policy.event_tx {
                        tx.send(Event::Overloaded {
                            engine: policy.engine.clone(),
                            cooldown_ms: cooldown.as_millis() as u64,
                        })
                        .ok();
                    }
                }

                if e.is_retryable() && attempt + 1 < attempts {
                    let delay = backoff_delay(policy.config, attempt);
                    attempt += 1;

                    tracing::warn!(
                        engine = %policy.engine,
                        error = %e,
                        attempt = attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis(),
                        "Operation failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    continue;
                }

                if e.is_retryable() {
                    tracing::error!(
                        engine = %policy.engine,
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        engine = %policy.engine,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Delay after the failed attempt `attempt` (0-indexed)
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    // try_from rejects values too large for a Duration as well as NaN
    let delay = Duration::try_from_secs_f64(secs)
        .map_or(config.max_delay, |delay| delay.min(config.max_delay));

    if config.jitter { add_jitter(delay) } else { delay }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
        Overloaded(Option<Duration>),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
                TestError::Overloaded(_) => write!(f, "overloaded"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Permanent)
        }

        fn is_overload(&self) -> bool {
            matches!(self, TestError::Overloaded(_))
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                TestError::Overloaded(after) => *after,
                _ => None,
            }
        }
    }

    fn fast_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            default_max_per_second: 1000.0,
            per_engine: HashMap::new(),
            default_cooldown: Duration::from_secs(2),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_no_retry() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 3, &limiter, &engine);
        let counter = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_succeed() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 5, &limiter, &engine);
        let counter = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, || {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 3, &limiter, &engine);
        let counter = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "should make exactly 3 attempts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_no_retry() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 10, &limiter, &engine);
        let counter = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should not retry permanent error");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_calls_once() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 0, &limiter, &engine);
        let counter = Arc::new(AtomicU32::new(0));

        let _ = with_retry(&policy, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_from_one_second() {
        let config = RetryConfig::default();
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let policy = RetryPolicy::new(&config, 4, &limiter, &engine);
        let timestamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let _ = with_retry(&policy, || {
            let timestamps = timestamps.clone();
            async move {
                timestamps.lock().unwrap().push(Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().unwrap();
        assert_eq!(ts.len(), 4);
        let gaps: Vec<Duration> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_secs(1), "gaps: {gaps:?}");
        assert!(gaps[1] >= Duration::from_secs(2), "gaps: {gaps:?}");
        assert!(gaps[2] >= Duration::from_secs(4), "gaps: {gaps:?}");
        assert!(gaps[2] < Duration::from_secs(5), "gaps: {gaps:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn overload_reports_cooldown_and_emits_event() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let limiter = fast_limiter();
        let engine = EngineId::new("e");
        let (tx, mut rx) = broadcast::channel(16);
        let policy = RetryPolicy::new(&config, 2, &limiter, &engine).with_events(&tx);
        let timestamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = with_retry(&policy, || {
            let timestamps = timestamps.clone();
            async move {
                let mut ts = timestamps.lock().unwrap();
                ts.push(Instant::now());
                if ts.len() == 1 {
                    Err(TestError::Overloaded(Some(Duration::from_secs(7))))
                } else {
                    Ok(1)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        let ts = timestamps.lock().unwrap();
        assert!(
            ts[1] - ts[0] >= Duration::from_secs(7),
            "second attempt must wait for the cooldown"
        );

        match rx.try_recv().unwrap() {
            Event::Overloaded { engine, cooldown_ms } => {
                assert_eq!(engine.as_str(), "e");
                assert_eq!(cooldown_ms, 7000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn backoff_delay_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 1000), Duration::from_secs(10));
    }

    #[test]
    fn backoff_delay_with_steep_multiplier_does_not_overflow() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 1e3,
            jitter: false,
        };
        // 1000^8 seconds does not fit in a Duration
        assert_eq!(backoff_delay(&config, 8), Duration::from_secs(300));

        let uncapped = RetryConfig {
            max_delay: Duration::MAX,
            jitter: true,
            ..config
        };
        assert_eq!(backoff_delay(&uncapped, 8), Duration::MAX);
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?} < {delay:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?} > 2x");
        }
    }

    #[test]
    fn error_classification() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            !Error::Auth {
                engine: "e".into(),
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::Provider {
                status: 401,
                message: "Unauthorized".into()
            }
            .is_retryable()
        );
        assert!(!Error::Other("Invalid API key".into()).is_retryable());
        assert!(!Error::UnknownEngine("x".into()).is_retryable());

        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(Error::Protocol("short".into()).is_retryable());
        assert!(
            Error::Provider {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );

        let throttled = Error::RateLimited {
            engine: "e".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(throttled.is_retryable());
        assert!(throttled.is_overload());
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(3)));
    }
}
