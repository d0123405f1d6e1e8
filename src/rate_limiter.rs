//! Per-engine request pacing with overload cooldowns
//!
//! The [`RateLimiter`] hands out request slots one at a time per engine. Callers
//! queue on a fair async mutex, so slots are assigned in strict arrival order even
//! when many workers call [`acquire`](RateLimiter::acquire) at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::types::EngineId;

/// Slowest accepted request rate (one request every 1000 seconds)
pub const MIN_MAX_PER_SECOND: f64 = 1e-3;

/// True if `max_per_second` is a usable request rate
pub fn is_valid_rate(max_per_second: f64) -> bool {
    max_per_second.is_finite() && max_per_second >= MIN_MAX_PER_SECOND
}

/// Scheduling state for one engine
struct EngineSlot {
    /// Time the last slot was handed out; the async lock doubles as the FIFO queue
    last_request: tokio::sync::Mutex<Option<Instant>>,
    /// End of the current cooldown window (None = not cooling down)
    cooldown_until: Mutex<Option<Instant>>,
    /// Requests per second as f64 bits
    max_per_second: AtomicU64,
}

impl EngineSlot {
    fn new(max_per_second: f64) -> Self {
        Self {
            last_request: tokio::sync::Mutex::new(None),
            cooldown_until: Mutex::new(None),
            max_per_second: AtomicU64::new(max_per_second.to_bits()),
        }
    }

    fn min_interval(&self) -> Duration {
        let rate = f64::from_bits(self.max_per_second.load(Ordering::Relaxed));
        if rate > 0.0 && rate.is_finite() {
            // at most 1000s, always representable
            Duration::from_secs_f64(1.0 / rate.max(MIN_MAX_PER_SECOND))
        } else {
            Duration::ZERO
        }
    }

    /// End of the cooldown if it is still in the future; clears an elapsed one
    fn active_cooldown(&self, now: Instant) -> Option<Instant> {
        let mut cooldown = self
            .cooldown_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *cooldown {
            Some(until) if until > now => Some(until),
            Some(_) => {
                *cooldown = None;
                None
            }
            None => None,
        }
    }

    /// Extend the cooldown to `until`, never shortening it
    fn extend_cooldown(&self, until: Instant) -> Instant {
        let mut cooldown = self
            .cooldown_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let extended = match *cooldown {
            Some(existing) if existing >= until => existing,
            _ => until,
        };
        *cooldown = Some(extended);
        extended
    }
}

/// Rate limiter shared by every request for every engine
///
/// Cloning is cheap; clones share state.
///
/// # Algorithm
///
/// Each engine has its own slot queue. An `acquire`:
/// - waits out any active cooldown (re-checking, since the cooldown may be extended
///   while waiting), then proceeds immediately;
/// - otherwise waits the remainder of `1 / max_per_second` since the previous slot.
///
/// The slot is stamped with the time it was handed out, so at most
/// `max_per_second` requests per second leave for any one engine.
#[derive(Clone)]
pub struct RateLimiter {
    engines: Arc<Mutex<HashMap<EngineId, Arc<EngineSlot>>>>,
    config: Arc<RateLimitConfig>,
}

impl RateLimiter {
    /// Create a limiter from configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_translator::config::RateLimitConfig;
    /// use batch_translator::rate_limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(RateLimitConfig::default());
    /// ```
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            engines: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    fn slot(&self, engine: &EngineId) -> Arc<EngineSlot> {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            engines
                .entry(engine.clone())
                .or_insert_with(|| Arc::new(EngineSlot::new(self.config.max_per_second(engine)))),
        )
    }

    /// Wait until one request may be issued for `engine`
    ///
    /// Concurrent callers for the same engine are served in arrival order.
    pub async fn acquire(&self, engine: &EngineId) {
        let slot = self.slot(engine);
        let mut last_request = slot.last_request.lock().await;

        let mut cooled_down = false;
        while let Some(until) = slot.active_cooldown(Instant::now()) {
            tracing::debug!(
                engine = %engine,
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis(),
                "Waiting for engine cooldown"
            );
            sleep_until(until).await;
            cooled_down = true;
        }

        if !cooled_down {
            if let Some(previous) = *last_request {
                let next = previous + slot.min_interval();
                if next > Instant::now() {
                    sleep_until(next).await;
                }
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Record that `engine` signalled overload
    ///
    /// The cooldown becomes `now + max(retry_after, default_cooldown)` unless an
    /// existing cooldown already ends later. Returns the remaining cooldown.
    pub fn report_overload(&self, engine: &EngineId, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after
            .unwrap_or_default()
            .max(self.config.default_cooldown);
        let now = Instant::now();
        let until = self.slot(engine).extend_cooldown(now + wait);
        let remaining = until.saturating_duration_since(now);

        tracing::warn!(
            engine = %engine,
            cooldown_ms = remaining.as_millis(),
            "Engine signalled overload, pausing requests"
        );
        remaining
    }

    /// Remaining cooldown for `engine`, if any
    pub fn cooldown_remaining(&self, engine: &EngineId) -> Option<Duration> {
        let now = Instant::now();
        self.slot(engine)
            .active_cooldown(now)
            .map(|until| until.saturating_duration_since(now))
    }

    /// Change the request rate for `engine`
    ///
    /// Takes effect from the next slot handed out. Rates below
    /// [`MIN_MAX_PER_SECOND`] or non-finite rates are rejected and leave the
    /// current rate in place.
    pub fn set_max_per_second(&self, engine: &EngineId, max_per_second: f64) -> Result<()> {
        if !is_valid_rate(max_per_second) {
            return Err(Error::config(
                format!("requests per second for engine {engine} must be a finite value of at least {MIN_MAX_PER_SECOND}"),
                "max_per_second",
            ));
        }
        self.slot(engine)
            .max_per_second
            .store(max_per_second.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Forget all pacing and cooldown state for `engine`
    pub fn clear(&self, engine: &EngineId) {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        engines.remove(engine);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_per_second: f64, cooldown: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            default_max_per_second: max_per_second,
            per_engine: HashMap::new(),
            default_cooldown: cooldown,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = limiter(2.0, Duration::from_secs(5));
        let engine = EngineId::new("openai");

        let start = Instant::now();
        limiter.acquire(&engine).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn k_requests_take_at_least_k_minus_one_intervals() {
        let limiter = limiter(4.0, Duration::from_secs(5));
        let engine = EngineId::new("openai");
        let k = 9;

        let mut handles = Vec::new();
        for _ in 0..k {
            let limiter = limiter.clone();
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&engine).await;
                Instant::now()
            }));
        }

        let mut resolved = Vec::new();
        for handle in handles {
            resolved.push(handle.await.unwrap());
        }
        resolved.sort();

        let span = *resolved.last().unwrap() - resolved[0];
        // (K-1)/N = 8/4 = 2 seconds
        assert!(span >= Duration::from_secs(2), "span was {span:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn engines_are_paced_independently() {
        let limiter = limiter(1.0, Duration::from_secs(5));
        let a = EngineId::new("a");
        let b = EngineId::new("b");

        limiter.acquire(&a).await;
        let start = Instant::now();
        limiter.acquire(&b).await;
        assert_eq!(start.elapsed(), Duration::ZERO, "b must not wait for a's slot");
    }

    #[tokio::test(start_paused = true)]
    async fn slots_are_assigned_in_arrival_order() {
        let limiter = limiter(10.0, Duration::from_secs(5));
        let engine = EngineId::new("openai");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for n in 0..6 {
            let limiter = limiter.clone();
            let engine = engine.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&engine).await;
                tx.send(n).unwrap();
            }));
            // let the task reach the queue before the next one is spawned
            tokio::task::yield_now().await;
        }
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(n) = rx.recv().await {
            order.push(n);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_out_reported_cooldown() {
        let limiter = limiter(100.0, Duration::from_secs(1));
        let engine = EngineId::new("openai");

        limiter.report_overload(&engine, Some(Duration::from_secs(5)));

        let start = Instant::now();
        limiter.acquire(&engine).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(limiter.cooldown_remaining(&engine).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn smaller_overload_does_not_shorten_cooldown() {
        let limiter = limiter(100.0, Duration::from_millis(500));
        let engine = EngineId::new("openai");

        limiter.report_overload(&engine, Some(Duration::from_secs(5)));
        let remaining = limiter.report_overload(&engine, Some(Duration::from_secs(1)));
        assert_eq!(remaining, Duration::from_secs(5));

        let start = Instant::now();
        limiter.acquire(&engine).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn overload_uses_default_cooldown_as_floor() {
        let limiter = limiter(100.0, Duration::from_secs(3));
        let engine = EngineId::new("openai");

        let remaining = limiter.report_overload(&engine, Some(Duration::from_secs(1)));
        assert_eq!(remaining, Duration::from_secs(3));

        let remaining = limiter.report_overload(&engine, None);
        assert_eq!(remaining, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_extended_while_waiting_is_honoured() {
        let limiter = limiter(100.0, Duration::from_secs(1));
        let engine = EngineId::new("openai");
        limiter.report_overload(&engine, Some(Duration::from_secs(2)));

        let waiter = {
            let limiter = limiter.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                limiter.acquire(&engine).await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        limiter.report_overload(&engine, Some(Duration::from_secs(4)));

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_secs(5), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_cooldown() {
        let limiter = limiter(1.0, Duration::from_secs(10));
        let engine = EngineId::new("openai");
        limiter.report_overload(&engine, None);

        limiter.clear(&engine);

        let start = Instant::now();
        limiter.acquire(&engine).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn set_max_per_second_changes_interval() {
        let limiter = limiter(1.0, Duration::from_secs(5));
        let engine = EngineId::new("openai");
        limiter.set_max_per_second(&engine, 10.0).unwrap();

        limiter.acquire(&engine).await;
        let start = Instant::now();
        limiter.acquire(&engine).await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(99) && waited < Duration::from_millis(200),
            "waited {waited:?}"
        );
    }

    #[test]
    fn set_max_per_second_rejects_unusable_rates() {
        let limiter = limiter(1.0, Duration::from_secs(5));
        let engine = EngineId::new("openai");

        assert!(limiter.set_max_per_second(&engine, 1e-30).is_err());
        assert!(limiter.set_max_per_second(&engine, f64::NAN).is_err());
        assert!(limiter.set_max_per_second(&engine, f64::INFINITY).is_err());
        assert!(limiter.set_max_per_second(&engine, 0.0).is_err());
        assert!(limiter.set_max_per_second(&engine, MIN_MAX_PER_SECOND).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_configured_rate_is_clamped_not_a_panic() {
        let limiter = limiter(1e-30, Duration::from_secs(5));
        let engine = EngineId::new("openai");

        limiter.acquire(&engine).await;
        let start = Instant::now();
        limiter.acquire(&engine).await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_secs(1000) && waited < Duration::from_secs(1001),
            "waited {waited:?}"
        );
    }
}
