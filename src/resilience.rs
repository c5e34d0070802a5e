//! Resilience utilities: retry policy, rate limiting, bulkheads.
//!
//! - [`RetryPolicy`]: exponential backoff for transient transport failures
//! - [`RateLimiter`]: token bucket shared by every sender
//! - [`Bulkhead`]: semaphore bounding concurrent subscription workers
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> replication_relay::error::Result<()> {
//! use replication_relay::resilience::RetryPolicy;
//! use replication_relay::error::TransportError;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let value = policy
//!     .execute(|| async { Ok::<_, TransportError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::config::{RateLimitSettings, RetrySettings};
use crate::error::{ReplicationError, Result, TransportError, TransportResult};
use crate::metrics;
use crate::sanitize::sanitize_log_message;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn};

// =============================================================================
// Retry
// =============================================================================

/// Retry wrapper for broker calls.
///
/// Only transient transport errors are retried. Anything else propagates on
/// first occurrence as [`ReplicationError::Transport`], untouched.
///
/// # Backoff Schedule (base 1s, 4 attempts)
///
/// ```text
/// Attempt  Wait before next
/// -------  ----------------
/// 1        1s
/// 2        2s
/// 3        4s
/// 4        (gives up)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Wait after the first failure; doubles each time. No cap, no jitter.
    pub base_delay: Duration,

    /// Bound on each individual attempt. Elapsing counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay(),
            attempt_timeout: settings.attempt_timeout(),
        }
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Wait after the failure of attempt `attempt_index` (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 2f64.powi(attempt_index.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the
    /// attempts run out.
    ///
    /// Each retry logs a warning at medium severity; exhaustion logs one
    /// error at high severity and returns [`ReplicationError::RetriesExhausted`]
    /// wrapping the last failure.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt_index in 0..max_attempts {
            let attempt = attempt_index + 1;
            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::service_request(format!(
                    "attempt timed out after {}",
                    humantime::format_duration(self.attempt_timeout)
                ))),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(ReplicationError::Transport(e)),
                Err(e) => e,
            };

            if attempt == max_attempts {
                error!(
                    attempts = max_attempts,
                    error_type = err.kind.as_str(),
                    error_message = %sanitize_log_message(&err.message),
                    alert_severity = "high",
                    "Operation failed after {} attempts",
                    max_attempts
                );
                metrics::record_retries_exhausted(err.kind.as_str());
                return Err(ReplicationError::RetriesExhausted {
                    attempts: max_attempts,
                    source: err,
                });
            }

            let delay = self.delay_for_attempt(attempt_index);
            warn!(
                attempt,
                max_attempts,
                delay_seconds = delay.as_secs_f64(),
                error_type = err.kind.as_str(),
                error_message = %sanitize_log_message(&err.message),
                alert_severity = "medium",
                "Transient failure, retrying"
            );
            metrics::record_retry(err.kind.as_str());
            tokio::time::sleep(delay).await;
        }

        Err(ReplicationError::Internal(
            "retry loop ended without an outcome".to_string(),
        ))
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Token bucket rate limiter for destination sends.
///
/// Thread-safe and async-aware; one instance is shared by every worker.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(settings.per_sec).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(settings.burst).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
            settings,
        }
    }

    /// Wait for a permit. Cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Returns `false` when over the limit.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .finish()
    }
}

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when bulkhead is closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    pub max_concurrent: usize,
}

/// Limits how many subscription workers run at once.
///
/// A permit releases its slot when dropped.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Returns `None` if the bulkhead is full.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_full(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Stop handing out permits; waiters get [`BulkheadFull`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_is_pure_exponential() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1024));
    }

    #[test]
    fn test_delay_fractional_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>("done") }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let result = policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TransportError::broker("server busy", Some(503)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::service_request("connection reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let text = err.to_string();
        assert!(text.contains('3') && text.contains("failed"), "{text}");
        match err {
            ReplicationError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind, TransportErrorKind::ServiceRequest);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::authentication("unauthorized")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            ReplicationError::Transport(TransportError { kind: TransportErrorKind::Authentication, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(100));
        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, TransportError>(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            err.transport().map(|t| t.kind),
            Some(TransportErrorKind::ServiceRequest)
        );
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let _ = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>(()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_rate_limiter_burst() {
        let limiter = RateLimiter::new(RateLimitSettings { per_sec: 1, burst: 3 });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_rate_limiter_zero_values_clamped() {
        let limiter = RateLimiter::new(RateLimitSettings { per_sec: 0, burst: 0 });
        limiter.acquire().await;
        assert_eq!(limiter.settings().burst, 0);
    }

    #[tokio::test]
    async fn test_bulkhead_limits_concurrency() {
        let bulkhead = Bulkhead::new(2);
        let p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.try_acquire().unwrap();
        assert!(bulkhead.is_full());
        assert!(bulkhead.try_acquire().is_none());

        drop(p1);
        assert_eq!(bulkhead.available(), 1);
    }

    #[tokio::test]
    async fn test_bulkhead_closed() {
        let bulkhead = Bulkhead::new(1);
        bulkhead.close();
        let err = bulkhead.acquire().await.unwrap_err();
        assert_eq!(err.max_concurrent, 1);
    }

    #[test]
    fn test_bulkhead_zero_clamped() {
        assert_eq!(Bulkhead::new(0).max_concurrent(), 1);
    }
}
