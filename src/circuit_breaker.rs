//! Per-destination circuit breakers.
//!
//! Stops hammering a destination topic that keeps failing. Each send
//! attempt runs through the circuit *inside* the retry loop, so a rejection
//! is just another transient failure and backoff still applies.
//!
//! # States
//!
//! - **Closed**: sends pass through
//! - **Open**: failure rate over the window exceeded, sends fail fast
//! - **HalfOpen**: after `open_wait`, a few trial sends decide recovery
//!
//! # Usage
//!
//! ```rust,no_run
//! # use replication_relay::circuit_breaker::{CircuitError, DestinationCircuits};
//! # use replication_relay::config::CircuitBreakerSettings;
//! # async fn example() {
//! let circuits = DestinationCircuits::new(CircuitBreakerSettings::default());
//! let circuit = circuits.get("orders");
//! match circuit.call(|| async { Ok::<(), String>(()) }).await {
//!     Ok(()) => {}
//!     Err(CircuitError::Rejected) => { /* destination unhealthy, back off */ }
//!     Err(CircuitError::Inner(_e)) => { /* send failed */ }
//! }
//! # }
//! ```

use crate::config::CircuitBreakerSettings;
use crate::metrics;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Error type for circuit-protected operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit breaker open, request rejected")]
    Rejected,

    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Rejected)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Rejected => None,
        }
    }
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

/// A named circuit breaker with call counters.
///
/// When built from disabled settings every call passes straight through.
pub struct CircuitBreaker {
    name: String,
    inner: Option<AsyncRecloser>,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        let inner: Option<AsyncRecloser> = settings.enabled.then(|| {
            Recloser::custom()
                .error_rate(settings.failure_rate.clamp(0.0, 1.0))
                .closed_len(settings.window.max(1))
                .half_open_len(settings.half_open_calls.max(1))
                .open_wait(settings.open_wait())
                .build()
                .into()
        });

        Self {
            name: name.into(),
            inner,
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an async operation through the circuit breaker.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let outcome = match &self.inner {
            Some(recloser) => recloser.call(f()).await,
            None => f().await.map_err(RecloserError::Inner),
        };

        match outcome {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_rejection(&self.name);
                warn!(circuit = %self.name, "Circuit breaker rejected send (open)");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_call(&self.name, "failure");
                debug!(circuit = %self.name, "Circuit call failed");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Failures over all calls (0.0 - 1.0).
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

/// Lazily created circuit per destination topic.
pub struct DestinationCircuits {
    settings: CircuitBreakerSettings,
    circuits: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl DestinationCircuits {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Circuit for `destination`, created on first use.
    pub fn get(&self, destination: &str) -> Arc<CircuitBreaker> {
        let mut circuits = self.circuits.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            circuits
                .entry(destination.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(destination, &self.settings))),
        )
    }

    /// Total rejections across every destination.
    pub fn total_rejections(&self) -> u64 {
        self.circuits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.rejections())
            .sum()
    }
}
