//! # Circuit breaker with compounding open timeouts.
//!
//! [`CircuitBreaker`] wraps fallible async operations and stops calling them
//! once they keep failing, giving the downstream time to recover.
//!
//! ## State machine
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ───────────────────────────────────────────► Open
//!     ▲                                                  │
//!     │ success_threshold                                │ current_timeout elapsed
//!     │ probe successes                                  │ since last failure
//!     │ (reset: counters, timeout = base)                ▼
//!     └──────────────────────────────────────────────  HalfOpen
//!                                                        │
//!                          any probe failure ◄───────────┘
//!                          (re-trip: timeout × factor, capped)
//! ```
//!
//! ## Rules
//! - **One lock**: every state transition happens under a single mutex.
//! - **Call outside the lock**: the wrapped operation never runs while the lock is held.
//! - **Open rejects without invoking** the operation, with [`BreakerError::Rejected`].
//! - **HalfOpen admits one probe at a time**; concurrent callers are rejected until it settles.
//! - **Backoff compounds** per consecutive trip via [`BackoffPolicy`], reset on close.
//! - A probe future dropped before completion releases its probe slot.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::backoff::BackoffPolicy;
use crate::error::BreakerError;

/// Circuit breaker configuration.
///
/// ## Field semantics
/// - `failure_threshold`: consecutive failures in `Closed` that trip the circuit (min 1)
/// - `success_threshold`: consecutive probe successes in `HalfOpen` that close it (min 1)
/// - `backoff`: base/max timeout and growth factor of the open period
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Open-timeout growth policy (`first` is the base timeout).
    pub backoff: BackoffPolicy,
}

impl BreakerConfig {
    /// Base open timeout (restored on reset).
    #[inline]
    pub fn base_timeout(&self) -> Duration {
        self.backoff.first.min(self.backoff.max)
    }
}

impl Default for BreakerConfig {
    /// Default configuration:
    ///
    /// - `failure_threshold = 5`
    /// - `success_threshold = 2`
    /// - `backoff = 10s × 2.0, capped at 300s`
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally; failures are counted.
    Closed,
    /// Calls are rejected until the open timeout elapses.
    Open,
    /// Probe calls are admitted one at a time to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Snapshot of breaker counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub current_timeout_ms: u64,
    pub trips: u64,
    pub recoveries: u64,
    pub rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    consecutive_trips: u32,
    current_timeout: Duration,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
    recoveries: u64,
    rejections: u64,
}

impl BreakerState {
    fn closed(base: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            consecutive_trips: 0,
            current_timeout: base,
            last_failure: None,
            probe_in_flight: false,
            trips: 0,
            recoveries: 0,
            rejections: 0,
        }
    }
}

/// Guards a fallible operation with the Closed/Open/HalfOpen state machine.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
///
/// ## Example
/// ```rust
/// use tunevisor::{BreakerConfig, CircuitBreaker, CircuitState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new("gpu-telemetry", BreakerConfig::default());
/// let out = breaker.call(|| async { Ok::<_, String>(42) }).await;
/// assert_eq!(out.unwrap(), 42);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # }
/// ```
pub struct CircuitBreaker {
    name: Cow<'static, str>,
    cfg: BreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Admission ticket for one call; releases a half-open probe slot if dropped unsettled.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            let mut st = self.breaker.lock();
            st.probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<Cow<'static, str>>, cfg: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState::closed(cfg.base_timeout())),
            cfg,
        }
    }

    /// Breaker name (for logs/metrics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` if the circuit admits it; every `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(f, |_| true).await
    }

    /// Runs `f` if the circuit admits it; only errors for which `is_failure`
    /// returns `true` count as failures. Other errors are returned to the caller
    /// and recorded as successes for state purposes.
    pub async fn call_with<F, Fut, T, E, P>(&self, f: F, is_failure: P) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let mut admission = self.admit()?;
        let res = f().await;

        let failed = match &res {
            Ok(_) => false,
            Err(e) => is_failure(e),
        };
        admission.settled = true;
        if failed {
            self.on_failure(admission.probe);
        } else {
            self.on_success(admission.probe);
        }
        res.map_err(BreakerError::Inner)
    }

    /// Current state (as of the last transition).
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current open timeout.
    pub fn current_timeout(&self) -> Duration {
        self.lock().current_timeout
    }

    /// Forces the circuit closed: clears counters and restores the base timeout.
    pub fn reset(&self) {
        let mut st = self.lock();
        self.close(&mut st);
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> BreakerStats {
        let st = self.lock();
        BreakerStats {
            name: self.name.to_string(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            current_timeout_ms: st.current_timeout.as_millis() as u64,
            trips: st.trips,
            recoveries: st.recoveries,
            rejections: st.rejections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn admit<E>(&self) -> Result<Admission<'_>, BreakerError<E>> {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => Ok(Admission {
                breaker: self,
                probe: false,
                settled: false,
            }),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|t| Instant::now().saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed >= st.current_timeout {
                    st.state = CircuitState::HalfOpen;
                    st.success_count = 0;
                    st.probe_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open; admitting probe");
                    Ok(Admission {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                } else {
                    st.rejections += 1;
                    Err(BreakerError::Rejected {
                        state: CircuitState::Open,
                        retry_after: st.current_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    st.rejections += 1;
                    Err(BreakerError::Rejected {
                        state: CircuitState::HalfOpen,
                        retry_after: Duration::ZERO,
                    })
                } else {
                    st.probe_in_flight = true;
                    Ok(Admission {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut st = self.lock();
        match (st.state, probe) {
            (CircuitState::HalfOpen, true) => {
                st.probe_in_flight = false;
                st.success_count += 1;
                if st.success_count >= self.cfg.success_threshold.max(1) {
                    st.recoveries += 1;
                    self.close(&mut st);
                    info!(breaker = %self.name, "circuit closed after recovery");
                }
            }
            (CircuitState::Closed, false) => st.failure_count = 0,
            // Late result of a call admitted under an earlier state.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut st = self.lock();
        match (st.state, probe) {
            (CircuitState::HalfOpen, true) => {
                st.failure_count += 1;
                st.last_failure = Some(Instant::now());
                self.trip(&mut st);
            }
            (CircuitState::Closed, false) => {
                st.failure_count += 1;
                st.last_failure = Some(Instant::now());
                if st.failure_count >= self.cfg.failure_threshold.max(1) {
                    self.trip(&mut st);
                }
            }
            _ => {}
        }
    }

    fn trip(&self, st: &mut BreakerState) {
        st.state = CircuitState::Open;
        st.success_count = 0;
        st.probe_in_flight = false;
        st.consecutive_trips = st.consecutive_trips.saturating_add(1);
        st.current_timeout = self.cfg.backoff.next(st.consecutive_trips);
        st.trips += 1;
        warn!(
            breaker = %self.name,
            failures = st.failure_count,
            timeout_ms = st.current_timeout.as_millis() as u64,
            "circuit opened"
        );
    }

    fn close(&self, st: &mut BreakerState) {
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.success_count = 0;
        st.consecutive_trips = 0;
        st.current_timeout = self.cfg.base_timeout();
        st.last_failure = None;
        st.probe_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cfg() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(8),
                factor: 2.0,
            },
        }
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn trips_after_threshold_failures() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner("boom"))));
            assert_eq!(b.state(), CircuitState::Closed);
        }
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.current_timeout(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_without_invoking() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        let calls = AtomicUsize::new(0);
        let res = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(res.unwrap_err().is_rejected());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_probe_then_closes() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(succeed(&b).await.unwrap_err().is_rejected());

        tokio::time::advance(Duration::from_millis(1)).await;
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.current_timeout(), Duration::from_secs(1));
        assert_eq!(b.stats().recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_call_rejected_while_probe_in_flight() {
        let b = std::sync::Arc::new(CircuitBreaker::new("t", cfg()));
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let second = succeed(&b).await.unwrap_err();
        assert!(matches!(
            second,
            BreakerError::Rejected {
                state: CircuitState::HalfOpen,
                ..
            }
        ));

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_compounds_timeout() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.current_timeout(), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.current_timeout(), Duration::from_secs(4));

        tokio::time::advance(Duration::from_secs(4)).await;
        let _ = fail(&b).await;
        assert_eq!(b.current_timeout(), Duration::from_secs(8));

        tokio::time::advance(Duration::from_secs(8)).await;
        let _ = fail(&b).await;
        assert_eq!(b.current_timeout(), Duration::from_secs(8), "capped at max");
        assert_eq!(b.stats().trips, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn success_in_closed_clears_failure_count() {
        let b = CircuitBreaker::new("t", cfg());
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn classified_errors_do_not_trip() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..5 {
            let res = b
                .call_with(|| async { Err::<(), _>("not-found") }, |e| *e != "not-found")
                .await;
            assert!(matches!(res, Err(BreakerError::Inner("not-found"))));
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_releases_slot() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        let pending = b.call(|| std::future::pending::<Result<(), &'static str>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_base_timeout() {
        let b = CircuitBreaker::new("t", cfg());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.current_timeout(), Duration::from_secs(1));
        succeed(&b).await.unwrap();
    }
}
