//! # Circuit Breaker Implementation
//!
//! Fault isolation for upstream origins and remote cache tiers. Three states:
//! Closed (normal operation), Open (failing fast) and Half-Open (one trial call
//! probing recovery).
//!
//! Closed-state outcomes are kept in a rolling window pruned by
//! `monitoring_period`. The circuit opens once the window holds at least
//! `minimum_requests` outcomes and the failure percentage exceeds
//! `failure_threshold`.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call is admitted
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        /// Time until the next trial is admitted, when known
        retry_after: Option<Duration>,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The wrapped operation's error, if the operation ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

/// Rolling outcome window plus open-state timing, guarded by one lock so
/// state transitions and window updates are observed together.
#[derive(Debug)]
struct BreakerWindow {
    /// `(recorded_at, succeeded)`
    outcomes: VecDeque<(Instant, bool)>,
    last_state_change: DateTime<Utc>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl BreakerWindow {
    fn new() -> Self {
        Self {
            outcomes: VecDeque::new(),
            last_state_change: Utc::now(),
            next_attempt: None,
            next_attempt_at: None,
        }
    }

    fn prune(&mut self, now: Instant, monitoring_period: Duration) {
        while let Some((recorded_at, _)) = self.outcomes.front() {
            if now.saturating_duration_since(*recorded_at) > monitoring_period {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn counts(&self) -> (u64, u64) {
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count() as u64;
        let total = self.outcomes.len() as u64;
        (failures, total - failures)
    }

    fn failure_percentage(&self) -> f64 {
        let (failures, successes) = self.counts();
        let total = failures + successes;
        if total == 0 {
            0.0
        } else {
            failures as f64 * 100.0 / total as f64
        }
    }
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for lock-free reads on the hot path)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    window: Mutex<BreakerWindow>,

    /// Set while the half-open trial call runs
    trial_in_flight: AtomicBool,

    lifetime_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            minimum_requests = config.minimum_requests,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            window: Mutex::new(BreakerWindow::new()),
            trial_in_flight: AtomicBool::new(false),
            lifetime_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Open circuits are unhealthy, half-open ones are recovering
    pub fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.acquire() {
            Some(permit) => permit,
            None => {
                return Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                    retry_after: self.retry_after(),
                })
            }
        };

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => {
                debug!(
                    component = %self.name,
                    duration_ms = duration.as_millis() as u64,
                    "Operation succeeded"
                );
                permit.success();
            }
            Err(_) => {
                warn!(
                    component = %self.name,
                    duration_ms = duration.as_millis() as u64,
                    "Operation failed"
                );
                permit.failure();
            }
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Execute an operation, routing rejections and failures to `fallback`
    ///
    /// The fallback receives the reason: `CircuitOpen` when the operation was
    /// never invoked, `OperationFailed` when it ran and failed.
    pub async fn call_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CircuitBreakerError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(reason) => {
                debug!(
                    component = %self.name,
                    circuit_open = reason.is_circuit_open(),
                    "Serving fallback"
                );
                fallback(reason).await
            }
        }
    }

    /// Admit a call manually. Returns `None` when the circuit rejects it.
    ///
    /// The permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]; dropping an unsettled half-open trial releases
    /// the trial slot without recording an outcome.
    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        let admitted = match self.state() {
            CircuitState::Closed => Some(false),
            CircuitState::Open => self.admit_after_timeout(),
            CircuitState::HalfOpen => self.claim_trial().then_some(true),
        };

        match admitted {
            Some(trial) => {
                self.lifetime_calls.fetch_add(1, Ordering::Relaxed);
                Some(CallPermit {
                    breaker: self,
                    trial,
                    settled: false,
                })
            }
            None => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(component = %self.name, "Call rejected by open circuit");
                None
            }
        }
    }

    /// Force the circuit open (operator action)
    pub fn trip(&self) {
        warn!(component = %self.name, "Circuit breaker manually tripped");
        let mut window = self.window.lock();
        self.transition_to_open(&mut window);
    }

    /// Force the circuit closed and clear the window (operator action)
    pub fn reset(&self) {
        info!(component = %self.name, "Circuit breaker manually reset");
        let mut window = self.window.lock();
        self.transition_to_closed(&mut window);
        self.trial_in_flight.store(false, Ordering::Release);
    }

    /// Snapshot of the breaker for monitoring
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut window = self.window.lock();
        window.prune(Instant::now(), self.config.monitoring_period);
        let (failure_count, success_count) = window.counts();

        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            failure_count,
            success_count,
            total_requests: failure_count + success_count,
            failure_percentage: window.failure_percentage(),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            lifetime_calls: self.lifetime_calls.load(Ordering::Relaxed),
            last_state_change: window.last_state_change,
            next_attempt: window.next_attempt_at,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        let window = self.window.lock();
        window
            .next_attempt
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Open circuit: move to half-open once `next_attempt` has passed and
    /// claim the trial slot for this caller.
    fn admit_after_timeout(&self) -> Option<bool> {
        {
            let mut window = self.window.lock();
            match self.state() {
                CircuitState::Open => {
                    let ready = window
                        .next_attempt
                        .map_or(true, |at| Instant::now() >= at);
                    if !ready {
                        return None;
                    }
                    self.transition_to_half_open(&mut window);
                }
                CircuitState::Closed => return Some(false),
                CircuitState::HalfOpen => {}
            }
        }
        self.claim_trial().then_some(true)
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn record_success(&self, trial: bool) {
        let mut window = self.window.lock();
        if trial {
            if self.state() == CircuitState::HalfOpen {
                self.transition_to_closed(&mut window);
            }
            self.trial_in_flight.store(false, Ordering::Release);
            return;
        }

        // Results of calls admitted before the circuit opened are not counted
        if self.state() == CircuitState::Closed {
            let now = Instant::now();
            window.prune(now, self.config.monitoring_period);
            window.outcomes.push_back((now, true));
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut window = self.window.lock();
        if trial {
            if self.state() == CircuitState::HalfOpen {
                self.transition_to_open(&mut window);
            }
            self.trial_in_flight.store(false, Ordering::Release);
            return;
        }

        if self.state() == CircuitState::Closed {
            let now = Instant::now();
            window.prune(now, self.config.monitoring_period);
            window.outcomes.push_back((now, false));

            let total = window.outcomes.len() as u64;
            if total >= self.config.minimum_requests as u64
                && window.failure_percentage() > self.config.failure_threshold
            {
                self.transition_to_open(&mut window);
            }
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self, window: &mut BreakerWindow) {
        let previous = self.state();
        window.outcomes.clear();
        window.next_attempt = None;
        window.next_attempt_at = None;
        window.last_state_change = Utc::now();
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);

        if previous != CircuitState::Closed {
            info!(
                component = %self.name,
                previous_state = ?previous,
                "Circuit breaker closed - upstream recovered"
            );
        }
    }

    /// Transition to open state (failing fast)
    fn transition_to_open(&self, window: &mut BreakerWindow) {
        let previous = self.state();
        let failure_percentage = window.failure_percentage();
        let window_size = window.outcomes.len();

        let now = Instant::now();
        let utc_now = Utc::now();
        window.next_attempt = Some(now + self.config.reset_timeout);
        window.next_attempt_at = chrono::Duration::from_std(self.config.reset_timeout)
            .ok()
            .map(|timeout| utc_now + timeout);
        window.last_state_change = utc_now;
        window.outcomes.clear();
        self.state.store(CircuitState::Open as u8, Ordering::Release);

        error!(
            component = %self.name,
            previous_state = ?previous,
            failure_percentage = failure_percentage,
            window_size = window_size,
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit breaker opened - failing fast"
        );
    }

    /// Transition to half-open state (testing recovery)
    fn transition_to_half_open(&self, window: &mut BreakerWindow) {
        window.last_state_change = Utc::now();
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);

        info!(
            component = %self.name,
            "Circuit breaker half-open - admitting trial call"
        );
    }
}

/// Admission granted by [`CircuitBreaker::acquire`]
#[derive(Debug)]
#[must_use = "an unsettled permit records no outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.trial_in_flight.store(false, Ordering::Release);
            debug!(
                component = %self.breaker.name,
                "Half-open trial abandoned, releasing trial slot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_config(reset_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5.0,
            minimum_requests: 5,
            reset_timeout,
            monitoring_period: Duration::from_secs(60),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>("upstream down") })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
    }

    #[tokio::test]
    async fn test_opens_after_minimum_requests() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_secs(30)));

        for _ in 0..4 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let stats = breaker.stats();
        assert!(stats.next_attempt.is_some());
        assert!(!stats.is_healthy());
    }

    #[tokio::test]
    async fn test_stays_closed_below_failure_percentage() {
        let config = CircuitBreakerConfig {
            failure_threshold: 50.0,
            ..test_config(Duration::from_secs(30))
        };
        let breaker = CircuitBreaker::new("origin.example", config);

        for _ in 0..6 {
            succeed(&breaker).await;
        }
        for _ in 0..4 {
            fail(&breaker).await;
        }

        let stats = breaker.stats();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(stats.total_requests, 10);
        assert!((stats.failure_percentage - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_secs(30)));
        breaker.trip();

        let invoked = AtomicBool::new(false);
        let flag = &invoked;
        let result = breaker
            .call(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, &str>(1)
            })
            .await;

        assert!(!invoked.load(Ordering::SeqCst));
        match result {
            Err(CircuitBreakerError::CircuitOpen {
                component,
                retry_after,
            }) => {
                assert_eq!(component, "origin.example");
                assert!(retry_after.is_some());
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_fallback_served_when_open() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_secs(30)));
        breaker.trip();

        let value = breaker
            .call_with_fallback(
                || async { Ok::<_, String>("origin") },
                |reason| async move {
                    assert!(reason.is_circuit_open());
                    Ok("default")
                },
            )
            .await
            .unwrap();
        assert_eq!(value, "default");
    }

    #[tokio::test]
    async fn test_fallback_receives_operation_error() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_secs(30)));

        let value = breaker
            .call_with_fallback(
                || async { Err::<&str, _>("502".to_string()) },
                |reason| async move {
                    assert_eq!(reason.into_operation_error().as_deref(), Some("502"));
                    Ok("default")
                },
            )
            .await
            .unwrap();
        assert_eq!(value, "default");
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_millis(50)));
        for _ in 0..5 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        succeed(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_millis(50)));
        breaker.trip();
        let first_attempt = breaker.stats().next_attempt;

        tokio::time::sleep(Duration::from_millis(80)).await;
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.stats().next_attempt > first_attempt);
    }

    #[tokio::test]
    async fn test_single_trial_while_half_open() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_millis(20)));
        breaker.trip();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let trial = breaker.acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire().is_none());

        // Abandoned trial frees the slot
        drop(trial);
        let retry = breaker.acquire().expect("slot released");
        retry.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_callers_during_trial_are_rejected() {
        let breaker = Arc::new(CircuitBreaker::new(
            "origin.example",
            test_config(Duration::from_millis(20)),
        ));
        breaker.trip();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(move || async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });

        // Let the trial claim its slot
        while breaker.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let rejected = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(rejected, Err(CircuitBreakerError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_outcomes_expire_from_window() {
        let config = CircuitBreakerConfig {
            monitoring_period: Duration::from_millis(30),
            ..test_config(Duration::from_secs(30))
        };
        let breaker = CircuitBreaker::new("origin.example", config);

        for _ in 0..4 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 1);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let breaker = CircuitBreaker::new("origin.example", test_config(Duration::from_secs(30)));
        breaker.trip();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.stats().next_attempt.is_none());
        assert!(breaker.is_healthy());
    }
}
