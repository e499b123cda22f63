//! Circuit breaker pattern implementation.
//!
//! The circuit breaker stops calls to a failing backend and lets it recover.
//! Callers obtain a [`Permit`] from [`CircuitBreaker::guard`] and hand it back
//! exactly once through [`CircuitBreaker::record_outcome`] or
//! [`CircuitBreaker::release`]. A permit dropped without an outcome counts as a
//! failure, so a cancelled call still trips the breaker.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::{Clock, Operation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a single trial call is in flight or allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl CircuitState {
    /// Returns the state as a static string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Backoff applied when the circuit first opens
    pub base_backoff: Duration,
    /// Upper bound for the backoff
    pub max_backoff: Duration,
    /// Factor applied to the backoff each time a trial call fails
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

/// Rejection returned while the circuit is not accepting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Circuit open, retry after {retry_after_ms}ms")]
pub struct CircuitRejected {
    /// Milliseconds until the next trial may be attempted
    pub retry_after_ms: u64,
}

/// Point-in-time view of a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Time of the most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Current backoff in milliseconds
    pub backoff_ms: u64,
    /// When an OPEN circuit admits its next trial
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Successful outcomes recorded
    pub total_successes: u64,
    /// Failed outcomes recorded
    pub total_failures: u64,
    /// Calls rejected by the breaker
    pub total_rejections: u64,
    /// Times the circuit has opened
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    backoff: Duration,
    next_retry_at: Option<DateTime<Utc>>,
    /// Bumped on every transition; outcomes from older permits are ignored
    generation: u64,
    trial_in_flight: bool,
}

struct BreakerCore {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Mirror of `inner.state` for lock-free reads
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    times_opened: AtomicU64,
}

impl BreakerCore {
    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        inner.state = to;
        inner.generation += 1;
        self.state.store(to as u8, Ordering::Release);
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        let next_retry_at = now + to_chrono(inner.backoff);
        inner.next_retry_at = Some(next_retry_at);
        inner.trial_in_flight = false;
        self.transition(inner, CircuitState::Open);
        self.times_opened.fetch_add(1, Ordering::Relaxed);

        warn!(
            breaker = %self.name,
            failures = inner.consecutive_failures,
            backoff_ms = inner.backoff.as_millis() as u64,
            next_retry_at = %next_retry_at,
            "Circuit breaker opened"
        );
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = 0;
        inner.backoff = self.config.base_backoff;
        inner.next_retry_at = None;
        inner.trial_in_flight = false;
        self.transition(inner, CircuitState::Closed);

        info!(breaker = %self.name, "Circuit breaker closed");
    }

    fn escalated_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.config.backoff_multiplier.max(1.0))
            .min(self.config.max_backoff)
    }

    fn settle(&self, generation: u64, trial: bool, success: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            inner.last_failure_at = Some(now);
        }

        if generation != inner.generation {
            debug!(
                breaker = %self.name,
                permit_generation = generation,
                current_generation = inner.generation,
                success,
                "Ignoring outcome from a stale permit"
            );
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    debug!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker recorded failure"
                    );
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        self.open(&mut inner, now);
                    }
                }
            }
            CircuitState::HalfOpen if trial => {
                if success {
                    self.close(&mut inner);
                } else {
                    inner.consecutive_failures += 1;
                    inner.backoff = self.escalated_backoff(inner.backoff);
                    debug!(breaker = %self.name, "Circuit breaker trial failed, reopening");
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release(&self, generation: u64, trial: bool) {
        let mut inner = self.inner.lock();
        if trial && generation == inner.generation && inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100))
}

fn millis_until(now: DateTime<Utc>, at: DateTime<Utc>) -> u64 {
    (at - now).num_milliseconds().max(0) as u64
}

/// Authorization to make one backend call.
///
/// Consumed by [`CircuitBreaker::record_outcome`] or [`CircuitBreaker::release`].
/// Dropping an unsettled permit records a failure.
#[must_use = "a permit must be settled with record_outcome or release"]
pub struct Permit {
    core: Arc<BreakerCore>,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit {
    /// Whether this permit is the HALF_OPEN trial call
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    fn settle(mut self, success: bool) {
        self.settled = true;
        self.core.settle(self.generation, self.trial, success);
    }

    fn release(mut self) {
        self.settled = true;
        self.core.release(self.generation, self.trial);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                breaker = %self.core.name,
                trial = self.trial,
                "Permit dropped without an outcome, recording failure"
            );
            self.core.settle(self.generation, self.trial, false);
        }
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("breaker", &self.core.name)
            .field("generation", &self.generation)
            .field("trial", &self.trial)
            .finish()
    }
}

/// Circuit breaker for one operation class.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    core: Arc<BreakerCore>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let backoff = config.base_backoff;
        Self {
            core: Arc::new(BreakerCore {
                name: name.into(),
                config,
                clock,
                state: AtomicU8::new(CircuitState::Closed as u8),
                inner: Mutex::new(BreakerInner {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    last_failure_at: None,
                    backoff,
                    next_retry_at: None,
                    generation: 0,
                    trial_in_flight: false,
                }),
                successes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                rejections: AtomicU64::new(0),
                times_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Get the breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.core.config
    }

    /// Get the current state without locking
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.core.state.load(Ordering::Acquire))
    }

    /// Ask for permission to call the backend
    ///
    /// # Errors
    /// Returns `CircuitRejected` while the circuit is OPEN and the backoff has
    /// not elapsed, or while a HALF_OPEN trial is already in flight
    pub fn guard(&self) -> Result<Permit, CircuitRejected> {
        let core = &self.core;
        let now = core.clock.now();
        let mut inner = core.inner.lock();

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let next_retry_at = inner.next_retry_at.unwrap_or(now);
                if now < next_retry_at {
                    core.rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitRejected {
                        retry_after_ms: millis_until(now, next_retry_at).max(1),
                    });
                }
                core.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                info!(breaker = %core.name, "Circuit breaker half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    core.rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitRejected {
                        retry_after_ms: core.config.base_backoff.as_millis() as u64,
                    });
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            core: Arc::clone(core),
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    /// Record the outcome of the call a permit authorized
    pub fn record_outcome(&self, permit: Permit, success: bool) {
        if !Arc::ptr_eq(&self.core, &permit.core) {
            warn!(
                breaker = %self.core.name,
                permit_breaker = %permit.core.name,
                "Permit settled on a different breaker"
            );
        }
        permit.settle(success);
    }

    /// Return a permit whose call never reached the backend.
    ///
    /// State is left untouched; a HALF_OPEN trial slot becomes free again.
    pub fn release(&self, permit: Permit) {
        permit.release();
    }

    /// Force the circuit open for the current backoff
    pub fn force_open(&self) {
        let now = self.core.clock.now();
        let mut inner = self.core.inner.lock();
        self.core.open(&mut inner, now);
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.core.inner.lock();
        self.core.close(&mut inner);
    }

    /// Get a consistent snapshot of the breaker
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.core.inner.lock();
        CircuitSnapshot {
            name: self.core.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            backoff_ms: inner.backoff.as_millis() as u64,
            next_retry_at: inner.next_retry_at,
            total_successes: self.core.successes.load(Ordering::Relaxed),
            total_failures: self.core.failures.load(Ordering::Relaxed),
            total_rejections: self.core.rejections.load(Ordering::Relaxed),
            times_opened: self.core.times_opened.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

/// One circuit breaker per operation class
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    breakers: BTreeMap<Operation, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    /// Create breakers for every operation class
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let breakers = Operation::ALL
            .into_iter()
            .map(|op| {
                (
                    op,
                    CircuitBreaker::new(op.as_str(), config.clone(), Arc::clone(&clock)),
                )
            })
            .collect();
        Self { breakers }
    }

    /// Breaker for an operation class
    #[must_use]
    pub fn get(&self, operation: Operation) -> &CircuitBreaker {
        // Every operation is inserted at construction
        &self.breakers[&operation]
    }

    /// Snapshots of all breakers, ordered by operation
    #[must_use]
    pub fn snapshots(&self) -> Vec<(Operation, CircuitSnapshot)> {
        self.breakers
            .iter()
            .map(|(op, breaker)| (*op, breaker.snapshot()))
            .collect()
    }

    /// Reset every breaker
    pub fn reset_all(&self) {
        for breaker in self.breakers.values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gateway_core::ManualClock;

    fn breaker() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2024, 11, 4, 9, 0, 0)
                .single()
                .expect("valid date"),
        );
        let cb = CircuitBreaker::new(
            "analysis",
            CircuitBreakerConfig::default(),
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    fn fail(cb: &CircuitBreaker) {
        let permit = cb.guard().expect("permit");
        cb.record_outcome(permit, false);
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let (cb, _clock) = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        let permit = cb.guard().expect("closed circuit admits");
        assert!(!permit.is_trial());
        cb.record_outcome(permit, true);
    }

    #[test]
    fn test_opens_after_threshold() {
        let (cb, _clock) = breaker();
        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 4);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.guard().expect_err("open circuit rejects");
        assert_eq!(rejected.retry_after_ms, 30_000);
    }

    #[test]
    fn test_success_resets_failures() {
        let (cb, _clock) = breaker();
        for _ in 0..4 {
            fail(&cb);
        }
        let permit = cb.guard().expect("permit");
        cb.record_outcome(permit, true);
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_success_closes() {
        let (cb, clock) = breaker();
        for _ in 0..5 {
            fail(&cb);
        }

        clock.advance(Duration::from_secs(29));
        assert_eq!(cb.guard().expect_err("still open").retry_after_ms, 1_000);

        clock.advance(Duration::from_secs(1));
        let trial = cb.guard().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Only one trial at a time
        assert!(cb.guard().is_err());

        cb.record_outcome(trial, true);
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.backoff_ms, 30_000);
    }

    #[test]
    fn test_half_open_failure_doubles_backoff_with_cap() {
        let (cb, clock) = breaker();
        for _ in 0..5 {
            fail(&cb);
        }

        let mut expected = [60_000, 120_000, 240_000, 300_000, 300_000].into_iter();
        let mut backoff = 30_000;
        for _ in 0..5 {
            clock.advance_millis(backoff);
            let trial = cb.guard().expect("trial admitted");
            cb.record_outcome(trial, false);

            let snapshot = cb.snapshot();
            assert_eq!(snapshot.state, CircuitState::Open);
            backoff = expected.next().expect("expected value");
            assert_eq!(snapshot.backoff_ms, backoff);
        }

        // Closing restores the base backoff
        clock.advance_millis(backoff);
        let trial = cb.guard().expect("trial admitted");
        cb.record_outcome(trial, true);
        for _ in 0..5 {
            fail(&cb);
        }
        assert_eq!(cb.snapshot().backoff_ms, 30_000);
    }

    #[test]
    fn test_dropped_permit_counts_as_failure() {
        let (cb, _clock) = breaker();
        for _ in 0..5 {
            let permit = cb.guard().expect("permit");
            drop(permit);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().total_failures, 5);
    }

    #[test]
    fn test_stale_permit_ignored() {
        let (cb, clock) = breaker();
        let stale = cb.guard().expect("permit");
        for _ in 0..5 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));
        let trial = cb.guard().expect("trial");
        cb.record_outcome(trial, true);
        assert_eq!(cb.state(), CircuitState::Closed);

        // A late failure from before the opening does not count
        cb.record_outcome(stale, false);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_release_frees_trial_slot() {
        let (cb, clock) = breaker();
        for _ in 0..5 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));

        let trial = cb.guard().expect("trial");
        cb.release(trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let trial = cb.guard().expect("trial slot is free again");
        assert!(trial.is_trial());
        cb.record_outcome(trial, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_force_open_and_reset() {
        let (cb, _clock) = breaker();
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.guard().is_err());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        let permit = cb.guard().expect("closed circuit admits");
        cb.record_outcome(permit, true);
        assert_eq!(cb.snapshot().times_opened, 1);
    }

    #[test]
    fn test_registry_isolates_operations() {
        let clock = ManualClock::starting_now();
        let registry = CircuitBreakerRegistry::new(&CircuitBreakerConfig::default(), Arc::new(clock));

        registry.get(Operation::Chat).force_open();
        assert_eq!(registry.get(Operation::Chat).state(), CircuitState::Open);
        assert_eq!(registry.get(Operation::Analysis).state(), CircuitState::Closed);
        assert_eq!(registry.snapshots().len(), 4);

        registry.reset_all();
        assert_eq!(registry.get(Operation::Chat).state(), CircuitState::Closed);
    }
}
