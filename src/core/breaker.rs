//! Circuit breakers guarding external dependencies
//!
//! Each guarded dependency gets a three-state machine: CLOSED passes calls
//! through and counts outcomes, OPEN fails fast until a cool-off elapses,
//! HALF_OPEN admits exactly one probe. The state is a single tagged value
//! behind a mutex; failure bookkeeping is a fixed-size outcome ring per
//! breaker.
//!
//! Callers that were admitted MUST report the outcome via `record_success` /
//! `record_failure`. Rejected callers report nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::config::BreakerConfig;

/// Dependency name for the credential authority (identity database)
pub const DEP_AUTH: &str = "auth";

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker for admission
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    /// Call may proceed. `probe` is true when this is the single HALF_OPEN probe.
    Allowed { probe: bool },
    /// Fail fast; retry after the hint.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Sliding window of recent call outcomes (true = failure)
struct OutcomeWindow {
    outcomes: Vec<bool>,
    next: usize,
    filled: usize,
}

impl OutcomeWindow {
    fn new(size: usize) -> Self {
        Self {
            outcomes: vec![false; size.max(1)],
            next: 0,
            filled: 0,
        }
    }

    fn record(&mut self, failure: bool) {
        self.outcomes[self.next] = failure;
        self.next = (self.next + 1) % self.outcomes.len();
        self.filled = (self.filled + 1).min(self.outcomes.len());
    }

    /// Failure-rate trip check; only meaningful once the window is full
    fn rate_exceeded(&self, percent: u8) -> bool {
        if self.filled < self.outcomes.len() {
            return false;
        }
        let failures = self.outcomes.iter().filter(|f| **f).count();
        failures * 100 >= self.outcomes.len() * percent as usize
    }

    fn reset(&mut self) {
        self.outcomes.fill(false);
        self.next = 0;
        self.filled = 0;
    }
}

enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

struct Inner {
    phase: Phase,
    consecutive_failures: u32,
    window: OutcomeWindow,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    failure_rate_percent: u8,
    cooloff: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            failure_rate_percent: config.failure_rate_percent,
            cooloff: Duration::from_secs(config.cooloff_secs),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                consecutive_failures: 0,
                window: OutcomeWindow::new(config.window_size),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cooloff(&self) -> Duration {
        self.cooloff
    }

    /// Ask for admission. OPEN transitions to HALF_OPEN once the cool-off has
    /// elapsed, and the caller asking at that moment becomes the probe.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => Admission::Allowed { probe: false },
            Phase::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    tracing::info!(breaker = %self.name, "Circuit transitioning to HALF_OPEN");
                    inner.phase = Phase::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        retry_after: until - now,
                    }
                }
            }
            Phase::HalfOpen {
                ref mut probe_in_flight,
            } => {
                if *probe_in_flight {
                    Admission::Rejected {
                        retry_after: self.cooloff,
                    }
                } else {
                    *probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::HalfOpen { .. } => {
                tracing::info!(breaker = %self.name, "Circuit closing after successful probe");
                inner.phase = Phase::Closed;
                inner.consecutive_failures = 0;
                inner.window.reset();
            }
            Phase::Closed => {
                inner.consecutive_failures = 0;
                inner.window.record(false);
            }
            // Stale permit racing a concurrent OPEN transition
            Phase::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::HalfOpen { .. } => {
                tracing::warn!(breaker = %self.name, "Probe failed, circuit re-opening");
                inner.phase = Phase::Open {
                    until: Instant::now() + self.cooloff,
                };
                inner.window.reset();
            }
            Phase::Closed => {
                inner.consecutive_failures += 1;
                inner.window.record(true);
                let trip_consecutive = inner.consecutive_failures >= self.failure_threshold;
                let trip_rate = inner.window.rate_exceeded(self.failure_rate_percent);
                if trip_consecutive || trip_rate {
                    tracing::error!(
                        breaker = %self.name,
                        consecutive = inner.consecutive_failures,
                        "Circuit opening"
                    );
                    inner.phase = Phase::Open {
                        until: Instant::now() + self.cooloff,
                    };
                }
            }
            Phase::Open { .. } => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.inner.lock().phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// True while the breaker is failing fast. The emergency credential cache
    /// is only consulted while this holds.
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }
}

/// Per-dependency breaker registry
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        if let Some(b) = breakers.get(name) {
            return Arc::clone(b);
        }
        let breaker = Arc::new(CircuitBreaker::new(name, &self.config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(breaker = name, "Circuit breaker initialized");
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(cooloff_secs: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            window_size: 20,
            failure_rate_percent: 50,
            cooloff_secs,
        }
    }

    fn tripped(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            assert!(breaker.try_acquire().is_allowed());
            breaker.record_failure();
        }
    }

    #[test]
    fn test_starts_closed() {
        let b = CircuitBreaker::new("dep", &test_config(30));
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire().is_allowed());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let b = CircuitBreaker::new("dep", &test_config(30));
        for i in 0..5 {
            assert_eq!(b.state(), BreakerState::Closed, "still closed at {}", i);
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire().is_allowed());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let b = CircuitBreaker::new("dep", &test_config(30));
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_rejected_carries_retry_hint() {
        let b = CircuitBreaker::new("dep", &test_config(30));
        tripped(&b);
        match b.try_acquire() {
            Admission::Rejected { retry_after } => {
                assert!(retry_after <= Duration::from_secs(30));
                assert!(retry_after > Duration::from_secs(25));
            }
            Admission::Allowed { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let b = CircuitBreaker::new("dep", &test_config(0));
        tripped(&b);

        // Cool-off of zero: next acquire becomes the probe
        match b.try_acquire() {
            Admission::Allowed { probe } => assert!(probe),
            Admission::Rejected { .. } => panic!("expected probe admission"),
        }
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Second caller is rejected while the probe is in flight
        assert!(!b.try_acquire().is_allowed());
    }

    #[test]
    fn test_probe_success_closes() {
        let b = CircuitBreaker::new("dep", &test_config(0));
        tripped(&b);
        assert!(b.try_acquire().is_allowed());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire().is_allowed());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let b = CircuitBreaker::new("dep", &test_config(0));
        tripped(&b);
        assert!(b.try_acquire().is_allowed());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_failure_rate_trip() {
        // Three failures then a success, repeated: consecutive peaks at 3
        // (below the threshold of 5) but the 20-slot window runs at 75%
        // failures, so the rate rule trips once the window is full.
        let b = CircuitBreaker::new("dep", &test_config(30));
        'outer: for _ in 0..8 {
            for _ in 0..3 {
                b.record_failure();
                if b.state() != BreakerState::Closed {
                    break 'outer;
                }
            }
            b.record_success();
        }
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let registry = BreakerRegistry::new(test_config(30));
        let a = registry.get(DEP_AUTH);
        let b = registry.get(DEP_AUTH);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
