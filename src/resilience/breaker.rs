//! Per-operation circuit breaker state machine.

use std::time::Duration;

use tokio::time::Instant;

/// Breaker states: CLOSED passes calls through, OPEN rejects them outright,
/// HALF_OPEN admits a bounded number of trial calls after the reset timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure-isolation state machine for one remote operation kind.
///
/// Created once per kind at client construction and mutated on every call
/// outcome; never persisted. All transitions happen under the client's lock
/// between suspension points, so the struct itself needs no synchronization.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_trials_used: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_max_attempts: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_max_attempts,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_trials_used: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Admission check, run once per outer call before any transport attempt.
    ///
    /// Advances OPEN to HALF_OPEN once the reset timeout has elapsed since
    /// the last failure. Returns `false` when the call must be rejected
    /// without touching the transport.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed < self.reset_timeout {
                    return false;
                }
                self.state = BreakerState::HalfOpen;
                self.half_open_trials_used = 0;
                self.admit_trial(now)
            }
            BreakerState::HalfOpen => self.admit_trial(now),
        }
    }

    fn admit_trial(&mut self, now: Instant) -> bool {
        if self.half_open_trials_used < self.half_open_max_attempts {
            self.half_open_trials_used += 1;
            true
        } else {
            self.reopen(now);
            false
        }
    }

    /// Any success resets the failure counter and closes the breaker.
    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.half_open_trials_used = 0;
        self.last_failure_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                self.last_failure_at = Some(now);
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                self.consecutive_failures += 1;
                if self.half_open_trials_used >= self.half_open_max_attempts {
                    self.reopen(now);
                } else {
                    // Trial budget remains; later trials may still close us.
                    self.last_failure_at = Some(now);
                }
            }
            BreakerState::Open => {
                self.last_failure_at = Some(now);
            }
        }
    }

    fn reopen(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.half_open_trials_used = 0;
        self.last_failure_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(300), 3)
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let mut b = breaker();
        for _ in 0..4 {
            assert!(b.try_acquire(Instant::now()));
            b.record_failure(Instant::now());
            assert_eq!(b.state(), BreakerState::Closed);
        }
        assert!(b.try_acquire(Instant::now()));
        b.record_failure(Instant::now());
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let mut b = breaker();
        for _ in 0..4 {
            b.try_acquire(Instant::now());
            b.record_failure(Instant::now());
        }
        b.try_acquire(Instant::now());
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        // Four more failures must not open the breaker.
        for _ in 0..4 {
            b.try_acquire(Instant::now());
            b.record_failure(Instant::now());
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_open_until_reset_timeout() {
        let mut b = breaker();
        for _ in 0..5 {
            b.try_acquire(Instant::now());
            b.record_failure(Instant::now());
        }
        assert!(!b.try_acquire(Instant::now()));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!b.try_acquire(Instant::now()));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(b.try_acquire(Instant::now()));
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_max_attempts_then_reopens() {
        let mut b = breaker();
        for _ in 0..5 {
            b.try_acquire(Instant::now());
            b.record_failure(Instant::now());
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        // Exactly three trials pass; each fails.
        for _ in 0..3 {
            assert!(b.try_acquire(Instant::now()));
            b.record_failure(Instant::now());
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire(Instant::now()));

        // The re-open refreshed the failure timestamp, so the timeout
        // restarts from now.
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(b.try_acquire(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let mut b = breaker();
        for _ in 0..5 {
            b.try_acquire(Instant::now());
            b.record_failure(Instant::now());
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(b.try_acquire(Instant::now()));
        b.record_failure(Instant::now());
        assert!(b.try_acquire(Instant::now()));
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }
}
