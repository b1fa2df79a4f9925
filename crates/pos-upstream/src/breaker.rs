//! Sliding-window circuit breaker.
//!
//! CLOSED → OPEN when the failure rate over the last `window_size` recorded
//! outcomes reaches `failure_rate_pct` with at least `min_calls` samples.
//! OPEN → HALF_OPEN after `open_duration`; the single probe then decides
//! CLOSED (success) or OPEN again (failure).
//!
//! State is process-wide and shared by every worker; the critical section
//! is a short mutex around a ring of booleans, so concurrent workers are
//! not serialized beyond the bookkeeping itself.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// A state change, reported to the caller so it can raise an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Outcomes kept in the sliding window.
    pub window_size: usize,
    /// Samples required before the failure rate is evaluated.
    pub min_calls: usize,
    /// Failure percentage at which the breaker opens.
    pub failure_rate_pct: u32,
    /// Cooldown before OPEN allows a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            window_size: 100,
            min_calls: 10,
            failure_rate_pct: 50,
            open_duration: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: BreakerState,
    window: VecDeque<bool>,
    failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::with_capacity(cfg.window_size),
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Ask to place a call. `Err(())` means rejected (OPEN, or HALF_OPEN
    /// with the probe slot already taken). A returned transition is
    /// OPEN → HALF_OPEN, which the caller alerts on.
    pub fn try_call(&self) -> (Result<(), ()>, Option<BreakerTransition>) {
        let mut g = self.inner.lock().expect("breaker lock poisoned");
        match g.state {
            BreakerState::Closed => (Ok(()), None),
            BreakerState::Open => {
                let elapsed = g
                    .opened_at
                    .map(|t| t.elapsed() >= self.cfg.open_duration)
                    .unwrap_or(true);
                if elapsed {
                    g.state = BreakerState::HalfOpen;
                    g.probe_in_flight = true;
                    (
                        Ok(()),
                        Some(BreakerTransition {
                            from: BreakerState::Open,
                            to: BreakerState::HalfOpen,
                        }),
                    )
                } else {
                    (Err(()), None)
                }
            }
            BreakerState::HalfOpen => {
                if g.probe_in_flight {
                    (Err(()), None)
                } else {
                    g.probe_in_flight = true;
                    (Ok(()), None)
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<BreakerTransition> {
        let mut g = self.inner.lock().expect("breaker lock poisoned");
        match g.state {
            BreakerState::HalfOpen => {
                g.state = BreakerState::Closed;
                g.window.clear();
                g.failures = 0;
                g.opened_at = None;
                g.probe_in_flight = false;
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Closed,
                })
            }
            _ => {
                Self::push_outcome(&mut g, &self.cfg, true);
                None
            }
        }
    }

    pub fn record_failure(&self) -> Option<BreakerTransition> {
        let mut g = self.inner.lock().expect("breaker lock poisoned");
        match g.state {
            BreakerState::HalfOpen => {
                g.state = BreakerState::Open;
                g.opened_at = Some(Instant::now());
                g.probe_in_flight = false;
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Open,
                })
            }
            BreakerState::Open => None,
            BreakerState::Closed => {
                Self::push_outcome(&mut g, &self.cfg, false);
                let enough = g.window.len() >= self.cfg.min_calls;
                let tripped = enough
                    && g.failures * 100 >= self.cfg.failure_rate_pct as usize * g.window.len();
                if tripped {
                    g.state = BreakerState::Open;
                    g.opened_at = Some(Instant::now());
                    Some(BreakerTransition {
                        from: BreakerState::Closed,
                        to: BreakerState::Open,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn push_outcome(g: &mut Inner, cfg: &CircuitBreakerConfig, success: bool) {
        if g.window.len() == cfg.window_size {
            if let Some(evicted) = g.window.pop_front() {
                if !evicted {
                    g.failures -= 1;
                }
            }
        }
        g.window.push_back(success);
        if !success {
            g.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            window_size: 20,
            min_calls: 10,
            failure_rate_pct: 50,
            open_duration: Duration::from_millis(open_ms),
        })
    }

    #[test]
    fn opens_after_min_calls_at_failure_rate() {
        let b = breaker(1_000);
        for _ in 0..4 {
            assert!(b.record_failure().is_none());
        }
        for _ in 0..5 {
            b.record_success();
        }
        // 10th call, 5 failures of 10 = 50% ≥ threshold
        let t = b.record_failure().expect("should open");
        assert_eq!(t.to, BreakerState::Open);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_call().0.is_err());
    }

    #[test]
    fn stays_closed_below_rate() {
        let b = breaker(1_000);
        for _ in 0..4 {
            b.record_failure();
        }
        for _ in 0..16 {
            assert!(b.record_success().is_none());
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_success_closes() {
        let b = breaker(10);
        for _ in 0..10 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));
        let (ok, transition) = b.try_call();
        assert!(ok.is_ok());
        assert_eq!(transition.unwrap().to, BreakerState::HalfOpen);

        // A second caller is rejected while the probe is in flight.
        assert!(b.try_call().0.is_err());

        let t = b.record_success().unwrap();
        assert_eq!(t.to, BreakerState::Closed);
        assert!(b.try_call().0.is_ok());
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let b = breaker(10);
        for _ in 0..10 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.try_call().0.is_ok());
        let t = b.record_failure().unwrap();
        assert_eq!(t.to, BreakerState::Open);
        assert!(b.try_call().0.is_err());
    }
}
