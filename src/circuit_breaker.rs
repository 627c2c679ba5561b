//! Consecutive-failure circuit breaker for the upstream source.
//!
//! ```text
//! Closed -> Open:       failure_threshold consecutive transient failures
//! Open -> HalfOpen:     cooldown elapsed
//! HalfOpen -> Closed:   the single probe call succeeds
//! HalfOpen -> Open:     the probe fails (cooldown restarts)
//! ```
//!
//! While open, and while a half-open probe is in flight, callers fail fast
//! without touching the network.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Returned when the breaker refuses a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct BreakerOpen;

#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerState>>,
    cfg: Config,
}

impl CircuitBreaker {
    pub fn new(cfg: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            })),
            cfg,
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Every transition leaves the state valid, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to place one call. The returned permit must be settled with
    /// [`CallPermit::success`] or [`CallPermit::failure`]; dropping it
    /// unsettled counts as neither.
    pub fn try_acquire(&self) -> Result<CallPermit, BreakerOpen> {
        let mut st = self.lock();
        let now = Instant::now();

        match *st {
            BreakerState::Closed { .. } => Ok(CallPermit::new(self.clone(), false)),
            BreakerState::Open { until } if now < until => Err(BreakerOpen),
            BreakerState::Open { .. } | BreakerState::HalfOpen { probe_in_flight: false } => {
                *st = BreakerState::HalfOpen {
                    probe_in_flight: true,
                };
                info!("circuit breaker half-open, admitting probe");
                Ok(CallPermit::new(self.clone(), true))
            }
            BreakerState::HalfOpen {
                probe_in_flight: true,
            } => Err(BreakerOpen),
        }
    }

    fn on_success(&self, probe: bool) {
        let mut st = self.lock();
        match *st {
            BreakerState::Closed { .. } => {}
            BreakerState::HalfOpen { .. } if probe => info!("circuit breaker closed"),
            // Late results from calls admitted before the breaker tripped.
            BreakerState::HalfOpen { .. } | BreakerState::Open { .. } => return,
        }
        *st = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    fn on_failure(&self, probe: bool) {
        let mut st = self.lock();
        let now = Instant::now();

        match *st {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures.saturating_add(1);
                if failures >= self.cfg.failure_threshold {
                    warn!(
                        failures,
                        cooldown_secs = self.cfg.cooldown.as_secs(),
                        "circuit breaker opened"
                    );
                    *st = BreakerState::Open {
                        until: now + self.cfg.cooldown,
                    };
                } else {
                    *st = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen { .. } if probe => {
                warn!("circuit breaker probe failed, reopening");
                *st = BreakerState::Open {
                    until: now + self.cfg.cooldown,
                };
            }
            // Late results from calls admitted before the breaker tripped.
            BreakerState::HalfOpen { .. } | BreakerState::Open { .. } => {}
        }
    }

    fn on_abandoned_probe(&self) {
        let mut st = self.lock();
        if let BreakerState::HalfOpen {
            probe_in_flight: true,
        } = *st
        {
            *st = BreakerState::HalfOpen {
                probe_in_flight: false,
            };
        }
    }
}

/// Admission for one call through the breaker.
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// The upstream answered. Permanent failures are reported here too:
    /// the upstream is reachable, it just rejected this request.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// The call failed in a way that counts against the upstream.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        // A cancelled probe must not leave the breaker stuck half-open.
        if !self.settled && self.probe {
            self.breaker.on_abandoned_probe();
        }
    }
}
