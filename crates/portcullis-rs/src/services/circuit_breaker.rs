//! Circuit breaker implementation for upstream service protection.
//!
//! One breaker guards each backend. Failures are counted over a trailing
//! monitor window; once the threshold is reached the breaker opens and fails
//! fast until the reset timeout elapses, after which a single probe request
//! is admitted to test recovery.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::Serialize;

use crate::models::settings::CircuitBreakerSettings;
use crate::utils::clock::Clock;

/// State of a circuit breaker.
///
/// * `Closed` - Normal operation, requests pass through
/// * `Open` - Circuit tripped, requests fail fast
/// * `HalfOpen` - Testing recovery, a bounded number of probes allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

/// Configuration parameters for circuit breaker behaviour.
///
/// # Fields
///
/// * `failure_threshold` - Failures within the monitor window that open the circuit (default: 3)
/// * `monitor_window_ms` - Trailing window over which failures are counted (default: 10 000)
/// * `reset_timeout_ms` - Time spent open before a probe is admitted (default: 15 000)
/// * `half_open_max` - Concurrent probes allowed while half-open (default: 1)
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub monitor_window_ms: u64,
    pub reset_timeout_ms: u64,
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            monitor_window_ms: 10_000,
            reset_timeout_ms: 15_000,
            half_open_max: 1,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            monitor_window_ms: settings.monitor_window_ms,
            reset_timeout_ms: settings.reset_timeout_ms,
            half_open_max: settings.half_open_max,
        }
    }
}

/// One recorded state transition, kept in a bounded log for observability.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_ms: u64,
}

/// Snapshot of a breaker for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub rejected: u64,
    pub half_open_attempts: u32,
    pub transitions: Vec<TransitionRecord>,
}

/// Transitions retained for the stats snapshot.
const TRANSITION_LOG_LEN: usize = 10;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Failure timestamps within the monitor window, oldest first.
    failures: VecDeque<u64>,
    opened_at: u64,
    half_open_attempts: u32,
    rejected: u64,
    transitions: VecDeque<TransitionRecord>,
}

/// Per-backend circuit breaker.
///
/// All mutators (`can_request`, `on_success`, `on_failure`, `state`) share
/// one mutex: the transition decision must observe and modify the failure
/// log, `opened_at` and the probe counter atomically. Different breakers are
/// fully independent.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use portcullis_rs::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use portcullis_rs::utils::clock::ManualClock;
///
/// let clock = Arc::new(ManualClock::new());
/// let breaker = CircuitBreaker::new("api-1".to_string(), CircuitBreakerConfig::default(), clock.clone());
///
/// assert!(breaker.can_request());
/// breaker.on_failure();
/// breaker.on_failure();
/// breaker.on_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: 0,
                half_open_attempts: 0,
                rejected: 0,
                transitions: VecDeque::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request may be sent to the guarded backend right now.
    ///
    /// Closed admits everything. Open rejects until `reset_timeout_ms` has
    /// elapsed since opening; the call that first observes the elapsed
    /// timeout performs the OPEN to HALF_OPEN transition and is itself
    /// admitted as the probe. Half-open admits up to `half_open_max`
    /// concurrent probes. Every rejection is counted for the stats snapshot.
    pub fn can_request(&self) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now.saturating_sub(inner.opened_at) >= self.config.reset_timeout_ms {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    // The caller that triggered the transition is the probe.
                    inner.half_open_attempts = 1;
                    true
                } else {
                    inner.rejected += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    inner.rejected += 1;
                    false
                }
            }
        }
    }

    /// Reports a successful upstream outcome.
    pub fn on_success(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
            CircuitState::Closed => {
                Self::prune(&mut inner, now, self.config.monitor_window_ms);
            }
            CircuitState::Open => {
                // A response from before the circuit tripped; nothing to do.
                debug!("circuit {} ignored success while open", self.name);
            }
        }
    }

    /// Reports a failed upstream outcome (5xx, transport error or timeout).
    pub fn on_failure(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::HalfOpen => {
                // The probe failed; reject again for a full reset timeout.
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                Self::prune(&mut inner, now, self.config.monitor_window_ms);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                inner.failures.push_back(now);
                Self::prune(&mut inner, now, self.config.monitor_window_ms);
            }
        }
    }

    /// Current state, applying the time-driven OPEN to HALF_OPEN transition.
    ///
    /// Observing the state does not admit a probe; only `can_request` does.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        if inner.state == CircuitState::Open
            && now.saturating_sub(inner.opened_at) >= self.config.reset_timeout_ms
        {
            self.transition(&mut inner, CircuitState::HalfOpen, now);
        }

        inner.state
    }

    /// Snapshot for the health endpoint.
    pub fn stats(&self) -> BreakerStats {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        Self::prune(&mut inner, now, self.config.monitor_window_ms);

        BreakerStats {
            state: inner.state,
            failures_in_window: inner.failures.len(),
            rejected: inner.rejected,
            half_open_attempts: inner.half_open_attempts,
            transitions: inner.transitions.iter().cloned().collect(),
        }
    }

    /// Forces the breaker back to CLOSED and clears its failure log.
    pub fn reset(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, now);
        } else {
            inner.failures.clear();
            inner.half_open_attempts = 0;
        }
        info!("circuit {} reset to closed", self.name);
    }

    /// Drops failure timestamps older than the monitor window.
    fn prune(inner: &mut BreakerInner, now: u64, window_ms: u64) {
        while let Some(&oldest) = inner.failures.front() {
            if oldest + window_ms <= now {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: u64) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => {
                inner.opened_at = now;
                inner.half_open_attempts = 0;
                warn!("circuit {} opened ({} -> {})", self.name, from, to);
            }
            CircuitState::HalfOpen => {
                inner.half_open_attempts = 0;
                info!("circuit {} half-open, probing ({} -> {})", self.name, from, to);
            }
            CircuitState::Closed => {
                inner.failures.clear();
                inner.half_open_attempts = 0;
                info!("circuit {} closed ({} -> {})", self.name, from, to);
            }
        }

        inner.transitions.push_back(TransitionRecord {
            from,
            to,
            at_ms: now,
        });
        if inner.transitions.len() > TRANSITION_LOG_LEN {
            inner.transitions.pop_front();
        }
    }
}
