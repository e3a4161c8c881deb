//! # Circuit Breaker Pattern
//!
//! Prevents cascading failures by temporarily blocking requests to a failing
//! upstream source, giving it time to recover.
//!
//! ## States
//! - **Closed**: normal operation, requests pass through.
//! - **Open**: requests are rejected after `failure_threshold` consecutive
//!   failures, until `reset_timeout` has elapsed since the last failure.
//! - **HalfOpen**: a limited number of probe requests are admitted; the first
//!   success closes the circuit, exhausting the probe budget without a
//!   success re-opens it.
//!
//! The half-open attempt counter resets to zero whenever the breaker leaves
//! the half-open state.

use crate::error::SourceError;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Blocking requests due to recent failures
    Open,
    /// Testing if the source recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker tuning, shared by every source in a registry.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Cooldown before an open breaker admits half-open probes.
    pub reset_timeout: Duration,
    /// Probes admitted in half-open before snapping back to open.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            half_open_max_attempts: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    half_open_attempts: u32,
}

/// Circuit breaker for one upstream source.
///
/// The half-open budget makes state transitions compound (check-and-count),
/// so the state lives behind a mutex rather than separate atomics. The lock
/// is held only for the few loads/stores of a transition.
#[derive(Debug)]
pub struct CircuitBreaker {
    source: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            source: source.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                half_open_attempts: 0,
            }),
        }
    }

    /// Name of the source this breaker guards.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current state, after applying any due open → half-open transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_enter_half_open(&mut inner);
        inner.state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Admission check, called before every upstream request.
    ///
    /// Returns `Err(CircuitOpen)` while the breaker is open and cooling
    /// down. In half-open, each admission consumes one probe from the
    /// budget; exhausting the budget without a recorded success snaps the
    /// breaker back to open and restarts the cooldown.
    pub fn check(&self) -> Result<(), SourceError> {
        let mut inner = self.lock();
        self.maybe_enter_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(SourceError::CircuitOpen {
                source_name: self.source.clone(),
            }),
            CircuitState::HalfOpen => {
                if inner.half_open_attempts >= self.config.half_open_max_attempts {
                    warn!(
                        source = %self.source,
                        attempts = inner.half_open_attempts,
                        "half-open probe budget exhausted, re-opening circuit"
                    );
                    inner.state = CircuitState::Open;
                    inner.half_open_attempts = 0;
                    inner.last_failure = Some(Instant::now());
                    Err(SourceError::CircuitOpen {
                        source_name: self.source.clone(),
                    })
                } else {
                    inner.half_open_attempts += 1;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call: the circuit closes and all counters reset.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(source = %self.source, from = %inner.state, "circuit closing after success");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.half_open_attempts = 0;
    }

    /// Record a failed call. Trips the breaker once the consecutive-failure
    /// threshold is reached; any failure in half-open re-opens immediately.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open && inner.state != CircuitState::Open {
            warn!(
                source = %self.source,
                failures = inner.failures,
                "circuit breaker tripped to open"
            );
            inner.state = CircuitState::Open;
            inner.half_open_attempts = 0;
        }
    }

    fn maybe_enter_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let cooled = inner
                .last_failure
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if cooled {
                info!(source = %self.source, "cooldown elapsed, circuit half-open");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_attempts = 0;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned lock means a panic mid-transition; the state itself is
        // still a valid enum, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared registry handing out one breaker per upstream source.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get or create the breaker for a source.
    pub fn breaker(&self, source: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(source) {
            return existing.clone();
        }
        self.breakers
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(source, self.config.clone())))
            .clone()
    }

    /// Snapshot of every source's state, for status reporting.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}
