//! Error types shared across the engine.
//!
//! The taxonomy mirrors the propagation policy: source-level failures are
//! classified so the resilience layer can decide retry vs. fail-fast, while
//! engine-level failures carry enough context to isolate one symbol's tick
//! from the rest of the process.

use thiserror::Error;

/// Failures from an upstream data or execution source.
#[derive(Debug, Error, Clone)]
pub enum SourceError {
    /// Transient network failure (connection reset, DNS, 5xx). Retryable.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Upstream asked us to slow down. Retryable after the limiter drains.
    ///
    /// The field is `source_name` rather than `source` because thiserror
    /// reserves `source` for the error cause chain.
    #[error("rate limited by {source_name}")]
    RateLimited { source_name: String },

    /// Upstream call exceeded its deadline. Retryable.
    #[error("timeout after {millis}ms calling {source_name}")]
    Timeout { source_name: String, millis: u64 },

    /// Circuit breaker for this source is open; skip it this cycle.
    #[error("circuit open for {source_name}")]
    CircuitOpen { source_name: String },

    /// Upstream rejected the request for a non-transient reason.
    #[error("upstream error from {source_name}: {reason}")]
    Upstream { source_name: String, reason: String },

    /// Every configured source failed and no cached value was usable.
    #[error("all sources exhausted for {symbol}")]
    SourcesExhausted { symbol: String },
}

impl SourceError {
    /// Whether a backoff retry against the same source makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::TransientNetwork(_)
                | SourceError::RateLimited { .. }
                | SourceError::Timeout { .. }
        )
    }
}

/// Failures surfaced by the position lifecycle engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Entry or exit swap failed. The entry attempt is aborted and the same
    /// signal is never retried; a failed exit leaves the position in the
    /// live table for the next tick.
    #[error("execution failure for {symbol}: {reason}")]
    Execution { symbol: String, reason: String },

    /// A pre-entry check rejected the signal (no position was created).
    #[error("entry rejected for {symbol}: {reason}")]
    EntryRejected { symbol: String, reason: String },

    /// Shutdown has begun; new entries are silently refused.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// Startup recovery could not load persisted positions. Fatal.
    #[error("recovery failed: {0}")]
    Recovery(String),

    /// Persistence write failed (logged, position state kept in memory).
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Market(#[from] SourceError),
}
