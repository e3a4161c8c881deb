//! Trade signals and their aggregation.
//!
//! Signals are ephemeral: produced by upstream strategies, weighted and
//! ranked by the aggregator, consumed once by the position engine.

pub mod aggregator;

pub use aggregator::SignalAggregator;

use crate::error::SourceError;
use crate::types::{Side, StrategyKind};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Boundary to the upstream strategy services: each scan cycle pulls the raw
/// signals produced since the last poll.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn poll_signals(&self) -> Result<Vec<TradeSignal>, SourceError>;
}

/// A candidate trade recommendation with a confidence score and originating
/// strategy. `confidence` is mutable during aggregation (floor clamping and
/// strategy weighting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub token_mint: String,
    pub side: Side,
    /// In [0, 1] on arrival; carries the weighted score after aggregation.
    pub confidence: f64,
    pub strategy: StrategyKind,
    /// Free-text rationale from the originating strategy.
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Short-term momentum in [0, 1], when the strategy provides it.
    pub momentum: Option<f64>,
}

impl TradeSignal {
    /// Signals older than the configured max age are rejected before
    /// consumption.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        now - self.timestamp > Duration::seconds(max_age_secs as i64)
    }

    /// Ranking score within a strategy group.
    pub fn rank_score(&self) -> f64 {
        0.5 * self.confidence + 0.5 * self.momentum.unwrap_or(0.0)
    }
}
