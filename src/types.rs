//! Common Types Module
//!
//! Shared types used across the codebase to avoid circular dependencies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Originating strategy of a trade signal.
///
/// Explicit enum so that multiplier/weight lookups have deterministic,
/// documented behavior for every variant. New strategies land in `Other`
/// until they get their own variant and weight-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Trend,
    Momentum,
    Breakout,
    MeanReversion,
    Arbitrage,
    Social,
    Pump,
    Other,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyKind::Trend => "trend",
            StrategyKind::Momentum => "momentum",
            StrategyKind::Breakout => "breakout",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Arbitrage => "arbitrage",
            StrategyKind::Social => "social",
            StrategyKind::Pump => "pump",
            StrategyKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A single market observation for one symbol, consumed by the monitoring
/// tick. `volume_spike_ratio` and `whale_distribution` come from the upstream
/// data/analysis services; the engine only consumes them.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTick {
    /// The trading symbol (e.g., "BONK/USDC").
    pub symbol: String,
    /// The current price.
    pub price: Decimal,
    /// Recent volume relative to its baseline (1.0 = flat).
    pub volume_spike_ratio: f64,
    /// High minus low over the recent window, as a fraction of price.
    pub price_range_pct: f64,
    /// Whether holder analysis flags large-wallet distribution.
    pub whale_distribution: bool,
    /// The timestamp of the observation.
    pub timestamp: DateTime<Utc>,
}

/// Exchange-agnostic candle data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time abstraction so the engine and tests share deterministic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
    fn now_ts_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
