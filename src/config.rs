//! Bot configuration.
//!
//! All trading thresholds are configuration, not contracts: defaults here
//! document the tuning the bot ships with, and a JSON file can override any
//! of them. Structs deserialize with `serde(default)` so partial files work.

use crate::types::StrategyKind;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Knobs for the signal aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Confidence floor: near-zero signals are clamped up, not discarded.
    pub min_confidence_floor: f64,
    /// Per-strategy cap on retained signals.
    pub max_signals_per_strategy: usize,
    /// Strategies whose cap is doubled (fast-moving social/pump flows).
    pub high_frequency_strategies: HashSet<StrategyKind>,
    /// Weight applied to each strategy's confidence when merging groups.
    pub strategy_weights: HashMap<StrategyKind, f64>,
    /// Weight for strategies absent from the table. Low so unknown
    /// strategies are de-prioritized, never dropped.
    pub default_strategy_weight: f64,
    /// Signals older than this are rejected before consumption.
    pub max_signal_age_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let strategy_weights = HashMap::from([
            (StrategyKind::Trend, 1.2),
            (StrategyKind::Momentum, 1.1),
            (StrategyKind::Breakout, 1.0),
            (StrategyKind::MeanReversion, 0.9),
            (StrategyKind::Arbitrage, 1.3),
            (StrategyKind::Social, 0.8),
            (StrategyKind::Pump, 0.8),
        ]);
        Self {
            min_confidence_floor: 0.10,
            max_signals_per_strategy: 3,
            high_frequency_strategies: HashSet::from([StrategyKind::Social, StrategyKind::Pump]),
            strategy_weights,
            default_strategy_weight: 0.1,
            max_signal_age_secs: 600,
        }
    }
}

/// Position sizing tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Base position size in quote currency.
    pub base_size: Decimal,
    /// Hard cap regardless of any multiplier stack.
    pub absolute_max_size: Decimal,
    /// Fraction of account value risked per trade (e.g. 0.02 = 2%).
    pub risk_per_trade_pct: f64,
    /// Confidence tier boundaries: below `medium` is low, above `high` is high.
    pub confidence_medium: f64,
    pub confidence_high: f64,
    /// Multipliers per confidence tier.
    pub low_confidence_mult: f64,
    pub medium_confidence_mult: f64,
    pub high_confidence_mult: f64,
    /// Multipliers per strategy; absent strategies use 1.0.
    pub strategy_multipliers: HashMap<StrategyKind, f64>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_size: dec!(250),
            absolute_max_size: dec!(1000),
            risk_per_trade_pct: 0.02,
            confidence_medium: 0.5,
            confidence_high: 0.75,
            low_confidence_mult: 0.6,
            medium_confidence_mult: 1.0,
            high_confidence_mult: 1.4,
            strategy_multipliers: HashMap::from([
                (StrategyKind::Trend, 1.2),
                (StrategyKind::Arbitrage, 1.5),
                (StrategyKind::Social, 0.8),
                (StrategyKind::Pump, 0.7),
            ]),
        }
    }
}

/// Stop-loss and trailing-stop distance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Base stop distance as a fraction of entry price.
    pub base_stop_pct: f64,
    /// Clamp bounds for the computed stop distance.
    pub min_stop_pct: f64,
    pub max_stop_pct: f64,
    /// Base trailing callback as a fraction of the highest price.
    pub base_callback_pct: f64,
    /// The callback never tightens below this floor.
    pub min_callback_pct: f64,
    /// Profit thresholds (fraction of entry) at which the callback tightens,
    /// paired with the tightening factor applied at each.
    pub acceleration_thresholds: Vec<(f64, f64)>,
    /// Optional profit fraction that arms the trailing stop before the final
    /// take-profit tier does.
    pub trailing_activation_pct: Option<f64>,
    /// Take-profit tiers as (gain fraction over entry, size fraction).
    pub take_profit_tiers: Vec<(f64, f64)>,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            base_stop_pct: 0.05,
            min_stop_pct: 0.02,
            max_stop_pct: 0.15,
            base_callback_pct: 0.04,
            min_callback_pct: 0.01,
            acceleration_thresholds: vec![(0.15, 0.75), (0.30, 0.5)],
            trailing_activation_pct: None,
            take_profit_tiers: vec![(0.10, 0.4), (0.25, 0.4), (0.50, 0.2)],
        }
    }
}

/// Exit triggers evaluated each monitoring tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitTriggerConfig {
    /// Sideways timeout: exit after this long without minimum progress.
    pub max_holding_time_secs: u64,
    /// Net price move (fraction of entry) that counts as progress.
    pub minimum_progress_pct: f64,
    /// Sideways reallocation: consider freeing capital after this long.
    pub reallocate_after_secs: u64,
    /// Volume-spike ratio below this counts as declining volume.
    pub volume_decline_threshold: f64,
    /// Price range (fraction of price) below this counts as range-bound.
    pub range_threshold_pct: f64,
    /// Volume-decline exit: spike ratio below `1 - volume_decline_pct/100`.
    pub volume_decline_pct: f64,
}

impl Default for ExitTriggerConfig {
    fn default() -> Self {
        Self {
            max_holding_time_secs: 30 * 60,
            minimum_progress_pct: 0.05,
            reallocate_after_secs: 20 * 60,
            volume_decline_threshold: 0.6,
            range_threshold_pct: 0.02,
            volume_decline_pct: 50.0,
        }
    }
}

/// Resilience layer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures before a source's breaker trips open.
    pub failure_threshold: u32,
    /// Cooldown before an open breaker admits a half-open probe.
    pub reset_timeout_secs: u64,
    /// Probes allowed in half-open before snapping back to open.
    pub half_open_max_attempts: u32,
    /// Sliding-window rate limit: max requests per window per source.
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_millis: u64,
    /// Backoff retry schedule.
    pub retry_initial_delay_millis: u64,
    pub retry_backoff_factor: f64,
    pub retry_max_delay_millis: u64,
    pub retry_max_attempts: u32,
    /// Jitter as a fraction of the computed delay (e.g., 0.1 = ±10%).
    pub retry_jitter_fraction: f64,
    /// Price cache TTL.
    pub price_cache_ttl_millis: u64,
    /// Deadline for a single price/quote call.
    pub quote_timeout_secs: u64,
    /// Deadline for swap execution confirmation.
    pub swap_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 60,
            half_open_max_attempts: 2,
            rate_limit_max_requests: 10,
            rate_limit_window_millis: 1_000,
            retry_initial_delay_millis: 1_000,
            retry_backoff_factor: 2.0,
            retry_max_delay_millis: 32_000,
            retry_max_attempts: 4,
            retry_jitter_fraction: 0.1,
            price_cache_ttl_millis: 5_000,
            quote_timeout_secs: 5,
            swap_timeout_secs: 45,
        }
    }
}

/// Timer cadence for the orchestrator's loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub signal_scan_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub balance_check_interval_secs: u64,
    pub performance_interval_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            signal_scan_interval_secs: 30,
            monitor_interval_secs: 5,
            balance_check_interval_secs: 60,
            performance_interval_secs: 60,
        }
    }
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub aggregator: AggregatorConfig,
    pub sizing: SizingConfig,
    pub stops: StopConfig,
    pub exit_triggers: ExitTriggerConfig,
    pub resilience: ResilienceConfig,
    pub loops: LoopConfig,
    pub trading: TradingConfig,
}

/// Trading-wide limits that do not belong to a single module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Quote asset the bot trades against (e.g., "USDC").
    pub quote_asset: String,
    /// Slippage tolerance passed to the venue, in basis points.
    pub slippage_bps: u32,
    /// Quotes whose price impact exceeds this are rejected before submission.
    pub max_price_impact_pct: f64,
    /// Bound on total time spent force-exiting positions at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDC".to_string(),
            slippage_bps: 100,
            max_price_impact_pct: 3.0,
            shutdown_timeout_secs: 60,
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// any field the file omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stops.min_stop_pct > self.stops.max_stop_pct {
            return Err(ConfigError::Invalid(format!(
                "min_stop_pct {} exceeds max_stop_pct {}",
                self.stops.min_stop_pct, self.stops.max_stop_pct
            )));
        }
        if self.stops.min_callback_pct > self.stops.base_callback_pct {
            return Err(ConfigError::Invalid(format!(
                "min_callback_pct {} exceeds base_callback_pct {}",
                self.stops.min_callback_pct, self.stops.base_callback_pct
            )));
        }
        let tier_total: f64 = self.stops.take_profit_tiers.iter().map(|(_, f)| f).sum();
        if tier_total > 1.0 + f64::EPSILON {
            return Err(ConfigError::Invalid(format!(
                "take-profit size fractions sum to {:.3} (> 1.0)",
                tier_total
            )));
        }
        if !(self.aggregator.min_confidence_floor > 0.0
            && self.aggregator.min_confidence_floor < 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "min_confidence_floor {} must be in (0, 1)",
                self.aggregator.min_confidence_floor
            )));
        }
        Ok(())
    }
}
