//! Volatility regime classification.
//!
//! Computed on demand from recent candles, never persisted. All statistics
//! are plain f64; the forecast feeds multiplier lookups, not money math.

use crate::types::Candle;
use serde::{Deserialize, Serialize};

/// Volatility classification bucket driving sizing and stop distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolatilityRegime::Low => write!(f, "low"),
            VolatilityRegime::Medium => write!(f, "medium"),
            VolatilityRegime::High => write!(f, "high"),
            VolatilityRegime::Extreme => write!(f, "extreme"),
        }
    }
}

/// Point-in-time volatility estimate for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityForecast {
    pub regime: VolatilityRegime,
    /// ATR as a fraction of the last close.
    pub current_volatility: f64,
    /// Short-horizon projection (current scaled by the ATR trend).
    pub predicted_volatility: f64,
    /// Short ATR over long ATR; > 1 means volatility is expanding.
    pub atr_ratio: f64,
}

impl VolatilityForecast {
    /// Neutral forecast used when candle history is unavailable.
    pub fn neutral() -> Self {
        Self {
            regime: VolatilityRegime::Medium,
            current_volatility: 0.02,
            predicted_volatility: 0.02,
            atr_ratio: 1.0,
        }
    }
}

const SHORT_ATR_PERIOD: usize = 5;
const LONG_ATR_PERIOD: usize = 14;

// Regime boundaries on ATR as a fraction of price.
const LOW_VOL_CEILING: f64 = 0.01;
const MEDIUM_VOL_CEILING: f64 = 0.03;
const HIGH_VOL_CEILING: f64 = 0.07;

/// Build a forecast from recent candles (oldest first). Falls back to a
/// neutral medium-regime forecast when history is too short.
pub fn forecast_from_candles(candles: &[Candle]) -> VolatilityForecast {
    if candles.len() < LONG_ATR_PERIOD + 1 {
        return VolatilityForecast::neutral();
    }

    let close = candles[candles.len() - 1].close;
    if close <= 0.0 {
        return VolatilityForecast::neutral();
    }

    let long_atr = average_true_range(candles, LONG_ATR_PERIOD);
    let short_atr = average_true_range(candles, SHORT_ATR_PERIOD);

    let current = long_atr / close;
    let atr_ratio = if long_atr > 0.0 { short_atr / long_atr } else { 1.0 };
    let predicted = current * atr_ratio;

    let regime = classify(current.max(predicted));
    VolatilityForecast {
        regime,
        current_volatility: current,
        predicted_volatility: predicted,
        atr_ratio,
    }
}

fn classify(volatility: f64) -> VolatilityRegime {
    if volatility < LOW_VOL_CEILING {
        VolatilityRegime::Low
    } else if volatility < MEDIUM_VOL_CEILING {
        VolatilityRegime::Medium
    } else if volatility < HIGH_VOL_CEILING {
        VolatilityRegime::High
    } else {
        VolatilityRegime::Extreme
    }
}

/// Wilder-style ATR over the trailing `period` candles.
fn average_true_range(candles: &[Candle], period: usize) -> f64 {
    let start = candles.len().saturating_sub(period);
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in start..candles.len() {
        let prev_close = if i == 0 {
            candles[i].open
        } else {
            candles[i - 1].close
        };
        let tr = (candles[i].high - candles[i].low)
            .max((candles[i].high - prev_close).abs())
            .max((candles[i].low - prev_close).abs());
        sum += tr;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
