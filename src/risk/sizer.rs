//! Regime-aware position sizing and stop placement.
//!
//! Deterministic: identical inputs always produce identical outputs. All
//! multipliers come from configuration tables with documented defaults for
//! strategies or regimes absent from a table.

use crate::config::{SizingConfig, StopConfig};
use crate::engine::position::{TakeProfitLevel, TrailingStop};
use crate::risk::volatility::{VolatilityForecast, VolatilityRegime};
use crate::types::StrategyKind;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Result of sizing one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedPosition {
    /// Entry size in quote currency.
    pub size: Decimal,
    /// Fraction of account value actually at risk given the stop distance.
    pub adjusted_risk_pct: f64,
}

/// Stop-loss and trailing configuration for one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StopPlan {
    pub initial_stop: Decimal,
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub trailing: TrailingStop,
    pub trailing_activation: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    sizing: SizingConfig,
    stops: StopConfig,
}

impl PositionSizer {
    pub fn new(sizing: SizingConfig, stops: StopConfig) -> Self {
        Self { sizing, stops }
    }

    /// Size an entry: base size scaled by confidence tier, volatility
    /// regime, and strategy, then capped by the risk budget and the
    /// absolute maximum.
    pub fn size_position(
        &self,
        confidence: f64,
        forecast: &VolatilityForecast,
        strategy: StrategyKind,
        account_value: Decimal,
    ) -> SizedPosition {
        let confidence_mult = self.confidence_multiplier(confidence);
        let regime_mult = sizing_regime_multiplier(forecast.regime);
        let strategy_mult = self
            .sizing
            .strategy_multipliers
            .get(&strategy)
            .copied()
            .unwrap_or(1.0);

        let combined = confidence_mult * regime_mult * strategy_mult;
        let computed = self.sizing.base_size * decimal(combined);

        // Risk cap: how large a position keeps the loss at the stop within
        // the per-trade risk budget.
        let stop_distance = self.stop_distance_pct(forecast, strategy);
        let risk_amount = account_value * decimal(self.sizing.risk_per_trade_pct);
        let max_from_risk = if stop_distance > 0.0 {
            risk_amount / decimal(stop_distance)
        } else {
            self.sizing.absolute_max_size
        };

        let size = computed
            .min(max_from_risk)
            .min(self.sizing.absolute_max_size);

        let adjusted_risk_pct = if account_value.is_zero() {
            0.0
        } else {
            let exposure = size * decimal(stop_distance) / account_value;
            exposure.to_f64().unwrap_or(0.0)
        };

        SizedPosition {
            size,
            adjusted_risk_pct,
        }
    }

    /// Stop placement for an entry at `entry_price`: initial stop distance
    /// scaled by regime, strategy, and the ATR trend, clamped to the
    /// configured bounds; take-profit tiers and the (initially inactive)
    /// trailing stop come from the same plan.
    pub fn stop_plan(
        &self,
        entry_price: Decimal,
        forecast: &VolatilityForecast,
        strategy: StrategyKind,
    ) -> StopPlan {
        let distance = self.stop_distance_pct(forecast, strategy);
        let initial_stop = entry_price * (Decimal::ONE - decimal(distance));

        let callback = self.trailing_callback_pct(0.0, forecast);
        let take_profit_levels = self
            .stops
            .take_profit_tiers
            .iter()
            .map(|(gain, fraction)| TakeProfitLevel {
                price: entry_price * (Decimal::ONE + decimal(*gain)),
                size_fraction: decimal(*fraction),
                hit: false,
            })
            .collect();

        StopPlan {
            initial_stop,
            take_profit_levels,
            trailing: TrailingStop::inactive(decimal(callback)),
            trailing_activation: self.stops.trailing_activation_pct.map(decimal),
        }
    }

    /// Trailing callback for the given unrealized profit fraction. As
    /// profit crosses each acceleration threshold the callback tightens,
    /// never below the configured floor.
    pub fn trailing_callback_pct(&self, profit_pct: f64, forecast: &VolatilityForecast) -> f64 {
        let regime_mult = stop_regime_multiplier(forecast.regime);
        let mut callback = self.stops.base_callback_pct * regime_mult;
        for (threshold, factor) in &self.stops.acceleration_thresholds {
            if profit_pct >= *threshold {
                callback = self.stops.base_callback_pct * regime_mult * factor;
            }
        }
        callback.max(self.stops.min_callback_pct)
    }

    fn stop_distance_pct(&self, forecast: &VolatilityForecast, strategy: StrategyKind) -> f64 {
        let regime_mult = stop_regime_multiplier(forecast.regime);
        let strategy_mult = self
            .sizing
            .strategy_multipliers
            .get(&strategy)
            .copied()
            .unwrap_or(1.0);
        // Expanding volatility widens the stop, capped so a spike cannot
        // blow past the clamp band on its own.
        let atr_adjustment = forecast.atr_ratio.clamp(0.75, 1.5);

        (self.stops.base_stop_pct * regime_mult * strategy_mult * atr_adjustment)
            .clamp(self.stops.min_stop_pct, self.stops.max_stop_pct)
    }

    fn confidence_multiplier(&self, confidence: f64) -> f64 {
        if confidence >= self.sizing.confidence_high {
            self.sizing.high_confidence_mult
        } else if confidence >= self.sizing.confidence_medium {
            self.sizing.medium_confidence_mult
        } else {
            self.sizing.low_confidence_mult
        }
    }
}

fn sizing_regime_multiplier(regime: VolatilityRegime) -> f64 {
    match regime {
        VolatilityRegime::Low => 1.2,
        VolatilityRegime::Medium => 1.0,
        VolatilityRegime::High => 0.7,
        VolatilityRegime::Extreme => 0.5,
    }
}

fn stop_regime_multiplier(regime: VolatilityRegime) -> f64 {
    match regime {
        VolatilityRegime::Low => 0.8,
        VolatilityRegime::Medium => 1.0,
        VolatilityRegime::High => 1.25,
        VolatilityRegime::Extreme => 1.5,
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> PositionSizer {
        PositionSizer::new(SizingConfig::default(), StopConfig::default())
    }

    fn forecast(regime: VolatilityRegime) -> VolatilityForecast {
        VolatilityForecast {
            regime,
            current_volatility: 0.02,
            predicted_volatility: 0.02,
            atr_ratio: 1.0,
        }
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let s = sizer();
        let f = forecast(VolatilityRegime::High);
        let a = s.size_position(0.85, &f, StrategyKind::Trend, dec!(10000));
        let b = s.size_position(0.85, &f, StrategyKind::Trend, dec!(10000));
        assert_eq!(a, b);
    }

    #[test]
    fn high_volatility_shrinks_size() {
        let s = sizer();
        let calm = s.size_position(0.85, &forecast(VolatilityRegime::Low), StrategyKind::Trend, dec!(10000));
        let wild = s.size_position(
            0.85,
            &forecast(VolatilityRegime::Extreme),
            StrategyKind::Trend,
            dec!(10000),
        );
        assert!(wild.size < calm.size);
    }

    #[test]
    fn confidence_tiers_scale_size() {
        let s = sizer();
        let f = forecast(VolatilityRegime::Medium);
        let low = s.size_position(0.3, &f, StrategyKind::Breakout, dec!(10000));
        let mid = s.size_position(0.6, &f, StrategyKind::Breakout, dec!(10000));
        let high = s.size_position(0.9, &f, StrategyKind::Breakout, dec!(10000));
        assert!(low.size < mid.size && mid.size < high.size);
    }

    #[test]
    fn risk_budget_caps_small_accounts() {
        let s = sizer();
        let f = forecast(VolatilityRegime::Medium);
        // 2% of 500 = 10 risk budget; 5% stop -> max 200 from risk
        let sized = s.size_position(0.9, &f, StrategyKind::Breakout, dec!(500));
        assert!(sized.size <= dec!(200));
    }

    #[test]
    fn absolute_max_is_a_hard_ceiling() {
        let mut config = SizingConfig::default();
        config.base_size = dec!(5000);
        let s = PositionSizer::new(config, StopConfig::default());
        let sized = s.size_position(
            0.9,
            &forecast(VolatilityRegime::Low),
            StrategyKind::Arbitrage,
            dec!(1_000_000),
        );
        assert_eq!(sized.size, dec!(1000));
    }

    #[test]
    fn stop_distance_clamped_to_bounds() {
        let s = sizer();
        let mut f = forecast(VolatilityRegime::Extreme);
        f.atr_ratio = 3.0; // clamped to 1.5
        let plan = s.stop_plan(dec!(100), &f, StrategyKind::Arbitrage);
        // max_stop_pct = 0.15 -> stop never below 85
        assert!(plan.initial_stop >= dec!(85));

        let calm = s.stop_plan(dec!(100), &forecast(VolatilityRegime::Low), StrategyKind::Social);
        // min_stop_pct = 0.02 -> stop never above 98
        assert!(calm.initial_stop <= dec!(98));
    }

    #[test]
    fn stop_plan_builds_tiers_from_config() {
        let s = sizer();
        let plan = s.stop_plan(dec!(100), &forecast(VolatilityRegime::Medium), StrategyKind::Trend);
        let prices: Vec<Decimal> = plan.take_profit_levels.iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![dec!(110.0), dec!(125.0), dec!(150.0)]);
        assert!(plan.take_profit_levels.iter().all(|t| !t.hit));
        assert!(!plan.trailing.active);
    }

    #[test]
    fn callback_accelerates_but_never_below_floor() {
        let s = sizer();
        let f = forecast(VolatilityRegime::Medium);
        let at_entry = s.trailing_callback_pct(0.0, &f);
        let after_first = s.trailing_callback_pct(0.16, &f);
        let after_second = s.trailing_callback_pct(0.35, &f);
        assert!(after_first < at_entry);
        assert!(after_second < after_first);
        assert!(after_second >= StopConfig::default().min_callback_pct);

        // Extreme acceleration config still respects the floor.
        let mut tight = StopConfig::default();
        tight.acceleration_thresholds = vec![(0.1, 0.01)];
        let s = PositionSizer::new(SizingConfig::default(), tight);
        assert_eq!(
            s.trailing_callback_pct(0.5, &f),
            StopConfig::default().min_callback_pct
        );
    }
}
