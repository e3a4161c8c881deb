//! Position model and the pure per-tick transition function.
//!
//! `evaluate_tick` is pure given its inputs: it inspects one position against
//! one market observation and returns the actions the engine should take,
//! without performing any I/O. This keeps tier-hit and trailing-stop logic
//! testable with fake clocks and synthetic ticks.

use crate::config::ExitTriggerConfig;
use crate::types::{MarketTick, StrategyKind};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One take-profit tier. `hit` is set exactly once, after the partial sell
/// for this tier succeeds, and is never unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: Decimal,
    /// Fraction of the original quantity sold when this tier fires.
    pub size_fraction: Decimal,
    pub hit: bool,
}

/// Trailing stop state. Only active after the final take-profit tier fires
/// or the configured activation threshold is crossed; the stop ratchets
/// upward with new highs and never loosens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub active: bool,
    pub highest_price: Decimal,
    pub current_stop: Decimal,
    /// Callback distance as a fraction of the highest price.
    pub callback_pct: Decimal,
}

impl TrailingStop {
    pub fn inactive(callback_pct: Decimal) -> Self {
        Self {
            active: false,
            highest_price: Decimal::ZERO,
            current_stop: Decimal::ZERO,
            callback_pct,
        }
    }

    /// Arm the trailing stop from the given price.
    pub fn activate(&mut self, price: Decimal) {
        self.active = true;
        self.highest_price = price;
        self.current_stop = price * (Decimal::ONE - self.callback_pct);
    }

    /// Ratchet with a new high. The stop only ever moves up.
    pub fn observe(&mut self, price: Decimal) {
        if self.active && price > self.highest_price {
            self.highest_price = price;
            let candidate = price * (Decimal::ONE - self.callback_pct);
            if candidate > self.current_stop {
                self.current_stop = candidate;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was (partially or fully) exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SidewaysTimeout,
    SidewaysDetected,
    WhaleDistribution,
    TrailingStop,
    StopLoss,
    TakeProfit,
    VolumeDecline,
    BotShutdown,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::SidewaysTimeout => "sideways_timeout",
            ExitReason::SidewaysDetected => "sideways_detected",
            ExitReason::WhaleDistribution => "whale_distribution",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::VolumeDecline => "volume_decline",
            ExitReason::BotShutdown => "bot_shutdown",
        };
        write!(f, "{}", s)
    }
}

/// An open (or just-closed) position. One per symbol at most.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Trading symbol (e.g., "BONK/USDC").
    pub symbol: String,
    /// On-chain asset handle for the base token.
    pub token_mint: String,
    pub entry_price: Decimal,
    /// Original quantity bought at entry.
    pub quantity: Decimal,
    /// Quantity still held. Monotonically non-increasing, never negative.
    pub remaining_quantity: Decimal,
    pub stop_loss: Decimal,
    /// Ordered ascending by price.
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub trailing_stop: TrailingStop,
    pub strategy: StrategyKind,
    pub confidence: f64,
    pub status: PositionStatus,
    /// Profit fraction at which the trailing stop arms early. `None` means
    /// only the final take-profit tier arms it.
    pub trailing_activation: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Age of the position at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at
    }

    /// Whether every configured tier has fired.
    pub fn all_tiers_hit(&self) -> bool {
        self.take_profit_levels.iter().all(|t| t.hit)
    }

    /// Net price move since entry as a fraction of entry price.
    pub fn progress(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }
}

/// What the engine should do for a position after one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// Sell `quantity` for the given tier index, then mark it hit.
    PartialSell {
        tier_index: usize,
        quantity: Decimal,
        /// Arm the trailing stop at the tick price once the sell succeeds.
        activate_trailing: bool,
    },
    /// Arm the trailing stop without selling (activation threshold crossed).
    ActivateTrailing,
    /// Ratchet the trailing stop to the observed new high.
    RatchetTrailing { highest: Decimal, stop: Decimal },
    /// Sell the whole remaining quantity and close the position.
    FullExit { reason: ExitReason },
}

/// Evaluate one monitoring tick against one position.
///
/// Exit precedence per tick: sideways timeout, sideways reallocation, whale
/// distribution under an active trailing stop, trailing stop, static stop
/// loss, take-profit tiers, volume decline. At most one of these produces an
/// action, except that a trailing ratchet is emitted alongside nothing else
/// being triggered.
pub fn evaluate_tick(
    position: &Position,
    tick: &MarketTick,
    config: &ExitTriggerConfig,
    now: DateTime<Utc>,
) -> Vec<TickAction> {
    let price = tick.price;
    let age_secs = position.age(now).num_seconds().max(0) as u64;
    let progress = position.progress(price);

    // 1. Sideways timeout: held too long with no meaningful move either way.
    let min_progress = Decimal::from_f64(config.minimum_progress_pct).unwrap_or(Decimal::ZERO);
    if age_secs > config.max_holding_time_secs && progress.abs() < min_progress {
        return vec![TickAction::FullExit {
            reason: ExitReason::SidewaysTimeout,
        }];
    }

    // 2. Sideways reallocation: old position, fading volume, tight range.
    if age_secs > config.reallocate_after_secs
        && tick.volume_spike_ratio < config.volume_decline_threshold
        && tick.price_range_pct < config.range_threshold_pct
    {
        return vec![TickAction::FullExit {
            reason: ExitReason::SidewaysDetected,
        }];
    }

    // 3. Whale distribution while riding a trailing stop.
    if tick.whale_distribution && position.trailing_stop.active {
        return vec![TickAction::FullExit {
            reason: ExitReason::WhaleDistribution,
        }];
    }

    // 4. Trailing stop hit.
    if position.trailing_stop.active && price <= position.trailing_stop.current_stop {
        return vec![TickAction::FullExit {
            reason: ExitReason::TrailingStop,
        }];
    }

    // 5. Static stop-loss hit.
    if price <= position.stop_loss {
        return vec![TickAction::FullExit {
            reason: ExitReason::StopLoss,
        }];
    }

    // 6. Take-profit tiers, ascending order, each at most once. Only the
    // lowest unhit crossed tier fires this tick; the `hit` flag is what
    // makes repeated observations of the same crossed price idempotent.
    for (index, tier) in position.take_profit_levels.iter().enumerate() {
        if !tier.hit && price >= tier.price {
            let is_final = index + 1 == position.take_profit_levels.len();
            return vec![TickAction::PartialSell {
                tier_index: index,
                quantity: position.quantity * tier.size_fraction,
                activate_trailing: is_final,
            }];
        }
    }

    // 7. Volume-decline exit.
    let volume_floor = 1.0 - config.volume_decline_pct / 100.0;
    if tick.volume_spike_ratio < volume_floor {
        return vec![TickAction::FullExit {
            reason: ExitReason::VolumeDecline,
        }];
    }

    let mut actions = Vec::new();

    // Activation threshold: arm the trailing stop on sufficient profit even
    // before the final tier fires.
    if !position.trailing_stop.active {
        if let Some(threshold) = position.trailing_activation {
            if progress >= threshold {
                actions.push(TickAction::ActivateTrailing);
            }
        }
    }

    // Ratchet an active trailing stop on a new high.
    if position.trailing_stop.active && price > position.trailing_stop.highest_price {
        let stop = price * (Decimal::ONE - position.trailing_stop.callback_pct);
        actions.push(TickAction::RatchetTrailing {
            highest: price,
            stop: stop.max(position.trailing_stop.current_stop),
        });
    }

    actions
}
