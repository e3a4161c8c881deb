//! Running trade statistics.
//!
//! Updated on every full exit and surfaced through the bot status.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-day aggregate bucket (UTC dates).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub pnl: Decimal,
}

/// Running aggregates across the bot's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
    /// Largest single-trade PnL seen so far.
    pub best_trade: Option<Decimal>,
    /// Smallest single-trade PnL seen so far.
    pub worst_trade: Option<Decimal>,
    pub daily: BTreeMap<NaiveDate, DailyStats>,
}

impl TradeStats {
    /// Record one completed trade.
    pub fn record(&mut self, pnl: Decimal, closed_at: DateTime<Utc>) {
        self.total_trades += 1;
        if pnl >= Decimal::ZERO {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        self.total_pnl += pnl;

        self.best_trade = Some(match self.best_trade {
            Some(best) if best >= pnl => best,
            _ => pnl,
        });
        self.worst_trade = Some(match self.worst_trade {
            Some(worst) if worst <= pnl => worst,
            _ => pnl,
        });

        let day = self.daily.entry(closed_at.date_naive()).or_default();
        day.trades += 1;
        if pnl >= Decimal::ZERO {
            day.wins += 1;
        } else {
            day.losses += 1;
        }
        day.pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn aggregates_wins_losses_and_extremes() {
        let mut stats = TradeStats::default();
        let day = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        stats.record(dec!(50), day);
        stats.record(dec!(-20), day);
        stats.record(dec!(120), day);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.total_pnl, dec!(150));
        assert_eq!(stats.best_trade, Some(dec!(120)));
        assert_eq!(stats.worst_trade, Some(dec!(-20)));
        assert!((stats.win_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn daily_buckets_split_on_utc_date() {
        let mut stats = TradeStats::default();
        let day1 = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 6, 2, 0, 1, 0).unwrap();

        stats.record(dec!(10), day1);
        stats.record(dec!(-5), day2);

        assert_eq!(stats.daily.len(), 2);
        assert_eq!(stats.daily[&day1.date_naive()].pnl, dec!(10));
        assert_eq!(stats.daily[&day2.date_naive()].losses, 1);
    }
}
