//! Signal aggregation: filter, rank, weight, cap, and merge raw signals
//! from every strategy into one globally ordered queue.

use crate::config::AggregatorConfig;
use crate::signals::TradeSignal;
use crate::types::StrategyKind;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Stateless aggregation over one scan's worth of raw signals.
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Aggregate raw signals into a queue ordered by descending weighted
    /// confidence. Empty input yields empty output, never an error.
    ///
    /// Steps per strategy group: clamp confidence to the configured floor
    /// (near-zero signals are kept, not discarded), drop expired signals and
    /// symbols that already hold an open position, rank by
    /// `0.5·confidence + 0.5·momentum`, keep the top K (doubled for
    /// high-frequency strategies). Groups are then merged by multiplying
    /// confidence with the per-strategy weight.
    pub fn aggregate(
        &self,
        raw: Vec<TradeSignal>,
        open_symbols: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<TradeSignal> {
        let mut groups: HashMap<StrategyKind, Vec<TradeSignal>> = HashMap::new();
        for mut signal in raw {
            if signal.is_expired(now, self.config.max_signal_age_secs) {
                debug!(symbol = %signal.symbol, strategy = %signal.strategy, "dropping expired signal");
                continue;
            }
            if open_symbols.contains(&signal.symbol) {
                debug!(symbol = %signal.symbol, "dropping signal, position already open");
                continue;
            }
            if signal.confidence < self.config.min_confidence_floor {
                signal.confidence = self.config.min_confidence_floor;
            }
            groups.entry(signal.strategy).or_default().push(signal);
        }

        let mut merged = Vec::new();
        for (strategy, mut group) in groups {
            group.sort_by(|a, b| {
                b.rank_score()
                    .partial_cmp(&a.rank_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let cap = self.cap_for(strategy);
            group.truncate(cap);

            let weight = self.weight_for(strategy);
            for mut signal in group {
                signal.confidence = (signal.confidence * weight).min(1.0);
                merged.push(signal);
            }
        }

        merged.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged
    }

    fn cap_for(&self, strategy: StrategyKind) -> usize {
        let base = self.config.max_signals_per_strategy;
        if self.config.high_frequency_strategies.contains(&strategy) {
            base * 2
        } else {
            base
        }
    }

    fn weight_for(&self, strategy: StrategyKind) -> f64 {
        self.config
            .strategy_weights
            .get(&strategy)
            .copied()
            .unwrap_or(self.config.default_strategy_weight)
    }
}
