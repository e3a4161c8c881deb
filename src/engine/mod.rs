//! Position lifecycle engine.
//!
//! Owns the live position table and drives every transition: entry from an
//! aggregated signal, per-tick exit evaluation, partial and full exits, crash
//! recovery, and shutdown liquidation. Each symbol's tick is isolated; one
//! symbol failing never aborts the monitoring pass for the rest.

pub mod position;
pub mod stats;

pub use position::{
    evaluate_tick, ExitReason, Position, PositionStatus, TakeProfitLevel, TickAction, TrailingStop,
};
pub use stats::{DailyStats, TradeStats};

use crate::config::BotConfig;
use crate::error::{EngineError, SourceError};
use crate::logging::LogThrottle;
use crate::market::{
    DistributionMonitor, ExecutionVenue, PersistenceStore, PriceFeed, Quote, SwapOutcome,
    TradeRecord,
};
use crate::risk::{forecast_from_candles, PositionSizer, VolatilityForecast};
use crate::signals::TradeSignal;
use crate::types::{Clock, MarketTick, Side};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Candle window used to classify volatility before sizing an entry.
const SIZING_CANDLE_INTERVAL_SECS: u64 = 60;
const SIZING_CANDLE_LIMIT: usize = 30;

/// Minimum spacing between repeated per-symbol monitoring failure logs.
const MONITOR_WARN_INTERVAL_SECS: u64 = 60;

pub struct PositionEngine {
    positions: DashMap<String, Position>,
    stats: Mutex<TradeStats>,
    venue: Arc<dyn ExecutionVenue>,
    feed: Arc<PriceFeed>,
    monitor: Arc<dyn DistributionMonitor>,
    store: Arc<dyn PersistenceStore>,
    sizer: PositionSizer,
    clock: Arc<dyn Clock>,
    config: BotConfig,
    shutting_down: AtomicBool,
    monitor_warn_throttle: Mutex<LogThrottle>,
}

impl PositionEngine {
    pub fn new(
        config: BotConfig,
        venue: Arc<dyn ExecutionVenue>,
        feed: Arc<PriceFeed>,
        monitor: Arc<dyn DistributionMonitor>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sizer = PositionSizer::new(config.sizing.clone(), config.stops.clone());
        Self {
            positions: DashMap::new(),
            stats: Mutex::new(TradeStats::default()),
            venue,
            feed,
            monitor,
            store,
            sizer,
            clock,
            config,
            shutting_down: AtomicBool::new(false),
            monitor_warn_throttle: Mutex::new(LogThrottle::new(Duration::from_secs(
                MONITOR_WARN_INTERVAL_SECS,
            ))),
        }
    }

    /// Load persisted open positions into the live table. Runs once at
    /// startup, before any loop starts; failure here is fatal because
    /// trading with unknown existing exposure is worse than not starting.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let recovered = self
            .store
            .load_open_positions()
            .await
            .map_err(|err| EngineError::Recovery(err.to_string()))?;
        let count = recovered.len();
        for position in recovered {
            info!(
                symbol = %position.symbol,
                entry = %position.entry_price,
                remaining = %position.remaining_quantity,
                "recovered open position"
            );
            self.positions.insert(position.symbol.clone(), position);
        }
        Ok(count)
    }

    /// Symbols with an open position, for the aggregator's conflict filter.
    pub fn open_symbols(&self) -> HashSet<String> {
        self.positions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn stats_snapshot(&self) -> TradeStats {
        self.lock_stats().clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Try to open a position from an aggregated signal.
    ///
    /// Pre-entry gate order: shutdown flag, signal side and age, one-position-
    /// per-symbol conflict, quote with price-impact ceiling, distribution
    /// veto. A failed entry swap aborts the attempt; the same signal is never
    /// retried (the next scan produces fresh ones).
    pub async fn evaluate_signal(&self, signal: &TradeSignal) -> Result<Position, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        if signal.side != Side::Buy {
            return Err(EngineError::EntryRejected {
                symbol: signal.symbol.clone(),
                reason: "only buy signals open positions".to_string(),
            });
        }
        let now = self.clock.now();
        if signal.is_expired(now, self.config.aggregator.max_signal_age_secs) {
            return Err(EngineError::EntryRejected {
                symbol: signal.symbol.clone(),
                reason: "signal expired".to_string(),
            });
        }
        if self.positions.contains_key(&signal.symbol) {
            return Err(EngineError::EntryRejected {
                symbol: signal.symbol.clone(),
                reason: "position already open".to_string(),
            });
        }

        let forecast = self.volatility_forecast(&signal.symbol).await;
        let account_value = self
            .venue
            .balance(&self.config.trading.quote_asset)
            .await
            .map_err(EngineError::Market)?;
        let sized = self.sizer.size_position(
            signal.confidence,
            &forecast,
            signal.strategy,
            account_value,
        );
        if sized.size <= Decimal::ZERO {
            return Err(EngineError::EntryRejected {
                symbol: signal.symbol.clone(),
                reason: "sized to zero".to_string(),
            });
        }

        let quote = self
            .quote_with_deadline(
                &self.config.trading.quote_asset,
                &signal.token_mint,
                sized.size,
            )
            .await?;
        if quote.price_impact_pct > self.config.trading.max_price_impact_pct {
            return Err(EngineError::EntryRejected {
                symbol: signal.symbol.clone(),
                reason: format!(
                    "price impact {:.2}% exceeds ceiling {:.2}%",
                    quote.price_impact_pct, self.config.trading.max_price_impact_pct
                ),
            });
        }

        // Last gate before committing capital: holder distribution veto.
        match self.monitor.whale_distribution(&signal.symbol).await {
            Ok(true) => {
                return Err(EngineError::EntryRejected {
                    symbol: signal.symbol.clone(),
                    reason: "whale distribution detected".to_string(),
                });
            }
            Ok(false) => {}
            Err(err) => {
                warn!(symbol = %signal.symbol, error = %err, "distribution check failed, proceeding");
            }
        }

        let amount_out = match self.swap_with_deadline(&quote).await? {
            SwapOutcome::Success { amount_out, .. } => amount_out,
            SwapOutcome::Failed { reason } => {
                return Err(EngineError::Execution {
                    symbol: signal.symbol.clone(),
                    reason,
                });
            }
        };

        // Entry price in quote per base unit, as actually filled.
        let entry_price = if amount_out > Decimal::ZERO {
            sized.size / amount_out
        } else {
            quote.price
        };
        let plan = self.sizer.stop_plan(entry_price, &forecast, signal.strategy);

        let position = Position {
            symbol: signal.symbol.clone(),
            token_mint: signal.token_mint.clone(),
            entry_price,
            quantity: amount_out,
            remaining_quantity: amount_out,
            stop_loss: plan.initial_stop,
            take_profit_levels: plan.take_profit_levels,
            trailing_stop: plan.trailing,
            strategy: signal.strategy,
            confidence: signal.confidence,
            status: PositionStatus::Open,
            trailing_activation: plan.trailing_activation,
            opened_at: self.clock.now(),
            closed_at: None,
        };

        // Reserve the symbol atomically: a concurrent entry that filled
        // between the early conflict check and here must not be overwritten.
        match self.positions.entry(position.symbol.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(position.clone());
            }
            Entry::Occupied(_) => {
                error!(
                    symbol = %position.symbol,
                    "concurrent entry already holds this symbol, dropping duplicate fill"
                );
                return Err(EngineError::EntryRejected {
                    symbol: position.symbol.clone(),
                    reason: "position already open".to_string(),
                });
            }
        }

        info!(
            symbol = %position.symbol,
            strategy = %position.strategy,
            entry = %position.entry_price,
            size = %sized.size,
            quantity = %position.quantity,
            stop = %position.stop_loss,
            risk_pct = sized.adjusted_risk_pct,
            "opened position"
        );
        self.persist(&position).await;
        Ok(position)
    }

    /// One monitoring pass over every open position. Failures are scoped to
    /// their symbol: a dead feed for one token leaves the others monitored.
    pub async fn monitor_tick(&self) {
        let symbols: Vec<String> = self.positions.iter().map(|e| e.key().clone()).collect();
        for symbol in symbols {
            if let Err(err) = self.monitor_symbol(&symbol).await {
                let mut throttle = self
                    .monitor_warn_throttle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if throttle.should_log() {
                    let suppressed = throttle.get_and_reset_suppressed_count();
                    warn!(symbol = %symbol, error = %err, suppressed, "monitoring tick failed for symbol");
                }
            }
        }
    }

    async fn monitor_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let Some(position) = self.positions.get(symbol).map(|e| e.value().clone()) else {
            return Ok(());
        };
        let tick = self
            .feed
            .market_tick(symbol, self.monitor.as_ref(), self.clock.as_ref())
            .await
            .map_err(EngineError::Market)?;
        let actions = evaluate_tick(
            &position,
            &tick,
            &self.config.exit_triggers,
            self.clock.now(),
        );
        self.apply_actions(position, &tick, actions).await
    }

    async fn apply_actions(
        &self,
        mut position: Position,
        tick: &MarketTick,
        actions: Vec<TickAction>,
    ) -> Result<(), EngineError> {
        let mut dirty = false;
        for action in actions {
            match action {
                TickAction::PartialSell {
                    tier_index,
                    quantity,
                    activate_trailing,
                } => {
                    let quantity = quantity.min(position.remaining_quantity);
                    match self.sell(&position, quantity).await {
                        Ok(_) => {
                            // Flag flips only after the sell lands, so a failed
                            // sell retries the same tier next tick.
                            if let Some(tier) = position.take_profit_levels.get_mut(tier_index) {
                                tier.hit = true;
                            }
                            position.remaining_quantity =
                                (position.remaining_quantity - quantity).max(Decimal::ZERO);
                            if activate_trailing {
                                position.trailing_stop.activate(tick.price);
                            }
                            info!(
                                symbol = %position.symbol,
                                tier = tier_index,
                                quantity = %quantity,
                                price = %tick.price,
                                trailing_armed = activate_trailing,
                                "take-profit tier filled"
                            );
                            dirty = true;
                        }
                        Err(err) => {
                            warn!(
                                symbol = %position.symbol,
                                tier = tier_index,
                                error = %err,
                                "tier sell failed, will retry next tick"
                            );
                        }
                    }
                }
                TickAction::ActivateTrailing => {
                    position.trailing_stop.activate(tick.price);
                    debug!(
                        symbol = %position.symbol,
                        price = %tick.price,
                        stop = %position.trailing_stop.current_stop,
                        "trailing stop armed on profit threshold"
                    );
                    dirty = true;
                }
                TickAction::RatchetTrailing { highest, stop } => {
                    position.trailing_stop.highest_price = highest;
                    position.trailing_stop.current_stop = stop;
                    dirty = true;
                }
                TickAction::FullExit { reason } => {
                    return self.close_position(position, tick.price, reason).await;
                }
            }
        }
        if dirty {
            self.positions
                .insert(position.symbol.clone(), position.clone());
            self.persist(&position).await;
        }
        Ok(())
    }

    /// Sell the whole remaining quantity and retire the position. A failed
    /// exit swap leaves the position in the live table; the trigger fires
    /// again on the next tick.
    async fn close_position(
        &self,
        mut position: Position,
        mark_price: Decimal,
        reason: ExitReason,
    ) -> Result<(), EngineError> {
        let quantity = position.remaining_quantity;
        let exit_price = if quantity > Decimal::ZERO {
            let (price, _) = self.sell(&position, quantity).await?;
            price
        } else {
            mark_price
        };

        let now = self.clock.now();
        position.status = PositionStatus::Closed;
        position.closed_at = Some(now);
        position.remaining_quantity = Decimal::ZERO;

        let pnl = (exit_price - position.entry_price) * quantity;
        let roi_pct = position.progress(exit_price) * dec!(100);

        info!(
            symbol = %position.symbol,
            reason = %reason,
            entry = %position.entry_price,
            exit = %exit_price,
            pnl = %pnl,
            roi_pct = %roi_pct,
            "closed position"
        );

        self.lock_stats().record(pnl, now);

        let record = TradeRecord {
            symbol: position.symbol.clone(),
            token_mint: position.token_mint.clone(),
            strategy: position.strategy,
            entry_price: position.entry_price,
            exit_price,
            quantity,
            pnl,
            roi_pct,
            exit_reason: reason,
            opened_at: position.opened_at,
            closed_at: now,
        };

        self.positions.remove(&position.symbol);
        if let Err(err) = self.store.append_trade_record(&record).await {
            error!(symbol = %position.symbol, error = %err, "failed to archive trade record");
        }
        if let Err(err) = self.store.remove_position(&position.symbol).await {
            error!(symbol = %position.symbol, error = %err, "failed to remove persisted position");
        }
        Ok(())
    }

    /// Stop accepting entries and force-exit everything, bounded by the
    /// shutdown timeout. Positions still open when the deadline passes are
    /// logged loudly; their persisted state allows recovery on restart.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = Duration::from_secs(self.config.trading.shutdown_timeout_secs);
        info!(
            open = self.positions.len(),
            timeout_secs = deadline.as_secs(),
            "shutdown: force-exiting open positions"
        );

        let result = tokio::time::timeout(deadline, self.force_exit_all()).await;
        if result.is_err() {
            for entry in self.positions.iter() {
                error!(
                    symbol = %entry.key(),
                    remaining = %entry.value().remaining_quantity,
                    "position still open after shutdown timeout"
                );
            }
        }
    }

    async fn force_exit_all(&self) {
        let symbols: Vec<String> = self.positions.iter().map(|e| e.key().clone()).collect();
        for symbol in symbols {
            let Some(position) = self.positions.get(&symbol).map(|e| e.value().clone()) else {
                continue;
            };
            let mark = match self.feed.price(&symbol).await {
                Ok(price) => price,
                Err(_) => position.entry_price,
            };
            if let Err(err) = self
                .close_position(position, mark, ExitReason::BotShutdown)
                .await
            {
                error!(symbol = %symbol, error = %err, "shutdown exit failed");
            }
        }
    }

    async fn volatility_forecast(&self, symbol: &str) -> VolatilityForecast {
        match self
            .feed
            .candles(symbol, SIZING_CANDLE_INTERVAL_SECS, SIZING_CANDLE_LIMIT)
            .await
        {
            Ok(candles) => forecast_from_candles(&candles),
            Err(err) => {
                debug!(symbol, error = %err, "no candle history, using neutral volatility");
                VolatilityForecast::neutral()
            }
        }
    }

    /// Sell `quantity` of the position's base token for the quote asset.
    /// Returns the effective exit price and the quote amount received.
    async fn sell(
        &self,
        position: &Position,
        quantity: Decimal,
    ) -> Result<(Decimal, Decimal), EngineError> {
        let quote = self
            .quote_with_deadline(
                &position.token_mint,
                &self.config.trading.quote_asset,
                quantity,
            )
            .await?;
        match self.swap_with_deadline(&quote).await? {
            SwapOutcome::Success { amount_out, .. } => {
                let price = if quantity > Decimal::ZERO {
                    amount_out / quantity
                } else {
                    quote.price
                };
                Ok((price, amount_out))
            }
            SwapOutcome::Failed { reason } => Err(EngineError::Execution {
                symbol: position.symbol.clone(),
                reason,
            }),
        }
    }

    async fn quote_with_deadline(
        &self,
        input: &str,
        output: &str,
        amount: Decimal,
    ) -> Result<Quote, EngineError> {
        let deadline = Duration::from_secs(self.config.resilience.quote_timeout_secs);
        match tokio::time::timeout(
            deadline,
            self.venue
                .quote(input, output, amount, self.config.trading.slippage_bps),
        )
        .await
        {
            Ok(result) => result.map_err(EngineError::Market),
            Err(_) => Err(EngineError::Market(SourceError::Timeout {
                source_name: "venue".to_string(),
                millis: deadline.as_millis() as u64,
            })),
        }
    }

    async fn swap_with_deadline(&self, quote: &Quote) -> Result<SwapOutcome, EngineError> {
        let deadline = Duration::from_secs(self.config.resilience.swap_timeout_secs);
        match tokio::time::timeout(deadline, self.venue.swap(quote)).await {
            Ok(result) => result.map_err(EngineError::Market),
            Err(_) => Err(EngineError::Market(SourceError::Timeout {
                source_name: "venue".to_string(),
                millis: deadline.as_millis() as u64,
            })),
        }
    }

    /// Mirror a position mutation to the store. Persistence is best-effort:
    /// the in-memory table stays authoritative and the failure is logged.
    async fn persist(&self, position: &Position) {
        if let Err(err) = self.store.upsert_position(position).await {
            error!(symbol = %position.symbol, error = %err, "failed to persist position");
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, TradeStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
