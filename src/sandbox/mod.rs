//! Paper-trading mode.
//!
//! Simulated implementations of the venue, market data, and signal
//! boundaries so the whole engine can run without touching a live DEX.
//! Prices follow a random walk per symbol; fills are instant with a small
//! synthetic impact.

use crate::error::SourceError;
use crate::market::{ExecutionVenue, MarketDataSource, Quote, SwapOutcome};
use crate::signals::{SignalSource, TradeSignal};
use crate::types::{Candle, Side, StrategyKind};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-tick drift bound of the simulated random walk, as a fraction.
const WALK_STEP_PCT: f64 = 0.015;
/// Synthetic price impact per 1000 units of quote size, in percent.
const IMPACT_PER_1K_PCT: f64 = 0.4;

/// Shared simulated market. Both the paper venue and the paper data source
/// read the same walk so quotes and feed prices agree.
pub struct PaperMarket {
    prices: DashMap<String, f64>,
}

impl PaperMarket {
    pub fn new(symbols: &[(&str, f64)]) -> Arc<Self> {
        let prices = DashMap::new();
        for (symbol, price) in symbols {
            prices.insert(symbol.to_string(), *price);
        }
        Arc::new(Self { prices })
    }

    /// Advance one symbol's price by a random step and return it.
    fn step(&self, symbol: &str) -> Option<f64> {
        let mut entry = self.prices.get_mut(symbol)?;
        let drift = rand::rng().random_range(-WALK_STEP_PCT..WALK_STEP_PCT);
        *entry = (*entry * (1.0 + drift)).max(f64::MIN_POSITIVE);
        Some(*entry)
    }

    fn current(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|e| *e)
    }

    fn symbols(&self) -> Vec<String> {
        self.prices.iter().map(|e| e.key().clone()).collect()
    }
}

/// Instant-fill simulated venue backed by the shared walk. Token mints are
/// resolved back to symbols by suffix convention ("<SYMBOL>-mint").
pub struct PaperVenue {
    market: Arc<PaperMarket>,
    quote_balance: Mutex<Decimal>,
    quote_asset: String,
    fills: AtomicU64,
}

impl PaperVenue {
    pub fn new(market: Arc<PaperMarket>, quote_asset: &str, starting_balance: Decimal) -> Self {
        Self {
            market,
            quote_balance: Mutex::new(starting_balance),
            quote_asset: quote_asset.to_string(),
            fills: AtomicU64::new(0),
        }
    }

    fn lock_balance(&self) -> std::sync::MutexGuard<'_, Decimal> {
        self.quote_balance.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn symbol_for_mint(&self, mint: &str) -> String {
        mint.strip_suffix("-mint").unwrap_or(mint).to_string()
    }

    fn price_for(&self, asset: &str) -> Result<f64, SourceError> {
        let symbol = self.symbol_for_mint(asset);
        self.market
            .current(&symbol)
            .ok_or_else(|| SourceError::Upstream {
                source_name: "paper".to_string(),
                reason: format!("unknown asset {asset}"),
            })
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn quote(
        &self,
        input_asset: &str,
        output_asset: &str,
        amount: Decimal,
        slippage_bps: u32,
    ) -> Result<Quote, SourceError> {
        let buying = input_asset == self.quote_asset;
        let price = if buying {
            self.price_for(output_asset)?
        } else {
            self.price_for(input_asset)?
        };
        let amount_f = amount.to_f64().unwrap_or(0.0);
        let notional = if buying { amount_f } else { amount_f * price };
        let price_impact_pct = (notional / 1000.0) * IMPACT_PER_1K_PCT;

        let out = if buying { amount_f / price } else { amount_f * price };
        let out = out * (1.0 - price_impact_pct / 100.0);
        Ok(Quote {
            input_asset: input_asset.to_string(),
            output_asset: output_asset.to_string(),
            in_amount: amount,
            out_amount: Decimal::from_f64(out).unwrap_or(Decimal::ZERO),
            price: Decimal::from_f64(price).unwrap_or(Decimal::ZERO),
            price_impact_pct,
            slippage_bps,
        })
    }

    async fn swap(&self, quote: &Quote) -> Result<SwapOutcome, SourceError> {
        let selling_quote = quote.input_asset == self.quote_asset;
        {
            let mut balance = self.lock_balance();
            if selling_quote {
                if *balance < quote.in_amount {
                    return Ok(SwapOutcome::Failed {
                        reason: format!(
                            "insufficient {} balance: {} < {}",
                            self.quote_asset, balance, quote.in_amount
                        ),
                    });
                }
                *balance -= quote.in_amount;
            } else {
                *balance += quote.out_amount;
            }
        }
        let fill = self.fills.fetch_add(1, Ordering::SeqCst);
        Ok(SwapOutcome::Success {
            signature: format!("paper-fill-{fill}"),
            amount_out: quote.out_amount,
        })
    }

    async fn balance(&self, asset: &str) -> Result<Decimal, SourceError> {
        if asset == self.quote_asset {
            Ok(*self.lock_balance())
        } else {
            Ok(Decimal::ZERO)
        }
    }
}

/// Simulated market data source driven by the shared walk.
pub struct PaperDataSource {
    market: Arc<PaperMarket>,
    name: String,
}

impl PaperDataSource {
    pub fn new(market: Arc<PaperMarket>, name: &str) -> Self {
        Self {
            market,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl MarketDataSource for PaperDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn price(&self, symbol: &str) -> Result<Decimal, SourceError> {
        let price = self
            .market
            .step(symbol)
            .ok_or_else(|| SourceError::Upstream {
                source_name: self.name.clone(),
                reason: format!("unknown symbol {symbol}"),
            })?;
        Decimal::from_f64(price).ok_or_else(|| SourceError::Upstream {
            source_name: self.name.clone(),
            reason: "price out of range".to_string(),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        interval_secs: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        let close = self
            .market
            .current(symbol)
            .ok_or_else(|| SourceError::Upstream {
                source_name: self.name.clone(),
                reason: format!("unknown symbol {symbol}"),
            })?;
        let now = Utc::now();
        let mut rng = rand::rng();
        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            let age = (limit - i) as i64;
            let wobble = close * rng.random_range(0.0..WALK_STEP_PCT);
            let open = close + rng.random_range(-wobble..=wobble.max(f64::MIN_POSITIVE));
            candles.push(Candle {
                timestamp: now - ChronoDuration::seconds(age * interval_secs as i64),
                open,
                high: open.max(close) + wobble,
                low: open.min(close) - wobble,
                close,
                volume: rng.random_range(50.0..500.0),
            });
        }
        Ok(candles)
    }
}

/// Simulated strategy boundary: occasionally emits a buy signal for a random
/// simulated symbol.
pub struct PaperSignalSource {
    market: Arc<PaperMarket>,
    /// Probability per poll that any signal is produced.
    emit_probability: f64,
}

impl PaperSignalSource {
    pub fn new(market: Arc<PaperMarket>, emit_probability: f64) -> Self {
        Self {
            market,
            emit_probability,
        }
    }
}

#[async_trait]
impl SignalSource for PaperSignalSource {
    async fn poll_signals(&self) -> Result<Vec<TradeSignal>, SourceError> {
        let mut rng = rand::rng();
        if !rng.random_bool(self.emit_probability.clamp(0.0, 1.0)) {
            return Ok(Vec::new());
        }
        let symbols = self.market.symbols();
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let symbol = symbols[rng.random_range(0..symbols.len())].clone();
        let strategies = [
            StrategyKind::Momentum,
            StrategyKind::Trend,
            StrategyKind::Social,
        ];
        Ok(vec![TradeSignal {
            token_mint: format!("{symbol}-mint"),
            symbol,
            side: Side::Buy,
            confidence: rng.random_range(0.3..0.95),
            strategy: strategies[rng.random_range(0..strategies.len())],
            reason: "simulated momentum".to_string(),
            timestamp: Utc::now(),
            momentum: Some(rng.random_range(0.0..1.0)),
        }])
    }
}
