//! Market Boundary Layer
//!
//! Exchange-agnostic traits and wire types for the core's external
//! collaborators: the DEX execution venue, market data sources, the holder
//! analysis service, and the persistence store. New venues or data providers
//! are added by implementing these traits without touching engine logic.

pub mod feed;

use crate::engine::position::{ExitReason, Position};
use crate::error::{EngineError, SourceError};
use crate::types::{Candle, StrategyKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use feed::PriceFeed;

/// A firm quote from the execution venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub input_asset: String,
    pub output_asset: String,
    pub in_amount: Decimal,
    pub out_amount: Decimal,
    /// Effective price (output per input).
    pub price: Decimal,
    /// Expected price impact of this trade, in percent.
    pub price_impact_pct: f64,
    pub slippage_bps: u32,
}

/// Outcome of submitting a swap.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    Success {
        /// Venue transaction signature.
        signature: String,
        amount_out: Decimal,
    },
    Failed {
        reason: String,
    },
}

/// DEX aggregator boundary.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn quote(
        &self,
        input_asset: &str,
        output_asset: &str,
        amount: Decimal,
        slippage_bps: u32,
    ) -> Result<Quote, SourceError>;

    async fn swap(&self, quote: &Quote) -> Result<SwapOutcome, SourceError>;

    async fn balance(&self, asset: &str) -> Result<Decimal, SourceError>;
}

/// One price/candle provider. Several are configured with fallback ordering;
/// all calls go through the resilience layer.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Stable name used for circuit/rate-limit state and logging.
    fn name(&self) -> &str;

    async fn price(&self, symbol: &str) -> Result<Decimal, SourceError>;

    async fn candles(
        &self,
        symbol: &str,
        interval_secs: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError>;
}

/// Boundary to the holder/distribution analysis service. The engine only
/// consumes the boolean verdict.
#[async_trait]
pub trait DistributionMonitor: Send + Sync {
    async fn whale_distribution(&self, symbol: &str) -> Result<bool, SourceError>;
}

/// Monitor that never flags distribution, for deployments without the
/// analysis service.
#[derive(Debug, Default)]
pub struct NoDistributionMonitor;

#[async_trait]
impl DistributionMonitor for NoDistributionMonitor {
    async fn whale_distribution(&self, _symbol: &str) -> Result<bool, SourceError> {
        Ok(false)
    }
}

/// Archived record of one completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub token_mint: String,
    pub strategy: StrategyKind,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Quantity sold in the closing transaction.
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub roi_pct: Decimal,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Externally visible bot state, persisted via the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub running: bool,
    pub open_positions: usize,
    pub total_trades: u64,
    pub total_pnl: Decimal,
    /// The core's only externally visible failure signal.
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persistence boundary. Position recovery happens once at startup; every
/// position mutation is mirrored here so a crash never orphans exposure.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_open_positions(&self) -> Result<Vec<Position>, EngineError>;

    async fn upsert_position(&self, position: &Position) -> Result<(), EngineError>;

    async fn remove_position(&self, symbol: &str) -> Result<(), EngineError>;

    async fn append_trade_record(&self, record: &TradeRecord) -> Result<(), EngineError>;

    async fn read_bot_status(&self) -> Result<BotStatus, EngineError>;

    async fn write_bot_status(&self, status: &BotStatus) -> Result<(), EngineError>;
}
