use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use solpilot::config::{BotConfig, ResilienceConfig};
use solpilot::engine::position::{
    ExitReason, Position, PositionStatus, TakeProfitLevel, TrailingStop,
};
use solpilot::engine::PositionEngine;
use solpilot::error::{EngineError, SourceError};
use solpilot::market::{
    BotStatus, DistributionMonitor, ExecutionVenue, MarketDataSource, PersistenceStore, PriceFeed,
    Quote, SwapOutcome, TradeRecord,
};
use solpilot::bot::TradingBot;
use solpilot::signals::{SignalSource, TradeSignal};
use solpilot::types::{Candle, Clock, Side, StrategyKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- Mocks ---

mock! {
    pub Venue {}

    #[async_trait]
    impl ExecutionVenue for Venue {
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
}

mock! {
    pub Store {}

    #[async_trait]
    impl PersistenceStore for Store {
        async fn load_open_positions(&self) -> Result<Vec<Position>, EngineError>;
        async fn upsert_position(&self, position: &Position) -> Result<(), EngineError>;
        async fn remove_position(&self, symbol: &str) -> Result<(), EngineError>;
        async fn append_trade_record(&self, record: &TradeRecord) -> Result<(), EngineError>;
        async fn read_bot_status(&self) -> Result<BotStatus, EngineError>;
        async fn write_bot_status(&self, status: &BotStatus) -> Result<(), EngineError>;
    }
}

mock! {
    pub Monitor {}

    #[async_trait]
    impl DistributionMonitor for Monitor {
        async fn whale_distribution(&self, symbol: &str) -> Result<bool, SourceError>;
    }
}

/// Data source serving a single mutable price, so tests can move the market
/// between ticks. Candle requests fail, which the feed degrades gracefully.
struct StubSource {
    price: Arc<Mutex<Decimal>>,
}

#[async_trait]
impl MarketDataSource for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    async fn price(&self, _symbol: &str) -> Result<Decimal, SourceError> {
        Ok(*self.price.lock().unwrap())
    }

    async fn candles(
        &self,
        _symbol: &str,
        _interval_secs: u64,
        _limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        Err(SourceError::Upstream {
            source_name: "stub".into(),
            reason: "no candles".into(),
        })
    }
}

#[derive(Debug, Clone)]
struct MockClock {
    current_time: Arc<Mutex<i64>>,
}

impl MockClock {
    fn new(start_ts: i64) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start_ts)),
        }
    }

    fn advance_secs(&self, secs: i64) {
        *self.current_time.lock().unwrap() += secs * 1000;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(*self.current_time.lock().unwrap())
            .unwrap()
    }
}

// --- Helpers ---

const T0_MILLIS: i64 = 1_700_000_000_000;

fn fast_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.resilience = ResilienceConfig {
        retry_initial_delay_millis: 1,
        retry_max_attempts: 1,
        // No caching, so price moves between ticks are always observed.
        price_cache_ttl_millis: 0,
        ..Default::default()
    };
    config
}

struct Harness {
    engine: Arc<PositionEngine>,
    clock: MockClock,
    price: Arc<Mutex<Decimal>>,
}

fn harness(venue: MockVenue, store: MockStore, monitor: MockMonitor, price: Decimal) -> Harness {
    let clock = MockClock::new(T0_MILLIS);
    let shared_price = Arc::new(Mutex::new(price));
    let feed = Arc::new(PriceFeed::new(
        vec![Arc::new(StubSource {
            price: shared_price.clone(),
        }) as Arc<dyn MarketDataSource>],
        &fast_config().resilience,
    ));
    let engine = Arc::new(PositionEngine::new(
        fast_config(),
        Arc::new(venue),
        feed,
        Arc::new(monitor),
        Arc::new(store),
        Arc::new(clock.clone()),
    ));
    Harness {
        engine,
        clock,
        price: shared_price,
    }
}

fn buy_signal(symbol: &str, clock: &MockClock) -> TradeSignal {
    TradeSignal {
        symbol: symbol.to_string(),
        token_mint: format!("{symbol}-mint"),
        side: Side::Buy,
        confidence: 0.8,
        strategy: StrategyKind::Momentum,
        reason: "test entry".into(),
        timestamp: clock.now(),
        momentum: Some(0.5),
    }
}

fn quote_with_impact(price: Decimal, amount: Decimal, impact: f64) -> Quote {
    Quote {
        input_asset: "USDC".into(),
        output_asset: "mint".into(),
        in_amount: amount,
        out_amount: amount / price,
        price,
        price_impact_pct: impact,
        slippage_bps: 100,
    }
}

fn open_position(symbol: &str, opened_at: DateTime<Utc>) -> Position {
    Position {
        symbol: symbol.to_string(),
        token_mint: format!("{symbol}-mint"),
        entry_price: dec!(100),
        quantity: dec!(10),
        remaining_quantity: dec!(10),
        stop_loss: dec!(95),
        take_profit_levels: vec![
            TakeProfitLevel { price: dec!(110), size_fraction: dec!(0.4), hit: false },
            TakeProfitLevel { price: dec!(125), size_fraction: dec!(0.4), hit: false },
            TakeProfitLevel { price: dec!(150), size_fraction: dec!(0.2), hit: false },
        ],
        trailing_stop: TrailingStop::inactive(dec!(0.04)),
        strategy: StrategyKind::Momentum,
        confidence: 0.8,
        status: PositionStatus::Open,
        trailing_activation: None,
        opened_at,
        closed_at: None,
    }
}

fn permissive_store() -> MockStore {
    with_catch_alls(MockStore::new())
}

/// Append accept-anything store expectations. mockall hands each call to
/// the earliest-registered matching expectation, so tests that assert on
/// specific calls must register those before these are added.
fn with_catch_alls(mut store: MockStore) -> MockStore {
    store.expect_upsert_position().returning(|_| Ok(()));
    store.expect_remove_position().returning(|_| Ok(()));
    store.expect_append_trade_record().returning(|_| Ok(()));
    store.expect_write_bot_status().returning(|_| Ok(()));
    store
}

// --- Entry tests ---

#[tokio::test]
async fn entry_opens_position_with_stops_and_tiers() {
    let mut venue = MockVenue::new();
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(2), amount, 0.5)));
    venue.expect_swap().times(1).returning(|quote| {
        Ok(SwapOutcome::Success {
            signature: "sig-1".into(),
            amount_out: quote.out_amount,
        })
    });
    let mut monitor = MockMonitor::new();
    monitor.expect_whale_distribution().returning(|_| Ok(false));

    let h = harness(venue, permissive_store(), monitor, dec!(2));
    let signal = buy_signal("WIF/USDC", &h.clock);
    let position = h.engine.evaluate_signal(&signal).await.unwrap();

    assert_eq!(position.status, PositionStatus::Open);
    assert!(position.stop_loss < position.entry_price);
    assert_eq!(position.take_profit_levels.len(), 3);
    assert!(position.take_profit_levels.iter().all(|t| !t.hit));
    assert_eq!(position.remaining_quantity, position.quantity);
    assert!(!position.trailing_stop.active);
    assert_eq!(h.engine.open_position_count(), 1);
}

#[tokio::test]
async fn second_entry_for_open_symbol_is_rejected() {
    let mut venue = MockVenue::new();
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(2), amount, 0.5)));
    venue.expect_swap().times(1).returning(|quote| {
        Ok(SwapOutcome::Success {
            signature: "sig-1".into(),
            amount_out: quote.out_amount,
        })
    });
    let mut monitor = MockMonitor::new();
    monitor.expect_whale_distribution().returning(|_| Ok(false));

    let h = harness(venue, permissive_store(), monitor, dec!(2));
    let signal = buy_signal("WIF/USDC", &h.clock);
    h.engine.evaluate_signal(&signal).await.unwrap();

    let err = h.engine.evaluate_signal(&signal).await.unwrap_err();
    assert!(matches!(err, EngineError::EntryRejected { .. }));
    assert_eq!(h.engine.open_position_count(), 1);
}

#[tokio::test]
async fn excessive_price_impact_rejects_before_swap() {
    let mut venue = MockVenue::new();
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(2), amount, 8.0)));
    venue.expect_swap().times(0);
    let monitor = MockMonitor::new();

    let h = harness(venue, MockStore::new(), monitor, dec!(2));
    let err = h
        .engine
        .evaluate_signal(&buy_signal("WIF/USDC", &h.clock))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntryRejected { .. }));
    assert_eq!(h.engine.open_position_count(), 0);
}

#[tokio::test]
async fn whale_distribution_vetoes_entry() {
    let mut venue = MockVenue::new();
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(2), amount, 0.5)));
    venue.expect_swap().times(0);
    let mut monitor = MockMonitor::new();
    monitor.expect_whale_distribution().returning(|_| Ok(true));

    let h = harness(venue, MockStore::new(), monitor, dec!(2));
    let err = h
        .engine
        .evaluate_signal(&buy_signal("WIF/USDC", &h.clock))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntryRejected { .. }));
}

#[tokio::test]
async fn failed_entry_swap_creates_no_position() {
    let mut venue = MockVenue::new();
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(2), amount, 0.5)));
    venue.expect_swap().times(1).returning(|_| {
        Ok(SwapOutcome::Failed {
            reason: "slippage exceeded".into(),
        })
    });
    let mut monitor = MockMonitor::new();
    monitor.expect_whale_distribution().returning(|_| Ok(false));

    let h = harness(venue, MockStore::new(), monitor, dec!(2));
    let err = h
        .engine
        .evaluate_signal(&buy_signal("WIF/USDC", &h.clock))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Execution { .. }));
    assert_eq!(h.engine.open_position_count(), 0);
}

#[tokio::test]
async fn expired_signal_is_rejected() {
    let venue = MockVenue::new();
    let h = harness(venue, MockStore::new(), MockMonitor::new(), dec!(2));
    let signal = buy_signal("WIF/USDC", &h.clock);
    h.clock.advance_secs(601);
    let err = h.engine.evaluate_signal(&signal).await.unwrap_err();
    assert!(matches!(err, EngineError::EntryRejected { .. }));
}

// --- Recovery ---

#[tokio::test]
async fn recover_loads_persisted_positions() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());
    let mut store = MockStore::new();
    store
        .expect_load_open_positions()
        .times(1)
        .return_once(move || Ok(vec![position]));

    let h = harness(MockVenue::new(), store, MockMonitor::new(), dec!(100));
    // The harness clock starts at the same instant.
    assert_eq!(h.engine.recover().await.unwrap(), 1);
    assert!(h.engine.open_symbols().contains("BONK/USDC"));
}

#[tokio::test]
async fn recovery_failure_is_fatal() {
    let mut store = MockStore::new();
    store
        .expect_load_open_positions()
        .return_once(|| Err(EngineError::Persistence("disk gone".into())));

    let h = harness(MockVenue::new(), store, MockMonitor::new(), dec!(100));
    assert!(matches!(
        h.engine.recover().await,
        Err(EngineError::Recovery(_))
    ));
}

// --- Monitoring ---

/// Seed the store with one recoverable position and relax everything else.
/// Specific expectations already on `store` keep priority over the
/// catch-alls added here.
fn seeded_store(mut store: MockStore, position: Position) -> MockStore {
    store
        .expect_load_open_positions()
        .return_once(move || Ok(vec![position]));
    with_catch_alls(store)
}

fn quiet_monitor() -> MockMonitor {
    let mut monitor = MockMonitor::new();
    monitor.expect_whale_distribution().returning(|_| Ok(false));
    monitor
}

fn sell_venue(times: usize) -> MockVenue {
    let mut venue = MockVenue::new();
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(1), amount, 0.1)));
    venue.expect_swap().times(times).returning(|quote| {
        Ok(SwapOutcome::Success {
            signature: "sig-exit".into(),
            amount_out: quote.out_amount,
        })
    });
    venue
}

#[tokio::test]
async fn stop_loss_tick_closes_and_archives() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());
    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.exit_reason == ExitReason::StopLoss && r.symbol == "BONK/USDC")
        .times(1)
        .returning(|_| Ok(()));
    store
        .expect_remove_position()
        .with(eq("BONK/USDC"))
        .times(1)
        .returning(|_| Ok(()));
    let store = seeded_store(store, position);

    let h = harness(sell_venue(1), store, quiet_monitor(), dec!(94));
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(300);
    h.engine.monitor_tick().await;

    assert_eq!(h.engine.open_position_count(), 0);
    let stats = h.engine.stats_snapshot();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.losing_trades, 1);
}

#[tokio::test]
async fn failed_exit_sell_keeps_position_for_next_tick() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());
    let mut venue = MockVenue::new();
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(1), amount, 0.1)));
    venue.expect_swap().returning(|_| {
        Ok(SwapOutcome::Failed {
            reason: "route not found".into(),
        })
    });

    let h = harness(
        venue,
        seeded_store(MockStore::new(), position),
        quiet_monitor(),
        dec!(94),
    );
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(300);
    h.engine.monitor_tick().await;

    // Still open; the stop-loss trigger fires again next tick.
    assert_eq!(h.engine.open_position_count(), 1);
    assert_eq!(h.engine.stats_snapshot().total_trades, 0);
}

#[tokio::test]
async fn tier_fires_once_and_reduces_remaining() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());

    let h = harness(
        sell_venue(1),
        seeded_store(MockStore::new(), position),
        quiet_monitor(),
        dec!(112),
    );
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(60);
    h.engine.monitor_tick().await;

    let open = h.engine.open_positions();
    assert_eq!(open.len(), 1);
    assert!(open[0].take_profit_levels[0].hit);
    assert_eq!(open[0].remaining_quantity, dec!(6.0));

    // Same price again: the hit flag keeps the tier from refiring, so the
    // swap expectation of exactly one call holds.
    h.clock.advance_secs(60);
    h.engine.monitor_tick().await;
    assert_eq!(
        h.engine.open_positions()[0].remaining_quantity,
        dec!(6.0)
    );
}

#[tokio::test]
async fn final_tier_arms_trailing_then_trailing_exit_wins() {
    let clock = MockClock::new(T0_MILLIS);
    let mut position = open_position("BONK/USDC", clock.now());
    position.take_profit_levels[0].hit = true;
    position.take_profit_levels[1].hit = true;
    // Partial fills left a runner beyond the final tier's fraction.
    position.remaining_quantity = dec!(3);

    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.exit_reason == ExitReason::TrailingStop)
        .times(1)
        .returning(|_| Ok(()));
    let store = seeded_store(store, position);

    // Two sells: the final tier fill, then the trailing exit.
    let h = harness(sell_venue(2), store, quiet_monitor(), dec!(151));
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(60);
    h.engine.monitor_tick().await;

    let open = h.engine.open_positions();
    assert!(open[0].trailing_stop.active);
    assert_eq!(open[0].trailing_stop.highest_price, dec!(151));
    assert_eq!(open[0].remaining_quantity, dec!(1.0));

    // Price drops through the trailing stop (151 * 0.96 = 144.96).
    *h.price.lock().unwrap() = dec!(144);
    h.clock.advance_secs(60);
    h.engine.monitor_tick().await;
    assert_eq!(h.engine.open_position_count(), 0);
}

#[tokio::test]
async fn sideways_timeout_closes_flat_position() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());
    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.exit_reason == ExitReason::SidewaysTimeout)
        .times(1)
        .returning(|_| Ok(()));
    let store = seeded_store(store, position);

    let h = harness(sell_venue(1), store, quiet_monitor(), dec!(101));
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(31 * 60);
    h.engine.monitor_tick().await;
    assert_eq!(h.engine.open_position_count(), 0);
}

#[tokio::test]
async fn one_symbol_failing_does_not_block_others() {
    let clock = MockClock::new(T0_MILLIS);
    let healthy = open_position("BONK/USDC", clock.now());
    let doomed = open_position("AAA/USDC", clock.now());
    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.symbol == "BONK/USDC")
        .times(1)
        .returning(|_| Ok(()));
    store
        .expect_load_open_positions()
        .return_once(move || Ok(vec![doomed, healthy]));
    let store = with_catch_alls(store);

    // The stub feed serves both symbols the same price, so both see the
    // stop-loss trigger; the venue rejects the AAA sell and fills the other.
    let mut venue = MockVenue::new();
    venue.expect_quote().returning(|input, output, amount, bps| {
        Ok(Quote {
            input_asset: input.to_string(),
            output_asset: output.to_string(),
            in_amount: amount,
            out_amount: amount,
            price: dec!(1),
            price_impact_pct: 0.1,
            slippage_bps: bps,
        })
    });
    venue.expect_swap().returning(|quote| {
        if quote.input_asset.starts_with("AAA") {
            Ok(SwapOutcome::Failed {
                reason: "venue hiccup".into(),
            })
        } else {
            Ok(SwapOutcome::Success {
                signature: "sig".into(),
                amount_out: quote.out_amount,
            })
        }
    });

    let h = harness(venue, store, quiet_monitor(), dec!(94));
    h.engine.recover().await.unwrap();
    h.clock.advance_secs(300);
    h.engine.monitor_tick().await;

    // One closed, one survived its failed exit.
    assert_eq!(h.engine.open_position_count(), 1);
    assert_eq!(h.engine.stats_snapshot().total_trades, 1);
}

// --- Shutdown ---

#[tokio::test]
async fn shutdown_liquidates_and_blocks_new_entries() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());
    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.exit_reason == ExitReason::BotShutdown)
        .times(1)
        .returning(|_| Ok(()));
    let store = seeded_store(store, position);

    let h = harness(sell_venue(1), store, quiet_monitor(), dec!(100));
    h.engine.recover().await.unwrap();
    h.engine.shutdown().await;

    assert_eq!(h.engine.open_position_count(), 0);
    let err = h
        .engine
        .evaluate_signal(&buy_signal("WIF/USDC", &h.clock))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ShutdownInProgress));
}

// --- Orchestrator ---

/// Signal boundary whose poll never returns, pinning the scan loop.
struct StalledSource;

#[async_trait]
impl SignalSource for StalledSource {
    async fn poll_signals(&self) -> Result<Vec<TradeSignal>, SourceError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_signal_poll_does_not_block_monitoring() {
    let clock = MockClock::new(T0_MILLIS);
    let position = open_position("BONK/USDC", clock.now());

    let mut store = MockStore::new();
    store
        .expect_append_trade_record()
        .withf(|r| r.exit_reason == ExitReason::StopLoss)
        .times(1)
        .returning(|_| Ok(()));
    let store = Arc::new(seeded_store(store, position));

    let mut venue = MockVenue::new();
    venue
        .expect_quote()
        .returning(|_, _, amount, _| Ok(quote_with_impact(dec!(1), amount, 0.1)));
    venue.expect_swap().returning(|quote| {
        Ok(SwapOutcome::Success {
            signature: "sig-exit".into(),
            amount_out: quote.out_amount,
        })
    });
    venue.expect_balance().returning(|_| Ok(dec!(10000)));
    let venue = Arc::new(venue);

    let mut config = fast_config();
    config.loops.signal_scan_interval_secs = 1;
    config.loops.monitor_interval_secs = 1;
    config.loops.balance_check_interval_secs = 3600;
    config.loops.performance_interval_secs = 3600;

    let price = Arc::new(Mutex::new(dec!(94)));
    let feed = Arc::new(PriceFeed::new(
        vec![Arc::new(StubSource { price }) as Arc<dyn MarketDataSource>],
        &config.resilience,
    ));
    let engine = Arc::new(PositionEngine::new(
        config.clone(),
        venue.clone(),
        feed,
        Arc::new(quiet_monitor()),
        store.clone(),
        Arc::new(clock.clone()),
    ));

    let bot = Arc::new(TradingBot::new(
        config,
        engine.clone(),
        Arc::new(StalledSource),
        venue,
        store,
        Arc::new(clock),
    ));
    let shutdown = bot.shutdown_handle();
    let runner = tokio::spawn(bot.run());

    // The scan loop is wedged inside its first poll; monitoring must still
    // observe the stop-loss breach and close the position.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.open_position_count(), 0);
    assert_eq!(engine.stats_snapshot().total_trades, 1);

    shutdown.send(true).unwrap();
    runner.await.unwrap().unwrap();
}
