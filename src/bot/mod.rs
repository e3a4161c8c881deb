//! Bot orchestrator.
//!
//! Spawns one task per repeating loop around the position engine: signal
//! scanning, position monitoring, balance checks, and performance reporting.
//! The loops run concurrently, so a slow entry swap in the scan loop never
//! stalls position monitoring. A watch channel carries the shutdown request;
//! once it fires the loop tasks are stopped and the engine liquidates.

use crate::config::BotConfig;
use crate::engine::{Position, PositionEngine};
use crate::error::EngineError;
use crate::logging::LogThrottle;
use crate::market::{BotStatus, ExecutionVenue, PersistenceStore};
use crate::signals::{SignalAggregator, SignalSource, TradeSignal};
use crate::types::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Minimum spacing between repeated failure logs in the loop tasks.
const THROTTLE_INTERVAL_SECS: u64 = 60;

pub struct TradingBot {
    engine: Arc<PositionEngine>,
    aggregator: SignalAggregator,
    signal_source: Arc<dyn SignalSource>,
    venue: Arc<dyn ExecutionVenue>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    config: BotConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl TradingBot {
    pub fn new(
        config: BotConfig,
        engine: Arc<PositionEngine>,
        signal_source: Arc<dyn SignalSource>,
        venue: Arc<dyn ExecutionVenue>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let aggregator = SignalAggregator::new(config.aggregator.clone());
        Self {
            engine,
            aggregator,
            signal_source,
            venue,
            store,
            clock,
            config,
            shutdown_tx,
        }
    }

    /// Handle that requests shutdown from another task (signal handler,
    /// test harness). Idempotent.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub fn engine(&self) -> Arc<PositionEngine> {
        self.engine.clone()
    }

    /// Externally exposed entry point for a single signal, bypassing the
    /// scan loop. Subject to the same gates as scanned signals.
    pub async fn evaluate_signal(&self, signal: &TradeSignal) -> Result<Position, EngineError> {
        self.engine.evaluate_signal(signal).await
    }

    /// Recover persisted positions, spawn the loop tasks, and wait for a
    /// shutdown request. Each loop is its own task, isolated from the others;
    /// on shutdown the tasks are aborted before the engine liquidates, so no
    /// loop races the force-exit pass.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        let recovered = self.engine.recover().await?;
        info!(recovered, "bot starting");
        self.write_status(true, None).await;

        let handles = vec![
            self.clone().spawn_scan_loop(),
            self.clone().spawn_monitor_loop(),
            self.clone().spawn_balance_loop(),
            self.clone().spawn_performance_loop(),
        ];

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("shutdown requested, stopping loops");
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.engine.shutdown().await;
        self.write_status(false, None).await;
        info!("bot stopped");
        Ok(())
    }

    fn spawn_scan_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                self.config.loops.signal_scan_interval_secs.max(1),
            ));
            let mut throttle = LogThrottle::new(Duration::from_secs(THROTTLE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.scan_cycle(&mut throttle).await;
            }
        })
    }

    fn spawn_monitor_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                self.config.loops.monitor_interval_secs.max(1),
            ));
            let mut heartbeat = LogThrottle::new(Duration::from_secs(THROTTLE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.monitor_cycle(&mut heartbeat).await;
            }
        })
    }

    fn spawn_balance_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                self.config.loops.balance_check_interval_secs.max(1),
            ));
            loop {
                ticker.tick().await;
                self.balance_cycle().await;
            }
        })
    }

    fn spawn_performance_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                self.config.loops.performance_interval_secs.max(1),
            ));
            loop {
                ticker.tick().await;
                self.performance_cycle().await;
            }
        })
    }

    /// One signal scan: poll the strategy boundary, aggregate, and hand each
    /// surviving signal to the engine. Rejections are routine; only swap
    /// failures get surfaced through the bot status.
    async fn scan_cycle(&self, poll_failure: &mut LogThrottle) {
        let raw = match self.signal_source.poll_signals().await {
            Ok(raw) => raw,
            Err(err) => {
                if poll_failure.should_log() {
                    let suppressed = poll_failure.get_and_reset_suppressed_count();
                    warn!(error = %err, suppressed, "signal poll failed");
                }
                return;
            }
        };
        if raw.is_empty() {
            return;
        }

        let open = self.engine.open_symbols();
        let queue = self.aggregator.aggregate(raw, &open, self.clock.now());
        debug!(candidates = queue.len(), "signal scan produced candidates");

        for signal in &queue {
            match self.engine.evaluate_signal(signal).await {
                Ok(position) => {
                    info!(symbol = %position.symbol, strategy = %position.strategy, "entry executed");
                }
                Err(EngineError::ShutdownInProgress) => return,
                Err(EngineError::EntryRejected { symbol, reason }) => {
                    debug!(symbol = %symbol, reason = %reason, "entry rejected");
                }
                Err(err) => {
                    warn!(symbol = %signal.symbol, error = %err, "entry attempt failed");
                    self.write_status(true, Some(err.to_string())).await;
                }
            }
        }
    }

    async fn monitor_cycle(&self, heartbeat: &mut LogThrottle) {
        self.engine.monitor_tick().await;
        if heartbeat.should_log() {
            let stats = self.engine.stats_snapshot();
            info!(
                open = self.engine.open_position_count(),
                total_trades = stats.total_trades,
                total_pnl = %stats.total_pnl,
                "monitor heartbeat"
            );
        }
    }

    async fn balance_cycle(&self) {
        match self.venue.balance(&self.config.trading.quote_asset).await {
            Ok(balance) => {
                debug!(asset = %self.config.trading.quote_asset, balance = %balance, "balance check");
            }
            Err(err) => {
                warn!(error = %err, "balance check failed");
            }
        }
    }

    async fn performance_cycle(&self) {
        let stats = self.engine.stats_snapshot();
        info!(
            total_trades = stats.total_trades,
            win_rate = format!("{:.1}%", stats.win_rate() * 100.0),
            total_pnl = %stats.total_pnl,
            best = ?stats.best_trade,
            worst = ?stats.worst_trade,
            "performance summary"
        );
        self.write_status(true, None).await;
    }

    async fn write_status(&self, running: bool, last_error: Option<String>) {
        let stats = self.engine.stats_snapshot();
        let status = BotStatus {
            running,
            open_positions: self.engine.open_position_count(),
            total_trades: stats.total_trades,
            total_pnl: stats.total_pnl,
            last_error,
            updated_at: Some(self.clock.now()),
        };
        if let Err(err) = self.store.write_bot_status(&status).await {
            error!(error = %err, "failed to write bot status");
        }
    }
}
