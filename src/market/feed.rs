//! Resilient market data feed.
//!
//! Wraps every configured data source in a circuit breaker, sliding-window
//! rate limiter, backoff retry, and deadline, tried in fallback order. The
//! price cache is the last resort: when every source fails, the last cached
//! value is served stale rather than failing the monitoring tick.

use crate::config::ResilienceConfig;
use crate::error::SourceError;
use crate::market::{DistributionMonitor, MarketDataSource};
use crate::resilience::{
    retry_with_backoff, BreakerConfig, CircuitRegistry, PriceCache, RetryPolicy,
    SlidingWindowLimiter,
};
use crate::types::{Candle, Clock, MarketTick};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Candle window used for volume/range statistics.
const STATS_CANDLE_INTERVAL_SECS: u64 = 60;
const STATS_CANDLE_LIMIT: usize = 20;

/// Ordered fallback chain over market data sources.
pub struct PriceFeed {
    sources: Vec<Arc<dyn MarketDataSource>>,
    breakers: Arc<CircuitRegistry>,
    limiters: DashMap<String, Arc<SlidingWindowLimiter>>,
    retry: RetryPolicy,
    cache: PriceCache,
    rate_limit_max: usize,
    rate_limit_window: Duration,
    quote_timeout: Duration,
}

impl PriceFeed {
    pub fn new(sources: Vec<Arc<dyn MarketDataSource>>, config: &ResilienceConfig) -> Self {
        let breakers = Arc::new(CircuitRegistry::new(BreakerConfig {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            half_open_max_attempts: config.half_open_max_attempts,
        }));
        Self {
            sources,
            breakers,
            limiters: DashMap::new(),
            retry: RetryPolicy {
                initial_delay_ms: config.retry_initial_delay_millis,
                backoff_factor: config.retry_backoff_factor,
                max_delay_ms: config.retry_max_delay_millis,
                max_attempts: config.retry_max_attempts,
                jitter_fraction: config.retry_jitter_fraction,
            },
            cache: PriceCache::new(Duration::from_millis(config.price_cache_ttl_millis)),
            rate_limit_max: config.rate_limit_max_requests,
            rate_limit_window: Duration::from_millis(config.rate_limit_window_millis),
            quote_timeout: Duration::from_secs(config.quote_timeout_secs),
        }
    }

    /// Shared circuit state, for status reporting.
    pub fn breakers(&self) -> Arc<CircuitRegistry> {
        self.breakers.clone()
    }

    fn limiter(&self, source: &str) -> Arc<SlidingWindowLimiter> {
        if let Some(existing) = self.limiters.get(source) {
            return existing.clone();
        }
        self.limiters
            .entry(source.to_string())
            .or_insert_with(|| {
                Arc::new(SlidingWindowLimiter::new(
                    self.rate_limit_max,
                    self.rate_limit_window,
                ))
            })
            .clone()
    }

    /// Current price for a symbol. Fresh cache first, then each source in
    /// order, then the stale cache.
    pub async fn price(&self, symbol: &str) -> Result<Decimal, SourceError> {
        if let Some(price) = self.cache.get_fresh(symbol) {
            return Ok(price);
        }

        for source in &self.sources {
            let name = source.name().to_string();
            let breaker = self.breakers.breaker(&name);
            if let Err(err) = breaker.check() {
                debug!(source = %name, symbol, error = %err, "skipping source, circuit open");
                continue;
            }
            self.limiter(&name).acquire().await;

            let deadline = self.quote_timeout;
            let result = retry_with_backoff(&self.retry, &name, || {
                let source = source.clone();
                let symbol = symbol.to_string();
                let name = name.clone();
                async move {
                    match tokio::time::timeout(deadline, source.price(&symbol)).await {
                        Ok(inner) => inner,
                        Err(_) => Err(SourceError::Timeout {
                            source_name: name,
                            millis: deadline.as_millis() as u64,
                        }),
                    }
                }
            })
            .await;

            match result {
                Ok(price) => {
                    breaker.record_success();
                    self.cache.insert(symbol, price);
                    return Ok(price);
                }
                Err(err) => {
                    breaker.record_failure();
                    warn!(source = %name, symbol, error = %err, "price source failed, trying next");
                }
            }
        }

        // All sources down: stale-but-available beats failing the caller.
        self.cache
            .get_stale(symbol)
            .ok_or_else(|| SourceError::SourcesExhausted {
                symbol: symbol.to_string(),
            })
    }

    /// Recent candles with the same fallback ordering (no cache).
    pub async fn candles(
        &self,
        symbol: &str,
        interval_secs: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        for source in &self.sources {
            let name = source.name().to_string();
            let breaker = self.breakers.breaker(&name);
            if breaker.check().is_err() {
                continue;
            }
            self.limiter(&name).acquire().await;

            let deadline = self.quote_timeout;
            let result = retry_with_backoff(&self.retry, &name, || {
                let source = source.clone();
                let symbol = symbol.to_string();
                let name = name.clone();
                async move {
                    match tokio::time::timeout(deadline, source.candles(&symbol, interval_secs, limit))
                        .await
                    {
                        Ok(inner) => inner,
                        Err(_) => Err(SourceError::Timeout {
                            source_name: name,
                            millis: deadline.as_millis() as u64,
                        }),
                    }
                }
            })
            .await;

            match result {
                Ok(candles) => {
                    breaker.record_success();
                    return Ok(candles);
                }
                Err(err) => {
                    breaker.record_failure();
                    warn!(source = %name, symbol, error = %err, "candle source failed, trying next");
                }
            }
        }
        Err(SourceError::SourcesExhausted {
            symbol: symbol.to_string(),
        })
    }

    /// Volume spike ratio (last candle vs. window average) and price range
    /// as a fraction of the last close.
    pub async fn volume_stats(&self, symbol: &str) -> Result<(f64, f64), SourceError> {
        let candles = self
            .candles(symbol, STATS_CANDLE_INTERVAL_SECS, STATS_CANDLE_LIMIT)
            .await?;
        Ok(compute_volume_stats(&candles))
    }

    /// Assemble a full market observation for one symbol. A failed
    /// distribution check degrades to `false` rather than blocking the tick.
    pub async fn market_tick(
        &self,
        symbol: &str,
        monitor: &dyn DistributionMonitor,
        clock: &dyn Clock,
    ) -> Result<MarketTick, SourceError> {
        let price = self.price(symbol).await?;
        let (volume_spike_ratio, price_range_pct) = match self.volume_stats(symbol).await {
            Ok(stats) => stats,
            Err(err) => {
                debug!(symbol, error = %err, "volume stats unavailable, assuming neutral");
                (1.0, 1.0)
            }
        };
        let whale_distribution = match monitor.whale_distribution(symbol).await {
            Ok(flag) => flag,
            Err(err) => {
                warn!(symbol, error = %err, "distribution check failed, assuming none");
                false
            }
        };
        Ok(MarketTick {
            symbol: symbol.to_string(),
            price,
            volume_spike_ratio,
            price_range_pct,
            whale_distribution,
            timestamp: clock.now(),
        })
    }
}

/// Pure candle statistics, split out for direct testing.
fn compute_volume_stats(candles: &[Candle]) -> (f64, f64) {
    if candles.len() < 2 {
        return (1.0, 1.0);
    }
    let last = &candles[candles.len() - 1];
    let prior = &candles[..candles.len() - 1];
    let avg_volume = prior.iter().map(|c| c.volume).sum::<f64>() / prior.len() as f64;
    let spike_ratio = if avg_volume > 0.0 {
        last.volume / avg_volume
    } else {
        1.0
    };

    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = last.close;
    let range_pct = if close > 0.0 { (high - low) / close } else { 0.0 };

    (spike_ratio, range_pct)
}
