//! Short-TTL price cache with stale-on-failure fallback.
//!
//! Keyed by asset pair. Within the TTL, cached prices avoid redundant
//! upstream calls; once every source has failed, the last cached value is
//! handed back stale rather than failing the caller (logged as stale use).

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    fetched_at: Instant,
}

/// Concurrent price cache shared across loops.
#[derive(Debug)]
pub struct PriceCache {
    ttl: Duration,
    entries: DashMap<String, CachedPrice>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Record a freshly fetched price.
    pub fn insert(&self, symbol: &str, price: Decimal) {
        self.entries.insert(
            symbol.to_string(),
            CachedPrice {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Cached price if it is still within the TTL.
    pub fn get_fresh(&self, symbol: &str) -> Option<Decimal> {
        self.entries.get(symbol).and_then(|entry| {
            if entry.fetched_at.elapsed() <= self.ttl {
                Some(entry.price)
            } else {
                None
            }
        })
    }

    /// Last cached price regardless of age. Fallback for total source
    /// failure; the staleness is logged because downstream risk decisions
    /// are made on this number.
    pub fn get_stale(&self, symbol: &str) -> Option<Decimal> {
        self.entries.get(symbol).map(|entry| {
            let age = entry.fetched_at.elapsed();
            if age > self.ttl {
                warn!(
                    symbol,
                    age_ms = age.as_millis() as u64,
                    price = %entry.price,
                    "serving stale cached price after source failure"
                );
            }
            entry.price
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
