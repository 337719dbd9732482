/// Market snapshot source and an in-process price board

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

#[async_trait]
pub trait MarketSnapshotSource: Send + Sync {
    /// Latest known price, or `None` when the symbol has never been quoted.
    async fn snapshot(&self, symbol: &str) -> Option<PriceSnapshot>;
}

/// Latest quote per symbol, fed by whoever owns the market data.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    prices: Arc<DashMap<String, PriceSnapshot>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, symbol: &str, price: f64, at: DateTime<Utc>) {
        if !(price > 0.0 && price.is_finite()) {
            debug!(symbol, price, "Ignoring unusable quote");
            return;
        }
        self.prices.insert(
            symbol.to_string(),
            PriceSnapshot { symbol: symbol.to_string(), price, observed_at: at },
        );
    }

    pub fn get(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.prices.get(symbol).map(|q| q.clone())
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl MarketSnapshotSource for PriceBoard {
    async fn snapshot(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.get(symbol)
    }
}
