/// Order venue seam and the paper venue used for simulated sessions

use std::sync::Arc;

use async_trait::async_trait;
use lodestar_core::{IdempotencyKey, OrderIntent, OrderKind, Side};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::market::MarketSnapshotSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueFill {
    pub order_id: String,
    pub executed_price: f64,
    pub executed_qty: f64,
    pub status: FillStatus,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Venue: Send + Sync {
    fn name(&self) -> &str;

    /// Places `intent`. The key lets venues that support it drop duplicate submissions.
    async fn place_order(
        &self,
        intent: &OrderIntent,
        key: &IdempotencyKey,
    ) -> Result<VenueFill, VenueError>;
}

/// Fills every order in full at the current snapshot price.
///
/// LIMIT orders fill only when marketable: a buy at or above the snapshot, a sell at or
/// below it. Symbols without a quote are reported as unavailable.
pub struct PaperVenue {
    prices: Arc<dyn MarketSnapshotSource>,
}

impl PaperVenue {
    pub fn new(prices: Arc<dyn MarketSnapshotSource>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl Venue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    #[instrument(skip(self, intent, key), fields(symbol = %intent.symbol, key = %key))]
    async fn place_order(
        &self,
        intent: &OrderIntent,
        key: &IdempotencyKey,
    ) -> Result<VenueFill, VenueError> {
        let quote = self
            .prices
            .snapshot(&intent.symbol)
            .await
            .ok_or_else(|| VenueError::Unavailable(format!("no quote for {}", intent.symbol)))?;

        if intent.kind == OrderKind::Limit {
            let limit = intent
                .limit_price
                .ok_or_else(|| VenueError::Rejected("limit order without limit price".into()))?;
            let marketable = match intent.side {
                Side::Buy => quote.price <= limit,
                Side::Sell => quote.price >= limit,
            };
            if !marketable {
                return Err(VenueError::Rejected(format!(
                    "limit {} not marketable against {}",
                    limit, quote.price
                )));
            }
        }

        let fill = VenueFill {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            executed_price: quote.price,
            executed_qty: intent.quantity,
            status: FillStatus::Filled,
        };
        debug!(order_id = %fill.order_id, price = fill.executed_price, qty = fill.executed_qty, "Paper fill");
        Ok(fill)
    }
}
