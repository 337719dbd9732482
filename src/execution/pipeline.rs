/// Order execution pipeline: persist the trade row, then call the venue

use std::sync::Arc;
use std::time::Duration;

use lodestar_core::{IdempotencyKey, NewTrade, OrderIntent, Trade, TradeId};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::venue::{FillStatus, Venue, VenueError};
use crate::core::Clock;
use crate::store::{StoreError, TradeStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub order_id: String,
    pub executed_price: f64,
    pub executed_qty: f64,
    pub commission: f64,
    pub status: FillStatus,
}

impl ExecutionResult {
    pub fn notional(&self) -> f64 {
        self.executed_price * self.executed_qty
    }
}

/// A completed execution and the trade row that records it.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub trade: Trade,
    pub result: ExecutionResult,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("{0}")]
    Venue(#[from] VenueError),

    #[error("duplicate submission for {0}")]
    Duplicate(IdempotencyKey),

    #[error("store: {0}")]
    Store(StoreError),

    #[error("unusable fill: {0}")]
    InvalidFill(String),
}

/// Non-fatal execution failure. Any trade row already written stays OPEN.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("execution failed for {key}: {reason}")]
pub struct ExecutionFailure {
    pub key: IdempotencyKey,
    pub trade_id: Option<TradeId>,
    pub reason: FailureReason,
}

impl ExecutionFailure {
    pub fn code(&self) -> &'static str {
        match self.reason {
            FailureReason::Timeout(_) => "TIMEOUT",
            _ => "EXECUTION_FAILURE",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, FailureReason::Timeout(_))
    }
}

pub struct ExecutionPipeline {
    trades: Arc<dyn TradeStore>,
    venue: Arc<dyn Venue>,
    clock: Arc<dyn Clock>,
    fee_rate: f64,
    call_timeout: Duration,
}

impl ExecutionPipeline {
    pub fn new(
        trades: Arc<dyn TradeStore>,
        venue: Arc<dyn Venue>,
        clock: Arc<dyn Clock>,
        fee_rate: f64,
        call_timeout: Duration,
    ) -> Self {
        Self { trades, venue, clock, fee_rate, call_timeout }
    }

    pub fn trades(&self) -> &Arc<dyn TradeStore> {
        &self.trades
    }

    /// Executes `intent` once. Never retries.
    ///
    /// The OPEN trade row is written before the venue is contacted, so a crash or timeout
    /// after that point leaves a row for external reconciliation.
    #[instrument(skip(self, intent), fields(symbol = %intent.symbol, side = ?intent.side, qty = intent.quantity))]
    pub async fn execute(
        &self,
        intent: &OrderIntent,
        key: IdempotencyKey,
    ) -> Result<ExecutionReport, ExecutionFailure> {
        let fail = |trade_id: Option<TradeId>, reason: FailureReason| ExecutionFailure { key, trade_id, reason };

        let new_trade = NewTrade::from_intent(intent, key, self.clock.now());
        let trade = match timeout(self.call_timeout, self.trades.insert_open(new_trade)).await {
            Err(_) => return Err(fail(None, FailureReason::Timeout("trade insert"))),
            Ok(Err(StoreError::DuplicateKey(dup))) => return Err(fail(None, FailureReason::Duplicate(dup))),
            Ok(Err(e)) => return Err(fail(None, FailureReason::Store(e))),
            Ok(Ok(trade)) => trade,
        };

        let fill = match timeout(self.call_timeout, self.venue.place_order(intent, &key)).await {
            Err(_) => {
                warn!(trade_id = %trade.id, venue = self.venue.name(), "Venue call timed out, trade left OPEN");
                return Err(fail(Some(trade.id), FailureReason::Timeout("venue call")));
            }
            Ok(Err(e)) => {
                warn!(trade_id = %trade.id, error = %e, "Venue refused order, trade left OPEN");
                return Err(fail(Some(trade.id), FailureReason::Venue(e)));
            }
            Ok(Ok(fill)) => fill,
        };

        let usable = fill.executed_qty > 0.0
            && fill.executed_qty.is_finite()
            && fill.executed_price > 0.0
            && fill.executed_price.is_finite();
        if !usable {
            return Err(fail(
                Some(trade.id),
                FailureReason::InvalidFill(format!("{} @ {}", fill.executed_qty, fill.executed_price)),
            ));
        }

        let result = ExecutionResult {
            commission: fill.executed_qty * self.fee_rate,
            order_id: fill.order_id,
            executed_price: fill.executed_price,
            executed_qty: fill.executed_qty,
            status: fill.status,
        };

        let mut filled = trade;
        filled.venue_order_id = Some(result.order_id.clone());
        filled.entry_price = result.executed_price;
        filled.quantity = result.executed_qty;
        filled.fees = result.commission;
        filled.updated_at = self.clock.now();

        // The fill is real at this point; a failed row update must not hide it.
        match timeout(self.call_timeout, self.trades.update(filled.clone())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(trade_id = %filled.id, error = %e, "Fill not written to trade row"),
            Err(_) => warn!(trade_id = %filled.id, "Timed out writing fill to trade row"),
        }

        info!(
            trade_id = %filled.id,
            order_id = %result.order_id,
            price = result.executed_price,
            qty = result.executed_qty,
            commission = result.commission,
            "Order executed"
        );
        Ok(ExecutionReport { trade: filled, result })
    }
}
