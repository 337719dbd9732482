/// Trade row lifecycle outside the execution path: close, cancel, settle

use std::sync::Arc;

use lodestar_core::{Side, Trade, TradeId, TradeStatus};
use tracing::{info, instrument};

use crate::core::Clock;
use crate::store::{StoreError, TradeStore};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("{id} is {status:?}, only OPEN trades can change")]
    NotOpen { id: TradeId, status: TradeStatus },

    #[error("exit price {0} is not usable")]
    InvalidExitPrice(f64),

    #[error("fees {0} must be non-negative")]
    InvalidFees(f64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TradeLedger {
    trades: Arc<dyn TradeStore>,
    clock: Arc<dyn Clock>,
}

impl TradeLedger {
    pub fn new(trades: Arc<dyn TradeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { trades, clock }
    }

    /// Closes an OPEN trade at `exit_price`, adding `extra_fees` to what execution charged.
    #[instrument(skip(self, notes))]
    pub async fn close_trade(
        &self,
        id: TradeId,
        exit_price: f64,
        extra_fees: f64,
        notes: Option<String>,
    ) -> Result<Trade, LedgerError> {
        if !(exit_price > 0.0 && exit_price.is_finite()) {
            return Err(LedgerError::InvalidExitPrice(exit_price));
        }
        if !(extra_fees >= 0.0) {
            return Err(LedgerError::InvalidFees(extra_fees));
        }
        let mut trade = self.open_trade(id).await?;
        trade.fees += extra_fees;
        let gross = match trade.side {
            Side::Buy => (exit_price - trade.entry_price) * trade.quantity,
            Side::Sell => (trade.entry_price - exit_price) * trade.quantity,
        };
        let realized = gross - trade.fees;
        self.finish(&mut trade, exit_price, realized, notes);

        let trade = self.trades.update(trade).await?;
        info!(
            trade_id = %trade.id,
            realized_pnl = trade.realized_pnl,
            pnl_percentage = trade.pnl_percentage,
            "Trade closed"
        );
        Ok(trade)
    }

    /// Cancels an OPEN trade, e.g. an orphan left by a timed-out venue call.
    #[instrument(skip(self, notes))]
    pub async fn cancel_trade(&self, id: TradeId, notes: Option<String>) -> Result<Trade, LedgerError> {
        let mut trade = self.open_trade(id).await?;
        let now = self.clock.now();
        trade.status = TradeStatus::Cancelled;
        trade.notes = notes.or(trade.notes);
        trade.updated_at = now;
        trade.closed_at = Some(now);
        let trade = self.trades.update(trade).await?;
        info!(trade_id = %trade.id, "Trade cancelled");
        Ok(trade)
    }

    /// Records the SELL leg that closed a position, with P&L as the reconciler booked it.
    pub async fn settle_closing_leg(
        &self,
        mut trade: Trade,
        entry_price: f64,
        realized_pnl: f64,
    ) -> Result<Trade, LedgerError> {
        if !trade.is_open() {
            return Err(LedgerError::NotOpen { id: trade.id, status: trade.status });
        }
        let exit_price = trade.entry_price;
        trade.entry_price = entry_price;
        self.finish(&mut trade, exit_price, realized_pnl, None);
        Ok(self.trades.update(trade).await?)
    }

    async fn open_trade(&self, id: TradeId) -> Result<Trade, LedgerError> {
        let trade = self.trades.get(id).await?;
        if !trade.is_open() {
            return Err(LedgerError::NotOpen { id, status: trade.status });
        }
        Ok(trade)
    }

    fn finish(&self, trade: &mut Trade, exit_price: f64, realized: f64, notes: Option<String>) {
        let now = self.clock.now();
        let basis = trade.entry_price * trade.quantity;
        trade.exit_price = Some(exit_price);
        trade.realized_pnl = Some(realized);
        trade.pnl_percentage = Some(if basis > 0.0 { realized / basis * 100.0 } else { 0.0 });
        trade.duration_minutes = Some((now - trade.created_at).num_minutes());
        trade.status = TradeStatus::Closed;
        trade.notes = notes.or(trade.notes.take());
        trade.updated_at = now;
        trade.closed_at = Some(now);
    }
}
