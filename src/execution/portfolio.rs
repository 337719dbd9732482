/// Portfolio reconciliation: folds execution results into account balances

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lodestar_core::{AccountId, Holding, Portfolio, Side, RETURN_HISTORY_LEN};
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use super::pipeline::ExecutionResult;
use crate::core::Clock;
use crate::error::{EngineError, ReconcileError};
use crate::store::{AccountStore, StoreError};

/// Holdings smaller than this are treated as closed.
const DUST_QUANTITY: f64 = 1e-12;

/// What a reconciliation did to one account.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub portfolio: Portfolio,
    /// Average entry price of the position a SELL closed against.
    pub entry_price: Option<f64>,
    /// Realized P&L of a SELL, net of its commission.
    pub realized_pnl: Option<f64>,
}

/// Applies one execution to `portfolio` and returns the next state.
///
/// BUY moves cost into locked balance and charges commission; SELL releases the
/// position's cost basis, books realized P&L and refreshes the performance counters.
/// The result always satisfies `available + locked == total`.
pub fn apply_execution(
    portfolio: &Portfolio,
    side: Side,
    symbol: &str,
    result: &ExecutionResult,
    now: DateTime<Utc>,
) -> Result<Portfolio, ReconcileError> {
    let qty = result.executed_qty;
    let price = result.executed_price;
    let commission = result.commission;
    if !(qty > 0.0 && qty.is_finite() && price > 0.0 && price.is_finite() && commission >= 0.0) {
        return Err(ReconcileError::InvalidResult(format!(
            "qty {qty} price {price} commission {commission}"
        )));
    }

    let mut next = portfolio.clone();
    next.roll_daily(now.date_naive());

    match side {
        Side::Buy => {
            let cost = qty * price;
            next.available_balance -= cost + commission;
            next.locked_balance += cost;
            next.total_balance -= commission;

            let holding = next
                .holdings
                .entry(symbol.to_string())
                .or_insert(Holding { quantity: 0.0, avg_price: 0.0 });
            if holding.quantity <= DUST_QUANTITY {
                next.active_positions += 1;
                *holding = Holding { quantity: qty, avg_price: price };
            } else {
                let combined = holding.quantity + qty;
                holding.avg_price = (holding.cost_basis() + cost) / combined;
                holding.quantity = combined;
            }
        }
        Side::Sell => {
            let holding = *next.holdings.get(symbol).ok_or_else(|| ReconcileError::NoHolding {
                account_id: portfolio.account_id,
                symbol: symbol.to_string(),
            })?;
            if qty > holding.quantity + DUST_QUANTITY {
                return Err(ReconcileError::OversizedSell {
                    account_id: portfolio.account_id,
                    symbol: symbol.to_string(),
                    requested: qty,
                    held: holding.quantity,
                });
            }

            let entry = holding.avg_price;
            let realized = (price - entry) * qty - commission;

            next.available_balance += qty * price - commission;
            next.locked_balance -= qty * entry;
            next.total_balance += realized;

            let remaining = holding.quantity - qty;
            if remaining <= DUST_QUANTITY {
                next.holdings.remove(symbol);
                next.active_positions = next.active_positions.saturating_sub(1);
            } else if let Some(h) = next.holdings.get_mut(symbol) {
                h.quantity = remaining;
            }

            next.total_pnl += realized;
            next.daily_pnl += realized;
            next.total_trades += 1;
            if realized > 0.0 {
                next.winning_trades += 1;
            }
            next.win_rate = next.winning_trades as f64 / next.total_trades as f64 * 100.0;

            let basis = qty * entry;
            if basis > 0.0 {
                next.trade_returns.push(realized / basis);
                if next.trade_returns.len() > RETURN_HISTORY_LEN {
                    let excess = next.trade_returns.len() - RETURN_HISTORY_LEN;
                    next.trade_returns.drain(..excess);
                }
            }
            next.sharpe_ratio = sharpe_ratio(&next.trade_returns);
        }
    }

    update_drawdown(&mut next);
    next.updated_at = now;

    if !next.is_consistent() {
        return Err(ReconcileError::InvariantViolation {
            account_id: portfolio.account_id,
            drift: next.balance_drift(),
        });
    }
    Ok(next)
}

fn update_drawdown(p: &mut Portfolio) {
    if p.total_balance > p.peak_balance {
        p.peak_balance = p.total_balance;
    }
    if p.peak_balance > 0.0 {
        let drawdown = (p.peak_balance - p.total_balance) / p.peak_balance * 100.0;
        p.max_drawdown = p.max_drawdown.max(drawdown);
    }
}

/// Mean over sample standard deviation of per-trade returns. Zero with fewer than two.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

pub struct PortfolioReconciler {
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl PortfolioReconciler {
    pub fn new(accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, call_timeout: Duration) -> Self {
        Self { accounts, clock, call_timeout }
    }

    /// Applies `result` to the stored account atomically.
    ///
    /// Any failure after a fill means the stored account no longer mirrors the venue,
    /// so every error here is reported as an invariant violation for that account.
    #[instrument(skip(self, result), fields(qty = result.executed_qty, price = result.executed_price))]
    pub async fn reconcile(
        &self,
        account_id: AccountId,
        side: Side,
        symbol: &str,
        result: &ExecutionResult,
    ) -> Result<Reconciliation, EngineError> {
        let now = self.clock.now();
        let owned_symbol = symbol.to_string();
        let owned_result = result.clone();
        let update = Box::new(move |current: &Portfolio| {
            apply_execution(current, side, &owned_symbol, &owned_result, now)
        });

        let change = match timeout(self.call_timeout, self.accounts.apply_delta(account_id, update)).await {
            Ok(Ok(change)) => change,
            Ok(Err(StoreError::Rejected(e))) => {
                error!(account_id = %account_id, error = %e, "Portfolio reconciliation refused");
                return Err(EngineError::InvariantViolation { account_id, detail: e.to_string() });
            }
            Ok(Err(e)) => {
                error!(account_id = %account_id, error = %e, "Portfolio store failed after fill");
                return Err(EngineError::InvariantViolation {
                    account_id,
                    detail: format!("store failed after fill: {e}"),
                });
            }
            Err(_) => {
                error!(account_id = %account_id, "Portfolio reconciliation timed out");
                return Err(EngineError::InvariantViolation {
                    account_id,
                    detail: "reconciliation timed out after fill".to_string(),
                });
            }
        };

        let (entry_price, realized_pnl) = match side {
            Side::Buy => (None, None),
            Side::Sell => (
                change.before.holding(symbol).map(|h| h.avg_price),
                Some(change.after.total_pnl - change.before.total_pnl),
            ),
        };
        debug!(
            account_id = %account_id,
            available = change.after.available_balance,
            locked = change.after.locked_balance,
            total = change.after.total_balance,
            "Portfolio reconciled"
        );
        Ok(Reconciliation { portfolio: change.after, entry_price, realized_pnl })
    }
}
