/// Position sizing and pre-trade risk checks

use lodestar_core::{OrderIntent, OrderKind, Portfolio, RiskLimits, Side, Signal, SignalId};

/// Stop distance assumed when a signal carries no stop-loss, as a fraction of price.
pub const DEFAULT_STOP_FRACTION: f64 = 0.03;

/// Why a signal was not turned into an order. Never fatal; the signal stays ACTIVE.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RiskRejection {
    #[error("{0} is not actionable (HOLD)")]
    NonActionable(SignalId),

    #[error("confidence {confidence} below minimum {minimum}")]
    ConfidenceBelowMinimum { confidence: u8, minimum: u8 },

    #[error("symbol {0} is not allowed")]
    SymbolNotAllowed(String),

    #[error("{open} open positions, limit {limit}")]
    MaxPositionsReached { open: u32, limit: u32 },

    #[error("daily loss {loss_percent:.2}% reached limit {limit:.2}%")]
    DailyLossLimit { loss_percent: f64, limit: f64 },

    #[error("unusable reference price {0}")]
    InvalidPrice(f64),

    #[error("stop distance {0} cannot size a position")]
    InvalidStopDistance(f64),

    #[error("computed quantity {0} is not tradeable")]
    InvalidQuantity(f64),

    #[error("position value {value:.2} exceeds limit {limit:.2}")]
    PositionValueExceeded { value: f64, limit: f64 },

    #[error("order needs {required:.2}, only {available:.2} available")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("no open {0} position to sell")]
    NoOpenPosition(String),
}

impl RiskRejection {
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::InvalidStopDistance(_) => "INVALID_STOP_DISTANCE",
            _ => "RISK_REJECTED",
        }
    }
}

/// Realized loss today as a percentage of available balance. Gains count as zero.
pub fn daily_loss_percent(account: &Portfolio) -> f64 {
    let loss = (-account.daily_pnl).max(0.0);
    if loss == 0.0 {
        return 0.0;
    }
    if account.available_balance <= 0.0 {
        return f64::INFINITY;
    }
    loss / account.available_balance * 100.0
}

/// Sizes `signal` against `account` and `limits`. Pure: no I/O, no clock.
///
/// `fee_rate` is the commission per unit of quantity; a BUY must cover it from the
/// available balance along with the notional. The caller is expected to have rolled
/// `account.daily_pnl` to the current day. Returned intents are MARKET orders; see
/// [`OrderIntent::with_kind`].
pub fn evaluate(
    signal: &Signal,
    account: &Portfolio,
    limits: &RiskLimits,
    fee_rate: f64,
) -> Result<OrderIntent, RiskRejection> {
    let side = signal.direction.side().ok_or(RiskRejection::NonActionable(signal.id))?;

    if signal.confidence < limits.min_confidence {
        return Err(RiskRejection::ConfidenceBelowMinimum {
            confidence: signal.confidence,
            minimum: limits.min_confidence,
        });
    }
    if !limits.allows_symbol(&signal.symbol) {
        return Err(RiskRejection::SymbolNotAllowed(signal.symbol.clone()));
    }
    if account.active_positions >= limits.max_positions {
        return Err(RiskRejection::MaxPositionsReached {
            open: account.active_positions,
            limit: limits.max_positions,
        });
    }

    let loss_percent = daily_loss_percent(account);
    if loss_percent >= limits.max_daily_loss_percent {
        return Err(RiskRejection::DailyLossLimit {
            loss_percent,
            limit: limits.max_daily_loss_percent,
        });
    }

    let price = signal.price;
    if !(price > 0.0 && price.is_finite()) {
        return Err(RiskRejection::InvalidPrice(price));
    }

    let stop = signal.stop_loss.unwrap_or(price * (1.0 - DEFAULT_STOP_FRACTION));
    let stop_distance = (price - stop).abs();
    if !(stop_distance > 0.0 && stop_distance.is_finite()) {
        return Err(RiskRejection::InvalidStopDistance(stop_distance));
    }

    let risk_amount = account.available_balance * (limits.risk_per_trade_percent / 100.0);
    let mut quantity = risk_amount / stop_distance;

    if side == Side::Sell {
        let held = account
            .holding(&signal.symbol)
            .map(|h| h.quantity)
            .filter(|q| *q > 0.0)
            .ok_or_else(|| RiskRejection::NoOpenPosition(signal.symbol.clone()))?;
        quantity = quantity.min(held);
    }

    if !(quantity > 0.0 && quantity.is_finite()) {
        return Err(RiskRejection::InvalidQuantity(quantity));
    }

    let value = quantity * price;
    if value > limits.max_position_value {
        return Err(RiskRejection::PositionValueExceeded {
            value,
            limit: limits.max_position_value,
        });
    }
    let required = value + quantity * fee_rate;
    if side == Side::Buy && required > account.available_balance {
        return Err(RiskRejection::InsufficientFunds {
            required,
            available: account.available_balance,
        });
    }

    Ok(OrderIntent {
        account_id: account.account_id,
        signal_id: signal.id,
        symbol: signal.symbol.clone(),
        side,
        quantity,
        kind: OrderKind::Market,
        limit_price: None,
        reference_price: price,
        stop_loss: signal.stop_loss,
        take_profit: signal.take_profit,
    })
}
