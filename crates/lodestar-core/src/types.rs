use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Absolute tolerance for the `available + locked == total` balance identity.
pub const BALANCE_TOLERANCE: f64 = 1e-6;

/// Number of closed-trade returns kept for the Sharpe ratio.
pub const RETURN_HISTORY_LEN: usize = 250;

macro_rules! id_type {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

id_type!(SignalId, "signal");
id_type!(AccountId, "account");
id_type!(TradeId, "trade");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    /// Order side for an actionable direction; HOLD has none.
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Buy => Some(Side::Buy),
            Direction::Sell => Some(Side::Sell),
            Direction::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Active,
    Executed,
    Expired,
    Cancelled,
}

impl SignalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SignalStatus::Active)
    }

    /// Only ACTIVE signals move, and only into a terminal state.
    pub fn can_transition_to(self, next: SignalStatus) -> bool {
        self == SignalStatus::Active && next.is_terminal()
    }
}

/// A directional trade recommendation produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub account_id: AccountId,
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    /// 0-100
    pub confidence: u8,
    pub timeframe: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward_ratio: Option<f64>,
    pub status: SignalStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// ACTIVE and not past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SignalStatus::Active && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
}

/// Sized order produced by the risk evaluator and consumed immediately by execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub account_id: AccountId,
    pub signal_id: SignalId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
    pub limit_price: Option<f64>,
    pub reference_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderIntent {
    pub fn notional(&self) -> f64 {
        self.quantity * self.reference_price
    }

    /// Re-targets the intent at the given order kind. LIMIT orders rest at the reference price.
    pub fn with_kind(mut self, kind: OrderKind) -> Self {
        self.kind = kind;
        self.limit_price = match kind {
            OrderKind::Market => None,
            OrderKind::Limit => Some(self.reference_price),
        };
        self
    }
}

/// Deduplicates venue submissions: one trade row per signal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub signal_id: SignalId,
    pub attempt: u32,
}

impl IdempotencyKey {
    pub fn new(signal_id: SignalId, attempt: u32) -> Self {
        Self { signal_id, attempt }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig-{}-{}", self.signal_id.0, self.attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

/// Trade row as handed to the store; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub account_id: AccountId,
    pub signal_id: Option<SignalId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl NewTrade {
    pub fn from_intent(intent: &OrderIntent, key: IdempotencyKey, now: DateTime<Utc>) -> Self {
        Self {
            account_id: intent.account_id,
            signal_id: Some(intent.signal_id),
            idempotency_key: Some(key),
            symbol: intent.symbol.clone(),
            side: intent.side,
            kind: intent.kind,
            quantity: intent.quantity,
            entry_price: intent.limit_price.unwrap_or(intent.reference_price),
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            created_at: now,
        }
    }

    pub fn into_trade(self, id: TradeId) -> Trade {
        Trade {
            id,
            account_id: self.account_id,
            signal_id: self.signal_id,
            idempotency_key: self.idempotency_key,
            venue_order_id: None,
            symbol: self.symbol,
            side: self.side,
            kind: self.kind,
            quantity: self.quantity,
            entry_price: self.entry_price,
            exit_price: None,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            fees: 0.0,
            realized_pnl: None,
            pnl_percentage: None,
            duration_minutes: None,
            status: TradeStatus::Open,
            notes: None,
            created_at: self.created_at,
            updated_at: self.created_at,
            closed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub account_id: AccountId,
    pub signal_id: Option<SignalId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub venue_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub fees: f64,
    pub realized_pnl: Option<f64>,
    pub pnl_percentage: Option<f64>,
    pub duration_minutes: Option<i64>,
    pub status: TradeStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub quantity: f64,
    pub avg_price: f64,
}

impl Holding {
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_price
    }
}

/// Per-account balances and performance counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub account_id: AccountId,
    pub total_balance: f64,
    pub available_balance: f64,
    pub locked_balance: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    /// UTC day `daily_pnl` belongs to.
    pub daily_pnl_date: Option<NaiveDate>,
    pub active_positions: u32,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub win_rate: f64,
    pub peak_balance: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    #[serde(default)]
    pub holdings: BTreeMap<String, Holding>,
    #[serde(default)]
    pub trade_returns: Vec<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// Fresh account with everything available and nothing locked.
    pub fn new(account_id: AccountId, balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            total_balance: balance,
            available_balance: balance,
            locked_balance: 0.0,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            daily_pnl_date: Some(now.date_naive()),
            active_positions: 0,
            total_trades: 0,
            winning_trades: 0,
            win_rate: 0.0,
            peak_balance: balance,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
            holdings: BTreeMap::new(),
            trade_returns: Vec::new(),
            updated_at: now,
        }
    }

    /// `available + locked - total`; zero on a consistent portfolio.
    pub fn balance_drift(&self) -> f64 {
        self.available_balance + self.locked_balance - self.total_balance
    }

    pub fn is_consistent(&self) -> bool {
        let drift = self.balance_drift();
        drift.is_finite() && drift.abs() <= BALANCE_TOLERANCE
    }

    /// Resets the daily P&L when `today` is a new UTC day.
    pub fn roll_daily(&mut self, today: NaiveDate) {
        if self.daily_pnl_date != Some(today) {
            self.daily_pnl = 0.0;
            self.daily_pnl_date = Some(today);
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.get(symbol)
    }
}
