use chrono::{DateTime, Utc};
use lodestar_core::{AccountId, Side, SignalId, TradeId};
use serde::{Deserialize, Serialize};

/// Everything the engine announces to observers
///
/// Published on the [`EventBus`](super::EventBus); nothing inside the engine depends on
/// anyone listening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    LoopStarted {
        at: DateTime<Utc>,
    },
    LoopStopped {
        at: DateTime<Utc>,
    },
    /// Order filled, portfolio reconciled and signal marked EXECUTED
    SignalExecuted {
        signal_id: SignalId,
        account_id: AccountId,
        trade_id: TradeId,
        symbol: String,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        realized_pnl: Option<f64>,
        at: DateTime<Utc>,
    },
    SignalRejected {
        signal_id: SignalId,
        account_id: AccountId,
        code: String,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Venue or store trouble; any OPEN trade row is left for reconciliation
    ExecutionFailed {
        signal_id: SignalId,
        account_id: AccountId,
        trade_id: Option<TradeId>,
        code: String,
        reason: String,
        at: DateTime<Utc>,
    },
    SignalsExpired {
        ids: Vec<SignalId>,
        at: DateTime<Utc>,
    },
    /// No further signals are processed for this account by the running loop
    AccountHalted {
        account_id: AccountId,
        detail: String,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::LoopStarted { .. } => "loop_started",
            EngineEvent::LoopStopped { .. } => "loop_stopped",
            EngineEvent::SignalExecuted { .. } => "signal_executed",
            EngineEvent::SignalRejected { .. } => "signal_rejected",
            EngineEvent::ExecutionFailed { .. } => "execution_failed",
            EngineEvent::SignalsExpired { .. } => "signals_expired",
            EngineEvent::AccountHalted { .. } => "account_halted",
        }
    }
}
