/// Error taxonomy shared across the engine

use lodestar_core::{AccountId, LimitsError};

use crate::store::StoreError;

/// Errors that escape the control loop to its caller.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invariant violation on {account_id}: {detail}")]
    InvariantViolation { account_id: AccountId, detail: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl EngineError {
    /// Stable machine-readable code for logs and events.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidConfig(_) => "INVALID_CONFIG",
            EngineError::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<LimitsError> for EngineError {
    fn from(err: LimitsError) -> Self {
        EngineError::InvalidConfig(err.to_string())
    }
}

/// Reasons the portfolio reconciler refuses to apply an execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("balance identity broken on {account_id}: available + locked - total = {drift}")]
    InvariantViolation { account_id: AccountId, drift: f64 },

    #[error("{account_id} holds no {symbol} to sell")]
    NoHolding { account_id: AccountId, symbol: String },

    #[error("{account_id} cannot sell {requested} {symbol}, holds {held}")]
    OversizedSell { account_id: AccountId, symbol: String, requested: f64, held: f64 },

    #[error("unusable execution result: {0}")]
    InvalidResult(String),
}
