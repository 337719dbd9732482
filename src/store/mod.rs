/// Persistence seams for signals, accounts and trades

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lodestar_core::{
    AccountId, IdempotencyKey, NewTrade, Portfolio, RiskLimits, Signal, SignalId, SignalStatus,
    Trade, TradeId,
};

use crate::error::ReconcileError;

pub mod memory;
pub mod seed;

pub use memory::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("{id} cannot move from {from:?} to {to:?}")]
    IllegalTransition { id: SignalId, from: SignalStatus, to: SignalStatus },

    #[error("idempotency key {0} already recorded")]
    DuplicateKey(IdempotencyKey),

    #[error("update rejected: {0}")]
    Rejected(#[from] ReconcileError),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Computes the next portfolio state from the current one. Runs under the account's lock.
pub type PortfolioUpdate = Box<dyn FnOnce(&Portfolio) -> Result<Portfolio, ReconcileError> + Send>;

/// Portfolio before and after an atomic update.
#[derive(Debug, Clone)]
pub struct PortfolioChange {
    pub before: Portfolio,
    pub after: Portfolio,
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert(&self, signal: Signal) -> Result<(), StoreError>;

    async fn get(&self, id: SignalId) -> Result<Signal, StoreError>;

    async fn all(&self) -> Result<Vec<Signal>, StoreError>;

    /// ACTIVE, unexpired signals whose symbol and confidence pass `limits`.
    async fn list_active_eligible(
        &self,
        limits: &RiskLimits,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError>;

    /// Moves a signal out of ACTIVE. Terminal states refuse every transition.
    async fn set_status(
        &self,
        id: SignalId,
        status: SignalStatus,
        now: DateTime<Utc>,
    ) -> Result<Signal, StoreError>;

    /// Expires every ACTIVE signal whose expiry is at or before `now`.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<SignalId>, StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: AccountId) -> Result<Portfolio, StoreError>;

    async fn upsert(&self, portfolio: Portfolio) -> Result<(), StoreError>;

    /// Applies `update` atomically. On error the stored portfolio is left untouched.
    async fn apply_delta(
        &self,
        id: AccountId,
        update: PortfolioUpdate,
    ) -> Result<PortfolioChange, StoreError>;

    async fn ids(&self) -> Result<Vec<AccountId>, StoreError>;
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Persists an OPEN row. Refuses a second row for the same idempotency key.
    async fn insert_open(&self, trade: NewTrade) -> Result<Trade, StoreError>;

    async fn get(&self, id: TradeId) -> Result<Trade, StoreError>;

    async fn find_by_key(&self, key: IdempotencyKey) -> Result<Option<Trade>, StoreError>;

    async fn update(&self, trade: Trade) -> Result<Trade, StoreError>;

    async fn by_account(&self, account_id: AccountId) -> Result<Vec<Trade>, StoreError>;
}
