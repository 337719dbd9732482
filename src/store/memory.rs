/// DashMap-backed store adapters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lodestar_core::{
    AccountId, IdempotencyKey, NewTrade, Portfolio, RiskLimits, Signal, SignalId, SignalStatus,
    Trade, TradeId,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{AccountStore, PortfolioChange, PortfolioUpdate, SignalStore, StoreError, TradeStore};

#[derive(Debug, Default)]
pub struct MemorySignalStore {
    signals: DashMap<SignalId, Signal>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn insert(&self, signal: Signal) -> Result<(), StoreError> {
        self.signals.insert(signal.id, signal);
        Ok(())
    }

    async fn get(&self, id: SignalId) -> Result<Signal, StoreError> {
        self.signals
            .get(&id)
            .map(|s| s.clone())
            .ok_or(StoreError::NotFound { entity: "signal", id: id.0 })
    }

    async fn all(&self) -> Result<Vec<Signal>, StoreError> {
        let mut signals: Vec<Signal> = self.signals.iter().map(|s| s.clone()).collect();
        signals.sort_by_key(|s| s.id);
        Ok(signals)
    }

    async fn list_active_eligible(
        &self,
        limits: &RiskLimits,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut eligible: Vec<Signal> = self
            .signals
            .iter()
            .filter(|s| {
                s.is_live(now)
                    && s.confidence >= limits.min_confidence
                    && limits.allows_symbol(&s.symbol)
            })
            .map(|s| s.clone())
            .collect();
        eligible.sort_by_key(|s| s.id);
        Ok(eligible)
    }

    async fn set_status(
        &self,
        id: SignalId,
        status: SignalStatus,
        now: DateTime<Utc>,
    ) -> Result<Signal, StoreError> {
        let mut signal = self
            .signals
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "signal", id: id.0 })?;
        if !signal.status.can_transition_to(status) {
            return Err(StoreError::IllegalTransition { id, from: signal.status, to: status });
        }
        signal.status = status;
        signal.updated_at = now;
        Ok(signal.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<SignalId>, StoreError> {
        let mut expired = Vec::new();
        for mut signal in self.signals.iter_mut() {
            if signal.status == SignalStatus::Active && signal.is_expired(now) {
                signal.status = SignalStatus::Expired;
                signal.updated_at = now;
                expired.push(signal.id);
            }
        }
        expired.sort();
        Ok(expired)
    }
}

/// Each account sits behind its own async mutex so updates serialize per account only.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<AccountId, Arc<Mutex<Portfolio>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: AccountId) -> Result<Arc<Mutex<Portfolio>>, StoreError> {
        self.accounts
            .get(&id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or(StoreError::NotFound { entity: "account", id: id.0 })
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, id: AccountId) -> Result<Portfolio, StoreError> {
        let slot = self.slot(id)?;
        let portfolio = slot.lock().await;
        Ok(portfolio.clone())
    }

    async fn upsert(&self, portfolio: Portfolio) -> Result<(), StoreError> {
        let existing = self.accounts.get(&portfolio.account_id).map(|s| Arc::clone(s.value()));
        match existing {
            Some(slot) => *slot.lock().await = portfolio,
            None => {
                self.accounts.insert(portfolio.account_id, Arc::new(Mutex::new(portfolio)));
            }
        }
        Ok(())
    }

    async fn apply_delta(
        &self,
        id: AccountId,
        update: PortfolioUpdate,
    ) -> Result<PortfolioChange, StoreError> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().await;
        let next = update(&*current)?;
        let before = std::mem::replace(&mut *current, next);
        debug!(account_id = %id, "Portfolio updated");
        Ok(PortfolioChange { before, after: current.clone() })
    }

    async fn ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| *e.key()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Debug)]
pub struct MemoryTradeStore {
    trades: DashMap<TradeId, Trade>,
    keys: DashMap<IdempotencyKey, TradeId>,
    next_id: AtomicU64,
}

impl Default for MemoryTradeStore {
    fn default() -> Self {
        Self { trades: DashMap::new(), keys: DashMap::new(), next_id: AtomicU64::new(1) }
    }
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn insert_open(&self, trade: NewTrade) -> Result<Trade, StoreError> {
        let id = TradeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(key) = trade.idempotency_key {
            match self.keys.entry(key) {
                Entry::Occupied(_) => return Err(StoreError::DuplicateKey(key)),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        let trade = trade.into_trade(id);
        self.trades.insert(id, trade.clone());
        Ok(trade)
    }

    async fn get(&self, id: TradeId) -> Result<Trade, StoreError> {
        self.trades
            .get(&id)
            .map(|t| t.clone())
            .ok_or(StoreError::NotFound { entity: "trade", id: id.0 })
    }

    async fn find_by_key(&self, key: IdempotencyKey) -> Result<Option<Trade>, StoreError> {
        let id = match self.keys.get(&key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.trades.get(&id).map(|t| t.clone()))
    }

    async fn update(&self, trade: Trade) -> Result<Trade, StoreError> {
        let mut slot = self
            .trades
            .get_mut(&trade.id)
            .ok_or(StoreError::NotFound { entity: "trade", id: trade.id.0 })?;
        *slot = trade.clone();
        Ok(trade)
    }

    async fn by_account(&self, account_id: AccountId) -> Result<Vec<Trade>, StoreError> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|t| t.account_id == account_id)
            .map(|t| t.clone())
            .collect();
        trades.sort_by_key(|t| t.id);
        Ok(trades)
    }
}
