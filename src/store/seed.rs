/// JSON seed files for paper sessions

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lodestar_core::{AccountId, Direction, Portfolio, Signal, SignalId, SignalStatus};
use serde::Deserialize;

use super::{AccountStore, SignalStore};
use crate::market::PriceBoard;

/// Signal as written in a seed file. Omitted fields take engine defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedSignal {
    pub id: u64,
    pub account_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub confidence: u8,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward_ratio: Option<f64>,
    #[serde(default = "default_status")]
    pub status: SignalStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_status() -> SignalStatus {
    SignalStatus::Active
}

impl SeedSignal {
    pub fn into_signal(self, now: DateTime<Utc>) -> Signal {
        let created_at = self.created_at.unwrap_or(now);
        Signal {
            id: SignalId(self.id),
            account_id: AccountId(self.account_id),
            symbol: self.symbol,
            direction: self.direction,
            price: self.price,
            confidence: self.confidence,
            timeframe: self.timeframe,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            risk_reward_ratio: self.risk_reward_ratio,
            status: self.status,
            expires_at: self.expires_at,
            created_at,
            updated_at: created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAccount {
    pub account_id: u64,
    pub balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPrice {
    pub symbol: String,
    pub price: f64,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse seed file {}", path.display()))
}

pub fn load_signals(path: &Path, now: DateTime<Utc>) -> Result<Vec<Signal>> {
    let seeds: Vec<SeedSignal> = read_json(path)?;
    Ok(seeds.into_iter().map(|s| s.into_signal(now)).collect())
}

pub fn load_accounts(path: &Path, now: DateTime<Utc>) -> Result<Vec<Portfolio>> {
    let seeds: Vec<SeedAccount> = read_json(path)?;
    seeds
        .into_iter()
        .map(|a| {
            if !(a.balance >= 0.0 && a.balance.is_finite()) {
                anyhow::bail!("account {} has invalid balance {}", a.account_id, a.balance);
            }
            Ok(Portfolio::new(AccountId(a.account_id), a.balance, now))
        })
        .collect()
}

pub fn load_prices(path: &Path) -> Result<Vec<SeedPrice>> {
    read_json(path)
}

/// Fills the stores and price board from whichever seed files are present.
pub async fn seed_all(
    signals_path: Option<&Path>,
    accounts_path: Option<&Path>,
    prices_path: Option<&Path>,
    signals: &dyn SignalStore,
    accounts: &dyn AccountStore,
    prices: &PriceBoard,
    now: DateTime<Utc>,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    if let Some(path) = accounts_path {
        for portfolio in load_accounts(path, now)? {
            accounts.upsert(portfolio).await?;
            summary.accounts += 1;
        }
    }
    if let Some(path) = signals_path {
        for signal in load_signals(path, now)? {
            signals.insert(signal).await?;
            summary.signals += 1;
        }
    }
    if let Some(path) = prices_path {
        for quote in load_prices(path)? {
            prices.update(&quote.symbol, quote.price, now);
            summary.prices += 1;
        }
    }
    Ok(summary)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub signals: usize,
    pub accounts: usize,
    pub prices: usize,
}
