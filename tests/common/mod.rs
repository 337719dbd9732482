#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Barrier, Notify};

use lodestar::config::EngineSettings;
use lodestar::core::ManualClock;
use lodestar::execution::{FillStatus, LiveTradingLoop, LoopComponents, Venue, VenueError, VenueFill};
use lodestar::store::{MemoryAccountStore, MemorySignalStore, MemoryTradeStore, SignalStore, StoreError};
use lodestar::transport::{EventBus, ExecutionJournal};
use lodestar::types::{
    AccountId, Direction, Holding, IdempotencyKey, OrderIntent, Portfolio, RiskLimits, Signal,
    SignalId, SignalStatus,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

pub fn limits() -> RiskLimits {
    RiskLimits {
        min_confidence: 80,
        max_positions: 5,
        risk_per_trade_percent: 2.0,
        allowed_symbols: ["BTCUSDT", "ETHUSDT"].into_iter().map(String::from).collect(),
        max_daily_loss_percent: 5.0,
        max_position_value: 50000.0,
    }
}

pub fn signal(id: u64, account: u64, direction: Direction, price: f64, confidence: u8) -> Signal {
    Signal {
        id: SignalId(id),
        account_id: AccountId(account),
        symbol: "BTCUSDT".into(),
        direction,
        price,
        confidence,
        timeframe: "4h".into(),
        stop_loss: None,
        take_profit: None,
        risk_reward_ratio: None,
        status: SignalStatus::Active,
        expires_at: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

/// 85-confidence BTC buy sized to roughly 0.1307 BTC on an 8500 account.
pub fn btc_buy(id: u64, account: u64) -> Signal {
    Signal {
        stop_loss: Some(41950.0),
        take_profit: Some(46000.0),
        risk_reward_ratio: Some(2.1),
        ..signal(id, account, Direction::Buy, 43250.50, 85)
    }
}

/// Account already holding `qty` ETH bought at `avg_price`.
pub fn account_holding_eth(account: u64, balance: f64, qty: f64, avg_price: f64) -> Portfolio {
    let mut portfolio = Portfolio::new(AccountId(account), balance, t0());
    portfolio.available_balance -= qty * avg_price;
    portfolio.locked_balance += qty * avg_price;
    portfolio.active_positions = 1;
    portfolio.holdings.insert("ETHUSDT".into(), Holding { quantity: qty, avg_price });
    portfolio
}

/// Paired notifications around the first venue call.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

enum Script {
    Fill,
    Hang,
    Overfill(f64),
    Gated(Gate),
    Meet(Arc<Barrier>),
}

/// Venue whose behaviour is fixed at construction. Fills at the intent's reference price.
pub struct ScriptedVenue {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedVenue {
    fn with(script: Script) -> Self {
        Self { script, calls: AtomicUsize::new(0) }
    }

    pub fn filling() -> Self {
        Self::with(Script::Fill)
    }

    pub fn hanging() -> Self {
        Self::with(Script::Hang)
    }

    /// Reports `qty` executed regardless of what was asked.
    pub fn overfilling(qty: f64) -> Self {
        Self::with(Script::Overfill(qty))
    }

    /// Blocks the first call until `gate.release` is notified.
    pub fn gated(gate: Gate) -> Self {
        Self::with(Script::Gated(gate))
    }

    /// Every call waits at `barrier` before filling.
    pub fn meeting_at(barrier: Arc<Barrier>) -> Self {
        Self::with(Script::Meet(barrier))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Venue for ScriptedVenue {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn place_order(
        &self,
        intent: &OrderIntent,
        key: &IdempotencyKey,
    ) -> Result<VenueFill, VenueError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut executed_qty = intent.quantity;
        match &self.script {
            Script::Fill => {}
            Script::Hang => std::future::pending::<()>().await,
            Script::Overfill(qty) => executed_qty = *qty,
            Script::Gated(gate) => {
                if call == 0 {
                    gate.entered.notify_one();
                    gate.release.notified().await;
                }
            }
            Script::Meet(barrier) => {
                barrier.wait().await;
            }
        }
        Ok(VenueFill {
            order_id: format!("scripted-{key}"),
            executed_price: intent.reference_price,
            executed_qty,
            status: FillStatus::Filled,
        })
    }
}

/// Signal store that loses the first EXECUTED status write.
pub struct LossyStatusWrites {
    inner: Arc<MemorySignalStore>,
    lost: AtomicBool,
}

impl LossyStatusWrites {
    pub fn new(inner: Arc<MemorySignalStore>) -> Self {
        Self { inner, lost: AtomicBool::new(false) }
    }
}

#[async_trait]
impl SignalStore for LossyStatusWrites {
    async fn insert(&self, signal: Signal) -> Result<(), StoreError> {
        self.inner.insert(signal).await
    }

    async fn get(&self, id: SignalId) -> Result<Signal, StoreError> {
        self.inner.get(id).await
    }

    async fn all(&self) -> Result<Vec<Signal>, StoreError> {
        self.inner.all().await
    }

    async fn list_active_eligible(
        &self,
        limits: &RiskLimits,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError> {
        self.inner.list_active_eligible(limits, now).await
    }

    async fn set_status(
        &self,
        id: SignalId,
        status: SignalStatus,
        now: DateTime<Utc>,
    ) -> Result<Signal, StoreError> {
        if status == SignalStatus::Executed && !self.lost.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Backend("write lost".into()));
        }
        self.inner.set_status(id, status, now).await
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<SignalId>, StoreError> {
        self.inner.expire_due(now).await
    }
}

pub struct Harness {
    pub signals: Arc<MemorySignalStore>,
    pub accounts: Arc<MemoryAccountStore>,
    pub trades: Arc<MemoryTradeStore>,
    pub venue: Arc<ScriptedVenue>,
    pub clock: Arc<ManualClock>,
    pub live: LiveTradingLoop,
}

impl Harness {
    pub fn new(venue: ScriptedVenue) -> Self {
        Self::with_settings(venue, EngineSettings::default())
    }

    pub fn with_settings(venue: ScriptedVenue, settings: EngineSettings) -> Self {
        Self::build(venue, settings, false)
    }

    /// The loop sees a signal store whose first EXECUTED write fails.
    pub fn with_lossy_status_writes(venue: ScriptedVenue) -> Self {
        Self::build(venue, EngineSettings::default(), true)
    }

    fn build(venue: ScriptedVenue, settings: EngineSettings, lossy: bool) -> Self {
        let signals = Arc::new(MemorySignalStore::new());
        let loop_signals: Arc<dyn SignalStore> = if lossy {
            Arc::new(LossyStatusWrites::new(signals.clone()))
        } else {
            signals.clone()
        };
        let accounts = Arc::new(MemoryAccountStore::new());
        let trades = Arc::new(MemoryTradeStore::new());
        let venue = Arc::new(venue);
        let clock = Arc::new(ManualClock::new(t0()));
        let live = LiveTradingLoop::new(
            LoopComponents {
                signals: loop_signals,
                accounts: accounts.clone(),
                trades: trades.clone(),
                venue: venue.clone(),
                clock: clock.clone(),
                bus: EventBus::new(),
                journal: ExecutionJournal::default(),
            },
            settings,
        );
        Self { signals, accounts, trades, venue, clock, live }
    }
}
