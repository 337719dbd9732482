/// Live trading control loop: polls eligible signals and drives them to execution

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use lodestar_core::{AccountId, IdempotencyKey, RiskLimits, Signal, SignalId, SignalStatus, TradeId};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::expiry::ExpirySweeper;
use super::ledger::TradeLedger;
use super::pipeline::{ExecutionFailure, ExecutionPipeline};
use super::portfolio::PortfolioReconciler;
use super::risk::{self, RiskRejection};
use super::signals::group_by_account;
use super::venue::Venue;
use crate::config::EngineSettings;
use crate::core::Clock;
use crate::error::EngineError;
use crate::store::{AccountStore, SignalStore, StoreError, TradeStore};
use crate::transport::{EngineEvent, EventBus, ExecutionJournal, JournalEntry, JournalOutcome};

/// Collaborators a loop is built from.
pub struct LoopComponents {
    pub signals: Arc<dyn SignalStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub trades: Arc<dyn TradeStore>,
    pub venue: Arc<dyn Venue>,
    pub clock: Arc<dyn Clock>,
    pub bus: EventBus,
    pub journal: ExecutionJournal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStatus {
    pub is_active: bool,
    pub state: LoopState,
    /// Eligible signals of the current tick not yet processed
    pub queue_depth: usize,
    pub halted_accounts: Vec<AccountId>,
    /// Filled signals whose EXECUTED status write is still outstanding
    pub unmarked_fills: Vec<SignalId>,
    pub ticks: u64,
    pub executed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Tally of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub expired: usize,
    pub eligible: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Signals not attempted: halted account, stop requested, or no longer live
    pub skipped: usize,
    pub halted: Vec<AccountId>,
    pub interrupted: bool,
}

enum Outcome {
    Executed,
    Rejected,
    Failed,
    Skipped,
    Halted(String),
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    executed: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

struct RunState {
    state: LoopState,
    started_at: Option<DateTime<Utc>>,
    shutdown: Option<watch::Sender<bool>>,
    cancel: Option<Arc<AtomicBool>>,
}

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct LoopHandle {
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Waits for the scheduler to exit. It exits after `stop()` once any in-flight tick ends.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// One live-trading session owner: `STOPPED -> RUNNING -> STOPPED`, restartable.
///
/// Each instance is independent; nothing here is global. Accounts are processed in
/// parallel within a tick, the signals of one account strictly in order.
#[derive(Clone)]
pub struct LiveTradingLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    signals: Arc<dyn SignalStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    journal: ExecutionJournal,
    pipeline: ExecutionPipeline,
    reconciler: PortfolioReconciler,
    ledger: TradeLedger,
    sweeper: ExpirySweeper,
    settings: EngineSettings,
    run: Mutex<RunState>,
    tick_lock: Mutex<()>,
    attempts: DashMap<SignalId, u32>,
    /// Signals with a real fill, kept until their status write lands
    filled: DashMap<SignalId, TradeId>,
    halted: DashMap<AccountId, String>,
    queue_depth: AtomicUsize,
    counters: Counters,
}

impl LiveTradingLoop {
    pub fn new(components: LoopComponents, settings: EngineSettings) -> Self {
        let LoopComponents { signals, accounts, trades, venue, clock, bus, journal } = components;
        let call_timeout = settings.call_timeout();
        let pipeline = ExecutionPipeline::new(
            Arc::clone(&trades),
            venue,
            Arc::clone(&clock),
            settings.fee_rate,
            call_timeout,
        );
        let reconciler = PortfolioReconciler::new(Arc::clone(&accounts), Arc::clone(&clock), call_timeout);
        let ledger = TradeLedger::new(trades, Arc::clone(&clock));
        let sweeper = ExpirySweeper::new(Arc::clone(&signals), Arc::clone(&clock), bus.clone(), call_timeout);

        Self {
            inner: Arc::new(LoopInner {
                signals,
                accounts,
                clock,
                bus,
                journal,
                pipeline,
                reconciler,
                ledger,
                sweeper,
                settings,
                run: Mutex::new(RunState {
                    state: LoopState::Stopped,
                    started_at: None,
                    shutdown: None,
                    cancel: None,
                }),
                tick_lock: Mutex::new(()),
                attempts: DashMap::new(),
                filled: DashMap::new(),
                halted: DashMap::new(),
                queue_depth: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Validates `limits` and spawns the periodic scheduler.
    ///
    /// Fails with `InvalidConfig` and stays STOPPED when the limits are unusable or the
    /// loop is already running.
    #[instrument(skip(self, limits))]
    pub async fn start(&self, limits: RiskLimits) -> Result<LoopHandle, EngineError> {
        limits.validate()?;
        let mut run = self.inner.run.lock().await;
        if run.state == LoopState::Running {
            return Err(EngineError::InvalidConfig("loop is already running".to_string()));
        }

        let now = self.inner.clock.now();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = Arc::new(AtomicBool::new(false));
        run.state = LoopState::Running;
        run.started_at = Some(now);
        run.shutdown = Some(shutdown_tx);
        run.cancel = Some(Arc::clone(&cancel));

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.run_scheduler(limits.clone(), shutdown_rx, cancel));

        info!(
            poll_interval_secs = self.inner.settings.poll_interval_secs,
            min_confidence = limits.min_confidence,
            max_positions = limits.max_positions,
            symbols = limits.allowed_symbols.len(),
            "Live trading started"
        );
        self.inner.bus.publish(EngineEvent::LoopStarted { at: now });
        Ok(LoopHandle { task })
    }

    /// Stops scheduling ticks. An in-flight per-signal unit completes; the rest of the
    /// current tick is left ACTIVE. Calling it on a stopped loop does nothing.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut run = self.inner.run.lock().await;
        if run.state == LoopState::Stopped {
            debug!("Stop requested on stopped loop");
            return;
        }
        if let Some(cancel) = run.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        if let Some(shutdown) = run.shutdown.take() {
            let _ = shutdown.send(true);
        }
        run.state = LoopState::Stopped;
        run.started_at = None;

        info!("Live trading stopped");
        self.inner.bus.publish(EngineEvent::LoopStopped { at: self.inner.clock.now() });
    }

    pub async fn status(&self) -> LoopStatus {
        let run = self.inner.run.lock().await;
        let mut halted_accounts: Vec<AccountId> = self.inner.halted.iter().map(|e| *e.key()).collect();
        halted_accounts.sort();
        let mut unmarked_fills: Vec<SignalId> = self.inner.filled.iter().map(|e| *e.key()).collect();
        unmarked_fills.sort();
        let counters = &self.inner.counters;
        LoopStatus {
            is_active: run.state == LoopState::Running,
            state: run.state,
            queue_depth: self.inner.queue_depth.load(Ordering::SeqCst),
            halted_accounts,
            unmarked_fills,
            ticks: counters.ticks.load(Ordering::SeqCst),
            executed: counters.executed.load(Ordering::SeqCst),
            rejected: counters.rejected.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            started_at: run.started_at,
        }
    }

    /// Runs one tick now, outside the scheduler.
    ///
    /// Returns `InvariantViolation` for the first account halted during this tick; every
    /// other account's work in the tick is already committed by then.
    pub async fn tick_once(&self, limits: &RiskLimits) -> Result<TickReport, EngineError> {
        limits.validate()?;
        let never_cancelled = AtomicBool::new(false);
        self.inner.tick(limits, &never_cancelled).await
    }

    /// Lets a halted account trade again after an operator has repaired it.
    pub fn resume_account(&self, account_id: AccountId) -> bool {
        let resumed = self.inner.halted.remove(&account_id).is_some();
        if resumed {
            warn!(account_id = %account_id, "Halted account resumed by operator");
        }
        resumed
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn journal(&self) -> &ExecutionJournal {
        &self.inner.journal
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.inner.ledger
    }

    /// A sweeper over the same stores, for running expiry while the loop is stopped.
    pub fn expiry_sweeper(&self) -> ExpirySweeper {
        self.inner.sweeper.clone()
    }
}

impl LoopInner {
    async fn run_scheduler(
        self: Arc<Self>,
        limits: RiskLimits,
        mut shutdown: watch::Receiver<bool>,
        cancel: Arc<AtomicBool>,
    ) {
        let mut ticker = interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            match self.tick(&limits, &cancel).await {
                Ok(report) => debug!(
                    eligible = report.eligible,
                    executed = report.executed,
                    rejected = report.rejected,
                    failed = report.failed,
                    "Tick complete"
                ),
                Err(e @ EngineError::InvariantViolation { .. }) => {
                    error!(error = %e, "Tick halted an account");
                }
                Err(e) => warn!(error = %e, code = e.code(), "Tick failed"),
            }
        }
        debug!("Live trading scheduler exited");
    }

    #[instrument(skip_all)]
    async fn tick(&self, limits: &RiskLimits, cancel: &AtomicBool) -> Result<TickReport, EngineError> {
        let _tick = self.tick_lock.lock().await;
        self.counters.ticks.fetch_add(1, Ordering::SeqCst);

        let mut report = TickReport::default();
        match self.sweeper.sweep_once().await {
            Ok(expired) => {
                report.expired = expired.len();
                for id in expired {
                    self.forget(id);
                }
            }
            Err(e) => warn!(error = %e, "Expiry sweep failed at tick start"),
        }

        let now = self.clock.now();
        let eligible = self.bounded("signal listing", self.signals.list_active_eligible(limits, now)).await?;
        report.eligible = eligible.len();
        self.queue_depth.store(eligible.len(), Ordering::SeqCst);
        if eligible.is_empty() {
            return Ok(report);
        }

        let groups = group_by_account(eligible);
        debug!(signals = report.eligible, accounts = groups.len(), "Processing eligible signals");
        let runs = groups
            .into_iter()
            .map(|(account_id, signals)| self.process_account(account_id, signals, limits, cancel));
        let results = join_all(runs).await;

        let mut first_halt: Option<(AccountId, String)> = None;
        for account in results {
            report.executed += account.executed;
            report.rejected += account.rejected;
            report.failed += account.failed;
            report.skipped += account.skipped;
            report.interrupted |= account.interrupted;
            if let Some(detail) = account.halted {
                report.halted.push(account.account_id);
                first_halt.get_or_insert((account.account_id, detail));
            }
        }
        self.queue_depth.store(
            if report.interrupted { report.skipped } else { 0 },
            Ordering::SeqCst,
        );

        match first_halt {
            Some((account_id, detail)) => Err(EngineError::InvariantViolation { account_id, detail }),
            None => Ok(report),
        }
    }

    async fn process_account(
        &self,
        account_id: AccountId,
        signals: Vec<Signal>,
        limits: &RiskLimits,
        cancel: &AtomicBool,
    ) -> AccountRun {
        let mut run = AccountRun {
            account_id,
            executed: 0,
            rejected: 0,
            failed: 0,
            skipped: 0,
            halted: None,
            interrupted: false,
        };
        let total = signals.len();

        for (done, signal) in signals.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                run.interrupted = true;
                run.skipped += total - done;
                break;
            }
            if self.halted.contains_key(&account_id) {
                run.skipped += total - done;
                break;
            }

            match self.process_signal(signal, limits).await {
                Outcome::Executed => run.executed += 1,
                Outcome::Rejected => run.rejected += 1,
                Outcome::Failed => run.failed += 1,
                Outcome::Skipped => run.skipped += 1,
                Outcome::Halted(detail) => run.halted = Some(detail),
            }
            let _ = self
                .queue_depth
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)));
        }
        run
    }

    #[instrument(skip(self, signal, limits), fields(signal_id = %signal.id, account_id = %signal.account_id, symbol = %signal.symbol))]
    async fn process_signal(&self, signal: &Signal, limits: &RiskLimits) -> Outcome {
        let now = self.clock.now();

        // Listing and processing are not atomic; the sweeper or an operator may have moved it.
        match self.bounded("signal read", self.signals.get(signal.id)).await {
            Ok(current) if current.is_live(now) => {}
            Ok(current) => {
                debug!(status = ?current.status, "Signal no longer live, skipping");
                self.forget(signal.id);
                return Outcome::Skipped;
            }
            Err(e) => return self.failed_before_execution(signal, &e, now),
        }

        // Already filled: only the status write is owed, never a second order.
        let earlier_fill = self.filled.get(&signal.id).map(|t| *t);
        if let Some(trade_id) = earlier_fill {
            return self.mark_executed(signal.id, trade_id, now).await;
        }

        let mut account = match self.bounded("account read", self.accounts.get(signal.account_id)).await {
            Ok(account) => account,
            Err(e) => return self.failed_before_execution(signal, &e, now),
        };
        account.roll_daily(now.date_naive());

        let intent = match risk::evaluate(signal, &account, limits, self.settings.fee_rate) {
            Ok(intent) => intent.with_kind(self.settings.order_kind),
            Err(rejection) => {
                self.record_rejection(signal, &rejection, now);
                return Outcome::Rejected;
            }
        };

        let key = IdempotencyKey::new(signal.id, self.next_attempt(signal.id));
        let report = match self.pipeline.execute(&intent, key).await {
            Ok(report) => report,
            Err(failure) => {
                self.record_failure(signal, &failure, now);
                return Outcome::Failed;
            }
        };
        self.filled.insert(signal.id, report.trade.id);

        let reconciliation = match self
            .reconciler
            .reconcile(signal.account_id, intent.side, &intent.symbol, &report.result)
            .await
        {
            Ok(reconciliation) => reconciliation,
            Err(e) => return self.halt(signal, e.to_string(), now),
        };

        let mut trade = report.trade;
        if let (Some(entry), Some(realized)) = (reconciliation.entry_price, reconciliation.realized_pnl) {
            match self.ledger.settle_closing_leg(trade.clone(), entry, realized).await {
                Ok(settled) => trade = settled,
                Err(e) => warn!(trade_id = %trade.id, error = %e, "Closing leg not settled on trade row"),
            }
        }

        match self
            .bounded("signal status", self.signals.set_status(signal.id, SignalStatus::Executed, now))
            .await
        {
            Ok(_) => self.forget(signal.id),
            Err(e) => warn!(error = %e, "Order executed but signal status not updated, will retry"),
        }

        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        info!(
            trade_id = %trade.id,
            side = ?intent.side,
            quantity = report.result.executed_qty,
            price = report.result.executed_price,
            commission = report.result.commission,
            available = reconciliation.portfolio.available_balance,
            "Signal executed"
        );
        self.bus.publish(EngineEvent::SignalExecuted {
            signal_id: signal.id,
            account_id: signal.account_id,
            trade_id: trade.id,
            symbol: signal.symbol.clone(),
            side: intent.side,
            quantity: report.result.executed_qty,
            price: report.result.executed_price,
            commission: report.result.commission,
            realized_pnl: reconciliation.realized_pnl,
            at: now,
        });
        self.journal.record(JournalEntry {
            at: now,
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            outcome: JournalOutcome::Executed,
            detail: format!(
                "{:?} {:.6} @ {:.2}",
                intent.side, report.result.executed_qty, report.result.executed_price
            ),
        });
        Outcome::Executed
    }

    async fn mark_executed(&self, id: SignalId, trade_id: TradeId, now: DateTime<Utc>) -> Outcome {
        match self
            .bounded("signal status", self.signals.set_status(id, SignalStatus::Executed, now))
            .await
        {
            Ok(_) => {
                info!(trade_id = %trade_id, "Filled signal marked EXECUTED");
                self.forget(id);
            }
            Err(e) => warn!(trade_id = %trade_id, error = %e, "Signal status still not updated"),
        }
        Outcome::Skipped
    }

    /// Drops per-signal bookkeeping once a signal is terminal.
    fn forget(&self, id: SignalId) {
        self.attempts.remove(&id);
        self.filled.remove(&id);
    }

    fn next_attempt(&self, id: SignalId) -> u32 {
        let mut attempt = self.attempts.entry(id).or_insert(0);
        *attempt += 1;
        *attempt
    }

    fn record_rejection(&self, signal: &Signal, rejection: &RiskRejection, now: DateTime<Utc>) {
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        info!(code = rejection.code(), reason = %rejection, "Signal rejected by risk checks");
        self.bus.publish(EngineEvent::SignalRejected {
            signal_id: signal.id,
            account_id: signal.account_id,
            code: rejection.code().to_string(),
            reason: rejection.to_string(),
            at: now,
        });
        self.journal.record(JournalEntry {
            at: now,
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            outcome: JournalOutcome::Rejected,
            detail: rejection.to_string(),
        });
    }

    fn record_failure(&self, signal: &Signal, failure: &ExecutionFailure, now: DateTime<Utc>) {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        warn!(code = failure.code(), trade_id = ?failure.trade_id, reason = %failure.reason, "Execution failed");
        self.bus.publish(EngineEvent::ExecutionFailed {
            signal_id: signal.id,
            account_id: signal.account_id,
            trade_id: failure.trade_id,
            code: failure.code().to_string(),
            reason: failure.reason.to_string(),
            at: now,
        });
        self.journal.record(JournalEntry {
            at: now,
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            outcome: JournalOutcome::Failed,
            detail: failure.reason.to_string(),
        });
    }

    fn failed_before_execution(&self, signal: &Signal, err: &EngineError, now: DateTime<Utc>) -> Outcome {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        warn!(code = err.code(), error = %err, "Signal not processed");
        self.bus.publish(EngineEvent::ExecutionFailed {
            signal_id: signal.id,
            account_id: signal.account_id,
            trade_id: None,
            code: err.code().to_string(),
            reason: err.to_string(),
            at: now,
        });
        self.journal.record(JournalEntry {
            at: now,
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            outcome: JournalOutcome::Failed,
            detail: err.to_string(),
        });
        Outcome::Failed
    }

    fn halt(&self, signal: &Signal, detail: String, now: DateTime<Utc>) -> Outcome {
        error!(detail = %detail, "Account halted after failed reconciliation");
        self.halted.insert(signal.account_id, detail.clone());
        self.bus.publish(EngineEvent::AccountHalted {
            account_id: signal.account_id,
            detail: detail.clone(),
            at: now,
        });
        self.journal.record(JournalEntry {
            at: now,
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            outcome: JournalOutcome::Halted,
            detail: detail.clone(),
        });
        Outcome::Halted(detail)
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        timeout(self.settings.call_timeout(), fut)
            .await
            .map_err(|_| EngineError::Timeout(what))?
            .map_err(EngineError::from)
    }
}

struct AccountRun {
    account_id: AccountId,
    executed: usize,
    rejected: usize,
    failed: usize,
    skipped: usize,
    halted: Option<String>,
    interrupted: bool,
}
