mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::{broadcast, Barrier};
use tokio::time::timeout;

use common::*;
use lodestar::execution::LoopState;
use lodestar::store::{AccountStore, SignalStore, TradeStore};
use lodestar::transport::{EngineEvent, JournalOutcome};
use lodestar::types::{AccountId, Direction, Portfolio, Side, SignalId, SignalStatus, TradeStatus};
use lodestar::EngineError;

const WAIT: Duration = Duration::from_secs(5);

fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    names
}

async fn status_of(h: &Harness, id: u64) -> SignalStatus {
    h.signals.get(SignalId(id)).await.unwrap().status
}

#[tokio::test]
async fn tick_executes_buy_and_marks_signal() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    h.signals.insert(btc_buy(1, 1)).await.unwrap();
    let mut events = h.live.events().subscribe();

    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.eligible, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Executed);

    let trades = h.trades.by_account(AccountId(1)).await.unwrap();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.status, TradeStatus::Open);
    assert!((trade.quantity - 170.0 / 1300.5).abs() < 1e-9);
    assert_eq!(trade.entry_price, 43250.50);
    assert!(trade.venue_order_id.is_some());

    let account = h.accounts.get(AccountId(1)).await.unwrap();
    assert!(account.is_consistent());
    assert_eq!(account.active_positions, 1);
    let cost = trade.quantity * trade.entry_price;
    assert!((account.available_balance - (8500.0 - cost - trade.fees)).abs() < 1e-6);

    assert_eq!(drain(&mut events), vec!["signal_executed"]);
    let journal = h.live.journal().recent();
    assert_eq!(journal[0].outcome, JournalOutcome::Executed);
    assert_eq!(journal[0].signal_id, SignalId(1));
}

#[tokio::test]
async fn signal_is_executed_at_most_once() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    h.signals.insert(btc_buy(1, 1)).await.unwrap();

    h.live.tick_once(&limits()).await.unwrap();
    let second = h.live.tick_once(&limits()).await.unwrap();

    assert_eq!(second.eligible, 0);
    assert_eq!(h.venue.calls(), 1);
    assert_eq!(h.trades.by_account(AccountId(1)).await.unwrap().len(), 1);
    assert_eq!(h.live.status().await.executed, 1);
}

#[tokio::test]
async fn lost_status_write_is_retried_without_refilling() {
    let h = Harness::with_lossy_status_writes(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    h.signals.insert(btc_buy(1, 1)).await.unwrap();

    let first = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(first.executed, 1);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Active);
    assert_eq!(h.live.status().await.unmarked_fills, vec![SignalId(1)]);

    let second = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(second.executed, 0);
    assert_eq!(h.venue.calls(), 1);
    assert_eq!(h.trades.by_account(AccountId(1)).await.unwrap().len(), 1);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Executed);
    assert!(h.live.status().await.unmarked_fills.is_empty());

    let account = h.accounts.get(AccountId(1)).await.unwrap();
    let held = account.holding("BTCUSDT").unwrap().quantity;
    assert!((held - 170.0 / 1300.5).abs() < 1e-9);
}

#[tokio::test]
async fn low_confidence_signal_is_left_active() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    let mut weak = btc_buy(1, 1);
    weak.confidence = 75;
    h.signals.insert(weak).await.unwrap();

    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.eligible, 0);
    assert_eq!(h.venue.calls(), 0);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Active);
}

#[tokio::test]
async fn zero_position_limit_rejects_everything() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    let mut strong = btc_buy(1, 1);
    strong.confidence = 100;
    h.signals.insert(strong).await.unwrap();
    let mut events = h.live.events().subscribe();

    let mut limits = limits();
    limits.max_positions = 0;
    let report = h.live.tick_once(&limits).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(h.venue.calls(), 0);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Active);
    match events.try_recv().unwrap() {
        EngineEvent::SignalRejected { code, .. } => assert_eq!(code, "RISK_REJECTED"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.live.journal().recent()[0].outcome, JournalOutcome::Rejected);
}

#[tokio::test(start_paused = true)]
async fn venue_timeout_leaves_open_trade_and_active_signal() {
    let h = Harness::new(ScriptedVenue::hanging());
    let before = Portfolio::new(AccountId(1), 8500.0, t0());
    h.accounts.upsert(before.clone()).await.unwrap();
    h.signals.insert(btc_buy(1, 1)).await.unwrap();
    let mut events = h.live.events().subscribe();

    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Active);

    let trades = h.trades.by_account(AccountId(1)).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Open);
    assert_eq!(trades[0].exit_price, None);
    assert_eq!(trades[0].realized_pnl, None);
    assert_eq!(trades[0].closed_at, None);

    assert_eq!(h.accounts.get(AccountId(1)).await.unwrap(), before);
    match events.try_recv().unwrap() {
        EngineEvent::ExecutionFailed { code, trade_id, .. } => {
            assert_eq!(code, "TIMEOUT");
            assert_eq!(trade_id, Some(trades[0].id));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn buy_then_sell_returns_balance_less_commissions() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    h.signals.insert(btc_buy(1, 1)).await.unwrap();
    h.live.tick_once(&limits()).await.unwrap();

    let mut sell = signal(2, 1, Direction::Sell, 43250.50, 85);
    sell.stop_loss = Some(43250.0);
    h.signals.insert(sell).await.unwrap();
    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.executed, 1);

    let trades = h.trades.by_account(AccountId(1)).await.unwrap();
    assert_eq!(trades.len(), 2);
    let buy = trades.iter().find(|t| t.side == Side::Buy).unwrap();
    let sell = trades.iter().find(|t| t.side == Side::Sell).unwrap();
    assert_eq!(buy.status, TradeStatus::Open);
    assert_eq!(sell.status, TradeStatus::Closed);
    assert!((sell.quantity - buy.quantity).abs() < 1e-12);

    let account = h.accounts.get(AccountId(1)).await.unwrap();
    assert!(account.is_consistent());
    assert!(account.holdings.is_empty());
    assert_eq!(account.active_positions, 0);
    assert_eq!(account.total_trades, 1);
    assert_eq!(account.winning_trades, 0);
    assert!((account.available_balance - (8500.0 - buy.fees - sell.fees)).abs() < 1e-6);
    assert!((account.total_pnl + sell.fees).abs() < 1e-9);
    assert!((sell.realized_pnl.unwrap() + sell.fees).abs() < 1e-9);
}

#[tokio::test]
async fn failed_reconciliation_halts_account_without_touching_it() {
    let h = Harness::new(ScriptedVenue::overfilling(1.0));
    let before = account_holding_eth(1, 10000.0, 0.5, 2000.0);
    h.accounts.upsert(before.clone()).await.unwrap();
    let mut sell = signal(1, 1, Direction::Sell, 2100.0, 90);
    sell.symbol = "ETHUSDT".into();
    h.signals.insert(sell).await.unwrap();
    let mut events = h.live.events().subscribe();

    let err = h.live.tick_once(&limits()).await.unwrap_err();
    assert_eq!(err.code(), "INVARIANT_VIOLATION");
    match err {
        EngineError::InvariantViolation { account_id, .. } => assert_eq!(account_id, AccountId(1)),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.accounts.get(AccountId(1)).await.unwrap(), before);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Active);
    assert!(drain(&mut events).contains(&"account_halted"));
    assert_eq!(h.live.status().await.halted_accounts, vec![AccountId(1)]);

    // A halted account is skipped by later ticks until resumed.
    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.venue.calls(), 1);

    assert!(h.live.resume_account(AccountId(1)));
    assert!(!h.live.resume_account(AccountId(1)));
    assert!(h.live.status().await.halted_accounts.is_empty());

    // The fill was real: resuming settles the signal status, it does not order again.
    h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(h.venue.calls(), 1);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Executed);
}

#[tokio::test]
async fn accounts_are_processed_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let h = Harness::new(ScriptedVenue::meeting_at(barrier));
    for account in [1, 2] {
        h.accounts.upsert(Portfolio::new(AccountId(account), 8500.0, t0())).await.unwrap();
        h.signals.insert(btc_buy(account, account)).await.unwrap();
    }

    // Each venue call waits for the other; sequential accounts would never get past it.
    let report = timeout(WAIT, h.live.tick_once(&limits())).await.unwrap().unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Executed);
    assert_eq!(status_of(&h, 2).await, SignalStatus::Executed);
}

#[tokio::test]
async fn stop_mid_tick_finishes_current_signal_only() {
    let gate = Gate::default();
    let h = Harness::new(ScriptedVenue::gated(gate.clone()));
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    let mut first = btc_buy(1, 1);
    first.confidence = 90;
    h.signals.insert(first).await.unwrap();
    h.signals.insert(btc_buy(2, 1)).await.unwrap();

    let handle = h.live.start(limits()).await.unwrap();
    timeout(WAIT, gate.entered.notified()).await.unwrap();
    h.live.stop().await;
    gate.release.notify_one();
    timeout(WAIT, handle.join()).await.unwrap().unwrap();

    assert_eq!(status_of(&h, 1).await, SignalStatus::Executed);
    assert_eq!(status_of(&h, 2).await, SignalStatus::Active);
    assert_eq!(h.venue.calls(), 1);

    let status = h.live.status().await;
    assert_eq!(status.state, LoopState::Stopped);
    assert_eq!(status.ticks, 1);
    assert_eq!(status.executed, 1);
    assert_eq!(status.queue_depth, 1);
}

#[tokio::test]
async fn start_refuses_unusable_limits() {
    let h = Harness::new(ScriptedVenue::filling());

    let mut no_symbols = limits();
    no_symbols.allowed_symbols.clear();
    let mut too_permissive = limits();
    too_permissive.min_confidence = 59;

    for bad in [no_symbols, too_permissive] {
        let err = h.live.start(bad.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(h.live.tick_once(&bad).await.is_err());
    }
    assert_eq!(h.live.status().await.state, LoopState::Stopped);
}

#[tokio::test]
async fn second_start_is_refused_while_running() {
    let h = Harness::new(ScriptedVenue::filling());
    let handle = h.live.start(limits()).await.unwrap();

    let status = h.live.status().await;
    assert!(status.is_active);
    assert_eq!(status.started_at, Some(t0()));
    assert!(matches!(h.live.start(limits()).await, Err(EngineError::InvalidConfig(_))));

    h.live.stop().await;
    timeout(WAIT, handle.join()).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_is_idempotent_and_loop_restarts() {
    let h = Harness::new(ScriptedVenue::filling());
    let mut events = h.live.events().subscribe();

    h.live.stop().await;
    let handle = h.live.start(limits()).await.unwrap();
    h.live.stop().await;
    h.live.stop().await;
    timeout(WAIT, handle.join()).await.unwrap().unwrap();
    assert_eq!(drain(&mut events), vec!["loop_started", "loop_stopped"]);

    let handle = h.live.start(limits()).await.unwrap();
    assert_eq!(h.live.status().await.state, LoopState::Running);
    h.live.stop().await;
    timeout(WAIT, handle.join()).await.unwrap().unwrap();
    assert!(!h.live.status().await.is_active);
}

#[tokio::test]
async fn expiry_runs_while_loop_is_stopped() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    let mut expiring = btc_buy(1, 1);
    expiring.expires_at = Some(t0() + ChronoDuration::minutes(1));
    h.signals.insert(expiring).await.unwrap();

    assert!(h.live.expiry_sweeper().sweep_once().await.unwrap().is_empty());
    h.clock.advance(ChronoDuration::minutes(2));
    assert_eq!(h.live.expiry_sweeper().sweep_once().await.unwrap(), vec![SignalId(1)]);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Expired);

    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.eligible, 0);
    assert_eq!(h.venue.calls(), 0);
}

#[tokio::test]
async fn tick_expires_overdue_signals_before_listing() {
    let h = Harness::new(ScriptedVenue::filling());
    h.accounts.upsert(Portfolio::new(AccountId(1), 8500.0, t0())).await.unwrap();
    let mut overdue = btc_buy(1, 1);
    overdue.expires_at = Some(t0());
    h.signals.insert(overdue).await.unwrap();

    let report = h.live.tick_once(&limits()).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.eligible, 0);
    assert_eq!(status_of(&h, 1).await, SignalStatus::Expired);
}
