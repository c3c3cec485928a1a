//! End-to-end round lifecycle: open, wager, close, settle

mod common;

use chrono::Duration;
use common::{build, harness, start_time, FaultyStore, FlakyLedger};
use round_engine::rounds::{LedgerReason, MagnitudeClass, ParityClass};
use round_engine::store::WagerStore;
use round_engine::{
    Clock, EngineError, ManualClock, MemoryLedger, MemoryStore, Persistence, RoundState, Selection, SettlementStatus,
    Wager,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_deadline_closes_round_and_rejects_late_wager() {
    let h = harness(Some(3));
    for account in ["alice", "bob", "carol", "dave"] {
        h.ledger.deposit(account, 100);
    }

    let round = h.scheduler.enable_continuous().await.unwrap().unwrap();
    assert_eq!(round.state, RoundState::Open);

    h.scheduler
        .place_wager("alice", round.id, Selection::ExactValue(3), 10)
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(30));
    h.scheduler
        .place_wager("bob", round.id, Selection::Parity(ParityClass::Red), 10)
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(29));
    h.scheduler
        .place_wager("carol", round.id, Selection::Magnitude(MagnitudeClass::High), 10)
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(2));
    let err = h
        .scheduler
        .place_wager("dave", round.id, Selection::ExactValue(1), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { state: RoundState::Closed, .. }));
    assert_eq!(h.ledger.balance("dave"), 100);

    let closed = h.scheduler.get_round(round.id).await.unwrap();
    assert_eq!(closed.state, RoundState::Closed);
    let outcome = closed.outcome.unwrap();
    assert_eq!(outcome.value, 3);

    let wagers = h.scheduler.round_wagers(round.id).await.unwrap();
    assert_eq!(wagers.len(), 3);
    for wager in &wagers {
        assert_ne!(wager.settlement, SettlementStatus::Pending);
        let expected = if wager.selection.wins_on(&outcome) {
            wager.stake * wager.category().multiplier()
        } else {
            0
        };
        assert_eq!(wager.payout, expected, "payout for {}", wager.account_id);
    }

    // 3 is odd (green) and below the midpoint (low)
    assert_eq!(h.ledger.balance("alice"), 180);
    assert_eq!(h.ledger.balance("bob"), 90);
    assert_eq!(h.ledger.balance("carol"), 90);
}

#[tokio::test]
async fn test_override_fixes_outcome() {
    let h = harness(None);
    let round = h.scheduler.start_round().await.unwrap().unwrap();

    h.scheduler.set_override(round.id, 7).await.unwrap();
    h.clock.advance(Duration::seconds(61));

    let closed = h.scheduler.get_round(round.id).await.unwrap();
    let outcome = closed.outcome.unwrap();
    assert_eq!(outcome.value, 7);
    assert_eq!(outcome.parity, ParityClass::Green);
    assert_eq!(outcome.magnitude, MagnitudeClass::High);

    let err = h.scheduler.set_override(round.id, 2).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn test_exact_value_win_credited_once() {
    let h = harness(Some(3));
    h.ledger.deposit("alice", 100);

    let round = h.scheduler.start_round().await.unwrap().unwrap();
    let wager = h
        .scheduler
        .place_wager("alice", round.id, Selection::ExactValue(3), 10)
        .await
        .unwrap();
    assert_eq!(h.ledger.balance("alice"), 90);

    let report = h.scheduler.force_close_round(round.id).await.unwrap();
    assert_eq!(report.wagers_won, 1);
    assert_eq!(report.total_paid_out, 90);

    // Redundant transition checks must not pay again
    for _ in 0..3 {
        h.clock.advance(Duration::seconds(61));
        h.scheduler.tick(h.clock.now()).await.unwrap();
    }

    let wins: Vec<_> = h
        .ledger
        .entries_for_wager(wager.id)
        .into_iter()
        .filter(|e| e.reason == LedgerReason::Win)
        .collect();
    assert_eq!(wins.len(), 1);
    assert_eq!(wins[0].amount, 90);
    assert_eq!(h.ledger.balance("alice"), 180);
}

#[tokio::test]
async fn test_disable_continuous_settles_open_round() {
    let h = harness(Some(0));
    h.ledger.deposit("alice", 50);
    h.ledger.deposit("bob", 50);

    let round = h.scheduler.enable_continuous().await.unwrap().unwrap();
    h.scheduler
        .place_wager("alice", round.id, Selection::Parity(ParityClass::Green), 20)
        .await
        .unwrap();
    h.scheduler
        .place_wager("bob", round.id, Selection::Magnitude(MagnitudeClass::High), 20)
        .await
        .unwrap();

    let reports = h.scheduler.disable_continuous().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].round_id, round.id);
    assert_eq!(reports[0].wagers_settled, 2);

    assert!(h.scheduler.get_active_round().await.unwrap().is_none());
    assert!(!h.scheduler.continuous_status().enabled);

    // Zero belongs to the favorable parity class
    assert_eq!(h.ledger.balance("alice"), 70);
    assert_eq!(h.ledger.balance("bob"), 30);

    h.clock.advance(Duration::seconds(300));
    assert!(h.scheduler.get_active_round().await.unwrap().is_none());
}

#[tokio::test]
async fn test_outcome_only_set_on_close() {
    let h = harness(None);
    let mut config = h.scheduler.round_config().await;
    config.start_delay_secs = 5;
    h.scheduler.update_round_config(config).await.unwrap();

    let pending = h.scheduler.start_round().await.unwrap().unwrap();
    assert_eq!(pending.state, RoundState::Pending);
    assert!(pending.outcome.is_none());

    h.clock.advance(Duration::seconds(5));
    let open = h.scheduler.get_active_round().await.unwrap().unwrap();
    assert_eq!(open.state, RoundState::Open);
    assert!(open.outcome.is_none());

    h.clock.advance(Duration::seconds(60));
    let closed = h.scheduler.get_round(open.id).await.unwrap();
    let outcome = closed.outcome.unwrap();

    h.clock.advance(Duration::seconds(60));
    let later = h.scheduler.get_round(open.id).await.unwrap();
    assert_eq!(later.outcome, Some(outcome));
}

#[tokio::test]
async fn test_duplicate_wager_and_insufficient_funds() {
    let h = harness(Some(1));
    h.ledger.deposit("alice", 15);

    let round = h.scheduler.start_round().await.unwrap().unwrap();
    h.scheduler
        .place_wager("alice", round.id, Selection::ExactValue(1), 10)
        .await
        .unwrap();

    let err = h
        .scheduler
        .place_wager("alice", round.id, Selection::ExactValue(2), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateWager { round: 1, .. }));

    h.ledger.deposit("bob", 5);
    let err = h
        .scheduler
        .place_wager("bob", round.id, Selection::ExactValue(2), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { requested: 10, available: 5, .. }));
    assert_eq!(h.scheduler.round_wagers(round.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_force_close_rejects_closed_round() {
    let h = harness(Some(1));
    let round = h.scheduler.start_round().await.unwrap().unwrap();

    h.scheduler.force_close_round(round.id).await.unwrap();
    let err = h.scheduler.force_close_round(round.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { state: RoundState::Closed, .. }));

    let err = h.scheduler.force_close_round(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::RoundNotFound(_)));
}

#[tokio::test]
async fn test_failed_credit_is_queued_for_reconciliation() {
    let clock = Arc::new(ManualClock::new(common::start_time()));
    let ledger = Arc::new(FlakyLedger::new(MemoryLedger::new()));
    ledger.inner.deposit("alice", 100);
    let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
    let scheduler = build(store, ledger.clone(), clock, Some(3));

    let round = scheduler.start_round().await.unwrap().unwrap();
    let wager = scheduler
        .place_wager("alice", round.id, Selection::ExactValue(3), 10)
        .await
        .unwrap();

    let report = scheduler.force_close_round(round.id).await.unwrap();
    assert_eq!(report.wagers_won, 0);
    assert_eq!(report.reconciliation_failures.len(), 1);

    // Never left as an uncredited win, never silently lost
    let stored = scheduler
        .round_wagers(round.id)
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.id == wager.id)
        .unwrap();
    assert_eq!(stored.settlement, SettlementStatus::Pending);

    let queue = scheduler.reconciliation_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].wager_id, wager.id);
    assert!(queue[0].reverted);
    assert_eq!(scheduler.metrics().reconciliation_failures, 1);
    assert_eq!(ledger.inner.balance("alice"), 90);

    ledger.failing.store(false, Ordering::SeqCst);
    let reports = scheduler.retry_reconciliation().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].total_paid_out, 90);
    assert!(scheduler.reconciliation_queue().is_empty());
    assert_eq!(ledger.inner.balance("alice"), 180);
}

#[tokio::test]
async fn test_one_tick_opens_closes_and_settles() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let scheduler = build(store.clone(), ledger.clone(), clock, Some(4));

    let mut config = scheduler.round_config().await;
    config.start_delay_secs = 5;
    scheduler.update_round_config(config).await.unwrap();

    let pending = scheduler.start_round().await.unwrap().unwrap();
    assert_eq!(pending.state, RoundState::Pending);
    let wager = Wager::new(pending.id, "alice", Selection::ExactValue(4), 10, pending.open_at);
    store.insert_wager(&wager).await.unwrap();

    // Past both the start time and the deadline in a single check
    let at = pending.open_at + Duration::seconds(60);
    let report = scheduler.tick(at).await.unwrap();

    assert!(report.active.is_none());
    assert_eq!(report.closed.len(), 1);
    let closed = &report.closed[0];
    assert_eq!(closed.round.id, pending.id);
    assert_eq!(closed.round.state, RoundState::Closed);
    assert_eq!(closed.round.opened_at, Some(at));
    assert_eq!(closed.round.closed_at, Some(at));
    assert_eq!(closed.round.outcome.map(|o| o.value), Some(4));
    assert_eq!(closed.report.wagers_won, 1);
    assert_eq!(ledger.balance("alice"), 90);
}

#[tokio::test]
async fn test_store_failure_during_settlement_is_resumed() {
    let store = Arc::new(FaultyStore::new(MemoryStore::new()));
    let ledger = Arc::new(MemoryLedger::new());
    ledger.deposit("alice", 100);
    ledger.deposit("bob", 100);
    let clock = Arc::new(ManualClock::new(start_time()));
    let scheduler = build(store.clone(), ledger.clone(), clock.clone(), Some(3));

    let round = scheduler.start_round().await.unwrap().unwrap();
    scheduler
        .place_wager("alice", round.id, Selection::ExactValue(3), 10)
        .await
        .unwrap();
    scheduler
        .place_wager("bob", round.id, Selection::Parity(ParityClass::Green), 10)
        .await
        .unwrap();

    store.fail_next_resolves(1);
    clock.advance(Duration::seconds(61));

    // The failing wager does not stop the rest of the pass
    let first = scheduler.tick(clock.now()).await.unwrap();
    assert_eq!(first.closed.len(), 1);
    let pass = &first.closed[0].report;
    assert_eq!(pass.wagers_settled, 1);
    assert_eq!(pass.unsettled.len(), 1);
    assert_eq!(scheduler.unsettled_rounds(), vec![round.id]);

    let second = scheduler.tick(clock.now()).await.unwrap();
    assert_eq!(second.resumed.len(), 1);
    assert_eq!(second.resumed[0].wagers_settled, 1);
    assert!(second.resumed[0].is_complete());
    assert!(scheduler.unsettled_rounds().is_empty());

    let wagers = scheduler.round_wagers(round.id).await.unwrap();
    assert!(wagers.iter().all(|w| w.settlement == SettlementStatus::Won));
    assert_eq!(ledger.balance("alice"), 180);
    assert_eq!(ledger.balance("bob"), 110);
}
