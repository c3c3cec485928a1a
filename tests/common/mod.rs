//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use round_engine::errors::{LedgerError, LedgerResult, StoreError, StoreResult};
use round_engine::ledger::Ledger;
use round_engine::rounds::{Amount, FixedOutcome, LedgerEntry, LedgerMemo, LedgerReason, OutcomeSource};
use round_engine::store::{RoundPatch, RoundStore, WagerResolution, WagerStore};
use round_engine::{
    EngineConfig, ManualClock, MemoryLedger, MemoryStore, Persistence, Round, RoundScheduler, RoundState,
    SettlementStatus, Wager,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// Rounds open immediately on creation and last 60 seconds
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rounds.duration_secs = 60;
    config.rounds.start_delay_secs = 0;
    config.rounds.outcome_range = 10;
    config.scheduler.creation_backoff_ms = 1;
    config
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub scheduler: Arc<RoundScheduler>,
}

pub fn harness(outcome: Option<u8>) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = Arc::new(MemoryLedger::new());
    let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
    let scheduler = build(store, ledger.clone(), clock.clone(), outcome);
    Harness {
        clock,
        ledger,
        scheduler,
    }
}

pub fn build(
    store: Arc<dyn Persistence>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<ManualClock>,
    outcome: Option<u8>,
) -> Arc<RoundScheduler> {
    let mut builder = RoundScheduler::builder(test_config())
        .with_store(store)
        .with_ledger(ledger)
        .with_clock(clock);
    if let Some(value) = outcome {
        let source: Arc<dyn OutcomeSource> = Arc::new(FixedOutcome(value));
        builder = builder.with_outcome_source(source);
    }
    Arc::new(builder.build().expect("valid test config"))
}

/// Store wrapper with injectable faults
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Reads of the max sequence number that report 0, as a lagging replica would
    stale_reads: AtomicU32,
    /// Every round insert reports the sequence number as taken
    reject_inserts: AtomicBool,
    /// Wager resolutions that fail with a write error before touching the store
    failed_resolves: AtomicU32,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn with_stale_reads(self, count: u32) -> Self {
        self.stale_reads.store(count, Ordering::SeqCst);
        self
    }

    pub fn rejecting_inserts(self) -> Self {
        self.reject_inserts.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_next_resolves(&self, count: u32) {
        self.failed_resolves.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RoundStore for FaultyStore {
    async fn insert_round(&self, round: &Round) -> StoreResult<()> {
        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::SequenceConflict(round.sequence_number));
        }
        self.inner.insert_round(round).await
    }

    async fn get_round(&self, id: Uuid) -> StoreResult<Option<Round>> {
        self.inner.get_round(id).await
    }

    async fn active_rounds(&self) -> StoreResult<Vec<Round>> {
        self.inner.active_rounds().await
    }

    async fn max_sequence_number(&self) -> StoreResult<u64> {
        if Self::take(&self.stale_reads) {
            Ok(0)
        } else {
            self.inner.max_sequence_number().await
        }
    }

    async fn update_round_if(
        &self,
        id: Uuid,
        expected: &[RoundState],
        patch: RoundPatch,
    ) -> StoreResult<Option<Round>> {
        self.inner.update_round_if(id, expected, patch).await
    }
}

#[async_trait]
impl WagerStore for FaultyStore {
    async fn insert_wager(&self, wager: &Wager) -> StoreResult<()> {
        self.inner.insert_wager(wager).await
    }

    async fn get_wager(&self, id: Uuid) -> StoreResult<Option<Wager>> {
        self.inner.get_wager(id).await
    }

    async fn find_wager(&self, round_id: Uuid, account_id: &str) -> StoreResult<Option<Wager>> {
        self.inner.find_wager(round_id, account_id).await
    }

    async fn wagers_for_round(
        &self,
        round_id: Uuid,
        status: Option<SettlementStatus>,
    ) -> StoreResult<Vec<Wager>> {
        self.inner.wagers_for_round(round_id, status).await
    }

    async fn resolve_wager_if(
        &self,
        id: Uuid,
        expected: SettlementStatus,
        resolution: WagerResolution,
    ) -> StoreResult<Option<Wager>> {
        if Self::take(&self.failed_resolves) {
            return Err(StoreError::WriteFailed("transient".to_string()));
        }
        self.inner.resolve_wager_if(id, expected, resolution).await
    }
}

/// Ledger whose win credits fail while `failing` is set
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    pub failing: AtomicBool,
}

impl FlakyLedger {
    pub fn new(inner: MemoryLedger) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn credit(&self, account_id: &str, amount: Amount, memo: LedgerMemo) -> LedgerResult<LedgerEntry> {
        if memo.reason == LedgerReason::Win && self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        self.inner.credit(account_id, amount, memo).await
    }

    async fn debit_and_validate(
        &self,
        account_id: &str,
        amount: Amount,
        memo: LedgerMemo,
    ) -> LedgerResult<LedgerEntry> {
        self.inner.debit_and_validate(account_id, amount, memo).await
    }
}
