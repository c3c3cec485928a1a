//! Round scheduler
//!
//! The single entry point for everything that can move a round forward. The
//! background ticker and every request-path operation (reads, wagers, admin
//! actions) run the same `tick` first, so no caller ever acts on a round whose
//! deadline has passed but whose state has not caught up yet.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigLoader, EngineConfig, RoundConfig};
use crate::errors::{EngineError, EngineResult, StoreError};
use crate::ledger::{Ledger, MemoryLedger};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::rounds::creation::CreationGuard;
use crate::rounds::result::{OutcomeSource, ResultGenerator};
use crate::rounds::settlement::{ReconciliationItem, SettlementEngine, SettlementReport};
use crate::rounds::state_machine::{ClosedRound, RoundStateMachine};
use crate::rounds::types::{Amount, LedgerMemo, Round, RoundState, Selection, Wager};
use crate::store::{MemoryStore, Persistence};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one transition check did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// The round still active after this tick, if any
    pub active: Option<Round>,
    /// Rounds this tick closed, with their settlement passes
    pub closed: Vec<ClosedRound>,
    pub created: Option<Round>,
    /// Further passes over closed rounds an earlier pass left incomplete
    pub resumed: Vec<SettlementReport>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ContinuousStatus {
    pub enabled: bool,
    pub creation_in_flight: bool,
}

pub struct RoundScheduler {
    store: Arc<dyn Persistence>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    config: RwLock<RoundConfig>,
    machine: RoundStateMachine,
    creation: CreationGuard,
    settlement: Arc<SettlementEngine>,
    continuous: AtomicBool,
    admin: Mutex<()>,
    metrics: Arc<EngineMetrics>,
}

impl RoundScheduler {
    pub fn builder(config: EngineConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Finish any incomplete settlements, evaluate transitions for every active
    /// round, then create the next round if none is left and continuous mode is
    /// on. Safe to call redundantly.
    pub async fn tick(&self, now: DateTime<Utc>) -> EngineResult<TickReport> {
        let config = self.config.read().await.clone();
        let mut report = TickReport {
            resumed: self.settlement.resume_incomplete(config.outcome_range).await,
            ..TickReport::default()
        };

        for round in self.store.active_rounds().await? {
            // Open and close are evaluated in sequence; a short round may do both
            let round = self.machine.maybe_open(round, now, &config).await?;
            match self.machine.maybe_close(&round, now, &config).await? {
                Some(closed) => report.closed.push(closed),
                None => {
                    if round.is_active() {
                        report.active = Some(round);
                    }
                }
            }
        }

        if report.active.is_none() && self.continuous.load(Ordering::SeqCst) {
            let created = self
                .creation
                .try_create_next_round(now, &config, || self.continuous.load(Ordering::SeqCst))
                .await?;
            if let Some(round) = created {
                let round = self.machine.maybe_open(round, now, &config).await?;
                report.active = Some(round.clone());
                report.created = Some(round);
            }
        }

        Ok(report)
    }

    /// The current round, after bringing its state up to date
    pub async fn get_active_round(&self) -> EngineResult<Option<Round>> {
        let report = self.tick(self.clock.now()).await?;
        match report.active {
            Some(round) => Ok(Some(round)),
            // A concurrent caller may have created the round this tick skipped
            None => Ok(self.store.active_rounds().await?.into_iter().next()),
        }
    }

    pub async fn get_round(&self, round_id: Uuid) -> EngineResult<Round> {
        self.tick(self.clock.now()).await?;
        self.store
            .get_round(round_id)
            .await?
            .ok_or(EngineError::RoundNotFound(round_id))
    }

    pub async fn round_wagers(&self, round_id: Uuid) -> EngineResult<Vec<Wager>> {
        let round = self.get_round(round_id).await?;
        Ok(self.store.wagers_for_round(round.id, None).await?)
    }

    /// Stake `stake` on `selection` for `account_id`. The stake is debited
    /// before the wager is persisted and refunded if persisting fails.
    pub async fn place_wager(
        &self,
        account_id: &str,
        round_id: Uuid,
        selection: Selection,
        stake: Amount,
    ) -> EngineResult<Wager> {
        let now = self.clock.now();
        self.tick(now).await?;
        let outcome_range = self.config.read().await.outcome_range;

        validate_wager(account_id, &selection, stake, outcome_range)?;

        let round = self
            .store
            .get_round(round_id)
            .await?
            .ok_or(EngineError::RoundNotFound(round_id))?;
        if round.state != RoundState::Open {
            return Err(EngineError::InvalidState {
                round: round.sequence_number,
                state: round.state,
                action: "accept wagers",
            });
        }
        if self.store.find_wager(round.id, account_id).await?.is_some() {
            return Err(EngineError::DuplicateWager {
                account: account_id.to_string(),
                round: round.sequence_number,
            });
        }

        let wager = Wager::new(round.id, account_id, selection, stake, now);
        self.ledger
            .debit_and_validate(account_id, stake, LedgerMemo::stake(&wager))
            .await?;

        if let Err(e) = self.store.insert_wager(&wager).await {
            self.refund(&wager).await;
            return Err(match e {
                StoreError::DuplicateWager { .. } => EngineError::DuplicateWager {
                    account: account_id.to_string(),
                    round: round.sequence_number,
                },
                other => other.into(),
            });
        }

        info!(
            round = round.sequence_number,
            wager_id = %wager.id,
            account = %account_id,
            selection = %wager.selection,
            stake,
            "Wager placed"
        );
        self.metrics.record_wager_placed(stake);

        // The round may have closed between the state check and the insert;
        // settle again so the wager does not sit pending on a closed round
        if let Some(current) = self.store.get_round(round.id).await? {
            if current.state == RoundState::Closed {
                warn!(round = current.sequence_number, wager_id = %wager.id, "Wager landed after close; settling");
                self.settlement.settle(&current, outcome_range).await?;
                if let Some(settled) = self.store.get_wager(wager.id).await? {
                    return Ok(settled);
                }
            }
        }

        Ok(wager)
    }

    async fn refund(&self, wager: &Wager) {
        if let Err(e) = self
            .ledger
            .credit(&wager.account_id, wager.stake, LedgerMemo::refund(wager))
            .await
        {
            error!(
                wager_id = %wager.id,
                account = %wager.account_id,
                stake = wager.stake,
                error = %e,
                "Stake refund failed"
            );
        }
    }

    /// Administrative close; settles the round immediately
    pub async fn force_close_round(&self, round_id: Uuid) -> EngineResult<SettlementReport> {
        let now = self.clock.now();
        self.tick(now).await?;
        let config = self.config.read().await.clone();

        let round = self
            .store
            .get_round(round_id)
            .await?
            .ok_or(EngineError::RoundNotFound(round_id))?;
        let closed = self.machine.force_close(&round, now, &config).await.map_err(|e| {
            warn!(round = round.sequence_number, error = %e, "Force close rejected");
            e
        })?;

        // Continuous mode picks up the next round right away
        self.tick(self.clock.now()).await?;
        Ok(closed.report)
    }

    pub async fn set_override(&self, round_id: Uuid, value: u8) -> EngineResult<Round> {
        self.tick(self.clock.now()).await?;
        let range = self.config.read().await.outcome_range;

        let round = self
            .store
            .get_round(round_id)
            .await?
            .ok_or(EngineError::RoundNotFound(round_id))?;
        self.machine.apply_override(&round, value, range).await.map_err(|e| {
            warn!(round = round.sequence_number, value, error = %e, "Override rejected");
            e
        })
    }

    /// Turn continuous mode on. Rounds left active by an earlier session are
    /// closed first so the fresh round starts from a clean slate.
    pub async fn enable_continuous(&self) -> EngineResult<Option<Round>> {
        let _admin = self.admin.lock().await;
        if self.continuous.load(Ordering::SeqCst) {
            debug!("Continuous mode already enabled");
            return self.get_active_round().await;
        }

        let stray = self.close_active_rounds().await?;
        if !stray.is_empty() {
            warn!(count = stray.len(), "Closed stray rounds before enabling continuous mode");
        }

        self.continuous.store(true, Ordering::SeqCst);
        info!("Continuous mode enabled");
        Ok(self.tick(self.clock.now()).await?.active)
    }

    /// Turn continuous mode off. Waits out any in-flight creation, then closes
    /// and settles every active round before returning.
    pub async fn disable_continuous(&self) -> EngineResult<Vec<SettlementReport>> {
        let _admin = self.admin.lock().await;
        self.continuous.store(false, Ordering::SeqCst);
        self.creation.wait_idle().await;

        let reports = self.close_active_rounds().await?;
        info!(closed = reports.len(), "Continuous mode disabled");
        Ok(reports)
    }

    async fn close_active_rounds(&self) -> EngineResult<Vec<SettlementReport>> {
        let now = self.clock.now();
        let report = self.tick(now).await?;
        let config = self.config.read().await.clone();
        let mut reports: Vec<SettlementReport> = report.closed.into_iter().map(|c| c.report).collect();

        for round in self.store.active_rounds().await? {
            match self.machine.force_close(&round, now, &config).await {
                Ok(closed) => reports.push(closed.report),
                Err(EngineError::InvalidState { .. }) => {
                    debug!(round = round.sequence_number, "Round closed concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    pub fn continuous_status(&self) -> ContinuousStatus {
        ContinuousStatus {
            enabled: self.continuous.load(Ordering::SeqCst),
            creation_in_flight: self.creation.in_flight(),
        }
    }

    /// Manually start one round. Works with continuous mode off; `None` when
    /// another creation attempt is already running.
    pub async fn start_round(&self) -> EngineResult<Option<Round>> {
        let now = self.clock.now();
        let report = self.tick(now).await?;
        if let Some(active) = report.active {
            return Err(EngineError::InvalidState {
                round: active.sequence_number,
                state: active.state,
                action: "be superseded while active",
            });
        }

        let config = self.config.read().await.clone();
        match self.creation.try_create_next_round(now, &config, || true).await? {
            Some(round) => Ok(Some(self.machine.maybe_open(round, now, &config).await?)),
            None => Ok(None),
        }
    }

    /// Replace the round settings. Rounds already open keep the duration they
    /// opened with.
    pub async fn update_round_config(&self, config: RoundConfig) -> EngineResult<()> {
        config.validate()?;
        info!(
            duration_secs = config.duration_secs,
            start_delay_secs = config.start_delay_secs,
            outcome_range = config.outcome_range,
            "Round configuration updated"
        );
        *self.config.write().await = config;
        Ok(())
    }

    pub async fn round_config(&self) -> RoundConfig {
        self.config.read().await.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reconciliation_queue(&self) -> Vec<ReconciliationItem> {
        self.settlement.reconciliation_queue()
    }

    /// Closed rounds whose settlement is still missing wagers
    pub fn unsettled_rounds(&self) -> Vec<Uuid> {
        self.settlement.incomplete_rounds()
    }

    /// Run another settlement pass over every round with an outstanding
    /// reconciliation item or an incomplete settlement. Wagers whose credit
    /// now lands leave the queue.
    pub async fn retry_reconciliation(&self) -> EngineResult<Vec<SettlementReport>> {
        let outcome_range = self.config.read().await.outcome_range;
        let mut round_ids: Vec<Uuid> = self.reconciliation_queue().iter().map(|i| i.round_id).collect();
        round_ids.extend(self.settlement.incomplete_rounds());
        round_ids.sort();
        round_ids.dedup();

        let mut reports = Vec::with_capacity(round_ids.len());
        for round_id in round_ids {
            let round = self
                .store
                .get_round(round_id)
                .await?
                .ok_or(EngineError::RoundNotFound(round_id))?;
            reports.push(self.settlement.settle(&round, outcome_range).await?);
        }

        info!(
            rounds = reports.len(),
            outstanding = self.settlement.reconciliation_queue().len(),
            "Reconciliation pass finished"
        );
        Ok(reports)
    }

    /// Run `tick` on a fixed interval until the returned handle is shut down
    pub fn spawn(self: Arc<Self>, interval: Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Round scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(self.clock.now()).await {
                            warn!(error = %e, "Scheduler tick failed");
                        }
                    }
                }
            }

            info!("Round scheduler stopped");
        });

        SchedulerHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

fn validate_wager(account_id: &str, selection: &Selection, stake: Amount, outcome_range: u8) -> EngineResult<()> {
    if account_id.trim().is_empty() {
        return Err(EngineError::InvalidWager("account id is empty".to_string()));
    }
    if stake == 0 {
        return Err(EngineError::InvalidWager("stake must be positive".to_string()));
    }
    if let Selection::ExactValue(value) = selection {
        if *value >= outcome_range {
            return Err(EngineError::InvalidWager(format!(
                "exact value {} outside outcome range 0..{}",
                value, outcome_range
            )));
        }
    }
    Ok(())
}

/// Handle to the background ticker
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the ticker and wait for it. No transition runs after this returns.
    pub async fn shutdown(mut self) -> EngineResult<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Wires a scheduler from configuration and collaborators
pub struct SchedulerBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Persistence>>,
    ledger: Option<Arc<dyn Ledger>>,
    clock: Option<Arc<dyn Clock>>,
    outcome_source: Option<Arc<dyn OutcomeSource>>,
}

impl SchedulerBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            ledger: None,
            clock: None,
            outcome_source: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Override the clock (useful for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the outcome source (useful for testing)
    pub fn with_outcome_source(mut self, source: Arc<dyn OutcomeSource>) -> Self {
        self.outcome_source = Some(source);
        self
    }

    pub fn build(self) -> EngineResult<RoundScheduler> {
        ConfigLoader::new().validate(&self.config)?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let generator = match self.outcome_source {
            Some(source) => ResultGenerator::new(source),
            None => ResultGenerator::random(),
        };
        let metrics = Arc::new(EngineMetrics::new());

        let settlement = Arc::new(SettlementEngine::new(
            store.clone(),
            ledger.clone(),
            generator.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let machine = RoundStateMachine::new(
            store.clone(),
            generator,
            settlement.clone(),
            metrics.clone(),
        );
        let creation = CreationGuard::new(
            store.clone(),
            self.config.scheduler.creation_max_attempts,
            self.config.scheduler.creation_backoff(),
            metrics.clone(),
        );

        Ok(RoundScheduler {
            store,
            ledger,
            clock,
            config: RwLock::new(self.config.rounds),
            machine,
            creation,
            settlement,
            continuous: AtomicBool::new(false),
            admin: Mutex::new(()),
            metrics,
        })
    }
}
