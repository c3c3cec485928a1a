//! Settlement of closed rounds
//!
//! Every pending wager on a closed round is resolved against the round's
//! outcome. The per-wager write is a compare-and-set on `Pending`, so two passes
//! over the same round can never settle one wager twice. Winning wagers are then
//! credited; a credit that fails reverts the wager to `Pending` and is queued for
//! manual reconciliation instead of leaving a `Won` wager with no money behind it.
//!
//! A pass that hits a storage error keeps going with the remaining wagers and
//! marks the round incomplete; `resume_incomplete` picks those rounds up again.

use crate::clock::Clock;
use crate::errors::{EngineError, EngineResult, LedgerError};
use crate::ledger::Ledger;
use crate::metrics::EngineMetrics;
use crate::rounds::result::ResultGenerator;
use crate::rounds::types::{Amount, LedgerMemo, Outcome, Round, RoundState, SettlementStatus, Wager};
use crate::store::{Persistence, RoundPatch, WagerResolution};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A won wager whose ledger credit did not land
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconciliationItem {
    pub wager_id: Uuid,
    pub round_id: Uuid,
    pub round_sequence: u64,
    pub account_id: String,
    pub payout: Amount,
    pub reason: String,
    /// False when even the revert to `Pending` failed and the wager may read `Won`
    pub reverted: bool,
    pub detected_at: DateTime<Utc>,
}

impl ReconciliationItem {
    pub fn to_error(&self) -> EngineError {
        EngineError::SettlementReconciliation {
            wager_id: self.wager_id,
            round: self.round_sequence,
            reason: self.reason.clone(),
        }
    }
}

/// Result of one settlement pass over a round
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettlementReport {
    pub round_id: Uuid,
    pub round_sequence: u64,
    pub outcome: Outcome,
    pub wagers_settled: usize,
    pub wagers_won: usize,
    pub wagers_lost: usize,
    pub total_paid_out: Amount,
    pub reconciliation_failures: Vec<ReconciliationItem>,
    /// Wagers left `Pending` because a storage call failed during this pass
    pub unsettled: Vec<Uuid>,
}

impl SettlementReport {
    fn new(round: &Round, outcome: Outcome) -> Self {
        Self {
            round_id: round.id,
            round_sequence: round.sequence_number,
            outcome,
            wagers_settled: 0,
            wagers_won: 0,
            wagers_lost: 0,
            total_paid_out: 0,
            reconciliation_failures: Vec::new(),
            unsettled: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unsettled.is_empty()
    }

    fn record_win(&mut self, payout: Amount) {
        self.wagers_settled += 1;
        self.wagers_won += 1;
        self.total_paid_out += payout;
    }

    fn record_loss(&mut self) {
        self.wagers_settled += 1;
        self.wagers_lost += 1;
    }
}

pub struct SettlementEngine {
    store: Arc<dyn Persistence>,
    ledger: Arc<dyn Ledger>,
    generator: ResultGenerator,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    reconciliation: DashMap<Uuid, ReconciliationItem>,
    /// Closed rounds whose last pass left wagers pending, by round id
    incomplete: DashMap<Uuid, u64>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn Persistence>,
        ledger: Arc<dyn Ledger>,
        generator: ResultGenerator,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            ledger,
            generator,
            clock,
            metrics,
            reconciliation: DashMap::new(),
            incomplete: DashMap::new(),
        }
    }

    /// Payout owed for `wager` under `outcome`; zero on a loss
    pub fn payout_for(wager: &Wager, outcome: &Outcome) -> Amount {
        if wager.selection.wins_on(outcome) {
            wager.stake.saturating_mul(wager.category().multiplier())
        } else {
            0
        }
    }

    /// Settle every pending wager on a closed round. Running it again on the
    /// same round resolves nothing new and credits nothing twice.
    pub async fn settle(&self, round: &Round, outcome_range: u8) -> EngineResult<SettlementReport> {
        if round.state != RoundState::Closed {
            return Err(EngineError::InvalidState {
                round: round.sequence_number,
                state: round.state,
                action: "be settled",
            });
        }

        match self.settle_pending(round, outcome_range).await {
            Ok(report) => {
                if report.is_complete() {
                    if self.incomplete.remove(&round.id).is_some() {
                        info!(round = round.sequence_number, "Incomplete settlement finished");
                    }
                } else {
                    warn!(
                        round = round.sequence_number,
                        unsettled = report.unsettled.len(),
                        "Settlement incomplete; round queued for another pass"
                    );
                    self.incomplete.insert(round.id, round.sequence_number);
                }
                Ok(report)
            }
            Err(e) => {
                error!(round = round.sequence_number, error = %e, "Settlement pass failed; round queued for another pass");
                self.incomplete.insert(round.id, round.sequence_number);
                Err(e)
            }
        }
    }

    async fn settle_pending(&self, round: &Round, outcome_range: u8) -> EngineResult<SettlementReport> {
        let outcome = match round.outcome {
            Some(outcome) => outcome,
            None => self.record_missing_outcome(round, outcome_range).await?,
        };

        let pending = self
            .store
            .wagers_for_round(round.id, Some(SettlementStatus::Pending))
            .await?;
        let mut report = SettlementReport::new(round, outcome);

        for wager in pending {
            let wager_id = wager.id;
            if let Err(e) = self.settle_wager(round, &outcome, wager, &mut report).await {
                error!(round = round.sequence_number, wager_id = %wager_id, error = %e, "Wager settlement failed");
                report.unsettled.push(wager_id);
            }
        }

        if report.wagers_settled > 0 || !report.reconciliation_failures.is_empty() || !report.is_complete() {
            info!(
                round = round.sequence_number,
                outcome = outcome.value,
                settled = report.wagers_settled,
                won = report.wagers_won,
                paid_out = report.total_paid_out,
                failures = report.reconciliation_failures.len(),
                unsettled = report.unsettled.len(),
                "Round settled"
            );
        } else {
            debug!(round = round.sequence_number, "No pending wagers to settle");
        }

        Ok(report)
    }

    /// Run another pass over every round an earlier pass left incomplete.
    /// Failures are logged; the round stays queued until a pass completes.
    pub async fn resume_incomplete(&self, outcome_range: u8) -> Vec<SettlementReport> {
        let mut reports = Vec::new();
        for round_id in self.incomplete_rounds() {
            let round = match self.store.get_round(round_id).await {
                Ok(Some(round)) => round,
                Ok(None) => {
                    warn!(round_id = %round_id, "Incomplete round no longer stored");
                    self.incomplete.remove(&round_id);
                    continue;
                }
                Err(e) => {
                    warn!(round_id = %round_id, error = %e, "Failed to load incomplete round");
                    continue;
                }
            };
            if let Ok(report) = self.settle(&round, outcome_range).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Rounds still waiting for a complete settlement pass, oldest first
    pub fn incomplete_rounds(&self) -> Vec<Uuid> {
        let mut rounds: Vec<(u64, Uuid)> = self.incomplete.iter().map(|r| (*r.value(), *r.key())).collect();
        rounds.sort();
        rounds.into_iter().map(|(_, id)| id).collect()
    }

    async fn record_missing_outcome(&self, round: &Round, outcome_range: u8) -> EngineResult<Outcome> {
        let drawn = self.generator.resolve(round, outcome_range);
        warn!(round = round.sequence_number, "Closed round had no outcome; recording one now");

        let stored = self
            .store
            .update_round_if(round.id, &[RoundState::Closed], RoundPatch::RecordOutcome { outcome: drawn })
            .await?;

        // Another pass may have recorded first; the stored value wins
        Ok(stored.and_then(|r| r.outcome).unwrap_or(drawn))
    }

    async fn settle_wager(
        &self,
        round: &Round,
        outcome: &Outcome,
        wager: Wager,
        report: &mut SettlementReport,
    ) -> EngineResult<()> {
        let payout = Self::payout_for(&wager, outcome);
        let now = self.clock.now();
        let resolution = if payout > 0 {
            WagerResolution::won(payout, now)
        } else {
            WagerResolution::lost(now)
        };

        let Some(settled) = self
            .store
            .resolve_wager_if(wager.id, SettlementStatus::Pending, resolution)
            .await?
        else {
            debug!(wager_id = %wager.id, "Wager already settled by another pass");
            return Ok(());
        };

        if settled.settlement == SettlementStatus::Lost {
            self.metrics.record_wager_settled(0);
            report.record_loss();
            return Ok(());
        }

        match self.ledger.credit(&settled.account_id, payout, LedgerMemo::win(&settled)).await {
            Ok(_) | Err(LedgerError::DuplicateEntry { .. }) => {
                if self.reconciliation.remove(&settled.id).is_some() {
                    info!(wager_id = %settled.id, "Reconciliation item cleared by later settlement");
                }
                self.metrics.record_wager_settled(payout);
                report.record_win(payout);
            }
            Err(e) => {
                let item = self.flag_for_reconciliation(round, &settled, payout, e).await;
                report.reconciliation_failures.push(item);
            }
        }

        Ok(())
    }

    async fn flag_for_reconciliation(
        &self,
        round: &Round,
        wager: &Wager,
        payout: Amount,
        cause: LedgerError,
    ) -> ReconciliationItem {
        let mut item = ReconciliationItem {
            wager_id: wager.id,
            round_id: round.id,
            round_sequence: round.sequence_number,
            account_id: wager.account_id.clone(),
            payout,
            reason: cause.to_string(),
            reverted: false,
            detected_at: self.clock.now(),
        };

        // Queued before the revert: once the wager reads `Pending` again another
        // pass may credit it, and that pass must find the item to clear it
        self.reconciliation.insert(wager.id, item.clone());

        item.reverted = match self
            .store
            .resolve_wager_if(wager.id, SettlementStatus::Won, WagerResolution::reverted())
            .await
        {
            Ok(updated) => updated.is_some(),
            Err(e) => {
                error!(wager_id = %wager.id, error = %e, "Failed to revert uncredited win");
                false
            }
        };
        if let Some(mut queued) = self.reconciliation.get_mut(&wager.id) {
            queued.reverted = item.reverted;
        }

        error!(
            round = round.sequence_number,
            wager_id = %wager.id,
            account = %wager.account_id,
            payout,
            reverted = item.reverted,
            error = %item.to_error(),
            "Win credit failed; wager flagged for reconciliation"
        );

        self.metrics.record_reconciliation_failure();
        item
    }

    /// Outstanding items that still need manual follow-up
    pub fn reconciliation_queue(&self) -> Vec<ReconciliationItem> {
        let mut items: Vec<ReconciliationItem> =
            self.reconciliation.iter().map(|i| i.value().clone()).collect();
        items.sort_by_key(|i| i.detected_at);
        items
    }
}
