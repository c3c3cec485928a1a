//! Round state transitions
//!
//! `Pending -> Open -> Closed`, forward only. Every transition is a
//! compare-and-set against the state the caller observed, so concurrent
//! drivers (the background ticker, a request-path tick, an admin force-close)
//! can race freely: exactly one of them lands each transition and the rest
//! see a no-op.

use crate::config::RoundConfig;
use crate::errors::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;
use crate::rounds::result::ResultGenerator;
use crate::rounds::settlement::{SettlementEngine, SettlementReport};
use crate::rounds::types::{CloseReason, Round, RoundState};
use crate::store::{Persistence, RoundPatch};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// A round this caller closed, together with its settlement pass
#[derive(Debug, Clone)]
pub struct ClosedRound {
    pub round: Round,
    pub report: SettlementReport,
}

pub struct RoundStateMachine {
    store: Arc<dyn Persistence>,
    generator: ResultGenerator,
    settlement: Arc<SettlementEngine>,
    metrics: Arc<EngineMetrics>,
}

impl RoundStateMachine {
    pub fn new(
        store: Arc<dyn Persistence>,
        generator: ResultGenerator,
        settlement: Arc<SettlementEngine>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            generator,
            settlement,
            metrics,
        }
    }

    /// Open a pending round whose start time has arrived. Returns the round as
    /// it now stands, whether or not this caller did the opening.
    pub async fn maybe_open(&self, round: Round, now: DateTime<Utc>, config: &RoundConfig) -> EngineResult<Round> {
        if round.state != RoundState::Pending || now < round.open_at {
            return Ok(round);
        }

        let patch = RoundPatch::Open {
            opened_at: now,
            duration_secs: config.duration_secs,
            closes_at: round.open_at + Duration::seconds(config.duration_secs as i64),
        };

        match self.store.update_round_if(round.id, &[RoundState::Pending], patch).await? {
            Some(opened) => {
                info!(
                    round = opened.sequence_number,
                    duration_secs = config.duration_secs,
                    "Round opened for betting"
                );
                Ok(opened)
            }
            None => {
                debug!(round = round.sequence_number, "Round opened concurrently");
                self.reload(round).await
            }
        }
    }

    /// Close an open round whose deadline has passed and settle it.
    /// `None` when there was nothing to close or another caller closed it first.
    pub async fn maybe_close(
        &self,
        round: &Round,
        now: DateTime<Utc>,
        config: &RoundConfig,
    ) -> EngineResult<Option<ClosedRound>> {
        if round.state != RoundState::Open || now < round.deadline(config.duration_secs) {
            return Ok(None);
        }
        self.close(round, now, &[RoundState::Open], CloseReason::Deadline, config.outcome_range)
            .await
    }

    /// Administrative close of a pending or open round, stamped with `now`
    pub async fn force_close(
        &self,
        round: &Round,
        now: DateTime<Utc>,
        config: &RoundConfig,
    ) -> EngineResult<ClosedRound> {
        let rejected = |state| EngineError::InvalidState {
            round: round.sequence_number,
            state,
            action: "be force-closed",
        };
        if !round.is_active() {
            return Err(rejected(round.state));
        }

        match self
            .close(
                round,
                now,
                &[RoundState::Pending, RoundState::Open],
                CloseReason::Forced,
                config.outcome_range,
            )
            .await?
        {
            Some(closed) => Ok(closed),
            None => Err(rejected(RoundState::Closed)),
        }
    }

    /// Pin the outcome of a round that has not closed yet
    pub async fn apply_override(&self, round: &Round, value: u8, range: u8) -> EngineResult<Round> {
        if !round.is_active() {
            return Err(EngineError::InvalidState {
                round: round.sequence_number,
                state: round.state,
                action: "take an outcome override",
            });
        }
        if value >= range {
            return Err(EngineError::InvalidOverride { value, range });
        }

        match self
            .store
            .update_round_if(
                round.id,
                &[RoundState::Pending, RoundState::Open],
                RoundPatch::Override { value },
            )
            .await?
        {
            Some(updated) => {
                info!(round = updated.sequence_number, value, "Outcome override set");
                Ok(updated)
            }
            None => {
                let current = self.reload(round.clone()).await?;
                Err(EngineError::InvalidState {
                    round: current.sequence_number,
                    state: current.state,
                    action: "take an outcome override",
                })
            }
        }
    }

    /// Resolve the outcome, then land state, close time and outcome in one
    /// guarded write. Only the writer that wins settles.
    async fn close(
        &self,
        round: &Round,
        now: DateTime<Utc>,
        expected: &[RoundState],
        reason: CloseReason,
        outcome_range: u8,
    ) -> EngineResult<Option<ClosedRound>> {
        let outcome = self.generator.resolve(round, outcome_range);
        let patch = RoundPatch::Close {
            closed_at: now,
            closed_by: reason,
            outcome,
        };

        let Some(closed) = self.store.update_round_if(round.id, expected, patch).await? else {
            debug!(round = round.sequence_number, "Round closed concurrently");
            return Ok(None);
        };

        info!(
            round = closed.sequence_number,
            reason = ?reason,
            outcome = outcome.value,
            parity = %outcome.parity,
            magnitude = %outcome.magnitude,
            "Round closed"
        );
        self.metrics.record_round_closed();

        let report = self.settlement.settle(&closed, outcome_range).await?;
        Ok(Some(ClosedRound { round: closed, report }))
    }

    async fn reload(&self, round: Round) -> EngineResult<Round> {
        self.store
            .get_round(round.id)
            .await?
            .ok_or(EngineError::RoundNotFound(round.id))
    }
}
