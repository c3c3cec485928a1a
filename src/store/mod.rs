//! Persistence contracts
//!
//! The engine never assumes a particular database. It needs two things from
//! storage: compare-and-set updates (a write that only lands when the stored
//! value still matches what the caller saw) and uniqueness rejection on round
//! sequence numbers and on `(account, round)` wager pairs.

pub mod memory;

use crate::errors::StoreResult;
use crate::rounds::types::{
    Amount, CloseReason, Outcome, Round, RoundState, SettlementStatus, Wager,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;

/// A state-guarded change to a stored round
#[derive(Debug, Clone, PartialEq)]
pub enum RoundPatch {
    Open {
        opened_at: DateTime<Utc>,
        duration_secs: u64,
        closes_at: DateTime<Utc>,
    },
    /// State, close time and outcome land together
    Close {
        closed_at: DateTime<Utc>,
        closed_by: CloseReason,
        outcome: Outcome,
    },
    Override {
        value: u8,
    },
    /// Fills the outcome of a closed round only if it is still unset
    RecordOutcome {
        outcome: Outcome,
    },
}

impl RoundPatch {
    pub fn apply(&self, round: &mut Round) {
        match self {
            RoundPatch::Open {
                opened_at,
                duration_secs,
                closes_at,
            } => {
                round.state = RoundState::Open;
                round.opened_at = Some(*opened_at);
                round.duration_secs = Some(*duration_secs);
                round.closes_at = Some(*closes_at);
            }
            RoundPatch::Close {
                closed_at,
                closed_by,
                outcome,
            } => {
                round.state = RoundState::Closed;
                round.closed_at = Some(*closed_at);
                round.closed_by = Some(*closed_by);
                round.outcome = Some(*outcome);
            }
            RoundPatch::Override { value } => {
                round.outcome_override = Some(*value);
            }
            RoundPatch::RecordOutcome { outcome } => {
                if round.outcome.is_none() {
                    round.outcome = Some(*outcome);
                }
            }
        }
    }
}

/// Terminal (or reverted) settlement values written to a wager in one update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WagerResolution {
    pub settlement: SettlementStatus,
    pub payout: Amount,
    pub settled_at: Option<DateTime<Utc>>,
}

impl WagerResolution {
    pub fn won(payout: Amount, at: DateTime<Utc>) -> Self {
        Self { settlement: SettlementStatus::Won, payout, settled_at: Some(at) }
    }

    pub fn lost(at: DateTime<Utc>) -> Self {
        Self { settlement: SettlementStatus::Lost, payout: 0, settled_at: Some(at) }
    }

    /// Undo a win whose credit never landed
    pub fn reverted() -> Self {
        Self { settlement: SettlementStatus::Pending, payout: 0, settled_at: None }
    }
}

#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Persist a new round. Fails with `SequenceConflict` if the number is taken.
    async fn insert_round(&self, round: &Round) -> StoreResult<()>;

    async fn get_round(&self, id: Uuid) -> StoreResult<Option<Round>>;

    /// Rounds in `Pending` or `Open`, lowest sequence number first
    async fn active_rounds(&self) -> StoreResult<Vec<Round>>;

    /// Highest sequence number ever stored, 0 when empty
    async fn max_sequence_number(&self) -> StoreResult<u64>;

    /// Apply `patch` only if the round is currently in one of `expected`.
    /// Returns the updated round, or `None` when the state did not match.
    async fn update_round_if(
        &self,
        id: Uuid,
        expected: &[RoundState],
        patch: RoundPatch,
    ) -> StoreResult<Option<Round>>;
}

#[async_trait]
pub trait WagerStore: Send + Sync {
    /// Persist a new wager. Fails with `DuplicateWager` if the account already
    /// has one on that round.
    async fn insert_wager(&self, wager: &Wager) -> StoreResult<()>;

    async fn get_wager(&self, id: Uuid) -> StoreResult<Option<Wager>>;

    async fn find_wager(&self, round_id: Uuid, account_id: &str) -> StoreResult<Option<Wager>>;

    /// Wagers on a round, optionally filtered by settlement status
    async fn wagers_for_round(
        &self,
        round_id: Uuid,
        status: Option<SettlementStatus>,
    ) -> StoreResult<Vec<Wager>>;

    /// Write `resolution` only if the wager's settlement is still `expected`.
    /// Returns the updated wager, or `None` when another pass got there first.
    async fn resolve_wager_if(
        &self,
        id: Uuid,
        expected: SettlementStatus,
        resolution: WagerResolution,
    ) -> StoreResult<Option<Wager>>;
}

/// Everything the engine needs from storage
pub trait Persistence: RoundStore + WagerStore {}

impl<T: RoundStore + WagerStore> Persistence for T {}
