//! In-memory persistence backed by concurrent maps
//!
//! Each compare-and-set runs under the map shard lock of the record it
//! touches, which makes the state check and the write one atomic step.

use super::{RoundPatch, RoundStore, WagerResolution, WagerStore};
use crate::errors::{StoreError, StoreResult};
use crate::rounds::types::{Round, RoundState, SettlementStatus, Wager};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    rounds: DashMap<Uuid, Round>,
    // Uniqueness index: sequence number -> round id
    sequences: DashMap<u64, Uuid>,
    wagers: DashMap<Uuid, Wager>,
    // Uniqueness index: (round id, account) -> wager id
    wager_keys: DashMap<(Uuid, String), Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn wager_count(&self) -> usize {
        self.wagers.len()
    }

    /// Every stored round ordered by sequence number
    pub fn all_rounds(&self) -> Vec<Round> {
        let mut rounds: Vec<Round> = self.rounds.iter().map(|r| r.value().clone()).collect();
        rounds.sort_by_key(|r| r.sequence_number);
        rounds
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn insert_round(&self, round: &Round) -> StoreResult<()> {
        match self.sequences.entry(round.sequence_number) {
            Entry::Occupied(_) => Err(StoreError::SequenceConflict(round.sequence_number)),
            Entry::Vacant(slot) => {
                // Publish the round before releasing the index shard so readers
                // that see the sequence number can also see the round
                self.rounds.insert(round.id, round.clone());
                slot.insert(round.id);
                trace!(round = round.sequence_number, "Round stored");
                Ok(())
            }
        }
    }

    async fn get_round(&self, id: Uuid) -> StoreResult<Option<Round>> {
        Ok(self.rounds.get(&id).map(|r| r.value().clone()))
    }

    async fn active_rounds(&self) -> StoreResult<Vec<Round>> {
        let mut active: Vec<Round> = self
            .rounds
            .iter()
            .filter(|r| r.value().is_active())
            .map(|r| r.value().clone())
            .collect();
        active.sort_by_key(|r| r.sequence_number);
        Ok(active)
    }

    async fn max_sequence_number(&self) -> StoreResult<u64> {
        Ok(self.sequences.iter().map(|s| *s.key()).max().unwrap_or(0))
    }

    async fn update_round_if(
        &self,
        id: Uuid,
        expected: &[RoundState],
        patch: RoundPatch,
    ) -> StoreResult<Option<Round>> {
        let mut round = self.rounds.get_mut(&id).ok_or(StoreError::RoundNotFound(id))?;
        if !expected.contains(&round.state) {
            return Ok(None);
        }
        patch.apply(round.value_mut());
        Ok(Some(round.value().clone()))
    }
}

#[async_trait]
impl WagerStore for MemoryStore {
    async fn insert_wager(&self, wager: &Wager) -> StoreResult<()> {
        let key = (wager.round_id, wager.account_id.clone());
        match self.wager_keys.entry(key) {
            Entry::Occupied(_) => Err(StoreError::DuplicateWager {
                round_id: wager.round_id,
                account_id: wager.account_id.clone(),
            }),
            Entry::Vacant(slot) => {
                self.wagers.insert(wager.id, wager.clone());
                slot.insert(wager.id);
                Ok(())
            }
        }
    }

    async fn get_wager(&self, id: Uuid) -> StoreResult<Option<Wager>> {
        Ok(self.wagers.get(&id).map(|w| w.value().clone()))
    }

    async fn find_wager(&self, round_id: Uuid, account_id: &str) -> StoreResult<Option<Wager>> {
        let Some(wager_id) = self
            .wager_keys
            .get(&(round_id, account_id.to_string()))
            .map(|id| *id.value())
        else {
            return Ok(None);
        };
        self.get_wager(wager_id).await
    }

    async fn wagers_for_round(
        &self,
        round_id: Uuid,
        status: Option<SettlementStatus>,
    ) -> StoreResult<Vec<Wager>> {
        let mut wagers: Vec<Wager> = self
            .wagers
            .iter()
            .filter(|w| w.round_id == round_id)
            .filter(|w| status.map_or(true, |s| w.settlement == s))
            .map(|w| w.value().clone())
            .collect();
        wagers.sort_by_key(|w| w.placed_at);
        Ok(wagers)
    }

    async fn resolve_wager_if(
        &self,
        id: Uuid,
        expected: SettlementStatus,
        resolution: WagerResolution,
    ) -> StoreResult<Option<Wager>> {
        let mut wager = self.wagers.get_mut(&id).ok_or(StoreError::WagerNotFound(id))?;
        if wager.settlement != expected {
            return Ok(None);
        }
        wager.settlement = resolution.settlement;
        wager.payout = resolution.payout;
        wager.settled_at = resolution.settled_at;
        Ok(Some(wager.value().clone()))
    }
}
