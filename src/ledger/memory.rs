//! In-memory ledger used by the service binary and tests

use super::Ledger;
use crate::errors::{LedgerError, LedgerResult};
use crate::rounds::types::{Amount, LedgerEntry, LedgerMemo, LedgerReason};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryLedger {
    balances: DashMap<String, Amount>,
    entries: DashMap<Uuid, LedgerEntry>,
    // Idempotency index: one movement per (wager, reason)
    applied: DashMap<(Uuid, LedgerReason), Uuid>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an account outside of any wager
    pub fn deposit(&self, account_id: &str, amount: Amount) {
        *self.balances.entry(account_id.to_string()).or_insert(0) += amount;
    }

    pub fn balance(&self, account_id: &str) -> Amount {
        self.balances.get(account_id).map(|b| *b.value()).unwrap_or(0)
    }

    pub fn entries_for_wager(&self, wager_id: Uuid) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.wager_id == wager_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.recorded_at);
        entries
    }

    fn record(&self, account_id: &str, amount: i64, memo: LedgerMemo, entry_id: Uuid) -> LedgerEntry {
        let entry = LedgerEntry {
            id: entry_id,
            account_id: account_id.to_string(),
            amount,
            reason: memo.reason,
            round_id: memo.round_id,
            wager_id: memo.wager_id,
            recorded_at: Utc::now(),
        };
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    fn signed(amount: Amount) -> LedgerResult<i64> {
        i64::try_from(amount).map_err(|_| LedgerError::InvalidAmount(amount))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn credit(&self, account_id: &str, amount: Amount, memo: LedgerMemo) -> LedgerResult<LedgerEntry> {
        let signed = Self::signed(amount)?;
        let entry_id = Uuid::new_v4();

        match self.applied.entry((memo.wager_id, memo.reason)) {
            Entry::Occupied(_) => {
                return Err(LedgerError::DuplicateEntry {
                    wager_id: memo.wager_id,
                    reason: memo.reason.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                *self.balances.entry(account_id.to_string()).or_insert(0) += amount;
                slot.insert(entry_id);
            }
        }

        Ok(self.record(account_id, signed, memo, entry_id))
    }

    async fn debit_and_validate(
        &self,
        account_id: &str,
        amount: Amount,
        memo: LedgerMemo,
    ) -> LedgerResult<LedgerEntry> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let signed = Self::signed(amount)?;
        let entry_id = Uuid::new_v4();

        match self.applied.entry((memo.wager_id, memo.reason)) {
            Entry::Occupied(_) => {
                return Err(LedgerError::DuplicateEntry {
                    wager_id: memo.wager_id,
                    reason: memo.reason.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                let mut balance = self
                    .balances
                    .get_mut(account_id)
                    .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
                if *balance < amount {
                    return Err(LedgerError::InsufficientFunds {
                        account: account_id.to_string(),
                        requested: amount,
                        available: *balance,
                    });
                }
                *balance -= amount;
                slot.insert(entry_id);
            }
        }

        Ok(self.record(account_id, -signed, memo, entry_id))
    }
}
