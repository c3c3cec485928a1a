//! Ledger collaborator contract
//!
//! Balances live outside the engine. The engine debits stakes through
//! `debit_and_validate` and pays wins through `credit`; every call carries a
//! memo naming the wager and round it belongs to.

pub mod memory;

use crate::errors::LedgerResult;
use crate::rounds::types::{Amount, LedgerEntry, LedgerMemo};
use async_trait::async_trait;

pub use memory::MemoryLedger;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Add `amount` to the account. Implementations should reject a second
    /// movement with the same wager and reason with `DuplicateEntry`.
    async fn credit(&self, account_id: &str, amount: Amount, memo: LedgerMemo) -> LedgerResult<LedgerEntry>;

    /// Remove `amount` from the account, failing with `InsufficientFunds` when the
    /// balance does not cover it.
    async fn debit_and_validate(
        &self,
        account_id: &str,
        amount: Amount,
        memo: LedgerMemo,
    ) -> LedgerResult<LedgerEntry>;
}
