//! Error types for the round engine
//!
//! One root error with a sub-error per collaborator. Transition checks that find
//! nothing to do return success; only constraint violations and exhausted retries
//! become errors.

use crate::rounds::types::RoundState;
use uuid::Uuid;

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Round {0} not found")]
    RoundNotFound(Uuid),

    /// Operation not permitted in the round's current state
    #[error("Round {round} cannot {action} (state: {state})")]
    InvalidState {
        round: u64,
        state: RoundState,
        action: &'static str,
    },

    #[error("Account {account} already has a wager on round {round}")]
    DuplicateWager { account: String, round: u64 },

    #[error("Insufficient funds for {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u64,
        available: u64,
    },

    #[error("Invalid wager: {0}")]
    InvalidWager(String),

    #[error("Override value {value} is outside the outcome range 0..{range}")]
    InvalidOverride { value: u8, range: u8 },

    /// Sequence conflicts kept recurring until the attempt budget ran out
    #[error("Round creation failed after {attempts} attempts (last candidate sequence {last_candidate})")]
    CreationFailed { attempts: u32, last_candidate: u64 },

    /// A won wager whose credit could not be applied; needs manual follow-up
    #[error("Wager {wager_id} on round {round} needs reconciliation: {reason}")]
    SettlementReconciliation {
        wager_id: Uuid,
        round: u64,
        reason: String,
    },

    #[error("Scheduler task failed: {0}")]
    Scheduler(String),
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Persistence errors. Compare-and-set mismatches are not errors; stores report
/// them as `None`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Another writer already holds this sequence number
    #[error("Sequence number {0} already taken")]
    SequenceConflict(u64),

    #[error("Wager already exists for account {account_id} on round {round_id}")]
    DuplicateWager { round_id: Uuid, account_id: String },

    #[error("Round {0} not found")]
    RoundNotFound(Uuid),

    #[error("Wager {0} not found")]
    WagerNotFound(Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Errors raised by the ledger collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u64,
        available: u64,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    /// The movement for this wager and reason was already applied
    #[error("Duplicate {reason} entry for wager {wager_id}")]
    DuplicateEntry { wager_id: Uuid, reason: String },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoundNotFound(id) => EngineError::RoundNotFound(id),
            other => EngineError::Storage(other),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                account,
                requested,
                available,
            } => EngineError::InsufficientFunds {
                account,
                requested,
                available,
            },
            other => EngineError::Ledger(other),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Scheduler(e.to_string())
    }
}

// Convenience type aliases for Results
pub type EngineResult<T> = Result<T, EngineError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
