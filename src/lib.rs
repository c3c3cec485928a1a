//! Round Engine - timed betting rounds with exactly-once settlement
//!
//! Runs a repeating lifecycle of rounds (`Pending -> Open -> Closed`), keeps at
//! most one round active at a time, resolves each closed round's outcome and
//! pays out every wager placed on it exactly once.
//!
//! Storage and the account ledger are collaborators behind async traits
//! ([`store::Persistence`], [`ledger::Ledger`]); in-memory implementations are
//! provided for the daemon and for tests.

pub mod clock;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod rounds;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, EngineConfig, RoundConfig, SchedulerConfig};
pub use errors::{EngineError, EngineResult};
pub use ledger::{Ledger, MemoryLedger};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use rounds::{
    Outcome, Round, RoundScheduler, RoundState, SchedulerBuilder, SchedulerHandle, Selection,
    SettlementReport, SettlementStatus, Wager, WagerCategory,
};
pub use store::{MemoryStore, Persistence};
