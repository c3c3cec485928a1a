pub mod types;
pub mod result;
pub mod settlement;
pub mod state_machine;
pub mod creation;
pub mod scheduler;

pub use types::*;
pub use result::{FixedOutcome, OutcomeSource, RandomOutcome, ResultGenerator};
pub use settlement::{ReconciliationItem, SettlementEngine, SettlementReport};
pub use state_machine::{ClosedRound, RoundStateMachine};
pub use creation::CreationGuard;
pub use scheduler::{ContinuousStatus, RoundScheduler, SchedulerBuilder, SchedulerHandle, TickReport};
