use crate::rounds::types::{Outcome, Round};
use rand::Rng;
use std::sync::Arc;

/// Source of raw outcome values
pub trait OutcomeSource: Send + Sync {
    /// Draw a value in `0..range`
    fn draw(&self, range: u8) -> u8;
}

/// Uniform draw from the thread-local CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOutcome;

impl OutcomeSource for RandomOutcome {
    fn draw(&self, range: u8) -> u8 {
        rand::thread_rng().gen_range(0..range)
    }
}

/// Always draws the same value (clamped into range). For replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedOutcome(pub u8);

impl OutcomeSource for FixedOutcome {
    fn draw(&self, range: u8) -> u8 {
        self.0 % range
    }
}

/// Produces a round's outcome, honoring any administrative override
#[derive(Clone)]
pub struct ResultGenerator {
    source: Arc<dyn OutcomeSource>,
}

impl ResultGenerator {
    pub fn new(source: Arc<dyn OutcomeSource>) -> Self {
        Self { source }
    }

    pub fn random() -> Self {
        Self::new(Arc::new(RandomOutcome))
    }

    /// Resolve the outcome for `round`. An override bypasses the random source
    /// entirely; classification is a pure function of the value either way.
    pub fn resolve(&self, round: &Round, range: u8) -> Outcome {
        let value = match round.outcome_override {
            Some(fixed) => fixed,
            None => self.source.draw(range),
        };
        Outcome::from_value(value, range)
    }
}
