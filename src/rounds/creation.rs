//! Serialized creation of the next round
//!
//! At most one creation attempt runs at a time inside this process (an atomic
//! claim), and the store's uniqueness constraint on sequence numbers covers
//! everything the claim cannot see, such as a second process sharing the store.

use crate::config::RoundConfig;
use crate::errors::{EngineError, EngineResult, StoreError};
use crate::metrics::EngineMetrics;
use crate::rounds::types::Round;
use crate::store::Persistence;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub struct CreationGuard {
    store: Arc<dyn Persistence>,
    in_flight: AtomicBool,
    released: Notify,
    max_attempts: u32,
    backoff: Duration,
    metrics: Arc<EngineMetrics>,
}

/// Held for the duration of one creation attempt; releasing wakes `wait_idle`
struct CreationClaim<'a> {
    guard: &'a CreationGuard,
}

impl Drop for CreationClaim<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::SeqCst);
        self.guard.released.notify_waiters();
    }
}

impl CreationGuard {
    pub fn new(store: Arc<dyn Persistence>, max_attempts: u32, backoff: Duration, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            store,
            in_flight: AtomicBool::new(false),
            released: Notify::new(),
            max_attempts: max_attempts.max(1),
            backoff,
            metrics,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once no creation attempt is running
    pub async fn wait_idle(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.in_flight() {
                return;
            }
            released.await;
        }
    }

    fn claim(&self) -> Option<CreationClaim<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CreationClaim { guard: self })
    }

    /// Create the next round if none is active.
    ///
    /// `permit` is consulted before each insert; once it reports false no
    /// further round is created. Returns `Ok(None)` when another attempt holds
    /// the claim, a round is already active, or the permit was withdrawn.
    pub async fn try_create_next_round<F>(
        &self,
        now: DateTime<Utc>,
        config: &RoundConfig,
        permit: F,
    ) -> EngineResult<Option<Round>>
    where
        F: Fn() -> bool,
    {
        let Some(_claim) = self.claim() else {
            debug!("Round creation already in progress");
            return Ok(None);
        };

        if !permit() {
            return Ok(None);
        }
        if !self.store.active_rounds().await?.is_empty() {
            debug!("Active round exists; skipping creation");
            return Ok(None);
        }

        let mut candidate = self.store.max_sequence_number().await? + 1;

        for attempt in 1..=self.max_attempts {
            if !permit() {
                debug!("Creation permit withdrawn");
                return Ok(None);
            }

            let round = Round::pending(candidate, now, config.start_delay());
            match self.store.insert_round(&round).await {
                Ok(()) => {
                    info!(
                        round = round.sequence_number,
                        open_at = %round.open_at,
                        attempt,
                        "Round created"
                    );
                    self.metrics.record_round_created();
                    return Ok(Some(round));
                }
                Err(StoreError::SequenceConflict(taken)) => {
                    warn!(
                        sequence = taken,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Sequence number already taken; retrying"
                    );
                    self.metrics.record_creation_conflict();
                    let stored_max = self.store.max_sequence_number().await?;
                    candidate = taken.max(stored_max) + 1;

                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::CreationFailed {
            attempts: self.max_attempts,
            last_candidate: candidate,
        })
    }
}
