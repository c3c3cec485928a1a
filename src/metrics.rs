//! Engine counters for observability

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct EngineMetrics {
    start_time: Instant,
    rounds_created: AtomicU64,
    rounds_closed: AtomicU64,
    creation_conflicts: AtomicU64,
    wagers_placed: AtomicU64,
    wagers_settled: AtomicU64,
    total_staked: AtomicU64,
    total_paid_out: AtomicU64,
    reconciliation_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub rounds_created: u64,
    pub rounds_closed: u64,
    pub creation_conflicts: u64,
    pub wagers_placed: u64,
    pub wagers_settled: u64,
    pub total_staked: u64,
    pub total_paid_out: u64,
    pub reconciliation_failures: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_created: AtomicU64::new(0),
            rounds_closed: AtomicU64::new(0),
            creation_conflicts: AtomicU64::new(0),
            wagers_placed: AtomicU64::new(0),
            wagers_settled: AtomicU64::new(0),
            total_staked: AtomicU64::new(0),
            total_paid_out: AtomicU64::new(0),
            reconciliation_failures: AtomicU64::new(0),
        }
    }

    pub fn record_round_created(&self) {
        self.rounds_created.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_round_closed(&self) {
        self.rounds_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_creation_conflict(&self) {
        self.creation_conflicts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_wager_placed(&self, stake: u64) {
        self.wagers_placed.fetch_add(1, Ordering::SeqCst);
        self.total_staked.fetch_add(stake, Ordering::SeqCst);
    }

    pub fn record_wager_settled(&self, payout: u64) {
        self.wagers_settled.fetch_add(1, Ordering::SeqCst);
        self.total_paid_out.fetch_add(payout, Ordering::SeqCst);
    }

    pub fn record_reconciliation_failure(&self) {
        self.reconciliation_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            rounds_created: self.rounds_created.load(Ordering::SeqCst),
            rounds_closed: self.rounds_closed.load(Ordering::SeqCst),
            creation_conflicts: self.creation_conflicts.load(Ordering::SeqCst),
            wagers_placed: self.wagers_placed.load(Ordering::SeqCst),
            wagers_settled: self.wagers_settled.load(Ordering::SeqCst),
            total_staked: self.total_staked.load(Ordering::SeqCst),
            total_paid_out: self.total_paid_out.load(Ordering::SeqCst),
            reconciliation_failures: self.reconciliation_failures.load(Ordering::SeqCst),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
