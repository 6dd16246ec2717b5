//! Cooperation counters
//!
//! Each cooperation instance keeps one `CooperationStats`; all counters are
//! relaxed atomics so recording never contends with the protocol itself.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CooperationStats {
    /// Callers that ran the call themselves
    pub leaders: AtomicU64,
    /// Callers that joined an in-flight execution
    pub followers: AtomicU64,
    /// Followers that received the leader's outcome
    pub shared_outcomes: AtomicU64,
    /// Executions whose call returned an error
    pub call_failures: AtomicU64,
    /// Followers that gave up at the major timeout
    pub timeouts: AtomicU64,
    /// Admissions denied by the limiter or the waiter ceiling
    pub capacity_rejections: AtomicU64,
    /// Leaders that were dropped or panicked before publishing
    pub cancellations: AtomicU64,
    /// Waits ended early by a check function
    pub check_hits: AtomicU64,
    /// Followers that took over after a vanished leader
    pub reelections: AtomicU64,
}

impl CooperationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_leader(&self) {
        self.leaders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_follower(&self) {
        self.followers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_outcome(&self) {
        self.shared_outcomes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_failure(&self) {
        self.call_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check_hit(&self) {
        self.check_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reelection(&self) {
        self.reelections.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters
    pub fn snapshot(&self) -> CooperationStatsSnapshot {
        CooperationStatsSnapshot {
            leaders: self.leaders.load(Ordering::Relaxed),
            followers: self.followers.load(Ordering::Relaxed),
            shared_outcomes: self.shared_outcomes.load(Ordering::Relaxed),
            call_failures: self.call_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            check_hits: self.check_hits.load(Ordering::Relaxed),
            reelections: self.reelections.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.leaders,
            &self.followers,
            &self.shared_outcomes,
            &self.call_failures,
            &self.timeouts,
            &self.capacity_rejections,
            &self.cancellations,
            &self.check_hits,
            &self.reelections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of the counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooperationStatsSnapshot {
    pub leaders: u64,
    pub followers: u64,
    pub shared_outcomes: u64,
    pub call_failures: u64,
    pub timeouts: u64,
    pub capacity_rejections: u64,
    pub cancellations: u64,
    pub check_hits: u64,
    pub reelections: u64,
}

impl CooperationStatsSnapshot {
    /// Fraction of callers served without running the call (0.0 to 1.0)
    pub fn share_ratio(&self) -> f64 {
        let callers = self.leaders + self.followers;
        if callers == 0 {
            0.0
        } else {
            self.shared_outcomes as f64 / callers as f64
        }
    }
}
