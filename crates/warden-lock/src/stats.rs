//! Lock statistics
//!
//! Every event is counted twice: in a process-local collector that backs
//! `LockManager::stats()`, and through the `metrics` facade for whatever
//! recorder the host process installed.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use serde::{Deserialize, Serialize};

const ACQUISITIONS: &str = "warden_lock_acquisitions_total";
const CONTENDED: &str = "warden_lock_contended_total";
const TIMEOUTS: &str = "warden_lock_timeouts_total";
const RELEASES: &str = "warden_lock_releases_total";
const NOT_OWNER: &str = "warden_lock_not_owner_total";
const RENEWALS: &str = "warden_lock_renewals_total";
const LOST: &str = "warden_lock_lost_total";
const HOLD_SECONDS: &str = "warden_lock_hold_duration_seconds";

/// Register metric descriptions. Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(ACQUISITIONS, "Locks successfully acquired");
    describe_counter!(
        CONTENDED,
        "Acquisition attempts that found the lock already held"
    );
    describe_counter!(TIMEOUTS, "Acquisitions abandoned after the wait budget");
    describe_counter!(RELEASES, "Locks released by their owner");
    describe_counter!(
        NOT_OWNER,
        "Releases that found the record expired or reassigned"
    );
    describe_counter!(RENEWALS, "Successful watchdog expiry extensions");
    describe_counter!(LOST, "Held locks lost before their owner finished");
    describe_histogram!(HOLD_SECONDS, "Time between acquisition and release");
}

/// Snapshot of lock activity for one manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub acquisitions: u64,
    /// Attempts that found the lock held (each retry counts)
    pub contended_attempts: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub not_owner_releases: u64,
    pub renewals: u64,
    pub lost_locks: u64,
    /// Average hold time of released locks in milliseconds
    pub avg_hold_time_ms: u64,
}

impl LockStats {
    /// Fold another manager's snapshot into this one.
    pub fn merge(&mut self, other: &LockStats) {
        let releases = self.releases + other.releases;
        if releases > 0 {
            self.avg_hold_time_ms = (self.avg_hold_time_ms * self.releases
                + other.avg_hold_time_ms * other.releases)
                / releases;
        }
        self.acquisitions += other.acquisitions;
        self.contended_attempts += other.contended_attempts;
        self.timeouts += other.timeouts;
        self.releases = releases;
        self.not_owner_releases += other.not_owner_releases;
        self.renewals += other.renewals;
        self.lost_locks += other.lost_locks;
    }
}

#[derive(Debug, Default)]
pub(crate) struct LockStatsCollector {
    acquisitions: AtomicU64,
    contended_attempts: AtomicU64,
    timeouts: AtomicU64,
    releases: AtomicU64,
    not_owner_releases: AtomicU64,
    renewals: AtomicU64,
    lost_locks: AtomicU64,
    total_hold_time_ms: AtomicU64,
}

impl LockStatsCollector {
    pub(crate) fn record_acquired(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        counter!(ACQUISITIONS).increment(1);
    }

    pub(crate) fn record_contended(&self) {
        self.contended_attempts.fetch_add(1, Ordering::Relaxed);
        counter!(CONTENDED).increment(1);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        counter!(TIMEOUTS).increment(1);
    }

    pub(crate) fn record_released(&self, held_for: std::time::Duration) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.total_hold_time_ms
            .fetch_add(held_for.as_millis() as u64, Ordering::Relaxed);
        counter!(RELEASES).increment(1);
        histogram!(HOLD_SECONDS).record(held_for.as_secs_f64());
    }

    pub(crate) fn record_not_owner(&self) {
        self.not_owner_releases.fetch_add(1, Ordering::Relaxed);
        counter!(NOT_OWNER).increment(1);
    }

    pub(crate) fn record_renewal(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        counter!(RENEWALS).increment(1);
    }

    pub(crate) fn record_lost(&self) {
        self.lost_locks.fetch_add(1, Ordering::Relaxed);
        counter!(LOST).increment(1);
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        let releases = self.releases.load(Ordering::Relaxed);
        let total_hold = self.total_hold_time_ms.load(Ordering::Relaxed);
        let avg_hold_time_ms = if releases > 0 {
            total_hold / releases
        } else {
            0
        };

        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended_attempts: self.contended_attempts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            releases,
            not_owner_releases: self.not_owner_releases.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            lost_locks: self.lost_locks.load(Ordering::Relaxed),
            avg_hold_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_snapshot_averages_hold_time() {
        let stats = LockStatsCollector::default();
        stats.record_acquired();
        stats.record_acquired();
        stats.record_released(Duration::from_millis(100));
        stats.record_released(Duration::from_millis(300));
        stats.record_contended();
        stats.record_not_owner();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.acquisitions, 2);
        assert_eq!(snapshot.releases, 2);
        assert_eq!(snapshot.avg_hold_time_ms, 200);
        assert_eq!(snapshot.contended_attempts, 1);
        assert_eq!(snapshot.not_owner_releases, 1);
        assert_eq!(snapshot.lost_locks, 0);
    }

    #[test]
    fn test_merge_weights_hold_time_by_releases() {
        let mut total = LockStats {
            acquisitions: 1,
            releases: 1,
            avg_hold_time_ms: 100,
            ..Default::default()
        };
        total.merge(&LockStats {
            acquisitions: 3,
            releases: 3,
            contended_attempts: 5,
            avg_hold_time_ms: 300,
            ..Default::default()
        });

        assert_eq!(total.acquisitions, 4);
        assert_eq!(total.releases, 4);
        assert_eq!(total.contended_attempts, 5);
        assert_eq!(total.avg_hold_time_ms, 250);

        total.merge(&LockStats::default());
        assert_eq!(total.avg_hold_time_ms, 250);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = LockStatsCollector::default().snapshot();
        assert_eq!(snapshot, LockStats::default());
    }
}
