use crate::models::patch::Savings;
use crate::stores::snapshot_store::SnapshotStore;
use crate::utils::time::current_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub total_polls: AtomicU64,
    pub successful_polls: AtomicU64,
    pub failed_polls: AtomicU64,
    pub patches_emitted: AtomicU64,
    /// Serialized bytes of full snapshots that changed
    pub full_bytes: AtomicU64,
    /// Serialized bytes of the patch lists standing in for them
    pub patch_bytes: AtomicU64,
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub success_rate: f64,
    pub patches_emitted: u64,
    pub full_bytes: u64,
    pub patch_bytes: u64,
    pub bytes_saved: u64,
    pub tracked_servers: usize,
    pub uptime_seconds: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_polls: AtomicU64::new(0),
            successful_polls: AtomicU64::new(0),
            failed_polls: AtomicU64::new(0),
            patches_emitted: AtomicU64::new(0),
            full_bytes: AtomicU64::new(0),
            patch_bytes: AtomicU64::new(0),
            start_time: current_timestamp(),
        }
    }

    pub fn record_success(&self, patch_count: usize, savings: Option<&Savings>) {
        self.total_polls.fetch_add(1, Ordering::Relaxed);
        self.successful_polls.fetch_add(1, Ordering::Relaxed);
        self.patches_emitted.fetch_add(patch_count as u64, Ordering::Relaxed);
        if let Some(savings) = savings {
            self.full_bytes.fetch_add(savings.full_size as u64, Ordering::Relaxed);
            self.patch_bytes.fetch_add(savings.patch_size as u64, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.total_polls.fetch_add(1, Ordering::Relaxed);
        self.failed_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self, snapshots: &SnapshotStore) -> MetricsSnapshot {
        let total_polls = self.total_polls.load(Ordering::Relaxed);
        let successful_polls = self.successful_polls.load(Ordering::Relaxed);
        let full_bytes = self.full_bytes.load(Ordering::Relaxed);
        let patch_bytes = self.patch_bytes.load(Ordering::Relaxed);

        let success_rate = if total_polls > 0 {
            (successful_polls as f64 / total_polls as f64) * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            total_polls,
            successful_polls,
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            success_rate,
            patches_emitted: self.patches_emitted.load(Ordering::Relaxed),
            full_bytes,
            patch_bytes,
            bytes_saved: full_bytes.saturating_sub(patch_bytes),
            tracked_servers: snapshots.len(),
            uptime_seconds: current_timestamp() - self.start_time,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().get_snapshot(&SnapshotStore::new());
        assert_eq!(snapshot.total_polls, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.bytes_saved, 0);
        assert!(snapshot.uptime_seconds >= 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        let savings = Savings {
            full_size: 1000,
            patch_size: 100,
            saved_percent: 90.0,
        };
        metrics.record_success(3, Some(&savings));
        metrics.record_success(0, None);
        metrics.record_failure();
        metrics.record_success(1, Some(&savings));

        let snapshot = metrics.get_snapshot(&SnapshotStore::new());
        assert_eq!(snapshot.total_polls, 4);
        assert_eq!(snapshot.failed_polls, 1);
        assert_eq!(snapshot.success_rate, 75.0);
        assert_eq!(snapshot.patches_emitted, 4);
        assert_eq!(snapshot.full_bytes, 2000);
        assert_eq!(snapshot.bytes_saved, 1800);
    }
}
