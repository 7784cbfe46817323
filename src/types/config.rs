//! Configuration for the sync engine and its workers
//!
//! Controls batch sizes, worker cadence, retry and retention policy, and
//! the drift threshold used during reconciliation.

use std::time::Duration;

/// Tunable knobs for the sync, reconcile, and cleanup workers
///
/// All intervals are wall-clock; `Default` matches production settings.
/// `max_retries`, `drift_threshold`, and `stats_interval_seconds` accept
/// zero (fail-fast, any-difference-is-drift, and stats-disabled
/// respectively); the remaining knobs treat zero as invalid because a
/// zero batch or interval stalls the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Maximum events claimed per sync pass
    pub batch_size: usize,
    /// Seconds between sync passes
    pub poll_interval_seconds: u64,
    /// Minutes between reconcile passes
    pub reconcile_interval_minutes: u64,
    /// Maximum users examined per reconcile pass
    pub reconcile_batch_size: usize,
    /// Hours between cleanup passes
    pub cleanup_interval_hours: u64,
    /// Completed events older than this many days are deleted
    pub retention_days: u32,
    /// Failures after which an event is no longer requeued
    pub max_retries: u32,
    /// Absolute XP/balance difference that counts as drift
    pub drift_threshold: i64,
    /// Seconds a claim may be held before the event is considered stale
    pub stale_claim_seconds: u64,
    /// Seconds between stats log lines; zero disables the stats task
    pub stats_interval_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_seconds: 5,
            reconcile_interval_minutes: 15,
            reconcile_batch_size: 100,
            cleanup_interval_hours: 24,
            retention_days: 30,
            max_retries: 3,
            drift_threshold: 10,
            stale_claim_seconds: 300,
            stats_interval_seconds: 60,
        }
    }
}

impl SyncConfig {
    /// Replace invalid zero values with defaults, warning on each
    pub fn validated(self) -> Self {
        let default = Self::default();

        let batch_size = if self.batch_size == 0 {
            eprintln!(
                "Warning: Invalid batch_size ({}), using default ({})",
                self.batch_size, default.batch_size
            );
            default.batch_size
        } else {
            self.batch_size
        };

        let poll_interval_seconds = if self.poll_interval_seconds == 0 {
            eprintln!(
                "Warning: Invalid poll_interval_seconds ({}), using default ({})",
                self.poll_interval_seconds, default.poll_interval_seconds
            );
            default.poll_interval_seconds
        } else {
            self.poll_interval_seconds
        };

        let reconcile_interval_minutes = if self.reconcile_interval_minutes == 0 {
            eprintln!(
                "Warning: Invalid reconcile_interval_minutes ({}), using default ({})",
                self.reconcile_interval_minutes, default.reconcile_interval_minutes
            );
            default.reconcile_interval_minutes
        } else {
            self.reconcile_interval_minutes
        };

        let reconcile_batch_size = if self.reconcile_batch_size == 0 {
            eprintln!(
                "Warning: Invalid reconcile_batch_size ({}), using default ({})",
                self.reconcile_batch_size, default.reconcile_batch_size
            );
            default.reconcile_batch_size
        } else {
            self.reconcile_batch_size
        };

        let cleanup_interval_hours = if self.cleanup_interval_hours == 0 {
            eprintln!(
                "Warning: Invalid cleanup_interval_hours ({}), using default ({})",
                self.cleanup_interval_hours, default.cleanup_interval_hours
            );
            default.cleanup_interval_hours
        } else {
            self.cleanup_interval_hours
        };

        let retention_days = if self.retention_days == 0 {
            eprintln!(
                "Warning: Invalid retention_days ({}), using default ({})",
                self.retention_days, default.retention_days
            );
            default.retention_days
        } else {
            self.retention_days
        };

        let drift_threshold = if self.drift_threshold < 0 {
            eprintln!(
                "Warning: Invalid drift_threshold ({}), using default ({})",
                self.drift_threshold, default.drift_threshold
            );
            default.drift_threshold
        } else {
            self.drift_threshold
        };

        let stale_claim_seconds = if self.stale_claim_seconds == 0 {
            eprintln!(
                "Warning: Invalid stale_claim_seconds ({}), using default ({})",
                self.stale_claim_seconds, default.stale_claim_seconds
            );
            default.stale_claim_seconds
        } else {
            self.stale_claim_seconds
        };

        Self {
            batch_size,
            poll_interval_seconds,
            reconcile_interval_minutes,
            reconcile_batch_size,
            cleanup_interval_hours,
            retention_days,
            max_retries: self.max_retries,
            drift_threshold,
            stale_claim_seconds,
            stats_interval_seconds: self.stats_interval_seconds,
        }
    }

    /// Delay between sync passes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Delay between reconcile passes
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_minutes * 60)
    }

    /// Delay between cleanup passes
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }

    /// Delay between stats log lines
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_seconds)
    }

    /// Age past which completed events are eligible for deletion
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    /// Age past which a processing claim is considered stale
    pub fn stale_claim_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_claim_seconds as i64)
    }
}
