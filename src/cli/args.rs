use crate::types::SyncConfig;
use clap::Parser;

/// Synchronize user progress events across platforms
#[derive(Parser, Debug)]
#[command(name = "rust-sync-engine")]
#[command(about = "Synchronize user progress events across platforms", long_about = None)]
pub struct CliArgs {
    /// Number of events claimed per sync pass
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Events claimed per sync pass (default: 100)"
    )]
    pub batch_size: Option<usize>,

    /// Seconds between sync passes
    #[arg(
        long = "poll-interval-seconds",
        value_name = "SECS",
        help = "Seconds between sync passes (default: 5)"
    )]
    pub poll_interval_seconds: Option<u64>,

    /// Minutes between reconcile passes
    #[arg(
        long = "reconcile-interval-minutes",
        value_name = "MINS",
        help = "Minutes between reconcile passes; also the per-user freshness window (default: 15)"
    )]
    pub reconcile_interval_minutes: Option<u64>,

    /// Number of users examined per reconcile pass
    #[arg(
        long = "reconcile-batch-size",
        value_name = "SIZE",
        help = "Users examined per reconcile pass (default: 100)"
    )]
    pub reconcile_batch_size: Option<usize>,

    /// Hours between cleanup passes
    #[arg(
        long = "cleanup-interval-hours",
        value_name = "HOURS",
        help = "Hours between cleanup passes (default: 24)"
    )]
    pub cleanup_interval_hours: Option<u64>,

    /// Days a completed event is retained before cleanup
    #[arg(
        long = "retention-days",
        value_name = "DAYS",
        help = "Days completed events are retained (default: 30)"
    )]
    pub retention_days: Option<u32>,

    /// Application attempts before an event stays failed
    #[arg(
        long = "max-retries",
        value_name = "COUNT",
        help = "Application attempts before an event stays failed; 0 fails immediately (default: 3)"
    )]
    pub max_retries: Option<u32>,

    /// Absolute XP/coin drift tolerated before a correction is emitted
    #[arg(
        long = "drift-threshold",
        value_name = "AMOUNT",
        help = "Absolute drift tolerated before correcting; 0 corrects any difference (default: 10)"
    )]
    pub drift_threshold: Option<i64>,

    /// Seconds a claim may be held before the staleness sweep requeues it
    #[arg(
        long = "stale-claim-seconds",
        value_name = "SECS",
        help = "Seconds before a held claim is considered stale (default: 300)"
    )]
    pub stale_claim_seconds: Option<u64>,

    /// Seconds between stats log lines
    #[arg(
        long = "stats-interval-seconds",
        value_name = "SECS",
        help = "Seconds between stats log lines; 0 disables the stats task (default: 60)"
    )]
    pub stats_interval_seconds: Option<u64>,
}

impl CliArgs {
    /// Create a SyncConfig from CLI arguments
    ///
    /// This method constructs a SyncConfig using the CLI arguments if provided,
    /// or falls back to default values. It also validates the configuration and
    /// prints warnings to stderr if any issues are detected.
    ///
    /// # Returns
    ///
    /// A `SyncConfig` with values from CLI arguments or defaults.
    pub fn to_sync_config(&self) -> SyncConfig {
        let default = SyncConfig::default();
        SyncConfig {
            batch_size: self.batch_size.unwrap_or(default.batch_size),
            poll_interval_seconds: self
                .poll_interval_seconds
                .unwrap_or(default.poll_interval_seconds),
            reconcile_interval_minutes: self
                .reconcile_interval_minutes
                .unwrap_or(default.reconcile_interval_minutes),
            reconcile_batch_size: self
                .reconcile_batch_size
                .unwrap_or(default.reconcile_batch_size),
            cleanup_interval_hours: self
                .cleanup_interval_hours
                .unwrap_or(default.cleanup_interval_hours),
            retention_days: self.retention_days.unwrap_or(default.retention_days),
            max_retries: self.max_retries.unwrap_or(default.max_retries),
            drift_threshold: self.drift_threshold.unwrap_or(default.drift_threshold),
            stale_claim_seconds: self
                .stale_claim_seconds
                .unwrap_or(default.stale_claim_seconds),
            stats_interval_seconds: self
                .stats_interval_seconds
                .unwrap_or(default.stats_interval_seconds),
        }
        .validated()
    }
}
