//! Rust Sync Engine daemon
//!
//! Long-running service that applies cross-platform progress events and
//! reconciles per-platform state against the canonical record.
//!
//! # Usage
//!
//! ```bash
//! cargo run
//! cargo run -- --poll-interval-seconds 2 --batch-size 500
//! RUST_LOG=debug cargo run -- --drift-threshold 0
//! ```
//!
//! The process runs three background workers (sync, reconcile, cleanup)
//! plus a periodic stats log line, all sharing one cancellation token.
//! On ctrl-c the token is cancelled, each worker finishes its current
//! iteration, and the process exits.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (runtime construction or signal handling failed)

use std::process;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rust_sync_engine::cli;
use rust_sync_engine::core::{
    AccountStore, MemoryEventStore, SyncEngine, SyncStateTracker, TransactionLedger,
};
use rust_sync_engine::types::SyncConfig;
use rust_sync_engine::worker::{CleanupWorker, ReconcileWorker, SyncWorker};

fn main() {
    // Default to info-level logs unless RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command-line arguments using clap
    let args = cli::parse_args();
    let config = args.to_sync_config();

    // Use multi-threaded runtime with one worker thread per CPU core
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Wire the stores, spawn the workers, and wait for ctrl-c
async fn run(config: SyncConfig) -> Result<(), String> {
    let store = Arc::new(MemoryEventStore::new());
    let ledger = Arc::new(TransactionLedger::new());
    let accounts = Arc::new(AccountStore::new());
    let state = Arc::new(SyncStateTracker::new());
    let engine = SyncEngine::new(store, ledger, accounts, state, config.clone());

    let token = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        SyncWorker::new(engine.clone(), token.clone()).run(),
    ));
    tasks.push(tokio::spawn(
        ReconcileWorker::new(engine.clone(), token.clone()).run(),
    ));
    tasks.push(tokio::spawn(
        CleanupWorker::new(engine.clone(), token.clone()).run(),
    ));

    if config.stats_interval_seconds > 0 {
        let stats_engine = engine.clone();
        let stats_token = token.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stats_token.cancelled() => break,
                    _ = tokio::time::sleep(stats_engine.config().stats_interval()) => {}
                }
                let stats = stats_engine.stats();
                info!(
                    pending = stats.pending,
                    processing = stats.processing,
                    completed = stats.completed,
                    failed = stats.failed,
                    ledger_rows = stats_engine.ledger().len(),
                    accounts = stats_engine.accounts().len(),
                    "event store stats"
                );
            }
        }));
    }

    info!("sync engine started; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for ctrl-c: {}", e))?;

    info!("shutdown signal received, stopping workers");
    token.cancel();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "worker task panicked");
        }
    }

    info!("sync engine stopped");
    Ok(())
}
