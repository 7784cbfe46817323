//! Cleanup worker: retention for completed events
//!
//! This module provides the `CleanupWorker`, the loop that purges
//! completed events older than the retention window. Only `completed`
//! rows are ever deleted; pending, processing, and failed events stay
//! regardless of age, and the transaction ledger is never touched, so
//! idempotency outlives event retention.

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::engine::SyncEngine;
use crate::core::traits::EventStore;
use crate::types::SyncError;

/// Background worker that purges aged completed events
pub struct CleanupWorker<S: EventStore> {
    /// Shared engine; the event store lives behind it
    engine: SyncEngine<S>,

    /// Cooperative shutdown signal shared with the other workers
    token: CancellationToken,
}

impl<S: EventStore> CleanupWorker<S> {
    /// Create a cleanup worker over a shared engine
    pub fn new(engine: SyncEngine<S>, token: CancellationToken) -> Self {
        Self { engine, token }
    }

    /// Purge completed events older than the retention window
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientStore`] when the store itself fails;
    /// the next scheduled pass retries.
    pub fn cleanup_once(&self) -> Result<usize, SyncError> {
        let cutoff = Utc::now() - self.engine.config().retention_window();
        let deleted = self.engine.store().delete_completed_before(cutoff)?;
        if deleted > 0 {
            info!(deleted, "purged completed events past retention");
        }
        Ok(deleted)
    }

    /// Loop passes on the cleanup interval until cancelled
    ///
    /// The first pass runs immediately, so rows past retention do not
    /// linger for another full interval after a restart.
    pub async fn run(self) {
        let interval = self.engine.config().cleanup_interval();
        info!(
            interval_hours = self.engine.config().cleanup_interval_hours,
            retention_days = self.engine.config().retention_days,
            "cleanup worker started"
        );

        loop {
            if let Err(e) = self.cleanup_once() {
                error!(error = %e, "cleanup pass failed");
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("cleanup worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::core::accounts::AccountStore;
    use crate::core::event_store::MemoryEventStore;
    use crate::core::ledger::TransactionLedger;
    use crate::core::state_tracker::SyncStateTracker;
    use crate::types::{EventSource, EventType, SyncConfig, SyncEvent};

    fn engine_with(config: SyncConfig) -> SyncEngine<MemoryEventStore> {
        SyncEngine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(TransactionLedger::new()),
            Arc::new(AccountStore::new()),
            Arc::new(SyncStateTracker::new()),
            config,
        )
    }

    fn xp_event(key: &str, delta_xp: i64) -> SyncEvent {
        SyncEvent::new(
            key,
            EventSource::Telegram,
            EventType::XpChange,
            7,
            json!({ "delta_xp": delta_xp }),
        )
    }

    #[test]
    fn test_cleanup_once_purges_completed_but_keeps_pending_and_ledger() {
        // Zero-day retention makes every completed event immediately aged
        let config = SyncConfig {
            retention_days: 0,
            ..SyncConfig::default()
        };
        let engine = engine_with(config);
        engine.accounts().get_or_create(7);

        let completed = engine.store().append(xp_event("tg:done:1", 50)).unwrap();
        let claimed = engine.store().claim_pending(1).unwrap();
        assert_eq!(claimed[0].id, completed);
        engine.apply(&claimed[0]).unwrap();
        engine.store().mark_completed(completed).unwrap();
        engine.store().append(xp_event("tg:waiting:1", 25)).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let worker = CleanupWorker::new(engine.clone(), CancellationToken::new());
        let deleted = worker.cleanup_once().unwrap();

        assert_eq!(deleted, 1);
        assert!(engine.store().get_by_key("tg:done:1").is_none());
        assert!(engine.store().get_by_key("tg:waiting:1").is_some());
        assert!(engine.ledger().contains_key("tg:done:1"));
    }

    #[test]
    fn test_cleanup_once_retains_recent_completed() {
        let engine = engine_with(SyncConfig::default());
        engine.accounts().get_or_create(7);

        let id = engine.store().append(xp_event("tg:done:1", 50)).unwrap();
        let claimed = engine.store().claim_pending(1).unwrap();
        engine.apply(&claimed[0]).unwrap();
        engine.store().mark_completed(id).unwrap();

        let worker = CleanupWorker::new(engine.clone(), CancellationToken::new());
        let deleted = worker.cleanup_once().unwrap();

        assert_eq!(deleted, 0);
        assert!(engine.store().get_by_key("tg:done:1").is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let token = CancellationToken::new();
        let worker = CleanupWorker::new(engine_with(SyncConfig::default()), token.clone());

        let handle = tokio::spawn(worker.run());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly after cancellation")
            .expect("worker task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_purges_immediately_on_start() {
        let config = SyncConfig {
            retention_days: 0,
            ..SyncConfig::default()
        };
        let engine = engine_with(config);
        engine.accounts().get_or_create(7);
        let id = engine.store().append(xp_event("tg:done:1", 50)).unwrap();
        let claimed = engine.store().claim_pending(1).unwrap();
        engine.apply(&claimed[0]).unwrap();
        engine.store().mark_completed(id).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let token = CancellationToken::new();
        let worker = CleanupWorker::new(engine.clone(), token.clone());

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(worker.run());

        // Yielding never advances the paused clock, so the purge must
        // happen without waiting out the first interval.
        for _ in 0..100 {
            if engine.store().get_by_key("tg:done:1").is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(engine.store().get_by_key("tg:done:1").is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);

        token.cancel();
        handle.await.unwrap();
    }
}
