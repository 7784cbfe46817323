//! Sync worker: claims pending events and applies them
//!
//! This module provides the `SyncWorker`, the loop that moves events from
//! `pending` to a terminal status. Each pass requeues stale claims and
//! retryable failures, claims a batch, and applies every claimed event
//! through the engine.
//!
//! # Design
//!
//! A pass is an ordinary synchronous method over lock-free stores; only
//! the pacing between passes is async. This keeps the claim-and-apply
//! logic testable without a runtime and keeps the loop itself trivial:
//! sleep, run a pass, repeat until cancelled.
//!
//! # Failure handling
//!
//! A per-event handler error marks that event failed and continues with
//! the rest of the batch. A transient store error aborts the pass and
//! doubles the sleep before the next one; events left in `processing` by
//! an aborted pass are recovered by the staleness sweep.

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::engine::{Applied, SyncEngine};
use crate::core::traits::EventStore;
use crate::types::SyncError;

/// Counters for one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassSummary {
    /// Events claimed this pass
    pub claimed: usize,
    /// Events applied for the first time
    pub applied: usize,
    /// Events completed as duplicate deliveries
    pub deduplicated: usize,
    /// Events marked failed
    pub failed: usize,
    /// Events returned to `pending` before claiming (stale + retryable)
    pub requeued: usize,
}

/// Background worker that applies claimed events
///
/// Holds a cloned engine and a cancellation token. The worker can be
/// driven one pass at a time with [`SyncWorker::process_once`] or looped
/// with [`SyncWorker::run`].
pub struct SyncWorker<S: EventStore> {
    /// Shared engine; all stores live behind it
    engine: SyncEngine<S>,

    /// Cooperative shutdown signal shared with the other workers
    token: CancellationToken,
}

impl<S: EventStore> SyncWorker<S> {
    /// Create a sync worker over a shared engine
    pub fn new(engine: SyncEngine<S>, token: CancellationToken) -> Self {
        Self { engine, token }
    }

    /// Run one full pass: requeue, claim, apply
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientStore`] when the store itself fails;
    /// the caller backs off and retries the whole pass. Per-event handler
    /// errors do not surface here: they mark the event failed and count
    /// toward the summary.
    pub fn process_once(&self) -> Result<SyncPassSummary, SyncError> {
        let mut summary = SyncPassSummary::default();
        let config = self.engine.config();
        let store = self.engine.store();

        let stale_cutoff = Utc::now() - config.stale_claim_window();
        let stale = store.requeue_stale(stale_cutoff)?;
        if stale > 0 {
            warn!(count = stale, "requeued stale claims from a stalled worker");
        }

        let retryable = store.requeue_failed(config.max_retries)?;
        if retryable > 0 {
            debug!(count = retryable, "requeued failed events for retry");
        }
        summary.requeued = stale + retryable;

        let batch = store.claim_pending(config.batch_size)?;
        summary.claimed = batch.len();

        for event in &batch {
            match self.engine.apply(event) {
                Ok(Applied::Effect { .. }) => {
                    store.mark_completed(event.id)?;
                    summary.applied += 1;
                }
                Ok(Applied::Duplicate) => {
                    store.mark_completed(event.id)?;
                    summary.deduplicated += 1;
                    debug!(event_id = %event.id, key = %event.idempotency_key, "duplicate delivery completed without effect");
                }
                Err(error) if error.is_transient() => return Err(error),
                Err(error) => {
                    store.mark_failed(event.id, &error)?;
                    summary.failed += 1;
                    let attempts = event.retries + 1;
                    if attempts >= config.max_retries {
                        let exhausted = SyncError::exhausted_retries(event.id, attempts);
                        error!(key = %event.idempotency_key, %error, %exhausted, "event left in failed status");
                    } else {
                        warn!(event_id = %event.id, attempts, %error, "event application failed");
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Loop passes on the poll interval until cancelled
    ///
    /// The first pass runs immediately, so a restart drains whatever the
    /// queue accumulated while the process was down.
    pub async fn run(self) {
        let base = self.engine.config().poll_interval();
        info!(interval_seconds = base.as_secs(), "sync worker started");

        loop {
            let wait = match self.process_once() {
                Ok(summary) => {
                    if summary.claimed > 0 || summary.requeued > 0 {
                        info!(
                            claimed = summary.claimed,
                            applied = summary.applied,
                            deduplicated = summary.deduplicated,
                            failed = summary.failed,
                            requeued = summary.requeued,
                            "sync pass finished"
                        );
                    }
                    base
                }
                Err(error) => {
                    // Transient trouble; claimed events recover via the
                    // staleness sweep once the store is back.
                    let wait = base * 2;
                    warn!(%error, backoff_seconds = wait.as_secs(), "sync pass aborted, backing off");
                    wait
                }
            };

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!("sync worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::*;
    use crate::core::accounts::AccountStore;
    use crate::core::event_store::{EventStats, MemoryEventStore};
    use crate::core::ledger::TransactionLedger;
    use crate::core::state_tracker::SyncStateTracker;
    use crate::types::{
        EventId, EventSource, EventType, SyncConfig, SyncEvent, UserId,
    };

    fn engine_with(config: SyncConfig) -> SyncEngine<MemoryEventStore> {
        SyncEngine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(TransactionLedger::new()),
            Arc::new(AccountStore::new()),
            Arc::new(SyncStateTracker::new()),
            config,
        )
    }

    fn worker() -> SyncWorker<MemoryEventStore> {
        SyncWorker::new(engine_with(SyncConfig::default()), CancellationToken::new())
    }

    fn xp_event(key: &str, user_id: UserId, delta_xp: i64) -> SyncEvent {
        SyncEvent::new(
            key,
            EventSource::Telegram,
            EventType::XpChange,
            user_id,
            json!({ "delta_xp": delta_xp }),
        )
    }

    #[test]
    fn test_process_once_applies_claimed_batch() {
        let worker = worker();
        worker.engine.accounts().get_or_create(7);
        worker.engine.store().append(xp_event("tg:daily:1", 7, 40)).unwrap();
        worker.engine.store().append(xp_event("tg:daily:2", 7, 60)).unwrap();

        let summary = worker.process_once().unwrap();

        assert_eq!(
            summary,
            SyncPassSummary {
                claimed: 2,
                applied: 2,
                deduplicated: 0,
                failed: 0,
                requeued: 0,
            }
        );
        assert_eq!(worker.engine.accounts().get(7).unwrap().xp, 100);
        assert_eq!(worker.engine.stats().completed, 2);
        assert_eq!(worker.engine.stats().pending, 0);
    }

    #[test]
    fn test_process_once_empty_store_is_a_noop() {
        let worker = worker();

        let summary = worker.process_once().unwrap();

        assert_eq!(summary, SyncPassSummary::default());
    }

    #[test]
    fn test_replayed_key_after_cleanup_deduplicates() {
        let worker = worker();
        worker.engine.accounts().get_or_create(7);
        worker.engine.store().append(xp_event("tg:daily:42", 7, 100)).unwrap();
        assert_eq!(worker.process_once().unwrap().applied, 1);

        // Retention removes the completed event row, then the same
        // delivery arrives again. The ledger keeps it a no-op.
        let purged = worker
            .engine
            .store()
            .delete_completed_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(purged, 1);
        worker.engine.store().append(xp_event("tg:daily:42", 7, 100)).unwrap();

        let summary = worker.process_once().unwrap();

        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.deduplicated, 1);
        assert_eq!(summary.applied, 0);
        assert_eq!(worker.engine.accounts().get(7).unwrap().xp, 100);
        assert_eq!(worker.engine.ledger().len(), 1);
    }

    #[test]
    fn test_failing_event_retries_exactly_max_times() {
        let worker = worker();
        worker.engine.accounts().get_or_create(7);

        // Payload is missing delta_xp, so every application attempt fails
        let bad = SyncEvent::new(
            "tg:broken:1",
            EventSource::Telegram,
            EventType::XpChange,
            7,
            json!({ "entity_id": "broken" }),
        );
        worker.engine.store().append(bad).unwrap();

        let max_retries = worker.engine.config().max_retries as usize;
        let mut attempts = 0;
        for _ in 0..max_retries + 2 {
            let summary = worker.process_once().unwrap();
            attempts += summary.failed;
        }

        assert_eq!(attempts, max_retries);
        assert_eq!(worker.engine.stats().failed, 1);
        assert_eq!(worker.engine.stats().pending, 0);
        assert!(worker.engine.ledger().is_empty());
    }

    #[test]
    fn test_stale_claim_recovered_and_applied() {
        let config = SyncConfig {
            stale_claim_seconds: 0,
            ..SyncConfig::default()
        };
        let worker = SyncWorker::new(engine_with(config), CancellationToken::new());
        worker.engine.accounts().get_or_create(7);
        worker.engine.store().append(xp_event("tg:daily:42", 7, 100)).unwrap();

        // A claim that is never completed simulates a crashed worker
        let stranded = worker.engine.store().claim_pending(10).unwrap();
        assert_eq!(stranded.len(), 1);
        std::thread::sleep(Duration::from_millis(5));

        let summary = worker.process_once().unwrap();

        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(worker.engine.accounts().get(7).unwrap().xp, 100);
        assert_eq!(worker.engine.stats().processing, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let token = CancellationToken::new();
        let worker = SyncWorker::new(engine_with(SyncConfig::default()), token.clone());

        let handle = tokio::spawn(worker.run());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly after cancellation")
            .expect("worker task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_immediately_on_start() {
        let engine = engine_with(SyncConfig::default());
        engine.accounts().get_or_create(7);
        engine.store().append(xp_event("tg:daily:42", 7, 100)).unwrap();
        let token = CancellationToken::new();
        let worker = SyncWorker::new(engine.clone(), token.clone());

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(worker.run());

        // Yielding never advances the paused clock, so the backlog must
        // drain without waiting out the first poll interval.
        for _ in 0..100 {
            if engine.stats().completed == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.stats().completed, 1);
        assert_eq!(engine.accounts().get(7).unwrap().xp, 100);
        assert_eq!(start.elapsed(), Duration::ZERO);

        token.cancel();
        handle.await.unwrap();
    }

    /// Store whose claims always fail transiently, for backoff tests
    struct FlakyStore {
        inner: MemoryEventStore,
        claim_calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryEventStore::new(),
                claim_calls: AtomicUsize::new(0),
            }
        }
    }

    impl EventStore for FlakyStore {
        fn append(&self, event: SyncEvent) -> Result<EventId, SyncError> {
            self.inner.append(event)
        }

        fn claim_pending(&self, _limit: usize) -> Result<Vec<SyncEvent>, SyncError> {
            self.claim_calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::transient_store("claim_pending", "store offline"))
        }

        fn mark_completed(&self, event_id: EventId) -> Result<(), SyncError> {
            self.inner.mark_completed(event_id)
        }

        fn mark_failed(&self, event_id: EventId, error: &SyncError) -> Result<(), SyncError> {
            self.inner.mark_failed(event_id, error)
        }

        fn requeue_failed(&self, max_retries: u32) -> Result<usize, SyncError> {
            self.inner.requeue_failed(max_retries)
        }

        fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, SyncError> {
            self.inner.requeue_stale(claimed_before)
        }

        fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SyncError> {
            self.inner.delete_completed_before(cutoff)
        }

        fn get(&self, event_id: EventId) -> Option<SyncEvent> {
            self.inner.get(event_id)
        }

        fn get_by_key(&self, idempotency_key: &str) -> Option<SyncEvent> {
            self.inner.get_by_key(idempotency_key)
        }

        fn events_for_user(&self, user_id: UserId, limit: usize) -> Vec<SyncEvent> {
            self.inner.events_for_user(user_id, limit)
        }

        fn stats(&self) -> EventStats {
            self.inner.stats()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_while_store_is_down() {
        let store = Arc::new(FlakyStore::new());
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::new(TransactionLedger::new()),
            Arc::new(AccountStore::new()),
            Arc::new(SyncStateTracker::new()),
            SyncConfig::default(),
        );
        let token = CancellationToken::new();
        let worker = SyncWorker::new(engine, token.clone());

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(worker.run());

        // The first pass runs immediately; after each failure the wait
        // doubles the 5s poll, so three claim attempts span at least
        // 0 + 10 + 10 seconds.
        while store.claim_calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let elapsed = start.elapsed();
        token.cancel();
        handle.await.unwrap();

        assert!(
            elapsed >= Duration::from_secs(20),
            "expected backoff to stretch three attempts past 20s, got {:?}",
            elapsed
        );
    }
}
