//! Reconcile worker: periodic drift detection
//!
//! This module provides the `ReconcileWorker`, the loop that periodically
//! compares per-platform snapshots against the canonical record and lets
//! the engine emit corrective events for whatever drifted.
//!
//! The worker never applies corrections itself: corrective events join
//! the normal pending queue and the sync worker applies them, so every
//! state change still flows through one code path and one ledger.

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::engine::{ReconcileOutcome, SyncEngine};
use crate::core::traits::EventStore;

/// Background worker that runs reconcile passes
pub struct ReconcileWorker<S: EventStore> {
    /// Shared engine; reconciliation state lives behind it
    engine: SyncEngine<S>,

    /// Cooperative shutdown signal shared with the other workers
    token: CancellationToken,
}

impl<S: EventStore> ReconcileWorker<S> {
    /// Create a reconcile worker over a shared engine
    pub fn new(engine: SyncEngine<S>, token: CancellationToken) -> Self {
        Self { engine, token }
    }

    /// Run one reconcile pass and log its outcome
    pub fn reconcile_once(&self) -> ReconcileOutcome {
        let outcome = self.engine.reconcile_due_users();
        match outcome {
            ReconcileOutcome::NoUsers => {
                debug!("no users due for reconciliation");
            }
            ReconcileOutcome::Completed(summary) => {
                info!(
                    examined = summary.examined,
                    clean = summary.clean,
                    corrected_users = summary.corrected_users,
                    corrective_events = summary.corrective_events,
                    initialized = summary.initialized,
                    missing_accounts = summary.missing_accounts,
                    errors = summary.errors,
                    "reconcile pass finished"
                );
            }
        }
        outcome
    }

    /// Loop passes on the reconcile interval until cancelled
    ///
    /// The first pass runs immediately, so drift accumulated across a
    /// restart is found without waiting out a full interval.
    pub async fn run(self) {
        let interval = self.engine.config().reconcile_interval();
        info!(
            interval_minutes = self.engine.config().reconcile_interval_minutes,
            "reconcile worker started"
        );

        loop {
            self.reconcile_once();
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("reconcile worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::core::accounts::AccountStore;
    use crate::core::event_store::MemoryEventStore;
    use crate::core::ledger::TransactionLedger;
    use crate::core::state_tracker::SyncStateTracker;
    use crate::types::{EventSource, Platform, SnapshotUpdate, SyncConfig};

    fn engine() -> SyncEngine<MemoryEventStore> {
        SyncEngine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(TransactionLedger::new()),
            Arc::new(AccountStore::new()),
            Arc::new(SyncStateTracker::new()),
            SyncConfig::default(),
        )
    }

    #[test]
    fn test_reconcile_once_with_nobody_due() {
        let worker = ReconcileWorker::new(engine(), CancellationToken::new());

        assert_eq!(worker.reconcile_once(), ReconcileOutcome::NoUsers);
    }

    #[test]
    fn test_reconcile_once_emits_corrections_into_the_queue() {
        let engine = engine();
        engine.accounts().get_or_create(7);
        engine.accounts().apply_xp_delta(7, 130).unwrap();
        engine.state().upsert(
            7,
            Platform::Telegram,
            SnapshotUpdate {
                xp: Some(100),
                balance: Some(0),
                rank_id: Some(1),
            },
        );
        let worker = ReconcileWorker::new(engine.clone(), CancellationToken::new());

        let outcome = worker.reconcile_once();

        let ReconcileOutcome::Completed(summary) = outcome else {
            panic!("expected a completed pass, got {:?}", outcome);
        };
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.corrected_users, 1);
        assert_eq!(summary.corrective_events, 1);

        // The correction waits in the normal pending queue
        let pending = engine.store().claim_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source, EventSource::Reconcile);
        assert_eq!(pending[0].user_id, 7);

        // The examined user is stamped, so the next pass has nobody due
        assert_eq!(worker.reconcile_once(), ReconcileOutcome::NoUsers);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let token = CancellationToken::new();
        let worker = ReconcileWorker::new(engine(), token.clone());

        let handle = tokio::spawn(worker.run());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly after cancellation")
            .expect("worker task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconciles_immediately_on_start() {
        let engine = engine();
        engine.accounts().get_or_create(7);
        engine.accounts().apply_xp_delta(7, 130).unwrap();
        engine.state().upsert(
            7,
            Platform::Telegram,
            SnapshotUpdate {
                xp: Some(100),
                balance: Some(0),
                rank_id: Some(1),
            },
        );
        let token = CancellationToken::new();
        let worker = ReconcileWorker::new(engine.clone(), token.clone());

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(worker.run());

        // Yielding never advances the paused clock, so the correction
        // must be queued without waiting out the first interval.
        for _ in 0..100 {
            if engine.stats().pending == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.stats().pending, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);

        token.cancel();
        handle.await.unwrap();
    }
}
