//! Thread-safe in-memory event store
//!
//! This module provides the `MemoryEventStore` struct, the reference
//! implementation of the [`EventStore`] trait backed by concurrent maps.
//!
//! # Design
//!
//! Events live in a `DashMap` keyed by event id, with a secondary index
//! from idempotency key to event id. Claiming runs in two phases: a read
//! pass snapshots pending candidates oldest first, then each candidate is
//! flipped to processing under its entry lock only if it is still pending.
//! A candidate that lost the race to another claimer is simply skipped, so
//! two concurrent claimers never receive the same event.
//!
//! # Thread Safety
//!
//! All operations are thread-safe. DashMap's internal sharding serializes
//! access to individual events while leaving unrelated events free to
//! proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::traits::EventStore;
use crate::types::{EventId, EventStatus, SyncError, SyncEvent, UserId};

/// Per-status event counts, as reported by [`EventStore::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Events waiting to be claimed
    pub pending: usize,
    /// Events currently claimed by a worker
    pub processing: usize,
    /// Events whose effect has been applied
    pub completed: usize,
    /// Events that failed their last attempt
    pub failed: usize,
}

impl EventStats {
    /// Total number of events across all statuses
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Thread-safe in-memory implementation of [`EventStore`]
///
/// `MemoryEventStore` keeps every event in memory and enforces the same
/// claim and idempotency semantics a database-backed store would provide
/// with conditional updates and a unique key constraint.
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads concurrently.
/// Status transitions happen under the event's entry lock, so a pending
/// event is claimed by at most one caller and a stale claim is released
/// by at most one sweep.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    /// All events by id
    events: DashMap<EventId, SyncEvent>,

    /// Idempotency key index
    ///
    /// Maps each key to the id of the event carrying it. Entries are
    /// removed when retention cleanup deletes the event, at which point
    /// the key may be appended again; the transaction ledger remains the
    /// durable proof the effect was applied.
    by_key: DashMap<String, EventId>,
}

impl MemoryEventStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            by_key: DashMap::new(),
        }
    }
}

impl EventStore for MemoryEventStore {
    /// Append a new event
    ///
    /// The idempotency key index entry is taken first, so two concurrent
    /// appends with the same key agree on a single stored event.
    ///
    /// # Returns
    ///
    /// * `Ok(event_id)` of the stored event, or of the already-stored
    ///   in-flight event carrying the same key
    /// * `Err(SyncError::DuplicateKey)` if an event with this key already
    ///   completed
    fn append(&self, event: SyncEvent) -> Result<EventId, SyncError> {
        let id = event.id;
        let mut slot = self.by_key.entry(event.idempotency_key.clone()).or_insert(id);

        if *slot == id {
            // Won the vacant slot; store the event while still holding
            // the key's entry lock.
            self.events.insert(id, event);
            return Ok(id);
        }

        let existing_id = *slot;
        match self.events.get(&existing_id).map(|e| e.status) {
            Some(EventStatus::Completed) => Err(SyncError::duplicate_key(&event.idempotency_key)),
            Some(_) => Ok(existing_id),
            None => {
                // Index pointed at an event retention cleanup already
                // deleted; the new event takes the key.
                *slot = id;
                self.events.insert(id, event);
                Ok(id)
            }
        }
    }

    /// Atomically claim up to `limit` pending events, oldest first
    ///
    /// Candidates are snapshotted and ordered by creation time, then each
    /// is flipped pending-to-processing under its entry lock. Candidates
    /// another claimer flipped first are skipped, never double-claimed.
    fn claim_pending(&self, limit: usize) -> Result<Vec<SyncEvent>, SyncError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(DateTime<Utc>, EventId)> = self
            .events
            .iter()
            .filter(|entry| entry.status == EventStatus::Pending)
            .map(|entry| (entry.created_at, entry.id))
            .collect();
        candidates.sort_unstable();

        let now = Utc::now();
        let mut claimed = Vec::new();
        for (_, event_id) in candidates {
            if claimed.len() == limit {
                break;
            }
            if let Some(mut entry) = self.events.get_mut(&event_id) {
                if entry.status == EventStatus::Pending {
                    entry.status = EventStatus::Processing;
                    entry.claimed_at = Some(now);
                    claimed.push(entry.clone());
                }
            }
        }

        Ok(claimed)
    }

    fn mark_completed(&self, event_id: EventId) -> Result<(), SyncError> {
        let mut entry = self
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        entry.status = EventStatus::Completed;
        entry.processed_at = Some(Utc::now());
        entry.claimed_at = None;
        entry.error_message = None;
        Ok(())
    }

    fn mark_failed(&self, event_id: EventId, error: &SyncError) -> Result<(), SyncError> {
        let mut entry = self
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        entry.status = EventStatus::Failed;
        entry.retries += 1;
        entry.error_message = Some(error.to_string());
        entry.claimed_at = None;
        Ok(())
    }

    fn requeue_failed(&self, max_retries: u32) -> Result<usize, SyncError> {
        let mut requeued = 0;
        for mut entry in self.events.iter_mut() {
            if entry.status == EventStatus::Failed && entry.retries < max_retries {
                entry.status = EventStatus::Pending;
                entry.error_message = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Release processing claims older than `claimed_before`
    ///
    /// The release happens under the entry lock, so concurrent sweeps
    /// release each stale claim exactly once. Retry counts are untouched:
    /// a stale claim is a worker loss, not a handler failure.
    fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, SyncError> {
        let mut released = 0;
        for mut entry in self.events.iter_mut() {
            let stale = entry.status == EventStatus::Processing
                && entry.claimed_at.is_some_and(|at| at < claimed_before);
            if stale {
                entry.status = EventStatus::Pending;
                entry.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Delete completed events created before `cutoff`
    ///
    /// Events are re-checked under their entry lock at removal time, and
    /// the idempotency key index entry is dropped with them. Pending,
    /// processing, and failed events are never touched.
    fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SyncError> {
        let expired: Vec<(EventId, String)> = self
            .events
            .iter()
            .filter(|entry| {
                entry.status == EventStatus::Completed && entry.created_at < cutoff
            })
            .map(|entry| (entry.id, entry.idempotency_key.clone()))
            .collect();

        let mut deleted = 0;
        for (event_id, idempotency_key) in expired {
            let removed = self.events.remove_if(&event_id, |_, event| {
                event.status == EventStatus::Completed && event.created_at < cutoff
            });
            if removed.is_some() {
                self.by_key
                    .remove_if(&idempotency_key, |_, id| *id == event_id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn get(&self, event_id: EventId) -> Option<SyncEvent> {
        self.events.get(&event_id).map(|entry| entry.clone())
    }

    fn get_by_key(&self, idempotency_key: &str) -> Option<SyncEvent> {
        let event_id = *self.by_key.get(idempotency_key)?;
        self.events.get(&event_id).map(|entry| entry.clone())
    }

    fn events_for_user(&self, user_id: UserId, limit: usize) -> Vec<SyncEvent> {
        let mut events: Vec<SyncEvent> = self
            .events
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        events.sort_unstable_by_key(|event| std::cmp::Reverse((event.created_at, event.id)));
        events.truncate(limit);
        events
    }

    fn stats(&self) -> EventStats {
        let mut stats = EventStats::default();
        for entry in self.events.iter() {
            match entry.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Processing => stats.processing += 1,
                EventStatus::Completed => stats.completed += 1,
                EventStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}
