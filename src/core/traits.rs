//! Core traits for event storage
//!
//! This module defines the storage abstraction the engine and workers are
//! generic over, so the in-memory store can be swapped for a database-backed
//! one (or a failure-injecting test double) without touching worker logic.

use chrono::{DateTime, Utc};

use crate::core::event_store::EventStats;
use crate::types::{EventId, SyncError, SyncEvent, UserId};

/// Trait for storing and claiming sync events
///
/// Implementations must make `claim_pending` atomic: two concurrent
/// claimers never receive the same event, because the pending-to-processing
/// transition happens as a single conditional update per event.
pub trait EventStore: Send + Sync {
    /// Append a new event
    ///
    /// Returns the stored event's id. If an event with the same
    /// idempotency key already completed, fails with
    /// [`SyncError::DuplicateKey`]; if one is still in flight, returns its
    /// id without storing a second copy.
    fn append(&self, event: SyncEvent) -> Result<EventId, SyncError>;

    /// Atomically claim up to `limit` pending events, oldest first
    ///
    /// Claimed events move to processing and record a claim timestamp.
    fn claim_pending(&self, limit: usize) -> Result<Vec<SyncEvent>, SyncError>;

    /// Mark a claimed event completed
    fn mark_completed(&self, event_id: EventId) -> Result<(), SyncError>;

    /// Mark a claimed event failed, recording the error and bumping retries
    fn mark_failed(&self, event_id: EventId, error: &SyncError) -> Result<(), SyncError>;

    /// Move failed events with retries below `max_retries` back to pending
    ///
    /// Clears the recorded error. Returns how many events were requeued.
    fn requeue_failed(&self, max_retries: u32) -> Result<usize, SyncError>;

    /// Release processing claims older than `claimed_before`
    ///
    /// Stale events move back to pending without touching their retry
    /// count. Returns how many claims were released.
    fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, SyncError>;

    /// Delete completed events created before `cutoff`
    ///
    /// Pending, processing, and failed events are never deleted. Returns
    /// how many events were removed.
    fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SyncError>;

    /// Get an event by id
    fn get(&self, event_id: EventId) -> Option<SyncEvent>;

    /// Get an event by idempotency key
    fn get_by_key(&self, idempotency_key: &str) -> Option<SyncEvent>;

    /// Up to `limit` events for a user, newest first
    fn events_for_user(&self, user_id: UserId, limit: usize) -> Vec<SyncEvent>;

    /// Per-status counts
    fn stats(&self) -> EventStats;

    /// Total number of stored events
    fn len(&self) -> usize;

    /// Whether the store holds no events
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
