//! Error types for the sync engine
//!
//! This module defines all error types that can occur while appending,
//! claiming, applying, or reconciling sync events. Variants carry enough
//! context to be logged and diagnosed without looking up the event.
//!
//! # Error Categories
//!
//! - **Idempotency signals**: `DuplicateKey` is the no-op answer to a
//!   re-submitted event, not a failure.
//! - **Store errors**: transient store trouble retried at the worker level.
//! - **Handler errors**: per-event application failures that consume a retry.
//! - **Terminal states**: exhausted retries and stale claims, surfaced for
//!   operators rather than silently dropped.

use thiserror::Error;

use crate::types::event::{EventId, UserId};

/// Main error type for the sync engine
///
/// This enum represents all possible errors that can occur while an event
/// moves through the store and the workers. Each variant includes relevant
/// context to help diagnose and resolve the issue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// An event with this idempotency key already completed
    ///
    /// Raised by `append` when the key has already produced a completed
    /// event. Callers treat this as success: the effect they wanted is
    /// already applied.
    #[error("Duplicate idempotency key '{idempotency_key}': event already completed")]
    DuplicateKey {
        /// The idempotency key that was re-submitted
        idempotency_key: String,
    },

    /// The event store (or another shared store) failed transiently
    ///
    /// The worker backs off and retries the whole batch later. No event
    /// status changes in response to this error.
    #[error("Transient store failure in {operation}: {reason}")]
    TransientStore {
        /// Store operation that failed
        operation: String,
        /// Description of the failure
        reason: String,
    },

    /// A handler failed to apply an individual event
    ///
    /// The event is marked failed and its retry counter incremented;
    /// the rest of the batch continues.
    #[error("Handler failed for event {event_id}: {reason}")]
    Handler {
        /// Event that failed to apply
        event_id: EventId,
        /// Description of the failure
        reason: String,
    },

    /// The event payload did not match the shape its event type requires
    ///
    /// Treated as a handler failure: the event is marked failed and
    /// retried, since a later deploy may understand the payload.
    #[error("Invalid payload for event {event_id}: {reason}")]
    InvalidPayload {
        /// Event with the malformed payload
        event_id: EventId,
        /// Description of the mismatch
        reason: String,
    },

    /// An event consumed all of its retries
    ///
    /// The event stays in terminal `failed` status for operator
    /// inspection. It is never silently discarded.
    #[error("Event {event_id} exhausted retries ({retries})")]
    ExhaustedRetries {
        /// Event that exhausted its retries
        event_id: EventId,
        /// Retry count at exhaustion
        retries: u32,
    },

    /// A claim was held past the staleness timeout
    ///
    /// The owning worker is presumed dead; the liveness sweep requeues
    /// the event to `pending`.
    #[error("Stale claim on event {event_id}: held past {timeout_seconds}s")]
    StaleClaim {
        /// Event whose claim went stale
        event_id: EventId,
        /// Staleness timeout that was exceeded
        timeout_seconds: u64,
    },

    /// No event exists with the given id
    #[error("Event {event_id} not found")]
    EventNotFound {
        /// Event id that was not found
        event_id: EventId,
    },

    /// No canonical account exists for the given user
    ///
    /// Raised by reconciliation, which never creates canonical records.
    #[error("No canonical account for user {user_id}")]
    UnknownUser {
        /// Canonical user id that was not found
        user_id: UserId,
    },
}

// Helper functions for creating common errors

impl SyncError {
    /// Create a DuplicateKey error
    pub fn duplicate_key(idempotency_key: &str) -> Self {
        SyncError::DuplicateKey {
            idempotency_key: idempotency_key.to_string(),
        }
    }

    /// Create a TransientStore error
    pub fn transient_store(operation: &str, reason: &str) -> Self {
        SyncError::TransientStore {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a Handler error
    pub fn handler(event_id: EventId, reason: &str) -> Self {
        SyncError::Handler {
            event_id,
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidPayload error
    pub fn invalid_payload(event_id: EventId, reason: &str) -> Self {
        SyncError::InvalidPayload {
            event_id,
            reason: reason.to_string(),
        }
    }

    /// Create an ExhaustedRetries error
    pub fn exhausted_retries(event_id: EventId, retries: u32) -> Self {
        SyncError::ExhaustedRetries { event_id, retries }
    }

    /// Create a StaleClaim error
    pub fn stale_claim(event_id: EventId, timeout_seconds: u64) -> Self {
        SyncError::StaleClaim {
            event_id,
            timeout_seconds,
        }
    }

    /// Create an EventNotFound error
    pub fn event_not_found(event_id: EventId) -> Self {
        SyncError::EventNotFound { event_id }
    }

    /// Create an UnknownUser error
    pub fn unknown_user(user_id: UserId) -> Self {
        SyncError::UnknownUser { user_id }
    }

    /// Whether this error is the idempotent no-op signal
    ///
    /// Producers treat a duplicate append as success; this predicate keeps
    /// that check in one place.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SyncError::DuplicateKey { .. })
    }

    /// Whether a failed event should be retried at the worker level
    ///
    /// Transient store errors retry the whole batch without touching event
    /// status; everything else is either per-event or terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientStore { .. })
    }
}
