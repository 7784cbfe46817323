//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `config`: Worker and engine configuration
//! - `event`: Sync events, sources, statuses, and payloads
//! - `state`: Per-platform sync state snapshots
//! - `transaction`: Append-only audit ledger rows
//! - `error`: Error types for the sync engine

pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod transaction;

pub use config::SyncConfig;
pub use error::SyncError;
pub use event::{
    EventId, EventSource, EventStatus, EventType, SyncEvent, UserId,
};
pub use state::{Platform, PlatformSnapshot, SnapshotUpdate, SyncState};
pub use transaction::{Transaction, TransactionId, TransactionKind};
