//! Core synchronization logic module
//!
//! This module contains the components the workers orchestrate:
//! - `traits` - Trait abstractions for interchangeable implementations
//! - `event_store` - In-memory event storage with atomic claiming
//! - `ledger` - Append-only transaction ledger keyed by idempotency key
//! - `accounts` - Canonical user accounts with XP-derived ranks
//! - `ranks` - The static rank ladder
//! - `state_tracker` - Per-platform sync snapshots and reconcile bookkeeping
//! - `engine` - Event application and reconciliation orchestration

pub mod accounts;
pub mod engine;
pub mod event_store;
pub mod ledger;
pub mod ranks;
pub mod state_tracker;
pub mod traits;

pub use accounts::{AccountStore, AchievementOutcome, UserAccount, XpApplied};
pub use engine::{Applied, ReconcileOutcome, ReconcileSummary, SyncEngine, UserReconcile};
pub use event_store::{EventStats, MemoryEventStore};
pub use ledger::TransactionLedger;
pub use ranks::{rank_by_id, rank_for_xp, Rank, MAX_RANK_ID, RANKS};
pub use state_tracker::SyncStateTracker;
pub use traits::EventStore;
