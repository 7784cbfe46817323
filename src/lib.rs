//! Rust Sync Engine Library
//! # Overview
//!
//! This library provides an event-driven synchronization engine that keeps
//! user progress (XP, coin balances, ranks, achievements) consistent across
//! platforms through idempotent event application and periodic reconciliation.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (SyncEvent, SyncState, Transaction, etc.)
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Event application and reconciliation orchestration
//!   - [`core::event_store`] - In-memory event storage with atomic claiming
//!   - [`core::ledger`] - Append-only transaction ledger, the idempotency record
//!   - [`core::accounts`] - Canonical user accounts with XP-derived ranks
//!   - [`core::state_tracker`] - Per-platform snapshots and reconcile bookkeeping
//! - [`worker`] - Background loops (sync, reconcile, cleanup)
//!
//! # Event Types
//!
//! The engine processes five event types:
//!
//! - **XpChange**: Apply an XP delta, recompute rank, credit rank-up rewards
//! - **BalanceChange**: Apply a coin delta
//! - **RankChange**: Record a rank transition announcement
//! - **AchievementUnlock**: Unlock an achievement once, with one-time rewards
//! - **RewardGrant**: Grant out-of-band XP and/or coins
//!
//! # Consistency Model
//!
//! The canonical account record is the single source of truth. Per-platform
//! snapshots record the values each platform last saw; the reconcile worker
//! compares snapshots against canonical state and emits corrective events
//! for whatever drifted past the threshold. Corrections flow through the
//! same claim-and-apply path as every other event, so one ledger records
//! every state change and every idempotency decision.

// Module declarations
pub mod cli;
pub mod core;
pub mod types;
pub mod worker;

pub use crate::core::{
    AccountStore, Applied, EventStats, EventStore, MemoryEventStore, ReconcileOutcome,
    ReconcileSummary, SyncEngine, SyncStateTracker, TransactionLedger, UserAccount,
};
pub use types::{
    EventId, EventSource, EventStatus, EventType, Platform, SyncConfig, SyncError, SyncEvent,
    SyncState, Transaction, UserId,
};
pub use worker::{CleanupWorker, ReconcileWorker, SyncPassSummary, SyncWorker};
