//! Audit transaction types for the sync engine
//!
//! This module defines the append-only ledger row written once per applied
//! event. Ledger rows double as the idempotency record: a row existing for
//! an idempotency key proves the effect was applied, independent of what
//! the event's status says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::types::event::{EventSource, EventType, UserId};

/// Ledger row identifier
pub type TransactionId = Uuid;

/// What kind of effect a ledger row records
///
/// One kind per event type; the mapping is fixed by
/// `TransactionKind::from(EventType)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// XP delta applied to the canonical record
    Xp,

    /// Coin balance delta applied to the canonical record
    Balance,

    /// Rank transition recorded into platform snapshots
    Rank,

    /// Achievement unlock, with any first-time rewards
    Achievement,

    /// Out-of-band reward of XP and/or coins
    Reward,
}

impl TransactionKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Xp => "xp",
            TransactionKind::Balance => "balance",
            TransactionKind::Rank => "rank",
            TransactionKind::Achievement => "achievement",
            TransactionKind::Reward => "reward",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for TransactionKind {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::XpChange => TransactionKind::Xp,
            EventType::BalanceChange => TransactionKind::Balance,
            EventType::RankChange => TransactionKind::Rank,
            EventType::AchievementUnlock => TransactionKind::Achievement,
            EventType::RewardGrant => TransactionKind::Reward,
        }
    }
}

/// Append-only audit record of one applied effect
///
/// Exactly one row exists per completed event, sharing its idempotency
/// key. Rows are never updated or deleted; retention cleanup does not
/// touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique row id
    pub id: TransactionId,

    /// Idempotency key of the event this row records
    pub idempotency_key: String,

    /// Canonical user the effect applied to
    pub user_id: UserId,

    /// Platform or subsystem that raised the triggering event
    pub source: EventSource,

    /// Kind of effect recorded
    pub kind: TransactionKind,

    /// XP delta as actually applied
    ///
    /// Zero for effects that did not change XP. For corrective events this
    /// is the snapshot adjustment, not a canonical mutation.
    pub delta_xp: i64,

    /// Coin delta as actually applied
    pub delta_balance: i64,

    /// Why the effect happened
    pub reason: Option<String>,

    /// Additional context (entity ids, achievement ids, target platform)
    pub metadata: Value,

    /// When the row was written
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new ledger row with a fresh id and `created_at` of now
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idempotency_key: impl Into<String>,
        user_id: UserId,
        source: EventSource,
        kind: TransactionKind,
        delta_xp: i64,
        delta_balance: i64,
        reason: Option<String>,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.into(),
            user_id,
            source,
            kind,
            delta_xp,
            delta_balance,
            reason,
            metadata,
            created_at: Utc::now(),
        }
    }
}
