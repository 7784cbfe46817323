//! Event-related types for the sync engine
//!
//! This module defines the sync event record, its source/type/status enums,
//! the typed payload views handlers deserialize into, and the helper that
//! derives idempotency keys for producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::types::error::SyncError;
use crate::types::state::Platform;

/// Canonical user identifier
///
/// This is the internal unified id, not any platform-specific id.
pub type UserId = i64;

/// Event identifier, generated at creation
pub type EventId = Uuid;

/// Platform or subsystem that raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Telegram bot
    Telegram,

    /// Discord bot
    Discord,

    /// Web surface
    ///
    /// Web producers append events like the bots do, but the web surface
    /// reads canonical state directly and keeps no sync snapshot.
    Web,

    /// Corrective event synthesized by the reconcile worker
    ///
    /// Events with this source adjust a platform snapshot only; they never
    /// mutate the canonical record.
    Reconcile,
}

impl EventSource {
    /// Stable lowercase name, as stored in idempotency keys and ledger rows
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Telegram => "telegram",
            EventSource::Discord => "discord",
            EventSource::Web => "web",
            EventSource::Reconcile => "reconcile",
        }
    }

    /// The platform snapshot this source reports into, if any
    ///
    /// Web and reconcile sources keep no snapshot of their own: web reads
    /// canonical state directly, and corrective events name their target
    /// platform in the payload instead.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            EventSource::Telegram => Some(Platform::Telegram),
            EventSource::Discord => Some(Platform::Discord),
            EventSource::Web | EventSource::Reconcile => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of state change an event describes
///
/// Dispatch in the engine is an exhaustive `match` on this enum, so adding
/// a new event type is a compiler-checked extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// XP delta for a user (payload: [`XpChangePayload`])
    XpChange,

    /// Coin balance delta for a user (payload: [`BalanceChangePayload`])
    BalanceChange,

    /// Rank transition notification (payload: [`RankChangePayload`])
    ///
    /// Rank is derived from XP; these events propagate an already-decided
    /// transition to platform snapshots rather than setting canonical rank.
    RankChange,

    /// Achievement unlocked (payload: [`AchievementPayload`])
    AchievementUnlock,

    /// Out-of-band reward of XP and/or coins (payload: [`RewardPayload`])
    RewardGrant,
}

impl EventType {
    /// Stable snake_case name, as stored in idempotency keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::XpChange => "xp_change",
            EventType::BalanceChange => "balance_change",
            EventType::RankChange => "rank_change",
            EventType::AchievementUnlock => "achievement_unlock",
            EventType::RewardGrant => "reward_grant",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of an event
///
/// Legal transitions: `pending → processing → completed | failed`, plus
/// `failed → pending` (requeue below the retry cap) and
/// `processing → pending` (stale-claim recovery). `completed` is terminal;
/// `failed` is terminal once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Waiting to be claimed by a sync worker
    Pending,

    /// Claimed by a worker; only such events may be completed or failed
    Processing,

    /// Applied exactly once (or deduplicated against the ledger)
    Completed,

    /// Application failed; retryable until the retry cap is reached
    Failed,
}

impl EventStatus {
    /// Stable lowercase name, as reported in stats and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fact about a cross-platform state change
///
/// Events are appended by producers, claimed and applied by the sync
/// worker, and eventually deleted by the cleanup worker once completed and
/// out of the retention window. The `idempotency_key` is the deduplication
/// boundary: one key, one applied effect, however many times the event is
/// submitted or delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique event id, generated at creation
    pub id: EventId,

    /// Globally unique idempotency key
    ///
    /// Producer-supplied, or derived deterministically from the causing
    /// action via [`idempotency_key`] so retries never double-apply.
    pub idempotency_key: String,

    /// Platform or subsystem that raised the event
    pub source: EventSource,

    /// Kind of state change described
    pub event_type: EventType,

    /// Canonical user the event applies to
    pub user_id: UserId,

    /// Type-specific payload, opaque at the store level
    ///
    /// Handlers deserialize this into the typed view for the event type at
    /// application time; a shape mismatch is a handler failure, not a
    /// store failure.
    pub payload: Value,

    /// Current processing status
    pub status: EventStatus,

    /// Number of failed application attempts so far
    pub retries: u32,

    /// Message from the most recent failure, cleared on requeue
    pub error_message: Option<String>,

    /// When the event was appended
    pub created_at: DateTime<Utc>,

    /// When the event reached `completed`
    pub processed_at: Option<DateTime<Utc>>,

    /// When the current claim was taken
    ///
    /// Set by the atomic claim, cleared on completion or requeue. The
    /// liveness sweep treats a claim older than the staleness timeout as
    /// abandoned and requeues the event.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl SyncEvent {
    /// Create a new pending event
    ///
    /// # Arguments
    ///
    /// * `idempotency_key` - Globally unique deduplication key
    /// * `source` - Platform or subsystem raising the event
    /// * `event_type` - Kind of state change
    /// * `user_id` - Canonical user id
    /// * `payload` - Type-specific payload value
    ///
    /// # Returns
    ///
    /// A `pending` event with a fresh id, zero retries, and `created_at`
    /// set to now.
    pub fn new(
        idempotency_key: impl Into<String>,
        source: EventSource,
        event_type: EventType,
        user_id: UserId,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.into(),
            source,
            event_type,
            user_id,
            payload,
            status: EventStatus::Pending,
            retries: 0,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            claimed_at: None,
        }
    }

    /// Whether this event is eligible for another application attempt
    ///
    /// True only for `failed` events whose retry count is still below the
    /// configured cap; everything at or past the cap is terminal.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.status == EventStatus::Failed && self.retries < max_retries
    }

    /// Deserialize the payload into the typed view for a handler
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPayload` when the payload does not match
    /// the expected shape; the caller treats that as a handler failure.
    pub fn parsed_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| SyncError::invalid_payload(self.id, &e.to_string()))
    }
}

/// Derive an idempotency key from the causing action
///
/// Produces `{source}:{event_type}:{entity_id}:{user_id}` with an optional
/// `:{timestamp}` suffix for actions that are not naturally unique (e.g.
/// repeated rank transitions through the same pair of ranks).
///
/// # Arguments
///
/// * `source` - Originating platform or subsystem
/// * `event_type` - Kind of state change
/// * `entity_id` - Local id of the causing action (game id, session id, ...)
/// * `user_id` - Canonical user id
/// * `timestamp` - Optional unix-time disambiguator
pub fn idempotency_key(
    source: EventSource,
    event_type: EventType,
    entity_id: &str,
    user_id: UserId,
    timestamp: Option<i64>,
) -> String {
    match timestamp {
        Some(ts) => format!("{}:{}:{}:{}:{}", source, event_type, entity_id, user_id, ts),
        None => format!("{}:{}:{}:{}", source, event_type, entity_id, user_id),
    }
}

/// Payload of an `xp_change` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpChangePayload {
    /// Signed XP delta to apply to the canonical record
    pub delta_xp: i64,

    /// Why the XP changed (game, daily, voice_chat, ...)
    #[serde(default)]
    pub reason: Option<String>,

    /// Local id of the causing action
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Payload of a `balance_change` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChangePayload {
    /// Signed coin delta to apply to the canonical record
    pub delta_balance: i64,

    /// Why the balance changed
    #[serde(default)]
    pub reason: Option<String>,

    /// Local id of the causing action
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Payload of a `rank_change` event
///
/// Both ranks are informational: the handler re-derives canonical rank
/// from current XP rather than trusting a possibly-stale transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankChangePayload {
    /// Rank id before the transition
    pub old_rank: u8,

    /// Rank id after the transition
    pub new_rank: u8,
}

/// Payload of an `achievement_unlock` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementPayload {
    /// Achievement identifier
    pub achievement_id: String,

    /// XP granted on first unlock
    #[serde(default)]
    pub reward_xp: i64,

    /// Coins granted on first unlock
    #[serde(default)]
    pub reward_coins: i64,
}

/// Payload of a `reward_grant` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPayload {
    /// XP component of the reward
    #[serde(default)]
    pub delta_xp: i64,

    /// Coin component of the reward
    #[serde(default)]
    pub delta_balance: i64,

    /// What the reward is for
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of a corrective event emitted by the reconcile worker
///
/// Carried by events with `source = reconcile` regardless of event type.
/// Application adjusts exactly one platform snapshot and never the
/// canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPayload {
    /// Platform whose snapshot drifted
    pub platform: Platform,

    /// Signed XP adjustment to the snapshot
    #[serde(default)]
    pub delta_xp: i64,

    /// Signed balance adjustment to the snapshot
    #[serde(default)]
    pub delta_balance: i64,

    /// Canonical rank id to set on the snapshot, for rank drift
    #[serde(default)]
    pub rank_id: Option<u8>,
}
