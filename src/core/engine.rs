//! Event application and reconciliation orchestration
//!
//! This module provides the `SyncEngine` struct, which the three workers
//! drive: it applies claimed events to the canonical record exactly once
//! per idempotency key, runs the per-user reconcile comparison, and offers
//! producer helpers for appending well-formed events.
//!
//! # Architecture
//!
//! ```text
//! SyncEngine<S: EventStore>
//!     ├── Arc<S>                  (event rows, atomic claim)
//!     ├── Arc<TransactionLedger>  (append-only audit, idempotency proof)
//!     ├── Arc<AccountStore>       (canonical XP / coins / rank)
//!     ├── Arc<SyncStateTracker>   (per-platform last-known values)
//!     └── SyncConfig
//! ```
//!
//! # Idempotency
//!
//! `apply` runs the handler inside the ledger's insert-if-absent for the
//! event's key: the key's entry lock is held from the vacancy check until
//! the ledger row is stored, so concurrent deliveries of one key block on
//! the entry and then observe the row. Winning the key is the precondition
//! for the effect; a key with a ledger row is a duplicate delivery and
//! produces no second effect no matter how many workers hold the event.
//!
//! # Thread Safety
//!
//! The engine is cloneable and safe to share across tasks. All state it
//! touches lives behind DashMap-backed stores with per-entry locking.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::core::accounts::{AccountStore, AchievementOutcome};
use crate::core::event_store::EventStats;
use crate::core::ledger::TransactionLedger;
use crate::core::state_tracker::SyncStateTracker;
use crate::core::traits::EventStore;
use crate::types::event::{
    idempotency_key, AchievementPayload, BalanceChangePayload, CorrectionPayload,
    RankChangePayload, RewardPayload, XpChangePayload,
};
use crate::types::{
    EventId, EventSource, EventStatus, EventType, Platform, SnapshotUpdate, SyncConfig,
    SyncError, SyncEvent, Transaction, TransactionKind, UserId,
};

/// How many recent events the correction dedup scan inspects.
///
/// An unapplied correction is never older than one reconcile interval.
const INFLIGHT_SCAN_LIMIT: usize = 50;

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The idempotency key already had a ledger row; nothing was mutated
    Duplicate,

    /// The effect was applied for the first time
    Effect {
        /// XP delta as applied
        delta_xp: i64,
        /// Coin delta as applied, including any rank-up reward
        delta_balance: i64,
        /// Whether the application moved the user up the rank ladder
        rank_up: bool,
    },
}

/// Result of reconciling a single user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserReconcile {
    /// Sync state exists but no canonical account; nothing to compare
    NoAccount,

    /// No sync state existed; one was initialized from canonical values
    Initialized,

    /// Examined, no drift beyond tolerance
    Clean,

    /// Drift found; corrective events were appended
    Corrected {
        /// Number of corrective events appended
        events: usize,
    },
}

/// Per-pass reconcile counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Users examined this pass
    pub examined: usize,
    /// Users with no drift
    pub clean: usize,
    /// Users that had at least one corrective event appended
    pub corrected_users: usize,
    /// Corrective events appended in total
    pub corrective_events: usize,
    /// Users whose sync state was initialized from canonical values
    pub initialized: usize,
    /// Users with sync state but no canonical account
    pub missing_accounts: usize,
    /// Users whose reconcile attempt errored
    pub errors: usize,
}

/// Result of one reconcile pass
///
/// "Nobody was due" is a distinct outcome from "everyone examined was
/// clean": the former means the pass had nothing to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No users were due for reconciliation
    NoUsers,

    /// Users were examined; see the counters
    Completed(ReconcileSummary),
}

/// What one handler did, before the common ledger write
struct EffectRecord {
    delta_xp: i64,
    delta_balance: i64,
    rank_up: bool,
    reason: Option<String>,
    metadata: Value,
    follow_up: Option<SyncEvent>,
}

/// Event application and reconciliation orchestrator
///
/// `SyncEngine` is the injected dependency of all three workers: the sync
/// worker calls [`SyncEngine::apply`] per claimed event, the reconcile
/// worker calls [`SyncEngine::reconcile_due_users`], and the binary's
/// stats task calls [`SyncEngine::stats`]. Producers append events through
/// the `submit_*` helpers.
///
/// # Thread Safety
///
/// Safe to clone and use from multiple threads/tasks concurrently. Every
/// canonical mutation runs under one per-user entry lock, including the
/// rank recomputation and reward crediting that ride along with it.
#[derive(Debug)]
pub struct SyncEngine<S: EventStore> {
    /// Event rows and the atomic claim
    store: Arc<S>,

    /// Append-only audit ledger, also the idempotency record
    ledger: Arc<TransactionLedger>,

    /// Canonical user accounts
    accounts: Arc<AccountStore>,

    /// Per-platform last-known values
    state: Arc<SyncStateTracker>,

    /// Worker and drift configuration
    config: SyncConfig,
}

impl<S: EventStore> Clone for SyncEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            accounts: Arc::clone(&self.accounts),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
        }
    }
}

impl<S: EventStore> SyncEngine<S> {
    /// Create a new engine over shared stores
    pub fn new(
        store: Arc<S>,
        ledger: Arc<TransactionLedger>,
        accounts: Arc<AccountStore>,
        state: Arc<SyncStateTracker>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            accounts,
            state,
            config,
        }
    }

    /// The event store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The transaction ledger
    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// The canonical account store
    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// The sync state tracker
    pub fn state(&self) -> &SyncStateTracker {
        &self.state
    }

    /// The engine configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Event store counts for periodic stats logging
    pub fn stats(&self) -> EventStats {
        self.store.stats()
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    /// Apply one event, exactly once per idempotency key
    ///
    /// The handler runs inside [`TransactionLedger::record_with`]: the
    /// key's entry lock is held from the vacancy check until the ledger
    /// row is stored, so a key that already has a row (or whose row is
    /// being written by a concurrent delivery) returns
    /// [`Applied::Duplicate`] without mutating anything. The winner
    /// dispatches on the event type (or the correction path for
    /// reconcile-sourced events), writes exactly one ledger row, and then
    /// records the source platform's snapshot.
    ///
    /// # Errors
    ///
    /// * [`SyncError::InvalidPayload`] - payload does not match the
    ///   event type's expected shape
    /// * [`SyncError::UnknownUser`] - no canonical account for the user
    ///
    /// Both are handler failures: the caller marks the event failed and
    /// moves on; nothing was mutated, no ledger row was written, and the
    /// key stays free for the retry.
    pub fn apply(&self, event: &SyncEvent) -> Result<Applied, SyncError> {
        let applied = self.ledger.record_with(&event.idempotency_key, || {
            let effect = if event.source == EventSource::Reconcile {
                self.apply_correction(event)?
            } else {
                match event.event_type {
                    EventType::XpChange => self.apply_xp_change(event)?,
                    EventType::BalanceChange => self.apply_balance_change(event)?,
                    EventType::RankChange => self.apply_rank_change(event)?,
                    EventType::AchievementUnlock => self.apply_achievement(event)?,
                    EventType::RewardGrant => self.apply_reward(event)?,
                }
            };

            let row = Transaction::new(
                event.idempotency_key.as_str(),
                event.user_id,
                event.source,
                TransactionKind::from(event.event_type),
                effect.delta_xp,
                effect.delta_balance,
                effect.reason.clone(),
                effect.metadata.clone(),
            );
            Ok((row, effect))
        })?;

        let Some(effect) = applied else {
            return Ok(Applied::Duplicate);
        };

        if event.source != EventSource::Reconcile {
            self.snapshot_source(event);
        }

        // The effect is recorded; a lost follow-up only delays the rank
        // announcement until the next reconcile pass corrects it.
        if let Some(follow_up) = effect.follow_up {
            match self.store.append(follow_up) {
                Ok(_) => {}
                Err(error) if error.is_duplicate() => {}
                Err(error) => {
                    warn!(event_id = %event.id, %error, "follow-up rank event not appended");
                }
            }
        }

        Ok(Applied::Effect {
            delta_xp: effect.delta_xp,
            delta_balance: effect.delta_balance,
            rank_up: effect.rank_up,
        })
    }

    /// `xp_change`: canonical XP delta with rank recomputation
    fn apply_xp_change(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: XpChangePayload = event.parsed_payload()?;
        let applied = self.accounts.apply_xp_delta(event.user_id, payload.delta_xp)?;

        let follow_up = applied
            .rank_up()
            .then(|| self.rank_follow_up(event, applied.old_rank_id, applied.new_rank_id));

        Ok(EffectRecord {
            delta_xp: payload.delta_xp,
            delta_balance: applied.reward_coins,
            rank_up: applied.rank_up(),
            reason: payload.reason,
            metadata: json!({
                "entity_id": payload.entity_id,
                "old_rank": applied.old_rank_id,
                "new_rank": applied.new_rank_id,
            }),
            follow_up,
        })
    }

    /// `balance_change`: canonical coin delta
    fn apply_balance_change(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: BalanceChangePayload = event.parsed_payload()?;
        self.accounts.add_coins(event.user_id, payload.delta_balance)?;

        Ok(EffectRecord {
            delta_xp: 0,
            delta_balance: payload.delta_balance,
            rank_up: false,
            reason: payload.reason,
            metadata: json!({ "entity_id": payload.entity_id }),
            follow_up: None,
        })
    }

    /// `rank_change`: rank is XP-derived; the payload ranks are informational
    ///
    /// The snapshot write after dispatch records the canonical (derived)
    /// rank for the source platform; canonical state is never overwritten
    /// from the payload.
    fn apply_rank_change(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: RankChangePayload = event.parsed_payload()?;
        let account = self
            .accounts
            .get(event.user_id)
            .ok_or(SyncError::UnknownUser {
                user_id: event.user_id,
            })?;

        Ok(EffectRecord {
            delta_xp: 0,
            delta_balance: 0,
            rank_up: payload.new_rank > payload.old_rank,
            reason: None,
            metadata: json!({
                "old_rank": payload.old_rank,
                "new_rank": payload.new_rank,
                "derived_rank": account.rank_id,
            }),
            follow_up: None,
        })
    }

    /// `achievement_unlock`: first unlock grants rewards, re-delivery does not
    fn apply_achievement(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: AchievementPayload = event.parsed_payload()?;
        let outcome = self.accounts.unlock_achievement(
            event.user_id,
            &payload.achievement_id,
            payload.reward_xp,
            payload.reward_coins,
        )?;

        match outcome {
            AchievementOutcome::AlreadyUnlocked => Ok(EffectRecord {
                delta_xp: 0,
                delta_balance: 0,
                rank_up: false,
                reason: None,
                metadata: json!({
                    "achievement_id": payload.achievement_id,
                    "already_unlocked": true,
                }),
                follow_up: None,
            }),
            AchievementOutcome::Unlocked(applied) => {
                let follow_up = applied
                    .rank_up()
                    .then(|| self.rank_follow_up(event, applied.old_rank_id, applied.new_rank_id));

                Ok(EffectRecord {
                    delta_xp: payload.reward_xp,
                    delta_balance: payload.reward_coins.saturating_add(applied.reward_coins),
                    rank_up: applied.rank_up(),
                    reason: None,
                    metadata: json!({ "achievement_id": payload.achievement_id }),
                    follow_up,
                })
            }
        }
    }

    /// `reward_grant`: out-of-band XP and/or coins
    fn apply_reward(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: RewardPayload = event.parsed_payload()?;
        let applied = self.accounts.apply_xp_delta(event.user_id, payload.delta_xp)?;
        self.accounts.add_coins(event.user_id, payload.delta_balance)?;

        let follow_up = applied
            .rank_up()
            .then(|| self.rank_follow_up(event, applied.old_rank_id, applied.new_rank_id));

        Ok(EffectRecord {
            delta_xp: payload.delta_xp,
            delta_balance: payload.delta_balance.saturating_add(applied.reward_coins),
            rank_up: applied.rank_up(),
            reason: payload.reason,
            metadata: json!({}),
            follow_up,
        })
    }

    /// Reconcile-sourced events: adjust the target platform's snapshot only
    ///
    /// Canonical state is never touched here; corrections move a
    /// platform's view toward the canonical record, not the other way.
    fn apply_correction(&self, event: &SyncEvent) -> Result<EffectRecord, SyncError> {
        let payload: CorrectionPayload = event.parsed_payload()?;
        self.state.adjust(
            event.user_id,
            payload.platform,
            payload.delta_xp,
            payload.delta_balance,
            payload.rank_id,
        );

        Ok(EffectRecord {
            delta_xp: payload.delta_xp,
            delta_balance: payload.delta_balance,
            rank_up: false,
            reason: None,
            metadata: json!({
                "platform": payload.platform,
                "rank_id": payload.rank_id,
            }),
            follow_up: None,
        })
    }

    /// Record resulting canonical values into the source platform's snapshot
    ///
    /// Web-sourced events have no platform snapshot and record nothing.
    fn snapshot_source(&self, event: &SyncEvent) {
        if let (Some(platform), Some(account)) = (
            event.source.platform(),
            self.accounts.get(event.user_id),
        ) {
            self.state.upsert(
                event.user_id,
                platform,
                SnapshotUpdate {
                    xp: Some(account.xp),
                    balance: Some(account.coins),
                    rank_id: Some(account.rank_id),
                },
            );
        }
    }

    /// Build the follow-up rank event for an upward transition
    ///
    /// The parent's idempotency key is the entity, so a retried parent
    /// derives the same follow-up key and cannot announce twice.
    fn rank_follow_up(&self, parent: &SyncEvent, old_rank: u8, new_rank: u8) -> SyncEvent {
        let key = idempotency_key(
            parent.source,
            EventType::RankChange,
            &parent.idempotency_key,
            parent.user_id,
            None,
        );
        SyncEvent::new(
            key,
            parent.source,
            EventType::RankChange,
            parent.user_id,
            json!({ "old_rank": old_rank, "new_rank": new_rank }),
        )
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Compare one user's platform snapshots against the canonical record
    ///
    /// Emits one corrective event per drifted dimension per platform,
    /// skipping dimensions that already have a correction in flight.
    /// Never mutates canonical or snapshot state directly; corrections
    /// flow through the event store like every other change.
    pub fn reconcile_user(&self, user_id: UserId) -> Result<UserReconcile, SyncError> {
        let Some(account) = self.accounts.get(user_id) else {
            // Reconcile never creates canonical records; stamp the row so
            // it rotates to the back of the due queue.
            self.state.record_reconcile_error(user_id);
            self.state.record_reconcile(user_id);
            return Ok(UserReconcile::NoAccount);
        };

        let Some(state) = self.state.get(user_id) else {
            let update = SnapshotUpdate {
                xp: Some(account.xp),
                balance: Some(account.coins),
                rank_id: Some(account.rank_id),
            };
            for platform in Platform::ALL {
                self.state.upsert(user_id, platform, update);
            }
            self.state.record_reconcile(user_id);
            return Ok(UserReconcile::Initialized);
        };

        let threshold = self.config.drift_threshold;
        let mut emitted = 0;

        for platform in Platform::ALL {
            if let Some(delta_xp) = state.xp_correction(platform, account.xp, threshold) {
                if !self.has_inflight_correction(user_id, EventType::XpChange, platform)
                    && self.append_correction(
                        user_id,
                        EventType::XpChange,
                        CorrectionPayload {
                            platform,
                            delta_xp,
                            delta_balance: 0,
                            rank_id: None,
                        },
                    )?
                {
                    emitted += 1;
                }
            }

            if let Some(delta_balance) =
                state.balance_correction(platform, account.coins, threshold)
            {
                if !self.has_inflight_correction(user_id, EventType::BalanceChange, platform)
                    && self.append_correction(
                        user_id,
                        EventType::BalanceChange,
                        CorrectionPayload {
                            platform,
                            delta_xp: 0,
                            delta_balance,
                            rank_id: None,
                        },
                    )?
                {
                    emitted += 1;
                }
            }

            if let Some(rank_id) = state.rank_correction(platform, account.rank_id) {
                if !self.has_inflight_correction(user_id, EventType::RankChange, platform)
                    && self.append_correction(
                        user_id,
                        EventType::RankChange,
                        CorrectionPayload {
                            platform,
                            delta_xp: 0,
                            delta_balance: 0,
                            rank_id: Some(rank_id),
                        },
                    )?
                {
                    emitted += 1;
                }
            }
        }

        self.state.record_reconcile(user_id);
        if emitted > 0 {
            self.state.record_reconcile_error(user_id);
            Ok(UserReconcile::Corrected { events: emitted })
        } else {
            Ok(UserReconcile::Clean)
        }
    }

    /// Reconcile every user due this pass
    ///
    /// Selection follows the tracker's due-user ordering: never-reconciled
    /// users first, then oldest, bounded by `reconcile_batch_size`. A pass
    /// with nobody due reports [`ReconcileOutcome::NoUsers`], distinct
    /// from examining users and finding zero drift.
    pub fn reconcile_due_users(&self) -> ReconcileOutcome {
        let window = chrono::Duration::minutes(self.config.reconcile_interval_minutes as i64);
        let due = self
            .state
            .users_needing_reconcile(Utc::now() - window, self.config.reconcile_batch_size);

        if due.is_empty() {
            return ReconcileOutcome::NoUsers;
        }

        let mut summary = ReconcileSummary::default();
        for user_id in due {
            summary.examined += 1;
            match self.reconcile_user(user_id) {
                Ok(UserReconcile::Clean) => summary.clean += 1,
                Ok(UserReconcile::Corrected { events }) => {
                    summary.corrected_users += 1;
                    summary.corrective_events += events;
                }
                Ok(UserReconcile::Initialized) => summary.initialized += 1,
                Ok(UserReconcile::NoAccount) => summary.missing_accounts += 1,
                Err(error) => {
                    summary.errors += 1;
                    self.state.record_reconcile_error(user_id);
                    warn!(user_id, %error, "reconcile failed for user");
                }
            }
        }
        ReconcileOutcome::Completed(summary)
    }

    /// Whether an unapplied correction already targets this dimension
    fn has_inflight_correction(
        &self,
        user_id: UserId,
        event_type: EventType,
        platform: Platform,
    ) -> bool {
        let recent = self.store.events_for_user(user_id, INFLIGHT_SCAN_LIMIT);
        recent.iter().any(|candidate| {
            candidate.source == EventSource::Reconcile
                && candidate.event_type == event_type
                && matches!(
                    candidate.status,
                    EventStatus::Pending | EventStatus::Processing
                )
                && candidate
                    .parsed_payload::<CorrectionPayload>()
                    .map(|payload| payload.platform == platform)
                    .unwrap_or(false)
        })
    }

    /// Append a corrective event; `false` when it deduplicated away
    fn append_correction(
        &self,
        user_id: UserId,
        event_type: EventType,
        payload: CorrectionPayload,
    ) -> Result<bool, SyncError> {
        let entity = format!("{}_{}", payload.platform, event_type);
        let key = idempotency_key(
            EventSource::Reconcile,
            event_type,
            &entity,
            user_id,
            Some(Utc::now().timestamp_millis()),
        );
        let event = SyncEvent::new(
            key,
            EventSource::Reconcile,
            event_type,
            user_id,
            json!({
                "platform": payload.platform,
                "delta_xp": payload.delta_xp,
                "delta_balance": payload.delta_balance,
                "rank_id": payload.rank_id,
            }),
        );

        match self.store.append(event) {
            Ok(_) => Ok(true),
            Err(error) if error.is_duplicate() => Ok(false),
            Err(error) => Err(error),
        }
    }

    // ------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------

    /// Append an `xp_change` event
    ///
    /// With an entity id the key is stable (safe against producer
    /// retries); without one, a timestamped key is derived.
    pub fn submit_xp_change(
        &self,
        source: EventSource,
        user_id: UserId,
        delta_xp: i64,
        reason: Option<String>,
        entity_id: Option<String>,
    ) -> Result<EventId, SyncError> {
        let key = self.producer_key(source, EventType::XpChange, entity_id.as_deref(), user_id);
        self.store.append(SyncEvent::new(
            key,
            source,
            EventType::XpChange,
            user_id,
            json!({ "delta_xp": delta_xp, "reason": reason, "entity_id": entity_id }),
        ))
    }

    /// Append a `balance_change` event
    pub fn submit_balance_change(
        &self,
        source: EventSource,
        user_id: UserId,
        delta_balance: i64,
        reason: Option<String>,
        entity_id: Option<String>,
    ) -> Result<EventId, SyncError> {
        let key =
            self.producer_key(source, EventType::BalanceChange, entity_id.as_deref(), user_id);
        self.store.append(SyncEvent::new(
            key,
            source,
            EventType::BalanceChange,
            user_id,
            json!({ "delta_balance": delta_balance, "reason": reason, "entity_id": entity_id }),
        ))
    }

    /// Append a `rank_change` announcement event
    pub fn submit_rank_change(
        &self,
        source: EventSource,
        user_id: UserId,
        old_rank: u8,
        new_rank: u8,
    ) -> Result<EventId, SyncError> {
        let entity = format!("rank_{}", new_rank);
        let key = self.producer_key(source, EventType::RankChange, Some(&entity), user_id);
        self.store.append(SyncEvent::new(
            key,
            source,
            EventType::RankChange,
            user_id,
            json!({ "old_rank": old_rank, "new_rank": new_rank }),
        ))
    }

    /// Append an `achievement_unlock` event
    ///
    /// The achievement id is the entity, so re-submitting the same unlock
    /// deduplicates at the store.
    pub fn submit_achievement(
        &self,
        source: EventSource,
        user_id: UserId,
        achievement_id: &str,
        reward_xp: i64,
        reward_coins: i64,
    ) -> Result<EventId, SyncError> {
        let key =
            self.producer_key(source, EventType::AchievementUnlock, Some(achievement_id), user_id);
        self.store.append(SyncEvent::new(
            key,
            source,
            EventType::AchievementUnlock,
            user_id,
            json!({
                "achievement_id": achievement_id,
                "reward_xp": reward_xp,
                "reward_coins": reward_coins,
            }),
        ))
    }

    /// Append a `reward_grant` event
    pub fn submit_reward(
        &self,
        source: EventSource,
        user_id: UserId,
        delta_xp: i64,
        delta_balance: i64,
        reason: Option<String>,
    ) -> Result<EventId, SyncError> {
        let key = self.producer_key(source, EventType::RewardGrant, None, user_id);
        self.store.append(SyncEvent::new(
            key,
            source,
            EventType::RewardGrant,
            user_id,
            json!({ "delta_xp": delta_xp, "delta_balance": delta_balance, "reason": reason }),
        ))
    }

    /// Derive a producer key: stable with an entity, timestamped without
    fn producer_key(
        &self,
        source: EventSource,
        event_type: EventType,
        entity_id: Option<&str>,
        user_id: UserId,
    ) -> String {
        match entity_id {
            Some(entity) => idempotency_key(source, event_type, entity, user_id, None),
            None => idempotency_key(
                source,
                event_type,
                "adhoc",
                user_id,
                Some(Utc::now().timestamp_millis()),
            ),
        }
    }
}
