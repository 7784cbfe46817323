//! Thread-safe per-user sync state tracking
//!
//! This module provides the `SyncStateTracker` struct, which records the
//! last values each platform was known to hold for every user. Drift
//! detection during reconciliation compares these snapshots against the
//! canonical record; the snapshots are observations, never a source of
//! truth.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::{Platform, SnapshotUpdate, SyncState, UserId};

/// Thread-safe store of per-user platform snapshots
///
/// A row is created the first time a user's event applies or the first
/// time reconciliation examines the user. Rows are updated under their
/// entry lock, so concurrent snapshot updates for the same user are
/// serialized.
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads concurrently.
#[derive(Debug, Default)]
pub struct SyncStateTracker {
    /// Sync state rows by user id
    states: DashMap<UserId, SyncState>,
}

impl SyncStateTracker {
    /// Create a new empty tracker
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Get a user's sync state
    pub fn get(&self, user_id: UserId) -> Option<SyncState> {
        self.states.get(&user_id).map(|entry| entry.clone())
    }

    /// Create an empty row for a user if none exists
    ///
    /// # Returns
    ///
    /// * `true` if a row was created
    /// * `false` if the user already had one
    pub fn initialize_if_absent(&self, user_id: UserId) -> bool {
        let mut created = false;
        self.states.entry(user_id).or_insert_with(|| {
            created = true;
            SyncState::new(user_id)
        });
        created
    }

    /// Apply a partial snapshot update for one platform
    ///
    /// Creates the row if absent. Fields left `None` in the update keep
    /// their current value; the other platform's snapshot is untouched.
    pub fn upsert(&self, user_id: UserId, platform: Platform, update: SnapshotUpdate) {
        let mut entry = self
            .states
            .entry(user_id)
            .or_insert_with(|| SyncState::new(user_id));
        entry.snapshot_mut(platform).apply(update);
        entry.updated_at = Utc::now();
    }

    /// Adjust one platform snapshot by deltas, setting rank outright
    ///
    /// The read-modify-write runs under the row's entry lock, so a
    /// concurrent snapshot update cannot be lost. Unreported XP/balance
    /// fields are treated as zero; a zero delta leaves the field alone.
    /// Used when applying corrective events.
    pub fn adjust(
        &self,
        user_id: UserId,
        platform: Platform,
        delta_xp: i64,
        delta_balance: i64,
        rank_id: Option<u8>,
    ) {
        let mut entry = self
            .states
            .entry(user_id)
            .or_insert_with(|| SyncState::new(user_id));
        let snapshot = entry.snapshot_mut(platform);
        if delta_xp != 0 {
            snapshot.xp = Some(snapshot.xp.unwrap_or(0).saturating_add(delta_xp));
        }
        if delta_balance != 0 {
            snapshot.balance = Some(snapshot.balance.unwrap_or(0).saturating_add(delta_balance));
        }
        if rank_id.is_some() {
            snapshot.rank_id = rank_id;
        }
        entry.updated_at = Utc::now();
    }

    /// Record that a user was just reconciled
    pub fn record_reconcile(&self, user_id: UserId) {
        if let Some(mut entry) = self.states.get_mut(&user_id) {
            entry.last_reconcile_at = Some(Utc::now());
            entry.updated_at = Utc::now();
        }
    }

    /// Bump a user's reconcile error counter
    pub fn record_reconcile_error(&self, user_id: UserId) {
        if let Some(mut entry) = self.states.get_mut(&user_id) {
            entry.reconcile_errors += 1;
            entry.updated_at = Utc::now();
        }
    }

    /// Users due for reconciliation, never-reconciled first
    ///
    /// Selects rows whose `last_reconcile_at` is unset or older than
    /// `older_than`, ordered with unset first and then oldest first,
    /// capped at `limit`.
    pub fn users_needing_reconcile(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Vec<UserId> {
        let mut due: Vec<(Option<DateTime<Utc>>, UserId)> = self
            .states
            .iter()
            .filter(|entry| {
                entry
                    .last_reconcile_at
                    .is_none_or(|at| at < older_than)
            })
            .map(|entry| (entry.last_reconcile_at, entry.user_id))
            .collect();
        due.sort_unstable();
        due.truncate(limit);
        due.into_iter().map(|(_, user_id)| user_id).collect()
    }

    /// All sync state rows
    pub fn all(&self) -> Vec<SyncState> {
        self.states.iter().map(|entry| entry.clone()).collect()
    }

    /// Number of tracked users
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no users are tracked
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_initialize_if_absent_creates_once() {
        let tracker = SyncStateTracker::new();

        assert!(tracker.initialize_if_absent(1));
        assert!(!tracker.initialize_if_absent(1));

        let state = tracker.get(1).unwrap();
        assert_eq!(state.user_id, 1);
        assert!(state.telegram.xp.is_none());
        assert!(state.last_reconcile_at.is_none());
    }

    #[test]
    fn test_upsert_creates_and_applies_partial_update() {
        let tracker = SyncStateTracker::new();

        tracker.upsert(
            1,
            Platform::Telegram,
            SnapshotUpdate {
                xp: Some(100),
                ..SnapshotUpdate::default()
            },
        );
        tracker.upsert(
            1,
            Platform::Telegram,
            SnapshotUpdate {
                balance: Some(50),
                rank_id: Some(2),
                ..SnapshotUpdate::default()
            },
        );

        let state = tracker.get(1).unwrap();
        assert_eq!(state.telegram.xp, Some(100));
        assert_eq!(state.telegram.balance, Some(50));
        assert_eq!(state.telegram.rank_id, Some(2));
    }

    #[test]
    fn test_upsert_leaves_other_platform_untouched() {
        let tracker = SyncStateTracker::new();
        tracker.upsert(
            1,
            Platform::Discord,
            SnapshotUpdate {
                xp: Some(300),
                ..SnapshotUpdate::default()
            },
        );

        tracker.upsert(
            1,
            Platform::Telegram,
            SnapshotUpdate {
                xp: Some(100),
                ..SnapshotUpdate::default()
            },
        );

        let state = tracker.get(1).unwrap();
        assert_eq!(state.discord.xp, Some(300));
        assert_eq!(state.telegram.xp, Some(100));
    }

    #[test]
    fn test_adjust_applies_deltas_and_sets_rank() {
        let tracker = SyncStateTracker::new();
        tracker.upsert(
            1,
            Platform::Telegram,
            SnapshotUpdate {
                xp: Some(100),
                balance: Some(40),
                rank_id: Some(1),
            },
        );

        tracker.adjust(1, Platform::Telegram, 30, -15, Some(2));

        let snapshot = tracker.get(1).unwrap().telegram;
        assert_eq!(snapshot.xp, Some(130));
        assert_eq!(snapshot.balance, Some(25));
        assert_eq!(snapshot.rank_id, Some(2));
    }

    #[test]
    fn test_adjust_treats_unreported_as_zero() {
        let tracker = SyncStateTracker::new();
        tracker.initialize_if_absent(1);

        tracker.adjust(1, Platform::Discord, 30, 0, None);

        let snapshot = tracker.get(1).unwrap().discord;
        assert_eq!(snapshot.xp, Some(30));
        assert_eq!(snapshot.balance, None);
        assert_eq!(snapshot.rank_id, None);
    }

    #[test]
    fn test_record_reconcile_sets_timestamp() {
        let tracker = SyncStateTracker::new();
        tracker.initialize_if_absent(1);

        tracker.record_reconcile(1);

        assert!(tracker.get(1).unwrap().last_reconcile_at.is_some());
    }

    #[test]
    fn test_record_reconcile_error_increments() {
        let tracker = SyncStateTracker::new();
        tracker.initialize_if_absent(1);

        tracker.record_reconcile_error(1);
        tracker.record_reconcile_error(1);

        assert_eq!(tracker.get(1).unwrap().reconcile_errors, 2);
    }

    #[test]
    fn test_users_needing_reconcile_never_reconciled_first() {
        let tracker = SyncStateTracker::new();
        let now = Utc::now();

        tracker.initialize_if_absent(1); // never reconciled
        tracker.initialize_if_absent(2);
        tracker.initialize_if_absent(3);
        tracker
            .states
            .get_mut(&2)
            .unwrap()
            .last_reconcile_at = Some(now - Duration::hours(3));
        tracker
            .states
            .get_mut(&3)
            .unwrap()
            .last_reconcile_at = Some(now - Duration::hours(2));

        let due = tracker.users_needing_reconcile(now - Duration::hours(1), 10);

        assert_eq!(due, vec![1, 2, 3]);
    }

    #[test]
    fn test_users_needing_reconcile_excludes_fresh_and_respects_limit() {
        let tracker = SyncStateTracker::new();
        let now = Utc::now();

        for user_id in 1..=5 {
            tracker.initialize_if_absent(user_id);
        }
        tracker
            .states
            .get_mut(&5)
            .unwrap()
            .last_reconcile_at = Some(now);

        let due = tracker.users_needing_reconcile(now - Duration::hours(1), 2);

        assert_eq!(due.len(), 2);
        assert!(!due.contains(&5));
    }

    #[test]
    fn test_concurrent_upserts_same_user() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(SyncStateTracker::new());
        let mut handles = vec![];

        for i in 0..10 {
            let tracker_clone = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                tracker_clone.upsert(
                    1,
                    Platform::Telegram,
                    SnapshotUpdate {
                        xp: Some(i * 100),
                        ..SnapshotUpdate::default()
                    },
                );
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.len(), 1);
        assert!(tracker.get(1).unwrap().telegram.xp.is_some());
    }
}
