//! Per-user sync state for drift detection
//!
//! This module defines the last-known values each platform has reported for
//! a user, the partial-update carrier used to record new observations, and
//! the drift predicates the reconcile worker evaluates against the
//! canonical record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::event::UserId;

/// A platform that keeps a local view of user state
///
/// Only the chat platforms hold snapshots; the web surface reads canonical
/// state directly and is never reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Telegram bot
    Telegram,

    /// Discord bot
    Discord,
}

impl Platform {
    /// All platforms with snapshots, in reconcile order
    pub const ALL: [Platform; 2] = [Platform::Telegram, Platform::Discord];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known values reported by one platform
///
/// `None` means the platform has never reported that field. Unreported
/// fields are not drift: there is nothing to correct until the platform
/// has a view at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    /// Last XP value the platform reported
    pub xp: Option<i64>,

    /// Last coin balance the platform reported
    pub balance: Option<i64>,

    /// Last rank id the platform reported
    pub rank_id: Option<u8>,
}

/// Partial update to one platform snapshot
///
/// `None` fields are left unchanged, mirroring how platforms report single
/// facets (an XP change does not re-report balance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotUpdate {
    /// New XP value, if reported
    pub xp: Option<i64>,

    /// New balance value, if reported
    pub balance: Option<i64>,

    /// New rank id, if reported
    pub rank_id: Option<u8>,
}

impl PlatformSnapshot {
    /// Apply a partial update, leaving `None` fields untouched
    pub fn apply(&mut self, update: SnapshotUpdate) {
        if let Some(xp) = update.xp {
            self.xp = Some(xp);
        }
        if let Some(balance) = update.balance {
            self.balance = Some(balance);
        }
        if let Some(rank_id) = update.rank_id {
            self.rank_id = Some(rank_id);
        }
    }
}

/// Per-user sync state: one snapshot per platform plus reconcile bookkeeping
///
/// Created lazily on the first event (or reconcile pass) for a user and
/// updated indefinitely. Mutated only by the sync worker when applying
/// events and by the reconcile worker's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Canonical user this state belongs to
    pub user_id: UserId,

    /// Telegram's last-reported view
    pub telegram: PlatformSnapshot,

    /// Discord's last-reported view
    pub discord: PlatformSnapshot,

    /// When this user was last reconciled
    ///
    /// `None` until the first reconcile pass; unset sorts first in the
    /// due-user selection.
    pub last_reconcile_at: Option<DateTime<Utc>>,

    /// How many reconcile passes found drift for this user
    pub reconcile_errors: u32,

    /// When any field of this row last changed
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Create empty state for a user
    ///
    /// Both snapshots start unreported; the first applied event or
    /// reconcile initialization fills them in.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            telegram: PlatformSnapshot::default(),
            discord: PlatformSnapshot::default(),
            last_reconcile_at: None,
            reconcile_errors: 0,
            updated_at: Utc::now(),
        }
    }

    /// Borrow the snapshot for a platform
    pub fn snapshot(&self, platform: Platform) -> &PlatformSnapshot {
        match platform {
            Platform::Telegram => &self.telegram,
            Platform::Discord => &self.discord,
        }
    }

    /// Mutably borrow the snapshot for a platform
    pub fn snapshot_mut(&mut self, platform: Platform) -> &mut PlatformSnapshot {
        match platform {
            Platform::Telegram => &mut self.telegram,
            Platform::Discord => &mut self.discord,
        }
    }

    /// XP correction needed to bring a platform's view in line
    ///
    /// Returns the signed delta (canonical minus reported) when the
    /// absolute difference exceeds `threshold`; `None` when within
    /// tolerance or never reported.
    pub fn xp_correction(
        &self,
        platform: Platform,
        canonical_xp: i64,
        threshold: i64,
    ) -> Option<i64> {
        let reported = self.snapshot(platform).xp?;
        let delta = canonical_xp.saturating_sub(reported);
        if delta.saturating_abs() > threshold {
            Some(delta)
        } else {
            None
        }
    }

    /// Balance correction needed to bring a platform's view in line
    ///
    /// Same contract as [`SyncState::xp_correction`].
    pub fn balance_correction(
        &self,
        platform: Platform,
        canonical_balance: i64,
        threshold: i64,
    ) -> Option<i64> {
        let reported = self.snapshot(platform).balance?;
        let delta = canonical_balance.saturating_sub(reported);
        if delta.saturating_abs() > threshold {
            Some(delta)
        } else {
            None
        }
    }

    /// Canonical rank id to set when a platform's reported rank mismatches
    ///
    /// Rank drift is exact-match: any reported rank other than the
    /// canonical one needs correction. Returns `None` when in agreement or
    /// never reported.
    pub fn rank_correction(&self, platform: Platform, canonical_rank: u8) -> Option<u8> {
        let reported = self.snapshot(platform).rank_id?;
        if reported != canonical_rank {
            Some(canonical_rank)
        } else {
            None
        }
    }

    /// Whether a platform's XP view drifted beyond the threshold
    pub fn has_xp_diff(&self, platform: Platform, canonical_xp: i64, threshold: i64) -> bool {
        self.xp_correction(platform, canonical_xp, threshold).is_some()
    }

    /// Whether a platform's balance view drifted beyond the threshold
    pub fn has_balance_diff(
        &self,
        platform: Platform,
        canonical_balance: i64,
        threshold: i64,
    ) -> bool {
        self.balance_correction(platform, canonical_balance, threshold)
            .is_some()
    }

    /// Whether a platform's rank view mismatches the canonical rank
    pub fn has_rank_diff(&self, platform: Platform, canonical_rank: u8) -> bool {
        self.rank_correction(platform, canonical_rank).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_new_state_is_unreported() {
        let state = SyncState::new(7);
        assert_eq!(state.telegram, PlatformSnapshot::default());
        assert_eq!(state.discord, PlatformSnapshot::default());
        assert!(state.last_reconcile_at.is_none());
        assert_eq!(state.reconcile_errors, 0);
    }

    #[test]
    fn test_snapshot_update_is_partial() {
        let mut snapshot = PlatformSnapshot {
            xp: Some(100),
            balance: Some(50),
            rank_id: Some(2),
        };

        snapshot.apply(SnapshotUpdate {
            xp: Some(130),
            ..Default::default()
        });

        assert_eq!(snapshot.xp, Some(130));
        assert_eq!(snapshot.balance, Some(50));
        assert_eq!(snapshot.rank_id, Some(2));
    }

    #[rstest]
    #[case::beyond_threshold(100, 130, 10, Some(30))]
    #[case::negative_drift(130, 100, 10, Some(-30))]
    #[case::at_threshold(100, 110, 10, None)]
    #[case::within_threshold(100, 105, 10, None)]
    #[case::exact_match(130, 130, 10, None)]
    fn test_xp_correction(
        #[case] reported: i64,
        #[case] canonical: i64,
        #[case] threshold: i64,
        #[case] expected: Option<i64>,
    ) {
        let mut state = SyncState::new(1);
        state.telegram.xp = Some(reported);

        assert_eq!(
            state.xp_correction(Platform::Telegram, canonical, threshold),
            expected
        );
        assert_eq!(
            state.has_xp_diff(Platform::Telegram, canonical, threshold),
            expected.is_some()
        );
    }

    #[test]
    fn test_unreported_field_is_not_drift() {
        let state = SyncState::new(1);
        assert_eq!(state.xp_correction(Platform::Telegram, 1000, 10), None);
        assert_eq!(state.balance_correction(Platform::Discord, 1000, 10), None);
        assert_eq!(state.rank_correction(Platform::Telegram, 5), None);
    }

    #[rstest]
    #[case::mismatch(3, 5, Some(5))]
    #[case::match_(5, 5, None)]
    fn test_rank_correction(
        #[case] reported: u8,
        #[case] canonical: u8,
        #[case] expected: Option<u8>,
    ) {
        let mut state = SyncState::new(1);
        state.discord.rank_id = Some(reported);

        assert_eq!(state.rank_correction(Platform::Discord, canonical), expected);
        assert_eq!(
            state.has_rank_diff(Platform::Discord, canonical),
            expected.is_some()
        );
    }

    #[test]
    fn test_balance_correction_uses_threshold() {
        let mut state = SyncState::new(1);
        state.discord.balance = Some(500);

        assert_eq!(state.balance_correction(Platform::Discord, 515, 10), Some(15));
        assert_eq!(state.balance_correction(Platform::Discord, 509, 10), None);
    }

    #[test]
    fn test_snapshot_accessors_pick_the_right_platform() {
        let mut state = SyncState::new(1);
        state.snapshot_mut(Platform::Telegram).xp = Some(10);
        state.snapshot_mut(Platform::Discord).xp = Some(20);

        assert_eq!(state.snapshot(Platform::Telegram).xp, Some(10));
        assert_eq!(state.snapshot(Platform::Discord).xp, Some(20));
    }
}
