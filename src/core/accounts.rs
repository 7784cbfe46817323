//! Thread-safe canonical account store
//!
//! This module provides the `AccountStore` struct, holding the canonical
//! record of every user: XP, coin balance, rank, and unlocked
//! achievements. Platform snapshots may drift; this store is what they
//! drift from.
//!
//! # Thread Safety
//!
//! Accounts live in a `DashMap` and every mutation runs under the
//! account's entry lock, so rank recomputation and reward crediting are
//! atomic with the XP change that triggered them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::ranks::{self, Rank};
use crate::types::{SyncError, UserId};

/// Canonical record for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Canonical user id
    pub user_id: UserId,
    /// Canonical experience points
    pub xp: i64,
    /// Canonical coin balance
    pub coins: i64,
    /// Current rank id, derived from XP
    pub rank_id: u8,
    /// Ids of unlocked achievements
    pub achievements: BTreeSet<String>,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// When the account last changed
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a fresh account at the bottom of the rank ladder
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            xp: 0,
            coins: 0,
            rank_id: 1,
            achievements: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The account's current rank
    pub fn rank(&self) -> &'static Rank {
        ranks::rank_by_id(self.rank_id)
    }

    /// Apply an XP delta, recomputing rank and crediting rank-up rewards
    ///
    /// The rank is always set to match the new XP. Coins are credited only
    /// on an upward transition, and only the new rank's reward; dropping
    /// back down never claws rewards back. Degenerate deltas saturate at
    /// the i64 bounds instead of wrapping.
    pub fn apply_xp(&mut self, delta_xp: i64) -> XpApplied {
        let old_rank_id = self.rank_id;
        self.xp = self.xp.saturating_add(delta_xp);
        let new_rank = ranks::rank_for_xp(self.xp);
        self.rank_id = new_rank.id;

        let reward_coins = if new_rank.id > old_rank_id {
            new_rank.reward_coins
        } else {
            0
        };
        self.coins = self.coins.saturating_add(reward_coins);

        XpApplied {
            xp: self.xp,
            coins: self.coins,
            old_rank_id,
            new_rank_id: new_rank.id,
            reward_coins,
        }
    }
}

/// Result of applying an XP delta to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpApplied {
    /// XP after the delta
    pub xp: i64,
    /// Coins after any rank-up reward
    pub coins: i64,
    /// Rank before the delta
    pub old_rank_id: u8,
    /// Rank after the delta
    pub new_rank_id: u8,
    /// Coins credited for the rank-up, zero otherwise
    pub reward_coins: i64,
}

impl XpApplied {
    /// Whether the delta moved the account up the ladder
    pub fn rank_up(&self) -> bool {
        self.new_rank_id > self.old_rank_id
    }
}

/// Result of an achievement unlock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementOutcome {
    /// The achievement was already on the account; nothing was granted
    AlreadyUnlocked,
    /// First unlock; rewards were applied
    Unlocked(XpApplied),
}

/// Thread-safe store of canonical user accounts
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads concurrently.
/// Mutations hold the account's entry lock for their full duration, so
/// concurrent deltas to the same account serialize and never lose
/// updates.
#[derive(Debug, Default)]
pub struct AccountStore {
    /// Accounts by user id
    accounts: DashMap<UserId, UserAccount>,
}

impl AccountStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Get an existing account or create a fresh one
    pub fn get_or_create(&self, user_id: UserId) -> UserAccount {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id))
            .clone()
    }

    /// Get an account
    pub fn get(&self, user_id: UserId) -> Option<UserAccount> {
        self.accounts.get(&user_id).map(|entry| entry.clone())
    }

    /// Whether an account exists
    pub fn exists(&self, user_id: UserId) -> bool {
        self.accounts.contains_key(&user_id)
    }

    /// Update an account using a closure
    ///
    /// The closure runs under the account's entry lock. Fails with
    /// [`SyncError::UnknownUser`] if the account does not exist.
    pub fn update<F>(&self, user_id: UserId, f: F) -> Result<UserAccount, SyncError>
    where
        F: FnOnce(&mut UserAccount) -> Result<(), SyncError>,
    {
        let mut entry = self
            .accounts
            .get_mut(&user_id)
            .ok_or(SyncError::UnknownUser { user_id })?;
        f(entry.value_mut())?;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Apply an XP delta, returning the rank transition
    pub fn apply_xp_delta(&self, user_id: UserId, delta_xp: i64) -> Result<XpApplied, SyncError> {
        let mut entry = self
            .accounts
            .get_mut(&user_id)
            .ok_or(SyncError::UnknownUser { user_id })?;
        let applied = entry.apply_xp(delta_xp);
        entry.updated_at = Utc::now();
        Ok(applied)
    }

    /// Apply a coin delta, returning the new balance
    ///
    /// Saturates at the i64 bounds instead of wrapping.
    pub fn add_coins(&self, user_id: UserId, delta_coins: i64) -> Result<i64, SyncError> {
        let mut entry = self
            .accounts
            .get_mut(&user_id)
            .ok_or(SyncError::UnknownUser { user_id })?;
        entry.coins = entry.coins.saturating_add(delta_coins);
        entry.updated_at = Utc::now();
        Ok(entry.coins)
    }

    /// Unlock an achievement, granting its rewards on first unlock
    ///
    /// Repeat unlocks grant nothing. The unlock, XP reward, possible
    /// rank-up, and coin reward all happen under one entry lock.
    pub fn unlock_achievement(
        &self,
        user_id: UserId,
        achievement_id: &str,
        reward_xp: i64,
        reward_coins: i64,
    ) -> Result<AchievementOutcome, SyncError> {
        let mut entry = self
            .accounts
            .get_mut(&user_id)
            .ok_or(SyncError::UnknownUser { user_id })?;

        if !entry.achievements.insert(achievement_id.to_string()) {
            return Ok(AchievementOutcome::AlreadyUnlocked);
        }

        let mut applied = entry.apply_xp(reward_xp);
        entry.coins = entry.coins.saturating_add(reward_coins);
        applied.coins = entry.coins;
        entry.updated_at = Utc::now();
        Ok(AchievementOutcome::Unlocked(applied))
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the store holds no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
