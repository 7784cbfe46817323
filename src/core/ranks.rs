//! Unified rank ladder
//!
//! Twenty ranks shared by every platform, from F I up to S II. A user's
//! rank is derived from canonical XP alone; rank-ups credit the new
//! rank's coin reward.

/// One rung of the rank ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    /// Ladder position, 1-based
    pub id: u8,
    /// Letter tier (F, E, D, C, B, A, S)
    pub tier: &'static str,
    /// Star count within the tier (1-3)
    pub stars: u8,
    /// Minimum canonical XP for this rank
    pub required_xp: i64,
    /// Coins credited when this rank is first reached
    pub reward_coins: i64,
}

impl Rank {
    /// Human-readable name, e.g. "D II"
    pub fn name(&self) -> String {
        format!("{} {}", self.tier, "I".repeat(self.stars as usize))
    }
}

/// Highest rank id on the ladder
pub const MAX_RANK_ID: u8 = 20;

/// The full ladder, ordered by `required_xp` ascending
pub static RANKS: [Rank; 20] = [
    Rank { id: 1, tier: "F", stars: 1, required_xp: 0, reward_coins: 0 },
    Rank { id: 2, tier: "F", stars: 2, required_xp: 500, reward_coins: 50 },
    Rank { id: 3, tier: "F", stars: 3, required_xp: 1250, reward_coins: 100 },
    Rank { id: 4, tier: "E", stars: 1, required_xp: 2250, reward_coins: 150 },
    Rank { id: 5, tier: "E", stars: 2, required_xp: 3500, reward_coins: 200 },
    Rank { id: 6, tier: "E", stars: 3, required_xp: 5000, reward_coins: 300 },
    Rank { id: 7, tier: "D", stars: 1, required_xp: 6750, reward_coins: 400 },
    Rank { id: 8, tier: "D", stars: 2, required_xp: 8750, reward_coins: 500 },
    Rank { id: 9, tier: "D", stars: 3, required_xp: 11_000, reward_coins: 700 },
    Rank { id: 10, tier: "C", stars: 1, required_xp: 13_500, reward_coins: 900 },
    Rank { id: 11, tier: "C", stars: 2, required_xp: 16_250, reward_coins: 1200 },
    Rank { id: 12, tier: "C", stars: 3, required_xp: 19_250, reward_coins: 1500 },
    Rank { id: 13, tier: "B", stars: 1, required_xp: 22_500, reward_coins: 2000 },
    Rank { id: 14, tier: "B", stars: 2, required_xp: 26_000, reward_coins: 2500 },
    Rank { id: 15, tier: "B", stars: 3, required_xp: 29_750, reward_coins: 3000 },
    Rank { id: 16, tier: "A", stars: 1, required_xp: 33_750, reward_coins: 4000 },
    Rank { id: 17, tier: "A", stars: 2, required_xp: 38_000, reward_coins: 5000 },
    Rank { id: 18, tier: "A", stars: 3, required_xp: 42_500, reward_coins: 7000 },
    Rank { id: 19, tier: "S", stars: 1, required_xp: 47_250, reward_coins: 10_000 },
    Rank { id: 20, tier: "S", stars: 2, required_xp: 52_250, reward_coins: 15_000 },
];

/// Highest rank whose XP requirement is met
///
/// Negative XP clamps to the first rank.
pub fn rank_for_xp(xp: i64) -> &'static Rank {
    let mut current = &RANKS[0];
    for rank in RANKS.iter() {
        if xp >= rank.required_xp {
            current = rank;
        }
    }
    current
}

/// Look up a rank by id, falling back to the first rank when out of range
pub fn rank_by_id(rank_id: u8) -> &'static Rank {
    if (1..=MAX_RANK_ID).contains(&rank_id) {
        &RANKS[usize::from(rank_id) - 1]
    } else {
        &RANKS[0]
    }
}
