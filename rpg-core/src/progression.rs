//! Experience and leveling.

use crate::world::{Ability, Player};
use serde::{Deserialize, Serialize};

pub const MAX_LEVEL: u8 = 20;

/// Total XP required to reach each level, indexed by `level - 1`.
pub const XP_THRESHOLDS: [u32; MAX_LEVEL as usize] = [
    0, 50, 250, 600, 1200, 2100, 3300, 4800, 6600, 8700, 11100, 13800, 16800, 20100, 23700, 27600,
    31800, 36300, 41100, 46200,
];

/// Level for a given XP total.
pub fn level_for_xp(xp: u32) -> u8 {
    XP_THRESHOLDS.iter().take_while(|&&t| xp >= t).count() as u8
}

/// XP still needed for the next level, or `None` at the cap.
pub fn xp_to_next_level(level: u8, xp: u32) -> Option<u32> {
    XP_THRESHOLDS
        .get(level as usize)
        .map(|threshold| threshold.saturating_sub(xp))
}

/// What an XP award did to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAward {
    pub gained: u32,
    pub total: u32,
    pub old_level: u8,
    pub new_level: u8,
    pub hp_gained: i32,
}

impl XpAward {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Add XP and apply any level-ups.
///
/// Every level gained raises max HP by max(1, CON modifier) and heals the same amount.
pub fn award_xp(player: &mut Player, amount: u32) -> XpAward {
    let old_level = player.level;
    player.experience = player.experience.saturating_add(amount);
    let new_level = level_for_xp(player.experience).max(old_level);

    let per_level = player.abilities.modifier(Ability::Constitution).max(1);
    let hp_gained = per_level * i32::from(new_level - old_level);
    if hp_gained > 0 {
        player.hit_points.maximum += hp_gained;
        player.hit_points.current += hp_gained;
    }
    player.level = new_level;

    XpAward {
        gained: amount,
        total: player.experience,
        old_level,
        new_level,
        hp_gained,
    }
}
