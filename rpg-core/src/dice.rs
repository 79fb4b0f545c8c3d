//! Dice rolling for checks, initiative and damage.
//!
//! All rolls take an explicit RNG so a session can replay a turn exactly.
//! [`turn_rng`] derives that RNG from the session seed and turn number.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard polyhedral dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
        }
    }

    /// Roll this die once.
    pub fn roll<R: Rng>(&self, rng: &mut R) -> i32 {
        rng.gen_range(1..=self.sides()) as i32
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// Roll a die with an arbitrary number of sides, treating anything below 2 as a d2.
pub fn roll_sides<R: Rng>(rng: &mut R, sides: u32) -> i32 {
    rng.gen_range(1..=sides.max(2)) as i32
}

/// The result of a d20 roll against a difficulty class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRoll {
    pub natural: i32,
    pub modifier: i32,
    pub total: i32,
    pub dc: i32,
}

impl CheckRoll {
    /// Roll d20 + modifier against `dc`.
    pub fn roll<R: Rng>(rng: &mut R, modifier: i32, dc: i32) -> Self {
        let natural = DieType::D20.roll(rng);
        Self {
            natural,
            modifier,
            total: natural + modifier,
            dc,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.total >= self.dc
    }
}

impl fmt::Display for CheckRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}{:+}) vs DC {}",
            self.total, self.natural, self.modifier, self.dc
        )
    }
}

/// Deterministic RNG for one turn of one session.
pub fn turn_rng(seed: u64, turn: u64) -> StdRng {
    // Spread consecutive turns across the seed space.
    StdRng::seed_from_u64(seed ^ turn.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_die_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for die in [DieType::D4, DieType::D8, DieType::D20] {
            for _ in 0..200 {
                let r = die.roll(&mut rng);
                assert!((1..=die.sides() as i32).contains(&r));
            }
        }
    }

    #[test]
    fn test_die_display() {
        assert_eq!(DieType::D6.to_string(), "d6");
        assert_eq!(DieType::D20.sides(), 20);
    }

    #[test]
    fn test_check_roll() {
        let mut rng = StdRng::seed_from_u64(1);
        let check = CheckRoll::roll(&mut rng, 3, 10);
        assert_eq!(check.total, check.natural + 3);
        assert_eq!(check.succeeded(), check.total >= 10);
    }

    #[test]
    fn test_turn_rng_is_deterministic() {
        let mut a = turn_rng(42, 3);
        let mut b = turn_rng(42, 3);
        for _ in 0..5 {
            assert_eq!(a.gen::<u32>(), b.gen::<u32>());
        }

        let mut first = turn_rng(42, 3);
        let mut second = turn_rng(42, 4);
        assert_ne!(first.gen::<u64>(), second.gen::<u64>());
    }
}
