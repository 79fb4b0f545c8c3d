//! Turn-based combat.
//!
//! A [`CombatEncounter`] is an explicit state machine holding encounter-scoped
//! [`Combatant`] snapshots. The [`CombatEngine`] drives it: it rolls
//! initiative, runs NPC turns, enforces the invalid-action limit and, when the
//! fight ends, folds the snapshots back into the player and NPC records.
//! All tunable numbers live in [`CombatPolicy`].

pub mod actions;
mod engine;

pub use engine::{CombatEngine, CombatReport, Resolution};

use crate::dice::{roll_sides, CheckRoll};
use crate::world::{name_key, Ability, HitPoints, InvariantBreach, Npc, Player};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

/// Index of a combatant within its encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombatantId(pub u32);

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player,
    Ally,
    Enemy,
}

impl Side {
    pub fn opposes(self, other: Side) -> bool {
        (self == Side::Enemy) != (other == Side::Enemy)
    }
}

/// Where a combatant came from, so results can be written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Player,
    Npc(String),
}

/// An action a combatant may take on its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatAction {
    Attack,
    Defend,
    Flee,
    UseItem,
    Pass,
}

impl CombatAction {
    pub fn tool_name(&self) -> &'static str {
        match self {
            CombatAction::Attack => "attack",
            CombatAction::Defend => "defend",
            CombatAction::Flee => "flee",
            CombatAction::UseItem => "use_item",
            CombatAction::Pass => "pass",
        }
    }
}

/// An encounter-scoped snapshot of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    pub side: Side,
    pub origin: Origin,
    pub hit_points: HitPoints,
    pub defense: i32,
    pub attack_modifier: i32,
    pub damage_die: u32,
    pub initiative_modifier: i32,
    /// Secondary initiative key; higher wins ties.
    pub tiebreak: u8,
    pub initiative: i32,
    pub actions: Vec<CombatAction>,
    pub defending: bool,
    pub defeated: bool,
    pub xp_reward: u32,
    pub gold: u32,
}

impl Combatant {
    pub fn from_player(id: CombatantId, player: &Player, policy: &CombatPolicy) -> Self {
        let (attack_modifier, damage_die) = player.attack_profile(policy.unarmed_damage_die);
        Self {
            id,
            name: player.name.clone(),
            side: Side::Player,
            origin: Origin::Player,
            hit_points: player.hit_points,
            defense: player.armor_defense(),
            attack_modifier,
            damage_die,
            initiative_modifier: player.abilities.modifier(Ability::Dexterity),
            tiebreak: player.abilities.dexterity,
            initiative: 0,
            actions: vec![
                CombatAction::Attack,
                CombatAction::Defend,
                CombatAction::Flee,
                CombatAction::UseItem,
                CombatAction::Pass,
            ],
            defending: false,
            defeated: player.hit_points.is_down(),
            xp_reward: 0,
            gold: 0,
        }
    }

    pub fn from_npc(id: CombatantId, npc: &Npc, side: Side) -> Self {
        Self {
            id,
            name: npc.name.clone(),
            side,
            origin: Origin::Npc(npc.key()),
            hit_points: npc.hit_points,
            defense: npc.defense,
            attack_modifier: npc.attack_bonus,
            damage_die: npc.damage_die,
            initiative_modifier: npc.initiative_modifier,
            tiebreak: npc.dexterity,
            initiative: 0,
            actions: vec![CombatAction::Attack, CombatAction::Defend, CombatAction::Pass],
            defending: false,
            defeated: npc.hit_points.is_down(),
            xp_reward: npc.xp_reward,
            gold: npc.gold,
        }
    }

    pub fn can(&self, action: CombatAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn is_standing(&self) -> bool {
        !self.defeated
    }
}

/// How an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatOutcome {
    Victory,
    Defeat,
    Fled,
}

impl fmt::Display for CombatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CombatOutcome::Victory => "victory",
            CombatOutcome::Defeat => "defeat",
            CombatOutcome::Fled => "fled",
        })
    }
}

/// Encounter state. `NotInCombat` is the absence of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterPhase {
    Initiative,
    ActiveRound(u32),
    Resolved(CombatOutcome),
}

/// Tunable combat rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatPolicy {
    pub initiative_die: u32,
    /// Armor class before defense: an attack hits when d20 + modifier meets base + defense.
    pub base_armor_class: i32,
    /// Natural d20 roll at or above which an attack is a critical hit.
    pub critical_threshold: i32,
    /// Floor for damage from a landed attack; never below zero.
    pub min_damage: i32,
    /// Added to both armor class and damage reduction while defending.
    pub defend_bonus: i32,
    /// Chance that fleeing an ambush succeeds. Outside an ambush fleeing always works.
    pub ambush_flee_chance: f64,
    /// Consecutive invalid actions before a combatant is forced to pass.
    pub invalid_action_limit: u8,
    pub unarmed_damage_die: u32,
}

impl Default for CombatPolicy {
    fn default() -> Self {
        Self {
            initiative_die: 20,
            base_armor_class: 10,
            critical_threshold: 20,
            min_damage: 1,
            defend_bonus: 2,
            ambush_flee_chance: 0.5,
            invalid_action_limit: 3,
            unarmed_damage_die: 4,
        }
    }
}

impl CombatPolicy {
    pub fn roll_initiative<R: Rng>(&self, rng: &mut R, modifier: i32) -> i32 {
        roll_sides(rng, self.initiative_die) + modifier
    }

    pub fn armor_class(&self, defense: i32) -> i32 {
        self.base_armor_class + defense
    }

    /// d20 + modifier against `armor_class`. A natural 1 always misses; a
    /// natural roll at the critical threshold always hits and is critical.
    pub fn roll_attack<R: Rng>(&self, rng: &mut R, attack_modifier: i32, armor_class: i32) -> AttackRoll {
        let check = CheckRoll::roll(rng, attack_modifier, armor_class);
        let critical = check.natural >= self.critical_threshold.max(2);
        let hit = check.natural != 1 && (critical || check.succeeded());
        AttackRoll { check, hit, critical }
    }

    /// Roll damage dice for a hit; critical hits roll the die twice.
    pub fn roll_damage<R: Rng>(&self, rng: &mut R, damage_die: u32, critical: bool) -> i32 {
        let dice = if critical { 2 } else { 1 };
        (0..dice).map(|_| roll_sides(rng, damage_die)).sum()
    }

    /// Damage from a hit: modifier + roll - defense, floored at `min_damage`.
    pub fn damage(&self, attack_modifier: i32, roll: i32, defense: i32) -> i32 {
        (attack_modifier + roll - defense).max(self.min_damage.max(0))
    }

    pub fn flee_succeeds<R: Rng>(&self, rng: &mut R, ambush: bool) -> bool {
        !ambush || rng.gen_bool(self.ambush_flee_chance.clamp(0.0, 1.0))
    }
}

/// The to-hit part of an attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRoll {
    /// The d20 roll; its `dc` is the target's armor class.
    pub check: CheckRoll,
    pub hit: bool,
    pub critical: bool,
}

/// The record left behind once an encounter is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatSummary {
    pub outcome: CombatOutcome,
    pub rounds: u32,
    pub defeated: Vec<String>,
    pub xp: u32,
    pub gold: u32,
    pub new_level: Option<u8>,
}

impl fmt::Display for CombatSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Combat ended in {} after {} round(s)", self.outcome, self.rounds)?;
        if !self.defeated.is_empty() {
            write!(f, "; defeated: {}", self.defeated.join(", "))?;
        }
        if self.xp > 0 {
            write!(f, "; {} XP", self.xp)?;
        }
        if self.gold > 0 {
            write!(f, "; {} gold looted", self.gold)?;
        }
        if let Some(level) = self.new_level {
            write!(f, "; reached level {level}")?;
        }
        Ok(())
    }
}

/// A combatant as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantView {
    pub name: String,
    pub side: Side,
    pub hit_points: HitPoints,
    pub defeated: bool,
}

/// Combat status for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CombatStatus {
    NotInCombat,
    Active {
        round: u32,
        acting: Option<String>,
        order: Vec<CombatantView>,
    },
    Resolved(CombatSummary),
}

/// One fight, from initiative to resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatEncounter {
    pub phase: EncounterPhase,
    pub ambush: bool,
    combatants: Vec<Combatant>,
    queue: Vec<CombatantId>,
    turn: usize,
    round: u32,
    #[serde(default)]
    invalid_streaks: BTreeMap<CombatantId, u8>,
}

impl CombatEncounter {
    /// Build an encounter in the `Initiative` phase. Ids are assigned in insertion order.
    pub fn new(ambush: bool, mut combatants: Vec<Combatant>) -> Self {
        for (i, c) in combatants.iter_mut().enumerate() {
            c.id = CombatantId(i as u32);
        }
        Self {
            phase: EncounterPhase::Initiative,
            ambush,
            combatants,
            queue: Vec::new(),
            turn: 0,
            round: 0,
            invalid_streaks: BTreeMap::new(),
        }
    }

    /// Roll initiative and fix the turn order.
    ///
    /// Order: initiative descending, then tiebreak score descending, then insertion order.
    pub fn roll_initiative<R: Rng>(&mut self, rng: &mut R, policy: &CombatPolicy) {
        for c in &mut self.combatants {
            c.initiative = policy.roll_initiative(rng, c.initiative_modifier);
        }
        self.order_by_initiative();
    }

    /// Rebuild the turn queue from the current initiative scores.
    pub fn order_by_initiative(&mut self) {
        let mut order: Vec<&Combatant> = self.combatants.iter().filter(|c| c.is_standing()).collect();
        order.sort_by_key(|c| (Reverse(c.initiative), Reverse(c.tiebreak), c.id));
        self.queue = order.into_iter().map(|c| c.id).collect();
        self.turn = 0;
    }

    /// Move from `Initiative` to the first round.
    pub fn begin(&mut self) {
        if self.phase == EncounterPhase::Initiative {
            self.phase = EncounterPhase::ActiveRound(1);
            self.round = 1;
            self.turn = 0;
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, EncounterPhase::Resolved(_))
    }

    /// The current round, or the last one fought once resolved. Zero before the first round.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn combatants(&self) -> &[Combatant] {
        &self.combatants
    }

    pub fn turn_order(&self) -> &[CombatantId] {
        &self.queue
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.combatants.get(id.0 as usize)
    }

    pub fn combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.combatants.get_mut(id.0 as usize)
    }

    pub fn player(&self) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.side == Side::Player)
    }

    /// Carry mid-fight changes to the player into their snapshot: a raised
    /// maximum heals by the same amount, and gear sets attack and defense.
    pub fn refresh_player(&mut self, player: &Player, policy: &CombatPolicy) {
        let Some(c) = self.combatants.iter_mut().find(|c| c.origin == Origin::Player) else {
            return;
        };
        let gained = (player.hit_points.maximum - c.hit_points.maximum).max(0);
        c.hit_points.maximum = player.hit_points.maximum;
        if !c.defeated {
            c.hit_points.current = (c.hit_points.current + gained).clamp(0, c.hit_points.maximum);
        }
        let (attack_modifier, damage_die) = player.attack_profile(policy.unarmed_damage_die);
        c.attack_modifier = attack_modifier;
        c.damage_die = damage_die;
        c.defense = player.armor_defense();
    }

    /// Whose turn it is, once rounds have started.
    pub fn current_id(&self) -> Option<CombatantId> {
        match self.phase {
            EncounterPhase::ActiveRound(_) => self.queue.get(self.turn).copied(),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&Combatant> {
        self.current_id().and_then(|id| self.combatant(id))
    }

    /// Resolve a target name. "player" and similar words mean the player.
    pub fn find(&self, name: &str) -> Option<CombatantId> {
        let key = name_key(name);
        if matches!(key.as_str(), "player" | "me" | "self" | "you") {
            return self.player().map(|c| c.id);
        }
        self.combatants
            .iter()
            .find(|c| name_key(&c.name) == key)
            .map(|c| c.id)
    }

    /// Standing combatants on the other side from `id`.
    pub fn opponents_of(&self, id: CombatantId) -> Vec<CombatantId> {
        let Some(me) = self.combatant(id) else {
            return Vec::new();
        };
        self.combatants
            .iter()
            .filter(|c| c.is_standing() && me.side.opposes(c.side))
            .map(|c| c.id)
            .collect()
    }

    pub fn living_enemies(&self) -> usize {
        self.combatants
            .iter()
            .filter(|c| c.side == Side::Enemy && c.is_standing())
            .count()
    }

    /// Damage a combatant, marking it defeated at 0 HP. Returns (hp before, hp after, newly defeated).
    pub fn damage(&mut self, id: CombatantId, amount: i32) -> Option<(i32, i32, bool)> {
        let c = self.combatant_mut(id)?;
        let before = c.hit_points.current;
        c.hit_points.damage(amount);
        let newly = c.hit_points.is_down() && !c.defeated;
        if newly {
            c.defeated = true;
        }
        Some((before, c.hit_points.current, newly))
    }

    /// End the current combatant's turn and move to the next standing one.
    ///
    /// Wrapping past the end of the queue starts a new round with defeated
    /// combatants removed from the order.
    pub fn advance(&mut self) {
        let EncounterPhase::ActiveRound(round) = self.phase else {
            return;
        };
        self.turn += 1;
        while self
            .queue
            .get(self.turn)
            .and_then(|id| self.combatant(*id))
            .is_some_and(|c| c.defeated)
        {
            self.turn += 1;
        }
        if self.turn >= self.queue.len() {
            let combatants = &self.combatants;
            self.queue
                .retain(|id| combatants.get(id.0 as usize).is_some_and(Combatant::is_standing));
            self.phase = EncounterPhase::ActiveRound(round + 1);
            self.round = round + 1;
            self.turn = 0;
        }
        if let Some(id) = self.current_id() {
            if let Some(c) = self.combatant_mut(id) {
                c.defending = false;
            }
        }
    }

    /// Set and return the terminal outcome if the fight is over.
    pub fn check_resolution(&mut self) -> Option<CombatOutcome> {
        if let EncounterPhase::Resolved(outcome) = self.phase {
            return Some(outcome);
        }
        let outcome = if self.player().map_or(true, |p| p.defeated) {
            CombatOutcome::Defeat
        } else if self.living_enemies() == 0 {
            CombatOutcome::Victory
        } else {
            return None;
        };
        self.phase = EncounterPhase::Resolved(outcome);
        Some(outcome)
    }

    pub fn resolve(&mut self, outcome: CombatOutcome) {
        self.phase = EncounterPhase::Resolved(outcome);
    }

    /// Count an invalid action; returns the current streak.
    pub fn note_invalid(&mut self, id: CombatantId) -> u8 {
        let streak = self.invalid_streaks.entry(id).or_insert(0);
        *streak = streak.saturating_add(1);
        *streak
    }

    pub fn clear_invalid(&mut self, id: CombatantId) {
        self.invalid_streaks.remove(&id);
    }

    pub fn check_invariants(&self) -> Result<(), InvariantBreach> {
        if let Some(c) = self.combatants.iter().find(|c| !c.hit_points.in_bounds()) {
            return Err(InvariantBreach::HitPointsOutOfRange {
                who: c.name.clone(),
                current: c.hit_points.current,
                maximum: c.hit_points.maximum,
            });
        }
        if matches!(self.phase, EncounterPhase::ActiveRound(_)) && self.turn >= self.queue.len() {
            return Err(InvariantBreach::TurnOutOfRange {
                turn: self.turn,
                len: self.queue.len(),
            });
        }
        Ok(())
    }

    pub fn status(&self) -> CombatStatus {
        CombatStatus::Active {
            round: self.round(),
            acting: self.current().map(|c| c.name.clone()),
            order: self
                .queue
                .iter()
                .filter_map(|id| self.combatant(*id))
                .map(|c| CombatantView {
                    name: c.name.clone(),
                    side: c.side,
                    hit_points: c.hit_points,
                    defeated: c.defeated,
                })
                .collect(),
        }
    }

    /// Text block for the narrator's standing summary.
    pub fn describe(&self) -> String {
        let order: Vec<String> = self
            .queue
            .iter()
            .filter_map(|id| self.combatant(*id))
            .map(|c| {
                let mut entry = format!("{} [{:?}] HP {}", c.name, c.side, c.hit_points);
                if c.defeated {
                    entry.push_str(" defeated");
                } else if c.defending {
                    entry.push_str(" defending");
                }
                entry
            })
            .collect();
        let mut out = format!(
            "Combat: round {}{}\nTurn order: {}\n",
            self.round(),
            if self.ambush { " (ambush)" } else { "" },
            order.join(" -> ")
        );
        if let Some(c) = self.current() {
            out.push_str(&format!("Acting now: {}\n", c.name));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{AbilityScores, Disposition};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn encounter() -> CombatEncounter {
        let policy = CombatPolicy::default();
        let player = Player::new("Aria", "Ranger", AbilityScores::default(), 12);
        let mut goblin = Npc::new("Goblin", Disposition::Hostile, 7);
        goblin.dexterity = 14;
        let wolf = Npc::new("Wolf", Disposition::Hostile, 11);
        CombatEncounter::new(
            false,
            vec![
                Combatant::from_player(CombatantId(0), &player, &policy),
                Combatant::from_npc(CombatantId(0), &goblin, Side::Enemy),
                Combatant::from_npc(CombatantId(0), &wolf, Side::Enemy),
            ],
        )
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let enc = encounter();
        let ids: Vec<u32> = enc.combatants().iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(enc.find("player"), Some(CombatantId(0)));
        assert_eq!(enc.find("WOLF"), Some(CombatantId(2)));
        assert_eq!(enc.find("dragon"), None);
    }

    #[test]
    fn test_initiative_is_deterministic_for_seed() {
        let policy = CombatPolicy::default();
        let mut first = encounter();
        let mut second = encounter();
        first.roll_initiative(&mut StdRng::seed_from_u64(99), &policy);
        second.roll_initiative(&mut StdRng::seed_from_u64(99), &policy);
        assert_eq!(first.turn_order(), second.turn_order());
        assert_eq!(first.turn_order().len(), 3);
    }

    #[test]
    fn test_initiative_ties_use_tiebreak_then_insertion() {
        let mut enc = encounter();
        for c in &mut enc.combatants {
            c.initiative = 12;
            c.tiebreak = 14;
        }
        enc.order_by_initiative();
        assert_eq!(
            enc.turn_order(),
            &[CombatantId(0), CombatantId(1), CombatantId(2)]
        );

        enc.combatants[2].tiebreak = 18;
        enc.order_by_initiative();
        assert_eq!(
            enc.turn_order(),
            &[CombatantId(2), CombatantId(0), CombatantId(1)]
        );

        enc.combatants[1].initiative = 20;
        enc.order_by_initiative();
        assert_eq!(enc.turn_order()[0], CombatantId(1));
    }

    #[test]
    fn test_defeated_combatants_leave_the_queue() {
        let policy = CombatPolicy::default();
        let mut enc = encounter();
        enc.roll_initiative(&mut StdRng::seed_from_u64(5), &policy);
        enc.begin();
        assert_eq!(enc.round(), 1);

        let (_, after, newly) = enc.damage(CombatantId(1), 50).unwrap();
        assert_eq!(after, 0);
        assert!(newly);

        for _ in 0..3 {
            enc.advance();
        }
        assert_eq!(enc.round(), 2);
        assert_eq!(enc.turn_order().len(), 2);
        assert!(!enc.turn_order().contains(&CombatantId(1)));
    }

    #[test]
    fn test_resolution_outcomes() {
        let mut enc = encounter();
        enc.begin();
        assert_eq!(enc.check_resolution(), None);

        enc.damage(CombatantId(1), 100);
        enc.damage(CombatantId(2), 100);
        assert_eq!(enc.check_resolution(), Some(CombatOutcome::Victory));
        assert!(!enc.is_active());

        let mut enc = encounter();
        enc.begin();
        enc.damage(CombatantId(0), 100);
        assert_eq!(enc.check_resolution(), Some(CombatOutcome::Defeat));
    }

    #[test]
    fn test_damage_formula_floor() {
        let policy = CombatPolicy::default();
        assert_eq!(policy.damage(3, 4, 2), 5);
        assert_eq!(policy.damage(0, 1, 10), 1);

        let lenient = CombatPolicy {
            min_damage: 0,
            ..CombatPolicy::default()
        };
        assert_eq!(lenient.damage(0, 1, 10), 0);

        let negative = CombatPolicy {
            min_damage: -3,
            ..CombatPolicy::default()
        };
        assert_eq!(negative.damage(0, 1, 10), 0);
    }

    #[test]
    fn test_attack_roll_against_armor_class() {
        let policy = CombatPolicy::default();
        assert_eq!(policy.armor_class(3), 13);

        let mut rng = StdRng::seed_from_u64(21);
        let mut saw_crit = false;
        for _ in 0..500 {
            let roll = policy.roll_attack(&mut rng, 2, 13);
            assert_eq!(roll.check.total, roll.check.natural + 2);
            assert_eq!(roll.check.dc, 13);
            match roll.check.natural {
                1 => assert!(!roll.hit),
                20 => {
                    assert!(roll.hit && roll.critical);
                    saw_crit = true;
                }
                n => {
                    assert!(!roll.critical);
                    assert_eq!(roll.hit, n + 2 >= 13);
                }
            }
        }
        assert!(saw_crit);
    }

    #[test]
    fn test_natural_twenty_hits_any_armor() {
        let policy = CombatPolicy::default();
        let mut rng = StdRng::seed_from_u64(4);
        let rolls: Vec<AttackRoll> = (0..400).map(|_| policy.roll_attack(&mut rng, 0, 99)).collect();
        assert!(rolls.iter().all(|r| r.hit == (r.check.natural == 20)));
        assert!(rolls.iter().any(|r| r.hit));
    }

    #[test]
    fn test_critical_damage_rolls_twice() {
        let policy = CombatPolicy::default();
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..200 {
            assert!((1..=6).contains(&policy.roll_damage(&mut rng, 6, false)));
            assert!((2..=12).contains(&policy.roll_damage(&mut rng, 6, true)));
        }
    }

    #[test]
    fn test_flee_policy() {
        let mut rng = StdRng::seed_from_u64(8);
        let policy = CombatPolicy::default();
        assert!((0..50).all(|_| policy.flee_succeeds(&mut rng, false)));

        let never = CombatPolicy {
            ambush_flee_chance: 0.0,
            ..CombatPolicy::default()
        };
        assert!((0..50).all(|_| !never.flee_succeeds(&mut rng, true)));
    }
}
