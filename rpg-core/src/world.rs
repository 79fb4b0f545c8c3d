//! Authoritative game state.
//!
//! [`GameState`] is the only thing tool handlers may change, and they only ever
//! change a clone of it (see [`crate::validator`]). Everything here is plain
//! data plus the invariant check that guards every commit.

use crate::combat::{CombatEncounter, CombatSummary};
use crate::progression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Normalize a display name into the key used for lookups.
///
/// Locations, items and NPCs are matched case-insensitively by name.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// Abilities
// ============================================================================

/// The six core abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub const ALL: [Ability; 6] = [
        Ability::Strength,
        Ability::Dexterity,
        Ability::Constitution,
        Ability::Intelligence,
        Ability::Wisdom,
        Ability::Charisma,
    ];

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "strength",
            Ability::Dexterity => "dexterity",
            Ability::Constitution => "constitution",
            Ability::Intelligence => "intelligence",
            Ability::Wisdom => "wisdom",
            Ability::Charisma => "charisma",
        }
    }

    /// Parse a full name or abbreviation, ignoring case.
    pub fn parse(raw: &str) -> Option<Ability> {
        let raw = raw.trim();
        Ability::ALL.into_iter().find(|a| {
            a.name().eq_ignore_ascii_case(raw) || a.abbreviation().eq_ignore_ascii_case(raw)
        })
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Ability scores for a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    /// Modifier for an ability: floor((score - 10) / 2).
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.get(ability) as i32 - 10).div_euclid(2)
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(15, 14, 13, 12, 10, 8)
    }
}

// ============================================================================
// Hit points
// ============================================================================

/// Current and maximum hit points. `0 <= current <= maximum` is an invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        Self {
            current: maximum,
            maximum,
        }
    }

    /// Apply damage, clamping at zero. Returns the damage actually taken.
    pub fn damage(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current - amount.max(0)).max(0);
        before - self.current
    }

    /// Restore hit points, clamping at the maximum. Returns the amount healed.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - before
    }

    pub fn is_down(&self) -> bool {
        self.current <= 0
    }

    pub fn in_bounds(&self) -> bool {
        self.maximum > 0 && (0..=self.maximum).contains(&self.current)
    }
}

impl fmt::Display for HitPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.maximum)
    }
}

// ============================================================================
// Items and inventory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Legendary,
}

impl Rarity {
    pub fn parse(raw: &str) -> Option<Rarity> {
        match raw.trim().to_lowercase().as_str() {
            "common" => Some(Rarity::Common),
            "rare" => Some(Rarity::Rare),
            "legendary" => Some(Rarity::Legendary),
            _ => None,
        }
    }
}

/// What an item does mechanically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Misc,
    Weapon {
        damage_die: u32,
        attack_bonus: i32,
        ranged: bool,
    },
    Armor {
        defense: i32,
    },
    Consumable {
        heal: i32,
    },
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Misc => "misc",
            ItemKind::Weapon { .. } => "weapon",
            ItemKind::Armor { .. } => "armor",
            ItemKind::Consumable { .. } => "consumable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub rarity: Rarity,
    #[serde(default)]
    pub value: u32,
    #[serde(default)]
    pub description: String,
}

impl Item {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rarity: Rarity::Common,
            value: 0,
            description: String::new(),
        }
    }

    pub fn key(&self) -> String {
        name_key(&self.name)
    }

    pub fn is_equippable(&self) -> bool {
        matches!(self.kind, ItemKind::Weapon { .. } | ItemKind::Armor { .. })
    }
}

/// One stack of identical items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub item: Item,
    pub quantity: u32,
}

/// A multiset of items bounded by a total-quantity capacity.
///
/// Adding never checks the capacity; the invariant check does, so an
/// over-full grant is rolled back as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub capacity: u32,
    slots: Vec<InventorySlot>,
}

impl Inventory {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
        }
    }

    pub fn slots(&self) -> &[InventorySlot] {
        &self.slots
    }

    pub fn find(&self, name: &str) -> Option<&InventorySlot> {
        let key = name_key(name);
        self.slots.iter().find(|s| s.item.key() == key)
    }

    pub fn quantity_of(&self, name: &str) -> u32 {
        self.find(name).map_or(0, |s| s.quantity)
    }

    pub fn total_quantity(&self) -> u32 {
        self.slots.iter().map(|s| s.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add items, stacking onto an existing slot with the same name. Returns the new count.
    pub fn add(&mut self, item: Item, quantity: u32) -> u32 {
        let key = item.key();
        match self.slots.iter_mut().find(|s| s.item.key() == key) {
            Some(slot) => {
                slot.quantity = slot.quantity.saturating_add(quantity);
                slot.quantity
            }
            None => {
                self.slots.push(InventorySlot { item, quantity });
                quantity
            }
        }
    }

    /// Remove items. Returns the remaining count, or `None` if there were not enough.
    pub fn remove(&mut self, name: &str, quantity: u32) -> Option<u32> {
        let key = name_key(name);
        let index = self.slots.iter().position(|s| s.item.key() == key)?;
        let slot = &mut self.slots[index];
        if slot.quantity < quantity {
            return None;
        }
        slot.quantity -= quantity;
        let remaining = slot.quantity;
        if remaining == 0 {
            self.slots.remove(index);
        }
        Some(remaining)
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(DEFAULT_INVENTORY_CAPACITY)
    }
}

pub const DEFAULT_INVENTORY_CAPACITY: u32 = 30;

// ============================================================================
// Player
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub class: String,
    pub level: u8,
    pub experience: u32,
    pub abilities: AbilityScores,
    pub hit_points: HitPoints,
    pub gold: u32,
    pub inventory: Inventory,
    /// Keys of equipped items; each must be present in the inventory.
    pub equipped: Vec<String>,
}

impl Player {
    pub fn new(
        name: impl Into<String>,
        class: impl Into<String>,
        abilities: AbilityScores,
        max_hp: i32,
    ) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            level: 1,
            experience: 0,
            abilities,
            hit_points: HitPoints::new(max_hp),
            gold: 0,
            inventory: Inventory::default(),
            equipped: Vec::new(),
        }
    }

    pub fn is_equipped(&self, name: &str) -> bool {
        let key = name_key(name);
        self.equipped.iter().any(|k| *k == key)
    }

    fn equipped_items(&self) -> impl Iterator<Item = &Item> {
        self.equipped
            .iter()
            .filter_map(|key| self.inventory.find(key).map(|slot| &slot.item))
    }

    pub fn equipped_weapon(&self) -> Option<&Item> {
        self.equipped_items()
            .find(|item| matches!(item.kind, ItemKind::Weapon { .. }))
    }

    /// Sum of the defense of all equipped armor.
    pub fn armor_defense(&self) -> i32 {
        self.equipped_items()
            .map(|item| match item.kind {
                ItemKind::Armor { defense } => defense,
                _ => 0,
            })
            .sum()
    }

    /// Attack modifier and damage die for the current loadout.
    ///
    /// Melee uses STR, ranged uses DEX; unarmed attacks use STR and `unarmed_die`.
    pub fn attack_profile(&self, unarmed_die: u32) -> (i32, u32) {
        match self.equipped_weapon().map(|w| &w.kind) {
            Some(ItemKind::Weapon {
                damage_die,
                attack_bonus,
                ranged,
            }) => {
                let ability = if *ranged {
                    Ability::Dexterity
                } else {
                    Ability::Strength
                };
                (self.abilities.modifier(ability) + attack_bonus, *damage_die)
            }
            _ => (self.abilities.modifier(Ability::Strength), unarmed_die),
        }
    }
}

// ============================================================================
// NPCs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Hostile,
    Neutral,
    Ally,
}

impl Disposition {
    pub fn parse(raw: &str) -> Option<Disposition> {
        match raw.trim().to_lowercase().as_str() {
            "hostile" | "enemy" => Some(Disposition::Hostile),
            "neutral" => Some(Disposition::Neutral),
            "ally" | "friendly" => Some(Disposition::Ally),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub name: String,
    pub disposition: Disposition,
    pub hit_points: HitPoints,
    pub defense: i32,
    pub attack_bonus: i32,
    pub damage_die: u32,
    pub initiative_modifier: i32,
    /// Used to break initiative ties.
    pub dexterity: u8,
    pub xp_reward: u32,
    pub gold: u32,
    #[serde(default)]
    pub defeated: bool,
}

impl Npc {
    pub fn new(name: impl Into<String>, disposition: Disposition, max_hp: i32) -> Self {
        Self {
            name: name.into(),
            disposition,
            hit_points: HitPoints::new(max_hp),
            defense: 0,
            attack_bonus: 0,
            damage_die: 6,
            initiative_modifier: 0,
            dexterity: 10,
            xp_reward: 0,
            gold: 0,
            defeated: false,
        }
    }

    pub fn key(&self) -> String {
        name_key(&self.name)
    }
}

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub description: String,
    /// Keys of traversable neighbors.
    pub neighbors: BTreeSet<String>,
    /// Keys of NPCs currently here.
    pub present: BTreeSet<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            neighbors: BTreeSet::new(),
            present: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> String {
        name_key(&self.name)
    }
}

/// The location graph plus the NPC table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    start: String,
    current: String,
    locations: BTreeMap<String, Location>,
    npcs: BTreeMap<String, Npc>,
}

impl World {
    /// A world containing only the start location, where the player begins.
    pub fn new(start: Location) -> Self {
        let key = start.key();
        let mut locations = BTreeMap::new();
        locations.insert(key.clone(), start);
        Self {
            start: key.clone(),
            current: key,
            locations,
            npcs: BTreeMap::new(),
        }
    }

    /// Add a location. Returns false if the name is already taken.
    pub fn add_location(&mut self, location: Location) -> bool {
        let key = location.key();
        if key.is_empty() || self.locations.contains_key(&key) {
            return false;
        }
        self.locations.insert(key, location);
        true
    }

    /// Connect two existing locations in both directions.
    pub fn connect(&mut self, a: &str, b: &str) -> bool {
        let (a, b) = (name_key(a), name_key(b));
        if a == b || !self.locations.contains_key(&a) || !self.locations.contains_key(&b) {
            return false;
        }
        if let Some(loc) = self.locations.get_mut(&a) {
            loc.neighbors.insert(b.clone());
        }
        if let Some(loc) = self.locations.get_mut(&b) {
            loc.neighbors.insert(a);
        }
        true
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.get(&name_key(name))
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn start_key(&self) -> &str {
        &self.start
    }

    pub fn current_key(&self) -> &str {
        &self.current
    }

    pub fn current_location(&self) -> Option<&Location> {
        self.locations.get(&self.current)
    }

    /// Point the player at another location without checking adjacency.
    ///
    /// Adjacency is the `move` handler's concern; this only records the result.
    pub fn set_current(&mut self, name: &str) {
        self.current = name_key(name);
    }

    pub fn is_neighbor_of_current(&self, name: &str) -> bool {
        let key = name_key(name);
        self.current_location()
            .is_some_and(|loc| loc.neighbors.contains(&key))
    }

    /// Keys of every location reachable from the start location.
    pub fn reachable_from_start(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.start.clone()]);
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(loc) = self.locations.get(&key) {
                queue.extend(loc.neighbors.iter().filter(|n| !seen.contains(*n)).cloned());
            }
        }
        seen
    }

    pub fn npc(&self, name: &str) -> Option<&Npc> {
        self.npcs.get(&name_key(name))
    }

    pub fn npc_mut(&mut self, name: &str) -> Option<&mut Npc> {
        self.npcs.get_mut(&name_key(name))
    }

    /// Place a new NPC at the current location. Returns false on a name clash.
    pub fn spawn_npc(&mut self, npc: Npc) -> bool {
        let key = npc.key();
        if key.is_empty() || self.npcs.contains_key(&key) {
            return false;
        }
        let current = self.current.clone();
        match self.locations.get_mut(&current) {
            Some(loc) => {
                loc.present.insert(key.clone());
                self.npcs.insert(key, npc);
                true
            }
            None => false,
        }
    }

    /// NPCs present at the current location who are still standing.
    pub fn npcs_here(&self) -> Vec<&Npc> {
        self.current_location()
            .map(|loc| {
                loc.present
                    .iter()
                    .filter_map(|key| self.npcs.get(key))
                    .filter(|npc| !npc.defeated)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark an NPC defeated and remove it from every location.
    pub fn retire_npc(&mut self, name: &str) {
        let key = name_key(name);
        if let Some(npc) = self.npcs.get_mut(&key) {
            npc.defeated = true;
            npc.hit_points.current = 0;
        }
        for loc in self.locations.values_mut() {
            loc.present.remove(&key);
        }
    }
}

// ============================================================================
// Game state and invariants
// ============================================================================

/// A state invariant that a tool application would have broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantBreach {
    #[error("{who} has {current}/{maximum} HP, outside [0, max]")]
    HitPointsOutOfRange {
        who: String,
        current: i32,
        maximum: i32,
    },

    #[error("equipped item `{0}` is not in the inventory")]
    EquippedNotCarried(String),

    #[error("inventory holds {total} items but capacity is {capacity}")]
    OverCapacity { total: u32, capacity: u32 },

    #[error("inventory slot `{0}` has zero quantity")]
    EmptySlot(String),

    #[error("current location `{0}` does not exist")]
    UnknownLocation(String),

    #[error("location `{0}` is not reachable from the start location")]
    Unreachable(String),

    #[error("location `{from}` lists unknown neighbor `{to}`")]
    DanglingEdge { from: String, to: String },

    #[error("level {0} is outside 1-20")]
    LevelOutOfRange(u8),

    #[error("combat turn {turn} is outside a queue of {len}")]
    TurnOutOfRange { turn: usize, len: usize },
}

/// The complete authoritative state of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub world: World,
    pub player: Player,
    #[serde(default)]
    pub encounter: Option<CombatEncounter>,
    #[serde(default)]
    pub last_combat: Option<CombatSummary>,
}

impl GameState {
    pub fn new(player: Player, world: World) -> Self {
        Self {
            world,
            player,
            encounter: None,
            last_combat: None,
        }
    }

    pub fn in_combat(&self) -> bool {
        self.encounter.as_ref().is_some_and(|e| e.is_active())
    }

    /// The player's hit points as the rules currently see them.
    ///
    /// During an encounter the combatant snapshot is authoritative.
    pub fn player_hit_points(&self) -> HitPoints {
        self.encounter
            .as_ref()
            .and_then(|e| e.player())
            .map(|c| c.hit_points)
            .unwrap_or(self.player.hit_points)
    }

    /// Check every state invariant.
    pub fn check_invariants(&self) -> Result<(), InvariantBreach> {
        let player = &self.player;
        if !player.hit_points.in_bounds() {
            return Err(InvariantBreach::HitPointsOutOfRange {
                who: player.name.clone(),
                current: player.hit_points.current,
                maximum: player.hit_points.maximum,
            });
        }
        if !(1..=20).contains(&player.level) {
            return Err(InvariantBreach::LevelOutOfRange(player.level));
        }

        let inventory = &player.inventory;
        if let Some(slot) = inventory.slots().iter().find(|s| s.quantity == 0) {
            return Err(InvariantBreach::EmptySlot(slot.item.name.clone()));
        }
        if inventory.total_quantity() > inventory.capacity {
            return Err(InvariantBreach::OverCapacity {
                total: inventory.total_quantity(),
                capacity: inventory.capacity,
            });
        }
        if let Some(key) = player
            .equipped
            .iter()
            .find(|key| inventory.find(key).is_none())
        {
            return Err(InvariantBreach::EquippedNotCarried(key.clone()));
        }

        for loc in self.world.locations() {
            if let Some(to) = loc
                .neighbors
                .iter()
                .find(|n| self.world.location(n).is_none())
            {
                return Err(InvariantBreach::DanglingEdge {
                    from: loc.name.clone(),
                    to: to.clone(),
                });
            }
        }
        let current = self.world.current_key();
        if self.world.current_location().is_none() {
            return Err(InvariantBreach::UnknownLocation(current.to_string()));
        }
        if !self.world.reachable_from_start().contains(current) {
            return Err(InvariantBreach::Unreachable(current.to_string()));
        }

        if let Some(encounter) = &self.encounter {
            encounter.check_invariants()?;
        }
        Ok(())
    }

    /// A compact description of authoritative state for the narrator.
    ///
    /// Rebuilt from state every turn, never from prose, so inventory and HP
    /// survive any amount of conversation compaction.
    pub fn standing_summary(&self) -> String {
        let p = &self.player;
        let hp = self.player_hit_points();
        let next = match progression::xp_to_next_level(p.level, p.experience) {
            Some(needed) => format!(", {needed} to next level"),
            None => ", max level".to_string(),
        };
        let mut out = format!(
            "Player: {} the {} (level {}, {} XP{next})\nHP: {}{}\nGold: {}\n",
            p.name,
            p.class,
            p.level,
            p.experience,
            hp,
            if hp.is_down() { " (down)" } else { "" },
            p.gold
        );

        let abilities: Vec<String> = Ability::ALL
            .iter()
            .map(|a| format!("{} {}", a.abbreviation(), p.abilities.get(*a)))
            .collect();
        out.push_str(&format!("Abilities: {}\n", abilities.join(", ")));

        if p.inventory.is_empty() {
            out.push_str("Inventory: empty\n");
        } else {
            let items: Vec<String> = p
                .inventory
                .slots()
                .iter()
                .map(|s| {
                    let equipped = if p.is_equipped(&s.item.name) {
                        ", equipped"
                    } else {
                        ""
                    };
                    format!("{} x{} ({}{equipped})", s.item.name, s.quantity, s.item.kind.label())
                })
                .collect();
            out.push_str(&format!(
                "Inventory ({}/{}): {}\n",
                p.inventory.total_quantity(),
                p.inventory.capacity,
                items.join(", ")
            ));
        }

        if let Some(loc) = self.world.current_location() {
            let exits: Vec<&str> = loc
                .neighbors
                .iter()
                .filter_map(|k| self.world.location(k).map(|l| l.name.as_str()))
                .collect();
            out.push_str(&format!("Location: {} - {}\n", loc.name, loc.description));
            out.push_str(&format!(
                "Exits: {}\n",
                if exits.is_empty() {
                    "none".to_string()
                } else {
                    exits.join(", ")
                }
            ));
            let npcs: Vec<String> = self
                .world
                .npcs_here()
                .iter()
                .map(|n| format!("{} ({:?}, HP {})", n.name, n.disposition, n.hit_points))
                .collect();
            if !npcs.is_empty() {
                out.push_str(&format!("Present: {}\n", npcs.join(", ")));
            }
        }

        if let Some(encounter) = &self.encounter {
            out.push_str(&encounter.describe());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_room_world() -> World {
        let mut world = World::new(Location::new("Crossroads Inn", "A warm inn."));
        world.add_location(Location::new("Market Square", "Stalls and noise."));
        world.connect("Crossroads Inn", "market square");
        world
    }

    #[test]
    fn test_ability_modifier_floors() {
        let scores = AbilityScores::new(8, 9, 10, 11, 12, 20);
        assert_eq!(scores.modifier(Ability::Strength), -1);
        assert_eq!(scores.modifier(Ability::Dexterity), -1);
        assert_eq!(scores.modifier(Ability::Constitution), 0);
        assert_eq!(scores.modifier(Ability::Intelligence), 0);
        assert_eq!(scores.modifier(Ability::Wisdom), 1);
        assert_eq!(scores.modifier(Ability::Charisma), 5);
    }

    #[test]
    fn test_ability_parse() {
        assert_eq!(Ability::parse("DEX"), Some(Ability::Dexterity));
        assert_eq!(Ability::parse("Wisdom"), Some(Ability::Wisdom));
        assert_eq!(Ability::parse("luck"), None);
    }

    #[test]
    fn test_hit_points_clamp() {
        let mut hp = HitPoints::new(10);
        assert_eq!(hp.damage(15), 10);
        assert_eq!(hp.current, 0);
        assert!(hp.is_down());
        assert_eq!(hp.heal(50), 10);
        assert_eq!(hp.current, 10);
        assert_eq!(hp.damage(-5), 0);
    }

    #[test]
    fn test_inventory_stacking_and_removal() {
        let mut inv = Inventory::new(10);
        let potion = Item::new("Healing Potion", ItemKind::Consumable { heal: 5 });
        assert_eq!(inv.add(potion.clone(), 2), 2);
        assert_eq!(inv.add(potion, 1), 3);
        assert_eq!(inv.quantity_of("healing potion"), 3);

        assert_eq!(inv.remove("HEALING POTION", 4), None);
        assert_eq!(inv.remove("Healing Potion", 3), Some(0));
        assert!(inv.is_empty());
    }

    #[test]
    fn test_world_graph() {
        let world = two_room_world();
        assert!(world.is_neighbor_of_current("Market Square"));
        assert!(!world.is_neighbor_of_current("Whispering Woods"));
        assert_eq!(world.reachable_from_start().len(), 2);
    }

    #[test]
    fn test_invariants_detect_orphaned_location() {
        let mut world = two_room_world();
        world.add_location(Location::new("Island", "Cut off."));
        world.set_current("Island");
        let state = GameState::new(
            Player::new("Aria", "Ranger", AbilityScores::default(), 12),
            world,
        );
        assert_eq!(
            state.check_invariants(),
            Err(InvariantBreach::Unreachable("island".to_string()))
        );
    }

    #[test]
    fn test_invariants_detect_over_capacity() {
        let mut player = Player::new("Aria", "Ranger", AbilityScores::default(), 12);
        player.inventory = Inventory::new(2);
        player.inventory.add(Item::new("Rope", ItemKind::Misc), 3);
        let state = GameState::new(player, two_room_world());
        assert!(matches!(
            state.check_invariants(),
            Err(InvariantBreach::OverCapacity { total: 3, capacity: 2 })
        ));
    }

    #[test]
    fn test_standing_summary_mentions_state() {
        let mut player = Player::new("Aria", "Ranger", AbilityScores::default(), 12);
        player.gold = 17;
        let mut world = two_room_world();
        world.spawn_npc(Npc::new("Goblin", Disposition::Hostile, 7));
        let state = GameState::new(player, world);

        let summary = state.standing_summary();
        assert!(summary.contains("Aria the Ranger (level 1, 0 XP, 50 to next level)"));
        assert!(summary.contains("HP: 12/12"));
        assert!(summary.contains("Gold: 17"));
        assert!(summary.contains("Exits: Market Square"));
        assert!(summary.contains("Goblin (Hostile"));
    }
}
