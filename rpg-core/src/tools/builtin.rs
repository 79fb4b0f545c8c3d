//! World, inventory and character tools.

use super::{
    DuplicateToolError, Effect, Outcome, Rejection, ToolContext, ToolKind, ToolRegistryBuilder,
};
use crate::dice::CheckRoll;
use crate::progression;
use crate::world::{
    name_key, Ability, Disposition, GameState, HitPoints, Item, ItemKind, Location, Npc, Rarity,
};
use rpg_macros::Tool;
use serde::Deserialize;

/// Register every tool in this module.
pub fn register(builder: ToolRegistryBuilder) -> Result<ToolRegistryBuilder, DuplicateToolError> {
    builder
        .register::<Move, _>(ToolKind::World, move_player)?
        .register::<CreateLocation, _>(ToolKind::World, create_location)?
        .register::<ViewLocations, _>(ToolKind::Query, view_locations)?
        .register::<ViewInventory, _>(ToolKind::Query, view_inventory)?
        .register::<GrantItem, _>(ToolKind::World, grant_item)?
        .register::<RemoveItem, _>(ToolKind::World, remove_item)?
        .register::<EquipItem, _>(ToolKind::World, equip_item)?
        .register::<AdjustGold, _>(ToolKind::World, adjust_gold)?
        .register::<ApplyDamage, _>(ToolKind::World, apply_damage)?
        .register::<Heal, _>(ToolKind::World, heal)?
        .register::<AbilityCheck, _>(ToolKind::Query, ability_check)?
        .register::<AwardXp, _>(ToolKind::World, award_xp)?
        .register::<SpawnNpc, _>(ToolKind::World, spawn_npc)
}

fn to_u32(value: i64, field: &str) -> Result<u32, Rejection> {
    u32::try_from(value).map_err(|_| Rejection::new(format!("`{field}` must be a non-negative integer")))
}

fn to_i32(value: i64, field: &str) -> Result<i32, Rejection> {
    i32::try_from(value).map_err(|_| Rejection::new(format!("`{field}` is out of range")))
}

/// Whether a target name refers to the player.
pub(crate) fn is_player_target(target: &str, player_name: &str) -> bool {
    let key = name_key(target);
    matches!(key.as_str(), "player" | "me" | "self" | "you") || key == name_key(player_name)
}

// ============================================================================
// Travel
// ============================================================================

/// Move the player to a location directly connected to the current one.
#[derive(Debug, Tool, Deserialize)]
#[tool(name = "move")]
pub struct Move {
    /// Name of an adjacent location
    pub destination: String,
}

fn move_player(state: &mut GameState, args: Move, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    if state.in_combat() {
        return Err(Rejection::new("cannot travel during combat"));
    }
    let destination = state
        .world
        .location(&args.destination)
        .map(|l| l.name.clone())
        .ok_or_else(|| Rejection::new(format!("no location named `{}` exists", args.destination)))?;
    let from = state
        .world
        .current_location()
        .map(|l| l.name.clone())
        .unwrap_or_default();

    if name_key(&destination) == state.world.current_key() {
        return Err(Rejection::new(format!("the player is already at {destination}")));
    }
    if !state.world.is_neighbor_of_current(&destination) {
        return Err(Rejection::new(format!(
            "{destination} is not reachable from {from}"
        )));
    }

    state.world.set_current(&destination);
    Ok(Outcome::new(format!("{} travels from {from} to {destination}.", state.player.name))
        .with(Effect::Moved {
            from,
            to: destination,
        }))
}

/// Create a new location connected to the player's current location.
#[derive(Debug, Tool, Deserialize)]
pub struct CreateLocation {
    /// Unique name of the new location
    pub name: String,
    /// Short description of the place
    pub description: String,
}

fn create_location(
    state: &mut GameState,
    args: CreateLocation,
    _: &mut ToolContext<'_>,
) -> Result<Outcome, Rejection> {
    let name = args.name.trim().to_string();
    if name.is_empty() {
        return Err(Rejection::new("location name cannot be empty"));
    }
    if !state
        .world
        .add_location(Location::new(&name, args.description.trim()))
    {
        return Err(Rejection::new(format!("a location named `{name}` already exists")));
    }
    let here = state.world.current_key().to_string();
    state.world.connect(&here, &name);

    Ok(Outcome::new(format!("{name} now lies beyond the current location."))
        .with(Effect::LocationCreated { name }))
}

/// List the current location, its exits and who is present.
#[derive(Debug, Tool, Deserialize)]
pub struct ViewLocations {}

fn view_locations(
    state: &mut GameState,
    _: ViewLocations,
    _: &mut ToolContext<'_>,
) -> Result<Outcome, Rejection> {
    let world = &state.world;
    let current = world
        .current_location()
        .ok_or_else(|| Rejection::new("the player is nowhere"))?;
    let exits: Vec<String> = current
        .neighbors
        .iter()
        .filter_map(|k| world.location(k))
        .map(|l| format!("{} ({})", l.name, l.description))
        .collect();
    let present: Vec<&str> = world.npcs_here().iter().map(|n| n.name.as_str()).collect();

    let mut summary = format!("At {}: {}.", current.name, current.description);
    if exits.is_empty() {
        summary.push_str(" There are no exits.");
    } else {
        summary.push_str(&format!(" Exits: {}.", exits.join("; ")));
    }
    if !present.is_empty() {
        summary.push_str(&format!(" Present: {}.", present.join(", ")));
    }
    Ok(Outcome::new(summary))
}

// ============================================================================
// Inventory
// ============================================================================

/// Show the player's inventory, equipment and gold.
#[derive(Debug, Tool, Deserialize)]
pub struct ViewInventory {}

fn view_inventory(
    state: &mut GameState,
    _: ViewInventory,
    _: &mut ToolContext<'_>,
) -> Result<Outcome, Rejection> {
    let player = &state.player;
    if player.inventory.is_empty() {
        return Ok(Outcome::new(format!(
            "{} carries nothing but {} gold.",
            player.name, player.gold
        )));
    }
    let items: Vec<String> = player
        .inventory
        .slots()
        .iter()
        .map(|slot| {
            let mut line = format!("{} x{} [{}]", slot.item.name, slot.quantity, slot.item.kind.label());
            if player.is_equipped(&slot.item.name) {
                line.push_str(" (equipped)");
            }
            line
        })
        .collect();
    Ok(Outcome::new(format!(
        "{} carries {} and {} gold.",
        player.name,
        items.join(", "),
        player.gold
    )))
}

/// Give the player items. Stats apply only when the item is new to the inventory.
#[derive(Debug, Tool, Deserialize)]
pub struct GrantItem {
    /// Item name
    pub item: String,
    /// How many to grant
    #[tool(min = 1, max = 99)]
    pub quantity: i64,
    /// Item category (defaults to misc)
    #[tool(one_of = "misc|weapon|armor|consumable")]
    pub kind: Option<String>,
    /// Damage die for weapons, e.g. 8 for a d8
    #[tool(min = 2, max = 12)]
    pub damage_die: Option<i64>,
    /// Attack bonus for weapons
    #[tool(min = -5, max = 10)]
    pub attack_bonus: Option<i64>,
    /// Whether a weapon is ranged
    pub ranged: Option<bool>,
    /// Defense granted by armor
    #[tool(min = 0, max = 10)]
    pub defense: Option<i64>,
    /// HP restored by a consumable
    #[tool(min = 0, max = 100)]
    pub heal: Option<i64>,
    #[tool(one_of = "common|rare|legendary")]
    pub rarity: Option<String>,
    /// Value in gold
    #[tool(min = 0, max = 100000)]
    pub value: Option<i64>,
    pub description: Option<String>,
}

impl GrantItem {
    fn to_item(&self) -> Result<Item, Rejection> {
        let kind = match self.kind.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("misc") => ItemKind::Misc,
            Some("weapon") => ItemKind::Weapon {
                damage_die: to_u32(self.damage_die.unwrap_or(6), "damage_die")?,
                attack_bonus: to_i32(self.attack_bonus.unwrap_or(0), "attack_bonus")?,
                ranged: self.ranged.unwrap_or(false),
            },
            Some("armor") => ItemKind::Armor {
                defense: to_i32(self.defense.unwrap_or(1), "defense")?,
            },
            Some("consumable") => ItemKind::Consumable {
                heal: to_i32(self.heal.unwrap_or(0), "heal")?,
            },
            Some(other) => return Err(Rejection::new(format!("unknown item kind `{other}`"))),
        };

        let mut item = Item::new(self.item.trim(), kind);
        if let Some(rarity) = &self.rarity {
            item.rarity =
                Rarity::parse(rarity).ok_or_else(|| Rejection::new(format!("unknown rarity `{rarity}`")))?;
        }
        item.value = to_u32(self.value.unwrap_or(0), "value")?;
        item.description = self.description.clone().unwrap_or_default();
        Ok(item)
    }
}

fn grant_item(state: &mut GameState, args: GrantItem, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    if args.item.trim().is_empty() {
        return Err(Rejection::new("item name cannot be empty"));
    }
    let item = args.to_item()?;
    let quantity = to_u32(args.quantity, "quantity")?;
    let name = item.name.clone();
    let total = state.player.inventory.add(item, quantity);

    Ok(
        Outcome::new(format!("{} receives {quantity} x {name} (now {total}).", state.player.name))
            .with(Effect::ItemGained {
                item: name,
                quantity,
                total,
            }),
    )
}

/// Take items away from the player.
#[derive(Debug, Tool, Deserialize)]
pub struct RemoveItem {
    /// Item name
    pub item: String,
    /// How many to remove (default 1)
    #[tool(min = 1, max = 99)]
    pub quantity: Option<i64>,
}

fn remove_item(state: &mut GameState, args: RemoveItem, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let quantity = to_u32(args.quantity.unwrap_or(1), "quantity")?;
    let player = &mut state.player;
    let carried = player.inventory.quantity_of(&args.item);
    let name = player
        .inventory
        .find(&args.item)
        .map(|s| s.item.name.clone())
        .ok_or_else(|| Rejection::new(format!("{} is not carrying `{}`", player.name, args.item)))?;

    let remaining = player.inventory.remove(&name, quantity).ok_or_else(|| {
        Rejection::new(format!("cannot remove {quantity} {name}; only {carried} carried"))
    })?;
    if remaining == 0 {
        let key = name_key(&name);
        player.equipped.retain(|k| *k != key);
    }

    Ok(Outcome::new(format!("{} loses {quantity} x {name} ({remaining} left).", player.name))
        .with(Effect::ItemLost {
            item: name,
            quantity,
            remaining,
        }))
}

/// Equip a carried weapon or piece of armor. Equipping a weapon replaces the current one.
#[derive(Debug, Tool, Deserialize)]
pub struct EquipItem {
    /// Item name
    pub item: String,
}

fn equip_item(state: &mut GameState, args: EquipItem, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let player = &mut state.player;
    let item = player
        .inventory
        .find(&args.item)
        .map(|s| s.item.clone())
        .ok_or_else(|| Rejection::new(format!("{} is not carrying `{}`", player.name, args.item)))?;
    if !item.is_equippable() {
        return Err(Rejection::new(format!("{} cannot be equipped", item.name)));
    }
    if player.is_equipped(&item.name) {
        return Err(Rejection::new(format!("{} is already equipped", item.name)));
    }

    if matches!(item.kind, ItemKind::Weapon { .. }) {
        let weapons: Vec<String> = player
            .equipped
            .iter()
            .filter(|k| {
                player
                    .inventory
                    .find(k)
                    .is_some_and(|s| matches!(s.item.kind, ItemKind::Weapon { .. }))
            })
            .cloned()
            .collect();
        player.equipped.retain(|k| !weapons.contains(k));
    }
    player.equipped.push(item.key());
    if let Some(encounter) = state.encounter.as_mut() {
        encounter.refresh_player(&state.player, ctx.policy);
    }

    Ok(Outcome::new(format!("{} equips {}.", state.player.name, item.name))
        .with(Effect::ItemEquipped { item: item.name }))
}

/// Add or subtract gold. The player can never end up with less than zero.
#[derive(Debug, Tool, Deserialize)]
pub struct AdjustGold {
    /// Positive to gain gold, negative to spend it
    #[tool(min = -100000, max = 100000)]
    pub amount: i64,
    /// Why the gold changed
    pub reason: Option<String>,
}

fn adjust_gold(state: &mut GameState, args: AdjustGold, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let from = state.player.gold;
    let to = i64::from(from) + args.amount;
    if to < 0 {
        return Err(Rejection::new(format!(
            "cannot spend {} gold; {} only has {from}",
            -args.amount, state.player.name
        )));
    }
    let to = to_u32(to, "gold")?;
    state.player.gold = to;

    let mut summary = format!("{} now has {to} gold", state.player.name);
    if let Some(reason) = args.reason.filter(|r| !r.trim().is_empty()) {
        summary.push_str(&format!(" ({reason})"));
    }
    summary.push('.');
    Ok(Outcome::new(summary).with(Effect::GoldChanged { from, to }))
}

// ============================================================================
// Hit points
// ============================================================================

/// Deal damage to the player or an NPC. HP never drops below zero.
#[derive(Debug, Tool, Deserialize)]
pub struct ApplyDamage {
    /// "player" or the name of an NPC or combatant
    pub target: String,
    #[tool(min = 0, max = 1000)]
    pub amount: i64,
}

/// Restore hit points to the player or an NPC, up to their maximum.
#[derive(Debug, Tool, Deserialize)]
pub struct Heal {
    /// "player" or the name of an NPC or combatant
    pub target: String,
    #[tool(min = 0, max = 1000)]
    pub amount: i64,
}

#[derive(Clone, Copy)]
enum HpChange {
    Damage(i32),
    Heal(i32),
}

fn change_hp(state: &mut GameState, target: &str, change: HpChange) -> Result<Outcome, Rejection> {
    let apply = |hp: &mut HitPoints| match change {
        HpChange::Damage(n) => {
            hp.damage(n);
        }
        HpChange::Heal(n) => {
            hp.heal(n);
        }
    };

    // While fighting, combatant snapshots are the source of truth.
    if let Some(encounter) = state.encounter.as_mut().filter(|e| e.is_active()) {
        if let Some(id) = encounter.find(target) {
            let combatant = encounter
                .combatant_mut(id)
                .ok_or_else(|| Rejection::new(format!("unknown combatant `{target}`")))?;
            if combatant.defeated && matches!(change, HpChange::Heal(_)) {
                return Err(Rejection::new(format!("{} is already defeated", combatant.name)));
            }
            let from = combatant.hit_points.current;
            apply(&mut combatant.hit_points);
            let hp = combatant.hit_points;
            let name = combatant.name.clone();
            let mut outcome = Outcome::new(format!("{name} is at {hp} HP.")).with(Effect::HpChanged {
                target: name.clone(),
                from,
                to: hp.current,
                maximum: hp.maximum,
            });
            if hp.is_down() && !combatant.defeated {
                combatant.defeated = true;
                outcome.summary = format!("{name} falls at 0 HP.");
                outcome.push(Effect::CombatantDefeated { name });
            }
            return Ok(outcome);
        }
    }

    let player_name = state.player.name.clone();
    let (name, hp) = if is_player_target(target, &player_name) {
        (player_name, &mut state.player.hit_points)
    } else {
        let npc = state
            .world
            .npc_mut(target)
            .filter(|n| !n.defeated)
            .ok_or_else(|| Rejection::new(format!("no target named `{target}`")))?;
        (npc.name.clone(), &mut npc.hit_points)
    };

    let from = hp.current;
    apply(hp);
    let after = *hp;
    let mut outcome = Outcome::new(format!("{name} is at {after} HP.")).with(Effect::HpChanged {
        target: name.clone(),
        from,
        to: after.current,
        maximum: after.maximum,
    });

    if after.is_down() && !is_player_target(target, &state.player.name) {
        state.world.retire_npc(&name);
        outcome.summary = format!("{name} falls at 0 HP.");
        outcome.push(Effect::CombatantDefeated { name });
    } else if after.is_down() {
        outcome.summary = format!("{name} collapses at 0 HP.");
    }
    Ok(outcome)
}

fn apply_damage(state: &mut GameState, args: ApplyDamage, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let amount = to_i32(args.amount, "amount")?;
    change_hp(state, &args.target, HpChange::Damage(amount))
}

fn heal(state: &mut GameState, args: Heal, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let amount = to_i32(args.amount, "amount")?;
    change_hp(state, &args.target, HpChange::Heal(amount))
}

// ============================================================================
// Checks and progression
// ============================================================================

/// Roll d20 plus the player's ability modifier against a difficulty class.
#[derive(Debug, Tool, Deserialize)]
pub struct AbilityCheck {
    #[tool(one_of = "strength|dexterity|constitution|intelligence|wisdom|charisma")]
    pub ability: String,
    /// Difficulty class
    #[tool(min = 1, max = 30)]
    pub dc: i64,
    /// What the player is attempting
    pub reason: Option<String>,
}

fn ability_check(
    state: &mut GameState,
    args: AbilityCheck,
    ctx: &mut ToolContext<'_>,
) -> Result<Outcome, Rejection> {
    let ability = Ability::parse(&args.ability)
        .ok_or_else(|| Rejection::new(format!("unknown ability `{}`", args.ability)))?;
    let dc = to_i32(args.dc, "dc")?;
    let modifier = state.player.abilities.modifier(ability);
    let roll = CheckRoll::roll(ctx.rng, modifier, dc);
    let success = roll.succeeded();

    let verdict = if success { "succeeds" } else { "fails" };
    let attempt = args
        .reason
        .filter(|r| !r.trim().is_empty())
        .map(|r| format!(" to {r}"))
        .unwrap_or_default();
    Ok(Outcome::new(format!(
        "{} {verdict} a {} check{attempt}: {roll}.",
        state.player.name,
        ability.name()
    ))
    .with(Effect::CheckRolled {
        ability,
        roll,
        success,
    }))
}

/// Award experience points, leveling the player up when thresholds are crossed.
#[derive(Debug, Tool, Deserialize)]
pub struct AwardXp {
    #[tool(min = 0, max = 100000)]
    pub amount: i64,
    pub reason: Option<String>,
}

fn award_xp(state: &mut GameState, args: AwardXp, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let amount = to_u32(args.amount, "amount")?;
    let award = progression::award_xp(&mut state.player, amount);
    if let Some(encounter) = state.encounter.as_mut() {
        encounter.refresh_player(&state.player, ctx.policy);
    }

    let mut outcome = Outcome::new(format!(
        "{} gains {amount} XP ({} total).",
        state.player.name, award.total
    ))
    .with(Effect::XpGained {
        amount,
        total: award.total,
    });
    if award.leveled_up() {
        outcome.summary.push_str(&format!(
            " Level up! Now level {} with {} max HP.",
            award.new_level, state.player.hit_points.maximum
        ));
        outcome.push(Effect::LeveledUp {
            level: award.new_level,
            max_hp: state.player.hit_points.maximum,
        });
    }
    Ok(outcome)
}

// ============================================================================
// NPCs
// ============================================================================

/// Place a new NPC or creature at the player's current location.
#[derive(Debug, Tool, Deserialize)]
pub struct SpawnNpc {
    /// Unique name
    pub name: String,
    #[tool(one_of = "hostile|neutral|ally")]
    pub disposition: String,
    #[tool(min = 1, max = 500)]
    pub max_hp: i64,
    /// Damage reduction applied to incoming hits
    #[tool(min = 0, max = 10)]
    pub defense: Option<i64>,
    #[tool(min = -5, max = 15)]
    pub attack_bonus: Option<i64>,
    /// Damage die, e.g. 6 for a d6
    #[tool(min = 2, max = 12)]
    pub damage_die: Option<i64>,
    #[tool(min = -5, max = 10)]
    pub initiative_modifier: Option<i64>,
    /// Dexterity score, used to break initiative ties
    #[tool(min = 1, max = 30)]
    pub dexterity: Option<i64>,
    /// XP awarded for defeating it
    #[tool(min = 0, max = 10000)]
    pub xp_reward: Option<i64>,
    /// Gold it carries
    #[tool(min = 0, max = 10000)]
    pub gold: Option<i64>,
}

fn spawn_npc(state: &mut GameState, args: SpawnNpc, _: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let name = args.name.trim().to_string();
    if name.is_empty() {
        return Err(Rejection::new("NPC name cannot be empty"));
    }
    if is_player_target(&name, &state.player.name) {
        return Err(Rejection::new(format!("`{name}` is reserved for the player")));
    }
    let disposition = Disposition::parse(&args.disposition)
        .ok_or_else(|| Rejection::new(format!("unknown disposition `{}`", args.disposition)))?;

    let mut npc = Npc::new(&name, disposition, to_i32(args.max_hp, "max_hp")?);
    npc.defense = to_i32(args.defense.unwrap_or(0), "defense")?;
    npc.attack_bonus = to_i32(args.attack_bonus.unwrap_or(0), "attack_bonus")?;
    npc.damage_die = to_u32(args.damage_die.unwrap_or(6), "damage_die")?;
    npc.initiative_modifier = to_i32(args.initiative_modifier.unwrap_or(0), "initiative_modifier")?;
    npc.dexterity = u8::try_from(args.dexterity.unwrap_or(10))
        .map_err(|_| Rejection::new("`dexterity` is out of range"))?;
    npc.xp_reward = to_u32(args.xp_reward.unwrap_or(0), "xp_reward")?;
    npc.gold = to_u32(args.gold.unwrap_or(0), "gold")?;

    if !state.world.spawn_npc(npc) {
        return Err(Rejection::new(format!("an NPC named `{name}` already exists")));
    }
    Ok(Outcome::new(format!("{name} appears ({disposition:?}).")).with(Effect::NpcSpawned { name }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatPolicy;
    use crate::testing::sample_state;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run<F, A>(state: &mut GameState, f: F, args: A) -> Result<Outcome, Rejection>
    where
        F: Fn(&mut GameState, A, &mut ToolContext<'_>) -> Result<Outcome, Rejection>,
    {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = CombatPolicy::default();
        let mut ctx = ToolContext::narrator(&mut rng, &policy);
        f(state, args, &mut ctx)
    }

    #[test]
    fn test_move_to_neighbor() {
        let mut state = sample_state();
        let outcome = run(
            &mut state,
            move_player,
            Move {
                destination: "market square".into(),
            },
        )
        .unwrap();
        assert_eq!(state.world.current_key(), "market square");
        assert!(matches!(&outcome.effects[0], Effect::Moved { to, .. } if to == "Market Square"));
    }

    #[test]
    fn test_move_rejects_non_neighbor_and_unknown() {
        let mut state = sample_state();
        // Old Mill exists but is two steps away.
        assert!(run(&mut state, move_player, Move { destination: "Old Mill".into() }).is_err());
        assert!(run(&mut state, move_player, Move { destination: "Whispering Woods".into() }).is_err());
        assert_eq!(state.world.current_key(), "crossroads inn");
    }

    #[test]
    fn test_create_location_links_to_current() {
        let mut state = sample_state();
        run(
            &mut state,
            create_location,
            CreateLocation {
                name: "Whispering Woods".into(),
                description: "Tall pines.".into(),
            },
        )
        .unwrap();
        assert!(state.world.is_neighbor_of_current("whispering woods"));

        let dup = run(
            &mut state,
            create_location,
            CreateLocation {
                name: "WHISPERING WOODS".into(),
                description: "Again.".into(),
            },
        );
        assert!(dup.is_err());

        let empty = run(
            &mut state,
            create_location,
            CreateLocation {
                name: "  ".into(),
                description: "Nothing.".into(),
            },
        );
        assert!(empty.is_err());
    }

    #[test]
    fn test_adjust_gold_never_negative() {
        let mut state = sample_state();
        state.player.gold = 10;
        let err = run(&mut state, adjust_gold, AdjustGold { amount: -11, reason: None }).unwrap_err();
        assert!(err.0.contains("only has 10"));
        assert_eq!(state.player.gold, 10);

        run(&mut state, adjust_gold, AdjustGold { amount: -10, reason: Some("bribe".into()) }).unwrap();
        assert_eq!(state.player.gold, 0);
    }

    #[test]
    fn test_remove_item_unequips_last_copy() {
        let mut state = sample_state();
        assert!(state.player.is_equipped("Longsword"));
        run(
            &mut state,
            remove_item,
            RemoveItem {
                item: "longsword".into(),
                quantity: None,
            },
        )
        .unwrap();
        assert!(!state.player.is_equipped("Longsword"));
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_equip_weapon_replaces_previous() {
        let mut state = sample_state();
        state.player.inventory.add(
            Item::new(
                "Shortbow",
                ItemKind::Weapon {
                    damage_die: 6,
                    attack_bonus: 0,
                    ranged: true,
                },
            ),
            1,
        );
        run(&mut state, equip_item, EquipItem { item: "Shortbow".into() }).unwrap();
        assert!(state.player.is_equipped("shortbow"));
        assert!(!state.player.is_equipped("longsword"));
        assert!(state.player.is_equipped("leather armor"));

        let potion = run(&mut state, equip_item, EquipItem { item: "Healing Potion".into() });
        assert!(potion.is_err());
    }

    #[test]
    fn test_damage_and_heal_clamp() {
        let mut state = sample_state();
        state.player.hit_points = HitPoints::new(10);
        run(&mut state, apply_damage, ApplyDamage { target: "player".into(), amount: 15 }).unwrap();
        assert_eq!(state.player.hit_points.current, 0);

        run(&mut state, heal, Heal { target: "Aria".into(), amount: 50 }).unwrap();
        assert_eq!(state.player.hit_points.current, 10);
    }

    #[test]
    fn test_damage_retires_npc() {
        let mut state = sample_state();
        let outcome = run(
            &mut state,
            apply_damage,
            ApplyDamage {
                target: "goblin".into(),
                amount: 100,
            },
        )
        .unwrap();
        assert!(outcome
            .effects
            .iter()
            .any(|e| matches!(e, Effect::CombatantDefeated { .. })));
        assert!(state.world.npcs_here().iter().all(|n| n.name != "Goblin"));
    }

    #[test]
    fn test_ability_check_reports_roll() {
        let mut state = sample_state();
        let outcome = run(
            &mut state,
            ability_check,
            AbilityCheck {
                ability: "Dexterity".into(),
                dc: 12,
                reason: Some("climb the wall".into()),
            },
        )
        .unwrap();
        match &outcome.effects[0] {
            Effect::CheckRolled { ability, roll, success } => {
                assert_eq!(*ability, Ability::Dexterity);
                assert_eq!(roll.modifier, 2);
                assert_eq!(*success, roll.total >= 12);
            }
            other => panic!("unexpected effect {other:?}"),
        }
        assert!(outcome.summary.contains("to climb the wall"));
    }

    #[test]
    fn test_spawn_npc_rejects_player_name() {
        let mut state = sample_state();
        let args = |name: &str| SpawnNpc {
            name: name.into(),
            disposition: "hostile".into(),
            max_hp: 5,
            defense: None,
            attack_bonus: None,
            damage_die: None,
            initiative_modifier: None,
            dexterity: None,
            xp_reward: None,
            gold: None,
        };
        assert!(run(&mut state, spawn_npc, args("aria")).is_err());
        assert!(run(&mut state, spawn_npc, args("Player")).is_err());
        assert!(run(&mut state, spawn_npc, args("Goblin")).is_err());
        run(&mut state, spawn_npc, args("Wolf")).unwrap();
        assert!(state.world.npc("wolf").is_some());
    }
}
