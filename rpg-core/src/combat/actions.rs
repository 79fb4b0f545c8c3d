//! Combat tools. Every action a combatant takes goes through the validator as one of these.

use super::{CombatAction, CombatEncounter, CombatOutcome, Combatant, CombatantId, Side};
use crate::dice::CheckRoll;
use crate::tools::builtin::is_player_target;
use crate::tools::{
    Actor, DuplicateToolError, Effect, Outcome, Rejection, ToolContext, ToolKind,
    ToolRegistryBuilder,
};
use crate::world::{name_key, Ability, Disposition, GameState, ItemKind};
use rpg_macros::Tool;
use serde::Deserialize;

pub fn register(builder: ToolRegistryBuilder) -> Result<ToolRegistryBuilder, DuplicateToolError> {
    builder
        .register::<StartCombat, _>(ToolKind::Combat, start_combat)?
        .register::<Attack, _>(ToolKind::Combat, attack)?
        .register::<Defend, _>(ToolKind::Combat, defend)?
        .register::<Flee, _>(ToolKind::Combat, flee)?
        .register::<UseItem, _>(ToolKind::Combat, use_item)?
        .register::<Pass, _>(ToolKind::Combat, pass)
}

/// Start a fight between the player and NPCs present at the current location.
#[derive(Debug, Tool, Deserialize)]
pub struct StartCombat {
    /// Names of the NPCs joining the fight; the player always takes part
    pub participants: Vec<String>,
    /// True when the player was caught by surprise
    #[tool(optional)]
    pub ambush: Option<bool>,
}

/// Attack an opposing combatant.
#[derive(Debug, Tool, Deserialize)]
pub struct Attack {
    /// Name of the combatant to attack
    pub target: String,
}

/// Take a defensive stance until your next turn.
#[derive(Debug, Tool, Deserialize)]
pub struct Defend {}

/// Try to escape the fight. With a `dc` the escape is an ability check
/// (dexterity unless another ability is named); without one the house rule
/// applies: a clean getaway unless ambushed.
#[derive(Debug, Tool, Deserialize)]
pub struct Flee {
    /// Ability tested when a `dc` is given
    #[tool(one_of = "strength|dexterity|constitution|intelligence|wisdom|charisma")]
    pub ability: Option<String>,
    /// Difficulty class of the escape
    #[tool(min = 1, max = 30)]
    pub dc: Option<i64>,
    /// Damage the player takes if the escape fails
    #[tool(optional, min = 0, max = 100)]
    pub failure_damage: Option<i64>,
}

/// Drink or use a consumable from the inventory.
#[derive(Debug, Tool, Deserialize)]
pub struct UseItem {
    /// Name of a consumable item in the inventory
    pub item: String,
}

/// Do nothing this turn.
#[derive(Debug, Tool, Deserialize)]
pub struct Pass {}

fn start_combat(
    state: &mut GameState,
    args: StartCombat,
    ctx: &mut ToolContext<'_>,
) -> Result<Outcome, Rejection> {
    if state.in_combat() {
        return Err(Rejection::new("a fight is already under way"));
    }
    if state.player.hit_points.is_down() {
        return Err(Rejection::new("the player is in no state to fight"));
    }

    let here = state
        .world
        .current_location()
        .map(|l| l.present.clone())
        .unwrap_or_default();

    let mut combatants = vec![Combatant::from_player(
        CombatantId(0),
        &state.player,
        ctx.policy,
    )];
    let mut joined: Vec<String> = Vec::new();
    for name in &args.participants {
        if is_player_target(name, &state.player.name) {
            continue;
        }
        let npc = state
            .world
            .npc(name)
            .ok_or_else(|| Rejection::new(format!("no NPC named `{name}`")))?;
        let key = npc.key();
        if npc.defeated {
            return Err(Rejection::new(format!("{} is already defeated", npc.name)));
        }
        if !here.contains(&key) {
            return Err(Rejection::new(format!("{} is not here", npc.name)));
        }
        if joined.contains(&key) {
            continue;
        }
        let side = match npc.disposition {
            Disposition::Ally => Side::Ally,
            Disposition::Hostile | Disposition::Neutral => Side::Enemy,
        };
        combatants.push(Combatant::from_npc(CombatantId(0), npc, side));
        joined.push(key);
    }
    if !combatants.iter().any(|c| c.side == Side::Enemy) {
        return Err(Rejection::new("combat needs at least one opponent"));
    }

    let ambush = args.ambush.unwrap_or(false);
    let mut encounter = CombatEncounter::new(ambush, combatants);
    encounter.roll_initiative(ctx.rng, ctx.policy);

    let order: Vec<String> = encounter
        .turn_order()
        .iter()
        .filter_map(|id| encounter.combatant(*id))
        .map(|c| format!("{} ({})", c.name, c.initiative))
        .collect();
    let summary = format!(
        "{}Combat begins. Initiative: {}.",
        if ambush { "Ambush! " } else { "" },
        order.join(", ")
    );

    state.encounter = Some(encounter);
    state.last_combat = None;
    Ok(Outcome::new(summary).with(Effect::CombatStarted { order }))
}

/// The encounter and the id of the combatant whose turn it is, provided the
/// call is made by that combatant and it may take `action`.
fn acting<'s>(
    state: &'s mut GameState,
    ctx: &ToolContext<'_>,
    action: CombatAction,
) -> Result<(&'s mut CombatEncounter, CombatantId), Rejection> {
    let encounter = state
        .encounter
        .as_mut()
        .filter(|e| e.is_active())
        .ok_or_else(|| Rejection::new("there is no fight under way"))?;
    let id = current_actor(encounter, ctx, action)?;
    Ok((encounter, id))
}

fn attack(state: &mut GameState, args: Attack, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let (encounter, attacker_id) = acting(state, ctx, CombatAction::Attack)?;
    let target_id = encounter
        .find(&args.target)
        .ok_or_else(|| Rejection::new(format!("no combatant named `{}`", args.target)))?;

    let (attacker, target) = match (encounter.combatant(attacker_id), encounter.combatant(target_id)) {
        (Some(a), Some(t)) => (a, t),
        _ => return Err(Rejection::new("unknown combatant")),
    };
    if target.id == attacker.id {
        return Err(Rejection::new(format!("{} cannot attack themselves", attacker.name)));
    }
    if target.defeated {
        return Err(Rejection::new(format!("{} is already defeated", target.name)));
    }
    if !attacker.side.opposes(target.side) {
        return Err(Rejection::new(format!("{} is on {}'s side", target.name, attacker.name)));
    }

    let policy = ctx.policy;
    let defense = target.defense + if target.defending { policy.defend_bonus } else { 0 };
    let to_hit = policy.roll_attack(ctx.rng, attacker.attack_modifier, policy.armor_class(defense));
    let attacker_name = attacker.name.clone();
    let target_name = target.name.clone();
    let attack_modifier = attacker.attack_modifier;
    let damage_die = attacker.damage_die;

    if !to_hit.hit {
        return Ok(Outcome::new(format!(
            "{attacker_name} misses {target_name} ({}).",
            to_hit.check
        ))
        .with(Effect::Attacked {
            attacker: attacker_name,
            target: target_name,
            to_hit: to_hit.check,
            hit: false,
            critical: false,
            roll: 0,
            damage: 0,
        }));
    }

    let roll = policy.roll_damage(ctx.rng, damage_die, to_hit.critical);
    let damage = policy.damage(attack_modifier, roll, defense);
    let (from, to, newly_defeated) = encounter
        .damage(target_id, damage)
        .ok_or_else(|| Rejection::new("unknown combatant"))?;
    let maximum = encounter
        .combatant(target_id)
        .map(|c| c.hit_points.maximum)
        .unwrap_or(from);

    let verb = if to_hit.critical { "critically hits" } else { "hits" };
    let mut outcome = Outcome::new(format!(
        "{attacker_name} {verb} {target_name} ({}) for {damage} damage (rolled {roll}); {target_name} is at {to}/{maximum} HP.",
        to_hit.check
    ))
    .with(Effect::Attacked {
        attacker: attacker_name,
        target: target_name.clone(),
        to_hit: to_hit.check,
        hit: true,
        critical: to_hit.critical,
        roll,
        damage,
    })
    .with(Effect::HpChanged {
        target: target_name.clone(),
        from,
        to,
        maximum,
    });
    if newly_defeated {
        outcome.summary.push_str(&format!(" {target_name} is defeated."));
        outcome.push(Effect::CombatantDefeated { name: target_name });
    }
    Ok(outcome)
}

fn defend(state: &mut GameState, _: Defend, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let bonus = ctx.policy.defend_bonus;
    let (encounter, id) = acting(state, ctx, CombatAction::Defend)?;
    let combatant = encounter
        .combatant_mut(id)
        .ok_or_else(|| Rejection::new("unknown combatant"))?;
    combatant.defending = true;
    let who = combatant.name.clone();
    Ok(Outcome::new(format!("{who} takes a defensive stance (+{bonus} defense).")).with(Effect::Defended { who }))
}

fn flee(state: &mut GameState, args: Flee, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let failure_damage = args
        .failure_damage
        .map(|n| i32::try_from(n).map_err(|_| Rejection::new("`failure_damage` is out of range")))
        .transpose()?
        .unwrap_or(0);
    let ability = match args.ability.as_deref() {
        Some(raw) => Ability::parse(raw).ok_or_else(|| Rejection::new(format!("unknown ability `{raw}`")))?,
        None => Ability::Dexterity,
    };
    let dc = args
        .dc
        .map(|n| i32::try_from(n).map_err(|_| Rejection::new("`dc` is out of range")))
        .transpose()?;
    // Only the player can flee, so the check uses the player's scores.
    let modifier = state.player.abilities.modifier(ability);
    let (encounter, id) = acting(state, ctx, CombatAction::Flee)?;

    let check = dc.map(|dc| CheckRoll::roll(ctx.rng, modifier, dc));
    let success = match check {
        Some(check) => check.succeeded(),
        None => ctx.policy.flee_succeeds(ctx.rng, encounter.ambush),
    };
    let who = encounter
        .combatant(id)
        .map(|c| c.name.clone())
        .ok_or_else(|| Rejection::new("unknown combatant"))?;
    let rolled = check
        .map(|c| format!(" ({} check: {c})", ability.name()))
        .unwrap_or_default();

    if success {
        encounter.resolve(CombatOutcome::Fled);
        return Ok(Outcome::new(format!("{who} escapes the fight{rolled}."))
            .with(Effect::FleeAttempted { who, check, success }));
    }

    let mut outcome = Outcome::new(format!("{who} fails to escape{rolled}.")).with(Effect::FleeAttempted {
        who: who.clone(),
        check,
        success,
    });
    if failure_damage > 0 {
        let (from, to, newly) = encounter
            .damage(id, failure_damage)
            .ok_or_else(|| Rejection::new("unknown combatant"))?;
        let maximum = encounter
            .combatant(id)
            .map(|c| c.hit_points.maximum)
            .unwrap_or(from);
        outcome.summary.push_str(&format!(" {who} takes {failure_damage} damage."));
        outcome.push(Effect::HpChanged {
            target: who.clone(),
            from,
            to,
            maximum,
        });
        if newly {
            outcome.push(Effect::CombatantDefeated { name: who });
        }
    }
    Ok(outcome)
}

fn use_item(state: &mut GameState, args: UseItem, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let heal = match state.player.inventory.find(&args.item).map(|s| &s.item.kind) {
        Some(ItemKind::Consumable { heal }) => *heal,
        Some(_) => return Err(Rejection::new(format!("{} cannot be used in combat", args.item))),
        None => return Err(Rejection::new(format!("no `{}` in the inventory", args.item))),
    };

    let GameState { player, encounter, .. } = state;
    let item_key = name_key(&args.item);
    // Split borrow: the inventory changes alongside the encounter.
    let encounter = encounter
        .as_mut()
        .filter(|e| e.is_active())
        .ok_or_else(|| Rejection::new("there is no fight under way"))?;
    let id = current_actor(encounter, ctx, CombatAction::UseItem)?;

    let remaining = player
        .inventory
        .remove(&item_key, 1)
        .ok_or_else(|| Rejection::new(format!("no `{}` in the inventory", args.item)))?;
    let item_name = args.item.trim().to_string();

    let combatant = encounter
        .combatant_mut(id)
        .ok_or_else(|| Rejection::new("unknown combatant"))?;
    let from = combatant.hit_points.current;
    combatant.hit_points.heal(heal);
    let hp = combatant.hit_points;
    let who = combatant.name.clone();

    Ok(Outcome::new(format!("{who} uses {item_name} and is at {hp} HP."))
        .with(Effect::ItemLost {
            item: item_name,
            quantity: 1,
            remaining,
        })
        .with(Effect::HpChanged {
            target: who,
            from,
            to: hp.current,
            maximum: hp.maximum,
        }))
}

fn pass(state: &mut GameState, _: Pass, ctx: &mut ToolContext<'_>) -> Result<Outcome, Rejection> {
    let (encounter, id) = acting(state, ctx, CombatAction::Pass)?;
    let who = encounter
        .combatant(id)
        .map(|c| c.name.clone())
        .ok_or_else(|| Rejection::new("unknown combatant"))?;
    Ok(Outcome::new(format!("{who} waits.")).with(Effect::Passed { who }))
}

fn current_actor(
    encounter: &CombatEncounter,
    ctx: &ToolContext<'_>,
    action: CombatAction,
) -> Result<CombatantId, Rejection> {
    let current = encounter
        .current()
        .ok_or_else(|| Rejection::new("the fight has not started yet"))?;
    match ctx.actor {
        Actor::Combatant(id) if id == current.id => {}
        Actor::Combatant(_) => return Err(Rejection::new(format!("it is {}'s turn", current.name))),
        Actor::Narrator => return Err(Rejection::new("combat actions must be taken by a combatant")),
    }
    if !current.can(action) {
        return Err(Rejection::new(format!("{} cannot {}", current.name, action.tool_name())));
    }
    Ok(current.id)
}
