use super::{CombatOutcome, CombatPolicy, CombatSummary, EncounterPhase, Origin, Side};
use crate::progression;
use crate::tools::{Effect, Outcome, ToolCall, ToolContext};
use crate::validator::{StateValidator, ToolError};
use crate::world::GameState;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};

/// What happened when a combat tool was dispatched.
#[derive(Debug, Clone)]
pub struct CombatReport {
    /// The requested action itself.
    pub action: Result<Outcome, ToolError>,
    /// Set when the invalid-action limit forced a pass.
    pub forced_pass: Option<Outcome>,
    /// NPC turns run before control came back to the player.
    pub npc_turns: Vec<Outcome>,
    /// Set when the encounter ended during this dispatch.
    pub resolution: Option<Resolution>,
}

impl CombatReport {
    fn new(action: Result<Outcome, ToolError>) -> Self {
        Self {
            action,
            forced_pass: None,
            npc_turns: Vec::new(),
            resolution: None,
        }
    }

    /// Every successful outcome in the order it happened.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.action
            .as_ref()
            .ok()
            .into_iter()
            .chain(self.forced_pass.iter())
            .chain(self.npc_turns.iter())
            .chain(self.resolution.iter().map(|r| &r.outcome))
    }
}

/// A finished encounter folded back into persistent state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub summary: CombatSummary,
    pub outcome: Outcome,
}

/// Drives encounters: player actions, NPC turns and resolution.
#[derive(Debug, Clone)]
pub struct CombatEngine {
    validator: StateValidator,
    policy: CombatPolicy,
}

impl CombatEngine {
    pub fn new(validator: StateValidator, policy: CombatPolicy) -> Self {
        Self { validator, policy }
    }

    pub fn policy(&self) -> &CombatPolicy {
        &self.policy
    }

    /// Dispatch a combat tool requested by the narrator.
    ///
    /// `start_combat` opens an encounter; every other combat tool is taken as
    /// the player's action. After the player acts, NPCs take their turns until
    /// it is the player's turn again or the fight is over.
    pub fn dispatch(&self, state: &mut GameState, call: &ToolCall, rng: &mut StdRng) -> CombatReport {
        if call.name == "start_combat" {
            return self.start(state, call, rng);
        }

        let player_id = state
            .encounter
            .as_ref()
            .filter(|e| e.is_active())
            .and_then(|e| e.player())
            .map(|c| c.id);
        let Some(player_id) = player_id else {
            let mut ctx = ToolContext::narrator(rng, &self.policy);
            return CombatReport::new(self.validator.apply(state, call, &mut ctx));
        };

        let result = {
            let mut ctx = ToolContext::combatant(rng, &self.policy, player_id);
            self.validator.apply(state, call, &mut ctx)
        };
        let succeeded = result.is_ok();
        let mut report = CombatReport::new(result);

        if succeeded {
            if let Some(encounter) = state.encounter.as_mut() {
                encounter.clear_invalid(player_id);
            }
            self.finish_turn(state, rng, &mut report);
            return report;
        }

        let streak = match state.encounter.as_mut() {
            Some(encounter) => encounter.note_invalid(player_id),
            None => return report,
        };
        if streak < self.policy.invalid_action_limit {
            debug!(tool = %call.name, streak, "invalid combat action, turn not consumed");
            return report;
        }

        warn!(streak, "invalid action limit reached, forcing a pass");
        let pass = ToolCall::new("pass", json!({}));
        let forced = {
            let mut ctx = ToolContext::combatant(rng, &self.policy, player_id);
            self.validator.apply(state, &pass, &mut ctx)
        };
        match forced {
            Ok(outcome) => {
                report.forced_pass = Some(outcome);
                if let Some(encounter) = state.encounter.as_mut() {
                    encounter.clear_invalid(player_id);
                }
                self.finish_turn(state, rng, &mut report);
            }
            Err(e) => warn!(error = %e, "forced pass was rejected"),
        }
        report
    }

    fn start(&self, state: &mut GameState, call: &ToolCall, rng: &mut StdRng) -> CombatReport {
        let result = {
            let mut ctx = ToolContext::narrator(rng, &self.policy);
            self.validator.apply(state, call, &mut ctx)
        };
        let started = result.is_ok();
        let mut report = CombatReport::new(result);
        if !started {
            return report;
        }
        if let Some(encounter) = state.encounter.as_mut() {
            encounter.begin();
            info!(
                combatants = encounter.combatants().len(),
                ambush = encounter.ambush,
                "combat started"
            );
        }
        self.run_npc_turns(state, rng, &mut report);
        report
    }

    /// Resolve an encounter that a non-combat tool may have ended, e.g. damage
    /// dealt through `apply_damage`.
    pub fn settle(&self, state: &mut GameState) -> Option<Resolution> {
        state.encounter.as_mut()?.check_resolution()?;
        self.collapse(state)
    }

    fn finish_turn(&self, state: &mut GameState, rng: &mut StdRng, report: &mut CombatReport) {
        if self.resolve_if_over(state, report) {
            return;
        }
        if let Some(encounter) = state.encounter.as_mut() {
            encounter.advance();
        }
        self.run_npc_turns(state, rng, report);
    }

    fn resolve_if_over(&self, state: &mut GameState, report: &mut CombatReport) -> bool {
        let over = state
            .encounter
            .as_mut()
            .map_or(true, |e| e.check_resolution().is_some());
        if over {
            report.resolution = self.collapse(state);
        }
        over
    }

    /// Run NPC turns until the player is up or the fight ends.
    fn run_npc_turns(&self, state: &mut GameState, rng: &mut StdRng, report: &mut CombatReport) {
        // At most two passes through the queue.
        let limit = state
            .encounter
            .as_ref()
            .map_or(0, |e| e.combatants().len() * 2);

        for _ in 0..limit {
            if self.resolve_if_over(state, report) {
                return;
            }
            let Some(encounter) = state.encounter.as_ref() else {
                return;
            };
            let Some(current) = encounter.current() else {
                return;
            };
            if current.side == Side::Player {
                return;
            }

            let id = current.id;
            let opponents = encounter.opponents_of(id);
            let call = if opponents.is_empty() {
                ToolCall::new("pass", json!({}))
            } else {
                let target = opponents[rng.gen_range(0..opponents.len())];
                let name = encounter
                    .combatant(target)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                ToolCall::new("attack", json!({ "target": name }))
            };

            let result = {
                let mut ctx = ToolContext::combatant(rng, &self.policy, id);
                self.validator.apply(state, &call, &mut ctx)
            };
            match result {
                Ok(outcome) => {
                    debug!(combatant = %id, action = %call.signature(), "npc turn");
                    report.npc_turns.push(outcome);
                }
                Err(e) => warn!(combatant = %id, error = %e, "npc action rejected, skipping turn"),
            }

            if self.resolve_if_over(state, report) {
                return;
            }
            if let Some(encounter) = state.encounter.as_mut() {
                encounter.advance();
            }
        }
    }

    /// Fold a resolved encounter back into the player and the world, and discard it.
    fn collapse(&self, state: &mut GameState) -> Option<Resolution> {
        let encounter = state.encounter.take()?;
        let EncounterPhase::Resolved(outcome) = encounter.phase else {
            state.encounter = Some(encounter);
            return None;
        };

        let mut defeated = Vec::new();
        let mut xp = 0u32;
        let mut loot = 0u32;
        let mut effects = Vec::new();

        for c in encounter.combatants() {
            match &c.origin {
                Origin::Player => {
                    let hp = &mut state.player.hit_points;
                    hp.current = c.hit_points.current.clamp(0, hp.maximum);
                }
                Origin::Npc(key) if c.defeated => {
                    state.world.retire_npc(key);
                    defeated.push(c.name.clone());
                    if c.side == Side::Enemy {
                        xp = xp.saturating_add(c.xp_reward);
                        loot = loot.saturating_add(c.gold);
                    }
                }
                Origin::Npc(key) => {
                    if let Some(npc) = state.world.npc_mut(key) {
                        npc.hit_points = c.hit_points;
                    }
                }
            }
        }

        let gold = if outcome == CombatOutcome::Victory { loot } else { 0 };
        if gold > 0 {
            let from = state.player.gold;
            state.player.gold = from.saturating_add(gold);
            effects.push(Effect::GoldChanged {
                from,
                to: state.player.gold,
            });
        }

        let mut new_level = None;
        if xp > 0 {
            let award = progression::award_xp(&mut state.player, xp);
            effects.push(Effect::XpGained {
                amount: award.gained,
                total: award.total,
            });
            if award.leveled_up() {
                new_level = Some(award.new_level);
                effects.push(Effect::LeveledUp {
                    level: award.new_level,
                    max_hp: state.player.hit_points.maximum,
                });
            }
        }
        effects.push(Effect::CombatEnded { outcome, xp, gold });

        let summary = CombatSummary {
            outcome,
            rounds: encounter.round(),
            defeated,
            xp,
            gold,
            new_level,
        };
        info!(%outcome, rounds = summary.rounds, xp, gold, "combat resolved");
        state.last_combat = Some(summary.clone());

        Some(Resolution {
            outcome: Outcome {
                summary: format!("{summary}."),
                effects,
            },
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatStatus;
    use crate::testing::sample_state;
    use crate::tools::ToolRegistry;
    use rand::SeedableRng;

    fn engine() -> CombatEngine {
        CombatEngine::new(
            StateValidator::new(ToolRegistry::standard().unwrap()),
            CombatPolicy::default(),
        )
    }

    fn start(engine: &CombatEngine, state: &mut GameState, rng: &mut StdRng) -> CombatReport {
        let call = ToolCall::new("start_combat", json!({"participants": ["Goblin"]}));
        engine.dispatch(state, &call, rng)
    }

    #[test]
    fn test_start_runs_npcs_until_player_turn() {
        let engine = engine();
        for seed in 0..20 {
            let mut state = sample_state();
            let mut rng = StdRng::seed_from_u64(seed);
            let report = start(&engine, &mut state, &mut rng);
            assert!(report.action.is_ok());

            match &state.encounter {
                Some(encounter) => {
                    let current = encounter.current().unwrap();
                    assert_eq!(current.side, Side::Player, "seed {seed}");
                }
                None => assert!(report.resolution.is_some()),
            }
        }
    }

    #[test]
    fn test_invalid_action_does_not_consume_turn() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(4);
        start(&engine, &mut state, &mut rng);
        let before = state.clone();

        let bad = ToolCall::new("attack", json!({"target": "Dragon"}));
        let report = engine.dispatch(&mut state, &bad, &mut rng);

        assert!(report.action.is_err());
        assert!(report.npc_turns.is_empty());
        let enc = state.encounter.as_ref().unwrap();
        let old = before.encounter.as_ref().unwrap();
        assert_eq!(enc.current_id(), old.current_id());
        assert_eq!(enc.round(), old.round());
    }

    #[test]
    fn test_third_invalid_action_forces_pass() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(4);
        start(&engine, &mut state, &mut rng);

        let bad = ToolCall::new("attack", json!({"target": "Dragon"}));
        assert!(engine.dispatch(&mut state, &bad, &mut rng).forced_pass.is_none());
        assert!(engine.dispatch(&mut state, &bad, &mut rng).forced_pass.is_none());
        let third = engine.dispatch(&mut state, &bad, &mut rng);

        let forced = third.forced_pass.expect("third strike passes");
        assert!(matches!(forced.effects[0], Effect::Passed { .. }));
        // The goblin got its turn in before control came back.
        assert!(!third.npc_turns.is_empty() || third.resolution.is_some());
    }

    #[test]
    fn test_lethal_damage_resolves_to_defeat() {
        let engine = engine();
        let validator = StateValidator::new(ToolRegistry::standard().unwrap());
        let mut state = sample_state();
        state.player.hit_points.maximum = 10;
        state.player.hit_points.current = 10;
        state.world.npc_mut("goblin").unwrap().damage_die = 4;
        let mut rng = StdRng::seed_from_u64(2);
        start(&engine, &mut state, &mut rng);
        // Even a critical d4 cannot drop 10 HP in one round.
        assert!(state.encounter.is_some());

        let call = ToolCall::new("apply_damage", json!({"target": "player", "amount": 15}));
        let mut ctx = ToolContext::narrator(&mut rng, engine.policy());
        validator.apply(&mut state, &call, &mut ctx).unwrap();
        let resolution = engine.settle(&mut state).expect("defeat resolves the fight");

        assert_eq!(resolution.summary.outcome, CombatOutcome::Defeat);
        assert_eq!(state.player.hit_points.current, 0);
        assert!(state.encounter.is_none());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_victory_awards_xp_and_gold() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(6);
        start(&engine, &mut state, &mut rng);
        let gold_before = state.player.gold;

        let mut resolution = None;
        for _ in 0..50 {
            let report = engine.dispatch(
                &mut state,
                &ToolCall::new("attack", json!({"target": "Goblin"})),
                &mut rng,
            );
            if let Some(r) = report.resolution {
                resolution = Some(r);
                break;
            }
        }
        let resolution = resolution.expect("fight ends");
        assert!(state.encounter.is_none());
        if resolution.summary.outcome == CombatOutcome::Victory {
            let goblin = state.world.npc("Goblin").unwrap();
            assert!(goblin.defeated);
            assert!(state.world.npcs_here().is_empty());
            assert_eq!(state.player.gold, gold_before + goblin.gold);
            assert_eq!(resolution.summary.xp, goblin.xp_reward);
        }
        assert_eq!(state.last_combat.as_ref(), Some(&resolution.summary));
    }

    #[test]
    fn test_successful_flee_keeps_enemy_alive() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(8);
        start(&engine, &mut state, &mut rng);
        if state.encounter.is_none() {
            return;
        }

        let report = engine.dispatch(&mut state, &ToolCall::new("flee", json!({})), &mut rng);
        let resolution = report.resolution.expect("fleeing outside an ambush always works");
        assert_eq!(resolution.summary.outcome, CombatOutcome::Fled);
        assert!(!state.world.npc("Goblin").unwrap().defeated);
        assert_eq!(state.encounter, None);
    }

    #[test]
    fn test_level_up_mid_fight_keeps_its_hit_points() {
        let engine = engine();
        let validator = StateValidator::new(ToolRegistry::standard().unwrap());
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(8);
        start(&engine, &mut state, &mut rng);
        let Some(encounter) = &state.encounter else {
            return;
        };
        let before = encounter.player().unwrap().hit_points;
        let max_before = state.player.hit_points.maximum;

        let call = ToolCall::new("award_xp", json!({"amount": 50}));
        let mut ctx = ToolContext::narrator(&mut rng, engine.policy());
        validator.apply(&mut state, &call, &mut ctx).unwrap();
        let gained = state.player.hit_points.maximum - max_before;
        assert!(gained > 0);
        let snapshot = state.encounter.as_ref().unwrap().player().unwrap().hit_points;
        assert_eq!(snapshot.maximum, state.player.hit_points.maximum);
        assert_eq!(snapshot.current, before.current + gained);

        let report = engine.dispatch(&mut state, &ToolCall::new("flee", json!({})), &mut rng);
        assert!(report.resolution.is_some());
        assert_eq!(state.player.hit_points.current, before.current + gained);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_combat_tool_outside_combat_is_rejected() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(1);
        let report = engine.dispatch(&mut state, &ToolCall::new("defend", json!({})), &mut rng);
        assert!(matches!(report.action, Err(ToolError::InvalidToolCall { .. })));
        assert!(state.encounter.is_none());
    }

    #[test]
    fn test_status_reports_active_round() {
        let engine = engine();
        let mut state = sample_state();
        let mut rng = StdRng::seed_from_u64(10);
        start(&engine, &mut state, &mut rng);
        if let Some(encounter) = &state.encounter {
            match encounter.status() {
                CombatStatus::Active { round, acting, order } => {
                    assert!(round >= 1);
                    assert_eq!(acting.as_deref(), Some("Aria"));
                    assert_eq!(order.len(), 2);
                }
                other => panic!("unexpected status {other:?}"),
            }
        }
    }
}
