//! Testing utilities for the dungeon master engine.
//!
//! This module provides tools for integration testing:
//! - `MockNarrator` for deterministic turns without API calls
//! - `TestHarness` for scripted campaign scenarios
//! - Sample fixtures and assertion helpers for verifying game state

use crate::context::ConversationTurn;
use crate::dm::{
    DmError, DmOrchestrator, NarrationRequest, Narrator, NarratorError, NarratorReply,
    OrchestratorConfig, RetryPolicy, TurnResult,
};
use crate::persist::InMemoryGateway;
use crate::session::CampaignSession;
use crate::tools::{ToolCall, ToolRegistry};
use crate::world::{
    AbilityScores, Disposition, GameState, Item, ItemKind, Location, Npc, Player, World,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixtures
// ============================================================================

/// A level 1 ranger with a sword, armor and two potions.
pub fn sample_player() -> Player {
    let mut player = Player::new("Aria", "Ranger", AbilityScores::default(), 12);
    player.gold = 15;

    let sword = Item::new(
        "Longsword",
        ItemKind::Weapon {
            damage_die: 8,
            attack_bonus: 0,
            ranged: false,
        },
    );
    let armor = Item::new("Leather Armor", ItemKind::Armor { defense: 1 });
    let potion = Item::new("Healing Potion", ItemKind::Consumable { heal: 5 });

    player.equipped.push(sword.key());
    player.equipped.push(armor.key());
    player.inventory.add(sword, 1);
    player.inventory.add(armor, 1);
    player.inventory.add(potion, 2);
    player
}

/// Crossroads Inn - Market Square - Old Mill, with a goblin at the inn.
pub fn sample_world() -> World {
    let mut world = World::new(Location::new(
        "Crossroads Inn",
        "A smoky common room where three roads meet.",
    ));
    world.add_location(Location::new(
        "Market Square",
        "Stalls and shouting merchants.",
    ));
    world.add_location(Location::new(
        "Old Mill",
        "A waterwheel that has not turned in years.",
    ));
    world.connect("Crossroads Inn", "Market Square");
    world.connect("Market Square", "Old Mill");

    let mut goblin = Npc::new("Goblin", Disposition::Hostile, 7);
    goblin.defense = 1;
    goblin.attack_bonus = 1;
    goblin.damage_die = 6;
    goblin.initiative_modifier = 2;
    goblin.dexterity = 14;
    goblin.xp_reward = 50;
    goblin.gold = 8;
    world.spawn_npc(goblin);
    world
}

pub fn sample_state() -> GameState {
    GameState::new(sample_player(), sample_world())
}

/// A session with a short conversation already on record.
pub fn sample_session() -> CampaignSession {
    let mut session = CampaignSession::new("The Crossroads", sample_state(), 42);
    session.log.append(ConversationTurn::player("I look around the inn."));
    session.log.append(ConversationTurn::narrator(
        "Smoke curls from the hearth. A goblin eyes your purse from the corner.",
        Vec::new(),
    ));
    session.turn_count = 1;
    session
}

/// Orchestrator settings with millisecond backoff so failing tests stay fast.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            request_timeout: Duration::from_secs(5),
        },
        ..OrchestratorConfig::default()
    }
}

// ============================================================================
// Mock narrator
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Reply(NarratorReply),
    Unavailable,
    Fatal,
}

/// A scripted response from the mock narrator.
#[derive(Debug, Clone)]
pub struct MockResponse {
    scripted: Scripted,
    delay: Option<Duration>,
}

impl MockResponse {
    /// A narration with no tool calls.
    pub fn narrative(text: impl Into<String>) -> Self {
        Self::reply(NarratorReply::text(text))
    }

    /// A narration plus tool calls, applied in order.
    pub fn with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self::reply(NarratorReply {
            narration: text.into(),
            tool_calls: calls,
        })
    }

    /// Shorthand for a response making a single call.
    pub fn call(text: impl Into<String>, tool: &str, arguments: Value) -> Self {
        Self::with_calls(text, vec![ToolCall::new(tool, arguments)])
    }

    pub fn reply(reply: NarratorReply) -> Self {
        Self {
            scripted: Scripted::Reply(reply),
            delay: None,
        }
    }

    /// A transient failure the orchestrator should retry.
    pub fn unavailable() -> Self {
        Self {
            scripted: Scripted::Unavailable,
            delay: None,
        }
    }

    /// A failure no retry will fix.
    pub fn fatal() -> Self {
        Self {
            scripted: Scripted::Fatal,
            delay: None,
        }
    }

    /// Hold the response back for `delay` before returning it.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A narrator that returns scripted responses in order.
///
/// Every request is recorded so tests can inspect what the narrator was shown.
#[derive(Debug, Default)]
pub struct MockNarrator {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<NarrationRequest>>,
    calls: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockNarrator {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn queue(&self, response: MockResponse) {
        locked(&self.responses).push_back(response);
    }

    /// Number of narrate calls, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        locked(&self.responses).len()
    }

    pub fn requests(&self) -> Vec<NarrationRequest> {
        locked(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<NarrationRequest> {
        locked(&self.requests).last().cloned()
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarratorReply, NarratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.requests).push(request.clone());
        let next = locked(&self.responses).pop_front();

        let Some(response) = next else {
            return Ok(NarratorReply::text("The narrator has no more scripted responses."));
        };
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        match response.scripted {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Unavailable => Err(NarratorError::Unavailable("scripted outage".to_string())),
            Scripted::Fatal => Err(NarratorError::Provider(claude::Error::NoApiKey)),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness for running campaign scenarios against a mock narrator.
pub struct TestHarness {
    pub narrator: Arc<MockNarrator>,
    pub gateway: Arc<InMemoryGateway>,
    pub orchestrator: DmOrchestrator,
    pub session: CampaignSession,
}

impl TestHarness {
    /// A harness around the sample state.
    pub fn new() -> Self {
        Self::with_state(sample_state())
    }

    pub fn with_state(state: GameState) -> Self {
        Self::with_config(state, test_config())
    }

    pub fn with_config(state: GameState, config: OrchestratorConfig) -> Self {
        let narrator = Arc::new(MockNarrator::default());
        let gateway = Arc::new(InMemoryGateway::new());
        let registry = ToolRegistry::standard().expect("standard tool names are unique");
        let orchestrator =
            DmOrchestrator::new(narrator.clone(), gateway.clone(), registry, config);

        Self {
            narrator,
            gateway,
            orchestrator,
            session: CampaignSession::new("Test Campaign", state, 7),
        }
    }

    /// Queue a narration-only response.
    pub fn expect_narrative(&mut self, text: impl Into<String>) -> &mut Self {
        self.narrator.queue(MockResponse::narrative(text));
        self
    }

    pub fn expect_response(&mut self, response: MockResponse) -> &mut Self {
        self.narrator.queue(response);
        self
    }

    /// Run one player turn.
    pub async fn input(&mut self, text: &str) -> Result<TurnResult, DmError> {
        self.input_with_cancel(text, &CancellationToken::new()).await
    }

    pub async fn input_with_cancel(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, DmError> {
        self.orchestrator
            .run_turn(&mut self.session, text, cancel)
            .await
    }

    pub fn state(&self) -> &GameState {
        &self.session.state
    }

    /// Current player HP as (current, max).
    pub fn player_hp(&self) -> (i32, i32) {
        let hp = self.session.state.player_hit_points();
        (hp.current, hp.maximum)
    }

    pub fn in_combat(&self) -> bool {
        self.session.state.in_combat()
    }

    pub fn location(&self) -> &str {
        self.session
            .state
            .world
            .current_location()
            .map_or("", |l| l.name.as_str())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert player HP is at expected values.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, current: i32, max: i32) {
    let (actual_current, actual_max) = harness.player_hp();
    assert_eq!(
        (actual_current, actual_max),
        (current, max),
        "Expected HP {current}/{max}, got {actual_current}/{actual_max}"
    );
}

#[track_caller]
pub fn assert_in_combat(harness: &TestHarness) {
    assert!(harness.in_combat(), "Expected to be in combat");
}

#[track_caller]
pub fn assert_not_in_combat(harness: &TestHarness) {
    assert!(!harness.in_combat(), "Expected to NOT be in combat");
}

#[track_caller]
pub fn assert_location(harness: &TestHarness, name: &str) {
    assert_eq!(harness.location(), name, "Expected the player at '{name}'");
}

/// Assert the player carries exactly `quantity` of an item.
#[track_caller]
pub fn assert_has_item(harness: &TestHarness, item: &str, quantity: u32) {
    let actual = harness.state().player.inventory.quantity_of(item);
    assert_eq!(actual, quantity, "Expected {quantity} x '{item}', found {actual}");
}
