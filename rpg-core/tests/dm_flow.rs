//! Turn-loop tests driven by a scripted narrator.
//!
//! No network access: every reply comes from `MockNarrator`.

use rpg_core::context::{ContextConfig, TurnRole};
use rpg_core::dm::{DmError, DmOrchestrator, OrchestratorConfig};
use rpg_core::persist::{InMemoryGateway, PersistenceGateway};
use rpg_core::testing::{
    assert_has_item, assert_hp, assert_location, assert_not_in_combat, sample_state, test_config,
    MockNarrator, MockResponse, TestHarness,
};
use rpg_core::tools::{Effect, ToolCall, ToolRegistry};
use rpg_core::CampaignSession;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// BASIC FLOW
// =============================================================================

#[tokio::test]
async fn test_turn_applies_calls_and_saves() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::with_calls(
            "You buy a coil of rope and stroll to the market.",
            vec![
                ToolCall::new("grant_item", json!({"item": "Rope", "quantity": 1})),
                ToolCall::new("adjust_gold", json!({"amount": -2, "reason": "rope"})),
                ToolCall::new("move", json!({"destination": "Market Square"})),
            ],
        ))
        .expect_narrative("The market hums around you.");

    let result = harness.input("Buy rope, then head to the market.").await.unwrap();

    assert_location(&harness, "Market Square");
    assert_has_item(&harness, "Rope", 1);
    assert_eq!(harness.state().player.gold, 13);
    assert!(result.rejected_calls.is_empty());
    assert!(result
        .delta
        .iter()
        .any(|e| matches!(e, Effect::Moved { to, .. } if to == "Market Square")));
    assert_eq!(
        result.narration,
        "You buy a coil of rope and stroll to the market.\n\nThe market hums around you."
    );

    assert!(!harness.session.is_dirty());
    assert_eq!(harness.gateway.save_count(), 1);
    let saved = harness.gateway.load_session(harness.session.id).await.unwrap();
    assert_eq!(saved.state, harness.session.state);
}

#[tokio::test]
async fn test_log_records_every_round() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::call("Let me check.", "view_inventory", json!({})))
        .expect_narrative("You carry a longsword and two potions.");

    harness.input("What am I carrying?").await.unwrap();

    let roles: Vec<TurnRole> = harness.session.log.turns().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::Player,
            TurnRole::Narrator,
            TurnRole::ToolResult,
            TurnRole::Narrator
        ]
    );
    assert_eq!(harness.session.turn_count, 1);
}

#[tokio::test]
async fn test_narrator_sees_standing_summary() {
    let mut harness = TestHarness::new();
    harness.expect_narrative("Welcome back.");
    harness.input("Where am I?").await.unwrap();

    let request = harness.narrator.last_request().unwrap();
    assert!(request.window.summary.contains("HP: 12/12"));
    assert!(request.window.summary.contains("Crossroads Inn"));
    assert_eq!(request.tools.len(), ToolRegistry::standard().unwrap().len());
    let last = request.window.turns.last().unwrap();
    assert_eq!(last.role, TurnRole::Player);
    assert_eq!(last.content, "Where am I?");
}

// =============================================================================
// REJECTED CALLS
// =============================================================================

#[tokio::test]
async fn test_move_to_unknown_place_is_rejected_and_reported() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::call(
            "You set off for the Whispering Woods.",
            "move",
            json!({"destination": "Whispering Woods"}),
        ))
        .expect_narrative("The road to the woods is not one you know yet. You stay at the inn.");

    let result = harness.input("I walk to the Whispering Woods.").await.unwrap();

    assert_location(&harness, "Crossroads Inn");
    assert_eq!(result.rejected_calls.len(), 1);
    assert!(result.rejected_calls[0].is_rejected());
    assert!(!result.narration.contains("REJECTED"));

    // The second narrator call was shown why.
    let requests = harness.narrator.requests();
    assert_eq!(requests.len(), 2);
    let feedback = requests[1].window.turns.last().unwrap();
    assert_eq!(feedback.role, TurnRole::ToolResult);
    assert!(feedback.content.contains("REJECTED (invalid_tool_call)"));
}

#[tokio::test]
async fn test_invariant_breach_rolls_back_single_call() {
    let mut state = sample_state();
    state.player.inventory.capacity = state.player.inventory.total_quantity();
    let mut harness = TestHarness::with_state(state);
    harness
        .expect_response(MockResponse::with_calls(
            "You find arrows and a few coins.",
            vec![
                ToolCall::new("grant_item", json!({"item": "Arrow", "quantity": 20})),
                ToolCall::new("adjust_gold", json!({"amount": 3})),
            ],
        ))
        .expect_narrative("Your pack is too full for the arrows.");

    let result = harness.input("Search the room.").await.unwrap();

    assert_has_item(&harness, "Arrow", 0);
    assert_eq!(harness.state().player.gold, 18);
    assert_eq!(result.rejected_calls.len(), 1);
    assert!(harness.state().check_invariants().is_ok());
}

#[tokio::test]
async fn test_tool_rounds_are_capped() {
    let mut harness = TestHarness::new();
    for _ in 0..6 {
        harness.expect_response(MockResponse::call("Hmm.", "view_inventory", json!({})));
    }

    let result = harness.input("Think hard.").await.unwrap();
    assert_eq!(result.rounds, 5);
    assert_eq!(harness.narrator.remaining(), 1);
}

// =============================================================================
// NARRATOR FAILURES
// =============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::unavailable())
        .expect_response(MockResponse::unavailable())
        .expect_narrative("Third time lucky.");

    let result = harness.input("Hello?").await.unwrap();
    assert_eq!(result.narration, "Third time lucky.");
    assert_eq!(harness.narrator.call_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_leave_state_untouched() {
    let mut harness = TestHarness::new();
    for _ in 0..3 {
        harness.expect_response(MockResponse::unavailable());
    }
    let before = harness.state().clone();
    let log_len = harness.session.log.len();

    let err = harness.input("Hello?").await.unwrap_err();

    assert!(matches!(err, DmError::NarrationUnavailable { attempts: 3, .. }));
    assert_eq!(harness.state(), &before);
    // The input is kept so the turn can be retried from a consistent point.
    assert_eq!(harness.session.log.len(), log_len + 1);
    assert_eq!(harness.gateway.save_count(), 0);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::fatal())
        .expect_narrative("never reached");

    let err = harness.input("Hello?").await.unwrap_err();
    assert!(matches!(err, DmError::NarrationUnavailable { attempts: 1, .. }));
    assert_eq!(harness.narrator.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_narrator_times_out_and_retries() {
    let mut config = test_config();
    config.retry.request_timeout = Duration::from_secs(1);
    let mut harness = TestHarness::with_config(sample_state(), config);
    harness
        .expect_response(MockResponse::narrative("too late").delayed(Duration::from_secs(30)))
        .expect_narrative("Right on time.");

    let result = harness.input("Hello?").await.unwrap();
    assert_eq!(result.narration, "Right on time.");
    assert_eq!(harness.narrator.call_count(), 2);
}

#[tokio::test]
async fn test_context_overflow_aborts_before_narration() {
    let config = OrchestratorConfig {
        context: ContextConfig {
            token_budget: 10,
            ..ContextConfig::default()
        },
        ..test_config()
    };
    let mut harness = TestHarness::with_config(sample_state(), config);
    harness.expect_narrative("unused");
    let before = harness.state().clone();

    let err = harness.input("Hello?").await.unwrap_err();
    assert!(matches!(err, DmError::ContextOverflow(_)));
    assert_eq!(harness.narrator.call_count(), 0);
    assert_eq!(harness.state(), &before);
}

// =============================================================================
// CANCELLATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_narration_discards_reply() {
    let mut harness = TestHarness::new();
    harness.expect_response(
        MockResponse::call("Gold rains from the ceiling!", "adjust_gold", json!({"amount": 500}))
            .delayed(Duration::from_secs(2)),
    );
    let before = harness.state().clone();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = harness.input_with_cancel("Pray for riches.", &cancel).await.unwrap_err();
    assert!(matches!(err, DmError::Cancelled));
    assert_eq!(harness.state(), &before);
    assert_eq!(harness.gateway.save_count(), 0);
}

#[tokio::test]
async fn test_already_cancelled_turn_never_calls_narrator() {
    let mut harness = TestHarness::new();
    harness.expect_narrative("unused");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness.input_with_cancel("Hello?", &cancel).await.unwrap_err();
    assert!(matches!(err, DmError::Cancelled));
    assert_eq!(harness.narrator.call_count(), 0);
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[tokio::test]
async fn test_failed_save_is_retried_next_turn() {
    let mut harness = TestHarness::new();
    harness
        .expect_response(MockResponse::call(
            "You head out.",
            "move",
            json!({"destination": "Market Square"}),
        ))
        .expect_narrative("The square is busy.")
        .expect_narrative("A merchant waves.");
    harness.gateway.fail_next_saves(1);

    let err = harness.input("Go to the market.").await.unwrap_err();
    match err {
        DmError::Persistence { result, .. } => {
            assert!(result.narration.contains("You head out."));
        }
        other => panic!("expected a persistence error, got {other:?}"),
    }
    // Applied in memory, not yet durable.
    assert_location(&harness, "Market Square");
    assert!(harness.session.is_dirty());
    assert!(!harness.gateway.contains(harness.session.id).await);

    harness.input("Look around.").await.unwrap();
    assert!(!harness.session.is_dirty());
    let saved = harness.gateway.load_session(harness.session.id).await.unwrap();
    assert_eq!(saved.state.world.current_key(), "market square");
    assert_eq!(saved.turn_count, 2);
}

#[tokio::test]
async fn test_flush_only_saves_when_dirty() {
    let mut harness = TestHarness::new();
    harness.expect_narrative("Quiet night.");
    harness.input("Rest.").await.unwrap();
    assert_eq!(harness.gateway.save_count(), 1);

    harness.orchestrator.flush(&mut harness.session).await.unwrap();
    assert_eq!(harness.gateway.save_count(), 1);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_independent_sessions_run_concurrently() {
    let narrator = Arc::new(MockNarrator::new(vec![
        MockResponse::narrative("Rain falls.").delayed(Duration::from_millis(20)),
        MockResponse::narrative("Rain falls.").delayed(Duration::from_millis(20)),
    ]));
    let gateway = Arc::new(InMemoryGateway::new());
    let orchestrator = DmOrchestrator::new(
        narrator.clone(),
        gateway.clone(),
        ToolRegistry::standard().unwrap(),
        test_config(),
    );

    let mut first = CampaignSession::new("First", sample_state(), 1);
    let mut second = CampaignSession::new("Second", sample_state(), 2);
    let cancel = CancellationToken::new();

    let (a, b) = futures::join!(
        orchestrator.run_turn(&mut first, "Wait.", &cancel),
        orchestrator.run_turn(&mut second, "Wait.", &cancel),
    );
    assert_eq!(a.unwrap().narration, "Rain falls.");
    assert_eq!(b.unwrap().narration, "Rain falls.");
    assert_eq!(gateway.save_count(), 2);
    assert!(gateway.contains(first.id).await);
    assert!(gateway.contains(second.id).await);
    assert_eq!(first.log.len(), 2);
    assert_eq!(second.log.len(), 2);
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let mut harness = TestHarness::new();
    harness.expect_response(MockResponse::call(
        "The goblin bites you.",
        "apply_damage",
        json!({"target": "player", "amount": 4}),
    ));
    harness.expect_narrative("Ouch.");
    harness.input("Poke the goblin.").await.unwrap();
    assert_hp(&harness, 8, 12);

    let fresh = TestHarness::new();
    assert_hp(&fresh, 12, 12);
    assert_not_in_combat(&fresh);
}
