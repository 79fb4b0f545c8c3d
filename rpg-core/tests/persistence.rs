//! Saving and resuming campaigns through the JSON file gateway.

use rpg_core::dm::DmOrchestrator;
use rpg_core::persist::{JsonFileGateway, PersistenceGateway, SavedCampaign, SAVE_VERSION};
use rpg_core::testing::{sample_session, test_config, MockNarrator, MockResponse};
use rpg_core::tools::ToolRegistry;
use rpg_core::GameSession;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn orchestrator(dir: &TempDir, narrator: Arc<MockNarrator>) -> (DmOrchestrator, Arc<JsonFileGateway>) {
    let gateway = Arc::new(JsonFileGateway::new(dir.path()));
    let orchestrator = DmOrchestrator::new(
        narrator,
        gateway.clone(),
        ToolRegistry::standard().unwrap(),
        test_config(),
    );
    (orchestrator, gateway)
}

#[tokio::test]
async fn test_turn_is_saved_and_resumable() {
    let dir = TempDir::new().unwrap();
    let narrator = Arc::new(MockNarrator::new(vec![
        MockResponse::call(
            "You pocket a silver ring.",
            "grant_item",
            json!({"item": "Silver Ring", "quantity": 1, "kind": "misc", "value": 25}),
        ),
        MockResponse::narrative("It glints in the firelight."),
    ]));
    let (orchestrator, gateway) = orchestrator(&dir, narrator);

    let mut game = GameSession::from_parts(orchestrator, sample_session());
    game.player_action("Search under the table.").await.unwrap();
    assert!(!game.session().is_dirty());

    let loaded = gateway.load_session(game.id()).await.unwrap();
    assert_eq!(loaded.state, game.session().state);
    assert_eq!(loaded.log, game.session().log);
    assert_eq!(loaded.turn_count, 2);
    assert_eq!(loaded.seed, 42);
    assert_eq!(loaded.state.player.inventory.quantity_of("silver ring"), 1);
}

#[tokio::test]
async fn test_metadata_can_be_read_without_loading() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, gateway) = orchestrator(&dir, Arc::new(MockNarrator::default()));

    let mut game = GameSession::from_parts(orchestrator, sample_session());
    game.save().await.unwrap();

    let metadata = SavedCampaign::peek_metadata(gateway.path_for(game.id()))
        .await
        .unwrap();
    assert_eq!(metadata.session_id, game.id());
    assert_eq!(metadata.campaign_name, "The Crossroads");
    assert_eq!(metadata.level, 1);
    assert!(!metadata.in_combat);

    let raw = std::fs::read_to_string(gateway.path_for(game.id())).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["version"], SAVE_VERSION);
}

#[tokio::test]
async fn test_combat_survives_a_save() {
    let dir = TempDir::new().unwrap();
    let narrator = Arc::new(MockNarrator::new(vec![
        MockResponse::call(
            "The goblin attacks!",
            "start_combat",
            json!({"participants": ["Goblin"]}),
        ),
        MockResponse::narrative("Roll for initiative."),
    ]));
    let (orchestrator, gateway) = orchestrator(&dir, narrator);

    let mut game = GameSession::from_parts(orchestrator, sample_session());
    game.player_action("Fight the goblin.").await.unwrap();
    assert!(game.state().in_combat());

    let loaded = gateway.load_session(game.id()).await.unwrap();
    assert!(loaded.state.in_combat());
    assert_eq!(loaded.state.encounter, game.state().encounter);
    assert!(loaded.state.check_invariants().is_ok());

    let saves = gateway.list_saves().await.unwrap();
    assert_eq!(saves.len(), 1);
    assert!(saves[0].in_combat);
}

#[tokio::test]
async fn test_nothing_saved_when_clean() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, gateway) = orchestrator(&dir, Arc::new(MockNarrator::default()));

    let mut game = GameSession::from_parts(orchestrator, sample_session());
    game.save().await.unwrap();
    let path = gateway.path_for(game.id());
    std::fs::remove_file(&path).unwrap();

    // Clean sessions skip the write.
    game.save().await.unwrap();
    assert!(!path.exists());
}
