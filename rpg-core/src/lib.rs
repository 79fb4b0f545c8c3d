//! Tool-validated AI dungeon master engine.
//!
//! This crate provides:
//! - A narrator loop where every state change is a validated tool call
//! - Deterministic turn-based combat driven by the same tool calls
//! - Token-budgeted conversation context with compaction
//! - Campaign persistence behind a pluggable gateway
//!
//! # Quick Start
//!
//! ```ignore
//! use rpg_core::{testing, GameSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_env("My Campaign")?;
//!     let mut session =
//!         GameSession::new(config, testing::sample_player(), testing::sample_world())?;
//!
//!     let turn = session.player_action("I look around the tavern").await?;
//!     println!("{}", turn.narration);
//!
//!     session.save().await?;
//!     Ok(())
//! }
//! ```

pub mod combat;
pub mod context;
pub mod dice;
pub mod dm;
pub mod persist;
pub mod progression;
pub mod session;
pub mod testing;
pub mod tools;
pub mod validator;
pub mod world;

// Re-export for convenience
pub use rpg_macros::Tool;

// Primary public API
pub use combat::{CombatEngine, CombatOutcome, CombatPolicy, CombatStatus};
pub use context::{ContextConfig, ContextManager, ConversationLog, ConversationTurn};
pub use dm::{DmError, DmOrchestrator, Narrator, OrchestratorConfig, TurnResult};
pub use persist::{InMemoryGateway, JsonFileGateway, PersistError, PersistenceGateway};
pub use session::{CampaignSession, GameSession, SessionConfig, SessionError, SessionId};
pub use testing::{MockNarrator, MockResponse, TestHarness};
pub use tools::{ToolCall, ToolRegistry};
pub use validator::{StateValidator, ToolError};
pub use world::GameState;
