//! The dungeon master: the narrator boundary and the per-turn control loop.

mod narrator;
mod orchestrator;

pub use narrator::{ClaudeNarrator, NarrationRequest, Narrator, NarratorError, NarratorReply};
pub use orchestrator::{DmError, DmOrchestrator, OrchestratorConfig, RetryPolicy, TurnResult};
