//! Campaign sessions and the high-level play API.
//!
//! A [`CampaignSession`] is the persisted unit: one player, one world, one
//! conversation log. [`GameSession`] pairs a session with an orchestrator and
//! is what front ends talk to.

use crate::combat::{CombatPolicy, CombatStatus};
use crate::context::{ContextConfig, ConversationLog};
use crate::dm::{ClaudeNarrator, DmError, DmOrchestrator, Narrator, OrchestratorConfig, RetryPolicy, TurnResult};
use crate::persist::{JsonFileGateway, PersistError, PersistenceGateway};
use crate::world::{GameState, Player, World};
use claude::Claude;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("DM error: {0}")]
    Dm(#[from] DmError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Claude API error: {0}")]
    Api(#[from] claude::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Game state is invalid: {0}")]
    InvalidState(#[from] crate::world::InvariantBreach),
}

/// Identifies one playthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One ongoing playthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSession {
    pub id: SessionId,
    pub campaign_name: String,
    /// Seed for every random roll; turn `n` uses a generator derived from `(seed, n)`.
    pub seed: u64,
    pub turn_count: u64,
    pub state: GameState,
    pub log: ConversationLog,
    #[serde(skip)]
    dirty: bool,
}

impl CampaignSession {
    pub fn new(campaign_name: impl Into<String>, state: GameState, seed: u64) -> Self {
        Self {
            id: SessionId::new(),
            campaign_name: campaign_name.into(),
            seed,
            turn_count: 0,
            state,
            log: ConversationLog::new(),
            dirty: true,
        }
    }

    /// Whether there are changes the store has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Configuration for creating a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub campaign_name: String,

    /// API key; falls back to `ANTHROPIC_API_KEY` when unset.
    pub api_key: Option<String>,

    /// Model to use for the narrator.
    pub model: Option<String>,

    /// Maximum tokens for narrator responses.
    pub max_tokens: usize,

    /// Temperature for narration.
    pub temperature: Option<f32>,

    /// Extra narrator instructions.
    pub custom_prompt: Option<String>,

    /// Where sessions are saved.
    pub save_dir: PathBuf,

    /// Fixed seed for reproducible play. Random when unset.
    pub seed: Option<u64>,

    pub context: ContextConfig,
    pub combat: CombatPolicy,
    pub retry: RetryPolicy,
    pub max_tool_rounds: usize,
}

impl SessionConfig {
    pub fn new(campaign_name: impl Into<String>) -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            campaign_name: campaign_name.into(),
            api_key: None,
            model: None,
            max_tokens: 2048,
            temperature: Some(0.8),
            custom_prompt: None,
            save_dir: PathBuf::from("saves"),
            seed: None,
            context: orchestrator.context,
            combat: orchestrator.combat,
            retry: orchestrator.retry,
            max_tool_rounds: orchestrator.max_tool_rounds,
        }
    }

    /// Read overrides from the environment.
    ///
    /// `ANTHROPIC_API_KEY`, `RPG_MODEL`, `RPG_SAVE_DIR`, `RPG_TOKEN_BUDGET`,
    /// `RPG_RETAINED_TURNS` and `RPG_SEED` are all optional.
    pub fn from_env(campaign_name: impl Into<String>) -> Result<Self, SessionError> {
        let mut config = Self::new(campaign_name);
        config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        if let Ok(model) = std::env::var("RPG_MODEL") {
            config.model = Some(model);
        }
        if let Ok(dir) = std::env::var("RPG_SAVE_DIR") {
            config.save_dir = PathBuf::from(dir);
        }
        if let Some(budget) = env_number::<usize>("RPG_TOKEN_BUDGET")? {
            config.context.token_budget = budget;
        }
        if let Some(retained) = env_number::<usize>("RPG_RETAINED_TURNS")? {
            config.context.retained_turns = retained;
        }
        config.seed = env_number::<u64>("RPG_SEED")?;
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.context.token_budget = budget;
        self
    }

    pub fn with_retained_turns(mut self, turns: usize) -> Self {
        self.context.retained_turns = turns;
        self
    }

    pub fn with_combat_policy(mut self, policy: CombatPolicy) -> Self {
        self.combat = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_tool_rounds: self.max_tool_rounds,
            retry: self.retry.clone(),
            context: self.context.clone(),
            combat: self.combat.clone(),
        }
    }

    fn narrator(&self) -> Result<ClaudeNarrator, SessionError> {
        let client = match &self.api_key {
            Some(key) => Claude::new(key.clone())?,
            None => Claude::from_env()?,
        };
        let client = match &self.model {
            Some(model) => client.with_model(model.clone()),
            None => client,
        };
        let mut narrator = ClaudeNarrator::new(client)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        if let Some(prompt) = &self.custom_prompt {
            narrator = narrator.with_prompt(prompt.clone());
        }
        Ok(narrator)
    }
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>, SessionError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SessionError::Config(format!("{name} must be a number, got `{raw}`"))),
        Err(_) => Ok(None),
    }
}

/// A playable session: state plus the machinery to advance it.
pub struct GameSession {
    orchestrator: DmOrchestrator,
    session: CampaignSession,
}

impl GameSession {
    /// Start a new campaign narrated by Claude and saved as JSON under the configured directory.
    pub fn new(config: SessionConfig, player: Player, world: World) -> Result<Self, SessionError> {
        let state = GameState::new(player, world);
        state.check_invariants()?;

        let narrator: Arc<dyn Narrator> = Arc::new(config.narrator()?);
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(JsonFileGateway::new(&config.save_dir));
        let orchestrator =
            DmOrchestrator::with_standard_tools(narrator, gateway, config.orchestrator_config())?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let session = CampaignSession::new(config.campaign_name.clone(), state, seed);
        info!(session = %session.id, campaign = %session.campaign_name, seed, "campaign started");
        Ok(Self {
            orchestrator,
            session,
        })
    }

    /// Resume a saved campaign.
    pub async fn resume(config: SessionConfig, id: SessionId) -> Result<Self, SessionError> {
        let narrator: Arc<dyn Narrator> = Arc::new(config.narrator()?);
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(JsonFileGateway::new(&config.save_dir));
        let session = gateway.load_session(id).await?;
        if let Err(breach) = session.state.check_invariants() {
            warn!(session = %id, error = %breach, "saved state is invalid, refusing to resume");
            return Err(breach.into());
        }
        let orchestrator =
            DmOrchestrator::with_standard_tools(narrator, gateway, config.orchestrator_config())?;
        info!(session = %session.id, turns = session.turn_count, "campaign resumed");
        Ok(Self {
            orchestrator,
            session,
        })
    }

    /// Pair an existing session with an orchestrator.
    pub fn from_parts(orchestrator: DmOrchestrator, session: CampaignSession) -> Self {
        Self {
            orchestrator,
            session,
        }
    }

    /// Process a player's action and return the narrated result.
    pub async fn player_action(&mut self, input: &str) -> Result<TurnResult, SessionError> {
        self.player_action_with_cancel(input, &CancellationToken::new()).await
    }

    /// Like [`player_action`](Self::player_action), abandoning the turn when `cancel` fires.
    pub async fn player_action_with_cancel(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, SessionError> {
        Ok(self
            .orchestrator
            .run_turn(&mut self.session, input, cancel)
            .await?)
    }

    /// Save now if there are unsaved changes.
    pub async fn save(&mut self) -> Result<(), SessionError> {
        Ok(self.orchestrator.flush(&mut self.session).await?)
    }

    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn session(&self) -> &CampaignSession {
        &self.session
    }

    pub fn state(&self) -> &GameState {
        &self.session.state
    }

    pub fn combat_status(&self) -> CombatStatus {
        match &self.session.state.encounter {
            Some(encounter) if encounter.is_active() => encounter.status(),
            _ => CombatStatus::NotInCombat,
        }
    }
}
