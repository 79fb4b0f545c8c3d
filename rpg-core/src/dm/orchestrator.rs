//! The per-turn control loop.
//!
//! One call to [`DmOrchestrator::run_turn`] handles one player input:
//!
//! 1. Append the player's input to the log.
//! 2. Build a context window from the log and a fresh standing summary.
//! 3. Ask the narrator for narration and tool calls (retrying with backoff).
//! 4. Dispatch each call, in order, through the validator or the combat engine.
//!    Rejections are recorded and fed back, never fatal.
//! 5. Repeat 2-4 while the narrator keeps calling tools, up to a round limit.
//! 6. Commit state and log, then save through the persistence gateway.
//!
//! State changes are made on a working copy. If the narrator is unavailable,
//! the window overflows or the turn is cancelled, only the player's input
//! remains in the log and state is exactly as before.

use super::narrator::{NarrationRequest, Narrator, NarratorError, NarratorReply};
use crate::combat::{CombatEngine, CombatPolicy, CombatStatus};
use crate::context::{ContextConfig, ContextManager, ContextOverflowError, ConversationTurn, ToolCallRecord};
use crate::dice::turn_rng;
use crate::persist::{PersistError, PersistenceGateway};
use crate::session::CampaignSession;
use crate::tools::{DuplicateToolError, Effect, ToolCall, ToolContext, ToolKind, ToolRegistry};
use crate::validator::StateValidator;
use crate::world::{GameState, HitPoints};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Errors that abort a turn.
#[derive(Debug, Error)]
pub enum DmError {
    #[error("the narrator is unavailable after {attempts} attempt(s): {source}")]
    NarrationUnavailable {
        attempts: u32,
        #[source]
        source: NarratorError,
    },

    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflowError),

    /// The turn was applied in memory but could not be saved. The session
    /// stays dirty and is saved again at the next opportunity.
    #[error("turn applied but not saved: {source}")]
    Persistence {
        #[source]
        source: PersistError,
        result: Box<TurnResult>,
    },

    #[error("turn cancelled")]
    Cancelled,

    #[error(transparent)]
    Registry(#[from] DuplicateToolError),
}

/// Bounded exponential backoff for narrator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout; a timeout counts as a retryable failure.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Narrator calls allowed per player turn.
    pub max_tool_rounds: usize,
    pub retry: RetryPolicy,
    pub context: ContextConfig,
    pub combat: CombatPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            retry: RetryPolicy::default(),
            context: ContextConfig::default(),
            combat: CombatPolicy::default(),
        }
    }
}

/// What the presentation layer gets back for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub narration: String,
    /// Every effect applied this turn, in order.
    pub delta: Vec<Effect>,
    pub combat: CombatStatus,
    /// Calls the narrator made that were rejected. Not meant to be shown to the player.
    pub rejected_calls: Vec<ToolCallRecord>,
    pub hit_points: HitPoints,
    /// Narrator calls made this turn.
    pub rounds: usize,
}

/// Runs turns for any number of sessions. Holds no per-session state.
pub struct DmOrchestrator {
    narrator: Arc<dyn Narrator>,
    gateway: Arc<dyn PersistenceGateway>,
    validator: StateValidator,
    combat: CombatEngine,
    context: ContextManager,
    config: OrchestratorConfig,
}

impl DmOrchestrator {
    pub fn new(
        narrator: Arc<dyn Narrator>,
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let validator = StateValidator::new(registry);
        Self {
            narrator,
            gateway,
            combat: CombatEngine::new(validator.clone(), config.combat.clone()),
            context: ContextManager::new(config.context.clone()),
            validator,
            config,
        }
    }

    /// An orchestrator using the standard tool set.
    pub fn with_standard_tools(
        narrator: Arc<dyn Narrator>,
        gateway: Arc<dyn PersistenceGateway>,
        config: OrchestratorConfig,
    ) -> Result<Self, DmError> {
        Ok(Self::new(narrator, gateway, ToolRegistry::standard()?, config))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    /// Run one player turn.
    ///
    /// Taking the session by `&mut` keeps turns for one session sequential.
    pub async fn run_turn(
        &self,
        session: &mut CampaignSession,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, DmError> {
        let span = info_span!("turn", session = %session.id, turn = session.turn_count + 1);
        self.run_turn_inner(session, input, cancel).instrument(span).await
    }

    async fn run_turn_inner(
        &self,
        session: &mut CampaignSession,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, DmError> {
        session.log.append(ConversationTurn::player(input));
        session.turn_count += 1;
        session.mark_dirty();

        let mut rng = turn_rng(session.seed, session.turn_count);
        let mut state = session.state.clone();
        let mut pending: Vec<ConversationTurn> = Vec::new();
        let mut narration: Vec<String> = Vec::new();
        let mut delta = Vec::new();
        let mut rejected_calls = Vec::new();
        let tools = self.validator.registry().definitions();
        let mut rounds = 0;

        while rounds < self.config.max_tool_rounds {
            rounds += 1;
            let window = self
                .context
                .build_window(&state.standing_summary(), &session.log, &pending)
                .inspect_err(|e| error!(error = %e, "context window over budget"))?;
            debug!(tokens = window.tokens, turns = window.turns.len(), "context window built");

            let request = NarrationRequest {
                window,
                tools: tools.clone(),
            };
            let reply = self.narrate_with_retry(&request, cancel).await?;
            if cancel.is_cancelled() {
                info!("turn cancelled after narrator reply, discarding it");
                return Err(DmError::Cancelled);
            }

            let NarratorReply {
                narration: text,
                tool_calls,
            } = reply;
            let mut records = Vec::with_capacity(tool_calls.len());
            for call in tool_calls {
                if cancel.is_cancelled() {
                    info!("turn cancelled mid-dispatch, discarding applied calls");
                    return Err(DmError::Cancelled);
                }
                let record = self.dispatch(&mut state, call, &mut rng);
                collect_effects(&record, &mut delta);
                if record.is_rejected() {
                    rejected_calls.push(record.clone());
                }
                records.push(record);
            }

            if !text.trim().is_empty() {
                narration.push(text.trim().to_string());
            }
            let called_tools = !records.is_empty();
            let results = called_tools.then(|| ConversationTurn::tool_results(&records));
            pending.push(ConversationTurn::narrator(text, records));
            match results {
                Some(results) => pending.push(results),
                None => break,
            }
            if rounds == self.config.max_tool_rounds {
                warn!(rounds, "tool round limit reached");
            }
        }

        let combat = combat_status(&session.state, &state);
        let result = TurnResult {
            narration: narration.join("\n\n"),
            delta,
            combat,
            rejected_calls,
            hit_points: state.player_hit_points(),
            rounds,
        };

        session.state = state;
        session.log.extend(pending);
        info!(
            effects = result.delta.len(),
            rejected = result.rejected_calls.len(),
            rounds,
            "turn complete"
        );

        match self.commit(session).await {
            Ok(()) => Ok(result),
            Err(source) => Err(DmError::Persistence {
                source,
                result: Box::new(result),
            }),
        }
    }

    /// Save the session if anything changed since the last successful save.
    pub async fn flush(&self, session: &mut CampaignSession) -> Result<(), PersistError> {
        if !session.is_dirty() {
            return Ok(());
        }
        self.commit(session).await
    }

    async fn commit(&self, session: &mut CampaignSession) -> Result<(), PersistError> {
        match self.gateway.save_session(session).await {
            Ok(()) => {
                session.mark_clean();
                Ok(())
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "save failed, session left dirty");
                Err(e)
            }
        }
    }

    /// Route one call and record what became of it.
    fn dispatch(&self, state: &mut GameState, call: ToolCall, rng: &mut StdRng) -> ToolCallRecord {
        debug!(tool = %call.name, call = %call.signature(), "dispatching");

        if self.validator.registry().kind(&call.name) == Some(ToolKind::Combat) {
            let report = self.combat.dispatch(state, &call, rng);
            let mut record = match report.action {
                Ok(ref outcome) => ToolCallRecord::applied(call, outcome.clone()),
                Err(ref e) => ToolCallRecord::rejected(call, e.kind(), e.to_string()),
            };
            record.followups.extend(report.forced_pass);
            record.followups.extend(report.npc_turns);
            record.followups.extend(report.resolution.map(|r| r.outcome));
            return record;
        }

        let result = {
            let mut ctx = ToolContext::narrator(rng, self.combat.policy());
            self.validator.apply(state, &call, &mut ctx)
        };
        match result {
            Ok(outcome) => {
                let mut record = ToolCallRecord::applied(call, outcome);
                // Damage dealt outside the combat tools can still end a fight.
                if let Some(resolution) = self.combat.settle(state) {
                    record.followups.push(resolution.outcome);
                }
                record
            }
            Err(e) => {
                debug!(tool = %call.name, error = %e, "tool call rejected");
                ToolCallRecord::rejected(call, e.kind(), e.to_string())
            }
        }
    }

    async fn narrate_with_retry(
        &self,
        request: &NarrationRequest,
        cancel: &CancellationToken,
    ) -> Result<NarratorReply, DmError> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "turn cancelled during narrator call");
                    return Err(DmError::Cancelled);
                }
                r = tokio::time::timeout(retry.request_timeout, self.narrator.narrate(request)) => {
                    r.unwrap_or(Err(NarratorError::Timeout))
                }
            };

            let e = match result {
                Ok(reply) => {
                    if attempt > 1 {
                        info!(attempt, "narrator succeeded after retries");
                    }
                    return Ok(reply);
                }
                Err(e) => e,
            };

            if !e.is_retryable() || attempt >= retry.max_attempts {
                error!(attempt, error = %e, "narrator unavailable");
                return Err(DmError::NarrationUnavailable {
                    attempts: attempt,
                    source: e,
                });
            }

            let delay = retry.delay_for(attempt - 1);
            warn!(
                attempt,
                max_attempts = retry.max_attempts,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "narrator call failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn collect_effects(record: &ToolCallRecord, delta: &mut Vec<Effect>) {
    if let crate::context::CallResult::Applied(outcome) = &record.result {
        delta.extend(outcome.effects.iter().cloned());
    }
    for followup in &record.followups {
        delta.extend(followup.effects.iter().cloned());
    }
}

fn combat_status(before: &GameState, after: &GameState) -> CombatStatus {
    if let Some(encounter) = after.encounter.as_ref().filter(|e| e.is_active()) {
        return encounter.status();
    }
    match &after.last_combat {
        Some(summary) if before.last_combat.as_ref() != Some(summary) => {
            CombatStatus::Resolved(summary.clone())
        }
        _ => CombatStatus::NotInCombat,
    }
}
