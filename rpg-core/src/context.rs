//! Conversation history and the bounded window sent to the narrator.
//!
//! The [`ConversationLog`] is append-only and is the only record of the story
//! so far. Each model call gets a [`ContextWindow`] recomputed from the log:
//! a standing summary derived from game state, an optional synthetic turn
//! condensing older prose, and the most recent turns. Inventory, HP and
//! location always come from the standing summary, so compaction can be
//! lossy without losing ground truth.

use crate::tools::{Outcome, ToolCall};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Fixed per-turn cost added to every estimate (role markers, separators).
pub const TURN_OVERHEAD: usize = 4;

const TRUNCATION_MARKER: &str = " [...]";
const EXCERPT_CHARS: usize = 120;

/// Rough token count: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Player,
    Narrator,
    ToolResult,
    /// Synthetic turn standing in for compacted history.
    Summary,
}

/// How a tool call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    Applied(Outcome),
    Rejected { kind: String, reason: String },
}

/// A tool call together with what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call: ToolCall,
    pub result: CallResult,
    /// Things that happened as a consequence, such as NPC turns after a player action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub followups: Vec<Outcome>,
}

impl ToolCallRecord {
    pub fn applied(call: ToolCall, outcome: Outcome) -> Self {
        Self {
            call,
            result: CallResult::Applied(outcome),
            followups: Vec::new(),
        }
    }

    pub fn rejected(call: ToolCall, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            call,
            result: CallResult::Rejected {
                kind: kind.into(),
                reason: reason.into(),
            },
            followups: Vec::new(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.result, CallResult::Rejected { .. })
    }

    /// The line the narrator sees for this call.
    pub fn render(&self) -> String {
        let mut line = match &self.result {
            CallResult::Applied(outcome) => format!("{} -> ok: {}", self.call.signature(), outcome.summary),
            CallResult::Rejected { kind, reason } => {
                format!("{} -> REJECTED ({kind}): {reason}", self.call.signature())
            }
        };
        for followup in &self.followups {
            line.push_str("\n  then: ");
            line.push_str(&followup.summary);
        }
        line
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    /// The text exactly as the narrator will see it.
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    tokens: usize,
}

impl ConversationTurn {
    fn new(role: TurnRole, content: String, tool_calls: Vec<ToolCallRecord>) -> Self {
        let tokens = estimate_tokens(&content) + TURN_OVERHEAD;
        Self {
            role,
            content,
            tool_calls,
            tokens,
        }
    }

    pub fn player(input: impl Into<String>) -> Self {
        Self::new(TurnRole::Player, input.into(), Vec::new())
    }

    /// The narrator's prose plus the calls it made, with their outcomes.
    pub fn narrator(narration: impl Into<String>, records: Vec<ToolCallRecord>) -> Self {
        let mut content = narration.into();
        for record in &records {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("[requested {}]", record.call.signature()));
        }
        Self::new(TurnRole::Narrator, content, records)
    }

    /// The results of a batch of calls, as fed back to the narrator.
    pub fn tool_results(records: &[ToolCallRecord]) -> Self {
        let content = records
            .iter()
            .map(ToolCallRecord::render)
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(TurnRole::ToolResult, content, Vec::new())
    }

    pub fn summary(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Summary, text.into(), Vec::new())
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// A copy cut down to at most `max_tokens`, or `None` if not even the marker fits.
    fn truncated(&self, max_tokens: usize) -> Option<Self> {
        let allowed = max_tokens.checked_sub(TURN_OVERHEAD)?.checked_mul(4)?;
        let keep = allowed.checked_sub(TRUNCATION_MARKER.len())?;
        if keep == 0 {
            return None;
        }
        // Keep the end of the turn; the most recent words matter most.
        let total = self.content.chars().count();
        let tail: String = self.content.chars().skip(total.saturating_sub(keep)).collect();
        Some(Self::new(
            self.role,
            format!("{}{tail}", TRUNCATION_MARKER.trim_start()),
            Vec::new(),
        ))
    }
}

/// The append-only history of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SavedLog")]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
    total_tokens: usize,
}

/// The stored form of a log; the running total is rebuilt on load.
#[derive(Deserialize)]
struct SavedLog {
    #[serde(default)]
    turns: Vec<ConversationTurn>,
}

impl From<SavedLog> for ConversationLog {
    fn from(saved: SavedLog) -> Self {
        let mut log = ConversationLog::new();
        log.extend(saved.turns);
        log
    }
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.total_tokens += turn.tokens();
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        for turn in turns {
            self.append(turn);
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Running size estimate of the whole log.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard ceiling for a window, in estimated tokens.
    pub token_budget: usize,
    /// Turns kept verbatim before older ones are compacted.
    pub retained_turns: usize,
    /// Ceiling for the synthetic compaction turn.
    pub compaction_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 100_000,
            retained_turns: 50,
            compaction_budget: 2_000,
        }
    }
}

/// Even the standing summary and a truncated final turn exceed the budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context needs {required} tokens but the budget is {budget}")]
pub struct ContextOverflowError {
    pub budget: usize,
    pub required: usize,
}

/// The bounded view used for one model call. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    /// Standing summary of authoritative game state.
    pub summary: String,
    /// Synthetic turn condensing everything older than `turns`.
    pub compaction: Option<ConversationTurn>,
    /// Most recent turns, oldest first.
    pub turns: Vec<ConversationTurn>,
    pub tokens: usize,
    pub budget: usize,
    /// Set when compaction was dropped or a turn was cut to fit.
    pub truncated: bool,
}

impl ContextWindow {
    /// Compaction turn (if any) followed by the recent turns.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.compaction.iter().chain(self.turns.iter())
    }
}

/// Builds context windows within a token budget.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the window for the next model call.
    ///
    /// `pending` holds turns from the current, not yet committed, player turn
    /// and counts as the newest part of the log.
    pub fn build_window(
        &self,
        summary: &str,
        log: &ConversationLog,
        pending: &[ConversationTurn],
    ) -> Result<ContextWindow, ContextOverflowError> {
        let budget = self.config.token_budget;
        let all: Vec<&ConversationTurn> = log.turns().iter().chain(pending).collect();
        let summary_tokens = estimate_tokens(summary) + TURN_OVERHEAD;
        let available = budget.saturating_sub(summary_tokens);

        // The latest player turn is what the narrator must answer; it is never
        // compacted and is trimmed only after everything else.
        let essential = all
            .iter()
            .rposition(|t| t.role == TurnRole::Player)
            .unwrap_or(all.len().saturating_sub(1));

        let mut split = all
            .len()
            .saturating_sub(self.config.retained_turns)
            .min(essential);
        let mut recent_tokens: usize = all[split..].iter().map(|t| t.tokens()).sum();
        let reserve = |split: usize| if split > 0 { self.config.compaction_budget } else { 0 };

        // Evict the oldest recent turns into the compacted part until everything fits.
        while split < essential && recent_tokens + reserve(split) > available {
            recent_tokens -= all[split].tokens();
            split += 1;
        }

        let mut compaction = (split > 0).then(|| self.compact(&all[..split]));
        let mut turns: Vec<ConversationTurn> = all[split..].iter().map(|t| (*t).clone()).collect();
        let mut essential = essential - split;
        let mut truncated = false;
        let total = |compaction: &Option<ConversationTurn>, turns: &[ConversationTurn]| {
            summary_tokens
                + compaction.as_ref().map_or(0, ConversationTurn::tokens)
                + turns.iter().map(ConversationTurn::tokens).sum::<usize>()
        };

        if total(&compaction, &turns) > budget && compaction.is_some() {
            warn!(budget, condensed = split, "context over budget, dropping compacted history");
            compaction = None;
            truncated = true;
        }

        // Then cut the oldest remaining turns, dropping any that cannot shrink enough.
        let mut i = 0;
        while total(&compaction, &turns) > budget && i < turns.len() {
            if i == essential {
                i += 1;
                continue;
            }
            let excess = total(&compaction, &turns) - budget;
            truncated = true;
            match turns[i].truncated(turns[i].tokens().saturating_sub(excess)) {
                Some(cut) => {
                    turns[i] = cut;
                    i += 1;
                }
                None => {
                    turns.remove(i);
                    if i < essential {
                        essential -= 1;
                    }
                }
            }
        }

        if total(&compaction, &turns) > budget {
            let required = total(&compaction, &turns);
            let overflow = || ContextOverflowError { budget, required };
            if essential >= turns.len() {
                return Err(overflow());
            }
            let last = turns.remove(essential);
            let room = budget.saturating_sub(total(&compaction, &turns));
            warn!(budget, required, "context over budget, truncating the latest player turn");
            turns.insert(essential, last.truncated(room).ok_or_else(overflow)?);
            truncated = true;
        }

        let tokens = total(&compaction, &turns);
        if tokens > budget {
            return Err(ContextOverflowError {
                budget,
                required: tokens,
            });
        }

        Ok(ContextWindow {
            summary: summary.to_string(),
            compaction,
            turns,
            tokens,
            budget,
            truncated,
        })
    }

    /// Condense older turns into one narrative-only summary turn.
    ///
    /// Tool results are skipped; their effects live in the standing summary.
    /// The newest excerpts are kept first, up to the compaction budget.
    fn compact(&self, older: &[&ConversationTurn]) -> ConversationTurn {
        let header = format!("Earlier in this campaign ({} turns condensed):", older.len());
        // Room for the omitted-turns note, sized for the worst case.
        let note = format!("\n- ({} older turns omitted)", older.len());
        let mut used = estimate_tokens(&header) + estimate_tokens(&note) + TURN_OVERHEAD;
        let mut lines = Vec::new();

        for turn in older.iter().rev() {
            let who = match turn.role {
                TurnRole::Player => "Player",
                TurnRole::Narrator => "Narrator",
                TurnRole::Summary => "Earlier",
                TurnRole::ToolResult => continue,
            };
            let line = format!("- {who}: {}", excerpt(&turn.content));
            // +1 for the newline joining it.
            let cost = estimate_tokens(&line) + 1;
            if used + cost > self.config.compaction_budget {
                break;
            }
            used += cost;
            lines.push(line);
        }
        lines.reverse();

        let mut text = header;
        let omitted = older.iter().filter(|t| t.role != TurnRole::ToolResult).count() - lines.len();
        if omitted > 0 {
            text.push_str(&format!("\n- ({omitted} older turns omitted)"));
        }
        for line in lines {
            text.push('\n');
            text.push_str(&line);
        }

        let turn = ConversationTurn::summary(text);
        match turn.tokens() > self.config.compaction_budget {
            true => turn.truncated(self.config.compaction_budget).unwrap_or(turn),
            false => turn,
        }
    }
}

/// The first sentence-ish of a turn, on one line.
fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}
