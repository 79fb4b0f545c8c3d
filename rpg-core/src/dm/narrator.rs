//! The boundary to the completion service.

use crate::context::{ContextWindow, TurnRole};
use crate::tools::ToolCall;
use async_trait::async_trait;
use claude::{Claude, ContentBlock, Message, Request, Role, Tool};
use thiserror::Error;

const NARRATOR_PROMPT: &str = include_str!("prompts/narrator.txt");

/// Errors from the narrator.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("Claude API error: {0}")]
    Provider(#[from] claude::Error),

    #[error("narrator timed out")]
    Timeout,

    #[error("narrator unavailable: {0}")]
    Unavailable(String),
}

impl NarratorError {
    /// Whether the same request might succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            NarratorError::Provider(e) => e.is_retryable(),
            NarratorError::Timeout | NarratorError::Unavailable(_) => true,
        }
    }
}

/// Everything sent to the narrator for one call.
#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub window: ContextWindow,
    pub tools: Vec<Tool>,
}

/// Narration plus the tool calls the narrator wants made, in emission order.
///
/// Both are untrusted: every call goes through the validator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarratorReply {
    pub narration: String,
    pub tool_calls: Vec<ToolCall>,
}

impl NarratorReply {
    pub fn text(narration: impl Into<String>) -> Self {
        Self {
            narration: narration.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// A completion service that narrates and requests tool calls.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarratorReply, NarratorError>;
}

/// Narrator backed by the Claude messages API.
#[derive(Debug)]
pub struct ClaudeNarrator {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
    custom_prompt: Option<String>,
}

impl ClaudeNarrator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 2048,
            temperature: Some(0.8),
            custom_prompt: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Extra instructions appended to the built-in prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    fn system_prompt(&self, window: &ContextWindow) -> String {
        let mut prompt = String::from(NARRATOR_PROMPT);

        if let Some(ref custom) = self.custom_prompt {
            prompt.push_str("\n\n## Additional Instructions\n");
            prompt.push_str(custom);
        }

        prompt.push_str("\n\n## Current State\n");
        prompt.push_str(&window.summary);

        if let Some(ref compaction) = window.compaction {
            prompt.push_str("\n\n## Story So Far\n");
            prompt.push_str(&compaction.content);
        }
        prompt
    }
}

#[async_trait]
impl Narrator for ClaudeNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarratorReply, NarratorError> {
        let mut api_request = Request::new(window_messages(&request.window))
            .with_system(self.system_prompt(&request.window))
            .with_max_tokens(self.max_tokens)
            .with_tools(request.tools.clone());
        if let Some(temperature) = self.temperature {
            api_request = api_request.with_temperature(temperature);
        }

        let response = self.client.complete(api_request).await?;

        Ok(NarratorReply {
            narration: response.text().trim().to_string(),
            tool_calls: response
                .tool_uses()
                .into_iter()
                .map(|u| ToolCall::new(u.name, u.input).with_id(u.id))
                .collect(),
        })
    }
}

/// Turn the window's turns into alternating API messages.
///
/// Tool outcomes travel as plain text rather than tool_use/tool_result pairs,
/// since compaction may separate a call from its result.
pub(crate) fn window_messages(window: &ContextWindow) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();

    for turn in &window.turns {
        let role = match turn.role {
            TurnRole::Narrator => Role::Assistant,
            TurnRole::Player | TurnRole::ToolResult | TurnRole::Summary => Role::User,
        };
        let text = match turn.role {
            TurnRole::ToolResult => format!("[Tool results]\n{}", turn.content),
            TurnRole::Summary => format!("[Earlier]\n{}", turn.content),
            _ => turn.content.clone(),
        };
        if text.trim().is_empty() {
            continue;
        }

        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(ContentBlock::Text { text }),
            _ => messages.push(Message {
                role,
                content: vec![ContentBlock::Text { text }],
            }),
        }
    }

    // The API requires the conversation to open with the user.
    if messages.first().map_or(true, |m| m.role != Role::User) {
        messages.insert(0, Message::user("[The session resumes.]"));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextConfig, ContextManager, ConversationLog, ConversationTurn};

    fn window(turns: Vec<ConversationTurn>) -> ContextWindow {
        let mut log = ConversationLog::new();
        log.extend(turns);
        ContextManager::new(ContextConfig::default())
            .build_window("HP: 12/12", &log, &[])
            .unwrap()
    }

    #[test]
    fn test_messages_alternate_roles() {
        let w = window(vec![
            ConversationTurn::player("I open the door."),
            ConversationTurn::narrator("It creaks open.", Vec::new()),
            ConversationTurn::tool_results(&[]),
            ConversationTurn::player("I step inside."),
        ]);
        let messages = window_messages(&w);

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_same_role_turns_are_merged() {
        let w = window(vec![
            ConversationTurn::player("Look around."),
            ConversationTurn::narrator("You see a chest.", Vec::new()),
            ConversationTurn::tool_results(&[]),
            ConversationTurn::narrator("It is locked.", Vec::new()),
        ]);
        let messages = window_messages(&w);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.len(), 2);
    }

    #[test]
    fn test_conversation_opens_with_user() {
        let w = window(vec![ConversationTurn::narrator("Welcome, traveller.", Vec::new())]);
        let messages = window_messages(&w);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_system_prompt_carries_state() {
        let narrator = ClaudeNarrator::new(Claude::new("test-key").unwrap()).with_prompt("Keep it grim.");
        let w = window(vec![ConversationTurn::player("Hello")]);
        let prompt = narrator.system_prompt(&w);
        assert!(prompt.contains("## Current State\nHP: 12/12"));
        assert!(prompt.contains("Keep it grim."));
        assert!(!prompt.contains("## Story So Far"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(NarratorError::Timeout.is_retryable());
        assert!(!NarratorError::Provider(claude::Error::NoApiKey).is_retryable());
        assert!(!NarratorError::Provider(claude::Error::Parse("missing field `content`".into())).is_retryable());
        assert!(NarratorError::Provider(claude::Error::Api {
            status: 529,
            message: "overloaded".into()
        })
        .is_retryable());
    }
}
