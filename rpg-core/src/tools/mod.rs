//! The registry of operations the narrator may request.
//!
//! Every tool is a typed argument struct (with a schema generated by
//! `#[derive(Tool)]`) paired with a handler that mutates a [`GameState`].
//! Handlers are never called directly: the [`StateValidator`] checks the
//! arguments against the schema, runs the handler on a copy of the state and
//! only commits the copy if every invariant still holds.
//!
//! [`StateValidator`]: crate::validator::StateValidator

pub mod builtin;

use crate::combat::{CombatOutcome, CombatPolicy, CombatantId};
use crate::dice::CheckRoll;
use crate::world::{Ability, GameState};
use claude::{Tool, ToolInput};
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Version of the tool schema set exposed to the narrator.
pub const SCHEMA_VERSION: u32 = 1;

/// Registering two tools under one name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool `{0}` is already registered")]
pub struct DuplicateToolError(pub String);

/// A handler's refusal to apply a call whose arguments are well-formed but
/// make no sense against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection(pub String);

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tool invocation requested by the narrator (or by the combat engine on an NPC's behalf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// `name(arg=value, ...)` for logs and transcripts.
    pub fn signature(&self) -> String {
        let args = match &self.arguments {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        format!("{}({args})", self.name)
    }
}

/// One observable change produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Moved {
        from: String,
        to: String,
    },
    LocationCreated {
        name: String,
    },
    ItemGained {
        item: String,
        quantity: u32,
        total: u32,
    },
    ItemLost {
        item: String,
        quantity: u32,
        remaining: u32,
    },
    ItemEquipped {
        item: String,
    },
    GoldChanged {
        from: u32,
        to: u32,
    },
    HpChanged {
        target: String,
        from: i32,
        to: i32,
        maximum: i32,
    },
    XpGained {
        amount: u32,
        total: u32,
    },
    LeveledUp {
        level: u8,
        max_hp: i32,
    },
    CheckRolled {
        ability: Ability,
        roll: CheckRoll,
        success: bool,
    },
    NpcSpawned {
        name: String,
    },
    CombatStarted {
        order: Vec<String>,
    },
    Attacked {
        attacker: String,
        target: String,
        /// d20 + modifier against the target's armor class.
        to_hit: CheckRoll,
        hit: bool,
        critical: bool,
        /// Damage dice total; zero on a miss.
        roll: i32,
        damage: i32,
    },
    Defended {
        who: String,
    },
    FleeAttempted {
        who: String,
        /// Present when the escape was an ability check.
        check: Option<CheckRoll>,
        success: bool,
    },
    Passed {
        who: String,
    },
    CombatantDefeated {
        name: String,
    },
    CombatEnded {
        outcome: CombatOutcome,
        xp: u32,
        gold: u32,
    },
}

/// What a successful tool application did, reported back to the narrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub summary: String,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl Outcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            effects: Vec::new(),
        }
    }

    pub fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }
}

/// On whose behalf a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Narrator,
    Combatant(CombatantId),
}

/// Everything a handler may use besides the state itself.
pub struct ToolContext<'a> {
    pub rng: &'a mut StdRng,
    pub policy: &'a CombatPolicy,
    pub actor: Actor,
}

impl<'a> ToolContext<'a> {
    pub fn narrator(rng: &'a mut StdRng, policy: &'a CombatPolicy) -> Self {
        Self {
            rng,
            policy,
            actor: Actor::Narrator,
        }
    }

    pub fn combatant(rng: &'a mut StdRng, policy: &'a CombatPolicy, id: CombatantId) -> Self {
        Self {
            rng,
            policy,
            actor: Actor::Combatant(id),
        }
    }
}

/// How the orchestrator routes a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Reads state only.
    Query,
    /// Changes the world or the player outside the combat turn order.
    World,
    /// Handled by the combat engine.
    Combat,
}

type BoxedHandler =
    Box<dyn Fn(&mut GameState, &Value, &mut ToolContext<'_>) -> Result<Outcome, Rejection> + Send + Sync>;

/// A tool definition with its handler.
pub struct RegisteredTool {
    definition: Tool,
    kind: ToolKind,
    handler: BoxedHandler,
}

impl RegisteredTool {
    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn schema(&self) -> &Value {
        &self.definition.input_schema
    }

    pub(crate) fn invoke(
        &self,
        state: &mut GameState,
        arguments: &Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Outcome, Rejection> {
        (self.handler)(state, arguments, ctx)
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Collects tools before the registry is frozen.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistryBuilder {
    /// Register a tool's schema and handler together.
    pub fn register<A, F>(mut self, kind: ToolKind, handler: F) -> Result<Self, DuplicateToolError>
    where
        A: ToolInput + DeserializeOwned + 'static,
        F: Fn(&mut GameState, A, &mut ToolContext<'_>) -> Result<Outcome, Rejection>
            + Send
            + Sync
            + 'static,
    {
        let definition = A::as_tool();
        if self.tools.iter().any(|t| t.definition.name == definition.name) {
            return Err(DuplicateToolError(definition.name));
        }

        let handler: BoxedHandler = Box::new(
            move |state: &mut GameState, arguments: &Value, ctx: &mut ToolContext<'_>| {
                let args: A = serde_json::from_value(arguments.clone())
                    .map_err(|e| Rejection::new(format!("malformed arguments: {e}")))?;
                handler(state, args, ctx)
            },
        );

        self.tools.push(RegisteredTool {
            definition,
            kind,
            handler,
        });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        let index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.definition.name.clone(), i))
            .collect();
        ToolRegistry {
            tools: self.tools,
            index,
        }
    }
}

/// An immutable set of tools, shared across sessions behind an `Arc`.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

lazy_static! {
    static ref STANDARD: Result<Arc<ToolRegistry>, DuplicateToolError> =
        build_standard().map(Arc::new);
}

fn build_standard() -> Result<ToolRegistry, DuplicateToolError> {
    let builder = builtin::register(ToolRegistry::builder())?;
    let builder = crate::combat::actions::register(builder)?;
    Ok(builder.build())
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// The process-wide standard tool set.
    pub fn standard() -> Result<Arc<ToolRegistry>, DuplicateToolError> {
        STANDARD.clone()
    }

    pub fn version(&self) -> u32 {
        SCHEMA_VERSION
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn kind(&self, name: &str) -> Option<ToolKind> {
        self.get(name).map(RegisteredTool::kind)
    }

    /// Tool definitions in registration order, as sent to the narrator.
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
