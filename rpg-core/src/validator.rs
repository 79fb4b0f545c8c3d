//! The gatekeeper between narrator tool calls and authoritative state.
//!
//! Application is transactional: arguments are checked against the tool's
//! schema, the handler runs against a clone of the state, and the clone only
//! replaces the original if every invariant holds afterwards.

use crate::tools::{Outcome, RegisteredTool, ToolCall, ToolContext, ToolRegistry};
use crate::world::{GameState, InvariantBreach};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a tool call was not applied. State is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid call to `{tool}`: {reason}")]
    InvalidToolCall { tool: String, reason: String },

    #[error("`{tool}` would break an invariant: {breach}")]
    InvariantViolation { tool: String, breach: InvariantBreach },
}

impl ToolError {
    fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidToolCall {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            ToolError::InvalidToolCall { tool, .. } | ToolError::InvariantViolation { tool, .. } => tool,
        }
    }

    /// Short machine-readable label for transcripts.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidToolCall { .. } => "invalid_tool_call",
            ToolError::InvariantViolation { .. } => "invariant_violation",
        }
    }
}

/// Applies tool calls from a [`ToolRegistry`] to game state.
#[derive(Debug, Clone)]
pub struct StateValidator {
    registry: Arc<ToolRegistry>,
}

impl StateValidator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Look the tool up and check the arguments against its schema.
    pub fn validate(&self, call: &ToolCall) -> Result<&RegisteredTool, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::invalid(&call.name, "no such tool"))?;
        check_arguments(tool.schema(), &normalized_arguments(&call.arguments))
            .map_err(|reason| ToolError::invalid(&call.name, reason))?;
        Ok(tool)
    }

    /// Apply a call and return the resulting state, leaving `state` untouched.
    pub fn apply_to(
        &self,
        state: &GameState,
        call: &ToolCall,
        ctx: &mut ToolContext<'_>,
    ) -> Result<(GameState, Outcome), ToolError> {
        let tool = self.validate(call)?;
        let arguments = normalized_arguments(&call.arguments);

        let mut next = state.clone();
        let outcome = tool
            .invoke(&mut next, &arguments, ctx)
            .map_err(|rejection| ToolError::invalid(&call.name, rejection.0))?;

        if let Err(breach) = next.check_invariants() {
            warn!(tool = %call.name, %breach, "rolling back tool call");
            return Err(ToolError::InvariantViolation {
                tool: call.name.clone(),
                breach,
            });
        }

        debug!(tool = %call.name, effects = outcome.effects.len(), "tool applied");
        Ok((next, outcome))
    }

    /// Apply a call in place. On error `state` is exactly as it was.
    pub fn apply(
        &self,
        state: &mut GameState,
        call: &ToolCall,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Outcome, ToolError> {
        let (next, outcome) = self.apply_to(state, call, ctx)?;
        *state = next;
        Ok(outcome)
    }
}

/// Models sometimes send `null` for a tool with no arguments.
fn normalized_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}

/// Check a value against the subset of JSON Schema the tool derive emits.
fn check_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Value::Object(args) = arguments else {
        return Err(format!("arguments must be an object, got {}", type_name(arguments)));
    };
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        if let Some(unknown) = args.keys().find(|k| !properties.contains_key(*k)) {
            return Err(format!("unknown argument `{unknown}`"));
        }
    }

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    for name in &required {
        if args.get(*name).map_or(true, Value::is_null) {
            return Err(format!("missing required argument `{name}`"));
        }
    }

    for (name, value) in args {
        if value.is_null() {
            continue;
        }
        if let Some(property) = properties.get(name) {
            check_value(name, property, value)?;
        }
    }
    Ok(())
}

fn check_value(name: &str, schema: &Value, value: &Value) -> Result<(), String> {
    let expected = schema.get("type").and_then(Value::as_str).unwrap_or("any");
    let type_ok = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if !type_ok {
        return Err(format!(
            "`{name}` must be {expected}, got {}",
            type_name(value)
        ));
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if number < min {
                return Err(format!("`{name}` must be at least {min}, got {value}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if number > max {
                return Err(format!("`{name}` must be at most {max}, got {value}"));
            }
        }
    }

    if let (Some(allowed), Some(text)) = (schema.get("enum").and_then(Value::as_array), value.as_str()) {
        if !allowed
            .iter()
            .filter_map(Value::as_str)
            .any(|a| a.eq_ignore_ascii_case(text.trim()))
        {
            let options: Vec<&str> = allowed.iter().filter_map(Value::as_str).collect();
            return Err(format!("`{name}` must be one of {}, got `{text}`", options.join(", ")));
        }
    }

    if let (Some(items), Some(elements)) = (schema.get("items"), value.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            check_value(&format!("{name}[{i}]"), items, element)?;
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatPolicy;
    use crate::testing::sample_state;
    use crate::world::HitPoints;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn validator() -> StateValidator {
        StateValidator::new(ToolRegistry::standard().unwrap())
    }

    fn apply(state: &mut GameState, name: &str, args: Value) -> Result<Outcome, ToolError> {
        let mut rng = StdRng::seed_from_u64(3);
        let policy = CombatPolicy::default();
        let mut ctx = ToolContext::narrator(&mut rng, &policy);
        validator().apply(state, &ToolCall::new(name, args), &mut ctx)
    }

    #[test]
    fn test_unknown_tool_is_invalid() {
        let mut state = sample_state();
        let err = apply(&mut state, "teleport", json!({})).unwrap_err();
        assert_eq!(err.kind(), "invalid_tool_call");
        assert_eq!(err.tool(), "teleport");
    }

    #[test]
    fn test_schema_violations_never_mutate() {
        let cases = [
            ("grant_item", json!({"item": "Rope", "quantity": 0})),
            ("grant_item", json!({"item": "Rope", "quantity": "three"})),
            ("grant_item", json!({"item": "Rope", "quantity": 1.5})),
            ("grant_item", json!({"item": "Rope"})),
            ("grant_item", json!({"item": "Rope", "quantity": 1, "kind": "spell"})),
            ("grant_item", json!({"item": "Rope", "quantity": 1, "color": "red"})),
            ("apply_damage", json!({"target": "player", "amount": -4})),
            ("ability_check", json!({"ability": "strength", "dc": 31})),
            ("move", json!("Market Square")),
        ];

        for (name, args) in cases {
            let mut state = sample_state();
            let before = state.clone();
            let err = apply(&mut state, name, args.clone()).unwrap_err();
            assert!(
                matches!(err, ToolError::InvalidToolCall { .. }),
                "{name} {args} gave {err:?}"
            );
            assert_eq!(state, before, "{name} {args} mutated state");
        }
    }

    #[test]
    fn test_move_to_non_neighbor_rejected() {
        let mut state = sample_state();
        let err = apply(&mut state, "move", json!({"destination": "Whispering Woods"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidToolCall { ref tool, .. } if tool == "move"));
        assert_eq!(state.world.current_key(), "crossroads inn");
    }

    #[test]
    fn test_capacity_breach_rolls_back() {
        let mut state = sample_state();
        state.player.inventory.capacity = state.player.inventory.total_quantity() + 1;
        let before = state.clone();

        let err = apply(&mut state, "grant_item", json!({"item": "Arrow", "quantity": 20})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvariantViolation {
                breach: InvariantBreach::OverCapacity { .. },
                ..
            }
        ));
        assert_eq!(state, before);

        apply(&mut state, "grant_item", json!({"item": "Arrow", "quantity": 1})).unwrap();
        assert_eq!(state.player.inventory.quantity_of("arrow"), 1);
    }

    #[test]
    fn test_null_arguments_accepted_for_empty_tools() {
        let mut state = sample_state();
        let outcome = apply(&mut state, "view_inventory", Value::Null).unwrap();
        assert!(outcome.summary.contains("Longsword"));
    }

    #[test]
    fn test_enum_matching_ignores_case() {
        let mut state = sample_state();
        apply(&mut state, "ability_check", json!({"ability": "Wisdom", "dc": 5})).unwrap();
    }

    #[test]
    fn test_hp_stays_in_bounds_for_random_valid_calls() {
        use rand::Rng;

        let mut rng = StdRng::seed_from_u64(2024);
        let mut state = sample_state();
        state.player.hit_points = HitPoints::new(20);
        state.player.inventory.capacity = 50;
        let policy = CombatPolicy::default();
        let validator = validator();

        for _ in 0..500 {
            let call = match rng.gen_range(0..4) {
                0 => ToolCall::new("apply_damage", json!({"target": "player", "amount": rng.gen_range(0..30)})),
                1 => ToolCall::new("heal", json!({"target": "player", "amount": rng.gen_range(0..30)})),
                2 => ToolCall::new("grant_item", json!({"item": "Pebble", "quantity": rng.gen_range(1..10)})),
                _ => ToolCall::new("remove_item", json!({"item": "Pebble", "quantity": rng.gen_range(1..10)})),
            };
            let mut call_rng = StdRng::seed_from_u64(rng.gen());
            let mut ctx = ToolContext::narrator(&mut call_rng, &policy);
            let _ = validator.apply(&mut state, &call, &mut ctx);

            let hp = state.player.hit_points;
            assert!((0..=hp.maximum).contains(&hp.current));
            assert!(state.player.inventory.total_quantity() <= state.player.inventory.capacity);
            assert!(state.check_invariants().is_ok());
        }
    }
}
