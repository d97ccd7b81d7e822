//! ToolCall constructors for selectors and recovery policies.
//!
//! Each builder derives a deterministic idempotency key from the run,
//! the active step and the arguments, and picks a timeout suited to the
//! interaction kind. They fail synchronously when no plan is active.

use thiserror::Error;

use crate::state::AgentState;
use crate::tools::ToolAlias;
use crate::types::{idempotency_key, ToolCall};

/// Builder failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The state has no valid plan, so no step can key the call.
    #[error("no active plan")]
    NoActivePlan,
}

fn keyed_call(
    state: &AgentState,
    alias: ToolAlias,
    args: serde_json::Value,
    timeout_ms: i64,
) -> Result<ToolCall, BuildError> {
    let step = state.current_step().ok_or(BuildError::NoActivePlan)?;
    let key = idempotency_key(&state.run_id, &step.id, alias, &args, None);
    Ok(ToolCall::new(alias, args, key).with_timeout_ms(timeout_ms))
}

/// Click the midpoint of a bounding box (`[x1, y1, x2, y2]`).
///
/// # Errors
///
/// Fails when no plan is active.
pub fn click_from_bbox(state: &AgentState, bbox: [i64; 4]) -> Result<ToolCall, BuildError> {
    let [x1, y1, x2, y2] = bbox;
    let args = serde_json::json!({
        "x": midpoint(x1, x2),
        "y": midpoint(y1, y2),
    });
    keyed_call(state, ToolAlias::Click, args, 15_000)
}

/// Type a text string.
///
/// # Errors
///
/// Fails when no plan is active.
pub fn type_text(state: &AgentState, text: &str) -> Result<ToolCall, BuildError> {
    let args = serde_json::json!({ "text": text });
    keyed_call(state, ToolAlias::TypeText, args, 30_000)
}

/// Press a key chord, e.g. `["ctrl", "s"]`.
///
/// # Errors
///
/// Fails when no plan is active.
pub fn hotkey(state: &AgentState, keys: &[&str]) -> Result<ToolCall, BuildError> {
    let args = serde_json::json!({ "keys": keys });
    keyed_call(state, ToolAlias::Hotkey, args, 15_000)
}

/// Integer midpoint without overflow on extreme coordinates.
fn midpoint(a: i64, b: i64) -> i64 {
    a.saturating_add(b).wrapping_div(2)
}
