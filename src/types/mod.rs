//! Core contracts shared across the crate: run statuses, error codes,
//! tool call/result types, and the deterministic helpers every component
//! leans on (ids, millisecond timestamps, stable JSON, fingerprints,
//! idempotency keys).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::tools::ToolAlias;

/// Fingerprints are truncated to this many hex characters. They identify
/// structured values for dedupe and replay, not for security.
const FINGERPRINT_LEN: usize = 16;

/// Default timeout applied to a [`ToolCall`] when none is given.
pub const DEFAULT_TOOL_TIMEOUT_MS: i64 = 30_000;

// ── Status & risk ──

/// State-machine status of a run.
///
/// Nodes set the status to signal the next transition; the router is a
/// pure function of it. `Done`, `Failed` and `Escalated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Fresh state, nothing has run yet.
    Init,
    /// Waiting for the planner to produce a plan.
    Planning,
    /// Building a perception snapshot of the screen.
    Perceiving,
    /// Checking the approval gate for the current step.
    PolicyCheck,
    /// Executing selected tool calls.
    Acting,
    /// Checking the current step's success criteria.
    Verifying,
    /// Attempting remediation after a failure.
    Recovering,
    /// Blocked on an external human-approval decision.
    WaitingApproval,
    /// Terminal: every plan step completed.
    Done,
    /// Terminal: the run failed.
    Failed,
    /// Terminal: a policy denial escalated to a human.
    Escalated,
}

impl Status {
    /// Whether this status ends the run. Once set, no further state
    /// mutation occurs and the router always yields finalize.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Escalated)
    }

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Planning => "PLANNING",
            Self::Perceiving => "PERCEIVING",
            Self::PolicyCheck => "POLICY_CHECK",
            Self::Acting => "ACTING",
            Self::Verifying => "VERIFYING",
            Self::Recovering => "RECOVERING",
            Self::WaitingApproval => "WAITING_APPROVAL",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Escalated => "ESCALATED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level of a plan step, used for approval gating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Risk {
    /// Routine interaction, no gate.
    #[default]
    Low,
    /// Elevated but still auto-approved.
    Medium,
    /// Requires human approval when the policy demands it.
    High,
}

// ── Error codes ──

/// Centralized error codes carried in terminal reasons and telemetry.
///
/// Errors are values throughout the core; nothing unwinds past a node
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Terminal success.
    Done,
    /// Terminal escalation to a human.
    Escalated,
    /// Planner returned an empty or malformed plan.
    PlanInvalid,
    /// Planner itself failed.
    PlanError,
    /// A node that requires a plan was entered without one.
    NoPlan,
    /// The current step exceeded its wall-clock budget.
    StepTimeout,
    /// A required tool alias has no backend.
    ToolMissing,
    /// An alias resolved to neither a local nor a remote backend.
    ToolNotFound,
    /// An alias maps to a remote tool but no remote client is configured.
    McpNotConfigured,
    /// A tool call was refused by policy, pre-dispatch or at runtime.
    PolicyDeny,
    /// The retry budget for the run or the step is spent.
    RetryExhausted,
    /// The recovery policy itself failed.
    RecoveryError,
    /// The workflow transition guard tripped.
    StepLimit,
}

impl ErrorCode {
    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Escalated => "ESCALATED",
            Self::PlanInvalid => "PLAN_INVALID",
            Self::PlanError => "PLAN_ERROR",
            Self::NoPlan => "NO_PLAN",
            Self::StepTimeout => "STEP_TIMEOUT",
            Self::ToolMissing => "TOOL_MISSING",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::McpNotConfigured => "MCP_NOT_CONFIGURED",
            Self::PolicyDeny => "POLICY_DENY",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::RecoveryError => "RECOVERY_ERROR",
            Self::StepLimit => "STEP_LIMIT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tool contracts ──

/// A single tool invocation, framework-neutral.
///
/// `name` is an alias from the closed vocabulary; the executor resolves
/// it to a local function or a remote fully-qualified tool. The
/// `idempotency_key` guarantees at-most-once execution per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool alias to invoke.
    pub name: ToolAlias,
    /// Arguments passed to the backend.
    pub args: serde_json::Value,
    /// Stable key preventing double execution on retries and replay.
    pub idempotency_key: String,
    /// Per-call timeout, delegated to remote backends.
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: i64,
}

fn default_tool_timeout_ms() -> i64 {
    DEFAULT_TOOL_TIMEOUT_MS
}

impl ToolCall {
    /// Build a call with the default timeout.
    pub fn new(
        name: ToolAlias,
        args: serde_json::Value,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            name,
            args,
            idempotency_key: idempotency_key.into(),
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        }
    }

    /// Override the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Outcome of a tool invocation. Cached by the executor and replayed
/// unchanged for repeated idempotency keys, failures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the invocation succeeded.
    pub ok: bool,
    /// Structured payload on success.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Error string on failure (e.g. `POLICY_DENY: denylist`).
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result carrying a payload.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result carrying an error string.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Whether the error marks a policy denial. Runtime denials are
    /// terminal for the run (escalation).
    pub fn is_policy_denied(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with(ErrorCode::PolicyDeny.as_str()))
    }
}

// ── Deterministic helpers ──

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Short prefixed unique id, e.g. `run_3f0c9a1b2d4e`.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let short = hex.get(..12).unwrap_or(&hex);
    format!("{prefix}_{short}")
}

/// Deterministic JSON encoding: object keys are emitted in sorted order,
/// so two values that differ only in key insertion order encode equally.
pub fn stable_json<T: Serialize>(value: &T) -> String {
    // serde_json maps are ordered (BTreeMap-backed), so encoding via
    // Value gives a canonical key order.
    match serde_json::to_value(value) {
        Ok(v) => serde_json::to_string(&v).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Short deterministic fingerprint of a structured value.
///
/// Stable across serialization round-trips and key reordering. Used for
/// plan identity, effect correlation and idempotency keys; not
/// cryptographic in purpose.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_json(value).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest.get(..FINGERPRINT_LEN).unwrap_or(&digest).to_owned()
}

/// Deterministic idempotency key for a tool call:
/// `run_id:step_id:alias:fingerprint(args)` plus an optional suffix.
pub fn idempotency_key(
    run_id: &str,
    step_id: &str,
    alias: ToolAlias,
    args: &serde_json::Value,
    suffix: Option<&str>,
) -> String {
    let base = format!("{run_id}:{step_id}:{alias}:{}", fingerprint(args));
    match suffix {
        Some(s) if !s.is_empty() => format!("{base}:{s}"),
        _ => base,
    }
}
