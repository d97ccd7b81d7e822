//! The single source of truth for a run.
//!
//! One [`AgentState`] is created per run, mutated exclusively by node
//! functions, serialized at finalize (after the executor slot has been
//! vacated) and discarded. Everything an operator needs for a
//! post-mortem lives here: the plan, the latest perception, the
//! append-only action log, the policy decisions, the retry counters and
//! the telemetry trace.

pub mod telemetry;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tools::executor::ToolExecutor;
use crate::types::{fingerprint, new_id, now_ms, ErrorCode, Risk, Status};
use telemetry::Telemetry;

// ── Scratch keys ──

/// Scratch hint: window title fragment to focus before capture.
pub const SCRATCH_FOCUS_HINT: &str = "focus_hint";
/// Scratch hint: whether perception should run the vision parse
/// (defaults to true when absent).
pub const SCRATCH_NEED_VISION: &str = "need_vision";
/// Scratch hint: route the next recovery to the planner instead of
/// perception.
pub const SCRATCH_FORCE_REPLAN: &str = "force_replan";
/// Scratch slot: diagnostic map from the most recent verification.
pub const SCRATCH_VERIFY_DETAILS: &str = "verify_details";

// ── Plan ──

/// Default per-step retry allowance.
const DEFAULT_STEP_MAX_RETRIES: u32 = 2;
/// Default per-step wall-clock budget.
const DEFAULT_STEP_TIMEOUT_MS: i64 = 90_000;
/// Default total recovery budget for a run.
const DEFAULT_TOTAL_RETRY_BUDGET: u32 = 8;

fn default_step_max_retries() -> u32 {
    DEFAULT_STEP_MAX_RETRIES
}

fn default_step_timeout_ms() -> i64 {
    DEFAULT_STEP_TIMEOUT_MS
}

/// A single execution step.
///
/// `success_criteria` are free-form predicates for the external
/// verifier. `tools_allowed` is advisory for planners; enforcement is
/// solely the executor's policy gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable step id, referenced by retry counters and telemetry.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// What the step is trying to accomplish.
    pub intent: String,
    /// Machine-checkable predicates for the verifier.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Advisory tool hints for planners.
    #[serde(default)]
    pub tools_allowed: Vec<String>,
    /// Risk level, used by the approval gate.
    #[serde(default)]
    pub risk: Risk,
    /// Retry allowance for this step.
    #[serde(default = "default_step_max_retries")]
    pub max_retries: u32,
    /// Wall-clock budget from entering perception to completion.
    #[serde(default = "default_step_timeout_ms")]
    pub timeout_ms: i64,
}

impl PlanStep {
    /// Build a step with default criteria, risk and budgets.
    pub fn new(id: impl Into<String>, title: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            intent: intent.into(),
            success_criteria: Vec::new(),
            tools_allowed: Vec::new(),
            risk: Risk::Low,
            max_retries: DEFAULT_STEP_MAX_RETRIES,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
        }
    }

    /// Set the risk level.
    pub fn with_risk(mut self, risk: Risk) -> Self {
        self.risk = risk;
        self
    }

    /// Set the retry allowance.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the wall-clock budget.
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// An objective broken into ordered steps with a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// What the plan is trying to achieve.
    pub objective: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Index of the active step.
    #[serde(default)]
    pub current_step_idx: usize,
    /// Deterministic digest of objective + steps, set by
    /// [`finalize`](Self::finalize).
    #[serde(default)]
    pub plan_fingerprint: Option<String>,
}

impl Plan {
    /// Build a plan with the cursor at the first step.
    pub fn new(objective: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            objective: objective.into(),
            steps,
            current_step_idx: 0,
            plan_fingerprint: None,
        }
    }

    /// Compute the plan fingerprint if not already set.
    ///
    /// The digest covers the objective and every step field, encoded in
    /// stable key order, so it survives reserialization unchanged.
    pub fn finalize(&mut self) {
        if self.plan_fingerprint.is_none() {
            self.plan_fingerprint = Some(fingerprint(&serde_json::json!({
                "objective": self.objective,
                "steps": self.steps,
            })));
        }
    }

    /// A plan is valid iff it has at least one step and the cursor is
    /// in range.
    pub fn is_valid(&self) -> bool {
        !self.steps.is_empty() && self.current_step_idx < self.steps.len()
    }

    /// The active step, when the plan is valid.
    pub fn current(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_idx)
    }

    /// Advance the cursor. Returns true when the plan is finished.
    pub fn advance(&mut self) -> bool {
        self.current_step_idx = self.current_step_idx.saturating_add(1);
        self.current_step_idx >= self.steps.len()
    }
}

// ── Perception ──

/// The latest normalized view of the screen, overwritten each cycle.
///
/// At least one of `screenshot_hash` / `screenshot_b64` is populated
/// whenever perception succeeds; nodes reject captures that provide
/// neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionSnapshot {
    /// Stable hash of the capture, the preferred payload.
    pub screenshot_hash: Option<String>,
    /// Raw b64 payload, stored only when configured.
    pub screenshot_b64: Option<String>,
    /// Title of the focused window, if the capture tool reports one.
    pub focused_window: Option<String>,
    /// UI Automation tree projection, when available.
    pub uia_tree: Option<serde_json::Value>,
    /// Normalized element candidates from the vision parse.
    #[serde(default)]
    pub elements: Vec<serde_json::Value>,
    /// Capture timestamp.
    pub ts_ms: i64,
}

// ── Actions ──

/// One entry of the append-only action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique record id.
    pub action_id: String,
    /// Alias that was invoked.
    pub tool: crate::tools::ToolAlias,
    /// Arguments, owned by value for the audit trail.
    pub args: serde_json::Value,
    /// Key under which the result was cached.
    pub idempotency_key: String,
    /// Invocation start.
    pub started_ms: i64,
    /// Invocation end.
    pub ended_ms: Option<i64>,
    /// Outcome, when known.
    pub ok: Option<bool>,
    /// Error string on failure.
    pub error: Option<String>,
    /// Post-action capture hash correlating the action with an
    /// observable effect.
    pub effect_fingerprint: Option<String>,
}

// ── Policy ──

/// Outcome of the most recent policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    /// The call or step was allowed.
    Allow,
    /// The call was refused.
    Deny,
    /// The step needs human approval before acting.
    RequireApproval,
}

/// Policy enforced by the executor (tool lists) and by the policy-check
/// node (approval gating).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyContext {
    /// When non-empty, only these tool names may be invoked.
    #[serde(default)]
    pub tool_allowlist: Vec<String>,
    /// Always denied. May name tools outside the alias vocabulary.
    #[serde(default)]
    pub tool_denylist: Vec<String>,
    /// Whether HIGH-risk steps require human approval.
    pub require_approval_for_high_risk: bool,
    /// Most recent decision.
    pub last_decision: Option<PolicyDecision>,
    /// Reason for the most recent denial.
    pub deny_reason: Option<String>,
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self {
            tool_allowlist: Vec::new(),
            tool_denylist: Vec::new(),
            require_approval_for_high_risk: true,
            last_decision: None,
            deny_reason: None,
        }
    }
}

// ── Retry budget ──

/// Bounds recovery attempts with a global counter and per-step counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Total recovery attempts allowed for the whole run.
    pub total_budget: u32,
    /// Attempts consumed so far.
    pub used: u32,
    /// Per-step attempt counts, compared against each step's
    /// `max_retries`.
    #[serde(default)]
    pub step_retry_counts: BTreeMap<String, u32>,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            total_budget: DEFAULT_TOTAL_RETRY_BUDGET,
            used: 0,
            step_retry_counts: BTreeMap::new(),
        }
    }
}

impl RetryBudget {
    /// Budget with a specific global allowance.
    pub fn with_total(total_budget: u32) -> Self {
        Self {
            total_budget,
            ..Self::default()
        }
    }

    /// Whether one more attempt may be granted for the step.
    pub fn can_retry_step(&self, step_id: &str, step_max: u32) -> bool {
        if self.used >= self.total_budget {
            return false;
        }
        self.step_retry_counts.get(step_id).copied().unwrap_or(0) < step_max
    }

    /// Consume one attempt, globally and for the step.
    pub fn consume(&mut self, step_id: &str) {
        self.used = self.used.saturating_add(1);
        let count = self.step_retry_counts.entry(step_id.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
    }
}

// ── Agent state ──

/// The one mutable record threaded through the workflow.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentState {
    /// Opaque unique run id, assigned once.
    pub run_id: String,
    /// The user objective.
    pub goal: String,
    /// State-machine status; the router is a pure function of it.
    pub status: Status,
    /// Current plan with its step cursor.
    pub plan: Option<Plan>,
    /// Latest perception snapshot, overwritten each cycle.
    pub perception: Option<PerceptionSnapshot>,
    /// Append-only audit log of executed tool calls.
    pub actions: Vec<ActionRecord>,
    /// Tool and approval policy.
    pub policy: PolicyContext,
    /// Recovery budget counters.
    pub retry: RetryBudget,
    /// Append-only events and spans.
    pub telemetry: Telemetry,
    /// Set when a HIGH-risk step is blocked on approval.
    pub requires_human_approval: bool,
    /// Flipped by the external runner (or an approval gate) to release
    /// the block.
    pub approved: bool,
    /// When the active step entered perception; the timeout guard.
    pub last_step_started_ms: Option<i64>,
    /// Human-readable terminal reason.
    pub done_reason: Option<String>,
    /// Transient working memory: hints for perception and routing.
    #[serde(default)]
    pub scratch: serde_json::Map<String, serde_json::Value>,
    /// Per-run tool executor. Installed by the workflow, vacated at
    /// finalize so the state serializes cleanly.
    #[serde(skip)]
    pub executor: Option<Arc<ToolExecutor>>,
}

impl AgentState {
    /// Fresh state for a run.
    pub fn new(run_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            status: Status::Init,
            plan: None,
            perception: None,
            actions: Vec::new(),
            policy: PolicyContext::default(),
            retry: RetryBudget::default(),
            telemetry: Telemetry::default(),
            requires_human_approval: false,
            approved: false,
            last_step_started_ms: None,
            done_reason: None,
            scratch: serde_json::Map::new(),
            executor: None,
        }
    }

    /// Assign a run id if none was provided.
    pub fn ensure_run_id(&mut self) {
        if self.run_id.is_empty() {
            self.run_id = new_id("run");
        }
    }

    /// Install minimal safe policy defaults when both tool lists are
    /// empty: a denylist of destructive system tools and mandatory
    /// approval for HIGH-risk steps.
    pub fn ensure_policy_defaults(&mut self) {
        if self.policy.tool_allowlist.is_empty() && self.policy.tool_denylist.is_empty() {
            self.policy.tool_denylist = vec![
                "file_delete".to_owned(),
                "process_kill".to_owned(),
                "registry_write".to_owned(),
            ];
            self.policy.require_approval_for_high_risk = true;
        }
    }

    /// Enter a terminal status, recording the reason and code.
    pub fn set_terminal(&mut self, status: Status, reason: &str, code: ErrorCode) {
        self.status = status;
        self.done_reason = Some(reason.to_owned());
        self.telemetry.last_error = matches!(status, Status::Failed | Status::Escalated)
            .then(|| reason.to_owned());
        self.telemetry.error_code = Some(code);
        self.telemetry.event(
            "terminal",
            serde_json::json!({ "status": status, "reason": reason, "code": code }),
        );
    }

    /// The active plan step, when a valid plan is present.
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.as_ref().and_then(Plan::current)
    }

    /// Whether a valid plan is present.
    pub fn plan_is_valid(&self) -> bool {
        self.plan.as_ref().is_some_and(Plan::is_valid)
    }

    /// Whether the active step has exceeded its wall-clock budget.
    ///
    /// Checked opportunistically at node entry; false when no plan or
    /// no step start time is recorded.
    pub fn step_timeout_exceeded(&self) -> bool {
        let Some(step) = self.current_step() else {
            return false;
        };
        let Some(started) = self.last_step_started_ms else {
            return false;
        };
        now_ms().saturating_sub(started) > step.timeout_ms
    }

    /// Boolean scratch hint, with a default when absent or non-boolean.
    pub fn scratch_flag_or(&self, key: &str, default: bool) -> bool {
        self.scratch
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(default)
    }

    /// String scratch hint.
    pub fn scratch_str(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).and_then(serde_json::Value::as_str)
    }

    /// Set a scratch entry.
    pub fn set_scratch(&mut self, key: &str, value: serde_json::Value) {
        self.scratch.insert(key.to_owned(), value);
    }
}
