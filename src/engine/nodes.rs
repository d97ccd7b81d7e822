//! Per-state transition logic.
//!
//! Each node reads and mutates the [`AgentState`] and sets the status
//! that tells the router where to go next. Nodes never drive the graph
//! themselves, and no failure unwinds past a node boundary: collaborator
//! errors become terminal codes or a `RECOVERING` status, per the error
//! taxonomy.
//!
//! The planner, action selector, verifier, recovery policy and approval
//! gate are injected behind the traits defined here; nodes only execute
//! and record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::state::{
    ActionRecord, AgentState, PerceptionSnapshot, Plan, PlanStep, SCRATCH_FOCUS_HINT,
    SCRATCH_FORCE_REPLAN, SCRATCH_NEED_VISION, SCRATCH_VERIFY_DETAILS,
};
use crate::tools::executor::ToolExecutor;
use crate::tools::registry::ToolRegistry;
use crate::tools::ToolAlias;
use crate::types::{idempotency_key, new_id, now_ms, ErrorCode, Risk, Status, ToolCall, ToolResult};

// ── Collaborator contracts ──

/// Produces a plan for the goal. A plan with no steps is invalid.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan against the current state.
    ///
    /// # Errors
    ///
    /// A planner failure terminates the run with `PLAN_ERROR`.
    async fn plan(&self, state: &AgentState) -> anyhow::Result<Plan>;
}

/// Chooses the tool calls for the current step from the latest
/// perception. Returning no calls triggers recovery.
#[async_trait]
pub trait ActionSelector: Send + Sync {
    /// Select calls for the active step.
    ///
    /// # Errors
    ///
    /// A selector failure routes the run to recovery.
    async fn select(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
    ) -> anyhow::Result<Vec<ToolCall>>;
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether the step's success criteria are met.
    pub ok: bool,
    /// Free-form diagnostics, stored in scratch for the next cycle.
    pub details: serde_json::Value,
}

impl Verdict {
    /// Passing verdict.
    pub fn pass(details: serde_json::Value) -> Self {
        Self { ok: true, details }
    }

    /// Failing verdict.
    pub fn fail(details: serde_json::Value) -> Self {
        Self { ok: false, details }
    }
}

/// Checks the current step's success criteria against the state.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify the active step.
    ///
    /// # Errors
    ///
    /// A verifier failure routes the run to recovery.
    async fn verify(&self, state: &AgentState, tools: &ToolRegistry) -> anyhow::Result<Verdict>;
}

/// Remediation chosen by the recovery policy.
///
/// Collaborators see the state immutably, so a policy that wants a
/// fresh plan asks for it here; the recover node transcribes `replan`
/// into the routing scratch flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Remediation {
    /// Calls to execute before re-perceiving, e.g. a short wait.
    pub calls: Vec<ToolCall>,
    /// Route the next transition to the planner instead of perception.
    pub replan: bool,
}

impl Remediation {
    /// No remediation calls; just re-perceive.
    pub fn none() -> Self {
        Self::default()
    }

    /// Remediation calls to run before re-perceiving.
    pub fn with_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            calls,
            replan: false,
        }
    }

    /// Ask for a fresh plan.
    pub fn replan(mut self) -> Self {
        self.replan = true;
        self
    }
}

/// Decides what to try after a failed cycle.
#[async_trait]
pub trait RecoveryPolicy: Send + Sync {
    /// Choose remediation for the active step.
    ///
    /// # Errors
    ///
    /// A recovery failure terminates the run with `RECOVERY_ERROR`.
    async fn recover(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
    ) -> anyhow::Result<Remediation>;
}

/// External approval decision source, polled while the run waits.
///
/// Hosts that drive the workflow themselves may instead flip
/// [`AgentState::approved`] directly between steps.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Whether the pending HIGH-risk step is approved.
    async fn poll(&self, state: &AgentState) -> bool;
}

// ── Perception options ──

/// Payload strategy and optional sub-phases for perception.
///
/// With `store_screenshot_b64` off, the capture tool must return a
/// stable hash and the vision parser must resolve by `image_hash`;
/// otherwise the b64 payload is stored on the snapshot and passed
/// through.
#[derive(Debug, Clone)]
pub struct PerceiveOptions {
    /// Keep the raw b64 capture on the snapshot.
    pub store_screenshot_b64: bool,
    /// Attach a UIA tree when the alias is available.
    pub prefer_uia_tree: bool,
    /// Run the vision parse (also gated by the `need_vision` hint).
    pub vision_parse: bool,
}

impl Default for PerceiveOptions {
    fn default() -> Self {
        Self {
            store_screenshot_b64: false,
            prefer_uia_tree: true,
            vision_parse: true,
        }
    }
}

// ── Guards and helpers ──

/// Clone of the active step, or terminal `NO_PLAN`.
fn require_step(state: &mut AgentState, node: &str) -> Option<PlanStep> {
    if let Some(step) = state.current_step().cloned() {
        return Some(step);
    }
    state.set_terminal(
        Status::Failed,
        &format!("{node} entered without a valid plan"),
        ErrorCode::NoPlan,
    );
    None
}

/// Terminal `STEP_TIMEOUT` when the active step's budget is spent.
fn timed_out(state: &mut AgentState, node: &str) -> bool {
    if state.step_timeout_exceeded() {
        state.set_terminal(
            Status::Failed,
            &format!("step timeout exceeded during {node}"),
            ErrorCode::StepTimeout,
        );
        return true;
    }
    false
}

/// The per-run executor, or terminal `TOOL_MISSING` when the workflow
/// did not install one.
fn require_executor(state: &mut AgentState, node: &str) -> Option<Arc<ToolExecutor>> {
    if let Some(executor) = state.executor.clone() {
        return Some(executor);
    }
    state.set_terminal(
        Status::Failed,
        &format!("{node} entered without a tool executor"),
        ErrorCode::ToolMissing,
    );
    None
}

/// Append one entry to the audit log.
fn record_action(
    state: &mut AgentState,
    call: &ToolCall,
    started_ms: i64,
    ended_ms: i64,
    result: &ToolResult,
    effect_fingerprint: Option<String>,
) {
    state.actions.push(ActionRecord {
        action_id: new_id("act"),
        tool: call.name,
        args: call.args.clone(),
        idempotency_key: call.idempotency_key.clone(),
        started_ms,
        ended_ms: Some(ended_ms),
        ok: Some(result.ok),
        error: result.error.clone(),
        effect_fingerprint,
    });
}

// ── Nodes ──

/// Assign a run id if absent, install policy defaults, move to planning.
pub async fn initialize(state: &mut AgentState) {
    state.ensure_run_id();
    state.ensure_policy_defaults();
    state.status = Status::Planning;
    info!(run_id = %state.run_id, goal = %state.goal, "run initialized");
    state
        .telemetry
        .event("initialized", serde_json::json!({ "run_id": state.run_id }));
}

/// Invoke the planner and adopt its plan.
///
/// Runs when the status is INIT/PLANNING, or when a replan was forced
/// by a recovery decision (consuming the flag). Any other entry is a
/// no-op, recorded as `plan_skipped`.
pub async fn plan(state: &mut AgentState, planner: &dyn Planner) {
    let forced = state.scratch_flag_or(SCRATCH_FORCE_REPLAN, false);
    if !matches!(state.status, Status::Init | Status::Planning) && !forced {
        state
            .telemetry
            .event("plan_skipped", serde_json::json!({ "status": state.status }));
        return;
    }
    state.scratch.remove(SCRATCH_FORCE_REPLAN);

    match planner.plan(state).await {
        Err(e) => {
            warn!(error = %e, "planner failed");
            state
                .telemetry
                .event("plan_error", serde_json::json!({ "error": format!("{e:#}") }));
            state.set_terminal(
                Status::Failed,
                &format!("planner error: {e:#}"),
                ErrorCode::PlanError,
            );
        }
        Ok(produced) if produced.steps.is_empty() => {
            state.set_terminal(
                Status::Failed,
                "planner returned an empty plan",
                ErrorCode::PlanInvalid,
            );
        }
        Ok(mut produced) => {
            produced.current_step_idx = 0;
            produced.finalize();
            info!(
                objective = %produced.objective,
                steps = produced.steps.len(),
                "plan adopted"
            );
            state.telemetry.event(
                "plan_created",
                serde_json::json!({
                    "objective": produced.objective,
                    "step_count": produced.steps.len(),
                    "plan_fingerprint": produced.plan_fingerprint,
                }),
            );
            state.plan = Some(produced);
            state.last_step_started_ms = Some(now_ms());
            state.status = Status::Perceiving;
        }
    }
}

/// Build a perception snapshot: optional focus, required capture,
/// optional UIA tree, conditional vision parse.
///
/// Capture failure routes to recovery; UIA and vision sub-failures are
/// tolerated and only logged. All calls go through the executor with
/// deterministic idempotency keys.
pub async fn perceive(state: &mut AgentState, opts: &PerceiveOptions) {
    let Some(step) = require_step(state, "perceive") else {
        return;
    };
    if timed_out(state, "perceive") {
        return;
    }
    let Some(executor) = require_executor(state, "perceive") else {
        return;
    };

    // Focus (optional, best-effort).
    if let Some(hint) = state.scratch_str(SCRATCH_FOCUS_HINT).map(str::to_owned) {
        if executor.has(ToolAlias::FocusWindow) {
            let args = serde_json::json!({ "hint": hint });
            let key = idempotency_key(
                &state.run_id,
                &step.id,
                ToolAlias::FocusWindow,
                &args,
                None,
            );
            let call = ToolCall::new(ToolAlias::FocusWindow, args, key)
                .with_timeout_ms(15_000);
            let _ = executor
                .call(&mut state.policy, &mut state.telemetry, &call)
                .await;
        }
    }

    // Capture (required).
    if !executor.has(ToolAlias::ScreenCapture) {
        state.set_terminal(
            Status::Failed,
            "missing required tool alias: screen_capture",
            ErrorCode::ToolMissing,
        );
        return;
    }
    let cap_args = serde_json::json!({ "return_b64": opts.store_screenshot_b64 });
    let cap_key = idempotency_key(
        &state.run_id,
        &step.id,
        ToolAlias::ScreenCapture,
        &cap_args,
        None,
    );
    let cap_call =
        ToolCall::new(ToolAlias::ScreenCapture, cap_args, cap_key);
    let cap = executor
        .call(&mut state.policy, &mut state.telemetry, &cap_call)
        .await;

    let Some(cap_data) = cap.ok.then_some(()).and(cap.data.as_ref()).filter(|d| d.is_object())
    else {
        warn!(error = ?cap.error, "screen capture failed, recovering");
        state.telemetry.event(
            "perceive_capture_failed",
            serde_json::json!({ "error": cap.error }),
        );
        state.status = Status::Recovering;
        return;
    };

    let screenshot_hash = cap_data
        .get("hash")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let screenshot_b64 = opts
        .store_screenshot_b64
        .then(|| {
            cap_data
                .get("b64")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        })
        .flatten();
    if screenshot_hash.is_none() && screenshot_b64.is_none() {
        // A snapshot must carry at least one payload form.
        state.telemetry.event(
            "perceive_capture_failed",
            serde_json::json!({ "error": "capture returned neither hash nor b64" }),
        );
        state.status = Status::Recovering;
        return;
    }

    let mut snapshot = PerceptionSnapshot {
        screenshot_hash,
        screenshot_b64,
        focused_window: cap_data
            .get("focused_window")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        uia_tree: None,
        elements: Vec::new(),
        ts_ms: cap_data
            .get("ts_ms")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(now_ms),
    };

    // UIA tree (optional, preferred when available).
    if opts.prefer_uia_tree && executor.has(ToolAlias::UiaTree) {
        let uia_args = serde_json::json!({ "scope": "focused_window" });
        let suffix = snapshot.screenshot_hash.clone().unwrap_or_default();
        let key = idempotency_key(
            &state.run_id,
            &step.id,
            ToolAlias::UiaTree,
            &uia_args,
            Some(&suffix),
        );
        let call = ToolCall::new(ToolAlias::UiaTree, uia_args, key);
        let uia = executor
            .call(&mut state.policy, &mut state.telemetry, &call)
            .await;
        if uia.ok {
            snapshot.uia_tree = uia.data;
        }
    }

    // Vision parse (conditional on the need_vision hint).
    let need_vision = state.scratch_flag_or(SCRATCH_NEED_VISION, true);
    if opts.vision_parse
        && need_vision
        && executor.has(ToolAlias::OmniparserV2Parse)
    {
        let omni_args = serde_json::json!({
            "image_b64": snapshot.screenshot_b64,
            "image_hash": snapshot.screenshot_hash,
            "context": {
                "goal": state.goal,
                "step": {
                    "id": step.id,
                    "title": step.title,
                    "intent": step.intent,
                    "success_criteria": step.success_criteria,
                },
                "focused_window": snapshot.focused_window,
            },
        });
        // The key covers only the image identity and step, so payload
        // variants of the same frame still dedupe.
        let idem_args = serde_json::json!({
            "image_hash": snapshot.screenshot_hash,
            "step_id": step.id,
        });
        let key = idempotency_key(
            &state.run_id,
            &step.id,
            ToolAlias::OmniparserV2Parse,
            &idem_args,
            None,
        );
        let call = ToolCall::new(ToolAlias::OmniparserV2Parse, omni_args, key)
            .with_timeout_ms(60_000);
        let omni = executor
            .call(&mut state.policy, &mut state.telemetry, &call)
            .await;
        if omni.ok {
            snapshot.elements = match omni.data {
                Some(serde_json::Value::Array(items)) => items,
                Some(serde_json::Value::Object(obj)) => match obj.get("elements") {
                    Some(serde_json::Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
        } else {
            debug!(error = ?omni.error, "vision parse failed, continuing without elements");
            state.telemetry.event(
                "vision_parse_failed",
                serde_json::json!({ "error": omni.error }),
            );
        }
    }

    state.telemetry.event(
        "perceived",
        serde_json::json!({
            "screenshot_hash": snapshot.screenshot_hash,
            "elements": snapshot.elements.len(),
            "has_uia_tree": snapshot.uia_tree.is_some(),
            "focused_window": snapshot.focused_window,
            "store_screenshot_b64": opts.store_screenshot_b64,
        }),
    );
    state.perception = Some(snapshot);
    state.status = Status::PolicyCheck;
}

/// Approval gate for the current step.
///
/// A HIGH-risk step never reaches acting while approval is required
/// and not yet granted.
pub async fn policy_check(state: &mut AgentState) {
    let Some(step) = require_step(state, "policy_check") else {
        return;
    };

    if state.policy.require_approval_for_high_risk && step.risk == Risk::High && !state.approved {
        state.requires_human_approval = true;
        state.policy.last_decision = Some(crate::state::PolicyDecision::RequireApproval);
        state.status = Status::WaitingApproval;
        info!(step_id = %step.id, "high-risk step requires approval");
        state.telemetry.event(
            "approval_required",
            serde_json::json!({ "step_id": step.id, "risk": step.risk }),
        );
        return;
    }

    state.requires_human_approval = false;
    state.policy.last_decision = Some(crate::state::PolicyDecision::Allow);
    state.status = Status::Acting;
    state.telemetry.event(
        "policy_allowed",
        serde_json::json!({ "step_id": step.id, "risk": step.risk }),
    );
}

/// Execute the calls chosen by the action selector.
///
/// Each call is recorded in the audit log. A runtime policy denial
/// escalates terminally; any other failure routes to recovery. When
/// `post_action_capture` is on and capture is available, each action's
/// observable effect is fingerprinted from a follow-up capture hash.
pub async fn act(state: &mut AgentState, selector: &dyn ActionSelector, post_action_capture: bool) {
    let Some(step) = require_step(state, "act") else {
        return;
    };
    if state.perception.is_none() {
        state.telemetry.event("act_missing_perception", serde_json::json!({}));
        state.status = Status::Recovering;
        return;
    }
    if timed_out(state, "act") {
        return;
    }
    let Some(executor) = require_executor(state, "act") else {
        return;
    };

    let calls = match selector.select(state, executor.registry()).await {
        Ok(calls) => calls,
        Err(e) => {
            warn!(error = %e, step_id = %step.id, "action selector failed");
            state.telemetry.event(
                "selector_error",
                serde_json::json!({ "step_id": step.id, "error": format!("{e:#}") }),
            );
            state.status = Status::Recovering;
            return;
        }
    };
    if calls.is_empty() {
        state.telemetry.event(
            "no_actions_selected",
            serde_json::json!({ "step_id": step.id }),
        );
        state.status = Status::Recovering;
        return;
    }

    let call_count = calls.len();
    for call in calls {
        debug!(tool = %call.name, step_id = %step.id, "executing action");
        let started_ms = now_ms();
        let result = executor
            .call(&mut state.policy, &mut state.telemetry, &call)
            .await;
        let ended_ms = now_ms();

        let mut effect_fingerprint = None;
        if post_action_capture && executor.has(ToolAlias::ScreenCapture) {
            let pc_args = serde_json::json!({ "return_b64": false });
            let pc_call = ToolCall::new(
                ToolAlias::ScreenCapture,
                pc_args,
                format!("{}:postcap", call.idempotency_key),
            )
            .with_timeout_ms(20_000);
            let pc = executor
                .call(&mut state.policy, &mut state.telemetry, &pc_call)
                .await;
            if pc.ok {
                effect_fingerprint = pc
                    .data
                    .as_ref()
                    .and_then(|d| d.get("hash"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
            }
        }

        record_action(state, &call, started_ms, ended_ms, &result, effect_fingerprint);

        if !result.ok {
            if result.is_policy_denied() {
                let error = result.error.unwrap_or_default();
                state.telemetry.event(
                    "policy_denied_runtime",
                    serde_json::json!({ "step_id": step.id, "tool": call.name, "error": error }),
                );
                state.set_terminal(
                    Status::Escalated,
                    &format!("policy denied tool at runtime: {error}"),
                    ErrorCode::PolicyDeny,
                );
                return;
            }
            warn!(tool = %call.name, error = ?result.error, "action failed, recovering");
            state.telemetry.event(
                "action_failed",
                serde_json::json!({ "step_id": step.id, "tool": call.name, "error": result.error }),
            );
            state.status = Status::Recovering;
            return;
        }
    }

    state.telemetry.event(
        "actions_completed",
        serde_json::json!({ "step_id": step.id, "action_count": call_count }),
    );
    state.status = Status::Verifying;
}

/// Check the step's success criteria and advance the plan.
pub async fn verify(state: &mut AgentState, verifier: &dyn Verifier) {
    let Some(step) = require_step(state, "verify") else {
        return;
    };
    if state.perception.is_none() {
        state.status = Status::Recovering;
        return;
    }
    if timed_out(state, "verify") {
        return;
    }
    let Some(executor) = require_executor(state, "verify") else {
        return;
    };

    let verdict = match verifier.verify(state, executor.registry()).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(error = %e, step_id = %step.id, "verifier failed");
            state.telemetry.event(
                "verify_error",
                serde_json::json!({ "step_id": step.id, "error": format!("{e:#}") }),
            );
            state.status = Status::Recovering;
            return;
        }
    };

    state.set_scratch(SCRATCH_VERIFY_DETAILS, verdict.details.clone());
    state.telemetry.event(
        "step_verified",
        serde_json::json!({ "step_id": step.id, "ok": verdict.ok, "details": verdict.details }),
    );

    if verdict.ok {
        let finished = state.plan.as_mut().map(Plan::advance).unwrap_or(true);
        if finished {
            state.set_terminal(Status::Done, "all plan steps completed", ErrorCode::Done);
            return;
        }
        info!(step_id = %step.id, "step verified, advancing");
        state.last_step_started_ms = Some(now_ms());
        state.status = Status::Perceiving;
        return;
    }

    state.status = Status::Recovering;
}

/// Spend one retry and run the recovery policy's remediation.
pub async fn recover(state: &mut AgentState, recovery: &dyn RecoveryPolicy) {
    let Some(step) = require_step(state, "recover") else {
        return;
    };

    if !state.retry.can_retry_step(&step.id, step.max_retries) {
        state.telemetry.event(
            "retry_exhausted",
            serde_json::json!({
                "step_id": step.id,
                "total_used": state.retry.used,
                "total_budget": state.retry.total_budget,
                "step_used": state.retry.step_retry_counts.get(&step.id).copied().unwrap_or(0),
                "step_max": step.max_retries,
            }),
        );
        state.set_terminal(
            Status::Failed,
            &format!("retry exhausted for step {}", step.id),
            ErrorCode::RetryExhausted,
        );
        return;
    }
    state.retry.consume(&step.id);
    state.telemetry.event(
        "recover_attempt",
        serde_json::json!({
            "step_id": step.id,
            "total_used": state.retry.used,
            "step_used": state.retry.step_retry_counts.get(&step.id).copied().unwrap_or(0),
        }),
    );

    let Some(executor) = require_executor(state, "recover") else {
        return;
    };

    let remediation = match recovery.recover(state, executor.registry()).await {
        Ok(remediation) => remediation,
        Err(e) => {
            warn!(error = %e, step_id = %step.id, "recovery policy failed");
            state.telemetry.event(
                "recover_error",
                serde_json::json!({ "step_id": step.id, "error": format!("{e:#}") }),
            );
            state.set_terminal(
                Status::Failed,
                &format!("recovery error: {e:#}"),
                ErrorCode::RecoveryError,
            );
            return;
        }
    };

    for call in remediation.calls {
        let started_ms = now_ms();
        let result = executor
            .call(&mut state.policy, &mut state.telemetry, &call)
            .await;
        let ended_ms = now_ms();
        record_action(state, &call, started_ms, ended_ms, &result, None);

        if !result.ok && result.is_policy_denied() {
            let error = result.error.unwrap_or_default();
            state.set_terminal(
                Status::Escalated,
                &format!("policy denied recovery tool: {error}"),
                ErrorCode::PolicyDeny,
            );
            return;
        }
    }

    if remediation.replan {
        state.set_scratch(SCRATCH_FORCE_REPLAN, serde_json::json!(true));
    }
    state.status = Status::Perceiving;
}

/// Report that the run is blocked on approval, polling the gate when
/// one is injected.
pub async fn waiting_approval(state: &mut AgentState, gate: Option<&dyn ApprovalGate>) {
    state.status = Status::WaitingApproval;
    if !state.approved {
        if let Some(gate) = gate {
            if gate.poll(state).await {
                info!(run_id = %state.run_id, "approval granted");
                state.approved = true;
            }
        }
    }
    state.telemetry.event(
        "waiting_approval",
        serde_json::json!({ "approved": state.approved }),
    );
}

/// Vacate the executor slot and emit the closing telemetry event.
pub async fn finalize(state: &mut AgentState) {
    state.executor = None;
    let plan_fingerprint = state
        .plan
        .as_ref()
        .and_then(|p| p.plan_fingerprint.clone());
    info!(
        run_id = %state.run_id,
        status = %state.status,
        actions = state.actions.len(),
        "run finalized"
    );
    state.telemetry.event(
        "finalize",
        serde_json::json!({
            "status": state.status,
            "done_reason": state.done_reason,
            "action_count": state.actions.len(),
            "plan_fingerprint": plan_fingerprint,
        }),
    );
}
