//! Shared mocks for engine integration tests: scripted collaborators, a
//! deterministic capture tool and a recording remote client.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use armitage::config::CoreConfig;
use armitage::engine::nodes::{
    ActionSelector, ApprovalGate, Planner, RecoveryPolicy, Remediation, Verdict, Verifier,
};
use armitage::engine::workflow::RuntimeDeps;
use armitage::state::{AgentState, Plan, PlanStep};
use armitage::tools::local::WaitTool;
use armitage::tools::registry::{RemoteToolMap, ToolRegistry};
use armitage::tools::{LocalTool, RemoteToolClient, ToolAlias};
use armitage::types::{Risk, ToolCall, ToolResult};

/// Hash reported by the fake capture tool.
pub const CAPTURE_HASH: &str = "h_cap";

// ── Capture ──

/// Local capture stand-in returning a fixed payload.
pub struct FakeCaptureTool {
    payload: serde_json::Value,
    calls: AtomicU32,
}

impl FakeCaptureTool {
    pub fn standard() -> Arc<Self> {
        Self::with_payload(serde_json::json!({
            "hash": CAPTURE_HASH,
            "focused_window": "Test Window",
        }))
    }

    pub fn with_payload(payload: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            payload,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTool for FakeCaptureTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::ScreenCapture
    }

    async fn invoke(&self, _args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::success(self.payload.clone()))
    }
}

// ── Collaborators ──

/// Planner returning a fixed plan on every invocation.
pub struct ScriptedPlanner {
    plan: Plan,
    calls: AtomicU32,
}

impl ScriptedPlanner {
    pub fn new(plan: Plan) -> Arc<Self> {
        Arc::new(Self {
            plan,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _state: &AgentState) -> anyhow::Result<Plan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.clone())
    }
}

/// Selector popping scripted call batches, falling back to a default.
pub struct QueueSelector {
    queue: Mutex<VecDeque<Vec<ToolCall>>>,
    default_calls: Vec<ToolCall>,
}

impl QueueSelector {
    pub fn new(batches: Vec<Vec<ToolCall>>, default_calls: Vec<ToolCall>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(batches.into_iter().collect()),
            default_calls,
        })
    }
}

#[async_trait]
impl ActionSelector for QueueSelector {
    async fn select(
        &self,
        _state: &AgentState,
        _tools: &ToolRegistry,
    ) -> anyhow::Result<Vec<ToolCall>> {
        let mut queue = self.queue.lock().expect("test lock");
        Ok(queue.pop_front().unwrap_or_else(|| self.default_calls.clone()))
    }
}

/// Verifier popping scripted verdicts, falling back to a default.
pub struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<bool>>,
    default_ok: bool,
}

impl ScriptedVerifier {
    pub fn new(verdicts: Vec<bool>, default_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            default_ok,
        })
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, _state: &AgentState, _tools: &ToolRegistry) -> anyhow::Result<Verdict> {
        let ok = self
            .verdicts
            .lock()
            .expect("test lock")
            .pop_front()
            .unwrap_or(self.default_ok);
        Ok(Verdict {
            ok,
            details: serde_json::json!({ "criteria_met": ok }),
        })
    }
}

/// Recovery policy returning a fixed remediation.
pub struct ScriptedRecovery {
    remediation: Remediation,
    calls: AtomicU32,
}

impl ScriptedRecovery {
    pub fn none() -> Arc<Self> {
        Self::new(Remediation::none())
    }

    pub fn new(remediation: Remediation) -> Arc<Self> {
        Arc::new(Self {
            remediation,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecoveryPolicy for ScriptedRecovery {
    async fn recover(
        &self,
        _state: &AgentState,
        _tools: &ToolRegistry,
    ) -> anyhow::Result<Remediation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remediation.clone())
    }
}

/// Gate granting approval after a fixed number of polls.
pub struct CountdownGate {
    remaining: Mutex<u32>,
}

impl CountdownGate {
    pub fn after(polls: u32) -> Arc<Self> {
        Arc::new(Self {
            remaining: Mutex::new(polls),
        })
    }
}

#[async_trait]
impl ApprovalGate for CountdownGate {
    async fn poll(&self, _state: &AgentState) -> bool {
        let mut remaining = self.remaining.lock().expect("test lock");
        if *remaining == 0 {
            return true;
        }
        *remaining = remaining.saturating_sub(1);
        false
    }
}

// ── Remote client ──

/// Remote client with per-tool scripted results and a call log.
pub struct RecordingRemoteClient {
    scripted: Mutex<HashMap<String, VecDeque<ToolResult>>>,
    calls: Mutex<Vec<(String, serde_json::Value, i64)>>,
}

impl RecordingRemoteClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queue a result for a fully-qualified tool name. Unscripted calls
    /// succeed with a generic payload.
    pub fn script(&self, tool_name: &str, result: ToolResult) {
        self.scripted
            .lock()
            .expect("test lock")
            .entry(tool_name.to_owned())
            .or_default()
            .push_back(result);
    }

    /// Every dispatched call, in order.
    pub fn calls(&self) -> Vec<(String, serde_json::Value, i64)> {
        self.calls.lock().expect("test lock").clone()
    }

    /// Number of dispatches for a fully-qualified tool name.
    pub fn dispatches_of(&self, tool_name: &str) -> usize {
        self.calls
            .lock()
            .expect("test lock")
            .iter()
            .filter(|(name, _, _)| name == tool_name)
            .count()
    }
}

#[async_trait]
impl RemoteToolClient for RecordingRemoteClient {
    async fn call(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        timeout_ms: i64,
    ) -> anyhow::Result<ToolResult> {
        self.calls
            .lock()
            .expect("test lock")
            .push((tool_name.to_owned(), args.clone(), timeout_ms));
        let scripted = self
            .scripted
            .lock()
            .expect("test lock")
            .get_mut(tool_name)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| ToolResult::success(serde_json::json!({ "done": true }))))
    }
}

// ── Assembly helpers ──

/// One LOW-risk step named `s1`.
pub fn single_step_plan() -> Plan {
    Plan::new(
        "complete the task",
        vec![PlanStep::new("s1", "Do the thing", "perform the single step")],
    )
}

/// One step named `s1` at the given risk.
pub fn single_step_plan_with_risk(risk: Risk) -> Plan {
    Plan::new(
        "complete the task",
        vec![PlanStep::new("s1", "Do the thing", "perform the single step").with_risk(risk)],
    )
}

/// Registry for scenarios: local fake capture + wait, remote domain
/// split for everything else.
pub fn scenario_registry(capture: Arc<FakeCaptureTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(RemoteToolMap::default_profile());
    registry.register_local(capture);
    registry.register_local(Arc::new(WaitTool));
    Arc::new(registry)
}

/// Config keeping scenarios tight: no UIA pass, no vision parse.
pub fn scenario_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.perception.prefer_uia_tree = false;
    config.perception.vision_parse = false;
    config
}

/// Deps bundle for scenario tests.
pub fn scenario_deps(
    planner: Arc<ScriptedPlanner>,
    selector: Arc<QueueSelector>,
    verifier: Arc<ScriptedVerifier>,
    recovery: Arc<ScriptedRecovery>,
    capture: Arc<FakeCaptureTool>,
    remote: Arc<RecordingRemoteClient>,
) -> RuntimeDeps {
    RuntimeDeps::new(planner, selector, verifier, recovery)
        .with_registry(scenario_registry(capture))
        .with_remote_client(remote)
        .with_config(scenario_config())
}

/// A click call with a literal key, as a selector would emit.
pub fn click_call(key: &str) -> ToolCall {
    ToolCall::new(ToolAlias::Click, serde_json::json!({"x": 10, "y": 20}), key)
}

/// A wait call for remediation.
pub fn wait_call(key: &str) -> ToolCall {
    ToolCall::new(ToolAlias::Wait, serde_json::json!({"ms": 1}), key)
}
