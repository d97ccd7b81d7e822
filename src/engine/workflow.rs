//! Graph assembly and the run driver.
//!
//! The workflow owns the injected collaborators, installs a fresh
//! executor into the state's executor slot at run start, and drives
//! node → route → node until finalize. There is no process-wide mutable
//! state: everything a run touches arrives through [`RuntimeDeps`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::nodes::{
    self, ActionSelector, ApprovalGate, PerceiveOptions, Planner, RecoveryPolicy, Verifier,
};
use super::router::{self, NodeKey};
use crate::config::CoreConfig;
use crate::state::AgentState;
use crate::tools::executor::ToolExecutor;
use crate::tools::registry::ToolRegistry;
use crate::tools::RemoteToolClient;
use crate::types::{ErrorCode, Status};

/// Everything a run needs, injected once.
#[derive(Clone)]
pub struct RuntimeDeps {
    /// Produces plans.
    pub planner: Arc<dyn Planner>,
    /// Chooses tool calls per step.
    pub selector: Arc<dyn ActionSelector>,
    /// Checks success criteria.
    pub verifier: Arc<dyn Verifier>,
    /// Chooses remediation after failures.
    pub recovery: Arc<dyn RecoveryPolicy>,
    /// Alias routing shared by every run.
    pub registry: Arc<ToolRegistry>,
    /// Remote tool transport, when configured.
    pub remote_client: Option<Arc<dyn RemoteToolClient>>,
    /// Approval decision source polled while waiting.
    pub approval_gate: Option<Arc<dyn ApprovalGate>>,
    /// Runtime options.
    pub config: CoreConfig,
}

impl RuntimeDeps {
    /// Bundle the four collaborators with the default registry, no
    /// remote client, no approval gate and default options.
    pub fn new(
        planner: Arc<dyn Planner>,
        selector: Arc<dyn ActionSelector>,
        verifier: Arc<dyn Verifier>,
        recovery: Arc<dyn RecoveryPolicy>,
    ) -> Self {
        Self {
            planner,
            selector,
            verifier,
            recovery,
            registry: Arc::new(ToolRegistry::with_defaults()),
            remote_client: None,
            approval_gate: None,
            config: CoreConfig::default(),
        }
    }

    /// Replace the tool registry.
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Configure the remote tool client.
    pub fn with_remote_client(mut self, client: Arc<dyn RemoteToolClient>) -> Self {
        self.remote_client = Some(client);
        self
    }

    /// Configure the approval gate.
    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval_gate = Some(gate);
        self
    }

    /// Replace the runtime options.
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }
}

/// The compiled workflow: deps plus the drive loop.
pub struct Workflow {
    deps: RuntimeDeps,
}

impl Workflow {
    /// Build a workflow over the given dependencies.
    pub fn new(deps: RuntimeDeps) -> Self {
        Self { deps }
    }

    /// Fresh state for a run, with the configured retry budget applied.
    ///
    /// The run id is assigned by the initialize node. Hosts that build
    /// an [`AgentState`] themselves keep full control of the budget.
    pub fn new_state(&self, goal: impl Into<String>) -> AgentState {
        let mut state = AgentState::new("", goal);
        state.retry.total_budget = self.deps.config.retry.total_budget;
        state
    }

    /// Drive a run to a terminal status.
    ///
    /// Installs a per-run executor (preserving one already present so
    /// a host can resume a checkpointed run), executes nodes, routes by
    /// status, and stops after finalize. The transition guard converts
    /// runaway loops into `FAILED`/`STEP_LIMIT`; the approval loop
    /// yields to the scheduler between iterations so a host task can
    /// flip the approval flag.
    pub async fn run(&self, state: &mut AgentState) -> Status {
        self.install_executor(state);

        let mut node = NodeKey::Initialize;
        let mut transitions: u64 = 0;
        loop {
            self.execute(node, state).await;
            if matches!(node, NodeKey::Finalize) {
                break;
            }

            transitions = transitions.saturating_add(1);
            if transitions > self.deps.config.run.max_transitions && !state.status.is_terminal() {
                warn!(
                    transitions,
                    limit = self.deps.config.run.max_transitions,
                    "transition limit exceeded"
                );
                state.set_terminal(
                    Status::Failed,
                    "workflow transition limit exceeded",
                    ErrorCode::StepLimit,
                );
            }

            let next = router::next_node(node, state);
            debug!(from = %node, to = %next, status = %state.status, "transition");
            if matches!(node, NodeKey::WaitingApproval) && matches!(next, NodeKey::WaitingApproval)
            {
                tokio::task::yield_now().await;
            }
            node = next;
        }

        state.status
    }

    fn install_executor(&self, state: &mut AgentState) {
        if state.executor.is_none() {
            state.executor = Some(Arc::new(ToolExecutor::new(
                Arc::clone(&self.deps.registry),
                self.deps.remote_client.clone(),
            )));
        }
    }

    fn perceive_options(&self) -> PerceiveOptions {
        PerceiveOptions {
            store_screenshot_b64: self.deps.config.perception.store_screenshot_b64,
            prefer_uia_tree: self.deps.config.perception.prefer_uia_tree,
            vision_parse: self.deps.config.perception.vision_parse,
        }
    }

    async fn execute(&self, node: NodeKey, state: &mut AgentState) {
        let span = state.telemetry.span_start(node.as_str());
        match node {
            NodeKey::Initialize => nodes::initialize(state).await,
            NodeKey::Plan => nodes::plan(state, self.deps.planner.as_ref()).await,
            NodeKey::Perceive => nodes::perceive(state, &self.perceive_options()).await,
            NodeKey::PolicyCheck => nodes::policy_check(state).await,
            NodeKey::Act => {
                nodes::act(
                    state,
                    self.deps.selector.as_ref(),
                    self.deps.config.action.post_action_capture,
                )
                .await;
            }
            NodeKey::Verify => nodes::verify(state, self.deps.verifier.as_ref()).await,
            NodeKey::Recover => nodes::recover(state, self.deps.recovery.as_ref()).await,
            NodeKey::WaitingApproval => {
                nodes::waiting_approval(state, self.deps.approval_gate.as_deref()).await;
            }
            NodeKey::Finalize => nodes::finalize(state).await,
            NodeKey::End => {}
        }
        state.telemetry.span_close(span);
    }
}
