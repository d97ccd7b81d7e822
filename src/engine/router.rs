//! Pure routing: which node runs next, given the state.
//!
//! No side effects and no tool calls here. Every node sets a status on
//! success; the per-node routing functions read that status (plus the
//! `force_replan` scratch flag and the approval flag) and return the
//! next node key. Terminal statuses route to finalize from everywhere;
//! anything unexpected routes to recover as the safe default.

use crate::state::{AgentState, SCRATCH_FORCE_REPLAN};
use crate::types::Status;

/// Keys of the workflow graph's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey {
    /// Run setup.
    Initialize,
    /// Planner invocation.
    Plan,
    /// Perception snapshot.
    Perceive,
    /// Approval gate check.
    PolicyCheck,
    /// Tool call execution.
    Act,
    /// Success-criteria check.
    Verify,
    /// Remediation.
    Recover,
    /// Approval wait loop.
    WaitingApproval,
    /// Teardown and closing telemetry.
    Finalize,
    /// End marker; the driver stops here.
    End,
}

impl NodeKey {
    /// Stable node name for spans and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Plan => "plan",
            Self::Perceive => "perceive",
            Self::PolicyCheck => "policy_check",
            Self::Act => "act",
            Self::Verify => "verify",
            Self::Recover => "recover",
            Self::WaitingApproval => "waiting_approval",
            Self::Finalize => "finalize",
            Self::End => "end",
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn force_replan(state: &AgentState) -> bool {
    state.scratch_flag_or(SCRATCH_FORCE_REPLAN, false)
}

/// After initialize: always plan.
pub fn route_from_initialize(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    NodeKey::Plan
}

/// After plan: perceive on success, recover on anything unexpected.
pub fn route_from_plan(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    match state.status {
        Status::Perceiving => NodeKey::Perceive,
        _ => NodeKey::Recover,
    }
}

/// After perceive: policy check or recover.
pub fn route_from_perceive(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    match state.status {
        Status::PolicyCheck => NodeKey::PolicyCheck,
        Status::Recovering => NodeKey::Recover,
        _ => NodeKey::Recover,
    }
}

/// After policy check: the approval loop or acting.
pub fn route_from_policy_check(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    match state.status {
        Status::WaitingApproval => NodeKey::WaitingApproval,
        Status::Acting => NodeKey::Act,
        _ => NodeKey::Recover,
    }
}

/// While waiting: loop until the host grants approval, then re-check
/// policy (which clears the requirement flag on allow).
pub fn route_from_waiting_approval(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    if state.approved {
        return NodeKey::PolicyCheck;
    }
    NodeKey::WaitingApproval
}

/// After act: verify, or recover (optionally replanning).
pub fn route_from_act(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    match state.status {
        Status::Verifying => NodeKey::Verify,
        Status::Recovering if force_replan(state) => NodeKey::Plan,
        Status::Recovering => NodeKey::Recover,
        _ => NodeKey::Recover,
    }
}

/// After verify: next perception cycle, or recover (optionally
/// replanning).
pub fn route_from_verify(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    match state.status {
        Status::Perceiving => NodeKey::Perceive,
        Status::Recovering if force_replan(state) => NodeKey::Plan,
        Status::Recovering => NodeKey::Recover,
        _ => NodeKey::Recover,
    }
}

/// After recover: back to perception, or to the planner when the
/// recovery elected a replan.
pub fn route_from_recover(state: &AgentState) -> NodeKey {
    if state.status.is_terminal() {
        return NodeKey::Finalize;
    }
    if force_replan(state) {
        return NodeKey::Plan;
    }
    NodeKey::Perceive
}

/// Dispatch to the per-node routing function.
pub fn next_node(current: NodeKey, state: &AgentState) -> NodeKey {
    match current {
        NodeKey::Initialize => route_from_initialize(state),
        NodeKey::Plan => route_from_plan(state),
        NodeKey::Perceive => route_from_perceive(state),
        NodeKey::PolicyCheck => route_from_policy_check(state),
        NodeKey::Act => route_from_act(state),
        NodeKey::Verify => route_from_verify(state),
        NodeKey::Recover => route_from_recover(state),
        NodeKey::WaitingApproval => route_from_waiting_approval(state),
        NodeKey::Finalize | NodeKey::End => NodeKey::End,
    }
}
