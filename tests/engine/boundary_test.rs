//! Boundary behaviors: payload-less captures, empty selections and a
//! zero retry budget.

use crate::support::*;

use armitage::engine::workflow::Workflow;
use armitage::state::{AgentState, RetryBudget};
use armitage::types::{ErrorCode, Status, ToolResult};

#[tokio::test]
async fn test_capture_without_hash_or_b64_recovers() {
    // Capture "succeeds" but returns neither payload form while the
    // b64 strategy is off: perception must recover, and with a budget
    // of one the run exhausts on the second recovery.
    let capture = FakeCaptureTool::with_payload(serde_json::json!({
        "hash": null,
        "b64": null,
    }));
    let remote = RecordingRemoteClient::new();

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan()),
        QueueSelector::new(vec![], vec![click_call("k1")]),
        ScriptedVerifier::new(vec![], true),
        ScriptedRecovery::none(),
        capture,
        remote.clone(),
    );
    let mut state = AgentState::new("run_nocap", "complete the task");
    state.retry = RetryBudget::with_total(1);

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Failed);
    assert_eq!(state.telemetry.error_code, Some(ErrorCode::RetryExhausted));
    assert!(state.telemetry.has_event("perceive_capture_failed"));
    assert!(state.perception.is_none(), "no snapshot was accepted");
    assert_eq!(remote.dispatches_of("mouse_server.click"), 0, "acting never reached");
}

#[tokio::test]
async fn test_empty_selection_recovers_without_records() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan()),
        QueueSelector::new(vec![], vec![]),
        ScriptedVerifier::new(vec![], true),
        ScriptedRecovery::none(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_noselect", "complete the task");
    state.retry = RetryBudget::with_total(1);

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Failed);
    assert_eq!(state.telemetry.error_code, Some(ErrorCode::RetryExhausted));
    assert!(state.telemetry.has_event("no_actions_selected"));
    assert!(state.actions.is_empty(), "no record for an empty selection");
}

#[tokio::test]
async fn test_zero_retry_budget_fails_on_first_recovery() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();
    remote.script("mouse_server.click", ToolResult::failure("transient"));

    let recovery = ScriptedRecovery::none();
    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan()),
        QueueSelector::new(vec![], vec![click_call("k1")]),
        ScriptedVerifier::new(vec![], true),
        recovery.clone(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_zerobudget", "complete the task");
    state.retry = RetryBudget::with_total(0);

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Failed);
    assert_eq!(state.telemetry.error_code, Some(ErrorCode::RetryExhausted));
    assert_eq!(recovery.calls(), 0, "the policy is never consulted");
    assert_eq!(state.retry.used, 0);
}
