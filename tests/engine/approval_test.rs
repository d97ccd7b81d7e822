//! Scenario: a HIGH-risk step blocks on the approval gate and proceeds
//! once approval is granted.

use crate::support::*;

use armitage::engine::workflow::Workflow;
use armitage::state::AgentState;
use armitage::types::{Risk, Status};

#[tokio::test]
async fn test_high_risk_step_waits_for_approval() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan_with_risk(Risk::High)),
        QueueSelector::new(vec![vec![click_call("k1")]], vec![]),
        ScriptedVerifier::new(vec![true], false),
        ScriptedRecovery::none(),
        capture,
        remote.clone(),
    )
    .with_approval_gate(CountdownGate::after(2));
    let mut state = AgentState::new("run_approval", "complete the task");

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Done);
    assert!(state.approved);
    assert!(state.telemetry.has_event("approval_required"));

    // The wait loop ran until the gate granted: first polls report
    // approved=false, the last one approved=true.
    let waits = state.telemetry.events_of("waiting_approval");
    assert!(waits.len() >= 2, "expected repeated wait iterations");
    assert_eq!(waits[0].fields["approved"], false);
    assert_eq!(
        waits.last().expect("last wait").fields["approved"],
        true
    );

    // The status trace visits the approval gate before any acting.
    let span_names: Vec<&str> = state.telemetry.spans.iter().map(|s| s.name.as_str()).collect();
    let first_wait = span_names
        .iter()
        .position(|n| *n == "waiting_approval")
        .expect("waiting span");
    let first_act = span_names
        .iter()
        .position(|n| *n == "act")
        .expect("act span");
    assert!(
        first_wait < first_act,
        "approval must precede acting: {span_names:?}"
    );

    // After approval, the click went through exactly once.
    assert_eq!(remote.dispatches_of("mouse_server.click"), 1);
    assert!(!state.requires_human_approval, "cleared once allowed");
}

#[tokio::test]
async fn test_pre_approved_high_risk_step_skips_the_gate() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan_with_risk(Risk::High)),
        QueueSelector::new(vec![vec![click_call("k1")]], vec![]),
        ScriptedVerifier::new(vec![true], false),
        ScriptedRecovery::none(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_preapproved", "complete the task");
    state.approved = true;

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Done);
    assert!(!state.telemetry.has_event("waiting_approval"));
}

#[tokio::test]
async fn test_approval_not_required_when_policy_disables_it() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan_with_risk(Risk::High)),
        QueueSelector::new(vec![vec![click_call("k1")]], vec![]),
        ScriptedVerifier::new(vec![true], false),
        ScriptedRecovery::none(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_nogate", "complete the task");
    // Custom policy with the approval requirement off. The non-empty
    // denylist keeps initialize from reinstalling defaults.
    state.policy.require_approval_for_high_risk = false;
    state.policy.tool_denylist = vec!["file_delete".to_owned()];

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Done);
    assert!(!state.telemetry.has_event("approval_required"));
}
