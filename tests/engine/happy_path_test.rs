//! Scenario: a single LOW-risk step succeeds on the first cycle.

use crate::support::*;

use armitage::engine::workflow::Workflow;
use armitage::state::AgentState;
use armitage::tools::ToolAlias;
use armitage::types::{ErrorCode, Status};

#[tokio::test]
async fn test_happy_single_step() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();
    let planner = ScriptedPlanner::new(single_step_plan());
    let selector = QueueSelector::new(vec![vec![click_call("k1")]], vec![]);
    let verifier = ScriptedVerifier::new(vec![true], false);
    let recovery = ScriptedRecovery::none();

    let deps = scenario_deps(
        planner.clone(),
        selector,
        verifier,
        recovery.clone(),
        capture,
        remote.clone(),
    );
    let workflow = Workflow::new(deps);
    let mut state = AgentState::new("run_happy", "complete the task");

    let status = workflow.run(&mut state).await;

    assert_eq!(status, Status::Done);
    assert_eq!(state.done_reason.as_deref(), Some("all plan steps completed"));
    assert_eq!(state.telemetry.error_code, Some(ErrorCode::Done));
    assert_eq!(planner.calls(), 1);
    assert_eq!(recovery.calls(), 0);

    // Exactly one action: the click, executed remotely, with the
    // post-capture hash as its effect fingerprint.
    assert_eq!(state.actions.len(), 1);
    let action = &state.actions[0];
    assert_eq!(action.tool, ToolAlias::Click);
    assert_eq!(action.ok, Some(true));
    assert_eq!(action.idempotency_key, "k1");
    assert_eq!(action.effect_fingerprint.as_deref(), Some(CAPTURE_HASH));
    assert!(action.ended_ms.expect("ended") >= action.started_ms);

    assert_eq!(remote.dispatches_of("mouse_server.click"), 1);

    // The verified step advanced the cursor past the last step.
    assert_eq!(state.plan.as_ref().expect("plan").current_step_idx, 1);

    // Closing bookkeeping: executor vacated, closing event emitted.
    assert!(state.executor.is_none());
    assert!(state.telemetry.has_event("finalize"));
    assert!(state.telemetry.has_event("plan_created"));
}

#[tokio::test]
async fn test_happy_path_telemetry_timestamps_non_decreasing() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();
    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan()),
        QueueSelector::new(vec![vec![click_call("k1")]], vec![]),
        ScriptedVerifier::new(vec![true], false),
        ScriptedRecovery::none(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_ts", "complete the task");

    Workflow::new(deps).run(&mut state).await;

    let stamps: Vec<i64> = state.telemetry.events.iter().map(|e| e.ts_ms).collect();
    assert!(
        stamps.windows(2).all(|w| w[0] <= w[1]),
        "telemetry timestamps must be non-decreasing"
    );
    assert!(!state.telemetry.spans.is_empty());
    for span in &state.telemetry.spans {
        assert!(span.end_ms.expect("closed span") >= span.start_ms, "{}", span.name);
    }
}

#[tokio::test]
async fn test_multi_step_plan_advances_once_per_verify() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();
    let mut plan = single_step_plan();
    plan.steps.push(armitage::state::PlanStep::new(
        "s2",
        "Do the next thing",
        "perform the second step",
    ));

    let deps = scenario_deps(
        ScriptedPlanner::new(plan),
        QueueSelector::new(
            vec![vec![click_call("s1-k")], vec![click_call("s2-k")]],
            vec![],
        ),
        ScriptedVerifier::new(vec![true, true], false),
        ScriptedRecovery::none(),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_multi", "complete the task");

    let status = Workflow::new(deps).run(&mut state).await;

    assert_eq!(status, Status::Done);
    assert_eq!(state.actions.len(), 2);
    assert_eq!(state.plan.as_ref().expect("plan").current_step_idx, 2);
    assert_eq!(state.telemetry.events_of("step_verified").len(), 2);
}
