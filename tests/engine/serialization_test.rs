//! Round-trip laws: a finalized state serializes and deserializes to an
//! equal value, and fingerprints are stable across the trip.

use crate::support::*;

use armitage::engine::workflow::Workflow;
use armitage::state::AgentState;
use armitage::types::Status;

#[tokio::test]
async fn test_finalized_state_round_trips() {
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
    let mut state = AgentState::new("run_serde", "complete the task");

    let status = Workflow::new(deps).run(&mut state).await;
    assert_eq!(status, Status::Done);
    assert!(state.executor.is_none(), "slot vacated before checkpointing");

    let json = serde_json::to_string(&state).expect("serialize finalized state");
    let restored: AgentState = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(
        serde_json::to_value(&restored).expect("value"),
        serde_json::to_value(&state).expect("value"),
        "serialize/deserialize must be value-equal"
    );

    // The stable identifiers survive the trip byte-for-byte.
    assert_eq!(
        restored.plan.as_ref().expect("plan").plan_fingerprint,
        state.plan.as_ref().expect("plan").plan_fingerprint
    );
    assert_eq!(restored.actions.len(), state.actions.len());
    assert_eq!(
        restored.actions[0].idempotency_key,
        state.actions[0].idempotency_key
    );
    assert_eq!(
        restored.actions[0].effect_fingerprint,
        state.actions[0].effect_fingerprint
    );
}

#[tokio::test]
async fn test_action_log_is_ordered_and_unique() {
    let capture = FakeCaptureTool::standard();
    let remote = RecordingRemoteClient::new();
    remote.script(
        "mouse_server.click",
        armitage::types::ToolResult::failure("transient"),
    );

    let deps = scenario_deps(
        ScriptedPlanner::new(single_step_plan()),
        QueueSelector::new(
            vec![vec![click_call("k1")], vec![click_call("k2")]],
            vec![],
        ),
        ScriptedVerifier::new(vec![true], false),
        ScriptedRecovery::new(armitage::engine::nodes::Remediation::with_calls(vec![
            wait_call("kw"),
        ])),
        capture,
        remote,
    );
    let mut state = AgentState::new("run_audit", "complete the task");

    Workflow::new(deps).run(&mut state).await;

    // Strict append order: start timestamps never regress.
    let starts: Vec<i64> = state.actions.iter().map(|a| a.started_ms).collect();
    assert!(starts.windows(2).all(|w| w[0] <= w[1]), "{starts:?}");

    // Every record has its own id.
    let mut ids: Vec<&str> = state.actions.iter().map(|a| a.action_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), state.actions.len());
}
