//! Integration tests for suspension and resume across connections.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tollgate_core::{ApprovalScope, CallId, ThreadId};
use tollgate_runtime::{HumanDecision, ThreadState};
use tollgate_stream::{ApprovalResponse, ConnectionOutcome, ErrorCode, StartTurn, StreamEvent};
use tollgate_test::{RecordingSink, ScriptedCall, ScriptedEngine, Step, TestHarness, init_test_tracing};

use common::{pending_approval, tool_status};

fn post(id: &str) -> ScriptedCall {
    ScriptedCall::http(id, "POST", "/banks/x/accounts")
}

#[tokio::test]
async fn test_batch_of_three_asks_once_for_two() {
    init_test_tracing();
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![
            ScriptedCall::http("call_1", "GET", "/banks/x"),
            post("call_2"),
            ScriptedCall::http("call_3", "PUT", "/banks/x/accounts/1"),
        ])])
        .with_resume(vec![Step::say("All done")]);
    let h = TestHarness::new(engine);
    let thread = ThreadId::from("t-batch");

    let sink = RecordingSink::new();
    let report = h
        .service
        .start_turn(StartTurn::new("do three things").on_thread(thread.clone()), &sink)
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Suspended);

    let types = sink.types();
    assert_eq!(types.iter().filter(|t| **t == "batch_approval_request").count(), 1);
    assert!(!types.contains(&"approval_request"));
    assert!(!types.contains(&"tool_start"));
    let (_, awaiting) = pending_approval(&sink);
    assert_eq!(awaiting, vec![CallId::from("call_2"), CallId::from("call_3")]);

    // Answer only call_2; the unanswered call is denied.
    let resumed = RecordingSink::new();
    let response = ApprovalResponse::batch(
        thread.clone(),
        HashMap::from([(CallId::from("call_2"), HumanDecision::approve(ApprovalScope::Once))]),
    );
    let report = h.service.respond(response, &resumed).await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);

    assert_eq!(h.engine.executed(), vec![CallId::from("call_1"), CallId::from("call_2")]);
    assert_eq!(h.engine.denied(), vec![CallId::from("call_3")]);
    assert_eq!(tool_status(&resumed, "call_3").as_deref(), Some("error"));
    assert_eq!(resumed.stream_ends(), 1);
}

#[tokio::test]
async fn test_resume_is_idempotent() {
    init_test_tracing();
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![post("call_1")])])
        .with_resume(vec![Step::say("Created")]);
    let h = TestHarness::new(engine);
    let thread = ThreadId::from("t-replay");
    h.service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    let response = ApprovalResponse::single(
        thread.clone(),
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Once),
    );
    let first = RecordingSink::new();
    assert_eq!(
        h.service.respond(response.clone(), &first).await.outcome,
        ConnectionOutcome::Completed
    );
    let runs = h.engine.runs();

    let again = RecordingSink::new();
    let report = h.service.respond(response, &again).await;
    assert_eq!(report.outcome, ConnectionOutcome::Replayed);
    assert_eq!(again.types(), vec!["thread_sync", "stream_end"]);
    assert_eq!(h.engine.runs(), runs);
    assert_eq!(h.engine.executed(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_concurrent_responses_run_once() {
    init_test_tracing();
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![post("call_1")])])
        .with_resume(vec![Step::say("Created it")]);
    let h = TestHarness::new(engine);
    let thread = ThreadId::from("t-race");
    h.service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    let response = ApprovalResponse::single(
        thread,
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Once),
    );
    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = Arc::clone(&h.service);
        let response = response.clone();
        handles.push(tokio::spawn(async move {
            service.respond(response, &RecordingSink::new()).await.outcome
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert!(outcomes.contains(&ConnectionOutcome::Completed));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == ConnectionOutcome::Completed)
            .count(),
        1
    );
    assert_eq!(h.engine.executed(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_late_answer_denies_everything() {
    init_test_tracing();
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![post("call_1")])])
        .with_resume(vec![Step::say("Too late")]);
    let h = TestHarness::builder(engine)
        .wait_timeout(Duration::from_millis(5))
        .build();
    let thread = ThreadId::from("t-late");

    let sink = RecordingSink::new();
    h.service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &sink)
        .await;
    let request = sink
        .events()
        .into_iter()
        .find(|e| e.event_type() == "approval_request")
        .unwrap();
    assert!(matches!(request, StreamEvent::ApprovalRequest { deadline: Some(_), .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let resumed = RecordingSink::new();
    let response = ApprovalResponse::single(
        thread,
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Session),
    );
    let report = h.service.respond(response, &resumed).await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);

    let events = resumed.events();
    assert_eq!(events[0].event_type(), "thread_sync");
    assert!(matches!(
        &events[1],
        StreamEvent::Error { error_code: ErrorCode::ApprovalError, .. }
    ));
    assert!(h.engine.executed().is_empty());
    assert_eq!(h.engine.denied(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_unknown_call_is_rejected() {
    init_test_tracing();
    let engine = ScriptedEngine::new().with_turn(vec![Step::CallTools(vec![post("call_1")])]);
    let h = TestHarness::new(engine);
    let thread = ThreadId::from("t-unknown");
    h.service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    let sink = RecordingSink::new();
    let response = ApprovalResponse::single(
        thread.clone(),
        CallId::from("call_404"),
        HumanDecision::approve(ApprovalScope::Once),
    );
    let report = h.service.respond(response, &sink).await;

    assert_eq!(report.outcome, ConnectionOutcome::Rejected);
    assert_eq!(sink.types(), vec!["thread_sync", "error", "stream_end"]);

    // Still suspended on the real call.
    let stored = h.service.coordinator().thread(&thread).await.unwrap().unwrap();
    assert_eq!(stored.state, ThreadState::AwaitingApproval);
    assert_eq!(stored.open_calls(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_new_message_abandons_pending_approval() {
    init_test_tracing();
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![post("call_1")])])
        .with_turn(vec![Step::say("Never mind then")]);
    let h = TestHarness::new(engine);
    let thread = ThreadId::from("t-abandon");
    h.service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    let sink = RecordingSink::new();
    let report = h
        .service
        .start_turn(StartTurn::new("actually, don't").on_thread(thread.clone()), &sink)
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);

    // The abandoned call is closed before the new turn's output.
    assert_eq!(
        sink.types()[..3],
        ["thread_sync", "error", "tool_complete"]
    );
    assert_eq!(tool_status(&sink, "call_1").as_deref(), Some("error"));

    // A late answer to the abandoned request is refused.
    let late = RecordingSink::new();
    let response = ApprovalResponse::single(
        thread.clone(),
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Once),
    );
    assert_eq!(
        h.service.respond(response, &late).await.outcome,
        ConnectionOutcome::Rejected
    );
    assert!(h.engine.executed().is_empty());

    let stored = h.service.coordinator().thread(&thread).await.unwrap().unwrap();
    assert!(stored.orphaned_calls().is_empty());
    assert_eq!(stored.state, ThreadState::Done);
}

#[tokio::test]
async fn test_suspension_survives_restart() {
    init_test_tracing();
    let before = TestHarness::new(
        ScriptedEngine::new().with_turn(vec![Step::CallTools(vec![post("call_1")])]),
    );
    let thread = ThreadId::from("t-restart");
    before
        .service
        .start_turn(StartTurn::new("create").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    // A new process over the same store picks the suspension up.
    let engine = ScriptedEngine::new().with_resume(vec![Step::say("Created after restart")]);
    let after = TestHarness::builder(engine).kv(Arc::clone(&before.kv)).build();
    let sink = RecordingSink::new();
    let response = ApprovalResponse::single(
        thread,
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Once),
    );
    let report = after.service.respond(response, &sink).await;

    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert_eq!(after.engine.executed(), vec![CallId::from("call_1")]);
    assert_eq!(tool_status(&sink, "call_1").as_deref(), Some("success"));
}
