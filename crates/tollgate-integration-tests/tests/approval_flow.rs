//! Integration tests for policy decisions as seen on the wire.
//!
//! Safe reads run without asking, `DELETE` is refused outright, and a
//! session-scoped approval auto-approves later identical calls on the same
//! thread.

mod common;

use tollgate_core::{ApprovalScope, CallId, Operation, Principal, ThreadId};
use tollgate_runtime::{HumanDecision, ThreadState};
use tollgate_stream::{ApprovalResponse, ConnectionOutcome, ErrorCode, StartTurn, StreamEvent};
use tollgate_test::{RecordingSink, ScriptedCall, ScriptedEngine, Step, TestHarness, init_test_tracing};

use common::{pending_approval, tool_status};

fn harness(engine: ScriptedEngine) -> TestHarness {
    init_test_tracing();
    TestHarness::new(engine)
}

#[tokio::test]
async fn test_safe_get_runs_without_approval() {
    let engine = ScriptedEngine::new().with_turn(vec![
        Step::CallTools(vec![ScriptedCall::http("call_1", "GET", "/banks")]),
        Step::say("Here are the banks"),
    ]);
    let h = harness(engine);
    let sink = RecordingSink::new();

    let report = h
        .service
        .start_turn(StartTurn::new("list banks"), &sink)
        .await;

    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert_eq!(
        sink.types(),
        vec![
            "thread_sync",
            "assistant_start",
            "assistant_complete",
            "tool_start",
            "tool_complete",
            "assistant_start",
            "assistant_token",
            "assistant_token",
            "assistant_token",
            "assistant_token",
            "assistant_complete",
            "stream_end",
        ]
    );
    assert_eq!(tool_status(&sink, "call_1").as_deref(), Some("success"));
    assert_eq!(h.engine.executed(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_delete_is_denied_without_asking() {
    let engine = ScriptedEngine::new().with_turn(vec![
        Step::CallTools(vec![ScriptedCall::http("call_1", "DELETE", "/banks/gh.29.uk/accounts/1")]),
        Step::say("I could not delete it"),
    ]);
    let h = harness(engine);
    let sink = RecordingSink::new();

    let report = h.service.start_turn(StartTurn::new("delete it"), &sink).await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);

    let types = sink.types();
    assert!(!types.contains(&"approval_request"));
    assert_eq!(
        sink.for_call("call_1")
            .iter()
            .map(StreamEvent::event_type)
            .collect::<Vec<_>>(),
        vec!["tool_start", "error", "tool_complete"]
    );
    let error = sink
        .for_call("call_1")
        .into_iter()
        .find(|e| e.event_type() == "error")
        .unwrap();
    assert!(matches!(error, StreamEvent::Error { error_code: ErrorCode::ToolError, .. }));

    assert!(h.engine.executed().is_empty());
    assert_eq!(h.engine.denied(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_always_deny_beats_stored_grant() {
    let engine = ScriptedEngine::new().with_turn(vec![Step::CallTools(vec![ScriptedCall::http(
        "call_1",
        "DELETE",
        "/banks/x",
    )])]);
    let h = harness(engine);
    let thread = ThreadId::from("t-stale");
    let principal = Principal::anonymous(thread.clone());

    h.service
        .coordinator()
        .decision_engine()
        .record(
            "obp_requests",
            &Operation::new("DELETE", "/banks/x"),
            ApprovalScope::Session,
            true,
            &principal,
        )
        .await
        .unwrap();

    let sink = RecordingSink::new();
    h.service
        .start_turn(StartTurn::new("delete").on_thread(thread), &sink)
        .await;
    assert_eq!(tool_status(&sink, "call_1").as_deref(), Some("error"));
    assert!(h.engine.executed().is_empty());
}

#[tokio::test]
async fn test_session_approval_covers_later_identical_call() {
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![ScriptedCall::http(
            "call_1",
            "POST",
            "/banks/gh.29.uk/accounts",
        )])])
        .with_resume(vec![Step::say("Account created")])
        .with_turn(vec![
            Step::CallTools(vec![ScriptedCall::http("call_2", "POST", "/banks/gh.29.uk/accounts")]),
            Step::say("Another one created"),
        ]);
    let h = harness(engine);
    let thread = ThreadId::from("t-session");

    // Turn 1 suspends on the POST.
    let first = RecordingSink::new();
    let report = h
        .service
        .start_turn(StartTurn::new("create an account").on_thread(thread.clone()), &first)
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Suspended);
    assert_eq!(first.types().last(), Some(&"stream_end"));
    assert_eq!(first.stream_ends(), 1);
    let (_, awaiting) = pending_approval(&first);
    assert_eq!(awaiting, vec![CallId::from("call_1")]);
    assert!(h.engine.executed().is_empty());

    let stored = h.service.coordinator().thread(&thread).await.unwrap().unwrap();
    assert_eq!(stored.state, ThreadState::AwaitingApproval);

    // The human approves for the session.
    let resumed = RecordingSink::new();
    let response = ApprovalResponse::single(
        thread.clone(),
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::Session),
    );
    let report = h.service.respond(response, &resumed).await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert_eq!(resumed.types()[0], "thread_sync");
    assert_eq!(tool_status(&resumed, "call_1").as_deref(), Some("success"));
    assert_eq!(h.engine.executed(), vec![CallId::from("call_1")]);

    // The same operation later in the session runs without asking.
    let second = RecordingSink::new();
    let report = h
        .service
        .start_turn(StartTurn::new("one more").on_thread(thread.clone()), &second)
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert!(!second.types().contains(&"approval_request"));
    assert_eq!(tool_status(&second, "call_2").as_deref(), Some("success"));
    assert_eq!(
        h.engine.executed(),
        vec![CallId::from("call_1"), CallId::from("call_2")]
    );

    let stored = h.service.coordinator().thread(&thread).await.unwrap().unwrap();
    assert_eq!(stored.state, ThreadState::Done);
}

#[tokio::test]
async fn test_rejected_call_is_reported_and_not_executed() {
    let engine = ScriptedEngine::new()
        .with_turn(vec![Step::CallTools(vec![ScriptedCall::http(
            "call_1",
            "PUT",
            "/banks/x/accounts/1",
        )])])
        .with_resume(vec![Step::say("Okay, I left it alone")]);
    let h = harness(engine);
    let thread = ThreadId::from("t-reject");

    h.service
        .start_turn(StartTurn::new("update").on_thread(thread.clone()), &RecordingSink::new())
        .await;

    let sink = RecordingSink::new();
    let response = ApprovalResponse::single(thread, CallId::from("call_1"), HumanDecision::reject());
    let report = h.service.respond(response, &sink).await;

    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert_eq!(tool_status(&sink, "call_1").as_deref(), Some("error"));
    assert!(h.engine.executed().is_empty());
    assert_eq!(h.engine.denied(), vec![CallId::from("call_1")]);
}

#[tokio::test]
async fn test_user_scope_follows_the_user_across_threads() {
    let post = || Step::CallTools(vec![ScriptedCall::http("call_1", "POST", "/banks/x/accounts")]);
    let engine = ScriptedEngine::new()
        .with_turn(vec![post()])
        .with_resume(Vec::new())
        .with_turn(vec![post()])
        .with_turn(vec![post()]);
    let h = harness(engine);

    let first = ThreadId::from("t-alice-1");
    h.service
        .start_turn(
            StartTurn::new("create").on_thread(first.clone()).for_user("alice"),
            &RecordingSink::new(),
        )
        .await;
    let response = ApprovalResponse::single(
        first,
        CallId::from("call_1"),
        HumanDecision::approve(ApprovalScope::User),
    )
    .for_user("alice");
    h.service.respond(response, &RecordingSink::new()).await;

    // Alice on a new thread is not asked again.
    let alice = RecordingSink::new();
    let report = h
        .service
        .start_turn(
            StartTurn::new("create").on_thread(ThreadId::from("t-alice-2")).for_user("alice"),
            &alice,
        )
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Completed);
    assert!(!alice.types().contains(&"approval_request"));

    // Somebody else is.
    let bob = RecordingSink::new();
    let report = h
        .service
        .start_turn(
            StartTurn::new("create").on_thread(ThreadId::from("t-bob")).for_user("bob"),
            &bob,
        )
        .await;
    assert_eq!(report.outcome, ConnectionOutcome::Suspended);
    assert!(bob.types().contains(&"approval_request"));
}

#[tokio::test]
async fn test_approval_request_carries_context() {
    let engine = ScriptedEngine::new().with_turn(vec![Step::CallTools(vec![ScriptedCall::http(
        "call_1",
        "POST",
        "/banks/gh.29.uk/accounts",
    )])]);
    let h = harness(engine);
    let sink = RecordingSink::new();
    h.service.start_turn(StartTurn::new("create"), &sink).await;

    let request = sink
        .events()
        .into_iter()
        .find(|e| e.event_type() == "approval_request")
        .unwrap();
    let StreamEvent::ApprovalRequest { context, .. } = request else {
        unreachable!()
    };
    assert_eq!(context.tool_name, "obp_requests");
    assert_eq!(context.tool_input["method"], "POST");
    assert!(context.message.starts_with("Approve"));

    // The context is flattened into the frame.
    let frame = sink
        .frames()
        .into_iter()
        .find(|f| f.event().event_type() == "approval_request")
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(frame.data()).unwrap();
    assert_eq!(json["type"], "approval_request");
    assert_eq!(json["tool_call_id"], "call_1");
}
