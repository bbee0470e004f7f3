use std::time::Duration;

use serde_json::json;
use tollgate_core::{CallId, MessageId, ThreadId};
use tollgate_storage::MemoryKvStore;

use super::*;
use crate::record::record_key;
use crate::rule::ApprovalRule;

fn catalog() -> ToolCatalog {
    ToolCatalog::new()
        .with_tool(
            ToolPolicy::new("obp_requests")
                .with_rule(
                    ApprovalRule::pattern("DELETE", "/banks/*", RuleAction::AlwaysDeny)
                        .unwrap(),
                )
                .with_rule(
                    ApprovalRule::pattern("POST", "/banks/*/views", RuleAction::AutoApprove)
                        .unwrap(),
                )
                .with_rule(
                    ApprovalRule::pattern("GET", "/users/*", RuleAction::RequireApproval)
                        .unwrap(),
                ),
        )
        .with_tool(ToolPolicy::new("search").with_default_risk(RiskLevel::Safe))
}

fn engine() -> (Arc<MemoryKvStore>, DecisionEngine) {
    let kv = Arc::new(MemoryKvStore::new());
    let engine = DecisionEngine::new(catalog(), kv.clone(), RecordTtls::default());
    (kv, engine)
}

fn anon(thread: &str) -> Principal {
    Principal::anonymous(ThreadId::from(thread))
}

fn alice(thread: &str) -> Principal {
    Principal::user(ThreadId::from(thread), "alice")
}

#[tokio::test]
async fn test_safe_get_is_approved() {
    let (_, engine) = engine();
    let decision = engine
        .check("obp_requests", &Operation::new("GET", "/banks"), &anon("t"))
        .await;
    assert_eq!(
        decision,
        Decision::Approved {
            source: ApprovalSource::Risk {
                level: RiskLevel::Safe
            }
        }
    );
}

#[tokio::test]
async fn test_dangerous_post_requires_approval() {
    let (_, engine) = engine();
    let decision = engine
        .check("obp_requests", &Operation::new("POST", "/banks/x/accounts"), &anon("t"))
        .await;
    assert!(decision.requires_approval());
}

#[tokio::test]
async fn test_deny_rule_is_terminal() {
    let (_, engine) = engine();
    let decision = engine
        .check("obp_requests", &Operation::new("DELETE", "/banks/x"), &anon("t"))
        .await;
    assert!(decision.is_denied());
    assert!(matches!(
        decision.violation("obp_requests"),
        Some(ApprovalError::PolicyViolation { .. })
    ));
}

#[tokio::test]
async fn test_auto_approve_rule_overrides_risk() {
    let (_, engine) = engine();
    let decision = engine
        .check("obp_requests", &Operation::new("POST", "/banks/x/views"), &anon("t"))
        .await;
    assert_eq!(
        decision,
        Decision::Approved {
            source: ApprovalSource::Rule
        }
    );
}

#[tokio::test]
async fn test_require_rule_overrides_safe_risk() {
    let (_, engine) = engine();
    let decision = engine
        .check("obp_requests", &Operation::new("GET", "/users/1"), &anon("t"))
        .await;
    assert!(decision.requires_approval());
}

#[tokio::test]
async fn test_unknown_tool_requires_approval() {
    let (_, engine) = engine();
    let decision = engine
        .check("rm_rf", &Operation::new("GET", "/"), &anon("t"))
        .await;
    assert!(decision.requires_approval());
}

#[tokio::test]
async fn test_non_http_tool_uses_default_risk() {
    let (_, engine) = engine();
    let op = Operation::from_arguments(&json!({"query": "rates"}));
    assert!(engine.check("search", &op, &anon("t")).await.is_approved());
}

#[tokio::test]
async fn test_session_record_then_check_is_approved() {
    let (_, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    let principal = anon("t1");

    let stored = engine
        .record("obp_requests", &op, ApprovalScope::Session, true, &principal)
        .await
        .unwrap();
    assert_eq!(stored, Some(ApprovalScope::Session));

    assert_eq!(
        engine.check("obp_requests", &op, &principal).await,
        Decision::Approved {
            source: ApprovalSource::Record {
                scope: ApprovalScope::Session
            }
        }
    );
    // Another thread is unaffected.
    assert!(
        engine
            .check("obp_requests", &op, &anon("t2"))
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_once_is_never_stored() {
    let (kv, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    let principal = anon("t");

    let stored = engine
        .record("obp_requests", &op, ApprovalScope::Once, true, &principal)
        .await
        .unwrap();
    assert_eq!(stored, None);
    assert!(
        kv.list_keys("approvals/session/t")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        engine
            .check("obp_requests", &op, &principal)
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_stored_denial_is_denied() {
    let (_, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    let principal = anon("t");
    engine
        .record("obp_requests", &op, ApprovalScope::Session, false, &principal)
        .await
        .unwrap();
    assert!(engine.check("obp_requests", &op, &principal).await.is_denied());
}

#[tokio::test]
async fn test_user_hit_is_promoted_to_session() {
    let (kv, engine) = engine();
    let op = Operation::new("PUT", "/users/1");
    engine
        .record("obp_requests", &op, ApprovalScope::User, true, &alice("t1"))
        .await
        .unwrap();

    // A fresh thread for the same user finds the USER grant.
    let decision = engine.check("obp_requests", &op, &alice("t2")).await;
    assert_eq!(
        decision,
        Decision::Approved {
            source: ApprovalSource::Record {
                scope: ApprovalScope::User
            }
        }
    );
    assert!(
        kv.exists("approvals/session/t2", &record_key("obp_requests", &op))
            .await
            .unwrap()
    );

    let again = engine.check("obp_requests", &op, &alice("t2")).await;
    assert_eq!(
        again,
        Decision::Approved {
            source: ApprovalSource::Record {
                scope: ApprovalScope::Session
            }
        }
    );
}

#[tokio::test]
async fn test_user_scope_without_user_falls_back_to_session() {
    let (_, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    let stored = engine
        .record("obp_requests", &op, ApprovalScope::User, true, &anon("t"))
        .await
        .unwrap();
    assert_eq!(stored, Some(ApprovalScope::Session));
}

#[tokio::test]
async fn test_workspace_grant_applies_to_everyone() {
    let (_, engine) = engine();
    let op = Operation::new("PATCH", "/banks/x");
    engine
        .record("obp_requests", &op, ApprovalScope::Workspace, true, &anon("t1"))
        .await
        .unwrap();
    assert!(engine.check("obp_requests", &op, &alice("t9")).await.is_approved());
}

#[tokio::test]
async fn test_deny_rule_beats_stale_grant() {
    let (_, engine) = engine();
    let op = Operation::new("DELETE", "/banks/x");
    let principal = anon("t");
    engine
        .record("obp_requests", &op, ApprovalScope::Session, true, &principal)
        .await
        .unwrap();
    assert!(engine.check("obp_requests", &op, &principal).await.is_denied());
}

#[tokio::test]
async fn test_promoted_grant_expires_with_its_source() {
    let (kv, engine) = engine();
    let op = Operation::new("PUT", "/users/1");
    let mut record = ApprovalRecord::new(
        "obp_requests",
        op.clone(),
        ApprovalScope::User,
        true,
        Some(Duration::from_secs(60)),
    );
    record.created_at =
        Timestamp::from_datetime(chrono::Utc::now() - chrono::Duration::seconds(58));
    kv.set(
        "approvals/user/alice",
        &record_key("obp_requests", &op),
        serde_json::to_vec(&record).unwrap(),
    )
    .await
    .unwrap();

    let first = engine.check("obp_requests", &op, &alice("t")).await;
    assert!(matches!(
        first,
        Decision::Approved {
            source: ApprovalSource::Record {
                scope: ApprovalScope::User
            }
        }
    ));
    let bytes = kv
        .get("approvals/session/t", &record_key("obp_requests", &op))
        .await
        .unwrap()
        .unwrap();
    let promoted: ApprovalRecord = serde_json::from_slice(&bytes).unwrap();
    assert!(promoted.ttl_secs.is_some_and(|ttl| ttl <= 2));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(
        engine
            .check("obp_requests", &op, &alice("t"))
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_expired_record_is_absent() {
    let kv = Arc::new(MemoryKvStore::new());
    let ttls = RecordTtls {
        session: Some(Duration::from_secs(60)),
        ..RecordTtls::default()
    };
    let engine = DecisionEngine::new(catalog(), kv.clone(), ttls);
    let op = Operation::new("POST", "/banks/x/accounts");

    let mut record = ApprovalRecord::new(
        "obp_requests",
        op.clone(),
        ApprovalScope::Session,
        true,
        ttls.session,
    );
    record.created_at =
        Timestamp::from_datetime(chrono::Utc::now() - chrono::Duration::minutes(5));
    kv.set(
        "approvals/session/t",
        &record_key("obp_requests", &op),
        serde_json::to_vec(&record).unwrap(),
    )
    .await
    .unwrap();

    assert!(
        engine
            .check("obp_requests", &op, &anon("t"))
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_corrupted_record_never_approves() {
    let (kv, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    kv.set(
        "approvals/session/t",
        &record_key("obp_requests", &op),
        b"{broken".to_vec(),
    )
    .await
    .unwrap();
    assert!(
        engine
            .check("obp_requests", &op, &anon("t"))
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_custom_predicate_sees_call_arguments() {
    let catalog = ToolCatalog::new().with_tool(ToolPolicy::new("transfer").with_rule(
        ApprovalRule::custom("small-transfers", |args: &Value| {
            match args.get("amount").and_then(Value::as_u64) {
                Some(n) if n <= 100 => RuleAction::AutoApprove,
                _ => RuleAction::RequireApproval,
            }
        }),
    ));
    let engine = DecisionEngine::new(
        catalog,
        Arc::new(MemoryKvStore::new()),
        RecordTtls::default(),
    );
    let call = |amount: u64| {
        PendingToolInvocation::new(
            "transfer",
            CallId::from("c"),
            json!({"amount": amount}),
            MessageId::new(),
        )
    };
    assert!(engine.check_call(&call(10), &anon("t")).await.is_approved());
    assert!(
        engine
            .check_call(&call(10_000), &anon("t"))
            .await
            .requires_approval()
    );
}

#[tokio::test]
async fn test_revoke_and_clear() {
    let (_, engine) = engine();
    let op = Operation::new("POST", "/banks/x/accounts");
    let principal = alice("t");
    engine
        .record("obp_requests", &op, ApprovalScope::Session, true, &principal)
        .await
        .unwrap();
    assert!(engine.revoke("obp_requests", &op, &principal).await.unwrap());
    assert!(!engine.revoke("obp_requests", &op, &principal).await.unwrap());
    assert!(
        engine
            .check("obp_requests", &op, &principal)
            .await
            .requires_approval()
    );

    engine
        .record("obp_requests", &op, ApprovalScope::Workspace, true, &principal)
        .await
        .unwrap();
    assert_eq!(
        engine
            .clear(ApprovalScope::Workspace, &principal)
            .await
            .unwrap(),
        1
    );
    assert_eq!(engine.clear(ApprovalScope::Once, &principal).await.unwrap(), 0);
}

#[tokio::test]
async fn test_session_summary_lists_grants() {
    let (_, engine) = engine();
    let principal = anon("t");
    engine
        .record(
            "obp_requests",
            &Operation::new("POST", "/a"),
            ApprovalScope::Session,
            true,
            &principal,
        )
        .await
        .unwrap();
    engine
        .record(
            "obp_requests",
            &Operation::new("PUT", "/b"),
            ApprovalScope::Session,
            false,
            &principal,
        )
        .await
        .unwrap();

    let summary = engine.session_summary(&principal).await.unwrap();
    assert_eq!(summary.len(), 2);
    assert!(summary.iter().any(|g| g.operation.path == "/a" && g.approved));
    assert!(summary.iter().any(|g| g.operation.path == "/b" && !g.approved));
}

#[tokio::test]
async fn test_build_context_counts_similar_approvals() {
    let (_, engine) = engine();
    let principal = anon("t");
    engine
        .record(
            "obp_requests",
            &Operation::new("POST", "/banks/a/accounts"),
            ApprovalScope::Session,
            true,
            &principal,
        )
        .await
        .unwrap();

    let call = PendingToolInvocation::new(
        "obp_requests",
        CallId::from("call_7"),
        json!({"method": "POST", "path": "/banks/b/accounts"}),
        MessageId::new(),
    );
    let ctx = engine.build_context(&call, &principal).await;
    assert_eq!(ctx.similar_operations_count, 1);
    assert!(ctx.last_similar_approval.is_some());
    assert_eq!(ctx.operation_summary, "POST request to /banks/b/accounts");

    let unknown = PendingToolInvocation::new("rm_rf", CallId::from("c"), json!({}), MessageId::new());
    let ctx = engine.build_context(&unknown, &principal).await;
    assert_eq!(ctx.operation_summary, "Execute rm_rf");
    assert_eq!(ctx.risk_level, RiskLevel::Dangerous);
}
