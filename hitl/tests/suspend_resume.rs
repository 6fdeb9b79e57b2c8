//! Suspend/resume through the service: exactly-once resume, error paths, event ordering.

mod common;
mod init_logging;

use std::sync::Arc;

use hitl::{
    Decision, GateConfig, GateError, HitlService, InMemoryStore, StaticSymbolResolver,
    TurnOutcome, TurnRequest,
};

fn buy(conversation: &str) -> TurnRequest {
    TurnRequest::new("삼성전자 1000만원 매수").in_conversation(conversation)
}

async fn assert_gapless(svc: &HitlService, conversation: &str) -> usize {
    let history = svc.reasoning_history(conversation, None, None).await.unwrap();
    for (i, event) in history.iter().enumerate() {
        assert_eq!(event.sequence_index, i as u64, "{}", event.event_name());
        assert_eq!(event.conversation_id, conversation);
    }
    history.len()
}

#[tokio::test]
async fn sequence_is_gapless_across_suspend_resume_cycles() {
    let svc = common::service();
    for round in 0..4 {
        let res = svc.submit_turn(buy("c1")).await.unwrap();
        let token = res.resume_token.unwrap();
        let decision = if round % 2 == 0 {
            Decision::Approved
        } else {
            Decision::Rejected
        };
        svc.resolve_approval(&token, decision).await.unwrap();
        svc.submit_turn(TurnRequest::new("카카오 현재가").in_conversation("c1"))
            .await
            .unwrap();
    }
    let n = assert_gapless(&svc, "c1").await;
    let last = svc.emitter().last_sequence_index("c1").await.unwrap();
    assert_eq!(last, Some(n as u64 - 1));
}

#[tokio::test]
async fn approved_resume_continues_from_snapshot() {
    let svc = common::service();
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let token: hitl::ResumeToken = res.resume_token.clone().unwrap().parse().unwrap();
    let snapshot = svc
        .coordinator()
        .backend()
        .checkpoint("c1", token.sequence_index)
        .await
        .unwrap()
        .unwrap()
        .serialized_state;
    assert_eq!(snapshot["message"], "삼성전자 1000만원 매수");
    assert_eq!(snapshot["action"]["kind"], "execute_trade");

    let done = svc
        .resolve_approval(&token.to_string(), Decision::Approved)
        .await
        .unwrap();
    assert_eq!(done.metadata.outcome, TurnOutcome::Executed);
    assert!(!done.requires_approval);
    let nodes: Vec<_> = done.metadata.steps.iter().map(|s| s.node.as_str()).collect();
    assert_eq!(nodes, ["route", "policy", "approval", "execute"]);
    assert_eq!(done.metadata.steps[..3], res.metadata.steps[..]);

    let history = svc.reasoning_history("c1", None, None).await.unwrap();
    let node_of = |name: &str| {
        history
            .iter()
            .find(|e| e.event_name() == name)
            .and_then(|e| e.node.clone())
    };
    assert_eq!(node_of("routing.completed").as_deref(), Some("route"));
    assert_eq!(node_of("policy.completed").as_deref(), Some("policy"));
    assert_eq!(node_of("hitl.suspended").as_deref(), Some("approval"));
    assert_eq!(node_of("execution.completed").as_deref(), Some("execute"));
}

#[tokio::test]
async fn resume_does_not_rerun_routing() {
    let workflow = Arc::new(common::CountingWorkflow::new());
    let svc = HitlService::new(
        GateConfig::default(),
        Arc::new(InMemoryStore::new()),
        workflow.clone(),
        Arc::new(StaticSymbolResolver::krx_defaults()),
    );
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    assert_eq!((workflow.routes(), workflow.executions()), (1, 0));
    svc.resolve_approval(&res.resume_token.unwrap(), Decision::Approved)
        .await
        .unwrap();
    assert_eq!((workflow.routes(), workflow.executions()), (1, 1));
}

#[tokio::test]
async fn rejection_executes_nothing() {
    let workflow = Arc::new(common::CountingWorkflow::new());
    let svc = HitlService::new(
        GateConfig::default(),
        Arc::new(InMemoryStore::new()),
        workflow.clone(),
        Arc::new(StaticSymbolResolver::krx_defaults()),
    );
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let done = svc
        .resolve_approval(&res.resume_token.unwrap(), Decision::Rejected)
        .await
        .unwrap();
    assert_eq!(done.metadata.outcome, TurnOutcome::Rejected);
    assert_eq!(workflow.executions(), 0);
    let history = svc.reasoning_history("c1", None, None).await.unwrap();
    assert!(history.iter().any(|e| e.event_name() == "hitl.terminated"));
}

/// **Scenario**: unknown and already-resolved tokens fail without touching the session.
#[tokio::test]
async fn bad_tokens_fail_without_mutation() {
    let svc = common::service();
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let token = res.resume_token.unwrap();

    let before = svc.sessions().get("c1").await.unwrap();
    let events_before = svc.emitter().last_sequence_index("c1").await.unwrap();
    for unknown in ["c1.7.0123456789abcdef", "nope.0.x", "not-a-token"] {
        let err = svc
            .resolve_approval(unknown, Decision::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotFound(_)), "{unknown}: {err}");
    }
    assert_eq!(svc.sessions().get("c1").await.unwrap(), before);
    assert_eq!(
        svc.emitter().last_sequence_index("c1").await.unwrap(),
        events_before
    );

    svc.resolve_approval(&token, Decision::Rejected).await.unwrap();
    let before = svc.sessions().get("c1").await.unwrap();
    let events_before = svc.emitter().last_sequence_index("c1").await.unwrap();
    let err = svc
        .resolve_approval(&token, Decision::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));
    assert_eq!(svc.sessions().get("c1").await.unwrap(), before);
    assert_eq!(
        svc.emitter().last_sequence_index("c1").await.unwrap(),
        events_before
    );
}

#[tokio::test]
async fn second_mutating_turn_while_pending_conflicts() {
    let svc = common::service();
    let first = svc.submit_turn(buy("c1")).await.unwrap();
    let err = svc
        .submit_turn(TurnRequest::new("카카오 100만원 매수").in_conversation("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));

    let pending = svc.pending_approval("c1").await.unwrap().unwrap();
    assert_eq!(Some(pending.resume_token.clone()), first.resume_token);
    assert_eq!(
        Some(pending.approval_request.id),
        first.approval_request.map(|a| a.id)
    );

    // Reads still go through while an approval is pending.
    let read = svc
        .submit_turn(TurnRequest::new("카카오 현재가").in_conversation("c1"))
        .await
        .unwrap();
    assert!(!read.requires_approval);
}

/// **Scenario**: the same token and decision twice returns the same result and emits
/// nothing the second time.
#[tokio::test]
async fn resolve_is_idempotent() {
    let svc = common::service();
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let token = res.resume_token.unwrap();

    let first = svc.resolve_approval(&token, Decision::Approved).await.unwrap();
    let events_after_first = svc.reasoning_history("c1", None, None).await.unwrap();
    let second = svc.resolve_approval(&token, Decision::Approved).await.unwrap();
    let events_after_second = svc.reasoning_history("c1", None, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(events_after_first, events_after_second);
    let executed = events_after_second
        .iter()
        .filter(|e| e.event_name() == "execution.completed")
        .count();
    assert_eq!(executed, 1);
}

/// **Scenario**: an approved order the book cannot absorb fails its execution, records the
/// failure, and a repeated resolve returns that same result instead of a conflict.
#[tokio::test]
async fn approved_order_that_overflows_the_book_fails_cleanly() {
    let svc = common::service();
    let res = svc
        .submit_turn(
            TurnRequest::new("삼성전자 1주 18446744073709551615원에 매도").in_conversation("c1"),
        )
        .await
        .unwrap();
    assert!(res.requires_approval);
    let token = res.resume_token.unwrap();

    let first = svc.resolve_approval(&token, Decision::Approved).await.unwrap();
    assert_eq!(first.metadata.outcome, TurnOutcome::Failed);
    assert!(first.message.contains("overflows"), "{}", first.message);

    let second = svc.resolve_approval(&token, Decision::Approved).await.unwrap();
    assert_eq!(first, second);
    assert!(svc.pending_approval("c1").await.unwrap().is_none());

    let after = svc.submit_turn(buy("c1")).await.unwrap();
    assert!(after.requires_approval);
}

#[tokio::test]
async fn cancel_rejects_pending_and_is_idempotent() {
    let svc = common::service();
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let cancelled = svc.cancel_approval("c1").await.unwrap().unwrap();
    assert_eq!(cancelled.metadata.outcome, TurnOutcome::Cancelled);
    assert!(svc.cancel_approval("c1").await.unwrap().is_none());
    assert!(svc.pending_approval("c1").await.unwrap().is_none());
    assert!(matches!(
        svc.resolve_approval(&res.resume_token.unwrap(), Decision::Approved)
            .await,
        Err(GateError::Conflict(_))
    ));
}

#[tokio::test]
async fn concurrent_conversations_do_not_block_each_other() {
    let svc = Arc::new(common::service());
    let mut handles = Vec::new();
    for i in 0..8 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            let conv = format!("c{i}");
            let res = svc.submit_turn(buy(&conv)).await.unwrap();
            svc.resolve_approval(&res.resume_token.unwrap(), Decision::Rejected)
                .await
                .unwrap();
            conv
        }));
    }
    for h in handles {
        let conv = h.await.unwrap();
        assert_gapless(&svc, &conv).await;
    }
}
