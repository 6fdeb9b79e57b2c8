//! Restart recovery on SQLite and TTL expiry of approvals.

mod common;
mod init_logging;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hitl::{
    BackendKind, Decision, GateConfig, GateError, HitlService, PaperWorkflow,
    StaticSymbolResolver, TurnOutcome, TurnRequest,
};
use tokio_util::sync::CancellationToken;

fn buy(conversation: &str) -> TurnRequest {
    TurnRequest::new("삼성전자 1000만원 매수").in_conversation(conversation)
}

#[tokio::test]
async fn pending_approval_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = GateConfig {
        backend: BackendKind::Sqlite,
        sqlite_path: dir.path().join("hitl.db"),
        ..GateConfig::default()
    };

    let token = {
        let svc = HitlService::from_config(config.clone()).unwrap();
        let res = svc.submit_turn(buy("c1")).await.unwrap();
        svc.submit_turn(TurnRequest::new("내 포트폴리오 현황 알려줘").in_conversation("c2"))
            .await
            .unwrap();
        res.resume_token.unwrap()
    };

    let svc = HitlService::from_config(config).unwrap();
    let report = svc.recover().await.unwrap();
    let resumable: Vec<String> = report.resumable.iter().map(|t| t.to_string()).collect();
    assert_eq!(resumable, vec![token.clone()]);
    assert!(report.discarded.is_empty());

    let before = svc.emitter().last_sequence_index("c1").await.unwrap().unwrap();
    let done = svc.resolve_approval(&token, Decision::Approved).await.unwrap();
    assert_eq!(done.metadata.outcome, TurnOutcome::Executed);

    let history = svc.reasoning_history("c1", None, None).await.unwrap();
    for (i, event) in history.iter().enumerate() {
        assert_eq!(event.sequence_index, i as u64);
    }
    assert!(history.last().unwrap().sequence_index > before);
}

/// **Scenario**: a checkpoint that cannot be committed fails the turn outright; nothing is
/// left pending and the retried turn suspends normally.
#[tokio::test]
async fn failed_checkpoint_commit_is_fatal_to_the_turn() {
    let store = Arc::new(common::FailingCheckpointStore::new());
    let svc = HitlService::new(
        GateConfig::default(),
        store.clone(),
        Arc::new(PaperWorkflow::krx_demo()),
        Arc::new(StaticSymbolResolver::krx_defaults()),
    );

    store.fail_checkpoints(true);
    let err = svc.submit_turn(buy("c1")).await.unwrap_err();
    assert!(matches!(err, GateError::Storage(_)), "{err}");

    let session = svc.sessions().get("c1").await.unwrap().unwrap();
    assert!(session.pending_approval_ref.is_none());
    assert!(session.current_checkpoint_ref.is_none());
    assert!(svc.pending_approval("c1").await.unwrap().is_none());
    let names: Vec<String> = svc
        .reasoning_history("c1", None, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event_name())
        .collect();
    assert!(!names.iter().any(|n| n == "hitl.suspended"), "{names:?}");
    assert_eq!(names.last().map(String::as_str), Some("turn.failed"));

    store.fail_checkpoints(false);
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    assert!(res.requires_approval);
    let done = svc
        .resolve_approval(&res.resume_token.unwrap(), Decision::Approved)
        .await
        .unwrap();
    assert_eq!(done.metadata.outcome, TurnOutcome::Executed);
}

#[tokio::test]
async fn sweep_expires_stale_approval_as_rejected() {
    let svc = common::service_with(GateConfig {
        approval_ttl: Duration::ZERO,
        ..GateConfig::default()
    });
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    let token = res.resume_token.unwrap();

    let report = svc
        .sweep_once(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.expired_approvals, 1);
    assert!(svc.pending_approval("c1").await.unwrap().is_none());

    let err = svc
        .resolve_approval(&token, Decision::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Timeout(_)));

    let again = svc
        .sweep_once(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(again.expired_approvals, 0);
}

#[tokio::test]
async fn approving_after_ttl_is_timeout_and_executes_nothing() {
    let workflow = Arc::new(common::CountingWorkflow::new());
    let svc = HitlService::new(
        GateConfig {
            approval_ttl: Duration::ZERO,
            ..GateConfig::default()
        },
        Arc::new(hitl::InMemoryStore::new()),
        workflow.clone(),
        Arc::new(hitl::StaticSymbolResolver::krx_defaults()),
    );
    let res = svc.submit_turn(buy("c1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = svc
        .resolve_approval(res.resume_token.as_deref().unwrap(), Decision::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Timeout(_)));
    assert_eq!(workflow.executions(), 0);

    let history = svc.reasoning_history("c1", None, None).await.unwrap();
    let terminated = history
        .iter()
        .find(|e| e.event_name() == "hitl.terminated")
        .unwrap();
    assert_eq!(terminated.metadata["reason"], "timeout");
}

#[tokio::test]
async fn revived_session_expires_its_stale_approval() {
    let svc = common::service_with(GateConfig {
        approval_ttl: Duration::ZERO,
        session_ttl: Duration::ZERO,
        ..GateConfig::default()
    });
    svc.submit_turn(buy("c1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let res = svc
        .submit_turn(TurnRequest::new("카카오 100만원 매수").in_conversation("c1"))
        .await
        .unwrap();
    assert!(res.requires_approval);

    let names: Vec<String> = svc
        .reasoning_history("c1", None, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event_name())
        .collect();
    assert!(names.iter().any(|n| n == "session.resumed"));
    assert!(names.iter().any(|n| n == "hitl.terminated"));
}

#[tokio::test]
async fn background_sweeper_stops_on_cancel() {
    let svc = Arc::new(common::service_with(GateConfig {
        approval_ttl: Duration::ZERO,
        ..GateConfig::default()
    }));
    svc.submit_turn(buy("c1")).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = svc.spawn_expiry_sweeper(Duration::from_millis(10), cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(svc.pending_approval("c1").await.unwrap().is_none());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
