//! Background expiry: stale approvals and idle sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reasoning_event::{Actor, Phase, Status};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HitlService, TurnOutcome};
use crate::error::GateError;

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_approvals: usize,
    pub expired_sessions: usize,
    /// Conversations busy with a turn; retried next sweep.
    pub skipped: usize,
    /// Conversations whose records could not be read or written; retried next sweep.
    pub failed: usize,
}

#[derive(Default)]
struct Swept {
    approval: bool,
    session: bool,
}

impl HitlService {
    /// Expires approvals older than the approval TTL and soft-expires idle sessions as of
    /// `now`. Conversations whose lock is held are skipped, never waited on. A failure on
    /// one conversation is logged and counted; the sweep goes on with the rest.
    ///
    /// Soft-expired conversations also drop their in-memory state (lock slot, phase,
    /// event counter, live channel); the next turn rebuilds it from the store.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, GateError> {
        let mut report = SweepReport::default();
        for conversation_id in self.sessions.list().await? {
            let Some(guard) = self.locks.try_lock(&conversation_id) else {
                report.skipped += 1;
                continue;
            };
            match self.sweep_conversation(&conversation_id, now).await {
                Ok(swept) => {
                    report.expired_approvals += usize::from(swept.approval);
                    report.expired_sessions += usize::from(swept.session);
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "sweep failed for conversation"
                    );
                    report.failed += 1;
                }
            }
            drop(guard);
        }
        self.locks.prune();
        if report != SweepReport::default() {
            info!(
                expired_approvals = report.expired_approvals,
                expired_sessions = report.expired_sessions,
                skipped = report.skipped,
                failed = report.failed,
                "expiry sweep"
            );
        }
        Ok(report)
    }

    async fn sweep_conversation(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Swept, GateError> {
        let mut swept = Swept::default();
        let root = self.emitter.recorder(conversation_id);
        let turn = root.nested(Phase::Turn);
        if let Some(resolved) = self
            .coordinator
            .expire(conversation_id, now, &turn.nested(Phase::Hitl))
            .await?
        {
            self.finish_unexecuted(&resolved, TurnOutcome::Expired, &turn)
                .await?;
            swept.approval = true;
        }
        if self.sessions.soft_expire(conversation_id, now).await? {
            root.emit(Phase::Session, Status::Terminated, Actor::System, "session idle; expired")
                .await;
            self.coordinator.forget(conversation_id);
            self.emitter.release(conversation_id);
            swept.session = true;
        }
        Ok(swept)
    }

    /// Runs [`sweep_once`](Self::sweep_once) every `interval` until `cancel` fires.
    pub fn spawn_expiry_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep_once(Utc::now()).await {
                            warn!(error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::approval::{Decision, StaticSymbolResolver};
    use crate::config::GateConfig;
    use crate::events::FeedItem;
    use crate::service::TurnRequest;
    use crate::store::{DurableStore, InMemoryStore, StoreKey};
    use crate::workflow::PaperWorkflow;

    fn service(store: Arc<InMemoryStore>) -> HitlService {
        HitlService::new(
            GateConfig {
                approval_ttl: Duration::ZERO,
                session_ttl: Duration::from_secs(60),
                ..GateConfig::default()
            },
            store,
            Arc::new(PaperWorkflow::krx_demo()),
            Arc::new(StaticSymbolResolver::krx_defaults()),
        )
    }

    fn buy(conversation: &str) -> TurnRequest {
        TurnRequest::new("삼성전자 1000만원 매수").in_conversation(conversation)
    }

    #[tokio::test]
    async fn unreadable_session_does_not_stop_the_sweep() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store.clone());
        store
            .put(&StoreKey::session("a"), b"not json".to_vec())
            .await
            .unwrap();
        let token = svc.submit_turn(buy("b")).await.unwrap().resume_token.unwrap();

        let report = svc
            .sweep_once(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.expired_approvals, 1);
        assert!(svc.pending_approval("b").await.unwrap().is_none());
        assert!(matches!(
            svc.resolve_approval(&token, Decision::Approved).await,
            Err(GateError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn expired_sessions_release_in_memory_state() {
        let svc = service(Arc::new(InMemoryStore::new()));
        svc.submit_turn(buy("c1")).await.unwrap();
        svc.submit_turn(TurnRequest::new("카카오 현재가").in_conversation("c2"))
            .await
            .unwrap();
        let mut feed = svc.stream_reasoning("c1", None);

        let report = svc
            .sweep_once(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.expired_sessions, 2);
        assert!(svc.locks.is_empty());
        assert_eq!(svc.coordinator.tracked_phases(), 0);
        assert_eq!(svc.emitter.tracked(), 0);

        let mut last = None;
        while let Some(item) = feed.next().await {
            if let FeedItem::Event(ev) = item {
                last = Some(ev.event_name());
            }
        }
        assert_eq!(last.as_deref(), Some("session.terminated"));

        let res = svc
            .submit_turn(TurnRequest::new("카카오 현재가").in_conversation("c1"))
            .await
            .unwrap();
        assert!(!res.requires_approval);
        let history = svc.reasoning_history("c1", None, None).await.unwrap();
        for (i, event) in history.iter().enumerate() {
            assert_eq!(event.sequence_index, i as u64);
        }
    }
}
