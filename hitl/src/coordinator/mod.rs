//! Interrupt/resume coordinator: the per-conversation suspend/resume state machine.
//!
//! ```text
//! RUNNING --suspend--> SUSPENDED --resume(approved)--> RESUMING --> RUNNING
//!                          |  \--resume(rejected) / cancel / expire--> TERMINATED
//! ```
//!
//! A checkpoint is committed before `suspend` returns. Every approval ends in exactly one
//! write-once [`Resolution`]; the first writer wins and any later attempt is a conflict,
//! which is what makes resume exactly-once. Callers hold the conversation lock
//! ([`KeyedLocks`]) around each call; suspension itself holds no lock.

mod locks;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reasoning_event::{Actor, Phase, Status};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::approval::{ApprovalRequest, ApprovalStatus, Decision};
use crate::checkpoint::{Checkpoint, CheckpointBackend, Resolution, ResolutionReason, ResumeToken};
use crate::error::GateError;
use crate::events::{EventRecorder, ReasoningEmitter};
use crate::session::{ConversationSession, PendingApprovalRef, SessionStore};

pub use locks::KeyedLocks;

/// Where a conversation's current action path stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Running,
    Suspended,
    Resuming,
    Terminated,
}

/// Result of a successful suspend.
#[derive(Clone, Debug)]
pub struct Suspension {
    pub token: ResumeToken,
    pub checkpoint: Checkpoint,
}

/// A pending approval that has just been resolved.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub checkpoint: Checkpoint,
    /// The approval in its terminal state.
    pub approval: ApprovalRequest,
    pub resolution: Resolution,
}

/// What [`InterruptCoordinator::recover`] found.
#[derive(Clone, Debug, Default)]
pub struct RecoveryReport {
    /// Sessions with a pending approval and a valid checkpoint.
    pub resumable: Vec<ResumeToken>,
    /// Half-written suspensions dropped; their turns must be restarted.
    pub discarded: Vec<String>,
    /// Resolved approvals whose session still pointed at them.
    pub settled: Vec<String>,
}

pub struct InterruptCoordinator {
    backend: Arc<dyn CheckpointBackend>,
    sessions: SessionStore,
    emitter: ReasoningEmitter,
    approval_ttl: Duration,
    phases: DashMap<String, TurnPhase>,
}

impl InterruptCoordinator {
    pub fn new(
        backend: Arc<dyn CheckpointBackend>,
        sessions: SessionStore,
        emitter: ReasoningEmitter,
        approval_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            sessions,
            emitter,
            approval_ttl,
            phases: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CheckpointBackend> {
        &self.backend
    }

    pub fn phase(&self, conversation_id: &str) -> TurnPhase {
        self.phases
            .get(conversation_id)
            .map(|p| *p)
            .unwrap_or(TurnPhase::Running)
    }

    /// `Running` is the resting phase and is not stored.
    pub fn set_phase(&self, conversation_id: &str, phase: TurnPhase) {
        if phase == TurnPhase::Running {
            self.phases.remove(conversation_id);
        } else {
            self.phases.insert(conversation_id.to_string(), phase);
        }
    }

    /// Drops the in-memory phase of a conversation that has gone idle.
    pub fn forget(&self, conversation_id: &str) {
        self.phases.remove(conversation_id);
    }

    #[cfg(test)]
    pub(crate) fn tracked_phases(&self) -> usize {
        self.phases.len()
    }

    fn is_stale(&self, pending: &PendingApprovalRef, now: DateTime<Utc>) -> bool {
        now - pending.created_at > self.approval_ttl
    }

    /// Persists a checkpoint for `state`, points the session at it, and returns a resume token.
    ///
    /// Fails with `Conflict` if the session already has a pending approval; nothing is
    /// written in that case. A checkpoint commit failure is fatal to the turn.
    pub async fn suspend(
        &self,
        session: &mut ConversationSession,
        state: Value,
        approval: ApprovalRequest,
        recorder: &EventRecorder,
    ) -> Result<Suspension, GateError> {
        let conversation_id = session.conversation_id.clone();
        if let Some(pending) = &session.pending_approval_ref {
            return Err(GateError::Conflict(format!(
                "conversation {conversation_id} already has pending approval {}",
                pending.approval_id
            )));
        }
        if approval.status != ApprovalStatus::Pending {
            return Err(GateError::Validation(format!(
                "approval {} is not pending",
                approval.id
            )));
        }

        let sequence_index = self
            .backend
            .latest_checkpoint(&conversation_id)
            .await?
            .map_or(0, |cp| cp.sequence_index + 1);
        let checkpoint = Checkpoint {
            conversation_id: conversation_id.clone(),
            sequence_index,
            serialized_state: state,
            approval,
            resume_nonce: uuid::Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.backend.persist_checkpoint(&checkpoint).await {
            error!(
                conversation_id = %conversation_id,
                sequence_index,
                error = %e,
                "checkpoint commit failed"
            );
            return Err(e);
        }

        session.current_checkpoint_ref = Some(sequence_index);
        session.pending_approval_ref = Some(PendingApprovalRef {
            approval_id: checkpoint.approval.id.clone(),
            checkpoint_index: sequence_index,
            created_at: checkpoint.created_at,
        });
        self.sessions.save(session).await?;
        self.set_phase(&conversation_id, TurnPhase::Suspended);

        let token = self.backend.create_resume_token(&checkpoint);
        info!(
            conversation_id = %conversation_id,
            sequence_index,
            approval_id = %checkpoint.approval.id,
            "turn suspended for approval"
        );
        recorder
            .record(
                recorder
                    .draft(Phase::Hitl, Status::Suspended, Actor::Supervisor)
                    .with_message("awaiting approval")
                    .with_meta("approval_id", checkpoint.approval.id.clone())
                    .with_meta("approval_type", checkpoint.approval.approval_type.as_str())
                    .with_meta("risk_level", checkpoint.approval.risk_level.as_str())
                    .with_meta("checkpoint_index", sequence_index),
            )
            .await;
        Ok(Suspension { token, checkpoint })
    }

    /// Resolves the approval behind `token` with a reviewer decision.
    ///
    /// Unknown, forged, or superseded tokens are `NotFound`; a token whose approval was
    /// already resolved is `Conflict` and changes nothing. An approval past its TTL is
    /// expired instead of decided: the returned resolution has reason `Timeout` whatever
    /// `decision` was.
    pub async fn resume(
        &self,
        token: &ResumeToken,
        decision: Decision,
        recorder: &EventRecorder,
    ) -> Result<Resolved, GateError> {
        let checkpoint = self.backend.resume_from_checkpoint(token).await?;
        let conversation_id = &token.conversation_id;
        let seq = token.sequence_index;

        if let Some(existing) = self.backend.resolution(conversation_id, seq).await? {
            return Err(match existing.reason {
                ResolutionReason::Discarded => {
                    GateError::NotFound(format!("checkpoint {token} was discarded"))
                }
                _ => GateError::Conflict(format!(
                    "approval {} already {}",
                    existing.approval_id,
                    existing.decision
                )),
            });
        }

        let mut session = self
            .sessions
            .get(conversation_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("no session {conversation_id}")))?;
        let pending = session
            .pending_approval_ref
            .clone()
            .filter(|p| p.checkpoint_index == seq)
            .ok_or_else(|| GateError::NotFound(format!("checkpoint {token} is superseded")))?;

        if self.is_stale(&pending, Utc::now()) {
            return self
                .close_pending(
                    &mut session,
                    checkpoint,
                    ApprovalStatus::Expired,
                    ResolutionReason::Timeout,
                    recorder,
                )
                .await;
        }

        self.set_phase(conversation_id, TurnPhase::Resuming);
        let resolved = self
            .close_pending(
                &mut session,
                checkpoint,
                decision.status(),
                ResolutionReason::Reviewer,
                recorder,
            )
            .await?;
        if decision == Decision::Approved {
            recorder
                .record(
                    recorder
                        .draft(Phase::Hitl, Status::Resumed, Actor::Reviewer)
                        .with_message("approved; resuming at checkpoint")
                        .with_meta("approval_id", resolved.approval.id.clone())
                        .with_meta("checkpoint_index", seq),
                )
                .await;
        }
        Ok(resolved)
    }

    /// Writes the resolution, detaches the approval from the session, and emits the
    /// terminal event for anything other than an approval.
    async fn close_pending(
        &self,
        session: &mut ConversationSession,
        checkpoint: Checkpoint,
        status: ApprovalStatus,
        reason: ResolutionReason,
        recorder: &EventRecorder,
    ) -> Result<Resolved, GateError> {
        let decision = if status == ApprovalStatus::Approved {
            Decision::Approved
        } else {
            Decision::Rejected
        };
        let approval = checkpoint.approval.transition(status)?;
        let resolution = Resolution {
            approval_id: approval.id.clone(),
            decision,
            status,
            reason,
            resolved_at: Utc::now(),
        };
        self.backend
            .record_resolution(&checkpoint.conversation_id, checkpoint.sequence_index, &resolution)
            .await?;

        session.pending_approval_ref = None;
        self.sessions.save(session).await?;

        info!(
            conversation_id = %checkpoint.conversation_id,
            sequence_index = checkpoint.sequence_index,
            approval_id = %approval.id,
            status = ?status,
            reason = ?reason,
            "approval resolved"
        );
        if decision == Decision::Rejected {
            self.set_phase(&checkpoint.conversation_id, TurnPhase::Terminated);
            let message = match reason {
                ResolutionReason::Timeout => "approval expired; action not executed",
                ResolutionReason::Cancelled => "approval cancelled; action not executed",
                _ => "approval rejected; action not executed",
            };
            recorder
                .record(
                    recorder
                        .draft(Phase::Hitl, Status::Terminated, actor_for(reason))
                        .with_message(message)
                        .with_meta("approval_id", approval.id.clone())
                        .with_meta("reason", reason_label(reason))
                        .with_meta("checkpoint_index", checkpoint.sequence_index),
                )
                .await;
        }
        Ok(Resolved {
            checkpoint,
            approval,
            resolution,
        })
    }

    /// Loads the checkpoint a pending ref points at; a dangling ref is cleared.
    async fn pending_checkpoint(
        &self,
        session: &mut ConversationSession,
    ) -> Result<Option<Checkpoint>, GateError> {
        let Some(pending) = session.pending_approval_ref.clone() else {
            return Ok(None);
        };
        match self
            .backend
            .checkpoint(&session.conversation_id, pending.checkpoint_index)
            .await?
        {
            Some(cp) => Ok(Some(cp)),
            None => {
                warn!(
                    conversation_id = %session.conversation_id,
                    sequence_index = pending.checkpoint_index,
                    "pending approval without checkpoint; clearing"
                );
                session.pending_approval_ref = None;
                self.sessions.save(session).await?;
                Ok(None)
            }
        }
    }

    /// Expires the pending approval if it is older than the TTL at `now`. Resolved as
    /// rejected with reason `timeout`.
    pub async fn expire(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
        recorder: &EventRecorder,
    ) -> Result<Option<Resolved>, GateError> {
        let Some(mut session) = self.sessions.get(conversation_id).await? else {
            return Ok(None);
        };
        match &session.pending_approval_ref {
            Some(pending) if self.is_stale(pending, now) => {}
            _ => return Ok(None),
        }
        let Some(checkpoint) = self.pending_checkpoint(&mut session).await? else {
            return Ok(None);
        };
        self.settle_or_close(
            &mut session,
            checkpoint,
            ApprovalStatus::Expired,
            ResolutionReason::Timeout,
            recorder,
        )
        .await
    }

    /// Cancels the pending approval, equivalent to a rejection. `None` when nothing is pending.
    pub async fn cancel(
        &self,
        conversation_id: &str,
        recorder: &EventRecorder,
    ) -> Result<Option<Resolved>, GateError> {
        let Some(mut session) = self.sessions.get(conversation_id).await? else {
            return Ok(None);
        };
        let Some(checkpoint) = self.pending_checkpoint(&mut session).await? else {
            return Ok(None);
        };
        self.settle_or_close(
            &mut session,
            checkpoint,
            ApprovalStatus::Rejected,
            ResolutionReason::Cancelled,
            recorder,
        )
        .await
    }

    /// A resolution may already exist if a crash hit between the resolution write and the
    /// session update; then only the session pointer is cleared.
    async fn settle_or_close(
        &self,
        session: &mut ConversationSession,
        checkpoint: Checkpoint,
        status: ApprovalStatus,
        reason: ResolutionReason,
        recorder: &EventRecorder,
    ) -> Result<Option<Resolved>, GateError> {
        let existing = self
            .backend
            .resolution(&checkpoint.conversation_id, checkpoint.sequence_index)
            .await?;
        if existing.is_some() {
            session.pending_approval_ref = None;
            self.sessions.save(session).await?;
            return Ok(None);
        }
        self.close_pending(session, checkpoint, status, reason, recorder)
            .await
            .map(Some)
    }

    /// Scans every session after a restart. A pending ref with its unresolved checkpoint is
    /// resumable; a pending ref without one, or an unresolved checkpoint without a pending
    /// ref, is discarded.
    pub async fn recover(&self) -> Result<RecoveryReport, GateError> {
        let mut report = RecoveryReport::default();
        for conversation_id in self.sessions.list().await? {
            let Some(mut session) = self.sessions.get(&conversation_id).await? else {
                continue;
            };
            let recorder = self.emitter.recorder(&conversation_id);
            match session.pending_approval_ref.clone() {
                Some(pending) => {
                    let checkpoint = self
                        .backend
                        .checkpoint(&conversation_id, pending.checkpoint_index)
                        .await?;
                    let resolution = self
                        .backend
                        .resolution(&conversation_id, pending.checkpoint_index)
                        .await?;
                    match (checkpoint, resolution) {
                        (Some(cp), None) => {
                            self.set_phase(&conversation_id, TurnPhase::Suspended);
                            report.resumable.push(self.backend.create_resume_token(&cp));
                        }
                        (Some(_), Some(_)) => {
                            session.pending_approval_ref = None;
                            self.sessions.save(&session).await?;
                            report.settled.push(conversation_id.clone());
                        }
                        (None, _) => {
                            session.pending_approval_ref = None;
                            self.sessions.save(&session).await?;
                            self.note_discard(&recorder, "pending approval had no checkpoint")
                                .await;
                            report.discarded.push(conversation_id.clone());
                        }
                    }
                }
                None => {
                    let Some(cp) = self.backend.latest_checkpoint(&conversation_id).await? else {
                        continue;
                    };
                    if self
                        .backend
                        .resolution(&conversation_id, cp.sequence_index)
                        .await?
                        .is_some()
                    {
                        continue;
                    }
                    let resolution = Resolution {
                        approval_id: cp.approval.id.clone(),
                        decision: Decision::Rejected,
                        status: ApprovalStatus::Rejected,
                        reason: ResolutionReason::Discarded,
                        resolved_at: Utc::now(),
                    };
                    self.backend
                        .record_resolution(&conversation_id, cp.sequence_index, &resolution)
                        .await?;
                    self.note_discard(&recorder, "checkpoint had no pending approval")
                        .await;
                    report.discarded.push(conversation_id.clone());
                }
            }
        }
        info!(
            resumable = report.resumable.len(),
            discarded = report.discarded.len(),
            settled = report.settled.len(),
            "recovery scan finished"
        );
        Ok(report)
    }

    async fn note_discard(&self, recorder: &EventRecorder, why: &str) {
        warn!(conversation_id = %recorder.conversation_id(), why, "discarding suspended turn");
        recorder
            .record(
                recorder
                    .draft(Phase::Hitl, Status::Terminated, Actor::System)
                    .with_message("suspended turn discarded on recovery; restart the turn")
                    .with_meta("reason", reason_label(ResolutionReason::Discarded))
                    .with_meta("detail", why),
            )
            .await;
    }
}

fn actor_for(reason: ResolutionReason) -> Actor {
    match reason {
        ResolutionReason::Reviewer | ResolutionReason::Cancelled => Actor::Reviewer,
        ResolutionReason::Timeout | ResolutionReason::Discarded => Actor::System,
    }
}

fn reason_label(reason: ResolutionReason) -> &'static str {
    match reason {
        ResolutionReason::Reviewer => "reviewer",
        ResolutionReason::Cancelled => "cancelled",
        ResolutionReason::Timeout => "timeout",
        ResolutionReason::Discarded => "discarded",
    }
}
