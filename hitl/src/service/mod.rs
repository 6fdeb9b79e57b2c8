//! The gate's exposed operations.
//!
//! [`HitlService`] wires the policy evaluator, approval builder, coordinator, emitter, and
//! session store around an injected [`Workflow`]. Turns for one conversation are serialized
//! with [`KeyedLocks`]; distinct conversations run concurrently. The lock is released when a
//! turn suspends, so [`pending_approval`](HitlService::pending_approval) never waits on it.

mod sweeper;
mod turn;

use std::sync::Arc;

use chrono::Utc;
use futures::stream::BoxStream;
use reasoning_event::{Actor, Phase, ReasoningEvent, Status};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::action::ProposedAction;
use crate::approval::{ApprovalRequestBuilder, Decision, StaticSymbolResolver, SymbolResolver};
use crate::checkpoint::{
    open_store, CheckpointBackend, ResolutionReason, ResumeToken, StoreCheckpointBackend,
};
use crate::config::GateConfig;
use crate::coordinator::{InterruptCoordinator, KeyedLocks, RecoveryReport, Resolved, TurnPhase};
use crate::error::GateError;
use crate::events::{EventRecorder, FeedItem, ReasoningEmitter};
use crate::policy::{self, AutomationLevel, GateDecision};
use crate::session::{ConversationSession, LevelTransition, SessionStore};
use crate::store::{DurableStore, StoreError};
use crate::workflow::{ExecutionReport, PaperWorkflow, TurnState, Workflow};

pub use sweeper::SweepReport;
pub use turn::{PendingApproval, TurnMetadata, TurnOutcome, TurnRequest, TurnResponse};

fn serialization(e: serde_json::Error) -> GateError {
    GateError::Storage(StoreError::Serialization(e.to_string()))
}

/// Human-in-the-loop gate service.
pub struct HitlService {
    config: GateConfig,
    sessions: SessionStore,
    emitter: ReasoningEmitter,
    coordinator: InterruptCoordinator,
    builder: ApprovalRequestBuilder,
    workflow: Arc<dyn Workflow>,
    locks: KeyedLocks,
}

impl HitlService {
    pub fn new(
        config: GateConfig,
        store: Arc<dyn DurableStore>,
        workflow: Arc<dyn Workflow>,
        resolver: Arc<dyn SymbolResolver>,
    ) -> Self {
        let sessions = SessionStore::new(
            store.clone(),
            config.default_automation_level,
            config.session_ttl_chrono(),
        );
        let emitter = ReasoningEmitter::new(store.clone(), config.subscriber_capacity);
        let backend: Arc<dyn CheckpointBackend> = Arc::new(StoreCheckpointBackend::new(store));
        let coordinator = InterruptCoordinator::new(
            backend,
            sessions.clone(),
            emitter.clone(),
            config.approval_ttl_chrono(),
        );
        let builder = ApprovalRequestBuilder::new(config.risk_bands, resolver);
        Self {
            config,
            sessions,
            emitter,
            coordinator,
            builder,
            workflow,
            locks: KeyedLocks::new(),
        }
    }

    /// Opens the configured backend and runs the bundled [`PaperWorkflow`].
    pub fn from_config(config: GateConfig) -> Result<Self, GateError> {
        let store = open_store(config.backend, &config.sqlite_path)?;
        info!(backend = ?config.backend, "hitl store opened");
        Ok(Self::new(
            config,
            store,
            Arc::new(PaperWorkflow::krx_demo()),
            Arc::new(StaticSymbolResolver::krx_defaults()),
        ))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn emitter(&self) -> &ReasoningEmitter {
        &self.emitter
    }

    pub fn coordinator(&self) -> &InterruptCoordinator {
        &self.coordinator
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Runs one turn: route, classify, gate, then execute or suspend.
    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnResponse, GateError> {
        if request.message.trim().is_empty() {
            return Err(GateError::Validation("message is empty".into()));
        }
        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let _guard = self.locks.lock(&conversation_id).await;
        let now = Utc::now();
        let root = self.emitter.recorder(&conversation_id);

        let access = self.sessions.get_or_create(&conversation_id, now).await?;
        let mut session = access.session;
        if access.created {
            root.record(
                root.draft(Phase::Session, Status::Started, Actor::System)
                    .with_message("session created")
                    .with_meta("automation_level", u8::from(session.automation_level())),
            )
            .await;
        }
        if access.revived {
            root.emit(Phase::Session, Status::Resumed, Actor::System, "session revived")
                .await;
            let hitl = root.nested(Phase::Hitl);
            if let Some(resolved) = self.coordinator.expire(&conversation_id, now, &hitl).await? {
                self.finish_unexecuted(&resolved, TurnOutcome::Expired, &root)
                    .await?;
            }
            if let Some(fresh) = self.sessions.get(&conversation_id).await? {
                session.pending_approval_ref = fresh.pending_approval_ref;
            }
        }
        self.coordinator
            .set_phase(&conversation_id, TurnPhase::Running);

        let turn = root.nested(Phase::Turn);
        turn.record(
            turn.draft(Phase::Turn, Status::Started, Actor::User)
                .with_message(request.message.clone()),
        )
        .await;

        let mut unmapped_level = None;
        if let Some(code) = request.automation_level {
            match AutomationLevel::try_from(code) {
                Ok(level) => {
                    if let Some(t) = self.sessions.transition_level(&mut session, level).await? {
                        self.note_level_change(&turn, t).await;
                    }
                }
                Err(_) => {
                    unmapped_level = Some(code);
                    turn.record(
                        turn.draft(Phase::Policy, Status::Progress, Actor::System)
                            .with_message("unmapped automation level; approval required")
                            .with_meta("requested_level", code),
                    )
                    .await;
                }
            }
        }
        session.turn_count += 1;
        self.sessions.save(&session).await?;

        match self
            .run_turn(&mut session, &request.message, unmapped_level, &turn)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                turn.record(
                    turn.draft(Phase::Turn, Status::Failed, Actor::System)
                        .with_message(e.to_string())
                        .with_meta("error", e.kind()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        session: &mut ConversationSession,
        message: &str,
        unmapped_level: Option<u8>,
        turn: &EventRecorder,
    ) -> Result<TurnResponse, GateError> {
        let conversation_id = session.conversation_id.clone();
        let level = u8::from(session.automation_level());

        let routing = turn.nested(Phase::Routing).at_node("route");
        let invocation = self.workflow.route(message, &routing).await?;
        let action = ProposedAction::from_invocation(&invocation)?;
        routing
            .record(
                routing
                    .draft(Phase::Routing, Status::Completed, Actor::Supervisor)
                    .with_message(format!("routed to {}", action.kind()))
                    .with_meta("tool", action.kind().tool_name()),
            )
            .await;

        let classification = action.classify(self.builder.bands());
        // An unmapped requested level goes through the raw table, which fails closed.
        let gate = match unmapped_level {
            Some(code) => policy::evaluate_fail_closed(code, classification.as_str()),
            None => session.hitl.decide(action.kind(), classification),
        };
        let fail_closed = unmapped_level.is_some();
        let policy = turn.nested(Phase::Policy).at_node("policy");
        policy
            .record(
                policy
                    .draft(Phase::Policy, Status::Completed, Actor::Supervisor)
                    .with_message(match gate {
                        GateDecision::AutoExecute => "auto-execute",
                        GateDecision::RequireApproval => "approval required",
                    })
                    .with_meta("automation_level", level)
                    .with_meta("classification", classification.as_str())
                    .with_meta("fail_closed", fail_closed),
            )
            .await;
        debug!(conversation_id = %conversation_id, ?classification, ?gate, "gate evaluated");

        let mut state = TurnState {
            message: message.to_string(),
            invocation,
            action,
            classification,
            steps: Vec::new(),
        };
        state.push_step("route", state.action.kind().tool_name());
        state.push_step("policy", format!("{classification}: {gate:?}"));

        let mut metadata = TurnMetadata::new(level, TurnOutcome::Executed);
        metadata.action = Some(state.action.kind());
        metadata.classification = Some(classification);
        metadata.gate = Some(gate);
        metadata.fail_closed = fail_closed;

        match gate {
            GateDecision::AutoExecute => {
                let report = self.execute_action(&state.action, turn).await?;
                state.push_step("execute", report.message.clone());
                let last = self.respond(turn, &report.message).await;
                metadata.steps = state.steps;
                metadata.last_sequence_index = last;
                Ok(TurnResponse {
                    message: report.message,
                    conversation_id,
                    requires_approval: false,
                    approval_request: None,
                    resume_token: None,
                    metadata,
                })
            }
            GateDecision::RequireApproval => {
                let approval = self.builder.build(&state.action)?;
                state.push_step("approval", approval.id.clone());
                let snapshot = serde_json::to_value(&state).map_err(serialization)?;
                let suspension = self
                    .coordinator
                    .suspend(
                        session,
                        snapshot,
                        approval,
                        &turn.nested(Phase::Hitl).at_node("approval"),
                    )
                    .await?;
                let approval = suspension.checkpoint.approval;
                let message = format!(
                    "approval required: {} ({} risk)",
                    approval.approval_type, approval.risk_level
                );
                metadata.outcome = TurnOutcome::AwaitingApproval;
                metadata.risk_level = Some(approval.risk_level);
                metadata.steps = state.steps;
                metadata.last_sequence_index = self
                    .emitter
                    .last_sequence_index(&conversation_id)
                    .await
                    .unwrap_or(None);
                Ok(TurnResponse {
                    message,
                    conversation_id,
                    requires_approval: true,
                    approval_request: Some(approval),
                    resume_token: Some(suspension.token.to_string()),
                    metadata,
                })
            }
        }
    }

    /// Runs the action under an `execution` span of events.
    async fn execute_action(
        &self,
        action: &ProposedAction,
        turn: &EventRecorder,
    ) -> Result<ExecutionReport, GateError> {
        let exec = turn.nested(Phase::Execution).at_node("execute");
        exec.emit(
            Phase::Execution,
            Status::Started,
            Actor::Supervisor,
            format!("executing {}", action.kind()),
        )
        .await;
        match self.workflow.execute(action, &exec).await {
            Ok(report) => {
                exec.emit(
                    Phase::Execution,
                    Status::Completed,
                    Actor::Agent,
                    report.message.clone(),
                )
                .await;
                Ok(report)
            }
            Err(e) => {
                let e = GateError::from(e);
                warn!(conversation_id = %exec.conversation_id(), error = %e, "execution failed");
                exec.record(
                    exec.draft(Phase::Execution, Status::Failed, Actor::Agent)
                        .with_message(e.to_string())
                        .with_meta("error", e.kind()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn respond(&self, turn: &EventRecorder, message: &str) -> Option<u64> {
        turn.emit(Phase::Response, Status::Completed, Actor::Agent, message)
            .await
            .map(|e| e.sequence_index)
    }

    async fn note_level_change(&self, recorder: &EventRecorder, t: LevelTransition) {
        recorder
            .record(
                recorder
                    .draft(Phase::Session, Status::Progress, Actor::User)
                    .with_message(format!("automation level {} -> {}", t.from, t.to))
                    .with_meta("from", u8::from(t.from))
                    .with_meta("to", u8::from(t.to)),
            )
            .await;
    }

    /// Resumes the turn suspended behind `resume_token` with a reviewer decision.
    ///
    /// Repeating a call with the same token and decision returns the recorded result and
    /// emits nothing. A different decision on a resolved token is `Conflict`; approving an
    /// expired approval is `Timeout`.
    pub async fn resolve_approval(
        &self,
        resume_token: &str,
        decision: Decision,
    ) -> Result<TurnResponse, GateError> {
        let token: ResumeToken = resume_token.parse()?;
        let _guard = self.locks.lock(&token.conversation_id).await;
        let root = self.emitter.recorder(&token.conversation_id);
        let turn = root.nested(Phase::Turn);

        let resolved = match self
            .coordinator
            .resume(&token, decision, &turn.nested(Phase::Hitl).at_node("approval"))
            .await
        {
            Ok(resolved) => resolved,
            Err(GateError::Conflict(msg)) => return self.replay(&token, decision, msg).await,
            Err(e) => return Err(e),
        };

        match resolved.resolution.reason {
            ResolutionReason::Timeout => {
                let expired = self
                    .finish_unexecuted(&resolved, TurnOutcome::Expired, &turn)
                    .await?;
                if decision == Decision::Approved {
                    return Err(GateError::Timeout(format!(
                        "approval {} expired before it was approved",
                        resolved.approval.id
                    )));
                }
                Ok(expired)
            }
            _ if decision == Decision::Rejected => {
                self.finish_unexecuted(&resolved, TurnOutcome::Rejected, &turn)
                    .await
            }
            _ => self.finish_approved(&resolved, &turn).await,
        }
    }

    /// Continues the suspended turn at its checkpoint: only the gated action runs.
    async fn finish_approved(
        &self,
        resolved: &Resolved,
        turn: &EventRecorder,
    ) -> Result<TurnResponse, GateError> {
        let conversation_id = &resolved.checkpoint.conversation_id;
        let mut state: TurnState =
            serde_json::from_value(resolved.checkpoint.serialized_state.clone())
                .map_err(serialization)?;
        let (message, outcome) = match self.execute_action(&state.action, turn).await {
            Ok(report) => (report.message, TurnOutcome::Executed),
            Err(e) => (e.to_string(), TurnOutcome::Failed),
        };
        state.push_step("execute", message.clone());
        self.coordinator
            .set_phase(conversation_id, TurnPhase::Running);
        let last = self.respond(turn, &message).await;
        let response = self
            .terminal_response(resolved, message, outcome, state, last)
            .await?;
        self.record_outcome(resolved, &response).await?;
        Ok(response)
    }

    /// Builds and records the result for an approval that ended without executing.
    async fn finish_unexecuted(
        &self,
        resolved: &Resolved,
        outcome: TurnOutcome,
        recorder: &EventRecorder,
    ) -> Result<TurnResponse, GateError> {
        let message = match outcome {
            TurnOutcome::Expired => "approval expired; nothing was executed",
            TurnOutcome::Cancelled => "approval cancelled; nothing was executed",
            _ => "approval rejected; nothing was executed",
        };
        let mut state: TurnState =
            serde_json::from_value(resolved.checkpoint.serialized_state.clone())
                .map_err(serialization)?;
        state.push_step("terminate", message);
        let last = self.respond(recorder, message).await;
        let response = self
            .terminal_response(resolved, message.to_string(), outcome, state, last)
            .await?;
        self.record_outcome(resolved, &response).await?;
        Ok(response)
    }

    async fn terminal_response(
        &self,
        resolved: &Resolved,
        message: String,
        outcome: TurnOutcome,
        state: TurnState,
        last_sequence_index: Option<u64>,
    ) -> Result<TurnResponse, GateError> {
        let conversation_id = resolved.checkpoint.conversation_id.clone();
        let level = match self.sessions.get(&conversation_id).await? {
            Some(s) => s.automation_level(),
            None => self.sessions.default_level(),
        };
        let mut metadata = TurnMetadata::new(u8::from(level), outcome);
        metadata.action = Some(state.action.kind());
        metadata.classification = Some(state.classification);
        metadata.gate = Some(GateDecision::RequireApproval);
        metadata.risk_level = Some(resolved.approval.risk_level);
        metadata.last_sequence_index = last_sequence_index;
        metadata.steps = state.steps;
        Ok(TurnResponse {
            message,
            conversation_id,
            requires_approval: false,
            approval_request: Some(resolved.approval.clone()),
            resume_token: None,
            metadata,
        })
    }

    async fn record_outcome(
        &self,
        resolved: &Resolved,
        response: &TurnResponse,
    ) -> Result<(), GateError> {
        let value = serde_json::to_value(response).map_err(serialization)?;
        self.coordinator
            .backend()
            .record_outcome(
                &resolved.checkpoint.conversation_id,
                resolved.checkpoint.sequence_index,
                &value,
            )
            .await
    }

    /// Answers a repeated resolve from the recorded outcome.
    async fn replay(
        &self,
        token: &ResumeToken,
        decision: Decision,
        conflict: String,
    ) -> Result<TurnResponse, GateError> {
        let backend = self.coordinator.backend();
        let Some(resolution) = backend
            .resolution(&token.conversation_id, token.sequence_index)
            .await?
        else {
            return Err(GateError::Conflict(conflict));
        };
        if resolution.decision != decision {
            return Err(match resolution.reason {
                ResolutionReason::Timeout => GateError::Timeout(format!(
                    "approval {} expired before it was approved",
                    resolution.approval_id
                )),
                _ => GateError::Conflict(conflict),
            });
        }
        let recorded: Option<Value> = backend
            .outcome(&token.conversation_id, token.sequence_index)
            .await?;
        match recorded {
            Some(value) => {
                debug!(token = %token, "replaying recorded outcome");
                serde_json::from_value(value).map_err(serialization)
            }
            None => Err(GateError::Conflict(conflict)),
        }
    }

    /// The session's pending approval, if any. Reads without taking the conversation lock.
    pub async fn pending_approval(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingApproval>, GateError> {
        let Some(session) = self.sessions.get(conversation_id).await? else {
            return Ok(None);
        };
        let Some(pending) = session.pending_approval_ref else {
            return Ok(None);
        };
        let backend = self.coordinator.backend();
        let Some(checkpoint) = backend
            .checkpoint(conversation_id, pending.checkpoint_index)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(PendingApproval {
            resume_token: backend.create_resume_token(&checkpoint).to_string(),
            expires_at: pending.created_at + self.config.approval_ttl_chrono(),
            approval_request: checkpoint.approval,
        }))
    }

    /// Cancels the pending approval as a rejection. Idempotent: with nothing pending this
    /// is `Ok(None)`.
    pub async fn cancel_approval(
        &self,
        conversation_id: &str,
    ) -> Result<Option<TurnResponse>, GateError> {
        let _guard = self.locks.lock(conversation_id).await;
        let turn = self.emitter.recorder(conversation_id).nested(Phase::Turn);
        match self
            .coordinator
            .cancel(conversation_id, &turn.nested(Phase::Hitl))
            .await?
        {
            Some(resolved) => self
                .finish_unexecuted(&resolved, TurnOutcome::Cancelled, &turn)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Explicitly changes a conversation's automation level. Unmapped codes are
    /// `Configuration` errors and change nothing.
    pub async fn set_automation_level(
        &self,
        conversation_id: &str,
        level: u8,
    ) -> Result<ConversationSession, GateError> {
        let level = AutomationLevel::try_from(level)?;
        let _guard = self.locks.lock(conversation_id).await;
        let mut session = self
            .sessions
            .get_or_create(conversation_id, Utc::now())
            .await?
            .session;
        if let Some(t) = self.sessions.transition_level(&mut session, level).await? {
            self.note_level_change(&self.emitter.recorder(conversation_id), t)
                .await;
        }
        Ok(session)
    }

    /// Persisted reasoning events after `after`.
    pub async fn reasoning_history(
        &self,
        conversation_id: &str,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<ReasoningEvent>, GateError> {
        Ok(self.emitter.history(conversation_id, after, limit).await?)
    }

    /// Lazy feed: the persisted log after `after`, then live events.
    pub fn stream_reasoning(
        &self,
        conversation_id: &str,
        after: Option<u64>,
    ) -> BoxStream<'static, FeedItem> {
        self.emitter.subscribe(conversation_id, after)
    }

    /// Startup scan; see [`InterruptCoordinator::recover`].
    pub async fn recover(&self) -> Result<RecoveryReport, GateError> {
        self.coordinator.recover().await
    }
}
