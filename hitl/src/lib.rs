//! # hitl
//!
//! Human-in-the-loop approval gate for an automated trading assistant. Every proposed
//! action passes an automation policy; actions that need a human are suspended at a durable
//! checkpoint and resumed exactly once when a reviewer decides. Every reasoning step is
//! committed to an ordered per-conversation log and fanned out to live subscribers.
//!
//! ## Main modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`policy`] | Automation levels, action classes, the gate decision table. |
//! | [`action`] | Proposed actions, tool invocations, the rule-based [`IntentRouter`]. |
//! | [`approval`] | Approval requests, risk bands, [`ApprovalRequestBuilder`]. |
//! | [`checkpoint`] | Checkpoints, resume tokens, write-once resolutions. |
//! | [`coordinator`] | Suspend/resume state machine and per-conversation locks. |
//! | [`events`] | [`ReasoningEmitter`] and [`EventRecorder`]. |
//! | [`session`] | Conversation sessions and automation-level transitions. |
//! | [`store`] | [`DurableStore`] with in-memory and SQLite backends. |
//! | [`workflow`] | The [`Workflow`] seam and the bundled [`PaperWorkflow`]. |
//! | [`service`] | [`HitlService`], the exposed operations. |
//! | [`config`] | [`GateConfig`] from `HITL_*` environment variables. |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hitl::{Decision, GateConfig, HitlService, TurnRequest};
//!
//! # async fn run() -> Result<(), hitl::GateError> {
//! let service = HitlService::from_config(GateConfig::default())?;
//! let res = service
//!     .submit_turn(TurnRequest::new("삼성전자 1000만원 매수").in_conversation("c1"))
//!     .await?;
//! if let Some(token) = res.resume_token {
//!     let done = service.resolve_approval(&token, Decision::Approved).await?;
//!     println!("{}", done.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod approval;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod policy;
pub mod service;
pub mod session;
pub mod store;
pub mod workflow;

pub use action::{ActionKind, IntentRouter, ProposedAction, ToolInvocation};
pub use approval::{
    ApprovalRequest, ApprovalRequestBuilder, ApprovalStatus, ApprovalType, Decision, RiskBands,
    RiskLevel, StaticSymbolResolver, SymbolResolver,
};
pub use checkpoint::{BackendKind, Checkpoint, CheckpointBackend, ResumeToken};
pub use config::GateConfig;
pub use coordinator::{InterruptCoordinator, RecoveryReport, TurnPhase};
pub use error::GateError;
pub use events::{EventRecorder, FeedItem, ReasoningEmitter};
pub use policy::{ActionClassification, AutomationLevel, GateDecision, HitlPolicy};
pub use service::{
    HitlService, PendingApproval, SweepReport, TurnMetadata, TurnOutcome, TurnRequest,
    TurnResponse,
};
pub use session::{ConversationSession, SessionStore};
pub use store::{DurableStore, InMemoryStore, SqliteStore, StoreError};
pub use workflow::{ExecutionReport, PaperWorkflow, Workflow, WorkflowError};

pub use reasoning_event::{Actor, Phase, ReasoningEvent, Status};
