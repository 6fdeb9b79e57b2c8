//! Workflow seam: the engine that routes a message to an action and executes it.
//!
//! The gate does not own the multi-agent graph. It calls [`Workflow::route`] once per turn
//! and [`Workflow::execute`] once per action that passes the gate (immediately, or after
//! approval on resume). Steps taken before a suspension are recorded in [`TurnState`] and
//! never re-run.

mod paper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ProposedAction, ToolInvocation};
use crate::events::EventRecorder;
use crate::policy::ActionClassification;

pub use paper::PaperWorkflow;

/// Error raised by a workflow implementation.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The message or tool call maps onto no known action.
    #[error("unrecognized: {0}")]
    Unrecognized(String),
    /// Arguments are missing or malformed.
    #[error("invalid: {0}")]
    Invalid(String),
    /// The action was accepted but failed while running.
    #[error("execution: {0}")]
    Execution(String),
}

/// Result of executing one action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// User-facing summary.
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// One completed step of a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub node: String,
    pub summary: String,
}

impl StepRecord {
    pub fn new(node: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            summary: summary.into(),
        }
    }
}

/// In-flight turn state. This is what a checkpoint snapshots at the gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    pub message: String,
    pub invocation: ToolInvocation,
    pub action: ProposedAction,
    pub classification: ActionClassification,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl TurnState {
    pub fn push_step(&mut self, node: impl Into<String>, summary: impl Into<String>) {
        self.steps.push(StepRecord::new(node, summary));
    }
}

/// Workflow engine driven by the gate.
///
/// **Interaction**: Injected into [`HitlService`](crate::HitlService); `recorder` carries the
/// conversation and lineage so implementations emit nested reasoning events.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Decides which tool this message calls. Unknown intents fail with
    /// [`WorkflowError::Unrecognized`].
    async fn route(
        &self,
        message: &str,
        recorder: &EventRecorder,
    ) -> Result<ToolInvocation, WorkflowError>;

    /// Runs an action that passed the gate.
    async fn execute(
        &self,
        action: &ProposedAction,
        recorder: &EventRecorder,
    ) -> Result<ExecutionReport, WorkflowError>;
}
