//! Request and response shapes of the exposed operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::approval::{ApprovalRequest, RiskLevel};
use crate::policy::{ActionClassification, GateDecision};
use crate::workflow::StepRecord;

/// Input of `submit_turn`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Omitted on first contact; a new id is minted.
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
    /// Raw level code (1 Pilot, 2 Copilot, 3 Advisor). A different valid level is an explicit
    /// transition; an unmapped code fails the turn closed.
    #[serde(default)]
    pub automation_level: Option<u8>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn at_level(mut self, level: u8) -> Self {
        self.automation_level = Some(level);
        self
    }
}

/// How a turn, or its approval, ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Executed,
    AwaitingApproval,
    Rejected,
    Cancelled,
    Expired,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub automation_level: u8,
    pub outcome: TurnOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ActionClassification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// The gate failed closed on an unmapped input.
    #[serde(default)]
    pub fail_closed: bool,
    /// Last reasoning event of this turn; stream from here to follow up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence_index: Option<u64>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl TurnMetadata {
    pub fn new(automation_level: u8, outcome: TurnOutcome) -> Self {
        Self {
            automation_level,
            outcome,
            action: None,
            classification: None,
            gate: None,
            risk_level: None,
            fail_closed: false,
            last_sequence_index: None,
            steps: Vec::new(),
        }
    }
}

/// Output of `submit_turn` and `resolve_approval`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub message: String,
    pub conversation_id: String,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<ApprovalRequest>,
    /// Present while `requires_approval`; pass it to `resolve_approval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    pub metadata: TurnMetadata,
}

/// A pending approval as seen by a poller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_request: ApprovalRequest,
    pub resume_token: String,
    pub expires_at: DateTime<Utc>,
}
