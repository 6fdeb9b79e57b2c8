//! Approval requests: the structured payload a human reviews before a gated action runs.
//!
//! [`ApprovalRequestBuilder`] turns a [`ProposedAction`](crate::action::ProposedAction) into
//! an immutable [`ApprovalRequest`] with a deterministic [`RiskLevel`]. Building has no
//! persistence side effect; the coordinator owns durability.

mod builder;
mod risk;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;

pub use builder::{ApprovalRequestBuilder, StaticSymbolResolver, SymbolResolver};
pub use risk::{RiskBands, RiskLevel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    TradeExecution,
    PortfolioRebalance,
    /// A read-only action gated only because the gate failed closed.
    InformationRequest,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::TradeExecution => "trade_execution",
            ApprovalType::PortfolioRebalance => "portfolio_rebalance",
            ApprovalType::InformationRequest => "information_request",
        }
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle: `pending` → `approved | rejected | expired`, terminal thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        matches!(self, ApprovalStatus::Pending) && next.is_terminal()
    }
}

/// A reviewer's decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn status(&self) -> ApprovalStatus {
        match self {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(GateError::Validation(format!("unknown decision {other:?}"))),
        }
    }
}

/// Structured, risk-scored approval payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub risk_level: RiskLevel,
    pub fields: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}

impl ApprovalRequest {
    /// Returns a copy in state `next`. Only `pending` may move, and only to a terminal state.
    pub fn transition(&self, next: ApprovalStatus) -> Result<ApprovalRequest, GateError> {
        if !self.status.can_transition_to(next) {
            return Err(GateError::Conflict(format!(
                "approval {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        Ok(ApprovalRequest {
            status: next,
            ..self.clone()
        })
    }
}
