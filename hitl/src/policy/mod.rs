//! Automation policy: (automation level, action classification) → auto-execute or require approval.
//!
//! This module provides **only** types and pure functions: no I/O, no state. The service
//! classifies a proposed action, then asks [`HitlPolicy::decide`] (or [`evaluate`] directly)
//! whether the gate opens.
//!
//! | Level | read-only | mutating-low-risk | mutating-high-risk |
//! |---|---|---|---|
//! | Pilot | auto | auto | require approval |
//! | Copilot | auto | require approval | require approval |
//! | Advisor | auto | require approval | require approval |
//!
//! Inputs arriving as raw wire values go through [`evaluate_raw`]; anything unmapped is a
//! [`GateError::Configuration`], and [`evaluate_fail_closed`] turns that into
//! [`GateDecision::RequireApproval`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::ActionKind;
use crate::error::GateError;

/// Per-conversation autonomy before approval is required.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AutomationLevel {
    Pilot = 1,
    Copilot = 2,
    Advisor = 3,
}

impl AutomationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationLevel::Pilot => "pilot",
            AutomationLevel::Copilot => "copilot",
            AutomationLevel::Advisor => "advisor",
        }
    }
}

impl TryFrom<u8> for AutomationLevel {
    type Error = GateError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(AutomationLevel::Pilot),
            2 => Ok(AutomationLevel::Copilot),
            3 => Ok(AutomationLevel::Advisor),
            other => Err(GateError::Configuration(format!(
                "unmapped automation level {other}"
            ))),
        }
    }
}

impl From<AutomationLevel> for u8 {
    fn from(level: AutomationLevel) -> Self {
        level as u8
    }
}

impl fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consequence class of a proposed action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionClassification {
    ReadOnly,
    MutatingLowRisk,
    MutatingHighRisk,
}

impl ActionClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClassification::ReadOnly => "read-only",
            ActionClassification::MutatingLowRisk => "mutating-low-risk",
            ActionClassification::MutatingHighRisk => "mutating-high-risk",
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, ActionClassification::ReadOnly)
    }
}

impl FromStr for ActionClassification {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(ActionClassification::ReadOnly),
            "mutating-low-risk" => Ok(ActionClassification::MutatingLowRisk),
            "mutating-high-risk" => Ok(ActionClassification::MutatingHighRisk),
            other => Err(GateError::Configuration(format!(
                "unmapped action classification {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ActionClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a gate evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    AutoExecute,
    RequireApproval,
}

impl GateDecision {
    pub fn requires_approval(&self) -> bool {
        matches!(self, GateDecision::RequireApproval)
    }
}

/// The policy table. Pure and total over the typed inputs.
pub fn evaluate(level: AutomationLevel, classification: ActionClassification) -> GateDecision {
    use ActionClassification::*;
    use AutomationLevel::*;
    match (level, classification) {
        (_, ReadOnly) => GateDecision::AutoExecute,
        (Pilot, MutatingLowRisk) => GateDecision::AutoExecute,
        // Safety floor: high-risk mutations need a human at every level.
        (_, MutatingHighRisk) => GateDecision::RequireApproval,
        (Copilot | Advisor, MutatingLowRisk) => GateDecision::RequireApproval,
    }
}

/// Evaluates raw wire inputs. Unmapped values fail with [`GateError::Configuration`].
pub fn evaluate_raw(level: u8, classification: &str) -> Result<GateDecision, GateError> {
    let level = AutomationLevel::try_from(level)?;
    let classification = ActionClassification::from_str(classification)?;
    Ok(evaluate(level, classification))
}

/// Like [`evaluate_raw`] but never fails: any configuration error yields `RequireApproval`.
pub fn evaluate_fail_closed(level: u8, classification: &str) -> GateDecision {
    match evaluate_raw(level, classification) {
        Ok(decision) => decision,
        Err(e) => {
            warn!(level, classification, error = %e, "gate input unmapped; failing closed");
            GateDecision::RequireApproval
        }
    }
}

/// Session-scoped HITL configuration: automation level plus per-action overrides.
///
/// Overrides only tighten the table: an overridden action kind always requires approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlPolicy {
    pub automation_level: AutomationLevel,
    #[serde(default)]
    pub require_approval_for: BTreeSet<ActionKind>,
}

impl HitlPolicy {
    pub fn new(automation_level: AutomationLevel) -> Self {
        Self {
            automation_level,
            require_approval_for: BTreeSet::new(),
        }
    }

    pub fn with_override(mut self, kind: ActionKind) -> Self {
        self.require_approval_for.insert(kind);
        self
    }

    pub fn decide(&self, kind: ActionKind, classification: ActionClassification) -> GateDecision {
        if self.require_approval_for.contains(&kind) {
            return GateDecision::RequireApproval;
        }
        evaluate(self.automation_level, classification)
    }
}
