//! Reasoning event types: phase + status + actor, plus the sealed event record.
//!
//! An [`EventDraft`] is what a recorder builds; the emitter seals it into a
//! [`ReasoningEvent`] once a sequence index has been assigned for the conversation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lineage::Lineage;

/// Orchestration phase an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// One user turn, from message intake to final response.
    Turn,
    /// Session bookkeeping (creation, automation level transitions, revival).
    Session,
    /// Turning the user message into a proposed action.
    Routing,
    /// Automation policy evaluation at a gate.
    Policy,
    /// Human-in-the-loop suspend / resume / terminate.
    Hitl,
    /// Executing the (approved or auto) action.
    Execution,
    /// Producing the final response text.
    Response,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Turn => "turn",
            Phase::Session => "session",
            Phase::Routing => "routing",
            Phase::Policy => "policy",
            Phase::Hitl => "hitl",
            Phase::Execution => "execution",
            Phase::Response => "response",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the step an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Started,
    Progress,
    Completed,
    Failed,
    Suspended,
    Resumed,
    Terminated,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Started => "started",
            Status::Progress => "progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Suspended => "suspended",
            Status::Resumed => "resumed",
            Status::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The end user sending a message.
    User,
    /// The human reviewer deciding an approval.
    Reviewer,
    /// The orchestrating supervisor (routing, gating).
    Supervisor,
    /// A domain agent inside the workflow.
    Agent,
    /// The gate itself or background maintenance (sweeps, recovery).
    System,
}

/// An event before it is committed: everything except identity and ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub phase: Phase,
    pub status: Status,
    pub actor: Actor,
    pub agent: Option<String>,
    pub node: Option<String>,
    pub lineage: Lineage,
    pub message: Option<String>,
    pub metadata: Map<String, Value>,
}

impl EventDraft {
    pub fn new(phase: Phase, status: Status, actor: Actor) -> Self {
        Self {
            phase,
            status,
            actor,
            agent: None,
            node: None,
            lineage: Lineage::root(),
            message: None,
            metadata: Map::new(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_lineage(mut self, lineage: Lineage) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds one metadata entry. Later entries with the same key win.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Seals the draft into a committed event record.
    pub fn seal(
        self,
        conversation_id: impl Into<String>,
        sequence_index: u64,
        event_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> ReasoningEvent {
        ReasoningEvent {
            event_id: event_id.into(),
            sequence_index,
            conversation_id: conversation_id.into(),
            timestamp,
            phase: self.phase,
            status: self.status,
            actor: self.actor,
            agent: self.agent,
            node: self.node,
            depth: self.lineage.depth(),
            lineage: self.lineage.labels(),
            message: self.message,
            metadata: self.metadata,
        }
    }
}

/// One committed reasoning event.
///
/// `sequence_index` is strictly increasing and gapless per `conversation_id`.
/// `lineage` lists the enclosing phase frames from the root of the call tree, innermost
/// last; the frame the event was emitted from is included (see [`Lineage`]), so
/// `depth == lineage.len()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEvent {
    pub event_id: String,
    pub sequence_index: u64,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub status: Status,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub depth: u32,
    pub lineage: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ReasoningEvent {
    /// Event name used for framing, e.g. `hitl.suspended`.
    pub fn event_name(&self) -> String {
        format!("{}.{}", self.phase, self.status)
    }

    /// Serializes this event to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
