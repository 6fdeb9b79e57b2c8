//! Conversation-scoped event recorder passed down the call chain.

use reasoning_event::{Actor, EventDraft, Lineage, Phase, ReasoningEvent, Status};
use tracing::warn;

use super::ReasoningEmitter;

/// Records reasoning events for one conversation at one position of the call tree.
///
/// Cloning is cheap. [`nested`](Self::nested) returns a child recorder whose events carry one
/// more lineage frame; the parent is unchanged, so sibling branches never share frames.
#[derive(Clone)]
pub struct EventRecorder {
    emitter: ReasoningEmitter,
    conversation_id: String,
    lineage: Lineage,
    agent: Option<String>,
    node: Option<String>,
}

impl EventRecorder {
    pub(super) fn new(emitter: ReasoningEmitter, conversation_id: String) -> Self {
        Self {
            emitter,
            conversation_id,
            lineage: Lineage::root(),
            agent: None,
            node: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    /// Child recorder one level below, inside `phase`.
    pub fn nested(&self, phase: Phase) -> Self {
        Self {
            lineage: self.lineage.child(phase),
            ..self.clone()
        }
    }

    /// Same position, events attributed to `agent`.
    pub fn with_agent(&self, agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
            ..self.clone()
        }
    }

    /// Same position, events tagged with the workflow step `node`.
    pub fn at_node(&self, node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            ..self.clone()
        }
    }

    /// Draft pre-filled with this recorder's lineage, agent, and node.
    pub fn draft(&self, phase: Phase, status: Status, actor: Actor) -> EventDraft {
        let mut draft = EventDraft::new(phase, status, actor).with_lineage(self.lineage.clone());
        if let Some(agent) = &self.agent {
            draft = draft.with_agent(agent.clone());
        }
        if let Some(node) = &self.node {
            draft = draft.with_node(node.clone());
        }
        draft
    }

    /// Commits `draft`. Delivery is observability only: a failed append is logged, not
    /// surfaced, and yields `None`.
    pub async fn record(&self, draft: EventDraft) -> Option<ReasoningEvent> {
        match self.emitter.emit(&self.conversation_id, draft).await {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "failed to record reasoning event"
                );
                None
            }
        }
    }

    /// Shorthand for a message-only event.
    pub async fn emit(
        &self,
        phase: Phase,
        status: Status,
        actor: Actor,
        message: impl Into<String>,
    ) -> Option<ReasoningEvent> {
        self.record(self.draft(phase, status, actor).with_message(message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn nested_recorders_carry_lineage_and_depth() {
        let emitter = ReasoningEmitter::new(Arc::new(InMemoryStore::new()), 8);
        let root = emitter.recorder("c1");
        let turn = root.nested(Phase::Turn);
        let exec = turn
            .nested(Phase::Execution)
            .with_agent("trader")
            .at_node("execute");

        let a = turn
            .emit(Phase::Turn, Status::Started, Actor::User, "hi")
            .await
            .unwrap();
        let b = exec
            .emit(Phase::Execution, Status::Completed, Actor::Agent, "done")
            .await
            .unwrap();
        let c = root
            .emit(Phase::Session, Status::Progress, Actor::System, "x")
            .await
            .unwrap();

        assert_eq!(a.lineage, vec!["turn"]);
        assert_eq!(a.depth, 1);
        assert_eq!(b.lineage, vec!["turn", "execution"]);
        assert_eq!(b.agent.as_deref(), Some("trader"));
        assert_eq!(b.node.as_deref(), Some("execute"));
        assert_eq!(c.depth, 0);
        assert!(c.agent.is_none());
        assert!(a.node.is_none());
        assert_eq!(
            [a.sequence_index, b.sequence_index, c.sequence_index],
            [0, 1, 2]
        );
    }
}
