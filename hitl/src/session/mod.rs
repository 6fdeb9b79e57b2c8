//! Conversation session state: automation policy, checkpoint pointer, pending approval.
//!
//! Sessions are created on first contact, touched every turn, and soft-expired after an
//! inactivity TTL. They are never deleted; an expired session is revived on next access.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GateError;
use crate::policy::{AutomationLevel, HitlPolicy};
use crate::store::{get_json, put_json, DurableStore, RecordKind, StoreKey};

/// Points at the checkpoint whose approval is awaiting a decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApprovalRef {
    pub approval_id: String,
    pub checkpoint_index: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub conversation_id: String,
    pub hitl: HitlPolicy,
    /// Index of the most recent checkpoint written for this conversation.
    #[serde(default)]
    pub current_checkpoint_ref: Option<u64>,
    #[serde(default)]
    pub pending_approval_ref: Option<PendingApprovalRef>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub turn_count: u64,
}

impl ConversationSession {
    pub fn new(
        conversation_id: impl Into<String>,
        level: AutomationLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            hitl: HitlPolicy::new(level),
            current_checkpoint_ref: None,
            pending_approval_ref: None,
            created_at: now,
            last_active_at: now,
            expired_at: None,
            turn_count: 0,
        }
    }

    pub fn automation_level(&self) -> AutomationLevel {
        self.hitl.automation_level
    }

    pub fn is_idle_past(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active_at > ttl
    }
}

/// Result of [`SessionStore::get_or_create`].
#[derive(Clone, Debug)]
pub struct SessionAccess {
    pub session: ConversationSession,
    pub created: bool,
    /// The session had soft-expired and was brought back by this access.
    pub revived: bool,
}

/// An explicit automation-level change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelTransition {
    pub from: AutomationLevel,
    pub to: AutomationLevel,
}

/// Session records over the durable store.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn DurableStore>,
    default_level: AutomationLevel,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn DurableStore>, default_level: AutomationLevel, ttl: Duration) -> Self {
        Self {
            store,
            default_level,
            ttl,
        }
    }

    pub fn default_level(&self) -> AutomationLevel {
        self.default_level
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<ConversationSession>, GateError> {
        Ok(get_json(self.store.as_ref(), &StoreKey::session(conversation_id)).await?)
    }

    pub async fn save(&self, session: &ConversationSession) -> Result<(), GateError> {
        put_json(
            self.store.as_ref(),
            &StoreKey::session(&session.conversation_id),
            session,
        )
        .await?;
        Ok(())
    }

    /// Unknown id: creates a session at the default level. Known id: updates only
    /// `last_active_at`, reviving a soft-expired session.
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionAccess, GateError> {
        let access = match self.get(conversation_id).await? {
            None => {
                debug!(conversation_id, level = %self.default_level, "creating session");
                SessionAccess {
                    session: ConversationSession::new(conversation_id, self.default_level, now),
                    created: true,
                    revived: false,
                }
            }
            Some(mut session) => {
                let revived =
                    session.expired_at.is_some() || session.is_idle_past(self.ttl, now);
                if revived {
                    info!(conversation_id, "reviving expired session");
                    session.expired_at = None;
                }
                session.last_active_at = now;
                SessionAccess {
                    session,
                    created: false,
                    revived,
                }
            }
        };
        self.save(&access.session).await?;
        Ok(access)
    }

    /// Sets the level and persists. `None` when the level is unchanged.
    pub async fn transition_level(
        &self,
        session: &mut ConversationSession,
        level: AutomationLevel,
    ) -> Result<Option<LevelTransition>, GateError> {
        let from = session.automation_level();
        if from == level {
            return Ok(None);
        }
        session.hitl.automation_level = level;
        self.save(session).await?;
        info!(
            conversation_id = %session.conversation_id,
            from = %from,
            to = %level,
            "automation level changed"
        );
        Ok(Some(LevelTransition { from, to: level }))
    }

    /// Marks an idle session expired. Returns whether it changed.
    pub async fn soft_expire(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, GateError> {
        let Some(mut session) = self.get(conversation_id).await? else {
            return Ok(false);
        };
        if session.expired_at.is_some() || !session.is_idle_past(self.ttl, now) {
            return Ok(false);
        }
        session.expired_at = Some(now);
        self.save(&session).await?;
        debug!(conversation_id, "session soft-expired");
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<String>, GateError> {
        Ok(self.store.conversations(RecordKind::Session).await?)
    }
}
