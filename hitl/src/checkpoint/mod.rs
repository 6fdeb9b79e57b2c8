//! Checkpoint backend: a stable interface over whichever durable store is configured.
//!
//! The coordinator talks only to [`CheckpointBackend`] (persist a checkpoint, mint a resume
//! token, load the checkpoint a token points at) plus the write-once resolution and outcome
//! records that make resume exactly-once. [`StoreCheckpointBackend`] implements it over any
//! [`DurableStore`]; the concrete store is picked once from [`BackendKind`], never switched at
//! runtime.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::{ApprovalRequest, ApprovalStatus, Decision};
use crate::error::GateError;
use crate::store::{
    get_json, put_json, DurableStore, InMemoryStore, RecordKind, SqliteStore, StoreError, StoreKey,
};

/// Immutable snapshot of a suspended turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub conversation_id: String,
    pub sequence_index: u64,
    pub serialized_state: Value,
    /// The approval as it was when the turn suspended (always `pending`).
    pub approval: ApprovalRequest,
    pub resume_nonce: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque handle to one checkpoint: `<conversation_id>.<sequence_index>.<nonce>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResumeToken {
    pub conversation_id: String,
    pub sequence_index: u64,
    pub nonce: String,
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.conversation_id, self.sequence_index, self.nonce
        )
    }
}

impl FromStr for ResumeToken {
    type Err = GateError;

    /// A token that does not parse cannot name a checkpoint, so it is `NotFound`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let not_found = || GateError::NotFound(format!("unknown resume token {s:?}"));
        let mut parts = s.rsplitn(3, '.');
        let nonce = parts.next().filter(|n| !n.is_empty()).ok_or_else(not_found)?;
        let seq = parts
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(not_found)?;
        let conversation_id = parts.next().filter(|c| !c.is_empty()).ok_or_else(not_found)?;
        Ok(ResumeToken {
            conversation_id: conversation_id.to_string(),
            sequence_index: seq,
            nonce: nonce.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    /// A reviewer decided.
    Reviewer,
    /// The approval was cancelled.
    Cancelled,
    /// The approval TTL elapsed.
    Timeout,
    /// Dropped during recovery because its session or checkpoint half was missing.
    Discarded,
}

/// Write-once record of how a checkpoint's approval ended. First writer wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub approval_id: String,
    pub decision: Decision,
    pub status: ApprovalStatus,
    pub reason: ResolutionReason,
    pub resolved_at: DateTime<Utc>,
}

/// Durable checkpoint interface used by the coordinator.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Commits `checkpoint`. Returns only after the write is durable.
    async fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), GateError>;

    fn create_resume_token(&self, checkpoint: &Checkpoint) -> ResumeToken {
        ResumeToken {
            conversation_id: checkpoint.conversation_id.clone(),
            sequence_index: checkpoint.sequence_index,
            nonce: checkpoint.resume_nonce.clone(),
        }
    }

    /// Loads the checkpoint a token names. Missing checkpoint or wrong nonce is `NotFound`.
    async fn resume_from_checkpoint(&self, token: &ResumeToken) -> Result<Checkpoint, GateError>;

    async fn checkpoint(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Checkpoint>, GateError>;

    async fn latest_checkpoint(&self, conversation_id: &str)
        -> Result<Option<Checkpoint>, GateError>;

    /// Writes the resolution for a checkpoint. A second write is `Conflict`.
    async fn record_resolution(
        &self,
        conversation_id: &str,
        sequence_index: u64,
        resolution: &Resolution,
    ) -> Result<(), GateError>;

    async fn resolution(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Resolution>, GateError>;

    /// Stores the terminal turn result for replay. A second write is `Conflict`.
    async fn record_outcome(
        &self,
        conversation_id: &str,
        sequence_index: u64,
        outcome: &Value,
    ) -> Result<(), GateError>;

    async fn outcome(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Value>, GateError>;
}

fn conflict_on_exists(err: StoreError) -> GateError {
    match err {
        StoreError::AlreadyExists(key) => GateError::Conflict(format!("{key} already written")),
        other => GateError::Storage(other),
    }
}

/// [`CheckpointBackend`] over a [`DurableStore`].
#[derive(Clone)]
pub struct StoreCheckpointBackend {
    store: Arc<dyn DurableStore>,
}

impl StoreCheckpointBackend {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckpointBackend for StoreCheckpointBackend {
    async fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), GateError> {
        let key = StoreKey::new(
            &checkpoint.conversation_id,
            RecordKind::Checkpoint,
            checkpoint.sequence_index,
        );
        put_json(self.store.as_ref(), &key, checkpoint)
            .await
            .map_err(conflict_on_exists)
    }

    async fn resume_from_checkpoint(&self, token: &ResumeToken) -> Result<Checkpoint, GateError> {
        let checkpoint = self
            .checkpoint(&token.conversation_id, token.sequence_index)
            .await?
            .filter(|cp| cp.resume_nonce == token.nonce)
            .ok_or_else(|| GateError::NotFound(format!("no checkpoint for token {token}")))?;
        Ok(checkpoint)
    }

    async fn checkpoint(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Checkpoint>, GateError> {
        let key = StoreKey::new(conversation_id, RecordKind::Checkpoint, sequence_index);
        Ok(get_json(self.store.as_ref(), &key).await?)
    }

    async fn latest_checkpoint(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Checkpoint>, GateError> {
        match self
            .store
            .last_index(conversation_id, RecordKind::Checkpoint)
            .await?
        {
            Some(idx) => self.checkpoint(conversation_id, idx).await,
            None => Ok(None),
        }
    }

    async fn record_resolution(
        &self,
        conversation_id: &str,
        sequence_index: u64,
        resolution: &Resolution,
    ) -> Result<(), GateError> {
        let key = StoreKey::new(conversation_id, RecordKind::Resolution, sequence_index);
        put_json(self.store.as_ref(), &key, resolution)
            .await
            .map_err(conflict_on_exists)
    }

    async fn resolution(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Resolution>, GateError> {
        let key = StoreKey::new(conversation_id, RecordKind::Resolution, sequence_index);
        Ok(get_json(self.store.as_ref(), &key).await?)
    }

    async fn record_outcome(
        &self,
        conversation_id: &str,
        sequence_index: u64,
        outcome: &Value,
    ) -> Result<(), GateError> {
        let key = StoreKey::new(conversation_id, RecordKind::Outcome, sequence_index);
        put_json(self.store.as_ref(), &key, outcome)
            .await
            .map_err(conflict_on_exists)
    }

    async fn outcome(
        &self,
        conversation_id: &str,
        sequence_index: u64,
    ) -> Result<Option<Value>, GateError> {
        let key = StoreKey::new(conversation_id, RecordKind::Outcome, sequence_index);
        Ok(get_json(self.store.as_ref(), &key).await?)
    }
}

/// Durable backend selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(GateError::Configuration(format!("unknown backend {other:?}"))),
        }
    }
}

/// Opens the durable store for `kind`. `sqlite_path` is ignored for the memory backend.
pub fn open_store(kind: BackendKind, sqlite_path: &Path) -> Result<Arc<dyn DurableStore>, GateError> {
    let store: Arc<dyn DurableStore> = match kind {
        BackendKind::Memory => Arc::new(InMemoryStore::new()),
        BackendKind::Sqlite => Arc::new(SqliteStore::new(sqlite_path)?),
    };
    Ok(store)
}
