//! # Store: durable key-value records keyed by (conversation_id, kind, sequence_index)
//!
//! The durable store backs checkpoints, approval resolutions, turn outcomes, the
//! reasoning-event log, and session records. No schema is mandated beyond the key.
//!
//! ## Write semantics
//!
//! | Kind | Semantics | Why it matters |
//! |------|-----------|----------------|
//! | [`RecordKind::Checkpoint`] | write-once | checkpoints are immutable |
//! | [`RecordKind::Resolution`] | write-once | first decision wins; a second one is a conflict |
//! | [`RecordKind::Outcome`] | write-once | replayed on duplicate `resolve_approval` |
//! | [`RecordKind::Event`] | write-once | append-only reasoning log |
//! | [`RecordKind::Session`] | overwrite | session metadata changes every turn |
//!
//! `put` returns only after the write is committed.
//!
//! ## Implementations
//!
//! | Type | Persistence | Use case |
//! |------|-------------|----------|
//! | [`InMemoryStore`] | In-memory | Dev, tests |
//! | [`SqliteStore`] | SQLite file | Single-node, production |

mod in_memory;
mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Record family stored under a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Session,
    Checkpoint,
    Resolution,
    Outcome,
    Event,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Checkpoint => "checkpoint",
            RecordKind::Resolution => "resolution",
            RecordKind::Outcome => "outcome",
            RecordKind::Event => "event",
        }
    }

    /// Whether an existing key must be rejected instead of overwritten.
    pub fn is_write_once(&self) -> bool {
        !matches!(self, RecordKind::Session)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub conversation_id: String,
    pub kind: RecordKind,
    pub sequence_index: u64,
}

impl StoreKey {
    pub fn new(conversation_id: impl Into<String>, kind: RecordKind, sequence_index: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind,
            sequence_index,
        }
    }

    /// Session records live at index 0 of their kind.
    pub fn session(conversation_id: impl Into<String>) -> Self {
        Self::new(conversation_id, RecordKind::Session, 0)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.conversation_id, self.kind, self.sequence_index
        )
    }
}

/// Error type for durable store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Durable blob store keyed by (conversation_id, kind, sequence_index).
///
/// **Interaction**: Shared as `Arc<dyn DurableStore>` by the checkpoint backend, the
/// reasoning emitter, and the session store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Writes `blob` under `key`; committed before returning. Write-once kinds fail with
    /// [`StoreError::AlreadyExists`] when the key is taken.
    async fn put(&self, key: &StoreKey, blob: Vec<u8>) -> Result<(), StoreError>;

    /// Reads the blob under `key`, or [`StoreError::NotFound`].
    async fn get(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError>;

    /// Records of one kind for a conversation with index strictly greater than `after`,
    /// ascending, at most `limit`.
    async fn scan(
        &self,
        conversation_id: &str,
        kind: RecordKind,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError>;

    /// Highest index written for (conversation, kind).
    async fn last_index(
        &self,
        conversation_id: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>, StoreError>;

    /// Conversation ids that have at least one record of `kind`.
    async fn conversations(&self, kind: RecordKind) -> Result<Vec<String>, StoreError>;
}

/// Serializes `value` as JSON and writes it under `key`.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &StoreKey,
    value: &T,
) -> Result<(), StoreError> {
    let blob = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.put(key, blob).await
}

/// Reads and deserializes the JSON record under `key`; `Ok(None)` when absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &StoreKey,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await {
        Ok(blob) => decode(&blob).map(Some),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decodes one JSON blob.
pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(blob).map_err(|e| StoreError::Serialization(e.to_string()))
}
