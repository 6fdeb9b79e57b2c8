//! In-memory durable store. Not persistent; for dev and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DurableStore, RecordKind, StoreError, StoreKey};

type Records = HashMap<(String, RecordKind), BTreeMap<u64, Vec<u8>>>;

/// In-memory store. Key: (conversation_id, kind); each has an ordered index -> blob map.
///
/// "Committed" means visible to every later reader of this instance.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Records>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put(&self, key: &StoreKey, blob: Vec<u8>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let records = guard
            .entry((key.conversation_id.clone(), key.kind))
            .or_default();
        if key.kind.is_write_once() && records.contains_key(&key.sequence_index) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        records.insert(key.sequence_index, blob);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        let guard = self.inner.read().await;
        guard
            .get(&(key.conversation_id.clone(), key.kind))
            .and_then(|records| records.get(&key.sequence_index))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn scan(
        &self,
        conversation_id: &str,
        kind: RecordKind,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let guard = self.inner.read().await;
        let Some(records) = guard.get(&(conversation_id.to_string(), kind)) else {
            return Ok(Vec::new());
        };
        let iter = records
            .iter()
            .filter(|(idx, _)| after.map_or(true, |a| **idx > a))
            .map(|(idx, blob)| (*idx, blob.clone()));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn last_index(
        &self,
        conversation_id: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(&(conversation_id.to_string(), kind))
            .and_then(|records| records.keys().next_back().copied()))
    }

    async fn conversations(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        let mut ids: Vec<String> = guard
            .iter()
            .filter(|((_, k), records)| *k == kind && !records.is_empty())
            .map(|((id, _), _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
