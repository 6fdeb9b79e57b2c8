//! Shared fixtures for gate integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hitl::events::EventRecorder;
use hitl::store::{RecordKind, StoreKey};
use hitl::{
    DurableStore, ExecutionReport, GateConfig, HitlService, InMemoryStore, PaperWorkflow,
    ProposedAction, StaticSymbolResolver, StoreError, ToolInvocation, Workflow, WorkflowError,
};

pub fn service() -> HitlService {
    service_with(GateConfig::default())
}

pub fn service_with(config: GateConfig) -> HitlService {
    HitlService::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(PaperWorkflow::krx_demo()),
        Arc::new(StaticSymbolResolver::krx_defaults()),
    )
}

/// Wraps [`PaperWorkflow`] and counts calls, to prove resumed turns skip routing.
pub struct CountingWorkflow {
    inner: PaperWorkflow,
    pub routes: AtomicUsize,
    pub executions: AtomicUsize,
}

impl CountingWorkflow {
    pub fn new() -> Self {
        Self {
            inner: PaperWorkflow::krx_demo(),
            routes: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn routes(&self) -> usize {
        self.routes.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Workflow for CountingWorkflow {
    async fn route(
        &self,
        message: &str,
        recorder: &EventRecorder,
    ) -> Result<ToolInvocation, WorkflowError> {
        self.routes.fetch_add(1, Ordering::SeqCst);
        self.inner.route(message, recorder).await
    }

    async fn execute(
        &self,
        action: &ProposedAction,
        recorder: &EventRecorder,
    ) -> Result<ExecutionReport, WorkflowError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(action, recorder).await
    }
}

/// In-memory store whose checkpoint writes can be made to fail, as a full disk would.
#[derive(Default)]
pub struct FailingCheckpointStore {
    inner: InMemoryStore,
    fail: AtomicBool,
}

impl FailingCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for FailingCheckpointStore {
    async fn put(&self, key: &StoreKey, blob: Vec<u8>) -> Result<(), StoreError> {
        if key.kind == RecordKind::Checkpoint && self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Storage(format!("{key}: disk full")));
        }
        self.inner.put(key, blob).await
    }

    async fn get(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }

    async fn scan(
        &self,
        conversation_id: &str,
        kind: RecordKind,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        self.inner.scan(conversation_id, kind, after, limit).await
    }

    async fn last_index(
        &self,
        conversation_id: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>, StoreError> {
        self.inner.last_index(conversation_id, kind).await
    }

    async fn conversations(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        self.inner.conversations(kind).await
    }
}
