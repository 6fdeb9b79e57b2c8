//! Gate error taxonomy.
//!
//! Every public operation of the gate returns [`GateError`]. Policy ambiguity never
//! surfaces as an auto-execute: callers that hit [`GateError::Configuration`] while
//! evaluating a gate treat it as `require_approval`.

use thiserror::Error;

use crate::store::StoreError;
use crate::workflow::WorkflowError;

/// Gate error.
#[derive(Debug, Error)]
pub enum GateError {
    /// Unmapped automation level or action classification. Fail-closed to `require_approval`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing or unresolved action context. The action is never queued.
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate pending approval, or resuming an already-resolved token. No state was changed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown or stale checkpoint / resume token. The caller must restart the turn.
    #[error("not found: {0}")]
    NotFound(String),

    /// Approval TTL elapsed; the approval was auto-resolved as rejected.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The workflow requested an action outside the closed action set.
    #[error("unrecognized action requested: {0}")]
    UnrecognizedAction(String),

    /// The workflow failed while executing an action.
    #[error("workflow: {0}")]
    Workflow(String),

    /// Durable store failure. Fatal to the current turn; retry the whole turn.
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
}

impl GateError {
    /// Short machine-readable kind, used in HTTP error bodies and event metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Configuration(_) => "configuration_error",
            GateError::Validation(_) => "validation_error",
            GateError::Conflict(_) => "conflict_error",
            GateError::NotFound(_) => "not_found_error",
            GateError::Timeout(_) => "timeout_error",
            GateError::UnrecognizedAction(_) => "unrecognized_action",
            GateError::Workflow(_) => "workflow_error",
            GateError::Storage(_) => "storage_error",
        }
    }
}

impl From<WorkflowError> for GateError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Unrecognized(msg) => GateError::UnrecognizedAction(msg),
            WorkflowError::Invalid(msg) => GateError::Validation(msg),
            WorkflowError::Execution(msg) => GateError::Workflow(msg),
        }
    }
}
