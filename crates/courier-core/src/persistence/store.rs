//! WorkflowStore trait definition

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row matched the id + version predicate on save
    ///
    /// Signals an optimistic-concurrency conflict: another writer advanced
    /// the row since it was loaded. The triggering message is returned to
    /// the transport and the step re-runs against current state.
    #[error("workflow state not found: {workflow_name} {workflow_id} at version {version}")]
    WorkflowStateNotFound {
        /// Id of the instance being saved
        workflow_id: Uuid,
        /// Workflow the instance belongs to
        workflow_name: String,
        /// Version the save was predicated on
        version: i32,
    },

    /// Persistence was used without being configured on the bus
    #[error("workflow persistence has not been configured")]
    NotConfigured,

    /// Storage I/O failure
    #[error("database error: {0}")]
    Database(String),

    /// Row could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A persisted workflow instance in its storage shape
///
/// `data` carries the user state fields plus the `$workflowId` and
/// `$status` metadata; `id` and `version` are row-level so the optimistic
/// update predicate does not have to reach into the document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWorkflowRow {
    /// Instance id
    pub id: Uuid,

    /// Version the row was loaded at (0 for a never-saved instance)
    pub version: i32,

    /// State document
    pub data: Value,
}

/// Storage backend for workflow state
///
/// Implementations must be thread-safe; the bus dispatches steps for
/// distinct instances concurrently.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Optional startup hook
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Optional shutdown hook
    async fn dispose(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Ensure storage exists for a workflow and that each mapped lookup
    /// field is efficiently queryable
    async fn initialize_workflow(
        &self,
        workflow_name: &str,
        mapped_fields: &[&str],
    ) -> Result<(), StoreError>;

    /// Load the instances whose `data[field]` equals `key`
    ///
    /// Completed instances are excluded unless `include_completed` is set.
    async fn load(
        &self,
        workflow_name: &str,
        field: &str,
        key: &str,
        include_completed: bool,
    ) -> Result<Vec<StoredWorkflowRow>, StoreError>;

    /// Upsert a workflow instance
    ///
    /// Version 0 inserts the row at version 1. Any other version updates
    /// `WHERE id = row.id AND version = row.version`, setting
    /// `version = row.version + 1`; zero affected rows raises
    /// [`StoreError::WorkflowStateNotFound`].
    async fn save(&self, workflow_name: &str, row: StoredWorkflowRow) -> Result<(), StoreError>;
}

/// Render a document field as the scalar text the lookup key compares
/// against (PostgreSQL `->>` semantics)
pub(crate) fn field_as_text(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
