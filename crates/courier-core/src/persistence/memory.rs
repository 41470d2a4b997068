//! In-memory implementation of WorkflowStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::workflow::{WorkflowStatus, STATUS_FIELD};

use super::store::{field_as_text, StoreError, StoredWorkflowRow, WorkflowStore};

/// In-memory implementation of WorkflowStore
///
/// Primarily for testing. Non-durable, but provides the same optimistic
/// concurrency semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use courier_core::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// ```
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    tables: RwLock<HashMap<String, HashMap<Uuid, StoredWorkflowRow>>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances stored for a workflow
    pub fn instance_count(&self, workflow_name: &str) -> usize {
        self.tables
            .read()
            .get(workflow_name)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Fetch a single row by id (for test assertions)
    pub fn get(&self, workflow_name: &str, id: Uuid) -> Option<StoredWorkflowRow> {
        self.tables.read().get(workflow_name)?.get(&id).cloned()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn initialize_workflow(
        &self,
        workflow_name: &str,
        mapped_fields: &[&str],
    ) -> Result<(), StoreError> {
        trace!(workflow = %workflow_name, ?mapped_fields, "initializing workflow storage");
        self.tables
            .write()
            .entry(workflow_name.to_string())
            .or_default();
        Ok(())
    }

    async fn load(
        &self,
        workflow_name: &str,
        field: &str,
        key: &str,
        include_completed: bool,
    ) -> Result<Vec<StoredWorkflowRow>, StoreError> {
        let running = serde_json::to_value(WorkflowStatus::Running)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tables = self.tables.read();
        let Some(table) = tables.get(workflow_name) else {
            return Ok(vec![]);
        };

        let mut rows: Vec<StoredWorkflowRow> = table
            .values()
            .filter(|row| field_as_text(&row.data, field).as_deref() == Some(key))
            .filter(|row| include_completed || row.data.get(STATUS_FIELD) == Some(&running))
            .cloned()
            .collect();

        // Deterministic order for tests; ids are time-ordered (v7)
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn save(&self, workflow_name: &str, row: StoredWorkflowRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(workflow_name.to_string()).or_default();

        if row.version == 0 {
            let inserted = StoredWorkflowRow {
                version: 1,
                ..row
            };
            table.insert(inserted.id, inserted);
            return Ok(());
        }

        match table.get_mut(&row.id) {
            Some(existing) if existing.version == row.version => {
                existing.version = row.version + 1;
                existing.data = row.data;
                Ok(())
            }
            _ => Err(StoreError::WorkflowStateNotFound {
                workflow_id: row.id,
                workflow_name: workflow_name.to_string(),
                version: row.version,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: Uuid, version: i32, order_id: &str, status: &str) -> StoredWorkflowRow {
        StoredWorkflowRow {
            id,
            version,
            data: json!({ "$workflowId": id, "$status": status, "order_id": order_id }),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryWorkflowStore::new();
        store.initialize_workflow("orders", &["order_id"]).await.unwrap();

        let id = Uuid::now_v7();
        store.save("orders", row(id, 0, "o-1", "running")).await.unwrap();

        let rows = store.load("orders", "order_id", "o-1", false).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);

        assert!(store.load("orders", "order_id", "o-2", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_fails() {
        let store = InMemoryWorkflowStore::new();
        let id = Uuid::now_v7();
        store.save("orders", row(id, 0, "o-1", "running")).await.unwrap();

        // Row is now at version 1; saving at a stale version must fail
        let result = store.save("orders", row(id, 7, "o-1", "running")).await;
        assert!(matches!(
            result,
            Err(StoreError::WorkflowStateNotFound { version: 7, .. })
        ));

        // Saving at the current version succeeds and bumps it
        store.save("orders", row(id, 1, "o-1", "running")).await.unwrap();
        assert_eq!(store.get("orders", id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_completed_instances_are_filtered() {
        let store = InMemoryWorkflowStore::new();
        let id = Uuid::now_v7();
        store.save("orders", row(id, 0, "o-1", "complete")).await.unwrap();

        assert!(store.load("orders", "order_id", "o-1", false).await.unwrap().is_empty());
        assert_eq!(
            store.load("orders", "order_id", "o-1", true).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_numeric_lookup_key_compares_as_text() {
        let store = InMemoryWorkflowStore::new();
        let id = Uuid::now_v7();
        store
            .save(
                "orders",
                StoredWorkflowRow {
                    id,
                    version: 0,
                    data: json!({ "$status": "running", "order_id": 42 }),
                },
            )
            .await
            .unwrap();

        let rows = store.load("orders", "order_id", "42", false).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
