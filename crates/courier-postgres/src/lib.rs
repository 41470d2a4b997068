//! PostgreSQL implementation of the Courier workflow store
//!
//! Production persistence using PostgreSQL with:
//! - One table per workflow: `id UUID PRIMARY KEY, version INTEGER, data JSONB`
//! - An expression index on `data->>field` for each mapped lookup field
//! - Optimistic concurrency via the `(id, version)` update predicate
//!
//! # Example
//!
//! ```ignore
//! use courier_postgres::PostgresWorkflowStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/courier").await?;
//! let store = PostgresWorkflowStore::new(pool);
//! ```

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use courier_core::persistence::{StoreError, StoredWorkflowRow, WorkflowStore};
use courier_core::workflow::{WorkflowStatus, STATUS_FIELD};

/// PostgreSQL implementation of [`WorkflowStore`]
///
/// Uses a connection pool for efficient database access. Storage for each
/// workflow is created by `initialize_workflow`, so no migration step is
/// required.
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Reduce a name to a safe SQL identifier fragment
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Render a workflow name as its table identifier
fn table_name(workflow_name: &str) -> String {
    format!("workflow_{}", sanitize(workflow_name))
}

/// Quote a field name for embedding in an index expression
fn quote_literal(field: &str) -> String {
    field.replace('\'', "''")
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn dispose(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn initialize_workflow(
        &self,
        workflow_name: &str,
        mapped_fields: &[&str],
    ) -> Result<(), StoreError> {
        let table = table_name(workflow_name);

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                version INTEGER NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create workflow table: {}", e);
            StoreError::Database(e.to_string())
        })?;

        for field in mapped_fields {
            let index = format!("idx_{table}_{}", sanitize(field));
            let literal = quote_literal(field);
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {table} ((data->>'{literal}'))",
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create lookup index: {}", e);
                StoreError::Database(e.to_string())
            })?;
        }

        debug!(%workflow_name, %table, "workflow storage ready");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(
        &self,
        workflow_name: &str,
        field: &str,
        key: &str,
        include_completed: bool,
    ) -> Result<Vec<StoredWorkflowRow>, StoreError> {
        let table = table_name(workflow_name);
        let sql = if include_completed {
            format!(
                "SELECT id, version, data FROM {table} WHERE data->>$1 = $2 ORDER BY id"
            )
        } else {
            format!(
                "SELECT id, version, data FROM {table} \
                 WHERE data->>$1 = $2 AND data->>$3 = $4 ORDER BY id"
            )
        };

        let mut query = sqlx::query(&sql).bind(field).bind(key);
        if !include_completed {
            query = query
                .bind(STATUS_FIELD)
                .bind(WorkflowStatus::Running.to_string());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            error!("Failed to load workflow state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|row| StoredWorkflowRow {
                id: row.get("id"),
                version: row.get("version"),
                data: row.get("data"),
            })
            .collect())
    }

    #[instrument(skip(self, row), fields(workflow_id = %row.id, version = row.version))]
    async fn save(&self, workflow_name: &str, row: StoredWorkflowRow) -> Result<(), StoreError> {
        let table = table_name(workflow_name);

        if row.version == 0 {
            sqlx::query(&format!(
                "INSERT INTO {table} (id, version, data) VALUES ($1, 1, $2)",
            ))
            .bind(row.id)
            .bind(&row.data)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to insert workflow state: {}", e);
                StoreError::Database(e.to_string())
            })?;

            debug!(workflow_id = %row.id, "inserted workflow state");
            return Ok(());
        }

        let result = sqlx::query(&format!(
            "UPDATE {table} SET version = version + 1, data = $2 \
             WHERE id = $1 AND version = $3",
        ))
        .bind(row.id)
        .bind(&row.data)
        .bind(row.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update workflow state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowStateNotFound {
                workflow_id: row.id,
                workflow_name: workflow_name.to_string(),
                version: row.version,
            });
        }

        debug!(workflow_id = %row.id, new_version = row.version + 1, "updated workflow state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_sanitizes() {
        assert_eq!(table_name("order-fulfillment"), "workflow_order_fulfillment");
        assert_eq!(table_name("Orders.V2"), "workflow_orders_v2");
        assert_eq!(
            table_name("x'; DROP TABLE users; --"),
            "workflow_x___drop_table_users____"
        );
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("order_id"), "order_id");
        assert_eq!(quote_literal("o'id"), "o''id");
    }
}
