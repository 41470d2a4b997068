//! Workflow state model

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::persistence::StoredWorkflowRow;
use crate::serializer::{to_class, to_plain, SerializationError};

/// Document field carrying the instance id inside the stored state
pub const WORKFLOW_ID_FIELD: &str = "$workflowId";

/// Document field carrying the status inside the stored state
pub const STATUS_FIELD: &str = "$status";

/// User-defined workflow state
///
/// Implementors are plain serde structs; `NAME` identifies the workflow's
/// storage and must be unique across the application. `Default` supplies
/// the fresh instance handed to initializer steps.
///
/// # Example
///
/// ```
/// use courier_core::WorkflowState;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct OrderFulfillment {
///     order_id: String,
///     paid: bool,
/// }
///
/// impl WorkflowState for OrderFulfillment {
///     const NAME: &'static str = "order-fulfillment";
/// }
/// ```
pub trait WorkflowState:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// Unique name identifying this workflow's state type and storage
    const NAME: &'static str;
}

/// Lifecycle status of a workflow instance
///
/// `Discard` is a step-result sentinel only and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Instance is live and matched by active-state lookups
    Running,

    /// Instance reached its terminal state; excluded from active lookups
    Complete,

    /// Sentinel meaning "ignore this step's output"
    Discard,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Discard => write!(f, "discard"),
        }
    }
}

/// A workflow instance: user state plus persistence metadata
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInstance<S> {
    /// Instance id, assigned at creation, immutable
    pub workflow_id: Uuid,

    /// Version the instance was loaded at; 0 before the first save. The
    /// store increments it on every successful save.
    pub version: i32,

    /// Current status
    pub status: WorkflowStatus,

    /// User-defined state
    pub state: S,
}

impl<S: WorkflowState> WorkflowInstance<S> {
    /// Fresh instance for an initializer step: new id, running, unsaved
    pub fn started() -> Self {
        Self {
            workflow_id: Uuid::now_v7(),
            version: 0,
            status: WorkflowStatus::Running,
            state: S::default(),
        }
    }

    /// Encode into storage shape, merging metadata into the document
    pub fn to_row(&self) -> Result<StoredWorkflowRow, SerializationError> {
        let mut data = to_plain(&self.state)?;
        let Value::Object(map) = &mut data else {
            return Err(SerializationError::NotAnObject);
        };
        map.insert(
            WORKFLOW_ID_FIELD.to_string(),
            Value::String(self.workflow_id.to_string()),
        );
        map.insert(STATUS_FIELD.to_string(), to_plain(&self.status)?);

        Ok(StoredWorkflowRow {
            id: self.workflow_id,
            version: self.version,
            data,
        })
    }

    /// Decode from storage shape
    ///
    /// The row-level `id` and `version` are authoritative; the metadata
    /// fields are stripped from the document before decoding the state.
    pub fn from_row(row: StoredWorkflowRow) -> Result<Self, SerializationError> {
        let mut data = row.data;
        let status = match &mut data {
            Value::Object(map) => {
                map.remove(WORKFLOW_ID_FIELD);
                map.remove(STATUS_FIELD)
                    .map(to_class::<WorkflowStatus>)
                    .transpose()?
                    .unwrap_or(WorkflowStatus::Running)
            }
            _ => return Err(SerializationError::NotAnObject),
        };

        Ok(Self {
            workflow_id: row.id,
            version: row.version,
            status,
            state: to_class(data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestState {
        order_id: String,
        paid: bool,
    }

    impl WorkflowState for TestState {
        const NAME: &'static str = "test-state";
    }

    #[test]
    fn test_started_instance() {
        let a = WorkflowInstance::<TestState>::started();
        let b = WorkflowInstance::<TestState>::started();

        assert_ne!(a.workflow_id, b.workflow_id);
        assert_eq!(a.version, 0);
        assert_eq!(a.status, WorkflowStatus::Running);
        assert_eq!(a.state, TestState::default());
    }

    #[test]
    fn test_row_round_trip() {
        let instance = WorkflowInstance {
            workflow_id: Uuid::now_v7(),
            version: 3,
            status: WorkflowStatus::Running,
            state: TestState {
                order_id: "o-1".to_string(),
                paid: true,
            },
        };

        let row = instance.to_row().unwrap();
        assert_eq!(row.id, instance.workflow_id);
        assert_eq!(row.version, 3);
        assert_eq!(row.data[STATUS_FIELD], "running");
        assert_eq!(row.data["order_id"], "o-1");

        let back = WorkflowInstance::<TestState>::from_row(row).unwrap();
        assert_eq!(back, instance);
    }

    #[test]
    fn test_complete_status_round_trips() {
        let mut instance = WorkflowInstance::<TestState>::started();
        instance.status = WorkflowStatus::Complete;

        let row = instance.to_row().unwrap();
        assert_eq!(row.data[STATUS_FIELD], "complete");

        let back = WorkflowInstance::<TestState>::from_row(row).unwrap();
        assert_eq!(back.status, WorkflowStatus::Complete);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(WorkflowStatus::Running.to_string(), "running");
        assert_eq!(WorkflowStatus::Complete.to_string(), "complete");
        assert_eq!(WorkflowStatus::Discard.to_string(), "discard");
    }
}
