//! Execution record storage.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::state::Execution;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("Execution record not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Custom(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Persistence collaborator for execution records.
///
/// The chain executor saves on every status change and on suspension.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Load a record by execution id.
    async fn load(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;

    /// All records of a workflow, oldest first.
    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, execution_id: &str) -> Result<(), StoreError>;
}

/// In-memory execution store.
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(execution_id).cloned())
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError> {
        let records = self.records.read().await;
        let mut executions: Vec<_> = records
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.remove(execution_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunMetadata;
    use crate::state::ExecutionStatus;
    use serde_json::json;

    fn execution(id: &str, workflow_id: &str) -> Execution {
        Execution::new(id, workflow_id, json!({}), &RunMetadata::default())
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryExecutionStore::new();
        let mut exec = execution("e1", "wf");
        store.save(&exec).await.unwrap();

        exec.transition(ExecutionStatus::Suspended).unwrap();
        store.save(&exec).await.unwrap();

        let loaded = store.load("e1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Suspended);
        assert_eq!(store.len().await, 1);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_workflow() {
        let store = MemoryExecutionStore::new();
        store.save(&execution("e1", "a")).await.unwrap();
        store.save(&execution("e2", "b")).await.unwrap();
        store.save(&execution("e3", "a")).await.unwrap();

        let listed = store.list("a").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|e| e.execution_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"e1") && ids.contains(&"e3"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryExecutionStore::new();
        store.save(&execution("e1", "a")).await.unwrap();
        store.delete("e1").await.unwrap();
        store.delete("e1").await.unwrap();
        assert!(store.is_empty().await);
    }
}
