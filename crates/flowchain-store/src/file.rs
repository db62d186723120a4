//! File system based execution store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowchain_core::{Execution, ExecutionStore, StoreError};
use tokio::fs;
use tracing::{debug, info, warn};

/// Execution records stored as one JSON file per execution:
/// ```text
/// {root}/
/// └── {workflow_id}/
///     ├── {execution_id}.json
///     └── ...
/// ```
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never sees a half-written record.
pub struct FileExecutionStore {
    root: PathBuf,
    /// Terminal records kept per workflow; 0 keeps everything.
    max_records_per_workflow: usize,
}

impl FileExecutionStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("FileExecutionStore initialized at {:?}", root);
        Ok(Self {
            root,
            max_records_per_workflow: 0,
        })
    }

    /// Keep at most `max` finished records per workflow, pruning the oldest.
    ///
    /// Suspended and running records are never pruned.
    pub fn with_retention(mut self, max: usize) -> Self {
        self.max_records_per_workflow = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.root.join(sanitize(workflow_id))
    }

    fn record_path(&self, workflow_id: &str, execution_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id)
            .join(format!("{}.json", sanitize(execution_id)))
    }

    /// Locate a record by execution id across all workflow directories.
    async fn find_record(&self, execution_id: &str) -> Result<Option<PathBuf>, StoreError> {
        let filename = format!("{}.json", sanitize(execution_id));
        let mut workflows = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = workflows.next_entry().await? {
            let candidate = entry.path().join(&filename);
            if fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Read every parseable record of a workflow, skipping unreadable files.
    async fn read_workflow(&self, workflow_id: &str) -> Result<Vec<(PathBuf, Execution)>, StoreError> {
        let dir = self.workflow_dir(workflow_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Execution>(&content) {
                    Ok(execution) => records.push((path, execution)),
                    Err(e) => warn!("Failed to deserialize execution record {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read execution record {:?}: {}", path, e),
            }
        }
        Ok(records)
    }

    /// Delete the oldest finished records beyond the retention limit.
    async fn prune(&self, workflow_id: &str) -> Result<(), StoreError> {
        let max = self.max_records_per_workflow;
        if max == 0 {
            return Ok(());
        }

        let mut finished: Vec<_> = self
            .read_workflow(workflow_id)
            .await?
            .into_iter()
            .filter(|(_, e)| e.status.is_terminal())
            .collect();
        if finished.len() <= max {
            return Ok(());
        }

        finished.sort_by_key(|(_, e)| e.ended_at.unwrap_or(e.updated_at));
        let excess = finished.len() - max;
        for (path, execution) in finished.into_iter().take(excess) {
            fs::remove_file(&path).await?;
            debug!(
                "Pruned execution record {} of workflow {}",
                execution.execution_id, workflow_id
            );
        }
        info!("Pruned {} execution record(s) of workflow {}", excess, workflow_id);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        fs::create_dir_all(self.workflow_dir(&execution.workflow_id)).await?;

        let path = self.record_path(&execution.workflow_id, &execution.execution_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(execution).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize execution: {}", e))
        })?;

        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!(
            "Saved execution '{}' ({}) to {:?}",
            execution.execution_id, execution.status, path
        );

        if execution.status.is_terminal() {
            self.prune(&execution.workflow_id).await?;
        }
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let Some(path) = self.find_record(execution_id).await? else {
            return Ok(None);
        };

        let content = fs::read_to_string(&path).await?;
        let execution = serde_json::from_str(&content).map_err(|e| {
            StoreError::Serialization(format!("Failed to deserialize execution: {}", e))
        })?;
        Ok(Some(execution))
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<_> = self
            .read_workflow(workflow_id)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StoreError> {
        if let Some(path) = self.find_record(execution_id).await? {
            fs::remove_file(&path).await?;
            debug!("Deleted execution record '{}'", execution_id);
        }
        Ok(())
    }
}

/// Make an id safe to use as a path component.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
