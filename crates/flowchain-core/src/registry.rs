//! Workflow registry: run, stream, resume and cancel by id.
//!
//! Closures cannot be serialised, so definitions are registered at process
//! start and matched to persisted execution records by workflow id.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::executor::{ChainExecutor, ResumeOptions, RunOptions, WorkflowRun, WorkflowStream};
use crate::state::{Execution, ExecutionStatus};
use crate::store::ExecutionStore;
use crate::stream::{EventStream, StreamController};
use crate::suspend::SuspendController;

/// Result of [`WorkflowRegistry::cancel`].
#[derive(Debug)]
pub enum CancelOutcome {
    /// The execution is running in this process; it stops at its next step boundary.
    Signalled,
    /// The suspended execution was marked cancelled.
    Cancelled(Execution),
}

#[derive(Clone)]
struct LiveExecution {
    signal: SuspendController,
    controller: StreamController,
}

/// Registered workflows plus the executions currently running in this process.
pub struct WorkflowRegistry {
    executor: ChainExecutor,
    workflows: DashMap<String, Arc<WorkflowDefinition>>,
    live: Arc<DashMap<String, LiveExecution>>,
}

impl WorkflowRegistry {
    pub fn new(executor: ChainExecutor) -> Self {
        Self {
            executor,
            workflows: DashMap::new(),
            live: Arc::new(DashMap::new()),
        }
    }

    pub fn executor(&self) -> &ChainExecutor {
        &self.executor
    }

    /// Register a definition, replacing any previous one with the same id.
    pub fn register(&self, definition: Arc<WorkflowDefinition>) -> Option<Arc<WorkflowDefinition>> {
        debug!("Registering workflow: {}", definition.id);
        self.workflows.insert(definition.id.clone(), definition)
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(workflow_id).map(|entry| entry.value().clone())
    }

    /// Registered definitions, sorted by id.
    pub fn workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.iter().map(|e| e.value().clone()).collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    /// Whether an execution is currently running in this process.
    pub fn is_running(&self, execution_id: &str) -> bool {
        self.live.contains_key(execution_id)
    }

    /// Subscribe to the events of an execution running in this process.
    pub fn subscribe(&self, execution_id: &str) -> Option<EventStream> {
        self.live
            .get(execution_id)
            .map(|live| live.controller.subscribe())
    }

    pub async fn run(
        &self,
        workflow_id: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<WorkflowRun, WorkflowError> {
        let definition = self.definition(workflow_id)?;
        let (options, controller) = self.track(options);
        let execution_id = controller.execution_id().to_string();

        let result = self
            .executor
            .run_with_controller(definition, input, options, controller)
            .await;
        self.live.remove(&execution_id);
        result
    }

    pub fn stream(
        &self,
        workflow_id: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<WorkflowStream, WorkflowError> {
        let definition = self.definition(workflow_id)?;
        let (options, controller) = self.track(options);
        let execution_id = controller.execution_id().to_string();
        let signal = options.suspend_controller.clone().unwrap_or_default();
        let events = controller.subscribe();

        let executor = self.executor.clone();
        let live = self.live.clone();
        let id = execution_id.clone();
        let handle = tokio::spawn(async move {
            let result = executor
                .run_with_controller(definition, input, options, controller)
                .await;
            live.remove(&id);
            result
        });
        Ok(WorkflowStream::new(execution_id, events, handle, signal))
    }

    /// Resume a persisted suspended execution.
    pub async fn resume(&self, execution_id: &str, data: Value) -> Result<WorkflowRun, WorkflowError> {
        let execution = self.load(execution_id).await?;
        let definition = self.definition(&execution.workflow_id)?;
        let signal = SuspendController::new();
        let controller = StreamController::new(execution_id);
        self.live.insert(
            execution_id.to_string(),
            LiveExecution {
                signal: signal.clone(),
                controller: controller.clone(),
            },
        );

        let options = ResumeOptions {
            suspend_controller: Some(signal),
            stream_controller: Some(controller),
        };
        let result = self.executor.resume(definition, execution, data, options).await;
        self.live.remove(execution_id);
        result
    }

    /// Cancel an execution.
    ///
    /// A running execution is signalled and stops at its next step boundary;
    /// a suspended one is marked cancelled in the store.
    pub async fn cancel(
        &self,
        execution_id: &str,
        reason: impl Into<String>,
    ) -> Result<CancelOutcome, WorkflowError> {
        let reason = reason.into();
        if let Some(live) = self.live.get(execution_id) {
            info!("Signalling cancellation of running execution {}", execution_id);
            live.signal.cancel(reason);
            return Ok(CancelOutcome::Signalled);
        }

        let mut execution = self.load(execution_id).await?;
        match execution.status {
            ExecutionStatus::Suspended => {
                let definition = self.definition(&execution.workflow_id)?;
                let controller = StreamController::new(execution_id);
                self.executor
                    .cancel_suspended(&definition, &mut execution, &controller, reason)
                    .await?;
                Ok(CancelOutcome::Cancelled(execution))
            }
            ExecutionStatus::Running => Err(WorkflowError::NotSuspended {
                execution_id: execution_id.to_string(),
                status: execution.status,
            }),
            status => Err(WorkflowError::InvalidTransition {
                from: status,
                to: ExecutionStatus::Cancelled,
            }),
        }
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, WorkflowError> {
        Ok(self.store()?.load(execution_id).await?)
    }

    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, WorkflowError> {
        Ok(self.store()?.list(workflow_id).await?)
    }

    fn definition(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.get(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))
    }

    fn store(&self) -> Result<&Arc<dyn ExecutionStore>, WorkflowError> {
        self.executor.store().ok_or(WorkflowError::NoStore)
    }

    async fn load(&self, execution_id: &str) -> Result<Execution, WorkflowError> {
        self.store()?
            .load(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Fill in the execution id and signal, and record the run as live.
    fn track(&self, mut options: RunOptions) -> (RunOptions, StreamController) {
        let execution_id = options
            .execution_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let signal = options
            .suspend_controller
            .get_or_insert_with(SuspendController::new)
            .clone();
        let controller = StreamController::new(execution_id.clone());
        self.live.insert(
            execution_id,
            LiveExecution {
                signal,
                controller: controller.clone(),
            },
        );
        (options, controller)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
