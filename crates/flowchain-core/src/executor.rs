//! Chain executor: walks a workflow's step list and applies step outcomes.

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{ResumeInput, RunMetadata, StepContext, Tracking, UsageMeter};
use crate::definition::WorkflowDefinition;
use crate::error::{ValidationTarget, WorkflowError};
use crate::outcome::{StepOutcome, SuspendRequest};
use crate::schema::Schema;
use crate::state::{Execution, ExecutionStatus, Metadata, Suspension, Usage};
use crate::step::Step;
use crate::step_executors;
use crate::store::ExecutionStore;
use crate::stream::{EventStream, StreamController, StreamEvent, WORKFLOW_SOURCE, event_types};
use crate::suspend::{SuspendController, SuspendState};

/// Options for starting a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub context: Metadata,
    /// Signal shared with the caller; created implicitly when absent.
    pub suspend_controller: Option<SuspendController>,
    /// Use this execution id instead of a fresh UUID.
    pub execution_id: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn suspend_controller(mut self, controller: SuspendController) -> Self {
        self.suspend_controller = Some(controller);
        self
    }

    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    fn metadata(&self) -> RunMetadata {
        RunMetadata {
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            context: self.context.clone(),
        }
    }
}

/// Options for resuming a persisted execution.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub suspend_controller: Option<SuspendController>,
    /// Keep writing into an existing stream instead of opening a new one.
    pub stream_controller: Option<StreamController>,
}

/// Runs workflow definitions.
#[derive(Clone, Default)]
pub struct ChainExecutor {
    store: Option<Arc<dyn ExecutionStore>>,
    default_step_timeout: Option<Duration>,
}

impl ChainExecutor {
    /// Create an executor without a store or step timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist execution records through `store`.
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Timeout for steps that do not declare their own.
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn ExecutionStore>> {
        self.store.as_ref()
    }

    pub(crate) fn step_timeout(&self, step: &Step) -> Option<Duration> {
        step.timeout.or(self.default_step_timeout)
    }

    /// Nested sub-workflow runs live inside their parent's record.
    pub(crate) fn without_store(&self) -> Self {
        Self {
            store: None,
            default_step_timeout: self.default_step_timeout,
        }
    }

    /// Run a workflow until it completes, suspends or is cancelled.
    ///
    /// Failures (validation, step errors) are returned as `Err`; suspension and
    /// cancellation are reported through the run's status.
    pub async fn run(
        &self,
        definition: Arc<WorkflowDefinition>,
        input: Value,
        options: RunOptions,
    ) -> Result<WorkflowRun, WorkflowError> {
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let controller = StreamController::new(execution_id);
        self.run_with_controller(definition, input, options, controller)
            .await
    }

    /// Run a workflow on a background task, exposing its events as they happen.
    pub fn stream(
        &self,
        definition: Arc<WorkflowDefinition>,
        input: Value,
        mut options: RunOptions,
    ) -> WorkflowStream {
        let execution_id = options
            .execution_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let signal = options
            .suspend_controller
            .get_or_insert_with(SuspendController::new)
            .clone();
        let controller = StreamController::new(execution_id.clone());
        let events = controller.subscribe();

        let executor = self.clone();
        let handle = tokio::spawn(async move {
            executor
                .run_with_controller(definition, input, options, controller)
                .await
        });
        WorkflowStream::new(execution_id, events, handle, signal)
    }

    /// Resume a suspended execution, typically one loaded from a store.
    pub async fn resume(
        &self,
        definition: Arc<WorkflowDefinition>,
        execution: Execution,
        data: Value,
        options: ResumeOptions,
    ) -> Result<WorkflowRun, WorkflowError> {
        if execution.workflow_id != definition.id {
            return Err(WorkflowError::InvalidDefinition(format!(
                "execution {} belongs to workflow '{}', not '{}'",
                execution.execution_id, execution.workflow_id, definition.id
            )));
        }
        let controller = options
            .stream_controller
            .unwrap_or_else(|| StreamController::new(execution.execution_id.clone()));
        let mut run = WorkflowRun {
            definition,
            executor: self.clone(),
            execution,
            controller,
            signal: options.suspend_controller.unwrap_or_default(),
        };
        run.resume(data).await?;
        Ok(run)
    }

    pub(crate) async fn run_with_controller(
        &self,
        definition: Arc<WorkflowDefinition>,
        input: Value,
        options: RunOptions,
        controller: StreamController,
    ) -> Result<WorkflowRun, WorkflowError> {
        let signal = options.suspend_controller.clone().unwrap_or_default();
        let mut execution = Execution::new(
            controller.execution_id(),
            definition.id.clone(),
            input,
            &options.metadata(),
        );
        info!(
            "Starting workflow execution: {} ({})",
            definition.id, execution.execution_id
        );

        let result = self
            .start(&definition, &mut execution, &controller, &signal)
            .await;
        if result.is_err() {
            controller.close();
        }
        result?;

        Ok(WorkflowRun {
            definition,
            executor: self.clone(),
            execution,
            controller,
            signal,
        })
    }

    /// Run a sub-workflow inside a parent step.
    pub(crate) async fn run_child(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        metadata: &RunMetadata,
        controller: &StreamController,
        signal: &SuspendController,
    ) -> (Execution, Result<(), WorkflowError>) {
        let mut execution = Execution::new(
            Uuid::new_v4().to_string(),
            definition.id.clone(),
            input,
            metadata,
        );
        let result = self
            .start(definition, &mut execution, controller, signal)
            .await;
        (execution, result)
    }

    /// Resume a sub-workflow that suspended inside a parent step.
    pub(crate) async fn resume_child(
        &self,
        definition: &WorkflowDefinition,
        mut execution: Execution,
        data: Value,
        controller: &StreamController,
        signal: &SuspendController,
    ) -> (Execution, Result<(), WorkflowError>) {
        let result = self
            .resume_with(definition, &mut execution, data, controller, signal)
            .await;
        (execution, result)
    }

    async fn start(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        signal: &SuspendController,
    ) -> Result<(), WorkflowError> {
        if let Some(schema) = &definition.input_schema {
            if let Err(errors) = schema.validate(&execution.input) {
                let error = WorkflowError::Validation {
                    target: ValidationTarget::Input,
                    errors,
                };
                return self
                    .finish_failed(definition, execution, controller, None, error)
                    .await;
            }
        }

        controller.write(
            event_types::WORKFLOW_START,
            WORKFLOW_SOURCE,
            json!({
                "workflowId": definition.id,
                "input": execution.input,
            }),
        );
        definition.hooks.on_start(execution).await;
        self.persist(execution).await?;

        self.drive(definition, execution, controller, signal, None)
            .await
    }

    pub(crate) async fn resume_with(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        data: Value,
        controller: &StreamController,
        signal: &SuspendController,
    ) -> Result<(), WorkflowError> {
        if execution.status != ExecutionStatus::Suspended {
            return Err(WorkflowError::NotSuspended {
                execution_id: execution.execution_id.clone(),
                status: execution.status,
            });
        }
        // The stored record wins: it may have been cancelled or resumed elsewhere.
        if let Some(stored) = self.load_persisted(&execution.execution_id).await? {
            if stored.status != ExecutionStatus::Suspended {
                warn!(
                    "Execution {} is {} in the store; refusing to resume",
                    execution.execution_id, stored.status
                );
                *execution = stored;
                if execution.status.is_terminal() {
                    controller.close();
                }
                return Err(WorkflowError::NotSuspended {
                    execution_id: execution.execution_id.clone(),
                    status: execution.status,
                });
            }
        }
        let suspension = execution.suspension.clone().ok_or_else(|| {
            WorkflowError::Internal(format!(
                "suspended execution {} has no suspension record",
                execution.execution_id
            ))
        })?;

        if let Some(schema) = &suspension.resume_schema {
            let schema = Schema::new(schema.clone())?;
            schema
                .validate(&data)
                .map_err(|errors| WorkflowError::ResumeValidation {
                    step_id: suspension.target_step_id().to_string(),
                    errors,
                })?;
        }

        if !signal.reset() {
            let reason = signal.reason().unwrap_or_default();
            return self
                .finish_cancelled(definition, execution, controller, reason)
                .await;
        }

        info!(
            "Resuming workflow {} ({}) at step {}",
            definition.id, execution.execution_id, suspension.step_id
        );
        execution.suspension = None;
        execution.transition(ExecutionStatus::Running)?;
        execution.current_step_index = suspension.step_index;
        self.persist(execution).await?;
        controller.write(
            event_types::WORKFLOW_RESUMED,
            WORKFLOW_SOURCE,
            json!({
                "stepId": suspension.step_id,
                "resumeData": data,
            }),
        );

        let resume = Arc::new(ResumeInput {
            target_step_id: suspension.target_step_id().to_string(),
            data,
            child: Mutex::new(suspension.child),
        });
        self.drive(definition, execution, controller, signal, Some(resume))
            .await
    }

    /// Walk the step list from `current_step_index`.
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        signal: &SuspendController,
        mut resume: Option<Arc<ResumeInput>>,
    ) -> Result<(), WorkflowError> {
        let usage = UsageMeter::starting_at(execution.usage);
        let metadata = Arc::new(execution.metadata());

        while let Some(step) = definition.steps.get(execution.current_step_index) {
            let index = execution.current_step_index;

            match signal.state() {
                SuspendState::Active => {}
                SuspendState::CancelRequested(reason) => {
                    return self
                        .finish_cancelled(definition, execution, controller, reason)
                        .await;
                }
                SuspendState::SuspendRequested(reason) => {
                    let request = SuspendRequest::new(Some(reason));
                    return self
                        .finish_suspended(definition, execution, controller, step, request)
                        .await;
                }
            }

            debug!("Executing step: {} ({})", step.display_name(), step.id);
            controller.write(
                event_types::STEP_START,
                step.id.as_str(),
                json!({ "stepIndex": index, "kind": step.kind_name() }),
            );
            definition.hooks.on_step_start(execution, &step.id).await;

            let ctx = StepContext::new(
                execution.data.clone(),
                Arc::new(execution.step_results.clone()),
                controller.clone(),
                metadata.clone(),
                Tracking {
                    execution_id: execution.execution_id.clone(),
                    workflow_id: definition.id.clone(),
                    step_id: step.id.clone(),
                    step_index: index,
                },
                signal.clone(),
                resume.take(),
                usage.clone(),
            );
            let outcome = step_executors::dispatch(self, step, &ctx).await;
            execution.usage = usage.snapshot();
            definition
                .hooks
                .on_step_end(execution, &step.id, &outcome)
                .await;

            match outcome {
                StepOutcome::Value(value) => {
                    execution.data = value.clone();
                    execution.step_results.insert(step.id.clone(), value.clone());
                    execution.current_step_index += 1;
                    execution.touch();
                    controller.write(
                        event_types::STEP_COMPLETE,
                        step.id.as_str(),
                        json!({ "stepIndex": index, "result": value }),
                    );
                }
                StepOutcome::Skipped => {
                    debug!("Step {} skipped", step.id);
                    execution.current_step_index += 1;
                    execution.touch();
                    controller.write(
                        event_types::STEP_COMPLETE,
                        step.id.as_str(),
                        json!({ "stepIndex": index, "skipped": true }),
                    );
                }
                StepOutcome::Suspend(request) => {
                    return self
                        .finish_suspended(definition, execution, controller, step, request)
                        .await;
                }
                StepOutcome::Error(WorkflowError::Cancelled { reason, .. }) => {
                    return self
                        .finish_cancelled(definition, execution, controller, reason)
                        .await;
                }
                StepOutcome::Error(error) => {
                    if let SuspendState::CancelRequested(reason) = signal.state() {
                        debug!("Step {} failed after cancellation: {}", step.id, error);
                        return self
                            .finish_cancelled(definition, execution, controller, reason)
                            .await;
                    }
                    return self
                        .finish_failed(
                            definition,
                            execution,
                            controller,
                            Some(step.id.as_str()),
                            error,
                        )
                        .await;
                }
            }
        }

        if let Some(schema) = &definition.result_schema {
            if let Err(errors) = schema.validate(&execution.data) {
                let error = WorkflowError::Validation {
                    target: ValidationTarget::Result,
                    errors,
                };
                return self
                    .finish_failed(definition, execution, controller, None, error)
                    .await;
            }
        }

        execution.transition(ExecutionStatus::Completed)?;
        info!(
            "Workflow {} completed ({}), {} tokens used",
            definition.id, execution.execution_id, execution.usage.total_tokens
        );
        let persisted = self.persist(execution).await;
        controller.write(
            event_types::WORKFLOW_COMPLETE,
            WORKFLOW_SOURCE,
            json!({
                "result": execution.data,
                "usage": execution.usage,
            }),
        );
        definition.hooks.on_end(execution).await;
        controller.close();
        persisted
    }

    async fn finish_suspended(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        step: &Step,
        request: SuspendRequest,
    ) -> Result<(), WorkflowError> {
        let request = request.within(&step.id);
        let resume_schema = request
            .resume_schema
            .or_else(|| step.resume_schema.as_ref().map(|s| s.as_value().clone()));
        let suspension = Suspension {
            step_id: step.id.clone(),
            step_index: execution.current_step_index,
            reason: request.reason,
            resume_schema,
            path: request.path,
            child: request.child,
            suspended_at: Utc::now(),
        };

        info!(
            "Workflow {} suspended at step {} ({}): {}",
            definition.id,
            step.id,
            execution.execution_id,
            suspension.reason.as_deref().unwrap_or("no reason given")
        );
        let payload = json!({
            "stepId": suspension.step_id,
            "path": suspension.path,
            "reason": suspension.reason,
            "resumeSchema": suspension.resume_schema,
        });
        execution.suspension = Some(suspension);
        execution.transition(ExecutionStatus::Suspended)?;
        let persisted = self.persist(execution).await;
        controller.write(event_types::WORKFLOW_SUSPENDED, WORKFLOW_SOURCE, payload);
        definition.hooks.on_suspend(execution).await;
        persisted
    }

    async fn finish_failed(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        step_id: Option<&str>,
        error: WorkflowError,
    ) -> Result<(), WorkflowError> {
        error!(
            "Workflow {} failed ({}): {}",
            definition.id, execution.execution_id, error
        );
        execution.error = Some(error.to_string());
        execution.transition(ExecutionStatus::Failed)?;
        if let Err(e) = self.persist(execution).await {
            warn!("Failed to persist failed execution {}: {}", execution.execution_id, e);
        }
        controller.write(
            event_types::WORKFLOW_ERROR,
            WORKFLOW_SOURCE,
            json!({
                "error": error.to_string(),
                "stepId": step_id,
            }),
        );
        definition.hooks.on_end(execution).await;
        controller.close();
        Err(error)
    }

    async fn finish_cancelled(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        reason: String,
    ) -> Result<(), WorkflowError> {
        info!(
            "Workflow {} cancelled ({}): {}",
            definition.id, execution.execution_id, reason
        );
        execution.transition(ExecutionStatus::Cancelled)?;
        execution.suspension = None;
        execution.cancellation_reason = Some(reason.clone());
        let persisted = self.persist(execution).await;
        controller.write(
            event_types::WORKFLOW_CANCELLED,
            WORKFLOW_SOURCE,
            json!({ "reason": reason }),
        );
        definition.hooks.on_end(execution).await;
        controller.close();
        persisted
    }

    /// Cancel an execution that is parked in `suspended`.
    pub(crate) async fn cancel_suspended(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut Execution,
        controller: &StreamController,
        reason: String,
    ) -> Result<(), WorkflowError> {
        if execution.status != ExecutionStatus::Suspended {
            return Err(WorkflowError::NotSuspended {
                execution_id: execution.execution_id.clone(),
                status: execution.status,
            });
        }
        self.finish_cancelled(definition, execution, controller, reason)
            .await
    }

    async fn load_persisted(&self, execution_id: &str) -> Result<Option<Execution>, WorkflowError> {
        match &self.store {
            Some(store) => Ok(store.load(execution_id).await?),
            None => Ok(None),
        }
    }

    async fn persist(&self, execution: &Execution) -> Result<(), WorkflowError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(execution).await.map_err(|e| {
            error!(
                "Failed to persist execution {}: {}",
                execution.execution_id, e
            );
            WorkflowError::from(e)
        })
    }
}

/// A settled (completed, suspended or cancelled) run.
pub struct WorkflowRun {
    definition: Arc<WorkflowDefinition>,
    executor: ChainExecutor,
    execution: Execution,
    controller: StreamController,
    signal: SuspendController,
}

impl WorkflowRun {
    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn into_execution(self) -> Execution {
        self.execution
    }

    pub fn execution_id(&self) -> &str {
        &self.execution.execution_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    pub fn data(&self) -> &Value {
        &self.execution.data
    }

    pub fn usage(&self) -> Usage {
        self.execution.usage
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        self.execution.suspension.as_ref()
    }

    pub fn get_step_data(&self, step_id: &str) -> Option<&Value> {
        self.execution.get_step_data(step_id)
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    /// The final data of a completed run.
    pub fn result(&self) -> Result<&Value, WorkflowError> {
        match self.execution.status {
            ExecutionStatus::Completed => Ok(&self.execution.data),
            ExecutionStatus::Cancelled => Err(WorkflowError::Cancelled {
                execution_id: self.execution.execution_id.clone(),
                reason: self.execution.cancellation_reason.clone().unwrap_or_default(),
            }),
            status => Err(WorkflowError::NotCompleted {
                execution_id: self.execution.execution_id.clone(),
                status,
            }),
        }
    }

    /// Continue a suspended run from the step that suspended.
    ///
    /// Rejected resume data leaves the run suspended.
    pub async fn resume(&mut self, data: Value) -> Result<&Execution, WorkflowError> {
        self.executor
            .resume_with(
                &self.definition,
                &mut self.execution,
                data,
                &self.controller,
                &self.signal,
            )
            .await?;
        Ok(&self.execution)
    }

    /// Cancel a suspended run. Cancellation is terminal.
    pub async fn cancel(&mut self, reason: impl Into<String>) -> Result<&Execution, WorkflowError> {
        let reason = reason.into();
        self.executor
            .cancel_suspended(
                &self.definition,
                &mut self.execution,
                &self.controller,
                reason.clone(),
            )
            .await?;
        self.signal.cancel(reason);
        Ok(&self.execution)
    }

    /// Events written from now on, including those of later resumes.
    pub fn subscribe(&self) -> EventStream {
        self.controller.subscribe()
    }

    pub fn suspend_controller(&self) -> &SuspendController {
        &self.signal
    }
}

impl std::fmt::Debug for WorkflowRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRun")
            .field("workflow_id", &self.definition.id)
            .field("execution", &self.execution)
            .finish()
    }
}

/// Resolves to the run once the background task settles.
pub struct RunHandle {
    handle: JoinHandle<Result<WorkflowRun, WorkflowError>>,
}

impl RunHandle {
    pub(crate) fn new(handle: JoinHandle<Result<WorkflowRun, WorkflowError>>) -> Self {
        Self { handle }
    }
}

impl Future for RunHandle {
    type Output = Result<WorkflowRun, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(WorkflowError::Internal(format!("workflow task failed: {e}"))),
        })
    }
}

/// Live event stream of a run plus a handle to its eventual result.
///
/// The stream ends when the execution reaches a terminal status. It stays open
/// while the run is suspended and the returned [`WorkflowRun`] is alive.
pub struct WorkflowStream {
    execution_id: String,
    events: EventStream,
    result: RunHandle,
    signal: SuspendController,
}

impl WorkflowStream {
    pub(crate) fn new(
        execution_id: String,
        events: EventStream,
        handle: JoinHandle<Result<WorkflowRun, WorkflowError>>,
        signal: SuspendController,
    ) -> Self {
        Self {
            execution_id,
            events,
            result: RunHandle::new(handle),
            signal,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn suspend_controller(&self) -> &SuspendController {
        &self.signal
    }

    /// Wait for the run to settle.
    pub async fn result(self) -> Result<WorkflowRun, WorkflowError> {
        self.result.await
    }

    pub fn into_parts(self) -> (EventStream, RunHandle) {
        (self.events, self.result)
    }
}

impl Stream for WorkflowStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
