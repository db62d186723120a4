//! Workflow definitions and the chain builder used to declare them.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::WorkflowAgent;
use crate::context::StepContext;
use crate::error::{BoxError, WorkflowError};
use crate::executor::{ChainExecutor, RunOptions, WorkflowRun, WorkflowStream};
use crate::hooks::{NoopHooks, WorkflowHooks};
use crate::schema::Schema;
use crate::step::Step;

/// An immutable, registered workflow.
pub struct WorkflowDefinition {
    /// Workflow ID.
    pub id: String,
    /// Workflow name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Schema the run input must satisfy.
    pub input_schema: Option<Schema>,
    /// Schema the final data must satisfy.
    pub result_schema: Option<Schema>,
    /// Ordered top-level steps.
    pub steps: Vec<Step>,
    pub hooks: Arc<dyn WorkflowHooks>,
}

impl WorkflowDefinition {
    /// Start building a workflow.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowChain {
        WorkflowChain::new(id, name)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Run with an executor that has no store and no default timeout.
    pub async fn run(
        self: &Arc<Self>,
        input: Value,
        options: RunOptions,
    ) -> Result<WorkflowRun, WorkflowError> {
        ChainExecutor::new().run(self.clone(), input, options).await
    }

    /// Stream with an executor that has no store and no default timeout.
    pub fn stream(self: &Arc<Self>, input: Value, options: RunOptions) -> WorkflowStream {
        ChainExecutor::new().stream(self.clone(), input, options)
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish()
    }
}

/// Fluent builder for a [`WorkflowDefinition`].
pub struct WorkflowChain {
    id: String,
    name: String,
    description: Option<String>,
    input_schema: Option<Schema>,
    result_schema: Option<Schema>,
    steps: Vec<Step>,
    hooks: Arc<dyn WorkflowHooks>,
}

impl WorkflowChain {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            input_schema: None,
            result_schema: None,
            steps: Vec::new(),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn result_schema(mut self, schema: Schema) -> Self {
        self.result_schema = Some(schema);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn WorkflowHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Append a pre-built step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn and_then<F, Fut>(self, id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.step(Step::then(id, execute))
    }

    pub fn and_tap<F, Fut>(self, id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.step(Step::tap(id, execute))
    }

    pub fn and_agent<F>(self, id: impl Into<String>, agent: Arc<dyn WorkflowAgent>, prompt: F) -> Self
    where
        F: Fn(&StepContext) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        self.step(Step::agent(id, agent, prompt))
    }

    pub fn and_when<F, Fut>(self, id: impl Into<String>, condition: F, step: Step) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.step(Step::when(id, condition, step))
    }

    pub fn and_all<F>(self, id: impl Into<String>, steps: F) -> Self
    where
        F: Fn(&StepContext) -> Vec<Step> + Send + Sync + 'static,
    {
        self.step(Step::all(id, steps))
    }

    pub fn and_race(self, id: impl Into<String>, steps: Vec<Step>) -> Self {
        self.step(Step::race(id, steps))
    }

    pub fn and_sub_workflow(self, id: impl Into<String>, workflow: Arc<WorkflowDefinition>) -> Self {
        self.step(Step::sub_workflow(id, workflow))
    }

    pub fn and_sleep(self, id: impl Into<String>, duration: Duration) -> Self {
        self.step(Step::sleep(id, duration))
    }

    /// Validate and freeze the definition.
    ///
    /// Step ids must be non-empty and unique across the workflow, including
    /// steps nested statically inside `when` and `race`.
    pub fn build(self) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow id must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut pending: Vec<&Step> = self.steps.iter().collect();
        while let Some(step) = pending.pop() {
            if step.id.trim().is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow '{}' has a step with an empty id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "duplicate step id '{}' in workflow '{}'",
                    step.id, self.id
                )));
            }
            pending.extend(step.children());
        }

        Ok(Arc::new(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            result_schema: self.result_schema,
            steps: self.steps,
            hooks: self.hooks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_preserves_step_order() {
        let workflow = WorkflowChain::new("greet", "Greeting")
            .description("Says hello")
            .and_then("a", |ctx| async move { Ok(ctx.data) })
            .and_tap("b", |_| async { Ok(()) })
            .and_sleep("c", Duration::from_millis(1))
            .build()
            .unwrap();

        assert_eq!(workflow.step_ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(workflow.description.as_deref(), Some("Says hello"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = WorkflowChain::new("wf", "Workflow")
            .and_then("a", |_| async { Ok(json!(1)) })
            .and_then("a", |_| async { Ok(json!(2)) })
            .build();
        assert!(matches!(result, Err(WorkflowError::InvalidDefinition(_))));
    }

    #[test]
    fn test_nested_duplicate_ids_rejected() {
        let result = WorkflowChain::new("wf", "Workflow")
            .and_then("inner", |_| async { Ok(json!(1)) })
            .and_when(
                "gate",
                |_| async { Ok(true) },
                Step::then("inner", |_| async { Ok(json!(2)) }),
            )
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'inner'"));
    }

    #[test]
    fn test_empty_ids_rejected() {
        assert!(WorkflowChain::new("", "Nameless").build().is_err());
        let result = WorkflowChain::new("wf", "Workflow")
            .and_then(" ", |_| async { Ok(json!(1)) })
            .build();
        assert!(result.is_err());
    }
}
