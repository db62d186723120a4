//! Step model.
//!
//! A [`Step`] is an immutable, tagged description of one unit of a workflow.
//! Behaviour lives in the step executors; this module only holds data and
//! the builder constructors used to declare chains.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::agent::WorkflowAgent;
use crate::context::StepContext;
use crate::definition::WorkflowDefinition;
use crate::error::BoxError;
use crate::schema::Schema;
use crate::stream::PipeOptions;

/// Body of a `then` step.
pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Body of a `tap` step. Its output is discarded.
pub type TapFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Predicate of a `when` step.
pub type ConditionFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Builds the prompt for an agent step.
pub type PromptFn = Arc<dyn Fn(&StepContext) -> Result<String, BoxError> + Send + Sync>;

/// Resolves the branches of an `all` step at dispatch time.
pub type StepsBuilder = Arc<dyn Fn(&StepContext) -> Vec<Step> + Send + Sync>;

/// Maps the pipeline data to a sub-workflow's input.
pub type InputMapper = Arc<dyn Fn(&StepContext) -> Result<Value, BoxError> + Send + Sync>;

/// Configuration of an agent step.
#[derive(Clone)]
pub struct AgentStep {
    pub prompt: PromptFn,
    pub agent: Arc<dyn WorkflowAgent>,
    /// Schema the agent's structured output must satisfy.
    pub result_schema: Option<Schema>,
    /// Re-stream the agent's own events into the workflow stream.
    pub forward_events: Option<PipeOptions>,
}

/// Step variants.
#[derive(Clone)]
pub enum StepKind {
    /// Transform the pipeline data.
    Then { execute: StepFn },
    /// Observe the pipeline data without changing it.
    Tap { execute: TapFn },
    /// Delegate to an agent.
    Agent(AgentStep),
    /// Run `step` only when `condition` holds.
    When {
        condition: ConditionFn,
        step: Box<Step>,
    },
    /// Run every resolved branch concurrently; the value is the positional array of results.
    All { steps: StepsBuilder },
    /// Run every branch concurrently; the first to settle decides.
    Race { steps: Vec<Step> },
    /// Run another workflow as a single step.
    SubWorkflow {
        workflow: Arc<WorkflowDefinition>,
        input: InputMapper,
    },
    /// Pause the pipeline, waking early on a suspend or cancel request.
    Sleep { duration: Duration },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Then { .. } => "then",
            Self::Tap { .. } => "tap",
            Self::Agent(_) => "agent",
            Self::When { .. } => "when",
            Self::All { .. } => "all",
            Self::Race { .. } => "race",
            Self::SubWorkflow { .. } => "sub-workflow",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// One unit of a workflow, identified by an id unique within the workflow.
#[derive(Clone)]
pub struct Step {
    pub id: String,
    pub name: Option<String>,
    pub kind: StepKind,
    /// Overrides the engine's default step timeout.
    pub timeout: Option<Duration>,
    /// Schema the resume data must satisfy when this step suspends.
    pub resume_schema: Option<Schema>,
}

impl Step {
    fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            timeout: None,
            resume_schema: None,
        }
    }

    /// Create a transform step.
    pub fn then<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let execute: StepFn = Arc::new(move |ctx| execute(ctx).boxed());
        Self::new(id, StepKind::Then { execute })
    }

    /// Create a side-effect step. The pipeline data passes through unchanged.
    pub fn tap<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let execute: TapFn = Arc::new(move |ctx| execute(ctx).boxed());
        Self::new(id, StepKind::Tap { execute })
    }

    /// Create an agent step.
    pub fn agent<F>(id: impl Into<String>, agent: Arc<dyn WorkflowAgent>, prompt: F) -> Self
    where
        F: Fn(&StepContext) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        Self::new(
            id,
            StepKind::Agent(AgentStep {
                prompt: Arc::new(prompt),
                agent,
                result_schema: None,
                forward_events: None,
            }),
        )
    }

    /// Create a conditional step.
    pub fn when<F, Fut>(id: impl Into<String>, condition: F, step: Step) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        let condition: ConditionFn = Arc::new(move |ctx| condition(ctx).boxed());
        Self::new(
            id,
            StepKind::When {
                condition,
                step: Box::new(step),
            },
        )
    }

    /// Create a fan-out step whose branches are resolved from the context at dispatch.
    pub fn all<F>(id: impl Into<String>, steps: F) -> Self
    where
        F: Fn(&StepContext) -> Vec<Step> + Send + Sync + 'static,
    {
        Self::new(
            id,
            StepKind::All {
                steps: Arc::new(steps),
            },
        )
    }

    /// Create a fan-out step over a fixed list of branches.
    pub fn all_of(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::all(id, move |_| steps.clone())
    }

    /// Create a race step.
    pub fn race(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id, StepKind::Race { steps })
    }

    /// Run `workflow` with the current pipeline data as its input.
    pub fn sub_workflow(id: impl Into<String>, workflow: Arc<WorkflowDefinition>) -> Self {
        Self::sub_workflow_with(id, workflow, |ctx| Ok(ctx.data.clone()))
    }

    /// Run `workflow` with an input derived from the context.
    pub fn sub_workflow_with<F>(
        id: impl Into<String>,
        workflow: Arc<WorkflowDefinition>,
        input: F,
    ) -> Self
    where
        F: Fn(&StepContext) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::new(
            id,
            StepKind::SubWorkflow {
                workflow,
                input: Arc::new(input),
            },
        )
    }

    /// Create a sleep step.
    pub fn sleep(id: impl Into<String>, duration: Duration) -> Self {
        Self::new(id, StepKind::Sleep { duration })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_resume_schema(mut self, schema: Schema) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    /// Validate the agent's output against `schema`. Ignored by other step kinds.
    pub fn with_result_schema(mut self, schema: Schema) -> Self {
        if let StepKind::Agent(agent) = &mut self.kind {
            agent.result_schema = Some(schema);
        }
        self
    }

    /// Forward the agent's event stream, prefixed with this step's id.
    pub fn forward_agent_events(mut self, options: PipeOptions) -> Self {
        if let StepKind::Agent(agent) = &mut self.kind {
            agent.forward_events = Some(options);
        }
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Steps nested statically inside this one.
    pub(crate) fn children(&self) -> Vec<&Step> {
        match &self.kind {
            StepKind::When { step, .. } => vec![step.as_ref()],
            StepKind::Race { steps } => steps.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Step");
        debug
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("timeout", &self.timeout);
        if let StepKind::SubWorkflow { workflow, .. } = &self.kind {
            debug.field("workflow", &workflow.id);
        }
        debug.finish()
    }
}
