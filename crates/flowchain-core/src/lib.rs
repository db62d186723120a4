//! # Flowchain Core
//!
//! Workflow execution engine. A workflow is an ordered chain of steps run
//! against a JSON input:
//!
//! - [`Step`] - tagged step variants (then, tap, agent, when, all, race,
//!   sub-workflow, sleep)
//! - [`Execution`] - the persisted snapshot of one run
//! - [`StreamController`] - ordered, multi-consumer event channel per run
//! - [`SuspendController`] - cooperative suspend/cancel signal
//! - [`ChainExecutor`] - drives a chain and applies step outcomes
//! - [`WorkflowRegistry`] - run/stream/resume/cancel by workflow and execution id

pub mod agent;
pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod outcome;
pub mod registry;
pub mod schema;
pub mod state;
pub mod step;
pub mod store;
pub mod stream;
pub mod suspend;

mod step_composite;
mod step_executors;

pub use agent::{
    AgentError, AgentOutput, AgentRequest, AgentStreamResponse, StaticAgent, WorkflowAgent,
};
pub use context::{RunMetadata, StepContext, StreamWriter};
pub use definition::{WorkflowChain, WorkflowDefinition};
pub use error::{BoxError, ValidationTarget, WorkflowError};
pub use executor::{ChainExecutor, ResumeOptions, RunHandle, RunOptions, WorkflowRun, WorkflowStream};
pub use hooks::{NoopHooks, WorkflowHooks};
pub use outcome::{StepOutcome, SuspendRequest};
pub use registry::{CancelOutcome, WorkflowRegistry};
pub use schema::Schema;
pub use state::{Execution, ExecutionStatus, Metadata, StepRecord, StepResults, Suspension, Usage};
pub use step::{AgentStep, Step, StepKind};
pub use store::{ExecutionStore, MemoryExecutionStore, StoreError};
pub use stream::{
    EventStream, PipeOptions, SourceEvent, StreamController, StreamEvent, WORKFLOW_SOURCE, event_types,
};
pub use suspend::{SuspendController, SuspendState};
