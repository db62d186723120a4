//! Execution state: the mutable snapshot of one workflow run.
//!
//! An [`Execution`] is created when a run starts, mutated only by the chain
//! executor, and handed to an [`ExecutionStore`](crate::store::ExecutionStore)
//! on every status change and on suspension.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunMetadata;
use crate::error::WorkflowError;

/// Metadata map type.
pub type Metadata = HashMap<String, Value>;

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled executions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Transitions are one-directional except `suspended -> running`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Running => next != Self::Running,
            Self::Suspended => matches!(next, Self::Running | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage accumulated from agent steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Usage gained since an earlier snapshot of the same counter.
    pub fn since(&self, earlier: &Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_sub(earlier.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_sub(earlier.completion_tokens),
            total_tokens: self.total_tokens.saturating_sub(earlier.total_tokens),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// One recorded step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    pub value: Value,
}

/// Step results keyed by step id, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepResults(Vec<StepRecord>);

impl StepResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the result of a step. `None` means the step has not produced one.
    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|record| record.step_id == step_id)
            .map(|record| &record.value)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.get(step_id).is_some()
    }

    /// Record a result. Re-recording a step keeps its original position.
    pub fn insert(&mut self, step_id: impl Into<String>, value: Value) {
        let step_id = step_id.into();
        match self.0.iter_mut().find(|record| record.step_id == step_id) {
            Some(record) => record.value = value,
            None => self.0.push(StepRecord { step_id, value }),
        }
    }

    /// Step ids in the order they were first recorded.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|record| record.step_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Why and where an execution is paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suspension {
    /// Top-level step the execution will re-enter on resume.
    pub step_id: String,
    pub step_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// JSON Schema the resume data must satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_schema: Option<Value>,
    /// Step ids from `step_id` down to the step that requested suspension.
    #[serde(default)]
    pub path: Vec<String>,
    /// Suspended sub-workflow execution, when the pause came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<Execution>>,
    pub suspended_at: DateTime<Utc>,
}

impl Suspension {
    /// The innermost step that receives the resume data.
    pub fn target_step_id(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or(&self.step_id)
    }
}

/// One run of a workflow definition against a specific input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step_index: usize,
    pub input: Value,
    /// Current pipeline value.
    pub data: Value,
    pub step_results: StepResults,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context: Metadata,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Create a running execution positioned at the first step.
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        input: Value,
        metadata: &RunMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            current_step_index: 0,
            data: input.clone(),
            input,
            step_results: StepResults::new(),
            usage: Usage::default(),
            suspension: None,
            error: None,
            cancellation_reason: None,
            user_id: metadata.user_id.clone(),
            conversation_id: metadata.conversation_id.clone(),
            context: metadata.context.clone(),
            started_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    /// Result of an already executed step.
    pub fn get_step_data(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    /// The caller-supplied metadata this execution was started with.
    pub fn metadata(&self) -> RunMetadata {
        RunMetadata {
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            context: self.context.clone(),
        }
    }

    /// Move to `next`, rejecting transitions out of terminal states.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
