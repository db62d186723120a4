//! Engine error types.

use std::fmt;

use thiserror::Error;

use crate::agent::AgentError;
use crate::state::ExecutionStatus;
use crate::store::StoreError;

/// Error type returned by step bodies, prompt builders and conditions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which value a failed schema check was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Input,
    Result,
    AgentOutput,
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "Input"),
            Self::Result => write!(f, "Result"),
            Self::AgentOutput => write!(f, "Agent output"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{target} validation failed: {}", .errors.join("; "))]
    Validation {
        target: ValidationTarget,
        errors: Vec<String>,
    },

    #[error("Step '{step_id}' of workflow '{workflow_id}' failed: {message}")]
    StepExecution {
        workflow_id: String,
        step_id: String,
        message: String,
    },

    #[error("Execution {execution_id} was cancelled: {reason}")]
    Cancelled {
        execution_id: String,
        reason: String,
    },

    #[error("Resume data rejected by step '{step_id}': {}", .errors.join("; "))]
    ResumeValidation { step_id: String, errors: Vec<String> },

    #[error("Execution {execution_id} is not suspended (status: {status})")]
    NotSuspended {
        execution_id: String,
        status: ExecutionStatus,
    },

    #[error("Execution {execution_id} has not completed (status: {status})")]
    NotCompleted {
        execution_id: String,
        status: ExecutionStatus,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Step '{step_id}' timed out after {timeout_ms}ms")]
    Timeout { step_id: String, timeout_ms: u64 },

    #[error("No execution store configured")]
    NoStore,

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Wrap a step body failure with the ids needed to trace it.
    pub fn step(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self::StepExecution {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            message: error.to_string(),
        }
    }

    /// Whether this error reports a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_all_messages() {
        let err = WorkflowError::Validation {
            target: ValidationTarget::Input,
            errors: vec!["\"name\" is a required property".to_string(), "bad type".to_string()],
        };
        let display = err.to_string();
        assert!(display.starts_with("Input validation failed"));
        assert!(display.contains("required property; bad type"));
    }

    #[test]
    fn test_step_error_carries_ids() {
        let err = WorkflowError::step("wf-1", "fetch", "connection refused");
        match &err {
            WorkflowError::StepExecution {
                workflow_id,
                step_id,
                message,
            } => {
                assert_eq!(workflow_id, "wf-1");
                assert_eq!(step_id, "fetch");
                assert_eq!(message, "connection refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("'fetch'"));
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        let err = WorkflowError::Cancelled {
            execution_id: "exec-1".to_string(),
            reason: "stop".to_string(),
        };
        assert!(err.is_cancellation());
        assert!(!WorkflowError::NoStore.is_cancellation());
    }

    #[test]
    fn test_not_suspended_shows_status() {
        let err = WorkflowError::NotSuspended {
            execution_id: "exec-1".to_string(),
            status: ExecutionStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
    }
}
