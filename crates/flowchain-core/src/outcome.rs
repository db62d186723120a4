//! Tagged result of dispatching one step.

use serde_json::Value;

use crate::error::WorkflowError;
use crate::state::Execution;

/// A step's request to pause the execution.
#[derive(Debug, Clone, Default)]
pub struct SuspendRequest {
    pub reason: Option<String>,
    /// JSON Schema for the data that will resume this step.
    pub resume_schema: Option<Value>,
    /// Step ids from the outermost enclosing step down to the requester.
    pub path: Vec<String>,
    /// Suspended sub-workflow execution to resume on re-entry.
    pub child: Option<Box<Execution>>,
}

impl SuspendRequest {
    pub fn new(reason: Option<String>) -> Self {
        Self {
            reason,
            ..Self::default()
        }
    }

    /// Record that the request passed through an enclosing step.
    pub(crate) fn within(mut self, step_id: &str) -> Self {
        if self.path.first().map(String::as_str) != Some(step_id) {
            self.path.insert(0, step_id.to_string());
        }
        self
    }
}

/// What a step executor hands back to the chain executor.
///
/// Suspension is a first-class outcome, never an error.
#[derive(Debug)]
pub enum StepOutcome {
    /// Continue with this value as the new pipeline data.
    Value(Value),
    /// Continue with the data unchanged and record no result.
    Skipped,
    Suspend(SuspendRequest),
    Error(WorkflowError),
}

impl StepOutcome {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_builds_outer_to_inner_path() {
        let request = SuspendRequest::new(Some("approval".to_string()))
            .within("approve")
            .within("gate")
            .within("gate");
        assert_eq!(request.path, vec!["gate".to_string(), "approve".to_string()]);
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(StepOutcome::Value(Value::Null).is_value());
        assert!(StepOutcome::Suspend(SuspendRequest::default()).is_suspend());
        assert!(StepOutcome::Error(WorkflowError::NoStore).is_error());
        assert!(!StepOutcome::Skipped.is_value());
    }
}
