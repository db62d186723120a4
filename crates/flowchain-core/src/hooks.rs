//! Lifecycle hooks attached to a workflow definition.

use async_trait::async_trait;

use crate::outcome::StepOutcome;
use crate::state::Execution;

/// Callbacks invoked by the chain executor. Every method defaults to a no-op.
///
/// Hooks observe; they cannot change the outcome of a step or run.
#[async_trait]
pub trait WorkflowHooks: Send + Sync {
    /// Called once when a run starts (not on resume).
    async fn on_start(&self, execution: &Execution) {
        let _ = execution;
    }

    /// Called before a top-level step is dispatched.
    async fn on_step_start(&self, execution: &Execution, step_id: &str) {
        let _ = (execution, step_id);
    }

    /// Called after a top-level step settles, before its outcome is applied.
    async fn on_step_end(&self, execution: &Execution, step_id: &str, outcome: &StepOutcome) {
        let _ = (execution, step_id, outcome);
    }

    /// Called when the execution is suspended.
    async fn on_suspend(&self, execution: &Execution) {
        let _ = execution;
    }

    /// Called when the execution reaches a terminal status.
    async fn on_end(&self, execution: &Execution) {
        let _ = execution;
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl WorkflowHooks for NoopHooks {}
