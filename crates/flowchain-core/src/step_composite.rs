//! Composite step executors (when, all, race, sub-workflow).

use std::sync::Arc;

use futures::future::{join_all, select_all};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{StepContext, UsageMeter};
use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::executor::ChainExecutor;
use crate::outcome::{StepOutcome, SuspendRequest};
use crate::state::ExecutionStatus;
use crate::step::{ConditionFn, InputMapper, Step, StepsBuilder};
use crate::step_executors::dispatch;

/// Run the nested step when the condition holds; otherwise skip.
pub(crate) async fn execute_when(
    executor: &ChainExecutor,
    step: &Step,
    condition: &ConditionFn,
    inner: &Step,
    ctx: &StepContext,
) -> StepOutcome {
    let holds = match condition(ctx.clone()).await {
        Ok(holds) => holds,
        Err(e) => return StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e)),
    };
    debug!("Condition of step {} evaluated to: {}", step.id, holds);

    if let Some(request) = ctx.take_suspend_request() {
        return StepOutcome::Suspend(request);
    }
    if !holds {
        return StepOutcome::Skipped;
    }
    dispatch(executor, inner, ctx).await
}

/// Run every branch concurrently and collect results positionally.
///
/// Every branch settles before the outcome is decided. The first failing
/// branch (by position) fails the step; otherwise the first suspending branch
/// suspends it.
pub(crate) async fn execute_all(
    executor: &ChainExecutor,
    step: &Step,
    steps: &StepsBuilder,
    ctx: &StepContext,
) -> StepOutcome {
    let branches = steps(ctx);
    info!("Executing {} parallel steps in {}", branches.len(), step.id);

    let outcomes = join_all(branches.iter().map(|branch| dispatch(executor, branch, ctx))).await;

    let mut values = Vec::with_capacity(outcomes.len());
    let mut suspension: Option<SuspendRequest> = None;
    for (branch, outcome) in branches.iter().zip(outcomes) {
        match outcome {
            StepOutcome::Value(value) => values.push(value),
            // a skipped branch passes the data through
            StepOutcome::Skipped => values.push(ctx.data.clone()),
            StepOutcome::Suspend(request) => {
                debug!("Branch {} of {} suspended", branch.id, step.id);
                suspension.get_or_insert(request);
            }
            StepOutcome::Error(error) => {
                warn!("Branch {} of {} failed: {}", branch.id, step.id, error);
                return StepOutcome::Error(error);
            }
        }
    }

    match suspension {
        Some(request) => StepOutcome::Suspend(request),
        None => StepOutcome::Value(Value::Array(values)),
    }
}

/// Start every branch on its own task; the first to settle decides.
///
/// Losing branches are detached, not aborted. They stop early only if they
/// observe the suspend controller. Each branch meters its own usage and only
/// the winner's is counted.
pub(crate) async fn execute_race(
    executor: &ChainExecutor,
    step: &Step,
    steps: &[Step],
    ctx: &StepContext,
) -> StepOutcome {
    if steps.is_empty() {
        return StepOutcome::Error(WorkflowError::step(
            ctx.workflow_id(),
            &step.id,
            "race step has no branches",
        ));
    }
    info!("Racing {} steps in {}", steps.len(), step.id);

    let meters: Vec<UsageMeter> = steps.iter().map(|_| UsageMeter::default()).collect();
    let handles = steps.iter().zip(&meters).map(|(branch, meter)| {
        let executor = executor.clone();
        let branch = branch.clone();
        let mut ctx = ctx.clone();
        ctx.usage = meter.clone();
        tokio::spawn(async move { dispatch(&executor, &branch, &ctx).await })
    });

    let (settled, index, losers) = select_all(handles).await;
    debug!(
        "Branch {} won race {}; {} branch(es) left running",
        steps[index].id,
        step.id,
        losers.len()
    );
    drop(losers);
    ctx.usage.add(&meters[index].snapshot());

    match settled {
        Ok(outcome) => outcome,
        Err(e) => StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e)),
    }
}

/// Run another workflow as a single step, or resume its suspended run.
pub(crate) async fn execute_sub_workflow(
    executor: &ChainExecutor,
    step: &Step,
    workflow: &Arc<WorkflowDefinition>,
    input: &InputMapper,
    ctx: &StepContext,
) -> StepOutcome {
    let child_executor = executor.without_store();
    let controller = ctx.writer().controller().scoped(step.id.as_str());

    let (child, result, usage_before) = match ctx.take_resume_child() {
        Some(child) => {
            let usage_before = child.usage;
            let data = ctx.resume_data().cloned().unwrap_or(Value::Null);
            debug!("Resuming sub-workflow {} in step {}", workflow.id, step.id);
            let (child, result) = child_executor
                .resume_child(workflow, *child, data, &controller, ctx.signal())
                .await;
            (child, result, usage_before)
        }
        None => {
            let input = match input(ctx) {
                Ok(input) => input,
                Err(e) => {
                    return StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e));
                }
            };
            debug!("Starting sub-workflow {} in step {}", workflow.id, step.id);
            let (child, result) = child_executor
                .run_child(workflow, input, ctx.metadata(), &controller, ctx.signal())
                .await;
            (child, result, Default::default())
        }
    };

    ctx.usage.add(&child.usage.since(&usage_before));

    if let Err(error) = result {
        return match error {
            WorkflowError::Cancelled { reason, .. } => StepOutcome::Error(WorkflowError::Cancelled {
                execution_id: ctx.execution_id().to_string(),
                reason,
            }),
            error => StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, error)),
        };
    }

    match child.status {
        ExecutionStatus::Completed => StepOutcome::Value(child.data),
        ExecutionStatus::Suspended => {
            let (reason, resume_schema) = child
                .suspension
                .as_ref()
                .map(|s| (s.reason.clone(), s.resume_schema.clone()))
                .unwrap_or_default();
            StepOutcome::Suspend(SuspendRequest {
                reason,
                resume_schema,
                path: Vec::new(),
                child: Some(Box::new(child)),
            })
        }
        ExecutionStatus::Cancelled => StepOutcome::Error(WorkflowError::Cancelled {
            execution_id: ctx.execution_id().to_string(),
            reason: child.cancellation_reason.unwrap_or_default(),
        }),
        status => StepOutcome::Error(WorkflowError::Internal(format!(
            "sub-workflow {} settled with status {}",
            workflow.id, status
        ))),
    }
}
