//! Step dispatch and the leaf step executors (then, tap, agent, sleep).

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::agent::{AgentError, AgentRequest};
use crate::context::StepContext;
use crate::error::{ValidationTarget, WorkflowError};
use crate::executor::ChainExecutor;
use crate::outcome::{StepOutcome, SuspendRequest};
use crate::step::{AgentStep, Step, StepKind};
use crate::step_composite;
use crate::suspend::SuspendState;

/// Execute one step (boxed for recursion through composite steps).
///
/// Applies the step's timeout and turns a `ctx.suspend()` call made by the
/// body into a suspend outcome.
pub(crate) fn dispatch<'a>(
    executor: &'a ChainExecutor,
    step: &'a Step,
    parent: &'a StepContext,
) -> BoxFuture<'a, StepOutcome> {
    Box::pin(async move {
        let ctx = parent.for_step(step);
        debug!(
            "Dispatching {} step {} (execution {})",
            step.kind_name(),
            step.id,
            ctx.execution_id()
        );

        let outcome = match executor.step_timeout(step) {
            Some(limit) => {
                match tokio::time::timeout(limit, execute(executor, step, &ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Step {} timed out after {:?}", step.id, limit);
                        StepOutcome::Error(WorkflowError::Timeout {
                            step_id: step.id.clone(),
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }
                }
            }
            None => execute(executor, step, &ctx).await,
        };

        let outcome = match ctx.take_suspend_request() {
            Some(request) if !outcome.is_error() => StepOutcome::Suspend(request),
            _ => outcome,
        };
        match outcome {
            StepOutcome::Suspend(request) => StepOutcome::Suspend(request.within(&step.id)),
            other => other,
        }
    })
}

async fn execute(executor: &ChainExecutor, step: &Step, ctx: &StepContext) -> StepOutcome {
    match &step.kind {
        StepKind::Then { execute } => match execute(ctx.clone()).await {
            Ok(value) => StepOutcome::Value(value),
            Err(e) => StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e)),
        },
        StepKind::Tap { execute } => match execute(ctx.clone()).await {
            Ok(()) => StepOutcome::Value(ctx.data.clone()),
            Err(e) => StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e)),
        },
        StepKind::Agent(agent) => execute_agent(step, agent, ctx).await,
        StepKind::When { condition, step: inner } => {
            step_composite::execute_when(executor, step, condition, inner, ctx).await
        }
        StepKind::All { steps } => step_composite::execute_all(executor, step, steps, ctx).await,
        StepKind::Race { steps } => step_composite::execute_race(executor, step, steps, ctx).await,
        StepKind::SubWorkflow { workflow, input } => {
            step_composite::execute_sub_workflow(executor, step, workflow, input, ctx).await
        }
        StepKind::Sleep { duration } => execute_sleep(step, *duration, ctx).await,
    }
}

/// Call the agent, account its usage and check its output.
async fn execute_agent(step: &Step, agent: &AgentStep, ctx: &StepContext) -> StepOutcome {
    let prompt = match (agent.prompt)(ctx) {
        Ok(prompt) => prompt,
        Err(e) => return StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e)),
    };
    let request = AgentRequest {
        prompt,
        result_schema: agent.result_schema.as_ref().map(|s| s.as_value().clone()),
        user_id: ctx.metadata().user_id.clone(),
        conversation_id: ctx.metadata().conversation_id.clone(),
        signal: ctx.signal().clone(),
    };
    debug!("Calling agent {} for step {}", agent.agent.name(), step.id);

    let result = match &agent.forward_events {
        Some(options) => match agent.agent.stream(request).await {
            Ok(response) => {
                let forwarding = ctx.writer().pipe_from(response.events, options.clone());
                let output = response.output.await;
                match forwarding.await {
                    Ok(count) => debug!("Forwarded {} agent events for step {}", count, step.id),
                    Err(e) => warn!("Agent event forwarding for step {} failed: {}", step.id, e),
                }
                output
            }
            Err(e) => Err(e),
        },
        None => agent.agent.generate(request).await,
    };

    let output = match result {
        Ok(output) => output,
        Err(AgentError::Aborted) => return aborted(step, ctx),
        Err(e) => {
            return StepOutcome::Error(WorkflowError::step(ctx.workflow_id(), &step.id, e));
        }
    };

    ctx.usage.add(&output.usage);
    if let Some(schema) = &agent.result_schema {
        if let Err(errors) = schema.validate(&output.object) {
            return StepOutcome::Error(WorkflowError::Validation {
                target: ValidationTarget::AgentOutput,
                errors,
            });
        }
    }
    StepOutcome::Value(output.object)
}

/// Map an agent that stopped early onto the request that stopped it.
fn aborted(step: &Step, ctx: &StepContext) -> StepOutcome {
    match ctx.signal().state() {
        SuspendState::CancelRequested(reason) => StepOutcome::Error(WorkflowError::Cancelled {
            execution_id: ctx.execution_id().to_string(),
            reason,
        }),
        SuspendState::SuspendRequested(reason) => {
            StepOutcome::Suspend(SuspendRequest::new(Some(reason)))
        }
        SuspendState::Active => StepOutcome::Error(WorkflowError::step(
            ctx.workflow_id(),
            &step.id,
            AgentError::Aborted,
        )),
    }
}

async fn execute_sleep(step: &Step, duration: Duration, ctx: &StepContext) -> StepOutcome {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = ctx.signal().signalled() => {
            debug!("Sleep step {} interrupted by {:?}", step.id, ctx.signal().state());
        }
    }
    StepOutcome::Value(ctx.data.clone())
}
