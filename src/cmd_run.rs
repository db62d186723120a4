//! Run, stream, resume and cancel handlers.

use futures::StreamExt;
use serde_json::Value;
use tracing::info;

use flowchain_core::{
    CancelOutcome, Execution, ExecutionStatus, RunOptions, StreamEvent, WorkflowRegistry,
};

fn parse_json(flag: &str, raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    serde_json::from_str(raw).map_err(|e| format!("--{} is not valid JSON: {}", flag, e).into())
}

fn run_options(user_id: Option<String>) -> RunOptions {
    match user_id {
        Some(user_id) => RunOptions::new().user_id(user_id),
        None => RunOptions::new(),
    }
}

pub(crate) async fn run(
    registry: &WorkflowRegistry,
    workflow: &str,
    input: &str,
    user_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = parse_json("input", input)?;
    let run = registry.run(workflow, input, run_options(user_id)).await?;
    print_summary(run.execution());
    Ok(())
}

/// Print events as they arrive, then the final summary.
pub(crate) async fn stream(
    registry: &WorkflowRegistry,
    workflow: &str,
    input: &str,
    user_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = parse_json("input", input)?;
    let (mut events, handle) = registry
        .stream(workflow, input, run_options(user_id))?
        .into_parts();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            print_event(&event);
        }
    });

    let result = handle.await;
    // a suspended run keeps its stream open until the run is dropped
    let execution = result.map(|run| run.into_execution());
    printer.await?;

    print_summary(&execution?);
    Ok(())
}

pub(crate) async fn resume(
    registry: &WorkflowRegistry,
    execution_id: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = parse_json("data", data)?;
    let run = registry.resume(execution_id, data).await?;
    print_summary(run.execution());
    Ok(())
}

pub(crate) async fn cancel(
    registry: &WorkflowRegistry,
    execution_id: &str,
    reason: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match registry.cancel(execution_id, reason).await? {
        CancelOutcome::Cancelled(execution) => print_summary(&execution),
        CancelOutcome::Signalled => {
            info!("Execution {} signalled", execution_id);
            println!("Execution {} will stop at its next step boundary.", execution_id);
        }
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    println!(
        "[{:>4}] {:<20} {:<24} {}",
        event.sequence, event.event_type, event.from, event.payload
    );
}

pub(crate) fn print_summary(execution: &Execution) {
    println!("Execution: {}", execution.execution_id);
    println!("{}", "=".repeat(50));
    println!("Workflow:  {}", execution.workflow_id);
    println!("Status:    {}", execution.status);
    println!(
        "Usage:     {} tokens ({} prompt, {} completion)",
        execution.usage.total_tokens, execution.usage.prompt_tokens, execution.usage.completion_tokens
    );

    match execution.status {
        ExecutionStatus::Completed => println!("Result:    {}", execution.data),
        ExecutionStatus::Suspended => {
            if let Some(suspension) = &execution.suspension {
                println!("Waiting:   {}", suspension.target_step_id());
                if let Some(reason) = &suspension.reason {
                    println!("Reason:    {}", reason);
                }
                if let Some(schema) = &suspension.resume_schema {
                    println!("Expects:   {}", schema);
                }
            }
            println!(
                "\nResume with: flowchain resume {} --data '<json>'",
                execution.execution_id
            );
        }
        ExecutionStatus::Failed => {
            println!("Error:     {}", execution.error.as_deref().unwrap_or("-"));
        }
        ExecutionStatus::Cancelled => {
            println!(
                "Reason:    {}",
                execution.cancellation_reason.as_deref().unwrap_or("-")
            );
        }
        ExecutionStatus::Running => {}
    }
}
