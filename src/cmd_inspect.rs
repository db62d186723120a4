//! List and show handlers.

use flowchain_core::WorkflowRegistry;

use crate::cmd_run::print_summary;

pub(crate) async fn list(
    registry: &WorkflowRegistry,
    workflow: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(workflow) = workflow else {
        return list_workflows(registry, format);
    };

    let executions = registry.list_executions(workflow).await?;
    if executions.is_empty() {
        println!("No executions found.");
        return Ok(());
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&executions)?),
        _ => {
            println!("{:<38} {:<10} {:<8} {}", "EXECUTION", "STATUS", "TOKENS", "STARTED");
            println!("{}", "-".repeat(80));
            for execution in executions {
                println!(
                    "{:<38} {:<10} {:<8} {}",
                    execution.execution_id,
                    execution.status,
                    execution.usage.total_tokens,
                    execution.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

fn list_workflows(registry: &WorkflowRegistry, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let workflows = registry.workflows();
    match format {
        "json" => {
            let summary: Vec<_> = workflows
                .iter()
                .map(|w| {
                    serde_json::json!({
                        "id": w.id,
                        "name": w.name,
                        "description": w.description,
                        "steps": w.step_ids().collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            println!("{:<16} {:<20} {}", "ID", "NAME", "STEPS");
            println!("{}", "-".repeat(80));
            for workflow in workflows {
                let steps: Vec<_> = workflow.step_ids().collect();
                println!("{:<16} {:<20} {}", workflow.id, workflow.name, steps.join(" -> "));
            }
        }
    }
    Ok(())
}

pub(crate) async fn show(
    registry: &WorkflowRegistry,
    execution_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(execution) = registry.get_execution(execution_id).await? else {
        return Err(format!("execution not found: {}", execution_id).into());
    };

    print_summary(&execution);
    if !execution.step_results.is_empty() {
        println!("\nSteps:");
        for record in execution.step_results.iter() {
            println!("  - {}: {}", record.step_id, record.value);
        }
    }
    Ok(())
}
