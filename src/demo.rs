//! Built-in demo workflows.

use std::sync::Arc;

use flowchain_core::{
    Schema, StaticAgent, Step, WorkflowChain, WorkflowDefinition, WorkflowError,
};
use serde_json::json;

/// Every workflow the CLI knows about.
pub(crate) fn workflows() -> Result<Vec<Arc<WorkflowDefinition>>, WorkflowError> {
    Ok(vec![greeting()?, approval()?])
}

/// `{name}` to `{greeting}`, shouted when the name is given.
pub(crate) fn greeting() -> Result<Arc<WorkflowDefinition>, WorkflowError> {
    WorkflowChain::new("greeting", "Greeting")
        .description("Greets someone by name")
        .input_schema(Schema::new(json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }))?)
        .result_schema(Schema::new(json!({
            "type": "object",
            "properties": { "greeting": { "type": "string" } },
            "required": ["greeting"]
        }))?)
        .and_then("greet", |ctx| async move {
            let name = ctx.data["name"].as_str().unwrap_or_default().to_string();
            Ok(json!({ "greeting": format!("Hello, {name}") }))
        })
        .and_when(
            "shout",
            |ctx| async move { Ok(ctx.get_step_data("greet").is_some()) },
            Step::then("uppercase", |ctx| async move {
                let greeting = ctx.data["greeting"].as_str().unwrap_or_default();
                Ok(json!({ "greeting": greeting.to_uppercase() }))
            }),
        )
        .build()
}

/// Drafts a change with an agent, then waits for a human decision.
pub(crate) fn approval() -> Result<Arc<WorkflowDefinition>, WorkflowError> {
    let drafter = StaticAgent::new(
        "drafter",
        json!({ "title": "Rotate credentials", "risk": "low" }),
    )
    .with_usage(120, 40);

    WorkflowChain::new("approval", "Change approval")
        .description("Drafts a change request and suspends until someone approves it")
        .and_agent("draft", Arc::new(drafter), |ctx| {
            Ok(format!("Draft a change request for: {}", ctx.data))
        })
        .step(
            Step::then("review", |ctx| async move {
                match ctx.resume_data() {
                    Some(decision) => Ok(json!({
                        "change": ctx.data.clone(),
                        "approved": decision["approved"].as_bool().unwrap_or(false),
                        "comment": decision.get("comment").cloned().unwrap_or_default(),
                    })),
                    None => ctx.suspend("waiting for a reviewer"),
                }
            })
            .with_resume_schema(Schema::new(json!({
                "type": "object",
                "properties": {
                    "approved": { "type": "boolean" },
                    "comment": { "type": "string" }
                },
                "required": ["approved"]
            }))?),
        )
        .and_then("finalize", |ctx| async move {
            let status = if ctx.data["approved"].as_bool() == Some(true) {
                "applied"
            } else {
                "rejected"
            };
            Ok(json!({ "status": status, "change": ctx.data["change"].clone() }))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchain_core::{ExecutionStatus, RunOptions};

    #[tokio::test]
    async fn test_greeting() {
        let run = greeting()
            .unwrap()
            .run(json!({"name": "Alice"}), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(run.data(), &json!({"greeting": "HELLO, ALICE"}));
    }

    #[tokio::test]
    async fn test_approval_round_trip() {
        let mut run = approval()
            .unwrap()
            .run(json!({"ticket": 7}), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(run.status(), ExecutionStatus::Suspended);
        assert_eq!(run.usage().total_tokens, 160);

        run.resume(json!({"approved": true})).await.unwrap();
        assert_eq!(run.status(), ExecutionStatus::Completed);
        assert_eq!(run.data()["status"], json!("applied"));
    }
}
