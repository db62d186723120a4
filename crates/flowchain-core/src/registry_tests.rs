use super::*;

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use crate::definition::WorkflowChain;
use crate::schema::Schema;
use crate::step::Step;
use crate::store::MemoryExecutionStore;

fn approval() -> Arc<WorkflowDefinition> {
    WorkflowChain::new("approval", "Approval")
        .step(
            Step::then("approve", |ctx| async move {
                match ctx.resume_data() {
                    Some(data) => Ok(data.clone()),
                    None => ctx.suspend("waiting for a human"),
                }
            })
            .with_resume_schema(Schema::new(json!({"type": "object"})).unwrap()),
        )
        .build()
        .unwrap()
}

fn napper() -> Arc<WorkflowDefinition> {
    WorkflowChain::new("napper", "Napper")
        .and_sleep("nap", Duration::from_secs(30))
        .and_then("after", |_| async { Ok(json!("woke")) })
        .build()
        .unwrap()
}

fn registry() -> (WorkflowRegistry, Arc<MemoryExecutionStore>) {
    let store = Arc::new(MemoryExecutionStore::new());
    let registry = WorkflowRegistry::new(ChainExecutor::new().with_store(store.clone()));
    registry.register(approval());
    registry.register(napper());
    (registry, store)
}

#[tokio::test]
async fn test_unknown_workflow() {
    let (registry, _) = registry();
    let err = registry
        .run("missing", json!(null), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_workflows_sorted_and_replaced() {
    let (registry, _) = registry();
    let ids: Vec<_> = registry.workflows().iter().map(|w| w.id.clone()).collect();
    assert_eq!(ids, vec!["approval", "napper"]);
    assert!(registry.register(approval()).is_some());
}

#[tokio::test]
async fn test_resume_by_execution_id() {
    let (registry, store) = registry();
    let run = registry
        .run("approval", json!(null), RunOptions::new().user_id("u-1"))
        .await
        .unwrap();
    assert_eq!(run.status(), ExecutionStatus::Suspended);
    let execution_id = run.execution_id().to_string();
    drop(run);
    assert!(!registry.is_running(&execution_id));

    let resumed = registry
        .resume(&execution_id, json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(resumed.status(), ExecutionStatus::Completed);
    assert_eq!(resumed.data(), &json!({"ok": true}));
    assert_eq!(resumed.execution().user_id.as_deref(), Some("u-1"));

    let stored = store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_resume_rejected_data_keeps_record_suspended() {
    let (registry, _) = registry();
    let run = registry.run("approval", json!(null), RunOptions::new()).await.unwrap();
    let execution_id = run.execution_id().to_string();

    let err = registry.resume(&execution_id, json!("not an object")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ResumeValidation { .. }));

    let stored = registry.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Suspended);
}

#[tokio::test]
async fn test_resume_unknown_execution() {
    let (registry, _) = registry();
    let err = registry.resume("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_cancel_suspended_record() {
    let (registry, _) = registry();
    let run = registry.run("approval", json!(null), RunOptions::new()).await.unwrap();
    let execution_id = run.execution_id().to_string();

    match registry.cancel(&execution_id, "abandoned").await.unwrap() {
        CancelOutcome::Cancelled(execution) => {
            assert_eq!(execution.status, ExecutionStatus::Cancelled);
            assert_eq!(execution.cancellation_reason.as_deref(), Some("abandoned"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let err = registry.cancel(&execution_id, "again").await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    assert!(registry.resume(&execution_id, json!({})).await.is_err());
}

#[tokio::test]
async fn test_cancelled_record_cannot_be_resumed_through_held_run() {
    let (registry, store) = registry();
    let mut run = registry.run("approval", json!(null), RunOptions::new()).await.unwrap();
    assert_eq!(run.status(), ExecutionStatus::Suspended);
    let execution_id = run.execution_id().to_string();

    let outcome = registry.cancel(&execution_id, "stop").await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled(_)));

    let events = run.subscribe();
    let err = run.resume(json!({"ok": true})).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::NotSuspended {
            status: ExecutionStatus::Cancelled,
            ..
        }
    ));
    assert_eq!(run.status(), ExecutionStatus::Cancelled);
    let tail: Vec<_> = tokio::time::timeout(Duration::from_secs(2), events.collect())
        .await
        .expect("stream closes once the run is known to be cancelled");
    assert!(tail.is_empty());
    assert_eq!(run.execution().cancellation_reason.as_deref(), Some("stop"));

    let stored = store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert!(stored.step_results.get("approve").is_none());
}

#[tokio::test]
async fn test_cancel_running_execution_signals_it() {
    let (registry, _) = registry();
    let stream = registry
        .stream("napper", json!(null), RunOptions::new().execution_id("nap-1"))
        .unwrap();
    assert!(registry.is_running("nap-1"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = registry.cancel("nap-1", "shutdown").await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Signalled));

    let (events, handle) = stream.into_parts();
    let run = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancelled run should settle quickly")
        .unwrap();
    assert_eq!(run.status(), ExecutionStatus::Cancelled);
    assert!(!registry.is_running("nap-1"));

    let events: Vec<_> = events.collect().await;
    assert_eq!(
        events.last().map(|e| e.event_type.as_str()),
        Some("workflow-cancelled")
    );
}

#[tokio::test]
async fn test_subscribe_to_live_execution() {
    let (registry, _) = registry();
    let _stream = registry
        .stream("napper", json!(null), RunOptions::new().execution_id("nap-2"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut late = registry.subscribe("nap-2").unwrap();
    registry.cancel("nap-2", "done watching").await.unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = late.next().await {
        kinds.push(event.event_type);
    }
    assert_eq!(kinds.last().map(String::as_str), Some("workflow-cancelled"));
    assert!(registry.subscribe("unknown").is_none());
}

#[tokio::test]
async fn test_list_executions_requires_store() {
    let registry = WorkflowRegistry::new(ChainExecutor::new());
    registry.register(approval());
    assert!(matches!(
        registry.list_executions("approval").await,
        Err(WorkflowError::NoStore)
    ));

    let (registry, _) = self::registry();
    registry.run("approval", json!(null), RunOptions::new()).await.unwrap();
    registry.run("approval", json!(null), RunOptions::new()).await.unwrap();
    assert_eq!(registry.list_executions("approval").await.unwrap().len(), 2);
}
