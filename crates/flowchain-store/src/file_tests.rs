use super::*;

use chrono::{Duration, Utc};
use flowchain_core::{ExecutionStatus, RunMetadata};
use serde_json::json;
use tempfile::TempDir;

fn execution(id: &str, workflow_id: &str) -> Execution {
    Execution::new(id, workflow_id, json!({"n": 1}), &RunMetadata::default())
}

fn finished(id: &str, workflow_id: &str, minutes_ago: i64) -> Execution {
    let mut exec = execution(id, workflow_id);
    exec.transition(ExecutionStatus::Completed).unwrap();
    exec.started_at = Utc::now() - Duration::minutes(minutes_ago + 1);
    exec.ended_at = Some(Utc::now() - Duration::minutes(minutes_ago));
    exec
}

#[tokio::test]
async fn test_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();

    let mut exec = execution("exec-1", "greeting");
    exec.step_results.insert("greet", json!({"greeting": "hi"}));
    store.save(&exec).await.unwrap();

    let loaded = store.load("exec-1").await.unwrap().unwrap();
    assert_eq!(loaded, exec);
    assert!(temp_dir.path().join("greeting").join("exec-1.json").exists());
    assert!(!temp_dir.path().join("greeting").join("exec-1.json.tmp").exists());
}

#[tokio::test]
async fn test_save_overwrites() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();

    let mut exec = execution("exec-1", "approval");
    store.save(&exec).await.unwrap();
    exec.transition(ExecutionStatus::Suspended).unwrap();
    store.save(&exec).await.unwrap();

    let loaded = store.load("exec-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Suspended);
    assert_eq!(store.list("approval").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_load_missing() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();
    assert!(store.load("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_oldest_first_and_skips_garbage() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();

    store.save(&finished("newer", "wf", 1)).await.unwrap();
    store.save(&finished("older", "wf", 10)).await.unwrap();
    store.save(&execution("other", "another-wf")).await.unwrap();
    std::fs::write(temp_dir.path().join("wf").join("broken.json"), "{not json").unwrap();

    let ids: Vec<_> = store
        .list("wf")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.execution_id)
        .collect();
    assert_eq!(ids, vec!["older", "newer"]);
    assert!(store.list("unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();

    store.save(&execution("exec-1", "wf")).await.unwrap();
    store.delete("exec-1").await.unwrap();
    store.delete("exec-1").await.unwrap();
    assert!(store.load("exec-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ids_are_sanitized() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path()).await.unwrap();

    store.save(&execution("../escape", "team/flow")).await.unwrap();
    assert!(temp_dir.path().join("team_flow").join("___escape.json").exists());
    assert!(store.load("../escape").await.unwrap().is_some());
}

#[tokio::test]
async fn test_retention_prunes_oldest_finished_records() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileExecutionStore::new(temp_dir.path())
        .await
        .unwrap()
        .with_retention(2);

    let mut waiting = execution("waiting", "wf");
    waiting.transition(ExecutionStatus::Suspended).unwrap();
    store.save(&waiting).await.unwrap();

    store.save(&finished("a", "wf", 30)).await.unwrap();
    store.save(&finished("b", "wf", 20)).await.unwrap();
    store.save(&finished("c", "wf", 10)).await.unwrap();

    let mut ids: Vec<_> = store
        .list("wf")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.execution_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c", "waiting"]);
}

#[tokio::test]
async fn test_persisted_resume_across_store_instances() {
    use flowchain_core::{ChainExecutor, RunOptions, Step, WorkflowChain};
    use std::sync::Arc;

    let temp_dir = TempDir::new().unwrap();
    let workflow = WorkflowChain::new("approval", "Approval")
        .step(Step::then("approve", |ctx| async move {
            match ctx.resume_data() {
                Some(data) => Ok(data.clone()),
                None => ctx.suspend("needs sign-off"),
            }
        }))
        .build()
        .unwrap();

    let first = Arc::new(FileExecutionStore::new(temp_dir.path()).await.unwrap());
    let run = ChainExecutor::new()
        .with_store(first)
        .run(workflow.clone(), json!(null), RunOptions::new())
        .await
        .unwrap();
    let execution_id = run.execution_id().to_string();
    drop(run);

    let second = Arc::new(FileExecutionStore::new(temp_dir.path()).await.unwrap());
    let record = second.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Suspended);

    let resumed = ChainExecutor::new()
        .with_store(second.clone())
        .resume(workflow, record, json!({"signed": true}), Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.data(), &json!({"signed": true}));

    let stored = second.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
}
