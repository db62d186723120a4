use super::*;
use futures::stream;
use serde_json::json;

async fn drain(mut events: EventStream) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_events_delivered_in_write_order() {
    let controller = StreamController::new("exec-1");
    let events = controller.subscribe();

    controller.write(event_types::WORKFLOW_START, WORKFLOW_SOURCE, json!({}));
    controller.write(event_types::STEP_START, "a", json!({}));
    controller.write(event_types::STEP_COMPLETE, "a", json!({"result": 1}));
    controller.close();

    let received = drain(events).await;
    let kinds: Vec<_> = received.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["workflow-start", "step-start", "step-complete"]);
    let sequences: Vec<_> = received.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(received.iter().all(|e| e.execution_id == "exec-1"));
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event() {
    let controller = StreamController::new("exec-1");
    let first = controller.subscribe();
    let second = controller.subscribe();

    controller.write("custom", "a", json!(1));
    controller.write("custom", "b", json!(2));
    controller.close();

    let first = drain(first).await;
    let second = drain(second).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_late_subscriber_only_sees_later_events() {
    let controller = StreamController::new("exec-1");
    controller.write("custom", "a", json!(1));
    let late = controller.subscribe();
    controller.write("custom", "b", json!(2));
    controller.close();

    let received = drain(late).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from, "b");
    assert_eq!(received[0].sequence, 2);
}

#[tokio::test]
async fn test_writes_after_close_are_dropped() {
    let controller = StreamController::new("exec-1");
    controller.close();
    assert!(controller.is_closed());
    assert_eq!(controller.write("custom", "a", json!(null)), None);
    assert!(drain(controller.subscribe()).await.is_empty());
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_writers() {
    let controller = StreamController::new("exec-1");
    let kept = controller.subscribe();
    drop(controller.subscribe());

    assert_eq!(controller.write("custom", "a", json!(1)), Some(1));
    controller.close();
    assert_eq!(drain(kept).await.len(), 1);
}

#[tokio::test]
async fn test_scoped_view_prefixes_and_cannot_close() {
    let controller = StreamController::new("exec-1");
    let events = controller.subscribe();
    let scoped = controller.scoped("sub").scoped("inner");

    scoped.write("custom", "step", json!({}));
    scoped.close();
    assert!(!controller.is_closed());

    controller.write("custom", "outer", json!({}));
    controller.close();

    let received = drain(events).await;
    assert_eq!(received[0].from, "sub/inner/step");
    assert_eq!(received[1].from, "outer");
}

#[tokio::test]
async fn test_pipe_from_applies_prefix_and_filter() {
    let controller = StreamController::new("exec-1");
    let events = controller.subscribe();

    let source = stream::iter(vec![
        SourceEvent::new("text-delta", json!("Hel")),
        SourceEvent::new("tool-call", json!({"name": "search"})),
        SourceEvent::new("text-delta", json!("lo")),
    ]);
    let forwarded = controller
        .pipe_from(
            source,
            PipeOptions::new().prefix("writer").only_types(&["text-delta"]),
        )
        .await
        .unwrap();
    controller.close();

    assert_eq!(forwarded, 2);
    let received = drain(events).await;
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|e| e.from == "writer"));
    assert_eq!(received[0].payload, json!("Hel"));
    assert_eq!(received[1].payload, json!("lo"));
}

#[test]
fn test_pipe_options_source_names() {
    let mut event = SourceEvent::new("x", json!(null));
    assert_eq!(PipeOptions::new().source_name(&event), "pipe");
    assert_eq!(PipeOptions::new().prefix("agent").source_name(&event), "agent");
    event.from = Some("tool".to_string());
    assert_eq!(
        PipeOptions::new().prefix("agent").source_name(&event),
        "agent/tool"
    );
}

#[test]
fn test_stream_event_wire_format() {
    let event = StreamEvent {
        event_type: "step-complete".to_string(),
        from: "a".to_string(),
        timestamp: Utc::now(),
        execution_id: "exec-1".to_string(),
        sequence: 4,
        payload: json!({"result": 1}),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "step-complete");
    assert_eq!(value["executionId"], "exec-1");
    assert!(event.is(event_types::STEP_COMPLETE));
}
