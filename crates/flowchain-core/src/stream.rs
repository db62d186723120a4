//! Per-execution event stream.
//!
//! A [`StreamController`] assigns every written event a sequence number and
//! fans it out to all current subscribers in write order. The controller
//! stays open across suspend/resume; it closes when the execution reaches a
//! terminal status.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

/// Event types emitted by the engine.
pub mod event_types {
    pub const WORKFLOW_START: &str = "workflow-start";
    pub const STEP_START: &str = "step-start";
    pub const STEP_COMPLETE: &str = "step-complete";
    pub const WORKFLOW_SUSPENDED: &str = "workflow-suspended";
    pub const WORKFLOW_RESUMED: &str = "workflow-resumed";
    pub const WORKFLOW_COMPLETE: &str = "workflow-complete";
    pub const WORKFLOW_ERROR: &str = "workflow-error";
    pub const WORKFLOW_CANCELLED: &str = "workflow-cancelled";
}

/// `from` value used for events about the workflow as a whole.
pub const WORKFLOW_SOURCE: &str = "workflow";

/// An event observed by stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating step id, or `"workflow"`.
    pub from: String,
    pub timestamp: DateTime<Utc>,
    pub execution_id: String,
    /// Position in the controller's total order.
    pub sequence: u64,
    #[serde(default)]
    pub payload: Value,
}

impl StreamEvent {
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

/// An event coming from an external async sequence, before it is stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl SourceEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            from: None,
            payload,
        }
    }
}

type EventFilter = Arc<dyn Fn(&SourceEvent) -> bool + Send + Sync>;

/// How [`StreamController::pipe_from`] forwards a source.
#[derive(Clone, Default)]
pub struct PipeOptions {
    prefix: Option<String>,
    filter: Option<EventFilter>,
}

impl PipeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix prepended to the `from` field of forwarded events.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Only forward events accepted by `filter`.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&SourceEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Only forward events whose type is listed.
    pub fn only_types(self, types: &[&str]) -> Self {
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        self.filter(move |event| types.iter().any(|t| *t == event.event_type))
    }

    pub fn has_prefix(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn accepts(&self, event: &SourceEvent) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(event))
    }

    fn source_name(&self, event: &SourceEvent) -> String {
        match (&self.prefix, &event.from) {
            (Some(prefix), Some(from)) => format!("{prefix}/{from}"),
            (Some(prefix), None) => prefix.clone(),
            (None, Some(from)) => from.clone(),
            (None, None) => "pipe".to_string(),
        }
    }
}

impl fmt::Debug for PipeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeOptions")
            .field("prefix", &self.prefix)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

struct SharedState {
    subscribers: Vec<mpsc::UnboundedSender<StreamEvent>>,
    sequence: u64,
    closed: bool,
}

struct Shared {
    execution_id: String,
    state: Mutex<SharedState>,
}

/// Ordered, multi-consumer event channel scoped to one execution.
#[derive(Clone)]
pub struct StreamController {
    shared: Arc<Shared>,
    scope: Option<String>,
}

impl StreamController {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                execution_id: execution_id.into(),
                state: Mutex::new(SharedState {
                    subscribers: Vec::new(),
                    sequence: 0,
                    closed: false,
                }),
            }),
            scope: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.shared.execution_id
    }

    /// Receive every event written from now on.
    ///
    /// Subscribing to a closed controller yields an empty stream.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Enqueue an event. Returns its sequence number, or `None` once closed.
    pub fn write(
        &self,
        event_type: impl Into<String>,
        from: impl Into<String>,
        payload: Value,
    ) -> Option<u64> {
        let from = from.into();
        let from = match &self.scope {
            Some(scope) => format!("{scope}/{from}"),
            None => from,
        };

        let mut state = self.shared.state.lock();
        if state.closed {
            trace!("Dropping event from {} on closed stream", from);
            return None;
        }
        state.sequence += 1;
        let event = StreamEvent {
            event_type: event_type.into(),
            from,
            timestamp: Utc::now(),
            execution_id: self.shared.execution_id.clone(),
            sequence: state.sequence,
            payload,
        };
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        Some(event.sequence)
    }

    /// Forward every event of `source` into this controller.
    ///
    /// Runs on a spawned task; the handle resolves to the number of events
    /// forwarded once the source is exhausted.
    pub fn pipe_from<S>(&self, source: S, options: PipeOptions) -> JoinHandle<usize>
    where
        S: Stream<Item = SourceEvent> + Send + 'static,
    {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut source = Box::pin(source);
            let mut forwarded = 0;
            while let Some(event) = source.next().await {
                if !options.accepts(&event) {
                    continue;
                }
                let from = options.source_name(&event);
                if controller.write(event.event_type, from, event.payload).is_some() {
                    forwarded += 1;
                }
            }
            forwarded
        })
    }

    /// A view whose events carry `from = "<prefix>/<from>"` and which cannot close the stream.
    pub fn scoped(&self, prefix: impl Into<String>) -> StreamController {
        let prefix = prefix.into();
        let scope = match &self.scope {
            Some(outer) => format!("{outer}/{prefix}"),
            None => prefix,
        };
        Self {
            shared: self.shared.clone(),
            scope: Some(scope),
        }
    }

    /// End the stream for every subscriber. No-op on scoped views.
    pub fn close(&self) {
        if self.scope.is_some() {
            return;
        }
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("execution_id", &self.shared.execution_id)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Consumer side of a [`StreamController`] subscription.
pub struct EventStream {
    inner: UnboundedReceiverStream<StreamEvent>,
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
