//! The context object handed to every step invocation.
//!
//! Three separately scoped fields replace a shared keyed map:
//! pipeline data ([`StepContext::data`]), caller metadata ([`RunMetadata`]) and
//! system tracking (execution/workflow/step ids). Cancellation travels as the
//! shared [`SuspendController`].

use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::BoxError;
use crate::outcome::SuspendRequest;
use crate::state::{Execution, Metadata, StepResults, Usage};
use crate::step::Step;
use crate::stream::{PipeOptions, SourceEvent, StreamController};
use crate::suspend::SuspendController;

/// Caller-supplied metadata for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context: Metadata,
}

/// Stream writer bound to the step that owns it.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    controller: StreamController,
    step_id: String,
}

impl StreamWriter {
    pub(crate) fn new(controller: StreamController, step_id: impl Into<String>) -> Self {
        Self {
            controller,
            step_id: step_id.into(),
        }
    }

    /// Write a custom event originating from the current step.
    pub fn write(&self, event_type: impl Into<String>, payload: Value) -> Option<u64> {
        self.controller.write(event_type, self.step_id.as_str(), payload)
    }

    /// Forward an external event sequence, prefixed with the current step id.
    pub fn pipe_from<S>(&self, source: S, options: PipeOptions) -> JoinHandle<usize>
    where
        S: Stream<Item = SourceEvent> + Send + 'static,
    {
        let options = if options.has_prefix() {
            options
        } else {
            options.prefix(self.step_id.clone())
        };
        self.controller.pipe_from(source, options)
    }

    pub fn controller(&self) -> &StreamController {
        &self.controller
    }
}

/// Ids identifying where a context sits in a run.
#[derive(Debug, Clone)]
pub(crate) struct Tracking {
    pub(crate) execution_id: String,
    pub(crate) workflow_id: String,
    pub(crate) step_id: String,
    pub(crate) step_index: usize,
}

/// Resume data injected into the first dispatch after a resume.
#[derive(Debug)]
pub(crate) struct ResumeInput {
    pub(crate) target_step_id: String,
    pub(crate) data: Value,
    pub(crate) child: Mutex<Option<Box<Execution>>>,
}

/// Running token total shared by every step of one execution.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsageMeter(Arc<Mutex<Usage>>);

impl UsageMeter {
    pub(crate) fn starting_at(usage: Usage) -> Self {
        Self(Arc::new(Mutex::new(usage)))
    }

    pub(crate) fn add(&self, usage: &Usage) {
        self.0.lock().add(usage);
    }

    pub(crate) fn snapshot(&self) -> Usage {
        *self.0.lock()
    }
}

/// View of the run given to step bodies.
#[derive(Clone)]
pub struct StepContext {
    /// Current pipeline value.
    pub data: Value,
    state: Arc<StepResults>,
    writer: StreamWriter,
    metadata: Arc<RunMetadata>,
    tracking: Tracking,
    signal: SuspendController,
    resume: Option<Arc<ResumeInput>>,
    resume_schema: Option<Value>,
    pending_suspend: Arc<Mutex<Option<SuspendRequest>>>,
    pub(crate) usage: UsageMeter,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        data: Value,
        state: Arc<StepResults>,
        controller: StreamController,
        metadata: Arc<RunMetadata>,
        tracking: Tracking,
        signal: SuspendController,
        resume: Option<Arc<ResumeInput>>,
        usage: UsageMeter,
    ) -> Self {
        let writer = StreamWriter::new(controller, tracking.step_id.clone());
        Self {
            data,
            state,
            writer,
            metadata,
            tracking,
            signal,
            resume,
            resume_schema: None,
            pending_suspend: Arc::new(Mutex::new(None)),
            usage,
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Result of a step that already ran in this execution.
    ///
    /// `None` for steps that have not executed yet (or were skipped).
    pub fn get_step_data(&self, step_id: &str) -> Option<&Value> {
        self.state.get(step_id)
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn execution_id(&self) -> &str {
        &self.tracking.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.tracking.workflow_id
    }

    pub fn step_id(&self) -> &str {
        &self.tracking.step_id
    }

    /// Index of the enclosing top-level step.
    pub fn step_index(&self) -> usize {
        self.tracking.step_index
    }

    /// Shared suspend/cancel signal; poll it in long-running bodies.
    pub fn signal(&self) -> &SuspendController {
        &self.signal
    }

    /// Data supplied to `resume`, present only on the re-entry of the step that suspended.
    pub fn resume_data(&self) -> Option<&Value> {
        self.resume
            .as_deref()
            .filter(|resume| resume.target_step_id == self.tracking.step_id)
            .map(|resume| &resume.data)
    }

    /// Request suspension of the execution at this step.
    ///
    /// The step's return value is discarded once a suspension is requested,
    /// so bodies usually `return ctx.suspend(..)`.
    pub fn suspend(&self, reason: impl Into<String>) -> Result<Value, BoxError> {
        let mut request = SuspendRequest::new(Some(reason.into()));
        request.resume_schema = self.resume_schema.clone();
        *self.pending_suspend.lock() = Some(request);
        Ok(self.data.clone())
    }

    pub(crate) fn take_suspend_request(&self) -> Option<SuspendRequest> {
        self.pending_suspend.lock().take()
    }

    /// Child execution to resume, when re-entering the sub-workflow step that suspended.
    pub(crate) fn take_resume_child(&self) -> Option<Box<Execution>> {
        self.resume
            .as_deref()
            .filter(|resume| resume.target_step_id == self.tracking.step_id)
            .and_then(|resume| resume.child.lock().take())
    }

    /// Context for dispatching `step`, with a fresh suspension slot.
    pub(crate) fn for_step(&self, step: &Step) -> StepContext {
        let mut tracking = self.tracking.clone();
        tracking.step_id = step.id.clone();
        Self {
            data: self.data.clone(),
            state: self.state.clone(),
            writer: StreamWriter::new(self.writer.controller.clone(), step.id.clone()),
            metadata: self.metadata.clone(),
            tracking,
            signal: self.signal.clone(),
            resume: self.resume.clone(),
            resume_schema: step.resume_schema.as_ref().map(|s| s.as_value().clone()),
            pending_suspend: Arc::new(Mutex::new(None)),
            usage: self.usage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(step_id: &str, resume: Option<Arc<ResumeInput>>) -> StepContext {
        let mut results = StepResults::new();
        results.insert("first", json!({"greeting": "hi"}));
        StepContext::new(
            json!({"n": 1}),
            Arc::new(results),
            StreamController::new("exec-1"),
            Arc::new(RunMetadata::default()),
            Tracking {
                execution_id: "exec-1".to_string(),
                workflow_id: "wf-1".to_string(),
                step_id: step_id.to_string(),
                step_index: 1,
            },
            SuspendController::new(),
            resume,
            UsageMeter::default(),
        )
    }

    #[test]
    fn test_get_step_data() {
        let ctx = context("second", None);
        assert_eq!(ctx.get_step_data("first"), Some(&json!({"greeting": "hi"})));
        assert_eq!(ctx.get_step_data("second"), None);
    }

    #[test]
    fn test_resume_data_only_for_target_step() {
        let resume = Arc::new(ResumeInput {
            target_step_id: "approve".to_string(),
            data: json!({"approved": true}),
            child: Mutex::new(None),
        });
        let ctx = context("approve", Some(resume.clone()));
        assert_eq!(ctx.resume_data(), Some(&json!({"approved": true})));

        let other = context("notify", Some(resume));
        assert_eq!(other.resume_data(), None);
    }

    #[test]
    fn test_suspend_is_recorded_once() {
        let ctx = context("approve", None);
        let returned = ctx.suspend("needs approval").unwrap();
        assert_eq!(returned, json!({"n": 1}));

        let request = ctx.take_suspend_request().unwrap();
        assert_eq!(request.reason.as_deref(), Some("needs approval"));
        assert!(ctx.take_suspend_request().is_none());
    }

    #[test]
    fn test_usage_meter_is_shared() {
        let ctx = context("a", None);
        let clone = ctx.clone();
        clone.usage.add(&Usage::new(3, 4));
        assert_eq!(ctx.usage.snapshot().total_tokens, 7);
    }
}
