//! Agent capability consumed by agent steps.
//!
//! The language-model call itself is an external collaborator; the engine only
//! needs structured output, token usage and, optionally, the agent's own event
//! stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::state::Usage;
use crate::stream::SourceEvent;
use crate::suspend::SuspendController;

/// Agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid agent output: {0}")]
    InvalidOutput(String),

    #[error("Agent was aborted")]
    Aborted,
}

/// What an agent step sends to the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Requested shape of [`AgentOutput::object`].
    pub result_schema: Option<Value>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// The run's suspend/cancel signal; agents should stop early when it fires.
    pub signal: SuspendController,
}

/// Structured output of one agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub object: Value,
    pub usage: Usage,
}

/// Streaming form of an agent call.
pub struct AgentStreamResponse {
    /// The agent's internal events (text deltas, tool calls, ...).
    pub events: BoxStream<'static, SourceEvent>,
    /// Settles once the agent has finished.
    pub output: BoxFuture<'static, Result<AgentOutput, AgentError>>,
}

/// Core trait for agents usable from workflows.
#[async_trait]
pub trait WorkflowAgent: Send + Sync {
    /// Returns the agent name.
    fn name(&self) -> &str;

    /// Produce structured output for a prompt.
    async fn generate(&self, request: AgentRequest) -> Result<AgentOutput, AgentError>;

    /// Produce structured output while exposing the agent's event stream.
    ///
    /// Agents without an event stream get an empty one.
    async fn stream(&self, request: AgentRequest) -> Result<AgentStreamResponse, AgentError> {
        let output = self.generate(request).await;
        Ok(AgentStreamResponse {
            events: stream::empty().boxed(),
            output: futures::future::ready(output).boxed(),
        })
    }
}

/// Agent returning canned output. Records every prompt it receives.
pub struct StaticAgent {
    name: String,
    object: Value,
    usage: Usage,
    events: Vec<SourceEvent>,
    delay: Option<Duration>,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl StaticAgent {
    pub fn new(name: impl Into<String>, object: Value) -> Self {
        Self {
            name: name.into(),
            object,
            usage: Usage::default(),
            events: Vec::new(),
            delay: None,
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Usage::new(prompt_tokens, completion_tokens);
        self
    }

    /// Events emitted by [`WorkflowAgent::stream`].
    pub fn with_events(mut self, events: Vec<SourceEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl WorkflowAgent for StaticAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: AgentRequest) -> Result<AgentOutput, AgentError> {
        self.prompts.lock().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = request.signal.signalled() => return Err(AgentError::Aborted),
            }
        }
        if let Some(message) = &self.failure {
            return Err(AgentError::ExecutionFailed(message.clone()));
        }
        Ok(AgentOutput {
            object: self.object.clone(),
            usage: self.usage,
        })
    }

    async fn stream(&self, request: AgentRequest) -> Result<AgentStreamResponse, AgentError> {
        let output = self.generate(request).await;
        Ok(AgentStreamResponse {
            events: stream::iter(self.events.clone()).boxed(),
            output: futures::future::ready(output).boxed(),
        })
    }
}
