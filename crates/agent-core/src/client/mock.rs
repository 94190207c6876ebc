//! Scripted LLM Client
//!
//! Deterministic stand-in for the hosted model. Replays queued replies in
//! order and records every request, so tests can count hops and inspect the
//! exact message list the agent sent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionOptions, LlmClient};
use crate::error::{AgentError, Result};
use crate::message::{Message, ToolCall};
use crate::tool::ToolSchema;

/// One scripted step
#[derive(Clone, Debug)]
enum Step {
    Reply(Message),
    Fail(String),
}

/// A request as the client saw it
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub options: CompletionOptions,
}

/// Mock client replaying a fixed script
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text assistant reply
    #[must_use]
    pub fn reply(self, content: impl Into<String>) -> Self {
        self.push(Step::Reply(Message::assistant(content)))
    }

    /// Queue an assistant reply that requests tools
    #[must_use]
    pub fn tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Step::Reply(Message::assistant_with_tools("", calls)))
    }

    /// Queue an arbitrary assistant message
    #[must_use]
    pub fn message(self, message: Message) -> Self {
        self.push(Step::Reply(message))
    }

    /// Queue a transport failure
    #[must_use]
    pub fn fail(self, error: impl Into<String>) -> Self {
        self.push(Step::Fail(error.into()))
    }

    /// Sleep before answering each request
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, step: Step) -> Self {
        lock(&self.script).push_back(step);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Number of `complete` calls received so far
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Steps not yet consumed
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &CompletionOptions,
    ) -> Result<Message> {
        lock(&self.requests).push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            options: options.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = lock(&self.script).pop_front();
        match step {
            Some(Step::Reply(message)) => Ok(message),
            Some(Step::Fail(error)) => Err(AgentError::Transport(error)),
            None => Err(AgentError::Transport("scripted client has no reply left".into())),
        }
    }
}
