use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    functions::{FunctionCall, ToolCall},
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
    LLMError,
};

enum ScriptedStep {
    Respond(CompletionResponse, Option<Duration>),
    Fail(String),
}

/// Replays a fixed sequence of endpoint responses and records every request.
///
/// Once the script runs out every further call fails with a provider error,
/// which the driver treats like any other transport failure.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptedStep>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: CompletionResponse) -> Self {
        self.push(ScriptedStep::Respond(response, None))
    }

    pub fn respond_after(self, delay: Duration, response: CompletionResponse) -> Self {
        self.push(ScriptedStep::Respond(response, Some(delay)))
    }

    /// Queue an assistant turn that requests the given tool calls.
    pub fn tool_calls<I>(self, calls: I) -> Self
    where
        I: IntoIterator<Item = FunctionCall>,
    {
        let calls = calls.into_iter().map(ToolCall::new).collect();
        let message = ChatMessage::assistant("").with_tool_calls(calls);
        self.respond(CompletionResponse::new(message).with_usage(scripted_usage(24)))
    }

    /// Queue a final assistant text turn.
    pub fn text(self, content: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = content.split_whitespace().count() as u64;
        self.respond(CompletionResponse::new(ChatMessage::assistant(content)).with_usage(scripted_usage(tokens)))
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(ScriptedStep::Fail(message.into()))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push(self, step: ScriptedStep) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }
}

fn scripted_usage(completion_tokens: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: 100,
        completion_tokens,
        prompt_eval_duration_ns: 50_000_000,
        eval_duration_ns: completion_tokens * 10_000_000,
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match step {
            Some(ScriptedStep::Respond(response, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(ScriptedStep::Fail(message)) => Err(LLMError::Provider(message)),
            None => Err(LLMError::Provider("no more scripted responses".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
