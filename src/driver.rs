use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::dispatch::ToolDispatch;
use crate::eval::classify::{classify, Classification, OutcomeSignals};
use crate::eval::profile::ScoringProfile;
use crate::functions::ToolArguments;
use crate::metrics::{round2, ToolCallLogEntry, TurnMetrics};
use crate::providers::LLMProvider;
use crate::transcript::Transcript;
use crate::types::{ChatMessage, CompletionRequest, MessageRole, ModelOptions};
use crate::LLMError;

pub const DEFAULT_MAX_TURNS: usize = 30;
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);

const RESULT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub max_turns: usize,
    /// Checked before each turn; a turn already in flight is not cut short.
    pub session_timeout: Duration,
    /// Upper bound for a single request, further limited by what is left of
    /// the session budget.
    pub turn_timeout: Duration,
    pub options: ModelOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            options: ModelOptions::new(4096, 4096),
        }
    }
}

impl DriverConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }
}

/// Everything recorded during one session.
#[derive(Debug, Clone, Default)]
pub struct ChatRun {
    pub messages: Vec<ChatMessage>,
    pub turn_metrics: Vec<TurnMetrics>,
    pub tool_calls_log: Vec<ToolCallLogEntry>,
    pub total_turns: usize,
    pub completed: bool,
    pub final_response: String,
    pub transport_error: Option<String>,
    pub timed_out: bool,
    pub wall_clock: Duration,
}

impl ChatRun {
    pub fn transcript(&self) -> Transcript {
        Transcript::new(self.messages.clone())
    }

    pub fn eval_tokens(&self) -> u64 {
        self.turn_metrics.iter().map(|turn| turn.eval_count).sum()
    }

    pub fn wall_clock_s(&self) -> f64 {
        round2(self.wall_clock.as_secs_f64())
    }

    pub fn signals(&self, profile: &ScoringProfile) -> OutcomeSignals {
        let distinct: BTreeSet<&str> = self
            .tool_calls_log
            .iter()
            .map(|entry| entry.tool.as_str())
            .collect();
        let assistant_text: String = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::Assistant)
            .filter_map(|message| message.non_empty_text())
            .map(|text| format!("{text}\n"))
            .collect();

        OutcomeSignals {
            tool_calls: self.tool_calls_log.len(),
            distinct_tools: distinct.len(),
            completed: self.completed,
            eval_tokens: self.eval_tokens(),
            wall_clock_s: self.wall_clock.as_secs_f64(),
            tools_in_text: profile.tools_mentioned_in(&assistant_text),
            success_threshold: profile.success_threshold,
        }
    }

    /// Live classification, computed from the driver's own bookkeeping.
    pub fn classify(&self, profile: &ScoringProfile) -> Classification {
        classify(&self.signals(profile))
    }
}

/// Runs the turn-by-turn tool calling loop against one model.
pub struct ConversationDriver {
    provider: Arc<dyn LLMProvider>,
    dispatcher: Arc<dyn ToolDispatch>,
    config: DriverConfig,
}

impl ConversationDriver {
    pub fn new(provider: Arc<dyn LLMProvider>, dispatcher: Arc<dyn ToolDispatch>) -> Self {
        Self {
            provider,
            dispatcher,
            config: DriverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Never fails: a transport error ends the loop and is kept on the run
    /// alongside the partial history.
    pub async fn run(&self, model: &str, system_prompt: &str, user_prompt: &str) -> ChatRun {
        let started = Instant::now();
        let tools = self.dispatcher.tools();
        let mut run = ChatRun {
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
            ..ChatRun::default()
        };

        for turn in 0..self.config.max_turns {
            let elapsed = started.elapsed();
            if elapsed >= self.config.session_timeout {
                tracing::warn!(turn, elapsed_s = elapsed.as_secs(), "session timed out");
                run.timed_out = true;
                break;
            }
            let budget = (self.config.session_timeout - elapsed).min(self.config.turn_timeout);

            let request = CompletionRequest::new(model, run.messages.clone())
                .with_tools(tools.iter().cloned())
                .with_options(self.config.options.clone());

            let turn_started = Instant::now();
            let response = match tokio::time::timeout(budget, self.provider.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout(budget)),
            };
            let duration_s = round2(turn_started.elapsed().as_secs_f64());

            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(turn, %error, "model request failed");
                    run.turn_metrics.push(TurnMetrics {
                        turn,
                        duration_s,
                        error: Some(error.to_string()),
                        ..TurnMetrics::default()
                    });
                    run.transport_error = Some(error.to_string());
                    break;
                }
            };

            let usage = response.usage.unwrap_or_default();
            let message = response.message;
            run.turn_metrics.push(TurnMetrics {
                turn,
                duration_s,
                prompt_eval_count: usage.prompt_tokens,
                eval_count: usage.completion_tokens,
                prompt_eval_duration_ns: usage.prompt_eval_duration_ns,
                eval_duration_ns: usage.eval_duration_ns,
                tool_calls: message.tool_calls.len(),
                error: None,
            });

            if message.has_tool_calls() {
                let calls = message.tool_calls.clone();
                run.messages.push(message);

                for call in &calls {
                    self.execute(turn, &call.function.name, &call.function.arguments, &mut run)
                        .await;
                }
                tracing::info!(turn, tool_calls = calls.len(), duration_s, "tool calls");
                continue;
            }

            match message.non_empty_text().map(str::to_string) {
                Some(text) => {
                    tracing::info!(turn, chars = text.chars().count(), duration_s, "final response");
                    run.final_response = text;
                    run.completed = true;
                    run.messages.push(message);
                }
                None => tracing::info!(turn, duration_s, "empty response, ending"),
            }
            break;
        }

        run.total_turns = run.turn_metrics.len();
        run.wall_clock = started.elapsed();
        run
    }

    async fn execute(
        &self,
        turn: usize,
        name: &str,
        arguments: &ToolArguments,
        run: &mut ChatRun,
    ) {
        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(name, arguments).await;
        let duration_s = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10_000.0;

        let content = match &outcome.result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };

        let success = !outcome.is_error();
        tracing::debug!(turn, tool = name, duration_s, success, "dispatched");

        run.tool_calls_log.push(ToolCallLogEntry {
            turn,
            tool: name.to_string(),
            arguments: outcome.arguments,
            result_preview: content.chars().take(RESULT_PREVIEW_CHARS).collect(),
            success,
            duration_s,
            schema_errors: outcome.schema_errors,
        });
        run.messages.push(ChatMessage::tool(content));
    }
}
