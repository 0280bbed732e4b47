use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    error::LLMError,
    functions::Tool,
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, ModelOptions, TokenUsage},
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base_url) = env::var("OLLAMA_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(timeout_ms) = env::var("OLLAMA_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                config.request_timeout = Duration::from_millis(ms);
            }
        }

        config
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Clone)]
pub struct Ollama {
    client: Client,
    config: OllamaConfig,
}

impl Ollama {
    pub fn from_env() -> Result<Self, LLMError> {
        Self::from_config(OllamaConfig::from_env())
    }

    pub fn from_config(config: OllamaConfig) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Tool],
    stream: bool,
    options: &'a ModelOptions,
}

fn no_tools(tools: &&[Tool]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    message: Option<ChatMessage>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    prompt_eval_duration: u64,
    #[serde(default)]
    eval_duration: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

#[async_trait]
impl LLMProvider for Ollama {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let body = ChatRequestBody {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: false,
            options: &request.options,
        };

        let response = self
            .client
            .post(self.endpoint("api/chat"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<OllamaErrorBody>(&text) {
                return Err(LLMError::Provider(error.error));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: ChatResponseBody = response.json().await?;
        let message = parsed
            .message
            .ok_or(LLMError::InvalidResponse("response did not contain a message"))?;

        Ok(CompletionResponse {
            message,
            usage: Some(TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                prompt_eval_duration_ns: parsed.prompt_eval_duration,
                eval_duration_ns: parsed.eval_duration,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
