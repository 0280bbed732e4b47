use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown tool: {0}")]
    UnknownFunction(String),

    #[error("invalid function arguments: {0}")]
    InvalidFunctionArguments(String),

    #[error("{message}")]
    FunctionExecution { function: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LLMError {
    /// Errors raised by the model endpoint end a session; everything else is
    /// reported back to the model as a tool result.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LLMError::Http(_)
                | LLMError::Provider(_)
                | LLMError::InvalidResponse(_)
                | LLMError::Timeout(_)
        )
    }
}
