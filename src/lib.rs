pub mod error;
pub mod providers;
pub mod types;
pub mod functions;
pub mod plugins;
pub mod dispatch;
pub mod transcript;
pub mod driver;
pub mod metrics;
pub mod eval;
pub mod bench;

pub use error::LLMError;
pub use providers::LLMProvider;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ModelOptions, TokenUsage,
};
pub use functions::{
    DynKernelFunction, FunctionCall, FunctionDefinition, FunctionRegistry, KernelFunction, Tool,
    ToolArguments, ToolCall,
};
pub use dispatch::{DispatchOutcome, RegistryDispatcher, ToolDispatch};
pub use driver::{ChatRun, ConversationDriver, DriverConfig};
pub use transcript::{ToolCallRecord, Transcript};
pub use metrics::RunMetrics;
pub use eval::{Classification, Grade, Outcome, ScoreCard, ScoringProfile, TranscriptScorer};
pub use bench::{BenchConfig, ExecutionMode};
pub use schemars::JsonSchema;
