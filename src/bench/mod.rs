//! Run orchestration and the on-disk results layout.
//!
//! ```text
//! <models_dir>/<model dirname>/results/<task>/<mode>[/ctx-<N>]/
//!     transcript.json   raw message list
//!     metrics.json      RunMetrics
//!     scorecard.json    ScoreCard, written by `evaluate_results`
//! ```

pub mod config;
pub mod prompt;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dispatch::RegistryDispatcher;
use crate::driver::{ChatRun, ConversationDriver};
use crate::eval::profile::ScoringProfile;
use crate::eval::scorer::{ScoreCard, TranscriptScorer};
use crate::metrics::{aggregate_chat_metrics, RunMetrics};
use crate::plugins::portfolio::portfolio_registry;
use crate::providers::LLMProvider;
use crate::types::{ChatMessage, ModelOptions};
use crate::LLMError;

pub use config::{parse_num_threads, resolve_num_threads, BenchConfig};
pub use prompt::{load_prompt, parse_prompt_for_chat};

pub const TRANSCRIPT_FILE: &str = "transcript.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const SCORECARD_FILE: &str = "scorecard.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Cloud,
    Cpu,
    Gpu,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Cloud => "cloud",
            ExecutionMode::Cpu => "cpu",
            ExecutionMode::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cloud" => Ok(ExecutionMode::Cloud),
            "cpu" => Ok(ExecutionMode::Cpu),
            "gpu" => Ok(ExecutionMode::Gpu),
            other => Err(LLMError::Config(format!(
                "unknown execution mode {other:?} (expected cloud, cpu or gpu)"
            ))),
        }
    }
}

/// `hf.co/org/model:Q4_K_M` -> `hf.co__org__model(Q4_K_M)`
pub fn model_to_dirname(model: &str) -> String {
    let safe = model.replace('/', "__");
    match safe.split_once(':') {
        Some((name, tag)) => format!("{name}({tag})"),
        None => safe,
    }
}

static TAGGED_DIRNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)\((.+)\)$").unwrap());

pub fn dirname_to_model(dirname: &str) -> String {
    match TAGGED_DIRNAME.captures(dirname) {
        Some(caps) => format!("{}:{}", caps[1].replace("__", "/"), &caps[2]),
        None => dirname.replace("__", "/"),
    }
}

/// GPU results get a `ctx-<N>` level when a context size is given.
pub fn results_dir(
    models_dir: &Path,
    model: &str,
    task: &str,
    mode: ExecutionMode,
    ctx: Option<u32>,
) -> PathBuf {
    let path = models_dir
        .join(model_to_dirname(model))
        .join("results")
        .join(task)
        .join(mode.as_str());
    match (mode, ctx) {
        (ExecutionMode::Gpu, Some(ctx)) => path.join(format!("ctx-{ctx}")),
        _ => path,
    }
}

pub fn save_chat_results(dir: &Path, messages: &[ChatMessage], metrics: &RunMetrics) -> Result<(), LLMError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(TRANSCRIPT_FILE), serde_json::to_string_pretty(messages)?)?;
    fs::write(dir.join(METRICS_FILE), serde_json::to_string_pretty(metrics)?)?;
    tracing::info!(dir = %dir.display(), "saved chat results");
    Ok(())
}

/// Parameters of a single `run` invocation. `None` falls back to the config.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub mode: ExecutionMode,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<u32>,
    pub num_threads: Option<u32>,
    pub session_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results_dir: PathBuf,
    pub run: ChatRun,
    pub metrics: RunMetrics,
}

/// Runs one session against the portfolio catalogue, classifies it and
/// persists transcript and metrics.
pub async fn run_benchmark(
    config: &BenchConfig,
    provider: Arc<dyn LLMProvider>,
    request: &RunRequest,
) -> Result<RunOutcome, LLMError> {
    let num_ctx = request.num_ctx.unwrap_or_else(|| config.num_ctx_for(&request.model));
    let num_predict = request
        .num_predict
        .unwrap_or_else(|| config.num_predict_for(&request.model));
    let num_threads = match request.num_threads {
        Some(threads) => Some(threads),
        None => config.num_threads()?,
    };

    let mut options = ModelOptions::new(num_ctx, num_predict);
    if let Some(threads) = num_threads {
        options = options.with_num_thread(threads);
    }
    let mut driver_config = config.driver_config(options);
    if let Some(timeout) = request.session_timeout {
        driver_config = driver_config.with_session_timeout(timeout);
    }

    let (registry, _backend) = portfolio_registry();
    let tool_names = registry.names();
    let dispatcher = Arc::new(RegistryDispatcher::new(registry)?);
    let provider_name = provider.name();
    let driver = ConversationDriver::new(provider, dispatcher).with_config(driver_config);

    tracing::info!(
        model = %request.model,
        mode = %request.mode,
        num_ctx,
        num_predict,
        provider = provider_name,
        "starting chat session"
    );
    let run = driver
        .run(&request.model, &request.system_prompt, &request.user_prompt)
        .await;

    let classification = run.classify(&ScoringProfile::portfolio());
    tracing::info!(
        model = %request.model,
        classification = %classification.classification,
        turns = run.total_turns,
        tool_calls = run.tool_calls_log.len(),
        "session finished"
    );

    let mut metrics = aggregate_chat_metrics(&run.turn_metrics, &run.tool_calls_log, &tool_names);
    metrics.model = request.model.clone();
    metrics.task = config.task.clone();
    metrics.execution_mode = request.mode.to_string();
    metrics.wall_clock_s = run.wall_clock_s();
    metrics.num_ctx = Some(num_ctx);
    metrics.num_predict = Some(num_predict);
    metrics.num_threads = num_threads;
    metrics.run_timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    metrics.error = run.transport_error.clone();
    metrics.chat.failure_classification = Some(classification);

    let ctx = matches!(request.mode, ExecutionMode::Gpu).then_some(num_ctx);
    let dir = results_dir(&config.models_dir, &request.model, &config.task, request.mode, ctx);
    save_chat_results(&dir, &run.messages, &metrics)?;

    Ok(RunOutcome {
        results_dir: dir,
        run,
        metrics,
    })
}

/// Directories under one model that hold a transcript for `mode`.
fn scored_dirs(model_dir: &Path, task: &str, mode: ExecutionMode, ctx: Option<u32>) -> Result<Vec<(Option<String>, PathBuf)>, LLMError> {
    let base = model_dir.join("results").join(task).join(mode.as_str());
    let mut found = Vec::new();

    match (mode, ctx) {
        (ExecutionMode::Gpu, Some(ctx)) => {
            let dir = base.join(format!("ctx-{ctx}"));
            if dir.join(TRANSCRIPT_FILE).exists() {
                found.push((None, dir));
            }
        }
        (ExecutionMode::Gpu, None) => {
            if base.join(TRANSCRIPT_FILE).exists() {
                found.push((None, base.clone()));
            }
            if base.is_dir() {
                let mut ctx_dirs: Vec<(String, PathBuf)> = fs::read_dir(&base)?
                    .filter_map(Result::ok)
                    .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
                    .filter(|(name, path)| name.starts_with("ctx-") && path.join(TRANSCRIPT_FILE).exists())
                    .collect();
                ctx_dirs.sort();
                found.extend(ctx_dirs.into_iter().map(|(name, path)| (Some(name), path)));
            }
        }
        _ => {
            if base.join(TRANSCRIPT_FILE).exists() {
                found.push((None, base));
            }
        }
    }

    Ok(found)
}

/// Scores every persisted transcript for `mode`, writes `scorecard.json`
/// next to each, and returns the cards best first.
pub fn evaluate_results(config: &BenchConfig, mode: ExecutionMode, ctx: Option<u32>) -> Result<Vec<ScoreCard>, LLMError> {
    if !config.models_dir.is_dir() {
        tracing::warn!(dir = %config.models_dir.display(), "models directory not found");
        return Ok(Vec::new());
    }

    let scorer = TranscriptScorer::new(ScoringProfile::portfolio());
    let mut model_dirs: Vec<PathBuf> = fs::read_dir(&config.models_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    model_dirs.sort();

    let mut cards = Vec::new();
    for model_dir in model_dirs {
        let Some(dirname) = model_dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let model = dirname_to_model(dirname);

        for (ctx_label, dir) in scored_dirs(&model_dir, &config.task, mode, ctx)? {
            let label = match ctx_label {
                Some(ctx_label) => format!("{model} [{ctx_label}]"),
                None => model.clone(),
            };
            let card = scorer.score_files(&label, &dir.join(TRANSCRIPT_FILE), &dir.join(METRICS_FILE));
            fs::write(dir.join(SCORECARD_FILE), serde_json::to_string_pretty(&card)?)?;
            tracing::debug!(model = %label, total = card.total(), grade = %card.scores.letter_grade, "scored");
            cards.push(card);
        }
    }

    cards.sort_by(|a, b| b.total().total_cmp(&a.total()));
    Ok(cards)
}
