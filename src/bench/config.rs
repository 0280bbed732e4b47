use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::DriverConfig;
use crate::providers::ollama::{OllamaConfig, DEFAULT_BASE_URL};
use crate::types::ModelOptions;
use crate::LLMError;

/// Harness settings, read from YAML. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub ollama_base_url: String,
    pub models_dir: PathBuf,
    pub task: String,
    pub max_turns: usize,
    pub session_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    pub default_num_ctx: u32,
    /// Per-model context window overrides.
    pub model_num_ctx: BTreeMap<String, u32>,
    /// Per-model output caps. Models not listed may fill their whole context.
    pub model_num_predict: BTreeMap<String, u32>,
    /// `"16"` or `"75%"`.
    pub num_threads: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: DEFAULT_BASE_URL.to_string(),
            models_dir: PathBuf::from("models"),
            task: "agentic-chat".to_string(),
            max_turns: 30,
            session_timeout_secs: 600,
            turn_timeout_secs: 300,
            default_num_ctx: 4096,
            model_num_ctx: BTreeMap::new(),
            model_num_predict: BTreeMap::new(),
            num_threads: None,
        }
    }
}

impl BenchConfig {
    /// A missing file is not an error; it yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LLMError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = env::var("OLLAMA_BASE_URL") {
            self.ollama_base_url = base_url;
        }
        if let Ok(models_dir) = env::var("TOOLBENCH_MODELS_DIR") {
            self.models_dir = PathBuf::from(models_dir);
        }
        self
    }

    pub fn num_ctx_for(&self, model: &str) -> u32 {
        self.model_num_ctx
            .get(model)
            .copied()
            .unwrap_or(self.default_num_ctx)
    }

    pub fn num_predict_for(&self, model: &str) -> u32 {
        self.model_num_predict
            .get(model)
            .copied()
            .unwrap_or_else(|| self.num_ctx_for(model))
    }

    pub fn num_threads(&self) -> Result<Option<u32>, LLMError> {
        self.num_threads.as_deref().map(resolve_num_threads).transpose()
    }

    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig::new(self.ollama_base_url.clone())
            .with_timeout(Duration::from_secs(self.turn_timeout_secs))
    }

    pub fn driver_config(&self, options: ModelOptions) -> DriverConfig {
        DriverConfig::default()
            .with_max_turns(self.max_turns)
            .with_session_timeout(Duration::from_secs(self.session_timeout_secs))
            .with_turn_timeout(Duration::from_secs(self.turn_timeout_secs))
            .with_options(options)
    }
}

/// Resolves a thread hint against the cores of this machine.
pub fn resolve_num_threads(value: &str) -> Result<u32, LLMError> {
    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    parse_num_threads(value, available)
}

/// `"16"` or `"75%"`, capped at 75% of `available` cores and never below one.
pub fn parse_num_threads(value: &str, available: usize) -> Result<u32, LLMError> {
    let value = value.trim();
    let invalid = || LLMError::Config(format!("invalid thread count: {value:?}"));
    let max_allowed = ((available as f64 * 0.75) as usize).max(1);

    let requested = match value.strip_suffix('%') {
        Some(percent) => {
            let percent: usize = percent.trim().parse().map_err(|_| invalid())?;
            (available * percent / 100).max(1)
        }
        None => value.parse::<usize>().map_err(|_| invalid())?,
    };

    let threads = requested.min(max_allowed).max(1);
    u32::try_from(threads).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig::load(dir.path().join("bench.yaml")).unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.max_turns, 30);
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        fs::write(
            &path,
            "models_dir: /data/models\nmodel_num_ctx:\n  qwen3:8b: 16384\nmodel_num_predict:\n  llama3.2:latest: 1024\nnum_threads: \"50%\"\n",
        )
        .unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.models_dir, PathBuf::from("/data/models"));
        assert_eq!(config.task, "agentic-chat");
        assert_eq!(config.num_ctx_for("qwen3:8b"), 16384);
        assert_eq!(config.num_predict_for("qwen3:8b"), 16384);
        assert_eq!(config.num_ctx_for("llama3.2:latest"), 4096);
        assert_eq!(config.num_predict_for("llama3.2:latest"), 1024);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        fs::write(&path, "max_turns: [").unwrap();
        assert!(matches!(BenchConfig::load(&path), Err(LLMError::Yaml(_))));
    }

    #[test]
    fn thread_hints() {
        assert_eq!(parse_num_threads("8", 16).unwrap(), 8);
        assert_eq!(parse_num_threads("32", 16).unwrap(), 12);
        assert_eq!(parse_num_threads("50%", 16).unwrap(), 8);
        assert_eq!(parse_num_threads("100%", 16).unwrap(), 12);
        assert_eq!(parse_num_threads("10%", 4).unwrap(), 1);
        assert_eq!(parse_num_threads("4", 1).unwrap(), 1);
        assert!(parse_num_threads("lots", 8).is_err());
    }
}
