use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eval::classify::{deserialize_lenient, Classification};

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / 1e9
}

/// Counters for one request/response exchange with the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnMetrics {
    pub turn: usize,
    pub duration_s: f64,
    pub prompt_eval_count: u64,
    pub eval_count: u64,
    pub prompt_eval_duration_ns: u64,
    pub eval_duration_ns: u64,
    /// Tool calls requested in this turn.
    pub tool_calls: usize,
    /// Transport failure that ended the session on this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One dispatched tool call as seen by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallLogEntry {
    pub turn: usize,
    pub tool: String,
    pub arguments: Value,
    /// First 500 characters of the serialized result.
    pub result_preview: String,
    /// False when the result was an `{"error": ...}` mapping.
    pub success: bool,
    pub duration_s: f64,
    /// Schema violations of the coerced arguments. Informational only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingMetrics {
    /// Sum of per-turn wall time
    pub total_duration_s: f64,
    pub prompt_eval_duration_s: f64,
    pub eval_duration_s: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenMetrics {
    pub prompt_eval_count: u64,
    /// Generated tokens across all turns
    pub eval_count: u64,
    pub prompt_eval_tokens_per_sec: f64,
    pub eval_tokens_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMetrics {
    pub total_turns: usize,
    pub total_tool_calls: usize,
    pub successful_tool_calls: usize,
    pub tool_call_success_rate: f64,
    pub tools_used: Vec<String>,
    pub tools_available: Vec<String>,
    /// Fraction of the available tools that were used at least once
    pub tool_coverage: f64,
    /// Outcome label assigned when the session finished
    #[serde(
        deserialize_with = "deserialize_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_classification: Option<Classification>,
}

/// Contents of `metrics.json` for one run.
///
/// Every field defaults so that files written by older harness versions
/// still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetrics {
    pub model: String,
    pub task: String,
    pub execution_mode: String,
    /// End-to-end session time, including tool execution
    pub wall_clock_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u32>,
    /// RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timing: TimingMetrics,
    pub tokens: TokenMetrics,
    pub chat: ChatMetrics,
}

/// Folds per-turn counters and the tool log into run totals. Run-level
/// fields (model, mode, timestamps) are left for the caller to fill.
pub fn aggregate_chat_metrics<S: AsRef<str>>(
    turns: &[TurnMetrics],
    tool_log: &[ToolCallLogEntry],
    tools_available: &[S],
) -> RunMetrics {
    let prompt_eval_count: u64 = turns.iter().map(|t| t.prompt_eval_count).sum();
    let eval_count: u64 = turns.iter().map(|t| t.eval_count).sum();
    let prompt_eval_s = ns_to_secs(turns.iter().map(|t| t.prompt_eval_duration_ns).sum());
    let eval_s = ns_to_secs(turns.iter().map(|t| t.eval_duration_ns).sum());
    let total_duration_s: f64 = turns.iter().map(|t| t.duration_s).sum();

    let per_sec = |count: u64, secs: f64| if secs > 0.0 { round2(count as f64 / secs) } else { 0.0 };

    let used: BTreeSet<String> = tool_log.iter().map(|entry| entry.tool.clone()).collect();
    let available: BTreeSet<String> = tools_available
        .iter()
        .map(|name| name.as_ref().to_string())
        .collect();
    let successful = tool_log.iter().filter(|entry| entry.success).count();
    let total_calls = tool_log.len();

    RunMetrics {
        timing: TimingMetrics {
            total_duration_s: round2(total_duration_s),
            prompt_eval_duration_s: round2(prompt_eval_s),
            eval_duration_s: round2(eval_s),
        },
        tokens: TokenMetrics {
            prompt_eval_count,
            eval_count,
            prompt_eval_tokens_per_sec: per_sec(prompt_eval_count, prompt_eval_s),
            eval_tokens_per_sec: per_sec(eval_count, eval_s),
        },
        chat: ChatMetrics {
            total_turns: turns.len(),
            total_tool_calls: total_calls,
            successful_tool_calls: successful,
            tool_call_success_rate: if total_calls > 0 {
                round2(successful as f64 / total_calls as f64)
            } else {
                0.0
            },
            tool_coverage: if available.is_empty() {
                0.0
            } else {
                round2(used.len() as f64 / available.len() as f64)
            },
            tools_used: used.into_iter().collect(),
            tools_available: available.into_iter().collect(),
            failure_classification: None,
        },
        ..RunMetrics::default()
    }
}
