use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::eval::profile::ScoringProfile;
use crate::transcript::Transcript;

/// Elapsed time below which a token-less session counts as an instant return.
pub const INSTANT_RETURN_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialSuccess,
    EmptyResponse,
    StalledInference,
    TextNarration,
    NoToolSupport,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::PartialSuccess => "partial_success",
            Outcome::EmptyResponse => "empty_response",
            Outcome::StalledInference => "stalled_inference",
            Outcome::TextNarration => "text_narration",
            Outcome::NoToolSupport => "no_tool_support",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub classification: Outcome,
    pub description: String,
}

/// Everything the decision table looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeSignals {
    pub tool_calls: usize,
    pub distinct_tools: usize,
    pub completed: bool,
    pub eval_tokens: u64,
    pub wall_clock_s: f64,
    /// Catalogue tool names found in the assistant's free text.
    pub tools_in_text: usize,
    pub success_threshold: usize,
}

impl OutcomeSignals {
    /// Signals recovered from a persisted transcript.
    pub fn from_transcript(
        transcript: &Transcript,
        profile: &ScoringProfile,
        eval_tokens: u64,
        wall_clock_s: f64,
    ) -> Self {
        let distinct: BTreeSet<&str> = transcript
            .tool_calls()
            .iter()
            .map(|record| record.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();

        Self {
            tool_calls: transcript.tool_calls().len(),
            distinct_tools: distinct.len(),
            completed: transcript.completed(),
            eval_tokens,
            wall_clock_s,
            tools_in_text: profile.tools_mentioned_in(&transcript.assistant_text()),
            success_threshold: profile.success_threshold,
        }
    }
}

struct Rule {
    outcome: Outcome,
    applies: fn(&OutcomeSignals) -> bool,
    describe: fn(&OutcomeSignals) -> String,
}

/// Evaluated top to bottom; the first rule that applies wins. The last rule
/// always applies, so every input maps to exactly one outcome.
const DECISION_TABLE: [Rule; 6] = [
    Rule {
        outcome: Outcome::Success,
        applies: |s| s.tool_calls > 0 && s.completed && s.distinct_tools >= s.success_threshold,
        describe: |s| {
            format!(
                "Made {} tool calls using {} tools, completed with final response",
                s.tool_calls, s.distinct_tools
            )
        },
    },
    Rule {
        outcome: Outcome::PartialSuccess,
        applies: |s| s.tool_calls > 0,
        describe: |s| {
            let mut reasons = Vec::new();
            if !s.completed {
                reasons.push("no final text response".to_string());
            }
            if s.distinct_tools < s.success_threshold {
                reasons.push(format!("only {} tools used", s.distinct_tools));
            }
            format!("Made {} tool calls but {}", s.tool_calls, reasons.join(", "))
        },
    },
    Rule {
        outcome: Outcome::EmptyResponse,
        applies: |s| s.eval_tokens == 0 && s.wall_clock_s < INSTANT_RETURN_SECS,
        describe: |_| "No tokens generated, instant return".to_string(),
    },
    Rule {
        outcome: Outcome::StalledInference,
        applies: |s| s.eval_tokens == 0,
        describe: |s| format!("No tokens generated after {:.0}s", s.wall_clock_s),
    },
    Rule {
        outcome: Outcome::TextNarration,
        applies: |s| s.tools_in_text >= 2,
        describe: |s| {
            format!(
                "Described {} tools in text but made 0 structured calls",
                s.tools_in_text
            )
        },
    },
    Rule {
        outcome: Outcome::NoToolSupport,
        applies: |_| true,
        describe: |_| "Generated text with no tool references".to_string(),
    },
];

pub fn classify(signals: &OutcomeSignals) -> Classification {
    let rule = DECISION_TABLE
        .iter()
        .find(|rule| (rule.applies)(signals))
        .unwrap_or(&DECISION_TABLE[DECISION_TABLE.len() - 1]);

    Classification {
        classification: rule.outcome,
        description: (rule.describe)(signals),
    }
}

pub fn classify_transcript(
    transcript: &Transcript,
    profile: &ScoringProfile,
    eval_tokens: u64,
    wall_clock_s: f64,
) -> Classification {
    classify(&OutcomeSignals::from_transcript(
        transcript,
        profile,
        eval_tokens,
        wall_clock_s,
    ))
}

/// Reads a stored classification, treating anything malformed as absent.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Classification>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}
