use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::eval::classify::{classify_transcript, Classification};
use crate::eval::profile::ScoringProfile;
use crate::metrics::{round2, ChatMetrics, RunMetrics};
use crate::transcript::{ToolCallRecord, Transcript};

pub const STATUS_EVALUATED: &str = "evaluated";
pub const STATUS_MISSING: &str = "No transcript.json found";
pub const STATUS_NO_OUTPUT: &str = "No assistant messages in transcript";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    ValidToolCalls,
    ToolCoverage,
    CallOrdering,
    ArgumentCorrectness,
    EntityCoverage,
    FinalResponse,
    ErrorRecovery,
}

impl Criterion {
    pub const ALL: [Criterion; 7] = [
        Criterion::ValidToolCalls,
        Criterion::ToolCoverage,
        Criterion::CallOrdering,
        Criterion::ArgumentCorrectness,
        Criterion::EntityCoverage,
        Criterion::FinalResponse,
        Criterion::ErrorRecovery,
    ];

    pub fn weight(self) -> f64 {
        match self {
            Criterion::ValidToolCalls => 0.20,
            Criterion::ToolCoverage
            | Criterion::CallOrdering
            | Criterion::ArgumentCorrectness
            | Criterion::EntityCoverage => 0.15,
            Criterion::FinalResponse | Criterion::ErrorRecovery => 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_total(total: f64) -> Self {
        match total {
            t if t >= 9.0 => Grade::A,
            t if t >= 8.0 => Grade::B,
            t if t >= 7.0 => Grade::C,
            t if t >= 6.0 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub valid_tool_calls: f64,
    pub tool_coverage: f64,
    pub call_ordering: f64,
    pub argument_correctness: f64,
    #[serde(alias = "portfolio_coverage")]
    pub entity_coverage: f64,
    pub final_response: f64,
    pub error_recovery: f64,
    pub total: f64,
    pub letter_grade: Grade,
}

impl Default for Scores {
    fn default() -> Self {
        Self {
            valid_tool_calls: 0.0,
            tool_coverage: 0.0,
            call_ordering: 0.0,
            argument_correctness: 0.0,
            entity_coverage: 0.0,
            final_response: 0.0,
            error_recovery: 0.0,
            total: 0.0,
            letter_grade: Grade::F,
        }
    }
}

impl Scores {
    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::ValidToolCalls => self.valid_tool_calls,
            Criterion::ToolCoverage => self.tool_coverage,
            Criterion::CallOrdering => self.call_ordering,
            Criterion::ArgumentCorrectness => self.argument_correctness,
            Criterion::EntityCoverage => self.entity_coverage,
            Criterion::FinalResponse => self.final_response,
            Criterion::ErrorRecovery => self.error_recovery,
        }
    }

    fn finish(mut self) -> Self {
        let total: f64 = Criterion::ALL
            .iter()
            .map(|criterion| self.get(*criterion) * criterion.weight())
            .sum();
        // graded on the unrounded sum; only the stored total is rounded
        self.letter_grade = Grade::from_total(total);
        self.total = round2(total);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidCallDetails {
    pub total_calls: usize,
    pub valid_calls: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageDetails {
    pub tools_used: Vec<String>,
    pub tools_missing: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderingDetails {
    pub rules_checked: usize,
    pub violations: Vec<String>,
    /// Tool names per entity group, in call order.
    pub groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDetails {
    pub checks: usize,
    pub correct: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDetails {
    pub entities_processed: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResponseDetails {
    pub length: usize,
    pub mentions_entities: usize,
    pub risk_terms_found: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDetails {
    pub errors_encountered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls_after_last_error: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-criterion diagnostics. A criterion that had nothing to inspect
/// leaves its entry empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_tool_calls: Option<ValidCallDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_coverage: Option<CoverageDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_ordering: Option<OrderingDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_correctness: Option<ArgumentDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_coverage: Option<EntityDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_response: Option<FinalResponseDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_recovery: Option<RecoveryDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_metrics: Option<ChatMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub model: String,
    pub status: String,
    pub scores: Scores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub details: ScoreDetails,
}

impl ScoreCard {
    /// A card with every score at zero.
    pub fn zero(model: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            status: status.into(),
            scores: Scores::default(),
            classification: None,
            issues: Vec::new(),
            details: ScoreDetails::default(),
        }
    }

    pub fn total(&self) -> f64 {
        self.scores.total
    }
}

/// Scores transcripts against a [`ScoringProfile`]. Pure: the same inputs
/// always produce the same card.
#[derive(Debug, Clone, Default)]
pub struct TranscriptScorer {
    profile: ScoringProfile,
}

/// Accumulator for the entity grouping fold.
#[derive(Default)]
struct Grouping<'a> {
    current: Option<String>,
    groups: BTreeMap<String, Vec<&'a ToolCallRecord>>,
}

impl TranscriptScorer {
    pub fn new(profile: ScoringProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ScoringProfile {
        &self.profile
    }

    /// Scores a persisted run directory holding `transcript.json` and,
    /// optionally, `metrics.json`. File problems become zero cards.
    pub fn score_files(&self, model: &str, transcript_path: &Path, metrics_path: &Path) -> ScoreCard {
        if !transcript_path.exists() {
            return ScoreCard::zero(model, STATUS_MISSING);
        }

        let transcript = match Transcript::load(transcript_path) {
            Ok(transcript) => transcript,
            Err(error) => {
                return ScoreCard::zero(model, format!("Failed to read transcript: {error}"));
            }
        };

        let metrics = fs::read_to_string(metrics_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<RunMetrics>(&raw).ok());

        self.score(model, &transcript, metrics.as_ref())
    }

    pub fn score(&self, model: &str, transcript: &Transcript, metrics: Option<&RunMetrics>) -> ScoreCard {
        let classification = self.classification(transcript, metrics);

        if transcript.assistant_messages().next().is_none() {
            let mut card = ScoreCard::zero(model, STATUS_NO_OUTPUT);
            card.classification = Some(classification);
            card.details.chat_metrics = metrics.map(|m| m.chat.clone());
            return card;
        }

        let mut card = ScoreCard::zero(model, STATUS_EVALUATED);
        let calls = transcript.tool_calls();

        let scores = Scores {
            valid_tool_calls: self.valid_tool_calls(transcript, &mut card),
            tool_coverage: self.tool_coverage(calls, &mut card),
            call_ordering: self.call_ordering(calls, &mut card),
            argument_correctness: self.argument_correctness(calls, &mut card),
            entity_coverage: self.entity_coverage(transcript, &mut card),
            final_response: self.final_response(transcript, &mut card),
            error_recovery: self.error_recovery(calls, &mut card),
            ..Scores::default()
        };

        card.scores = scores.finish();
        card.classification = Some(classification);
        card.details.chat_metrics = metrics.map(|m| m.chat.clone());
        card
    }

    /// The stored label wins; otherwise it is recomputed from the transcript.
    pub fn classification(&self, transcript: &Transcript, metrics: Option<&RunMetrics>) -> Classification {
        if let Some(stored) = metrics.and_then(|m| m.chat.failure_classification.clone()) {
            return stored;
        }
        let (eval_tokens, wall_clock) = metrics.map_or((0, 0.0), |m| (m.tokens.eval_count, m.wall_clock_s));
        classify_transcript(transcript, &self.profile, eval_tokens, wall_clock)
    }

    fn valid_tool_calls(&self, transcript: &Transcript, card: &mut ScoreCard) -> f64 {
        let calls = transcript.tool_calls();
        if calls.is_empty() {
            let references: usize = transcript
                .assistant_messages()
                .filter_map(|message| message.text())
                .map(|text| self.profile.tools_mentioned_in(text))
                .sum();
            if references > 0 {
                card.issues.push(format!(
                    "Model referenced {references} tool(s) in text but made 0 structured tool_calls"
                ));
            } else {
                card.issues.push("No tool calls made at all".to_string());
            }
            return 0.0;
        }

        let valid = calls
            .iter()
            .filter(|record| !record.name.is_empty() && record.parsed_arguments().is_some())
            .count();

        card.details.valid_tool_calls = Some(ValidCallDetails {
            total_calls: calls.len(),
            valid_calls: valid,
        });
        if valid < calls.len() {
            card.issues
                .push(format!("{} tool calls had invalid structure", calls.len() - valid));
        }

        round2(valid as f64 / calls.len() as f64 * 10.0)
    }

    fn tool_coverage(&self, calls: &[ToolCallRecord], card: &mut ScoreCard) -> f64 {
        let used: BTreeSet<&str> = calls
            .iter()
            .map(|record| record.name.as_str())
            .filter(|name| self.profile.catalogue.contains(*name))
            .collect();
        let count = used.len();
        let threshold = self.profile.coverage_threshold;

        card.details.tool_coverage = Some(CoverageDetails {
            tools_used: used.iter().map(|name| name.to_string()).collect(),
            tools_missing: self
                .profile
                .catalogue
                .iter()
                .filter(|name| !used.contains(name.as_str()))
                .cloned()
                .collect(),
            count,
        });

        if count >= threshold {
            return 10.0;
        }
        card.issues.push(format!(
            "Only {count}/{} tools used (need {threshold} for full score)",
            self.profile.catalogue.len()
        ));
        round2(count as f64 * 10.0 / threshold as f64)
    }

    /// Splits calls into per-entity runs. A fetch naming an entity switches
    /// the current group; calls before the first fetch belong to none.
    fn group_by_entity<'a>(&self, calls: &'a [ToolCallRecord]) -> BTreeMap<String, Vec<&'a ToolCallRecord>> {
        calls
            .iter()
            .fold(Grouping::default(), |mut state, record| {
                if record.name == self.profile.entity_tool {
                    let entity = record
                        .parsed_arguments()
                        .and_then(|args| args.get(&self.profile.entity_field).cloned())
                        .and_then(|value| value.as_str().map(str::to_string))
                        .filter(|id| !id.is_empty());
                    if entity.is_some() {
                        state.current = entity;
                    }
                }
                if let Some(current) = &state.current {
                    state.groups.entry(current.clone()).or_default().push(record);
                }
                state
            })
            .groups
    }

    fn call_ordering(&self, calls: &[ToolCallRecord], card: &mut ScoreCard) -> f64 {
        if calls.is_empty() {
            return 0.0;
        }

        let groups = self.group_by_entity(calls);
        let mut checked = 0;
        let mut violations = Vec::new();

        for (entity, records) in &groups {
            let first = |name: &str| records.iter().position(|record| record.name == name);
            for rule in &self.profile.ordering_rules {
                if let (Some(before), Some(after)) = (first(rule.before.as_str()), first(rule.after.as_str())) {
                    checked += 1;
                    if before > after {
                        violations.push(format!("{entity}: {} called after {}", rule.before, rule.after));
                    }
                }
            }
        }

        if checked == 0 {
            card.issues
                .push("No ordering rules could be checked (too few tool calls)".to_string());
            return 0.0;
        }

        if !violations.is_empty() {
            let shown: Vec<&str> = violations.iter().take(3).map(String::as_str).collect();
            card.issues.push(format!(
                "{} ordering violation(s): {}",
                violations.len(),
                shown.join("; ")
            ));
        }

        let score = round2((checked - violations.len()) as f64 / checked as f64 * 10.0);
        card.details.call_ordering = Some(OrderingDetails {
            rules_checked: checked,
            violations,
            groups: groups
                .into_iter()
                .map(|(entity, records)| (entity, records.iter().map(|r| r.name.clone()).collect()))
                .collect(),
        });
        score
    }

    fn argument_correctness(&self, calls: &[ToolCallRecord], card: &mut ScoreCard) -> f64 {
        if calls.is_empty() {
            return 0.0;
        }

        let mut checks = 0;
        let mut correct = 0;
        let mut issues = Vec::new();

        for record in calls {
            let Some(check) = self.profile.argument_checks.get(&record.name) else {
                continue;
            };
            checks += 1;
            match record.arguments.parse() {
                Ok(arguments) => match check.evaluate(&arguments) {
                    Ok(()) => correct += 1,
                    Err(problem) => issues.push(format!("{}: {problem}", record.name)),
                },
                Err(_) => issues.push(format!("{}: arguments not valid JSON", record.name)),
            }
        }

        if checks == 0 {
            return 0.0;
        }

        if !issues.is_empty() {
            card.issues.push(format!("{} argument issue(s)", issues.len()));
        }
        issues.truncate(5);
        card.details.argument_correctness = Some(ArgumentDetails {
            checks,
            correct,
            issues,
        });

        round2(correct as f64 / checks as f64 * 10.0)
    }

    fn entity_coverage(&self, transcript: &Transcript, card: &mut ScoreCard) -> f64 {
        let required = &self.profile.required_entities;
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for record in transcript.tool_calls() {
            if let Some(arguments) = record.parsed_arguments() {
                collect_entities(&arguments, required, &mut seen);
            }
        }

        for message in transcript.messages() {
            if let Some(text) = message.text() {
                seen.extend(required.iter().filter(|id| text.contains(id.as_str())).cloned());
            }
        }

        let count = seen.len();
        card.details.entity_coverage = Some(EntityDetails {
            entities_processed: seen.iter().cloned().collect(),
            missing: required.difference(&seen).cloned().collect(),
        });

        if count < required.len() {
            card.issues
                .push(format!("Only {count}/{} required entities processed", required.len()));
        }
        if required.is_empty() {
            return 0.0;
        }
        round2(count as f64 / required.len() as f64 * 10.0)
    }

    fn final_response(&self, transcript: &Transcript, card: &mut ScoreCard) -> f64 {
        let Some(text) = transcript.final_response() else {
            card.issues.push("No final text response from model".to_string());
            return 0.0;
        };

        let length = text.chars().count();
        let mut score: f64 = match length {
            l if l >= 100 => 4.0,
            l if l >= 50 => 2.0,
            _ => 0.0,
        };

        let mentions = self
            .profile
            .required_entities
            .iter()
            .filter(|id| text.contains(id.as_str()))
            .count();
        score += match mentions {
            0 => 0.0,
            1 => 1.5,
            _ => 3.0,
        };

        let lowered = text.to_lowercase();
        let terms = self
            .profile
            .risk_terms
            .iter()
            .filter(|term| lowered.contains(&term.to_lowercase()))
            .count();
        score += match terms {
            0 => 0.0,
            1 | 2 => 1.5,
            _ => 3.0,
        };

        card.details.final_response = Some(FinalResponseDetails {
            length,
            mentions_entities: mentions,
            risk_terms_found: terms,
        });

        round2(score.min(10.0))
    }

    fn error_recovery(&self, calls: &[ToolCallRecord], card: &mut ScoreCard) -> f64 {
        let errors: Vec<usize> = calls
            .iter()
            .filter(|record| record.returned_error())
            .map(|record| record.index)
            .collect();

        let Some(last_error) = errors.iter().max().copied() else {
            card.details.error_recovery = Some(RecoveryDetails {
                errors_encountered: 0,
                calls_after_last_error: None,
                note: Some("No errors to recover from".to_string()),
            });
            return 10.0;
        };

        let after = calls.iter().filter(|record| record.index > last_error).count();
        card.details.error_recovery = Some(RecoveryDetails {
            errors_encountered: errors.len(),
            calls_after_last_error: Some(after),
            note: None,
        });

        if after > 0 {
            10.0
        } else {
            card.issues
                .push("Model stopped making tool calls after encountering errors".to_string());
            3.0
        }
    }
}

/// Entity ids among the entity field, top-level string values and the
/// string values of directly nested mappings.
fn collect_entities(arguments: &Map<String, Value>, required: &BTreeSet<String>, seen: &mut BTreeSet<String>) {
    let mut note = |value: &Value| {
        if let Some(text) = value.as_str() {
            if required.contains(text) {
                seen.insert(text.to_string());
            }
        }
    };

    for value in arguments.values() {
        match value {
            Value::Object(nested) => nested.values().for_each(&mut note),
            other => note(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::eval::classify::Outcome;
    use crate::functions::{FunctionCall, ToolCall};
    use crate::types::ChatMessage;

    fn assistant_calls(calls: Vec<(&str, Value)>) -> ChatMessage {
        ChatMessage::assistant("").with_tool_calls(
            calls
                .into_iter()
                .map(|(name, args)| ToolCall::new(FunctionCall::new(name, args)))
                .collect(),
        )
    }

    /// One assistant message per call, each answered by `result`.
    fn session(calls: Vec<(&str, Value, &str)>, final_text: Option<&str>) -> Transcript {
        let mut messages = vec![ChatMessage::system("Analyse the portfolios."), ChatMessage::user("Go.")];
        for (name, args, result) in calls {
            messages.push(assistant_calls(vec![(name, args)]));
            messages.push(ChatMessage::tool(result));
        }
        if let Some(text) = final_text {
            messages.push(ChatMessage::assistant(text));
        }
        Transcript::new(messages)
    }

    fn scorer() -> TranscriptScorer {
        TranscriptScorer::default()
    }

    #[test]
    fn no_calls_fix_structural_scores() {
        let transcript = session(vec![], Some("I cannot use tools, sorry."));
        let card = scorer().score("m", &transcript, None);

        assert_eq!(card.scores.valid_tool_calls, 0.0);
        assert_eq!(card.scores.call_ordering, 0.0);
        assert_eq!(card.scores.argument_correctness, 0.0);
        assert_eq!(card.scores.error_recovery, 10.0);
        assert!(card.issues.contains(&"No tool calls made at all".to_string()));
    }

    #[test]
    fn narrated_tools_get_a_distinct_issue() {
        let transcript = session(
            vec![],
            Some("First get_portfolio_holdings, then get_stock_prices for each symbol."),
        );
        let card = scorer().score("m", &transcript, None);
        assert!(card
            .issues
            .contains(&"Model referenced 2 tool(s) in text but made 0 structured tool_calls".to_string()));
        assert_eq!(
            card.classification.map(|c| c.classification),
            Some(Outcome::EmptyResponse)
        );
    }

    #[test]
    fn coverage_is_monotonic_and_saturates() {
        let names = [
            "get_portfolio_holdings",
            "get_stock_prices",
            "calculate_portfolio_value",
            "calculate_volatility_score",
            "check_risk_threshold",
            "generate_report",
            "send_notification",
            "log_operation",
        ];
        let mut previous = -1.0;
        for used in 0..=names.len() {
            let calls: Vec<_> = names[..used].iter().map(|n| (*n, json!({}), "{}")).collect();
            let card = scorer().score("m", &session(calls, Some("done")), None);
            assert!(card.scores.tool_coverage >= previous);
            previous = card.scores.tool_coverage;
            if used >= 6 {
                assert_eq!(card.scores.tool_coverage, 10.0);
            }
        }
        let five: Vec<_> = names[..5].iter().map(|n| (*n, json!({}), "{}")).collect();
        assert_eq!(scorer().score("m", &session(five, None), None).scores.tool_coverage, 8.33);
    }

    #[test]
    fn unknown_names_do_not_count_towards_coverage() {
        let calls = vec![("get_weather", json!({}), "{}"), ("get_stock_prices", json!({"symbols": ["AAPL"]}), "{}")];
        let card = scorer().score("m", &session(calls, None), None);
        assert_eq!(card.details.tool_coverage.unwrap().count, 1);
    }

    #[test]
    fn grouping_follows_the_current_entity() {
        let calls = vec![
            ("get_stock_prices", json!({"symbols": ["AAPL"]}), "{}"),
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"}), "{}"),
            ("get_stock_prices", json!({"symbols": ["AAPL"]}), "{}"),
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-002"}), "{}"),
            ("get_stock_prices", json!({"symbols": ["AMZN"]}), "{}"),
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"}), "{}"),
            ("log_operation", json!({"operation": "x", "details": {}}), "{}"),
        ];
        let transcript = session(calls, None);
        let groups = scorer().group_by_entity(transcript.tool_calls());

        let names = |entity: &str| -> Vec<&str> { groups[entity].iter().map(|r| r.name.as_str()).collect() };
        assert_eq!(groups.len(), 2);
        assert_eq!(
            names("PORT-001"),
            vec!["get_portfolio_holdings", "get_stock_prices", "get_portfolio_holdings", "log_operation"]
        );
        assert_eq!(names("PORT-002"), vec!["get_portfolio_holdings", "get_stock_prices"]);
    }

    #[test]
    fn ordering_violations_are_counted_per_group() {
        let calls = vec![
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"}), "{}"),
            ("calculate_portfolio_value", json!({}), "{}"),
            ("get_stock_prices", json!({"symbols": ["AAPL"]}), "{}"),
        ];
        let card = scorer().score("m", &session(calls, None), None);
        let details = card.details.call_ordering.unwrap();
        assert_eq!(details.rules_checked, 2);
        assert_eq!(
            details.violations,
            vec!["PORT-001: get_stock_prices called after calculate_portfolio_value"]
        );
        assert_eq!(card.scores.call_ordering, 5.0);
    }

    #[test]
    fn nothing_to_order_scores_zero() {
        let calls = vec![("log_operation", json!({"operation": "x", "details": {}}), "{}")];
        let card = scorer().score("m", &session(calls, None), None);
        assert_eq!(card.scores.call_ordering, 0.0);
        assert!(card
            .issues
            .contains(&"No ordering rules could be checked (too few tool calls)".to_string()));
    }

    #[test]
    fn argument_checks_only_apply_to_known_tools() {
        let messages = vec![
            ChatMessage::user("go"),
            assistant_calls(vec![
                ("get_portfolio_holdings", json!({"portfolio_id": "PORT-007"})),
                ("get_stock_prices", json!({"symbols": []})),
                ("send_notification", json!({"recipient": "x"})),
                ("check_risk_threshold", json!({"risk_config": {"max_volatility": 30}})),
            ]),
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall::new(FunctionCall::with_raw_arguments(
                "calculate_volatility_score",
                "{symbols: [",
            ))]),
        ];
        let card = scorer().score("m", &Transcript::new(messages), None);
        let details = card.details.argument_correctness.unwrap();
        assert_eq!(details.checks, 4);
        assert_eq!(details.correct, 1);
        assert!(details
            .issues
            .contains(&"calculate_volatility_score: arguments not valid JSON".to_string()));
        assert_eq!(card.scores.argument_correctness, 2.5);
        assert_eq!(card.scores.valid_tool_calls, 8.0);
    }

    #[test]
    fn entities_found_two_levels_deep_only() {
        let messages = vec![
            ChatMessage::user("go"),
            assistant_calls(vec![
                ("generate_report", json!({"portfolio_data": {"portfolio_id": "PORT-002"}})),
                ("log_operation", json!({"operation": "x", "details": {"inner": {"id": "PORT-003"}}})),
            ]),
        ];
        let card = scorer().score("m", &Transcript::new(messages), None);
        let details = card.details.entity_coverage.unwrap();
        assert_eq!(details.entities_processed, vec!["PORT-002"]);
        assert_eq!(card.scores.entity_coverage, 3.33);
    }

    #[test]
    fn final_response_heuristic() {
        let text = "PORT-001 and PORT-002 reviewed. PORT-001 shows high volatility above the threshold; \
                    PORT-002 remains low risk. An alert was sent to the manager.";
        let card = scorer().score("m", &session(vec![], Some(text)), None);
        assert_eq!(card.scores.final_response, 10.0);

        let short = scorer().score("m", &session(vec![], Some("PORT-001 risk is medium here, fine.")), None);
        assert_eq!(short.scores.final_response, 1.5 + 1.5);

        let details = short.details.final_response.unwrap();
        assert_eq!(details.risk_terms_found, 2);
    }

    #[test]
    fn stopping_after_an_error_is_penalised() {
        let calls = vec![
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"}), "{\"portfolio_id\": \"PORT-001\"}"),
            ("get_portfolio_holdings", json!({"portfolio_id": "PORT-9"}), "{\"error\": \"Portfolio PORT-9 not found\"}"),
        ];
        let card = scorer().score("m", &session(calls.clone(), Some("Stopped.")), None);
        assert_eq!(card.scores.error_recovery, 3.0);
        assert!(card
            .issues
            .contains(&"Model stopped making tool calls after encountering errors".to_string()));

        let mut recovered = calls;
        recovered.push(("get_portfolio_holdings", json!({"portfolio_id": "PORT-002"}), "{}"));
        let card = scorer().score("m", &session(recovered, None), None);
        assert_eq!(card.scores.error_recovery, 10.0);
        assert_eq!(card.details.error_recovery.unwrap().calls_after_last_error, Some(1));
    }

    #[test]
    fn total_is_weighted_and_two_decimal() {
        let scores = Scores {
            valid_tool_calls: 10.0,
            tool_coverage: 8.33,
            call_ordering: 10.0,
            argument_correctness: 5.0,
            entity_coverage: 3.33,
            final_response: 7.0,
            error_recovery: 3.0,
            ..Scores::default()
        }
        .finish();
        // raw sum is 6.999
        assert_eq!(scores.total, 7.0);
        assert_eq!(scores.letter_grade, Grade::D);
        assert_eq!(format!("{}", scores.letter_grade), "D");
    }

    #[test]
    fn grade_uses_the_unrounded_total() {
        let just_below = Scores {
            valid_tool_calls: 8.0,
            tool_coverage: 8.33,
            call_ordering: 8.0,
            argument_correctness: 8.0,
            entity_coverage: 0.0,
            final_response: 7.5,
            error_recovery: 10.0,
            ..Scores::default()
        }
        .finish();
        assert_eq!(just_below.total, 7.0);
        assert_eq!(just_below.letter_grade, Grade::D);

        let on_the_line = Scores {
            valid_tool_calls: 10.0,
            tool_coverage: 10.0,
            call_ordering: 10.0,
            argument_correctness: 10.0,
            entity_coverage: 0.0,
            final_response: 5.0,
            error_recovery: 10.0,
            ..Scores::default()
        }
        .finish();
        assert_eq!(on_the_line.total, 8.0);
        assert_eq!(on_the_line.letter_grade, Grade::B);
    }

    #[test]
    fn no_assistant_output_is_a_zero_card() {
        let transcript = Transcript::new(vec![
            ChatMessage::system("Process PORT-001, PORT-002 and PORT-003."),
            ChatMessage::user("Start."),
        ]);
        let metrics = RunMetrics {
            wall_clock_s: 0.2,
            ..RunMetrics::default()
        };
        let card = scorer().score("m", &transcript, Some(&metrics));
        assert_eq!(card.status, STATUS_NO_OUTPUT);
        assert_eq!(card.scores.total, 0.0);
        assert_eq!(card.classification.unwrap().classification, Outcome::EmptyResponse);
    }

    #[test]
    fn stored_classification_takes_precedence() {
        let mut metrics = RunMetrics::default();
        metrics.chat.failure_classification = Some(Classification {
            classification: Outcome::StalledInference,
            description: "stored".to_string(),
        });
        let card = scorer().score("m", &session(vec![], Some("hello")), Some(&metrics));
        assert_eq!(card.classification.unwrap().description, "stored");
    }

    #[test]
    fn missing_files_yield_status_cards() {
        let dir = tempfile::tempdir().unwrap();
        let card = scorer().score_files("m", &dir.path().join("transcript.json"), &dir.path().join("metrics.json"));
        assert_eq!(card.status, STATUS_MISSING);

        let path = dir.path().join("transcript.json");
        fs::write(&path, "{ not json").unwrap();
        let card = scorer().score_files("m", &path, &dir.path().join("metrics.json"));
        assert!(card.status.starts_with("Failed to read transcript:"));
        assert_eq!(card.scores.total, 0.0);
    }
}
