use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::plugins::portfolio::{
    CALCULATE_PORTFOLIO_VALUE, CALCULATE_VOLATILITY_SCORE, CHECK_RISK_THRESHOLD,
    GET_PORTFOLIO_HOLDINGS, GET_STOCK_PRICES, PORTFOLIO_IDS, TOOL_NAMES,
};

/// `before` must first appear earlier than `after` within one entity group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingRule {
    pub before: String,
    pub after: String,
}

impl OrderingRule {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// String value drawn from a fixed set.
    OneOf(BTreeSet<String>),
    NonEmptyList,
    NonEmptyMapping,
    /// Mapping that contains the named key.
    MappingWithKey(String),
}

impl FieldRule {
    fn holds(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (FieldRule::OneOf(allowed), Some(Value::String(text))) => allowed.contains(text),
            (FieldRule::NonEmptyList, Some(Value::Array(items))) => !items.is_empty(),
            (FieldRule::NonEmptyMapping, Some(Value::Object(map))) => !map.is_empty(),
            (FieldRule::MappingWithKey(key), Some(Value::Object(map))) => map.contains_key(key),
            _ => false,
        }
    }
}

/// Structural argument check for one tool: every field rule must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentCheck {
    fields: Vec<(String, FieldRule)>,
}

impl ArgumentCheck {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((name.into(), rule));
        self
    }

    /// Returns a diagnostic for the first field that fails.
    pub fn evaluate(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        for (name, rule) in &self.fields {
            let value = arguments.get(name);
            if !rule.holds(value) {
                let shown = value.map_or_else(|| "<missing>".to_string(), Value::to_string);
                return Err(format!("invalid {name} {shown}"));
            }
        }
        Ok(())
    }
}

impl Default for ArgumentCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Task-specific knowledge the scorer and classifier need.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringProfile {
    pub catalogue: BTreeSet<String>,
    pub required_entities: BTreeSet<String>,
    /// The call that opens a new entity group, and the argument naming it.
    pub entity_tool: String,
    pub entity_field: String,
    pub ordering_rules: Vec<OrderingRule>,
    pub argument_checks: BTreeMap<String, ArgumentCheck>,
    /// Distinct catalogue tools needed for full coverage marks.
    pub coverage_threshold: usize,
    /// Distinct tools a completed session needs to count as a success.
    pub success_threshold: usize,
    pub risk_terms: Vec<String>,
}

impl ScoringProfile {
    pub fn portfolio() -> Self {
        let entities: BTreeSet<String> = PORTFOLIO_IDS.iter().map(|id| id.to_string()).collect();

        let mut argument_checks = BTreeMap::new();
        argument_checks.insert(
            GET_PORTFOLIO_HOLDINGS.to_string(),
            ArgumentCheck::new().field("portfolio_id", FieldRule::OneOf(entities.clone())),
        );
        argument_checks.insert(
            GET_STOCK_PRICES.to_string(),
            ArgumentCheck::new().field("symbols", FieldRule::NonEmptyList),
        );
        argument_checks.insert(
            CALCULATE_VOLATILITY_SCORE.to_string(),
            ArgumentCheck::new().field("symbols", FieldRule::NonEmptyList),
        );
        argument_checks.insert(
            CHECK_RISK_THRESHOLD.to_string(),
            ArgumentCheck::new().field(
                "risk_config",
                FieldRule::MappingWithKey("max_volatility".to_string()),
            ),
        );
        argument_checks.insert(
            CALCULATE_PORTFOLIO_VALUE.to_string(),
            ArgumentCheck::new()
                .field("holdings", FieldRule::NonEmptyList)
                .field("current_prices", FieldRule::NonEmptyMapping),
        );

        Self {
            catalogue: TOOL_NAMES.iter().map(|name| name.to_string()).collect(),
            required_entities: entities,
            entity_tool: GET_PORTFOLIO_HOLDINGS.to_string(),
            entity_field: "portfolio_id".to_string(),
            ordering_rules: vec![
                OrderingRule::new(GET_PORTFOLIO_HOLDINGS, GET_STOCK_PRICES),
                OrderingRule::new(GET_PORTFOLIO_HOLDINGS, CALCULATE_VOLATILITY_SCORE),
                OrderingRule::new(GET_STOCK_PRICES, CALCULATE_PORTFOLIO_VALUE),
                OrderingRule::new(CALCULATE_PORTFOLIO_VALUE, CHECK_RISK_THRESHOLD),
                OrderingRule::new(CALCULATE_VOLATILITY_SCORE, CHECK_RISK_THRESHOLD),
            ],
            argument_checks,
            coverage_threshold: 6,
            success_threshold: 4,
            risk_terms: ["risk", "volatil", "threshold", "high", "low", "medium", "alert"]
                .iter()
                .map(|term| term.to_string())
                .collect(),
        }
    }

    /// Catalogue names that occur verbatim in `text`.
    pub fn tools_mentioned_in(&self, text: &str) -> usize {
        self.catalogue.iter().filter(|name| text.contains(name.as_str())).count()
    }
}

impl Default for ScoringProfile {
    fn default() -> Self {
        Self::portfolio()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn holdings_check_requires_known_portfolio() {
        let profile = ScoringProfile::portfolio();
        let check = &profile.argument_checks[GET_PORTFOLIO_HOLDINGS];
        assert!(check.evaluate(&args(json!({"portfolio_id": "PORT-002"}))).is_ok());
        assert_eq!(
            check.evaluate(&args(json!({"portfolio_id": "PORT-9"}))).unwrap_err(),
            "invalid portfolio_id \"PORT-9\""
        );
        assert!(check.evaluate(&args(json!({}))).unwrap_err().contains("<missing>"));
    }

    #[test]
    fn value_check_needs_both_inputs() {
        let profile = ScoringProfile::portfolio();
        let check = &profile.argument_checks[CALCULATE_PORTFOLIO_VALUE];
        assert!(check
            .evaluate(&args(json!({"holdings": [{"symbol": "AAPL"}], "current_prices": {"AAPL": 1.0}})))
            .is_ok());
        assert!(check
            .evaluate(&args(json!({"holdings": [{"symbol": "AAPL"}], "current_prices": {}})))
            .is_err());
    }

    #[test]
    fn mentions_count_distinct_catalogue_names() {
        let profile = ScoringProfile::portfolio();
        let text = "I would call get_stock_prices, then get_stock_prices again and log_operation.";
        assert_eq!(profile.tools_mentioned_in(text), 2);
    }
}
