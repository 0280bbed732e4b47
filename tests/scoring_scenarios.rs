use serde_json::json;
use toolbench::{
    eval::Criterion, ChatMessage, FunctionCall, Grade, Outcome, RunMetrics, ScoringProfile,
    ToolCall, Transcript, TranscriptScorer,
};

fn call(name: &str, arguments: serde_json::Value) -> ChatMessage {
    ChatMessage::assistant("").with_tool_calls(vec![ToolCall::new(FunctionCall::new(name, arguments))])
}

fn scorer() -> TranscriptScorer {
    TranscriptScorer::new(ScoringProfile::portfolio())
}

#[test]
fn five_tool_session_with_long_answer_is_a_success() {
    let final_text = "PORT-001 is within limits: total value 231,785 USD, volatility 19.2 against a threshold of 30. \
Risk level LOW, no alert needed. PORT-002 and PORT-003 pending.";
    assert!(final_text.chars().count() >= 100);

    let transcript = Transcript::new(vec![
        ChatMessage::system("You are a risk analyst."),
        ChatMessage::user("Review the portfolios."),
        call("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"})),
        ChatMessage::tool(r#"{"portfolio_id":"PORT-001","holdings":[]}"#),
        call("get_stock_prices", json!({"symbols": ["AAPL", "GOOGL", "MSFT"]})),
        ChatMessage::tool(r#"{"AAPL":178.5,"GOOGL":142.3,"MSFT":380.25}"#),
        call("calculate_volatility_score", json!({"symbols": ["AAPL", "GOOGL", "MSFT"]})),
        ChatMessage::tool("19.2"),
        call(
            "calculate_portfolio_value",
            json!({
                "holdings": [{"symbol": "AAPL", "shares": 500, "purchase_price": 150.0}],
                "current_prices": {"AAPL": 178.5}
            }),
        ),
        ChatMessage::tool(r#"{"total_value":89250.0}"#),
        call(
            "check_risk_threshold",
            json!({
                "portfolio_value": 231785.0,
                "volatility_score": 19.2,
                "risk_config": {"max_volatility": 30, "min_value": 100000, "max_value": 1000000}
            }),
        ),
        ChatMessage::tool(r#"{"is_high_risk":false,"exceeded_thresholds":[],"risk_level":"LOW"}"#),
        ChatMessage::assistant(final_text),
    ]);

    let card = scorer().score("qwen3:8b", &transcript, None);

    assert_eq!(card.status, "evaluated");
    assert_eq!(
        card.classification.as_ref().map(|c| c.classification),
        Some(Outcome::Success)
    );
    assert_eq!(card.scores.get(Criterion::ValidToolCalls), 10.0);
    assert_eq!(card.scores.get(Criterion::ToolCoverage), 8.33);
    assert_eq!(card.scores.get(Criterion::CallOrdering), 10.0);
    assert_eq!(card.scores.get(Criterion::ArgumentCorrectness), 10.0);
    assert_eq!(card.scores.get(Criterion::EntityCoverage), 10.0);
    assert_eq!(card.scores.get(Criterion::FinalResponse), 10.0);
    assert_eq!(card.scores.get(Criterion::ErrorRecovery), 10.0);
    assert_eq!(card.scores.letter_grade, Grade::A);
    assert!(card.total() >= 9.0);
}

#[test]
fn empty_transcript_scores_zero() {
    let transcript = Transcript::new(vec![
        ChatMessage::system("You are a risk analyst."),
        ChatMessage::user("Review the portfolios."),
    ]);

    let mut metrics = RunMetrics::default();
    metrics.wall_clock_s = 0.2;

    let card = scorer().score("tinyllama:latest", &transcript, Some(&metrics));

    assert_eq!(card.total(), 0.0);
    assert_eq!(card.scores.letter_grade, Grade::F);
    assert_eq!(
        card.classification.as_ref().map(|c| c.classification),
        Some(Outcome::EmptyResponse)
    );
}

#[test]
fn stopping_after_an_error_caps_recovery() {
    let transcript = Transcript::new(vec![
        ChatMessage::system("s"),
        ChatMessage::user("u"),
        call("get_portfolio_holdings", json!({"portfolio_id": "PORT-001"})),
        ChatMessage::tool(r#"{"portfolio_id":"PORT-001","holdings":[]}"#),
        call("get_portfolio_holdings", json!({"portfolio_id": "PORT-404"})),
        ChatMessage::tool(r#"{"error":"Portfolio PORT-404 not found"}"#),
        ChatMessage::assistant("I could not find portfolio PORT-404."),
    ]);

    let card = scorer().score("llama3.2:3b", &transcript, None);

    assert_eq!(card.scores.get(Criterion::ErrorRecovery), 3.0);
    assert!(card
        .issues
        .iter()
        .any(|issue| issue.contains("stopped making tool calls")));
    assert_eq!(
        card.classification.as_ref().map(|c| c.classification),
        Some(Outcome::PartialSuccess)
    );
}

#[test]
fn narrated_tools_without_calls() {
    let transcript = Transcript::new(vec![
        ChatMessage::system("s"),
        ChatMessage::user("u"),
        ChatMessage::assistant(
            "First I would call get_portfolio_holdings, then get_stock_prices and check_risk_threshold.",
        ),
    ]);

    let mut metrics = RunMetrics::default();
    metrics.tokens.eval_count = 120;
    metrics.wall_clock_s = 14.0;

    let card = scorer().score("phi3:mini", &transcript, Some(&metrics));

    assert_eq!(card.scores.get(Criterion::ValidToolCalls), 0.0);
    assert!(card
        .issues
        .iter()
        .any(|issue| issue.contains("made 0 structured tool_calls")));
    assert_eq!(
        card.classification.as_ref().map(|c| c.classification),
        Some(Outcome::TextNarration)
    );

    // without metrics nothing was generated as far as the scorer can tell
    let card = scorer().score("phi3:mini", &transcript, None);
    assert_eq!(
        card.classification.as_ref().map(|c| c.classification),
        Some(Outcome::EmptyResponse)
    );
}
