//! Simulated backend for the portfolio risk-analysis task.
//!
//! Every operation is deterministic apart from the timestamps it stamps on
//! notifications and audit entries. Domain failures surface as
//! [`LLMError::FunctionExecution`] so the dispatcher can hand them back to
//! the model as structured errors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::functions::{
    json_schema_for, FunctionDefinition, FunctionParameter, FunctionRegistry, KernelFunction,
};
use crate::LLMError;

pub const GET_STOCK_PRICES: &str = "get_stock_prices";
pub const GET_PORTFOLIO_HOLDINGS: &str = "get_portfolio_holdings";
pub const CALCULATE_PORTFOLIO_VALUE: &str = "calculate_portfolio_value";
pub const CALCULATE_VOLATILITY_SCORE: &str = "calculate_volatility_score";
pub const CHECK_RISK_THRESHOLD: &str = "check_risk_threshold";
pub const GENERATE_REPORT: &str = "generate_report";
pub const SEND_NOTIFICATION: &str = "send_notification";
pub const LOG_OPERATION: &str = "log_operation";

pub const TOOL_NAMES: [&str; 8] = [
    GET_STOCK_PRICES,
    GET_PORTFOLIO_HOLDINGS,
    CALCULATE_PORTFOLIO_VALUE,
    CALCULATE_VOLATILITY_SCORE,
    CHECK_RISK_THRESHOLD,
    GENERATE_REPORT,
    SEND_NOTIFICATION,
    LOG_OPERATION,
];

pub const PORTFOLIO_IDS: [&str; 3] = ["PORT-001", "PORT-002", "PORT-003"];

struct PortfolioRecord {
    id: &'static str,
    client_name: &'static str,
    manager_email: &'static str,
    holdings: &'static [(&'static str, i64, f64)],
}

const PORTFOLIOS: [PortfolioRecord; 3] = [
    PortfolioRecord {
        id: "PORT-001",
        client_name: "Acme Corporation Pension Fund",
        manager_email: "sarah.chen@firm.com",
        holdings: &[("AAPL", 500, 150.00), ("GOOGL", 200, 120.00), ("MSFT", 300, 320.00)],
    },
    PortfolioRecord {
        id: "PORT-002",
        client_name: "Johnson Family Trust",
        manager_email: "mike.wilson@firm.com",
        holdings: &[
            ("AMZN", 150, 140.00),
            ("META", 100, 320.00),
            ("AAPL", 250, 160.00),
            ("TSLA", 80, 250.00),
        ],
    },
    PortfolioRecord {
        id: "PORT-003",
        client_name: "Tech Ventures Fund LLC",
        manager_email: "jennifer.park@firm.com",
        holdings: &[("NVDA", 400, 450.00), ("AMD", 600, 120.00), ("GOOGL", 150, 135.00)],
    },
];

/// Symbol, last price (USD), 30-day volatility (%).
const MARKET: [(&str, f64, f64); 8] = [
    ("AAPL", 178.50, 18.5),
    ("GOOGL", 142.30, 22.3),
    ("MSFT", 380.25, 16.8),
    ("AMZN", 155.80, 28.4),
    ("META", 485.20, 35.2),
    ("TSLA", 195.50, 52.7),
    ("NVDA", 520.75, 38.9),
    ("AMD", 142.60, 41.2),
];

const DEFAULT_VOLATILITY: f64 = 25.0;

fn price_of(symbol: &str) -> Option<f64> {
    MARKET.iter().find(|(s, _, _)| *s == symbol).map(|(_, price, _)| *price)
}

fn volatility_of(symbol: &str) -> f64 {
    MARKET
        .iter()
        .find(|(s, _, _)| *s == symbol)
        .map(|(_, _, vol)| *vol)
        .unwrap_or(DEFAULT_VOLATILITY)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn execution_error(function: &str, message: impl Into<String>) -> LLMError {
    LLMError::FunctionExecution {
        function: function.to_string(),
        message: message.into(),
    }
}

fn parse_args<T: DeserializeOwned>(function: &str, arguments: &Value) -> Result<T, LLMError> {
    serde_json::from_value(arguments.clone()).map_err(|error| execution_error(function, error.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub message_id: String,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub priority: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub level: String,
    pub operation: String,
    pub details: Value,
}

/// Side effects of one catalogue instance: the notification outbox and the
/// audit trail. Nothing is rolled back when a session later fails.
#[derive(Debug)]
pub struct PortfolioBackend {
    outbox: Mutex<Vec<Notification>>,
    audit: Mutex<Vec<AuditEntry>>,
    next_message_id: AtomicU64,
}

impl Default for PortfolioBackend {
    fn default() -> Self {
        Self {
            outbox: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
            next_message_id: AtomicU64::new(10_000),
        }
    }
}

impl PortfolioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_notifications(&self) -> Vec<Notification> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record_notification(&self, mut notification: Notification) -> Notification {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        notification.message_id = format!("msg-{id}");
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        notification
    }

    fn record_audit(&self, entry: AuditEntry) {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }
}

/// Registers all eight catalogue operations and returns the shared backend
/// that observes their side effects.
pub fn register_portfolio_functions(registry: &mut FunctionRegistry) -> Arc<PortfolioBackend> {
    let backend = Arc::new(PortfolioBackend::new());
    registry.register(Arc::new(GetStockPrices));
    registry.register(Arc::new(GetPortfolioHoldings));
    registry.register(Arc::new(CalculatePortfolioValue));
    registry.register(Arc::new(CalculateVolatilityScore));
    registry.register(Arc::new(CheckRiskThreshold));
    registry.register(Arc::new(GenerateReport));
    registry.register(Arc::new(SendNotification {
        backend: Arc::clone(&backend),
    }));
    registry.register(Arc::new(LogOperation {
        backend: Arc::clone(&backend),
    }));
    backend
}

pub fn portfolio_registry() -> (FunctionRegistry, Arc<PortfolioBackend>) {
    let mut registry = FunctionRegistry::new();
    let backend = register_portfolio_functions(&mut registry);
    (registry, backend)
}

fn symbols_schema(description: &str) -> FunctionParameter {
    FunctionParameter::new("symbols", json_schema_for::<Vec<String>>()).with_description(description)
}

struct GetStockPrices;

#[derive(Deserialize)]
struct SymbolsArgs {
    symbols: Vec<String>,
}

#[async_trait]
impl KernelFunction for GetStockPrices {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(GET_STOCK_PRICES)
            .with_description("Fetches current market prices for given stock symbols.")
            .with_parameter(symbols_schema(
                "List of stock ticker symbols (e.g. [\"AAPL\", \"GOOGL\"])",
            ))
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: SymbolsArgs = parse_args(GET_STOCK_PRICES, arguments)?;
        if args.symbols.is_empty() {
            return Err(execution_error(GET_STOCK_PRICES, "symbols list cannot be empty"));
        }

        let prices: Map<String, Value> = args
            .symbols
            .into_iter()
            .map(|symbol| {
                let price = price_of(&symbol).map_or(Value::Null, |p| json!(p));
                (symbol, price)
            })
            .collect();
        Ok(Value::Object(prices))
    }
}

struct GetPortfolioHoldings;

#[derive(Deserialize)]
struct HoldingsArgs {
    portfolio_id: String,
}

#[async_trait]
impl KernelFunction for GetPortfolioHoldings {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(GET_PORTFOLIO_HOLDINGS)
            .with_description("Retrieves holdings information for a specific portfolio.")
            .with_parameter(
                FunctionParameter::new("portfolio_id", json_schema_for::<String>())
                    .with_description("Portfolio identifier (e.g. \"PORT-001\")"),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: HoldingsArgs = parse_args(GET_PORTFOLIO_HOLDINGS, arguments)?;
        let record = PORTFOLIOS
            .iter()
            .find(|p| p.id == args.portfolio_id)
            .ok_or_else(|| {
                execution_error(
                    GET_PORTFOLIO_HOLDINGS,
                    format!("Portfolio {} not found", args.portfolio_id),
                )
            })?;

        let holdings: Vec<Value> = record
            .holdings
            .iter()
            .map(|(symbol, shares, purchase_price)| {
                json!({"symbol": symbol, "shares": shares, "purchase_price": purchase_price})
            })
            .collect();

        Ok(json!({
            "portfolio_id": record.id,
            "client_name": record.client_name,
            "manager_email": record.manager_email,
            "holdings": holdings,
        }))
    }
}

struct CalculatePortfolioValue;

#[derive(Deserialize)]
struct Holding {
    symbol: String,
    shares: i64,
    purchase_price: f64,
}

#[derive(Deserialize)]
struct ValueArgs {
    holdings: Vec<Holding>,
    current_prices: BTreeMap<String, Option<f64>>,
}

#[async_trait]
impl KernelFunction for CalculatePortfolioValue {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(CALCULATE_PORTFOLIO_VALUE)
            .with_description("Calculates total portfolio value and individual position values.")
            .with_parameter(
                FunctionParameter::new(
                    "holdings",
                    json!({
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "symbol": {"type": "string"},
                                "shares": {"type": "integer"},
                                "purchase_price": {"type": "number"}
                            }
                        }
                    }),
                )
                .with_description("List of holdings with symbol, shares, purchase_price"),
            )
            .with_parameter(
                FunctionParameter::new(
                    "current_prices",
                    json!({"type": "object", "additionalProperties": {"type": "number"}}),
                )
                .with_description("Dictionary mapping symbols to current prices in USD"),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: ValueArgs = parse_args(CALCULATE_PORTFOLIO_VALUE, arguments)?;
        if args.holdings.is_empty() {
            return Err(execution_error(CALCULATE_PORTFOLIO_VALUE, "holdings list cannot be empty"));
        }
        if args.current_prices.is_empty() {
            return Err(execution_error(
                CALCULATE_PORTFOLIO_VALUE,
                "current_prices dictionary cannot be empty",
            ));
        }

        let mut positions = Vec::new();
        let mut total_value = 0.0;

        for holding in &args.holdings {
            // positions without a quoted price are left out of the total
            let Some(current_price) = args.current_prices.get(&holding.symbol).copied().flatten() else {
                continue;
            };

            let shares = holding.shares as f64;
            let position_value = shares * current_price;
            let cost_basis = shares * holding.purchase_price;
            let gain_loss = position_value - cost_basis;
            let gain_loss_percent = if cost_basis > 0.0 {
                gain_loss / cost_basis * 100.0
            } else {
                0.0
            };

            positions.push(json!({
                "symbol": holding.symbol,
                "shares": holding.shares,
                "current_price": current_price,
                "position_value": position_value,
                "gain_loss": gain_loss,
                "gain_loss_percent": gain_loss_percent,
            }));
            total_value += position_value;
        }

        Ok(json!({"total_value": total_value, "positions": positions}))
    }
}

struct CalculateVolatilityScore;

#[derive(Deserialize)]
struct VolatilityArgs {
    symbols: Vec<String>,
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

#[async_trait]
impl KernelFunction for CalculateVolatilityScore {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(CALCULATE_VOLATILITY_SCORE)
            .with_description("Calculates aggregate volatility score for a set of stocks.")
            .with_parameter(symbols_schema("List of stock symbols in the portfolio"))
            .with_parameter(
                FunctionParameter::new("days", json!({"type": "integer"}))
                    .with_description("Historical period for volatility calculation (default: 30)")
                    .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: VolatilityArgs = parse_args(CALCULATE_VOLATILITY_SCORE, arguments)?;
        if args.symbols.is_empty() {
            return Err(execution_error(CALCULATE_VOLATILITY_SCORE, "symbols list cannot be empty"));
        }
        if args.days < 1 {
            return Err(execution_error(CALCULATE_VOLATILITY_SCORE, "days must be at least 1"));
        }

        let total: f64 = args.symbols.iter().map(|s| volatility_of(s)).sum();
        let average = total / args.symbols.len() as f64;
        let period_factor = 1.0 + (args.days - 30) as f64 * 0.002;

        Ok(json!(round2(average * period_factor)))
    }
}

struct CheckRiskThreshold;

#[derive(Deserialize)]
struct RiskConfig {
    max_volatility: f64,
    min_value: f64,
    max_value: f64,
}

#[derive(Deserialize)]
struct RiskArgs {
    portfolio_value: f64,
    volatility_score: f64,
    risk_config: RiskConfig,
}

#[async_trait]
impl KernelFunction for CheckRiskThreshold {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(CHECK_RISK_THRESHOLD)
            .with_description("Checks if portfolio exceeds configured risk thresholds.")
            .with_parameter(
                FunctionParameter::new("portfolio_value", json_schema_for::<f64>())
                    .with_description("Total portfolio value in USD"),
            )
            .with_parameter(
                FunctionParameter::new("volatility_score", json_schema_for::<f64>())
                    .with_description("Volatility score from calculate_volatility_score"),
            )
            .with_parameter(
                FunctionParameter::new(
                    "risk_config",
                    json!({
                        "type": "object",
                        "properties": {
                            "max_volatility": {"type": "number"},
                            "min_value": {"type": "number"},
                            "max_value": {"type": "number"}
                        }
                    }),
                )
                .with_description("Risk configuration with max_volatility, min_value, max_value"),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: RiskArgs = parse_args(CHECK_RISK_THRESHOLD, arguments)?;
        if args.portfolio_value < 0.0 {
            return Err(execution_error(CHECK_RISK_THRESHOLD, "portfolio_value cannot be negative"));
        }
        if args.volatility_score < 0.0 {
            return Err(execution_error(CHECK_RISK_THRESHOLD, "volatility_score cannot be negative"));
        }

        let config = &args.risk_config;
        let mut exceeded = Vec::new();
        if args.volatility_score > config.max_volatility {
            exceeded.push("volatility");
        }
        if args.portfolio_value < config.min_value {
            exceeded.push("min_value");
        }
        if args.portfolio_value > config.max_value {
            exceeded.push("max_value");
        }

        let (risk_level, is_high_risk) = match exceeded.len() {
            0 => ("LOW", false),
            1 => ("MEDIUM", exceeded[0] == "volatility"),
            _ => ("HIGH", true),
        };

        Ok(json!({
            "is_high_risk": is_high_risk,
            "exceeded_thresholds": exceeded,
            "risk_level": risk_level,
        }))
    }
}

struct GenerateReport;

const REPORT_FIELDS: [&str; 7] = [
    "portfolio_id",
    "client_name",
    "total_value",
    "volatility_score",
    "risk_level",
    "exceeded_thresholds",
    "positions",
];

#[derive(Deserialize)]
struct ReportArgs {
    portfolio_data: Map<String, Value>,
    #[serde(default = "default_report_format")]
    report_format: String,
}

fn default_report_format() -> String {
    "markdown".to_string()
}

#[derive(Deserialize)]
struct ReportData {
    portfolio_id: String,
    client_name: String,
    total_value: f64,
    volatility_score: f64,
    risk_level: String,
    exceeded_thresholds: Vec<String>,
    positions: Vec<ReportPosition>,
}

#[derive(Deserialize)]
struct ReportPosition {
    symbol: String,
    shares: f64,
    current_price: f64,
    position_value: f64,
    gain_loss: f64,
    gain_loss_percent: f64,
}

#[async_trait]
impl KernelFunction for GenerateReport {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(GENERATE_REPORT)
            .with_description("Generates a formatted risk analysis report.")
            .with_parameter(
                FunctionParameter::new("portfolio_data", json!({"type": "object"})).with_description(
                    "Dict with portfolio_id, client_name, total_value, volatility_score, risk_level, exceeded_thresholds, positions",
                ),
            )
            .with_parameter(
                FunctionParameter::new(
                    "report_format",
                    json!({"type": "string", "enum": ["markdown", "html", "text"]}),
                )
                .with_description("Output format (default: markdown)")
                .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: ReportArgs = parse_args(GENERATE_REPORT, arguments)?;
        if let Some(missing) = REPORT_FIELDS.iter().find(|f| !args.portfolio_data.contains_key(**f)) {
            return Err(execution_error(GENERATE_REPORT, format!("Missing required field: {missing}")));
        }

        let data: ReportData = parse_args(GENERATE_REPORT, &Value::Object(args.portfolio_data))?;
        let report = match args.report_format.as_str() {
            "markdown" => markdown_report(&data),
            "html" => format!(
                "<html><body><h1>Portfolio Report: {}</h1></body></html>",
                data.portfolio_id
            ),
            "text" => format!(
                "Portfolio Report for {}\nRisk Level: {}\n",
                data.portfolio_id, data.risk_level
            ),
            other => {
                return Err(execution_error(GENERATE_REPORT, format!("Invalid report_format: {other}")))
            }
        };

        Ok(Value::String(report))
    }
}

fn markdown_report(data: &ReportData) -> String {
    let mut report = format!(
        "# Portfolio Risk Analysis Report\n\n## Portfolio Summary\n\
         - **Portfolio ID**: {}\n- **Client Name**: {}\n- **Total Value**: ${}\n\
         - **Volatility Score**: {:.2}\n- **Risk Level**: {}\n\n## Risk Assessment\n",
        data.portfolio_id,
        data.client_name,
        format_thousands(data.total_value),
        data.volatility_score,
        data.risk_level,
    );

    if data.exceeded_thresholds.is_empty() {
        report.push_str("All thresholds within acceptable limits.\n");
    } else {
        report.push_str("**ALERT**: The following thresholds have been exceeded:\n");
        for threshold in &data.exceeded_thresholds {
            report.push_str(&format!("- {threshold}\n"));
        }
    }

    report.push_str("\n## Portfolio Positions\n\n");
    report.push_str("| Symbol | Shares | Current Price | Position Value | Gain/Loss | Gain/Loss % |\n");
    report.push_str("|--------|--------|---------------|----------------|-----------|-------------|\n");
    for pos in &data.positions {
        let sign = if pos.gain_loss >= 0.0 { "+" } else { "" };
        report.push_str(&format!(
            "| {} | {} | ${:.2} | ${} | {sign}${} | {sign}{:.2}% |\n",
            pos.symbol,
            pos.shares,
            pos.current_price,
            format_thousands(pos.position_value),
            format_thousands(pos.gain_loss),
            pos.gain_loss_percent,
        ));
    }

    report.push_str(&format!(
        "\n**Generated**: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report
}

/// `1234567.891` -> `1,234,567.89`
fn format_thousands(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (whole, fraction) = formatted.split_once('.').unwrap_or((&formatted, "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

struct SendNotification {
    backend: Arc<PortfolioBackend>,
}

#[derive(Deserialize)]
struct NotificationArgs {
    recipient: String,
    subject: String,
    message: String,
    #[serde(default = "default_priority")]
    priority: String,
}

fn default_priority() -> String {
    "normal".to_string()
}

#[async_trait]
impl KernelFunction for SendNotification {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(SEND_NOTIFICATION)
            .with_description("Sends notification email to portfolio manager.")
            .with_parameter(
                FunctionParameter::new("recipient", json_schema_for::<String>())
                    .with_description("Email address"),
            )
            .with_parameter(
                FunctionParameter::new("subject", json_schema_for::<String>())
                    .with_description("Email subject line"),
            )
            .with_parameter(
                FunctionParameter::new("message", json_schema_for::<String>())
                    .with_description("Email body"),
            )
            .with_parameter(
                FunctionParameter::new(
                    "priority",
                    json!({"type": "string", "enum": ["low", "normal", "high"]}),
                )
                .with_description("Notification priority (default: normal)")
                .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: NotificationArgs = parse_args(SEND_NOTIFICATION, arguments)?;
        if !args.recipient.contains('@') {
            return Err(execution_error(SEND_NOTIFICATION, "Invalid email address"));
        }
        if !matches!(args.priority.as_str(), "low" | "normal" | "high") {
            return Err(execution_error(
                SEND_NOTIFICATION,
                format!("Invalid priority: {}", args.priority),
            ));
        }

        let sent = self.backend.record_notification(Notification {
            message_id: String::new(),
            recipient: args.recipient,
            subject: args.subject,
            message: args.message,
            priority: args.priority,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        Ok(json!({
            "sent": true,
            "message_id": sent.message_id,
            "timestamp": sent.timestamp,
        }))
    }
}

struct LogOperation {
    backend: Arc<PortfolioBackend>,
}

#[derive(Deserialize)]
struct LogArgs {
    operation: String,
    details: Map<String, Value>,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "info".to_string()
}

#[async_trait]
impl KernelFunction for LogOperation {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(LOG_OPERATION)
            .with_description("Logs operations to audit trail.")
            .with_parameter(
                FunctionParameter::new("operation", json_schema_for::<String>())
                    .with_description("Operation name (e.g. \"portfolio_analysis\", \"risk_check\")"),
            )
            .with_parameter(
                FunctionParameter::new("details", json!({"type": "object"}))
                    .with_description("Dictionary with operation-specific details"),
            )
            .with_parameter(
                FunctionParameter::new(
                    "level",
                    json!({"type": "string", "enum": ["info", "warning", "error"]}),
                )
                .with_description("Log level (default: info)")
                .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: LogArgs = parse_args(LOG_OPERATION, arguments)?;
        let details = Value::Object(args.details);
        match args.level.as_str() {
            "info" => tracing::info!(operation = %args.operation, %details, "audit"),
            "warning" => tracing::warn!(operation = %args.operation, %details, "audit"),
            "error" => tracing::error!(operation = %args.operation, %details, "audit"),
            other => {
                return Err(execution_error(LOG_OPERATION, format!("Invalid log level: {other}")))
            }
        }

        self.backend.record_audit(AuditEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: args.level,
            operation: args.operation,
            details,
        });

        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn call(registry: &FunctionRegistry, name: &str, args: Value) -> Result<Value, LLMError> {
        registry.invoke(name, &args).await
    }

    #[test]
    fn registers_the_full_catalogue() {
        let (registry, _) = portfolio_registry();
        let mut expected: Vec<String> = TOOL_NAMES.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(registry.names(), expected);
        assert!(registry.tools().iter().all(|tool| tool.function.description.is_some()));
    }

    #[tokio::test]
    async fn holdings_lookup_rejects_unknown_portfolio() {
        let (registry, _) = portfolio_registry();
        let holdings = call(&registry, GET_PORTFOLIO_HOLDINGS, json!({"portfolio_id": "PORT-002"}))
            .await
            .unwrap();
        assert_eq!(holdings["client_name"], "Johnson Family Trust");
        assert_eq!(holdings["holdings"].as_array().unwrap().len(), 4);

        let error = call(&registry, GET_PORTFOLIO_HOLDINGS, json!({"portfolio_id": "PORT-999"}))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Portfolio PORT-999 not found");
    }

    #[tokio::test]
    async fn value_and_volatility_for_first_portfolio() {
        let (registry, _) = portfolio_registry();
        let prices = call(&registry, GET_STOCK_PRICES, json!({"symbols": ["AAPL", "GOOGL", "MSFT", "ZZZ"]}))
            .await
            .unwrap();
        assert_eq!(prices["ZZZ"], Value::Null);

        let holdings = json!([
            {"symbol": "AAPL", "shares": 500, "purchase_price": 150.0},
            {"symbol": "GOOGL", "shares": 200, "purchase_price": 120.0},
            {"symbol": "MSFT", "shares": 300, "purchase_price": 320.0},
            {"symbol": "ZZZ", "shares": 1, "purchase_price": 1.0}
        ]);
        let value = call(
            &registry,
            CALCULATE_PORTFOLIO_VALUE,
            json!({"holdings": holdings, "current_prices": prices}),
        )
        .await
        .unwrap();
        assert_eq!(value["total_value"].as_f64().unwrap(), 231_785.0);
        assert_eq!(value["positions"].as_array().unwrap().len(), 3);

        let volatility = call(
            &registry,
            CALCULATE_VOLATILITY_SCORE,
            json!({"symbols": ["AAPL", "GOOGL", "MSFT"]}),
        )
        .await
        .unwrap();
        assert_eq!(volatility.as_f64().unwrap(), 19.2);
    }

    #[tokio::test]
    async fn risk_levels_follow_exceeded_thresholds() {
        let (registry, _) = portfolio_registry();
        let config = json!({"max_volatility": 30.0, "min_value": 100000.0, "max_value": 200000.0});

        let low = call(
            &registry,
            CHECK_RISK_THRESHOLD,
            json!({"portfolio_value": 150000.0, "volatility_score": 20.0, "risk_config": config}),
        )
        .await
        .unwrap();
        assert_eq!(low["risk_level"], "LOW");

        let high = call(
            &registry,
            CHECK_RISK_THRESHOLD,
            json!({"portfolio_value": 250000.0, "volatility_score": 40.0, "risk_config": config}),
        )
        .await
        .unwrap();
        assert_eq!(high["risk_level"], "HIGH");
        assert_eq!(high["exceeded_thresholds"], json!(["volatility", "max_value"]));

        let missing = call(
            &registry,
            CHECK_RISK_THRESHOLD,
            json!({"portfolio_value": 1.0, "volatility_score": 1.0, "risk_config": {"min_value": 0.0}}),
        )
        .await
        .unwrap_err();
        assert!(missing.to_string().contains("max_volatility"));
    }

    #[tokio::test]
    async fn report_requires_all_fields() {
        let (registry, _) = portfolio_registry();
        let error = call(
            &registry,
            GENERATE_REPORT,
            json!({"portfolio_data": {"portfolio_id": "PORT-001"}}),
        )
        .await
        .unwrap_err();
        assert_eq!(error.to_string(), "Missing required field: client_name");

        let report = call(
            &registry,
            GENERATE_REPORT,
            json!({
                "portfolio_data": {
                    "portfolio_id": "PORT-001",
                    "client_name": "Acme Corporation Pension Fund",
                    "total_value": 231785.0,
                    "volatility_score": 19.2,
                    "risk_level": "MEDIUM",
                    "exceeded_thresholds": ["max_value"],
                    "positions": [{
                        "symbol": "AAPL", "shares": 500, "current_price": 178.5,
                        "position_value": 89250.0, "gain_loss": 14250.0, "gain_loss_percent": 19.0
                    }]
                }
            }),
        )
        .await
        .unwrap();
        let text = report.as_str().unwrap();
        assert!(text.contains("$231,785.00"));
        assert!(text.contains("- max_value"));
        assert!(text.contains("| AAPL | 500 | $178.50 | $89,250.00 | +$14,250.00 | +19.00% |"));
    }

    #[tokio::test]
    async fn side_effects_are_recorded() {
        let (registry, backend) = portfolio_registry();
        let sent = call(
            &registry,
            SEND_NOTIFICATION,
            json!({"recipient": "sarah.chen@firm.com", "subject": "Risk", "message": "High risk", "priority": "high"}),
        )
        .await
        .unwrap();
        assert_eq!(sent["message_id"], "msg-10001");

        let bad = call(
            &registry,
            SEND_NOTIFICATION,
            json!({"recipient": "nobody", "subject": "s", "message": "m"}),
        )
        .await
        .unwrap_err();
        assert_eq!(bad.to_string(), "Invalid email address");

        let logged = call(
            &registry,
            LOG_OPERATION,
            json!({"operation": "risk_check", "details": {"portfolio_id": "PORT-001"}}),
        )
        .await
        .unwrap();
        assert_eq!(logged, Value::Null);

        assert_eq!(backend.sent_notifications().len(), 1);
        let trail = backend.audit_trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].level, "info");
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(format_thousands(0.5), "0.50");
        assert_eq!(format_thousands(999.0), "999.00");
        assert_eq!(format_thousands(1_234_567.891), "1,234,567.89");
        assert_eq!(format_thousands(-4_500.0), "-4,500.00");
    }
}
