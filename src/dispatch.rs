use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Map, Number, Value};

use crate::functions::{FunctionRegistry, Tool, ToolArguments};
use crate::LLMError;

/// Result of one dispatched call, as fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub result: Value,
    /// Arguments after coercion, or the best-effort view of the raw input
    /// when they never reached the catalogue.
    pub arguments: Value,
    pub schema_errors: Vec<String>,
}

impl DispatchOutcome {
    fn error(message: impl Into<String>, arguments: Value) -> Self {
        Self {
            result: json!({ "error": message.into() }),
            arguments,
            schema_errors: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        is_error_result(&self.result)
    }
}

/// A result counts as failed when it is a mapping carrying an `error` key.
pub fn is_error_result(result: &Value) -> bool {
    result
        .as_object()
        .map_or(false, |object| object.contains_key("error"))
}

/// The single seam between the conversation loop and whatever backend
/// executes tools.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    fn tools(&self) -> Vec<Tool>;

    /// Never fails: every problem is reported as an `{"error": ...}` result.
    async fn dispatch(&self, name: &str, arguments: &ToolArguments) -> DispatchOutcome;
}

/// Dispatches into a [`FunctionRegistry`], coercing arguments against each
/// function's parameter schema first.
pub struct RegistryDispatcher {
    registry: FunctionRegistry,
    schemas: BTreeMap<String, Value>,
    validators: BTreeMap<String, JSONSchema>,
}

impl RegistryDispatcher {
    pub fn new(registry: FunctionRegistry) -> Result<Self, LLMError> {
        let mut schemas = BTreeMap::new();
        let mut validators = BTreeMap::new();

        for definition in registry.definitions() {
            let schema = definition.schema();
            let compiled = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&schema)
                .map_err(|e| LLMError::Config(format!("schema for {}: {e}", definition.name)))?;
            validators.insert(definition.name.clone(), compiled);
            schemas.insert(definition.name, schema);
        }

        Ok(Self {
            registry,
            schemas,
            validators,
        })
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    fn schema_errors(&self, name: &str, arguments: &Value) -> Vec<String> {
        let Some(validator) = self.validators.get(name) else {
            return Vec::new();
        };
        match validator.validate(arguments) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| e.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ToolDispatch for RegistryDispatcher {
    fn tools(&self) -> Vec<Tool> {
        self.registry.tools()
    }

    async fn dispatch(&self, name: &str, arguments: &ToolArguments) -> DispatchOutcome {
        let raw = arguments.to_value();

        let Some(schema) = self.schemas.get(name) else {
            tracing::warn!(tool = name, "unknown tool requested");
            return DispatchOutcome::error(LLMError::UnknownFunction(name.to_string()).to_string(), raw);
        };

        let parsed = match arguments.parse() {
            Ok(map) => map,
            Err(error) => {
                tracing::warn!(tool = name, %error, "rejected tool arguments");
                return DispatchOutcome::error(tool_error_message(&error), raw);
            }
        };

        let coerced = Value::Object(coerce_object(parsed, schema));
        let schema_errors = self.schema_errors(name, &coerced);

        let started = Instant::now();
        let result = match self.registry.invoke(name, &coerced).await {
            Ok(Value::Null) => json!({ "status": "ok" }),
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(tool = name, %error, "tool execution failed");
                json!({ "error": tool_error_message(&error) })
            }
        };
        tracing::debug!(
            tool = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool dispatched"
        );

        DispatchOutcome {
            result,
            arguments: coerced,
            schema_errors,
        }
    }
}

fn tool_error_message(error: &LLMError) -> String {
    match error {
        LLMError::InvalidFunctionArguments(message) => message.clone(),
        other => other.to_string(),
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

fn coerce_object(mut arguments: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let additional = schema.get("additionalProperties").filter(|s| s.is_object());

    for (key, value) in arguments.iter_mut() {
        let property = properties.and_then(|p| p.get(key)).or(additional);
        if let Some(property) = property {
            *value = coerce_value(value.take(), property);
        }
    }
    arguments
}

/// Repairs the handful of shape mistakes models commonly make. Anything it
/// does not recognise is passed through untouched.
fn coerce_value(value: Value, schema: &Value) -> Value {
    match (schema_type(schema), value) {
        (Some("array"), Value::Array(items)) => match schema.get("items") {
            Some(item_schema) => Value::Array(
                items
                    .into_iter()
                    .map(|item| coerce_value(item, item_schema))
                    .collect(),
            ),
            None => Value::Array(items),
        },
        (Some("array"), value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
            let item = match schema.get("items") {
                Some(item_schema) => coerce_value(value, item_schema),
                None => value,
            };
            Value::Array(vec![item])
        }
        (Some("array"), Value::Object(object)) => match schema.get("items") {
            Some(item_schema) if schema_type(item_schema) == Some("object") => {
                Value::Array(vec![coerce_value(Value::Object(object), item_schema)])
            }
            _ => Value::Object(object),
        },
        (Some("integer"), Value::String(text)) => parse_integer(text.trim())
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        (Some("integer"), Value::Number(number)) => match number.as_i64() {
            Some(_) => Value::Number(number),
            None => number
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| Value::from(f as i64))
                .unwrap_or(Value::Number(number)),
        },
        (Some("number"), Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        (Some("object"), Value::Object(object)) => Value::Object(coerce_object(object, schema)),
        (_, value) => value,
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}
