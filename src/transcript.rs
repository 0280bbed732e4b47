use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::is_error_result;
use crate::functions::ToolArguments;
use crate::types::{ChatMessage, MessageRole};
use crate::LLMError;

/// How far past an assistant message the pairing scan looks for results.
pub const RESULT_LOOKAHEAD: usize = 20;

/// One requested tool call, paired with the tool message that answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Position across the whole conversation, starting at 0.
    pub index: usize,
    pub name: String,
    pub arguments: ToolArguments,
    /// Raw content of the paired tool message, if one was found.
    pub result: Option<String>,
    /// Index of the assistant message that issued the call.
    pub message_index: usize,
}

impl ToolCallRecord {
    pub fn parsed_arguments(&self) -> Option<Map<String, Value>> {
        self.arguments.parse().ok()
    }

    /// The result decoded as JSON. Plain-text results (reports) yield `None`.
    pub fn result_value(&self) -> Option<Value> {
        self.result
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn returned_error(&self) -> bool {
        self.result_value().as_ref().map_or(false, is_error_result)
    }
}

/// Finds the tool message answering the `offset`-th call of the assistant
/// message at `message_index`.
///
/// Results are expected immediately after the assistant message, one per call
/// and in call order. The scan gives up at the next assistant or user message
/// or after [`RESULT_LOOKAHEAD`] positions.
pub fn pair_result(messages: &[ChatMessage], message_index: usize, offset: usize) -> Option<usize> {
    let expected = message_index + 1 + offset;
    let end = messages.len().min(message_index + RESULT_LOOKAHEAD);

    for position in message_index + 1..end {
        match messages[position].role {
            MessageRole::Tool if position == expected => return Some(position),
            MessageRole::Assistant | MessageRole::User => return None,
            _ => {}
        }
    }
    None
}

/// Flattens every assistant tool call into an ordered list of records.
pub fn extract_tool_calls(messages: &[ChatMessage]) -> Vec<ToolCallRecord> {
    let mut records = Vec::new();

    for (message_index, message) in messages.iter().enumerate() {
        if message.role != MessageRole::Assistant {
            continue;
        }
        for (offset, call) in message.tool_calls.iter().enumerate() {
            let result = pair_result(messages, message_index, offset)
                .map(|position| messages[position].text().unwrap_or_default().to_string());

            records.push(ToolCallRecord {
                index: records.len(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
                result,
                message_index,
            });
        }
    }

    records
}

/// The complete, immutable message history of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    tool_calls: Vec<ToolCallRecord>,
}

impl Transcript {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        let tool_calls = extract_tool_calls(&messages);
        Self {
            messages,
            tool_calls,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LLMError> {
        let raw = fs::read_to_string(path)?;
        let messages: Vec<ChatMessage> = serde_json::from_str(&raw)?;
        Ok(Self::new(messages))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LLMError> {
        let json = serde_json::to_string_pretty(&self.messages)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn assistant_messages(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|message| message.role == MessageRole::Assistant)
    }

    /// The last assistant message that carries text and requests no tools.
    pub fn final_response(&self) -> Option<&str> {
        self.assistant_messages()
            .rev()
            .filter(|message| !message.has_tool_calls())
            .find_map(|message| message.text().filter(|text| !text.is_empty()))
    }

    /// True when the conversation ended on a plain text answer.
    pub fn completed(&self) -> bool {
        self.messages.last().map_or(false, |last| {
            last.role == MessageRole::Assistant && !last.has_tool_calls() && last.non_empty_text().is_some()
        })
    }

    /// All assistant text joined with newlines.
    pub fn assistant_text(&self) -> String {
        self.assistant_messages()
            .filter_map(|message| message.non_empty_text())
            .fold(String::new(), |mut joined, text| {
                joined.push_str(text);
                joined.push('\n');
                joined
            })
    }
}

impl From<Vec<ChatMessage>> for Transcript {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::new(messages)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::functions::{FunctionCall, ToolCall};

    fn calls(names: &[&str]) -> ChatMessage {
        ChatMessage::assistant("").with_tool_calls(
            names
                .iter()
                .map(|name| ToolCall::new(FunctionCall::new(*name, json!({}))))
                .collect(),
        )
    }

    #[test]
    fn results_pair_positionally() {
        let messages = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u"),
            calls(&["get_portfolio_holdings", "get_stock_prices"]),
            ChatMessage::tool(r#"{"portfolio_id": "PORT-001"}"#),
            ChatMessage::tool(r#"{"error": "symbols list cannot be empty"}"#),
            calls(&["log_operation"]),
            ChatMessage::tool(r#"{"status": "ok"}"#),
            ChatMessage::assistant("done"),
        ];

        let records = extract_tool_calls(&messages);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message_index, 2);
        assert_eq!(records[1].result.as_deref(), Some(r#"{"error": "symbols list cannot be empty"}"#));
        assert!(records[1].returned_error());
        assert!(!records[0].returned_error());
        assert_eq!(records[2].index, 2);
        assert_eq!(records[2].result.as_deref(), Some(r#"{"status": "ok"}"#));
    }

    #[test]
    fn missing_results_stay_unpaired() {
        let messages = vec![
            calls(&["get_stock_prices", "calculate_volatility_score"]),
            ChatMessage::tool("{}"),
            ChatMessage::user("keep going"),
            ChatMessage::tool("{}"),
        ];

        let records = extract_tool_calls(&messages);
        assert_eq!(records[0].result.as_deref(), Some("{}"));
        assert_eq!(records[1].result, None);
    }

    #[test]
    fn lookahead_is_bounded() {
        let names = vec!["get_stock_prices"; 25];
        let mut messages = vec![calls(&names)];
        messages.extend((0..25).map(|_| ChatMessage::tool("{}")));

        let records = extract_tool_calls(&messages);
        assert!(records[18].result.is_some());
        assert!(records[19].result.is_none());
    }

    #[test]
    fn completion_and_final_response() {
        let open = Transcript::new(vec![ChatMessage::user("u"), calls(&["get_stock_prices"])]);
        assert!(!open.completed());
        assert_eq!(open.final_response(), None);

        let done = Transcript::new(vec![
            ChatMessage::user("u"),
            ChatMessage::assistant("Portfolio PORT-001 is low risk."),
        ]);
        assert!(done.completed());
        assert_eq!(done.final_response(), Some("Portfolio PORT-001 is low risk."));

        let reopened = Transcript::new(vec![
            ChatMessage::user("u"),
            ChatMessage::assistant("First pass."),
            ChatMessage::assistant("Second pass."),
            calls(&["log_operation"]),
            ChatMessage::tool(r#"{"status": "ok"}"#),
        ]);
        assert!(!reopened.completed());
        assert_eq!(reopened.final_response(), Some("Second pass."));
    }
}
