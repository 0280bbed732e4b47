use std::fs;
use std::path::Path;

use crate::LLMError;

/// Splits a prompt file on its `## ` headers into the system and user
/// messages. Sections other than `System Message` and `User Message` are
/// ignored; a missing section yields an empty string.
pub fn parse_prompt_for_chat(text: &str) -> (String, String) {
    let mut system = String::new();
    let mut user = String::new();

    for (header, body) in sections(text) {
        let header = header.to_lowercase();
        if header.starts_with("system message") {
            system = body.trim().to_string();
        } else if header.starts_with("user message") {
            user = body.trim().to_string();
        }
    }

    (system, user)
}

pub fn load_prompt(path: impl AsRef<Path>) -> Result<(String, String), LLMError> {
    let text = fs::read_to_string(path)?;
    let (system, user) = parse_prompt_for_chat(&text);
    if user.is_empty() {
        return Err(LLMError::Config(
            "prompt file has no \"## User Message\" section".to_string(),
        ));
    }
    Ok((system, user))
}

/// `(header line, body)` for every line that opens with `##` plus whitespace.
fn sections(text: &str) -> Vec<(&str, String)> {
    let mut sections: Vec<(&str, String)> = Vec::new();

    for line in text.lines() {
        let header = line
            .strip_prefix("##")
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(str::trim_start);

        if let Some(header) = header {
            sections.push((header, String::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "# Agentic chat\n\nIntro text.\n\n## System Message\n\nYou are a risk analyst.\n### Tools\nUse them.\n\n## User Message\n\nAnalyse PORT-001.\n\n## Notes\nignored\n";

    #[test]
    fn splits_on_second_level_headers() {
        let (system, user) = parse_prompt_for_chat(PROMPT);
        assert_eq!(system, "You are a risk analyst.\n### Tools\nUse them.");
        assert_eq!(user, "Analyse PORT-001.");
    }

    #[test]
    fn headers_are_case_insensitive_and_optional() {
        let (system, user) = parse_prompt_for_chat("##   user message (final)\nhello\n");
        assert_eq!(system, "");
        assert_eq!(user, "hello");
    }

    #[test]
    fn prompt_without_user_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentic-chat.md");
        fs::write(&path, "## System Message\nonly system\n").unwrap();
        assert!(load_prompt(&path).is_err());
    }
}
