//! Best-effort repair of near-miss JSON from a model response: markdown
//! code fences, leading/trailing chatter around the object, and trailing
//! commas are the overwhelming majority of real failures.

use serde_json::Value;

use crate::LlmError;

pub fn repair_json(raw: &str) -> Result<Value, LlmError> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(&unfenced) {
        return Ok(value);
    }

    let extracted = extract_outermost_braces(&unfenced);
    if let Some(candidate) = &extracted {
        if let Ok(value) = serde_json::from_str(candidate) {
            return Ok(value);
        }
        let no_trailing_commas = strip_trailing_commas(candidate);
        if let Ok(value) = serde_json::from_str(&no_trailing_commas) {
            return Ok(value);
        }
    }

    Err(LlmError::Unparseable(raw.chars().take(200).collect()))
}

fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    text.to_string()
}

fn extract_outermost_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_clean_json_directly() {
        let value = repair_json(r#"{"tool": "chat_post"}"#).unwrap();
        assert_eq!(value, json!({"tool": "chat_post"}));
    }

    #[test]
    fn strips_markdown_code_fence() {
        let raw = "```json\n{\"tool\": \"hibernate\"}\n```";
        let value = repair_json(raw).unwrap();
        assert_eq!(value, json!({"tool": "hibernate"}));
    }

    #[test]
    fn extracts_object_from_surrounding_chatter() {
        let raw = "Sure, here's the action:\n{\"tool\": \"shell\", \"args\": {}}\nHope that helps!";
        let value = repair_json(raw).unwrap();
        assert_eq!(value, json!({"tool": "shell", "args": {}}));
    }

    #[test]
    fn strips_trailing_comma_before_closing_brace() {
        let raw = r#"{"tool": "shell", "args": {},}"#;
        let value = repair_json(raw).unwrap();
        assert_eq!(value, json!({"tool": "shell", "args": {}}));
    }

    #[test]
    fn unrecoverable_garbage_returns_unparseable_error() {
        let result = repair_json("not json and no braces at all");
        assert!(matches!(result, Err(LlmError::Unparseable(_))));
    }
}
