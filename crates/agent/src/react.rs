//! ReAct text fallback — recover tool calls from free-form model output.
//!
//! Some models never emit native tool calls and instead write the textual
//! convention:
//!
//! ```text
//! Action: read_file
//! Action Input: {"path": "src/main.rs"}
//! ```
//!
//! The adapter is stateless per invocation: each turn's content is parsed in
//! isolation, partial matches are never carried across turns.

use oxpilot_core::message::ToolCall;
use regex_lite::Regex;

/// Parse the ReAct `Action` / `Action Input` convention out of assistant
/// content. Returns one synthetic tool call, or `None` when no action is
/// present or the payload cannot be coerced into JSON.
///
/// Keyword matching is case-insensitive. The input payload may be inline JSON
/// on the same line, a fenced code block immediately following, or plain text
/// on the next line. A missing payload defaults to `{}`.
pub fn parse_react_tool_call(content: &str, turn: u32) -> Option<ToolCall> {
    let normalized = content.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    let mut action = String::new();
    let mut action_input = String::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        let lower = line.to_lowercase();

        if lower.starts_with("action input:") {
            let mut value = line["action input:".len()..].trim().to_string();
            if value.is_empty() && i + 1 < lines.len() {
                let next = lines[i + 1].trim();
                if next.starts_with("```") {
                    let mut block = Vec::new();
                    for candidate in lines.iter().skip(i + 2) {
                        if candidate.trim().starts_with("```") {
                            break;
                        }
                        block.push(*candidate);
                    }
                    value = block.join("\n").trim().to_string();
                } else {
                    value = next.to_string();
                }
            }
            action_input = value;
            i += 1;
            continue;
        }

        if lower.starts_with("action:") {
            action = line["action:".len()..].trim().to_string();
        }

        i += 1;
    }

    if action.is_empty() {
        return None;
    }

    if action_input.trim().is_empty() {
        action_input = "{}".to_string();
    }
    action_input = normalize_action_input(&action_input);

    if serde_json::from_str::<serde_json::Value>(&action_input).is_err() {
        let repaired = repair_json_like(&action_input);
        if serde_json::from_str::<serde_json::Value>(&repaired).is_err() {
            return None;
        }
        action_input = repaired;
    }

    Some(ToolCall::function(
        format!("react-{turn}"),
        action,
        action_input,
    ))
}

/// Strip a surrounding fenced code block, if any.
fn normalize_action_input(input: &str) -> String {
    let s = input.trim();
    if !s.starts_with("```") {
        return s.to_string();
    }

    let lines: Vec<&str> = s.split('\n').collect();
    if lines.len() < 2 {
        return s.to_string();
    }

    let start = 1;
    let mut end = lines.len();
    for (i, line) in lines.iter().enumerate().rev() {
        if i == 0 {
            break;
        }
        if line.trim().starts_with("```") {
            end = i;
            break;
        }
    }
    if end > start {
        return lines[start..end].join("\n").trim().to_string();
    }
    s.to_string()
}

/// Lenient repair for almost-JSON payloads: smart quotes to ASCII,
/// single-quoted keys/values to double-quoted, trailing commas removed.
fn repair_json_like(input: &str) -> String {
    let s = normalize_action_input(input);
    if s.is_empty() {
        return "{}".to_string();
    }

    let mut s = s
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"")
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'");

    if let Ok(re) = Regex::new(r"([{,]\s*)'([^'\n\r]+?)'\s*:") {
        s = re.replace_all(&s, "$1\"$2\":").into_owned();
    }
    if let Ok(re) = Regex::new(r":\s*'([^'\n\r]*?)'(\s*[,}\]])") {
        s = re.replace_all(&s, ": \"$1\"$2").into_owned();
    }
    if let Ok(re) = Regex::new(r",(\s*[}\]])") {
        s = re.replace_all(&s, "$1").into_owned();
    }

    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(call: &ToolCall) -> serde_json::Value {
        serde_json::from_str(&call.function.arguments).unwrap()
    }

    #[test]
    fn inline_json_payload() {
        let call = parse_react_tool_call("Action: read\nAction Input: {\"p\":\"x\"}", 1).unwrap();
        assert_eq!(call.function.name, "read");
        assert_eq!(call.id, "react-1");
        assert_eq!(args_of(&call), serde_json::json!({"p": "x"}));
    }

    #[test]
    fn single_quotes_and_trailing_comma_repaired() {
        let call = parse_react_tool_call("Action: read\nAction Input: {'p':'x',}", 2).unwrap();
        assert_eq!(call.function.name, "read");
        assert_eq!(args_of(&call), serde_json::json!({"p": "x"}));
    }

    #[test]
    fn fenced_block_payload() {
        let content = "Action: read\nAction Input:\n```json\n{\"p\":\"x\"}\n```";
        let call = parse_react_tool_call(content, 3).unwrap();
        assert_eq!(call.function.name, "read");
        assert_eq!(args_of(&call), serde_json::json!({"p": "x"}));
    }

    #[test]
    fn plain_text_next_line() {
        let content = "Action: shell\nAction Input:\n{\"command\": \"ls\"}";
        let call = parse_react_tool_call(content, 1).unwrap();
        assert_eq!(args_of(&call), serde_json::json!({"command": "ls"}));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let call = parse_react_tool_call("action: read\nACTION INPUT: {\"p\":1}", 1).unwrap();
        assert_eq!(call.function.name, "read");
    }

    #[test]
    fn missing_action_yields_nothing() {
        assert!(parse_react_tool_call("Just some prose with no tool use.", 1).is_none());
        assert!(parse_react_tool_call("Action Input: {\"p\":\"x\"}", 1).is_none());
    }

    #[test]
    fn unparseable_payload_yields_nothing() {
        assert!(parse_react_tool_call("Action: read\nAction Input: not json at all", 1).is_none());
    }

    #[test]
    fn missing_input_defaults_to_empty_object() {
        let call = parse_react_tool_call("Action: list_dir", 4).unwrap();
        assert_eq!(call.function.arguments, "{}");
    }

    #[test]
    fn smart_quotes_repaired() {
        let content = "Action: read\nAction Input: {\u{201c}p\u{201d}: \u{201c}x\u{201d}}";
        let call = parse_react_tool_call(content, 1).unwrap();
        assert_eq!(args_of(&call), serde_json::json!({"p": "x"}));
    }

    #[test]
    fn each_turn_parsed_in_isolation() {
        assert!(parse_react_tool_call("Action: read", 1).is_some());
        // a later turn with only the input keyword must not reuse the action
        assert!(parse_react_tool_call("Action Input: {}", 2).is_none());
    }
}
