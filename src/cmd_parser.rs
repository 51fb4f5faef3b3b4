use serde::Deserialize;
use tracing::debug;

use crate::error::{ParseError, ParseFailure};

const SNIPPET_CHARS: usize = 200;

/// A structured proposal extracted from a model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSuggestion {
    pub explanation: String,
    pub command: String,
    pub needs_output: bool,
    pub pre_command: String,
    pub next_question: String,
}

impl CommandSuggestion {
    /// A pending question means the suggestion must not be executed.
    pub fn is_incomplete(&self) -> bool {
        !self.next_question.is_empty()
    }

    pub fn has_command(&self) -> bool {
        !self.command.is_empty()
    }

    /// The model wants the output of `pre_command` before it commits.
    pub fn wants_output(&self) -> bool {
        self.needs_output && !self.pre_command.is_empty()
    }

    /// Neither a command nor a question: the model declined to act.
    pub fn is_declined(&self) -> bool {
        self.command.is_empty() && self.next_question.is_empty()
    }
}

// Wire shape of the reply. Every field may be absent or null and unknown
// fields are ignored.
#[derive(Deserialize, Default)]
#[serde(default)]
struct WireSuggestion {
    response: Option<String>,
    command: Option<String>,
    needs_output: Option<bool>,
    pre_command: Option<String>,
    next_question: Option<String>,
}

impl From<WireSuggestion> for CommandSuggestion {
    fn from(wire: WireSuggestion) -> Self {
        let clean = |s: Option<String>| s.map(|v| v.trim().to_string()).unwrap_or_default();
        Self {
            explanation: clean(wire.response),
            command: clean(wire.command),
            needs_output: wire.needs_output.unwrap_or(false),
            pre_command: clean(wire.pre_command),
            next_question: clean(wire.next_question),
        }
    }
}

/// Extracts the first JSON object embedded in `raw` and decodes it.
///
/// The reply may be wrapped in prose or a markdown fence. Candidates are
/// found by brace-depth scanning that ignores braces inside JSON strings.
/// A balanced candidate that is not valid JSON is skipped as a whole and
/// scanning resumes after it; a `{` that never closes is skipped alone.
pub fn parse_suggestion(raw: &str) -> Result<CommandSuggestion, ParseError> {
    let mut search_from = 0;
    let mut first_failure: Option<ParseFailure> = None;

    while let Some(offset) = raw[search_from..].find('{') {
        let start = search_from + offset;
        // A stray `{` in prose never closes; try the next one.
        let Some(end) = find_matching_brace(raw, start) else {
            first_failure.get_or_insert(ParseFailure::UnbalancedBraces);
            search_from = start + 1;
            continue;
        };

        let candidate = &raw[start..=end];
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value @ serde_json::Value::Object(_)) => {
                return match serde_json::from_value::<WireSuggestion>(value) {
                    Ok(wire) => {
                        let suggestion = CommandSuggestion::from(wire);
                        debug!(?suggestion, "parsed suggestion");
                        Ok(suggestion)
                    }
                    Err(e) => {
                        debug!("suggestion schema mismatch: {}", e);
                        Err(parse_error(ParseFailure::SchemaMismatch, raw))
                    }
                };
            }
            _ => {
                first_failure.get_or_insert(ParseFailure::InvalidJson);
                search_from = end + 1;
            }
        }
    }

    Err(parse_error(
        first_failure.unwrap_or(ParseFailure::NoJsonObject),
        raw,
    ))
}

/// Returns the byte index of the `}` closing the object opened at `start`.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start).copied() != Some(b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_error(reason: ParseFailure, raw: &str) -> ParseError {
    let mut raw_snippet: String = raw.trim().chars().take(SNIPPET_CHARS).collect();
    if raw.trim().chars().count() > SNIPPET_CHARS {
        raw_snippet.push('…');
    }
    ParseError { reason, raw_snippet }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let raw = r#"{"response":"Lists running containers","command":"docker ps","needs_output":false,"pre_command":"","next_question":""}"#;
        let s = parse_suggestion(raw).unwrap();
        assert_eq!(s.command, "docker ps");
        assert_eq!(s.explanation, "Lists running containers");
        assert!(!s.needs_output);
        assert!(!s.is_incomplete());
    }

    #[test]
    fn test_parse_object_surrounded_by_prose() {
        let raw = "Sure! Here is what you need:\n```json\n{\"response\": \"Show disk usage\", \"command\": \"df -h\"}\n```\nLet me know if that helps {or not}.";
        let s = parse_suggestion(raw).unwrap();
        assert_eq!(s.command, "df -h");
        assert_eq!(s.explanation, "Show disk usage");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_depth() {
        let raw = r#"{"response":"prints a brace","command":"awk '{print $1}' file.txt","needs_output":false}"#;
        let s = parse_suggestion(raw).unwrap();
        assert_eq!(s.command, "awk '{print $1}' file.txt");
    }

    #[test]
    fn test_nested_objects_and_unknown_fields() {
        let raw = r#"prefix {"response":"x","command":"ls","meta":{"confidence":{"score":1}},"extra":[1,2]} {"command":"rm -rf /"}"#;
        let s = parse_suggestion(raw).unwrap();
        assert_eq!(s.command, "ls");
    }

    #[test]
    fn test_missing_fields_default() {
        let s = parse_suggestion(r#"{"command":"pwd"}"#).unwrap();
        assert_eq!(s.command, "pwd");
        assert_eq!(s.explanation, "");
        assert!(!s.needs_output);
        assert_eq!(s.pre_command, "");
        assert_eq!(s.next_question, "");

        let s = parse_suggestion(r#"{"command": null, "next_question": null}"#).unwrap();
        assert!(s.is_declined());
    }

    #[test]
    fn test_empty_suggestion_is_not_an_error() {
        let s = parse_suggestion(r#"{"response":"I can't help with that","command":"","next_question":""}"#).unwrap();
        assert!(s.is_declined());
        assert_eq!(s.explanation, "I can't help with that");
    }

    #[test]
    fn test_needs_output_and_question() {
        let s = parse_suggestion(r#"{"response":"","command":"","needs_output":true,"pre_command":"ls","next_question":""}"#).unwrap();
        assert!(s.wants_output());

        let s = parse_suggestion(r#"{"response":"Need the image name","command":"","needs_output":false,"pre_command":"","next_question":"Which image?"}"#).unwrap();
        assert!(s.is_incomplete());
        assert_eq!(s.next_question, "Which image?");
    }

    #[test]
    fn test_no_braces_is_error() {
        let err = parse_suggestion("I think you should run ls").unwrap_err();
        assert_eq!(err.reason, ParseFailure::NoJsonObject);
        assert!(err.raw_snippet.contains("run ls"));
    }

    #[test]
    fn test_unbalanced_is_error() {
        let err = parse_suggestion(r#"{"response":"oops","command":"ls""#).unwrap_err();
        assert_eq!(err.reason, ParseFailure::UnbalancedBraces);

        let err = parse_suggestion("}}} {{").unwrap_err();
        assert_eq!(err.reason, ParseFailure::UnbalancedBraces);
    }

    #[test]
    fn test_stray_open_brace_before_object() {
        let raw = r#"Use a { in bash to open a group. Answer: {"response":"x","command":"ls"}"#;
        let s = parse_suggestion(raw).unwrap();
        assert_eq!(s.command, "ls");
        assert_eq!(s.explanation, "x");

        let raw = r#"{ oops {"command":"pwd"} and {{"#;
        assert_eq!(parse_suggestion(raw).unwrap().command, "pwd");
    }

    #[test]
    fn test_invalid_json_is_error() {
        let err = parse_suggestion("{response: 'single quotes'}").unwrap_err();
        assert_eq!(err.reason, ParseFailure::InvalidJson);
    }

    #[test]
    fn test_error_message_names_reason() {
        let err = parse_suggestion("{response: 'single quotes'}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "reply contains malformed JSON: {response: 'single quotes'}"
        );
        let reason: &dyn std::error::Error = &err.reason;
        assert_eq!(reason.to_string(), "reply contains malformed JSON");
    }

    #[test]
    fn test_wrong_field_type_is_error() {
        let err = parse_suggestion(r#"{"command": 42}"#).unwrap_err();
        assert_eq!(err.reason, ParseFailure::SchemaMismatch);
    }

    #[test]
    fn test_snippet_is_truncated() {
        let raw = "x".repeat(500);
        let err = parse_suggestion(&raw).unwrap_err();
        assert_eq!(err.raw_snippet.chars().count(), SNIPPET_CHARS + 1);
    }
}
