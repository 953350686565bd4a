//! Tolerant extraction of structured provider output.
//!
//! Providers wrap JSON in prose, code fences, and reasoning blocks, and
//! sometimes emit truncated or comma-damaged objects. Parsing tries a fixed
//! ladder of increasingly invasive repairs and reports what it did; it never
//! guesses content, so an unrepairable payload is an explicit error.

use crate::mutation::Instruction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from response parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No JSON object could be extracted from response")]
    Unparseable,

    #[error("Extracted JSON is not an object")]
    NotAnObject,

    #[error("Response object malformed: {0}")]
    BadShape(#[from] serde_json::Error),
}

/// A successfully extracted JSON object, with repair provenance.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub value: Value,
    /// True when any repair stage beyond a direct parse was needed.
    pub repaired: bool,
    /// Human-readable description of the repairs performed.
    pub repair_note: Option<String>,
}

/// One narrative log line in a provider reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyLog {
    #[serde(default = "default_sender")]
    pub sender: String,
    pub text: String,
}

fn default_sender() -> String {
    "Narrator".to_string()
}

/// The structured reply contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderReply {
    #[serde(default)]
    pub logs: Vec<ReplyLog>,
    #[serde(default, rename = "shortTerm")]
    pub short_term: Option<String>,
    #[serde(default, rename = "tavern_commands")]
    pub commands: Vec<Instruction>,
    #[serde(default)]
    pub action_options: Vec<String>,
}

impl ProviderReply {
    /// Convert an extracted object into the typed reply contract.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        if !value.is_object() {
            return Err(ParseError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Extract a JSON object from raw provider text.
///
/// Stages, in order: direct parse; strip a fenced code block; extract the
/// first brace-balanced object by depth scan; strip trailing commas and/or
/// append missing closing braces; otherwise fail.
pub fn parse(raw: &str) -> Result<Parsed, ParseError> {
    let trimmed = raw.trim();

    // Stage 1: direct parse.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(Parsed {
                value,
                repaired: false,
                repair_note: None,
            });
        }
    }

    // Stage 2: strip a fenced code block and retry.
    if let Some(inner) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if value.is_object() {
                debug!("parsed response after stripping code fence");
                return Ok(Parsed {
                    value,
                    repaired: true,
                    repair_note: Some("stripped fenced code block".to_string()),
                });
            }
        }
    }

    // Stage 3: first brace-balanced object by depth scan.
    let candidate = balanced_object(trimmed).or_else(|| {
        strip_code_fence(trimmed).and_then(balanced_object)
    });
    if let Some(candidate) = candidate {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                debug!("parsed response after extracting embedded object");
                return Ok(Parsed {
                    value,
                    repaired: true,
                    repair_note: Some("extracted embedded JSON object".to_string()),
                });
            }
        }

        // Stage 4a: strip trailing commas inside the candidate.
        let mut notes = Vec::new();
        let mut repaired = strip_trailing_commas(candidate);
        if repaired != candidate {
            notes.push("removed trailing commas");
        }

        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            if value.is_object() {
                return Ok(Parsed {
                    value,
                    repaired: true,
                    repair_note: Some(notes.join("; ")),
                });
            }
        }

        // Stage 4b: close unbalanced braces/brackets.
        if let Some(closed) = close_unbalanced(&repaired) {
            notes.push("closed unbalanced delimiters");
            repaired = closed;
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                if value.is_object() {
                    debug!("parsed response after structural repair");
                    return Ok(Parsed {
                        value,
                        repaired: true,
                        repair_note: Some(notes.join("; ")),
                    });
                }
            }
        }
    }

    // Stage 4 against the whole text, for truncated output with no balanced
    // object to extract.
    if let Some(start) = trimmed.find('{') {
        let tail = strip_trailing_commas(&trimmed[start..]);
        if let Some(closed) = close_unbalanced(&tail) {
            if let Ok(value) = serde_json::from_str::<Value>(&closed) {
                if value.is_object() {
                    debug!("parsed response after closing truncated object");
                    return Ok(Parsed {
                        value,
                        repaired: true,
                        repair_note: Some(
                            "removed trailing commas; closed unbalanced delimiters".to_string(),
                        ),
                    });
                }
            }
        }
    }

    Err(ParseError::Unparseable)
}

/// Contents of the first fenced code block, if any (language tag ignored).
fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// The first brace-balanced object substring, honoring strings and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove commas that directly precede a closing bracket or brace.
fn strip_trailing_commas(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            out.push(b);
            continue;
        }
        match b {
            b'\\' if in_string => {
                escaped = true;
                out.push(b);
            }
            b'"' => {
                in_string = !in_string;
                out.push(b);
            }
            b',' if !in_string => {
                let next = bytes[i + 1..]
                    .iter()
                    .find(|c| !c.is_ascii_whitespace())
                    .copied();
                if !matches!(next, Some(b'}') | Some(b']')) {
                    out.push(b);
                }
            }
            _ => out.push(b),
        }
    }
    // Only ASCII commas were removed, so the bytes remain valid UTF-8.
    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

/// Append closing delimiters to balance depth. Returns `None` when the text
/// is already balanced or is damaged beyond counting (negative depth).
fn close_unbalanced(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for &b in text.as_bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => stack.push(b'}'),
            b'[' if !in_string => stack.push(b']'),
            b'}' | b']' if !in_string => {
                if stack.pop() != Some(b) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut out = text.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(close) = stack.pop() {
        out.push(close as char);
    }
    Some(out)
}

// ============================================================================
// Reasoning traces
// ============================================================================

/// Reasoning-stage tags, in the fixed order traces are merged.
const THINKING_STAGES: [&str; 6] = ["pre", "plan", "style", "draft", "check", "thinking"];

/// Result of splitting reasoning delimiters out of raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Thinking {
    /// The raw text with all reasoning blocks removed.
    pub remainder: String,
    /// Concatenated, labeled reasoning trace, if any block was found.
    pub trace: Option<String>,
}

/// Remove paired reasoning-delimiter blocks (`<plan>...</plan>` and
/// friends) and return the remainder plus one merged trace. Multiple blocks
/// of the same stage concatenate; stages merge in [`THINKING_STAGES`]
/// order regardless of their order in the text.
pub fn extract_thinking(raw: &str) -> Thinking {
    let mut remainder = raw.to_string();
    let mut sections: Vec<(usize, String)> = Vec::new();

    for (stage_index, stage) in THINKING_STAGES.iter().enumerate() {
        let open = format!("<{stage}>");
        let close = format!("</{stage}>");
        let mut collected = String::new();

        loop {
            let Some(start) = remainder.find(&open) else {
                break;
            };
            let Some(end_rel) = remainder[start + open.len()..].find(&close) else {
                break;
            };
            let content_start = start + open.len();
            let content_end = content_start + end_rel;
            if !collected.is_empty() {
                collected.push_str("\n\n");
            }
            collected.push_str(remainder[content_start..content_end].trim());
            remainder.replace_range(start..content_end + close.len(), "");
        }

        if !collected.is_empty() {
            sections.push((stage_index, collected));
        }
    }

    sections.sort_by_key(|(index, _)| *index);
    let trace = if sections.is_empty() {
        None
    } else {
        Some(
            sections
                .into_iter()
                .map(|(index, content)| format!("[{}]\n{content}", THINKING_STAGES[index]))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };

    Thinking {
        remainder: remainder.trim().to_string(),
        trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse_not_repaired() {
        let parsed = parse(r#"{"a": 1}"#).expect("parse");
        assert_eq!(parsed.value, json!({"a": 1}));
        assert!(!parsed.repaired);
        assert!(parsed.repair_note.is_none());
    }

    #[test]
    fn test_fenced_block_with_trailing_prose() {
        let raw = "```json\n{\"a\":1}\n```\nHope that helps!";
        let parsed = parse(raw).expect("parse");
        assert_eq!(parsed.value, json!({"a": 1}));
        assert!(parsed.repaired);
        assert!(parsed.repair_note.is_some());
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let raw = "Here is the result: {\"logs\": [], \"shortTerm\": \"met the {baker}\"} done.";
        let parsed = parse(raw).expect("parse");
        assert_eq!(parsed.value["shortTerm"], json!("met the {baker}"));
        assert!(parsed.repaired);
    }

    #[test]
    fn test_trailing_commas_repaired() {
        let raw = r#"{"logs": [{"sender": "Narrator", "text": "hi",},], "action_options": [],}"#;
        let parsed = parse(raw).expect("parse");
        assert!(parsed.repaired);
        assert_eq!(parsed.value["logs"][0]["text"], json!("hi"));
        assert!(parsed
            .repair_note
            .as_deref()
            .unwrap_or("")
            .contains("trailing commas"));
    }

    #[test]
    fn test_truncated_object_closed() {
        let raw = r#"{"logs": [{"sender": "Narrator", "text": "the door opens""#;
        let parsed = parse(raw).expect("parse");
        assert!(parsed.repaired);
        assert_eq!(parsed.value["logs"][0]["text"], json!("the door opens"));
    }

    #[test]
    fn test_hopeless_text_is_explicit_error() {
        assert!(matches!(parse("no json here at all"), Err(ParseError::Unparseable)));
        assert!(matches!(parse("[1, 2, 3]"), Err(ParseError::Unparseable)));
    }

    #[test]
    fn test_reply_contract_round_trip() {
        let raw = r#"{
            "logs": [{"sender": "Marla", "text": "Mind the step."}],
            "shortTerm": "Entered the granary",
            "tavern_commands": [{"verb": "set", "path": "character.location", "value": "Granary"}],
            "action_options": ["Ask about the grain", "Leave"]
        }"#;
        let parsed = parse(raw).expect("parse");
        let reply = ProviderReply::from_value(parsed.value).expect("contract");
        assert_eq!(reply.logs[0].sender, "Marla");
        assert_eq!(reply.short_term.as_deref(), Some("Entered the granary"));
        assert_eq!(reply.commands.len(), 1);
        assert_eq!(reply.action_options.len(), 2);
    }

    #[test]
    fn test_reply_defaults_for_missing_fields() {
        let reply = ProviderReply::from_value(json!({"logs": [{"text": "hello"}]}))
            .expect("contract");
        assert_eq!(reply.logs[0].sender, "Narrator");
        assert!(reply.commands.is_empty());
        assert!(reply.short_term.is_none());
    }

    #[test]
    fn test_extract_thinking_single_block() {
        let raw = "<thinking>weigh the options</thinking>{\"a\":1}";
        let thinking = extract_thinking(raw);
        assert_eq!(thinking.remainder, "{\"a\":1}");
        assert_eq!(thinking.trace.as_deref(), Some("[thinking]\nweigh the options"));
    }

    #[test]
    fn test_extract_thinking_merges_stages_in_fixed_order() {
        let raw = "<check>verify tone</check>body<plan>outline beats</plan>";
        let thinking = extract_thinking(raw);
        assert_eq!(thinking.remainder, "body");
        let trace = thinking.trace.expect("trace");
        let plan = trace.find("[plan]").expect("plan");
        let check = trace.find("[check]").expect("check");
        assert!(plan < check);
    }

    #[test]
    fn test_extract_thinking_no_blocks() {
        let thinking = extract_thinking("plain text");
        assert_eq!(thinking.remainder, "plain text");
        assert!(thinking.trace.is_none());
    }
}
