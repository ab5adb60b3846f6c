//! Instruction parsing: pull one JSON document out of free-form oracle text.
//!
//! The oracle is asked for bare JSON but routinely wraps it in prose or code
//! fences, uses single quotes, or leaves trailing commas. Parsing is therefore
//! lenient and total: every entry point returns an empty/`None` value instead
//! of an error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::step::Step;

/// Classified instruction document.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionDocument {
    /// `{"steps": [...]}`.
    Steps(Vec<Step>),
    /// `{"actions": [...]}` in the IDE vocabulary, already translated to steps.
    Actions(Vec<Step>),
    /// Free-form routing object (`agent` / `complexity` / `instructions`).
    TaskAnalysis(Map<String, Value>),
}

impl InstructionDocument {
    /// Steps carried by the document. Task analyses carry none.
    pub fn into_steps(self) -> Vec<Step> {
        match self {
            InstructionDocument::Steps(steps) | InstructionDocument::Actions(steps) => steps,
            InstructionDocument::TaskAnalysis(_) => Vec::new(),
        }
    }
}

/// Greedy match from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract and decode the JSON object embedded in `text`.
///
/// Tries a strict parse first, then exactly one repaired parse.
pub fn parse_json_object(text: &str) -> Option<Value> {
    let raw = extract_json_object(text)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => return Some(value),
        Err(err) => debug!(err = %err, "strict json parse failed, repairing"),
    }
    let repaired = repair_json(raw);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            warn!("oracle json required textual repair");
            Some(value)
        }
        Err(err) => {
            warn!(err = %err, "oracle json unparseable after repair");
            None
        }
    }
}

/// Classify a decoded object into one of the three document shapes.
pub fn classify(value: Value) -> Option<InstructionDocument> {
    let Value::Object(fields) = value else {
        return None;
    };

    if let Some(Value::Array(items)) = fields.get("steps") {
        let missing = items
            .iter()
            .filter(|item| item.get("action").is_none())
            .count();
        if missing > 0 {
            warn!(missing, "steps without an `action` field");
        }
        return Some(InstructionDocument::Steps(
            items.iter().map(Step::from_value).collect(),
        ));
    }

    if let Some(Value::Array(items)) = fields.get("actions") {
        return Some(InstructionDocument::Actions(
            items.iter().map(Step::from_ide_action).collect(),
        ));
    }

    if ["agent", "complexity", "instructions"]
        .iter()
        .any(|key| fields.contains_key(*key))
    {
        return Some(InstructionDocument::TaskAnalysis(fields));
    }

    None
}

/// Parse oracle text into a classified document.
pub fn parse(text: &str) -> Option<InstructionDocument> {
    parse_json_object(text).and_then(classify)
}

/// Parse oracle text into steps. An empty result means "no instructions".
pub fn parse_steps(text: &str) -> Vec<Step> {
    parse(text)
        .map(InstructionDocument::into_steps)
        .unwrap_or_default()
}

/// Return the body of the first fenced code block, or the whole text.
pub fn extract_code_block(text: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:[\w+-]+)?\n(.*?)\n```").expect("fence regex should be valid")
    });
    match FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => text.to_string(),
    }
}

/// Bounded textual repairs for near-JSON.
///
/// - single-quoted strings become double-quoted (inner `"` escaped)
/// - trailing commas before `}` / `]` are dropped
/// - raw newlines and tabs inside strings are escaped
///
/// Content of well-formed double-quoted strings is left untouched.
pub fn repair_json(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    i += 1;
                    match ch {
                        '\\' => {
                            out.push('\\');
                            if i < chars.len() {
                                out.push(chars[i]);
                                i += 1;
                            }
                        }
                        '"' => {
                            out.push('"');
                            break;
                        }
                        other => push_escaped(&mut out, other),
                    }
                }
            }
            '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    i += 1;
                    match ch {
                        '\\' if i < chars.len() => {
                            let next = chars[i];
                            i += 1;
                            if next == '\'' {
                                out.push('\'');
                            } else {
                                out.push('\\');
                                out.push(next);
                            }
                        }
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => push_escaped(&mut out, other),
                    }
                }
                out.push('"');
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    out
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        other => out.push(other),
    }
}
