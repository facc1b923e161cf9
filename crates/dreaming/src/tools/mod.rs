//! Stage toolsets.
//!
//! Each stage exposes its tools as a [`rv_providers::ToolDispatcher`]
//! over an interior-mutable context. Handlers never fail across the
//! tool boundary: problems come back as `{"error": "..."}` documents
//! the agent can observe and recover from.

pub mod compare;
pub mod detect;
pub mod resolve;

use serde_json::Value;

/// Error-shaped tool response.
pub(crate) fn err_response(message: impl Into<String>) -> String {
    serde_json::json!({ "error": message.into() }).to_string()
}

pub(crate) fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub(crate) fn arg_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Char-safe truncation returning the (possibly shortened) text and
/// whether it was cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    if s.chars().count() <= max {
        (s.to_string(), false)
    } else {
        (s.chars().take(max).collect(), true)
    }
}

/// ASCII-case-insensitive substring search over chars. Returns the
/// char index of the first match.
pub(crate) fn find_ci(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w.iter().zip(needle).all(|(a, b)| a.eq_ignore_ascii_case(b)))
}

pub(crate) fn count_ci(haystack: &[char], needle: &[char]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack
        .windows(needle.len())
        .filter(|w| w.iter().zip(needle).all(|(a, b)| a.eq_ignore_ascii_case(b)))
        .count()
}
