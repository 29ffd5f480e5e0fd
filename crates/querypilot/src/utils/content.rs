use std::borrow::Cow;

use serde_json::Value;

const PRIORITY_ERROR_KEYS: &[&str] = &["error", "message", "msg", "detail", "reason"];

const NON_MESSAGE_KEYS: &[&str] = &[
    "code",
    "status",
    "status_code",
    "execution_time_ms",
    "timestamp",
    "request_id",
    "trace_id",
];

/// Human-readable error text from a backend response payload.
///
/// JSON bodies are searched for the usual error keys first; anything else falls back to
/// the raw body text.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => extract_text(&value).or_else(|| non_empty_text(Cow::Borrowed(trimmed))),
        Err(_) => non_empty_text(Cow::Borrowed(trimmed)),
    }
}

#[must_use]
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty_text(Cow::Borrowed(text)),
        Value::Array(items) => {
            let fragments: Vec<String> = items.iter().filter_map(extract_text).collect();
            join_fragments(&fragments)
        }
        Value::Object(map) => {
            for key in PRIORITY_ERROR_KEYS {
                if let Some(value) = map.get(*key)
                    && let Some(text) = extract_text(value)
                {
                    return Some(text);
                }
            }

            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();

            let fragments: Vec<String> = keys
                .into_iter()
                .filter(|key| !NON_MESSAGE_KEYS.contains(key))
                .filter_map(|key| map.get(key))
                .filter_map(extract_text)
                .collect();

            join_fragments(&fragments)
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => None,
    }
}

#[must_use]
pub fn derive_excerpt(text: &str, max_chars: usize) -> Option<String> {
    if max_chars == 0 {
        return None;
    }

    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return None;
    }

    let char_count = normalized.chars().count();
    if char_count <= max_chars {
        return Some(normalized);
    }

    let mut excerpt = String::with_capacity(max_chars + 3);
    for ch in normalized.chars().take(max_chars) {
        excerpt.push(ch);
    }
    excerpt.push_str("...");
    Some(excerpt)
}

fn non_empty_text(value: Cow<'_, str>) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn join_fragments(fragments: &[String]) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }

    Some(fragments.join("; "))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
