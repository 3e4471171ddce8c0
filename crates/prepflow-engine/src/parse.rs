//! Best-effort structured extraction from reasoning backend output
//!
//! The backend returns free text that is expected to contain JSON,
//! optionally wrapped in a fenced code block. Both analysis call sites
//! (completeness judgement and follow-up generation) share this helper;
//! callers supply their own fallback for the `None` case.

use serde_json::Value;

/// Extract a JSON value from free text
///
/// Strips code fences, attempts a direct parse, then falls back to the
/// outermost brace- or bracket-delimited substring. Returns `None` when
/// nothing parses.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = strip_fences(text.trim());

    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(candidate) = delimited_substring(stripped, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line ("json", "JSON", or empty).
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.trim().strip_suffix("```").unwrap_or(body).trim()
}

fn delimited_substring(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
