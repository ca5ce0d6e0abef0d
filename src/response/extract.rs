//! Locating JSON inside free-form model output.
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Regions worth scanning, most specific first: fenced code blocks, then the
/// whole response.
pub(super) fn candidate_regions(text: &str) -> Vec<&str> {
    let mut regions = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        // Skip a language identifier such as `json`.
        let body_start = match after_fence.find('\n') {
            Some(i) if after_fence[..i].trim().chars().all(char::is_alphanumeric) => i + 1,
            _ => 0,
        };
        let body = &after_fence[body_start..];
        match body.find("```") {
            Some(end) => {
                let block = body[..end].trim();
                if !block.is_empty() {
                    regions.push(block);
                }
                rest = &body[end + 3..];
            }
            None => {
                // Unterminated fence: the model was cut off mid-block.
                let block = body.trim();
                if !block.is_empty() {
                    regions.push(block);
                }
                break;
            }
        }
    }
    regions.push(text.trim());
    regions
}

/// Every JSON value that starts with `open` and parses, scanning left to
/// right without overlap.
pub(super) fn values_starting_with(text: &str, open: char) -> Vec<Value> {
    let mut values = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find(open) {
        let start = pos + offset;
        match parse_at(text, start) {
            Some((value, end)) => {
                values.push(value);
                pos = end;
            }
            None => pos = start + open.len_utf8(),
        }
    }
    values
}

fn parse_at(text: &str, start: usize) -> Option<(Value, usize)> {
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, start + stream.byte_offset())),
        _ => None,
    }
}

/// Fix mistakes models make often enough to matter: trailing commas and
/// typographic quotes.
pub(super) fn repair_json(text: &str) -> Option<String> {
    static TRAILING_COMMA: OnceLock<Option<Regex>> = OnceLock::new();
    let trailing = TRAILING_COMMA
        .get_or_init(|| Regex::new(r",(\s*[}\]])").ok())
        .as_ref()?;
    let repaired = trailing
        .replace_all(text, "$1")
        .replace(['\u{201c}', '\u{201d}'], "\"");
    (repaired != text).then_some(repaired)
}
