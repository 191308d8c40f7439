//! Result protocol: marker-delimited answer extraction from program output.
//!
//! A generated program reports its answer by printing a begin-marker line,
//! the payload, and an end-marker line:
//!
//! ```text
//! loading data.csv ...            <- free-form debug output is ignored
//! __QUIZ_RESULT_START__
//! {"total": 60}
//! __QUIZ_RESULT_END__
//! ```
//!
//! Programs frequently print intermediate results with the same markers
//! while exploring the data, so the last complete pair is authoritative.
//! A begin marker that is never closed is ignored. The payload is parsed as
//! JSON; when that fails the raw text becomes a string answer.

use serde_json::Value;

/// Line that opens a result payload.
pub const RESULT_BEGIN: &str = "__QUIZ_RESULT_START__";
/// Line that closes a result payload.
pub const RESULT_END: &str = "__QUIZ_RESULT_END__";

/// A payload extracted from the last complete marker pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    /// Parsed value (JSON when possible, otherwise the raw text as a string).
    pub value: Value,
    /// Payload text exactly as found between the markers (trimmed).
    pub raw: String,
    /// Whether `raw` parsed as JSON.
    pub structured: bool,
}

/// Return the payload text of the last complete marker pair, if any.
pub fn extract_last_payload(stdout: &str) -> Option<String> {
    let mut last: Option<String> = None;
    let mut open: Option<Vec<&str>> = None;

    for line in stdout.lines() {
        let marker = line.trim();
        if marker == RESULT_BEGIN {
            // A second begin before an end restarts the payload.
            open = Some(Vec::new());
        } else if marker == RESULT_END {
            if let Some(lines) = open.take() {
                last = Some(lines.join("\n").trim().to_string());
            }
        } else if let Some(lines) = open.as_mut() {
            lines.push(line);
        }
    }

    last
}

/// Parse a payload: JSON first, raw string fallback.
pub fn parse_payload(raw: &str) -> ParsedResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => ParsedResult {
            value,
            raw: raw.to_string(),
            structured: true,
        },
        Err(_) => ParsedResult {
            value: Value::String(raw.to_string()),
            raw: raw.to_string(),
            structured: false,
        },
    }
}

/// Extract and parse the authoritative result from captured stdout.
pub fn parse_output(stdout: &str) -> Option<ParsedResult> {
    extract_last_payload(stdout).map(|raw| parse_payload(&raw))
}

/// Render a payload between markers, as a program is expected to print it.
pub fn render(payload: &str) -> String {
    format!("{RESULT_BEGIN}\n{payload}\n{RESULT_END}\n")
}
