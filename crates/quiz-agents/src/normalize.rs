//! Typing of answer text and executed result values.
//!
//! Order: number, boolean, JSON, plain string. Text that looks structured
//! but does not parse, and empty text, are `Unparsed`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Number, Value};

use crate::task::AnswerForm;

/// A fenced reply: the whole text is one code block.
static WHOLE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[^\n`]*\n(.*?)\n?```$").unwrap());

static ANSWER_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\**\s*(?:final\s+answer|answer)\s*\**\s*[:\-]\s*\**").unwrap()
});

static THOUSANDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: Value,
    pub form: AnswerForm,
}

impl Normalized {
    fn new(value: Value, form: AnswerForm) -> Self {
        Self { value, form }
    }
}

/// Type a free-text direct answer.
pub fn normalize_text(raw: &str) -> Normalized {
    let text = clean(raw);
    if text.is_empty() {
        return Normalized::new(Value::String(String::new()), AnswerForm::Unparsed);
    }

    if let Some(number) = parse_number(&text) {
        return Normalized::new(Value::Number(number), AnswerForm::Number);
    }
    if let Some(flag) = parse_bool(&text) {
        return Normalized::new(Value::Bool(flag), AnswerForm::Boolean);
    }
    if text.starts_with(['{', '[', '"']) {
        return match serde_json::from_str::<Value>(&text) {
            // A quoted reply: type the inner text again.
            Ok(Value::String(inner)) => normalize_text(&inner),
            Ok(value) => Normalized::new(value, AnswerForm::Json),
            Err(_) if text.starts_with('"') => {
                Normalized::new(Value::String(text), AnswerForm::Text)
            }
            Err(_) => Normalized::new(Value::String(text), AnswerForm::Unparsed),
        };
    }
    Normalized::new(Value::String(text), AnswerForm::Text)
}

/// Type a value captured from an executed program.
///
/// Strings are re-typed (`"60"` becomes `60`); a string that cannot be typed
/// stays as-is.
pub fn normalize_value(value: Value) -> Normalized {
    match value {
        Value::String(s) => {
            let normalized = normalize_text(&s);
            if normalized.form == AnswerForm::Unparsed {
                Normalized::new(Value::String(s), AnswerForm::Text)
            } else {
                normalized
            }
        }
        Value::Number(_) => Normalized::new(value, AnswerForm::Number),
        Value::Bool(_) => Normalized::new(value, AnswerForm::Boolean),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Normalized::new(value, AnswerForm::Json)
        }
    }
}

fn clean(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(caps) = WHOLE_FENCE.captures(text) {
        if let Some(inner) = caps.get(1) {
            text = inner.as_str().trim();
        }
    }
    if let Some(m) = ANSWER_LABEL.find(text) {
        text = text[m.end()..].trim();
    }
    text.trim_end_matches("**").trim().to_string()
}

fn parse_number(text: &str) -> Option<Number> {
    let candidate = text.strip_suffix('.').unwrap_or(text);
    let compact = if THOUSANDS.is_match(candidate) {
        candidate.replace(',', "")
    } else {
        candidate.replace('_', "")
    };
    let numeric_start = |c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.');
    if compact.is_empty() || !compact.starts_with(numeric_start) {
        return None;
    }
    if let Ok(int) = compact.parse::<i64>() {
        return Some(Number::from(int));
    }
    compact
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().trim_end_matches('.') {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn typed(raw: &str) -> (Value, AnswerForm) {
        let n = normalize_text(raw);
        (n.value, n.form)
    }

    #[test]
    fn numbers_first() {
        assert_eq!(typed("51"), (json!(51), AnswerForm::Number));
        assert_eq!(typed(" -3.5 "), (json!(-3.5), AnswerForm::Number));
        assert_eq!(typed("1,234,567"), (json!(1234567), AnswerForm::Number));
        assert_eq!(typed("1_000"), (json!(1000), AnswerForm::Number));
        assert_eq!(typed("51."), (json!(51), AnswerForm::Number));
    }

    #[test]
    fn labels_and_fences_are_stripped() {
        assert_eq!(typed("FINAL ANSWER: 51"), (json!(51), AnswerForm::Number));
        assert_eq!(typed("**Answer:** 60"), (json!(60), AnswerForm::Number));
        assert_eq!(typed("```\n{\"a\": 1}\n```"), (json!({"a": 1}), AnswerForm::Json));
    }

    #[test]
    fn booleans_after_numbers() {
        assert_eq!(typed("True"), (json!(true), AnswerForm::Boolean));
        assert_eq!(typed("no"), (json!(false), AnswerForm::Boolean));
    }

    #[test]
    fn json_then_string() {
        assert_eq!(typed("[1, 2, 3]"), (json!([1, 2, 3]), AnswerForm::Json));
        assert_eq!(typed("\"Paris\""), (json!("Paris"), AnswerForm::Text));
        assert_eq!(typed("\"42\""), (json!(42), AnswerForm::Number));
        assert_eq!(typed("Paris"), (json!("Paris"), AnswerForm::Text));
    }

    #[test]
    fn not_a_number_words_stay_text() {
        assert_eq!(typed("inf"), (json!("inf"), AnswerForm::Text));
        assert_eq!(typed("NaN"), (json!("NaN"), AnswerForm::Text));
        assert_eq!(typed("12 apples"), (json!("12 apples"), AnswerForm::Text));
    }

    #[test]
    fn broken_structure_and_empty_are_unparsed() {
        assert_eq!(typed("{not json"), (json!("{not json"), AnswerForm::Unparsed));
        assert_eq!(typed("   "), (json!(""), AnswerForm::Unparsed));
    }

    #[test]
    fn executed_values_keep_json_types() {
        assert_eq!(normalize_value(json!(60)).form, AnswerForm::Number);
        assert_eq!(normalize_value(json!({"k": 1})).form, AnswerForm::Json);
        assert_eq!(normalize_value(Value::Null).form, AnswerForm::Json);
    }

    #[test]
    fn executed_strings_are_retyped() {
        assert_eq!(normalize_value(json!("60")).value, json!(60));
        assert_eq!(normalize_value(json!("false")).value, json!(false));
        let n = normalize_value(json!("{partial"));
        assert_eq!(n, Normalized::new(json!("{partial"), AnswerForm::Text));
    }
}
