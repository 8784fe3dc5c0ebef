//! Helpers for reading loosely typed JSON embedded in pages and APIs

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern is valid"));

/// Removes trailing commas before `}` and `]` so JS object literals parse as JSON
pub fn strip_trailing_commas(raw: &str) -> Cow<'_, str> {
    TRAILING_COMMA.replace_all(raw, "$1")
}

/// Parses the first capture of `pattern` in `body` as a JSON object
pub fn capture_json(pattern: &Regex, body: &str) -> Option<Value> {
    let raw = pattern.captures(body)?.get(1)?.as_str();
    serde_json::from_str(&strip_trailing_commas(raw)).ok()
}

/// Follows a path of object keys
pub fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |v, key| v.get(key))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// First non-blank value among `keys`
pub fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| value.get(k))
        .find(|v| !is_blank(v))
}

/// Reads a value as text; numbers and booleans are rendered
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads a value as a float, accepting numeric strings with thousands separators
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads a value as an integer, truncating fractions
pub fn as_i64(value: &Value) -> Option<i64> {
    as_f64(value).filter(|f| f.is_finite()).map(|f| f as i64)
}

/// Reads a value as a boolean, accepting 0/1 and yes/no spellings
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "y" => Some(true),
            "false" | "no" | "0" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn text_at(value: &Value, keys: &[&str]) -> Option<String> {
    pick(value, keys).and_then(as_text)
}

pub fn i64_at(value: &Value, keys: &[&str]) -> Option<i64> {
    pick(value, keys).and_then(as_i64)
}

pub fn f64_at(value: &Value, keys: &[&str]) -> Option<f64> {
    pick(value, keys).and_then(as_f64)
}

pub fn bool_at(value: &Value, keys: &[&str]) -> Option<bool> {
    pick(value, keys).and_then(as_bool)
}

/// Parses a door count such as `"4"` or the range `"2-3"` (upper bound wins)
pub fn door_count(raw: &str) -> Option<i64> {
    if raw.contains('-') {
        raw.split('-')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .max()
    } else {
        raw.trim().parse().ok()
    }
}

/// Parses a timestamp given as unix seconds, RFC 3339 or a plain date/time
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn parse_date_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
