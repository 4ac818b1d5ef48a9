// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `events.jsonl` entry shape.
//!
//! Metrics events carry arbitrary numeric/string fields, including
//! `NaN`/`Inf`, which standard JSON cannot represent. Runicorn stores
//! them as emitted using a sentinel encoding
//! (`{"__runicorn_float__": "nan" | "inf" | "-inf"}`) and normalizes
//! them to `null` only when read back for tabular display.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Metrics,
    Image,
}

const FLOAT_SENTINEL_KEY: &str = "__runicorn_float__";

/// Encode a single `f64` for storage, using the sentinel object for
/// non-finite values and a plain JSON number otherwise.
pub fn encode_float(v: f64) -> Value {
    if v.is_nan() {
        sentinel("nan")
    } else if v.is_infinite() && v > 0.0 {
        sentinel("inf")
    } else if v.is_infinite() {
        sentinel("-inf")
    } else {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or_else(|| sentinel("nan"))
    }
}

fn sentinel(tag: &str) -> Value {
    let mut m = Map::new();
    m.insert(FLOAT_SENTINEL_KEY.to_string(), Value::String(tag.to_string()));
    Value::Object(m)
}

fn is_sentinel(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.contains_key(FLOAT_SENTINEL_KEY) && m.len() == 1)
}

/// Walk a decoded event's `data` payload and replace every non-finite
/// float sentinel with JSON `null`, per the read-path invariant in
/// the write-path contract and §8 ("Boundary behavior").
pub fn normalize_for_read(value: &mut Value) {
    if is_sentinel(value) {
        *value = Value::Null;
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                normalize_for_read(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                normalize_for_read(v);
            }
        }
        _ => {}
    }
}

/// Parse one `events.jsonl` line. Partial/invalid lines are dropped per
/// the file-format invariant in the write-path contract: "partial lines are
/// dropped on parse".
pub fn parse_event_line(line: &str) -> Option<RunEvent> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_float_roundtrips_finite_values() {
        let v = encode_float(0.5);
        assert_eq!(v, serde_json::json!(0.5));
    }

    #[test]
    fn encode_float_sentinels_nan_and_inf() {
        assert!(is_sentinel(&encode_float(f64::NAN)));
        assert!(is_sentinel(&encode_float(f64::INFINITY)));
        assert!(is_sentinel(&encode_float(f64::NEG_INFINITY)));
    }

    #[test]
    fn normalize_for_read_turns_sentinel_into_null() {
        let mut data = serde_json::json!({"loss": encode_float(f64::NAN), "acc": 0.9});
        normalize_for_read(&mut data);
        assert_eq!(data["loss"], Value::Null);
        assert_eq!(data["acc"], serde_json::json!(0.9));
    }

    #[test]
    fn parse_event_line_drops_malformed_lines() {
        assert!(parse_event_line("{not json").is_none());
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line(r#"{"ts":"2026-01-01T00:00:00Z","type":"metrics","data":{}}"#)
            .is_some());
    }

    #[test]
    fn parse_event_line_drops_truncated_trailing_line() {
        // Simulates a writer crash mid-append: a partial final line.
        assert!(parse_event_line(r#"{"ts":"2026-01-01T00:00:00Z","type":"met"#).is_none());
    }
}
