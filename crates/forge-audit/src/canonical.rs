//! Canonical JSON serialization for consistent hashing.
//!
//! The canonical form is part of the external contract: any producer in any
//! language must be able to reproduce the exact bytes fed to SHA-256.
//!
//! Rules:
//! - Object keys sorted ascending by Unicode code point
//! - No insignificant whitespace; compact separators
//! - Integral floats emitted without a decimal point; other floats trimmed
//!   of trailing zeros and dot
//! - Timestamps emitted as ISO-8601 strings in UTC (see
//!   [`canonical_timestamp`])
//! - Nested objects/arrays normalized recursively

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Serialize a JSON value into its canonical string form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Canonical timestamp encoding: microsecond precision, `+00:00` offset.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            // Integral value: no decimal point
            out.push_str(&format!("{}", f as i64));
        } else {
            let formatted = format!("{f:.10}");
            let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
            out.push_str(trimmed);
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            // Non-ASCII stays as UTF-8, not \u escapes
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_and_compact() {
        let value = json!({"zulu": 1, "alpha": 2, "mike": 3});
        assert_eq!(canonical_json(&value), r#"{"alpha":2,"mike":3,"zulu":1}"#);
    }

    #[test]
    fn test_nested_normalization() {
        let value = json!({"outer": {"b": [1, {"y": 2, "x": 1}], "a": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"outer":{"a":null,"b":[1,{"x":1,"y":2}]}}"#
        );
    }

    #[test]
    fn test_integral_float_has_no_decimal_point() {
        let value = json!({"v": 3.0});
        assert_eq!(canonical_json(&value), r#"{"v":3}"#);
    }

    #[test]
    fn test_float_trailing_zeros_trimmed() {
        let value = json!({"v": 0.5});
        assert_eq!(canonical_json(&value), r#"{"v":0.5}"#);
        let value = json!({"v": 1.25});
        assert_eq!(canonical_json(&value), r#"{"v":1.25}"#);
    }

    #[test]
    fn test_integers_unchanged() {
        let value = json!({"neg": -7, "pos": 42});
        assert_eq!(canonical_json(&value), r#"{"neg":-7,"pos":42}"#);
    }

    #[test]
    fn test_string_escapes() {
        let value = json!({"s": "a\"b\\c\nd"});
        assert_eq!(canonical_json(&value), r#"{"s":"a\"b\\c\nd"}"#);
    }

    #[test]
    fn test_unicode_not_escaped() {
        let value = json!({"s": "çelik"});
        assert_eq!(canonical_json(&value), r#"{"s":"çelik"}"#);
    }

    #[test]
    fn test_round_trip_stability() {
        // Canonicalizing, parsing and re-canonicalizing must be a fixpoint.
        let value = json!({
            "b": [1.0, 2.5, {"k": "v"}],
            "a": {"nested": true},
            "t": "2025-01-01T00:00:00.000000+00:00"
        });
        let first = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(canonical_json(&reparsed), first);
    }

    #[test]
    fn test_canonical_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap();
        assert_eq!(canonical_timestamp(ts), "2025-06-01T12:30:45.000000+00:00");
    }
}
