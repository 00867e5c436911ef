//! Flattening of nested JSON payloads into single-level records.
//!
//! Keys are the path of the leaf joined with `_`; array elements use their
//! zero-based index as the path segment. Iteration follows the object's
//! insertion order (`serde_json` is built with `preserve_order`).

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::{Map, Value};

use crate::errors::AppError;

pub const KEY_SEPARATOR: char = '_';

/// Flattens `value` into a single-level map.
///
/// When two distinct paths join to the same key (`{"a_b": 1, "a": {"b": 2}}`)
/// the leaf visited last wins.
pub fn flatten_json(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, join(&prefix, key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, join(&prefix, &index.to_string()), out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", prefix, KEY_SEPARATOR, segment)
    }
}

/// Formats epoch milliseconds as `%Y-%m-%d %H:%M:%S` in `tz`.
pub fn epoch_millis_to_datetime_string<Tz>(millis: i64, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Epoch milliseconds as a naive timestamp in the server's local timezone.
pub fn epoch_millis_to_naive_local(millis: i64) -> Result<NaiveDateTime, AppError> {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).naive_local())
        .ok_or_else(|| {
            AppError::MalformedPayload(format!("timestamp {} out of range", millis))
        })
}

/// Epoch seconds as a naive timestamp in the server's local timezone.
pub fn epoch_seconds_to_naive_local(seconds: i64) -> Result<NaiveDateTime, AppError> {
    DateTime::from_timestamp(seconds, 0)
        .map(|utc| utc.with_timezone(&Local).naive_local())
        .ok_or_else(|| {
            AppError::MalformedPayload(format!("timestamp {} out of range", seconds))
        })
}
