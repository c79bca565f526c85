//! Lenient field readers over untrusted worker JSON.
//!
//! Workers are loosely typed: numbers arrive as strings, booleans as `0`/`1`.
//! These helpers coerce the common shapes and return `None` for anything else,
//! leaving the required/optional decision to each capability.

use serde_json::{Map, Value};

use crate::sanitize;

use super::ResponseError;

pub(crate) type Object = Map<String, Value>;

/// The decoded body as an object, or an invalid-response error.
pub(crate) fn root(body: &Value) -> Result<&Object, ResponseError> {
    body.as_object()
        .ok_or_else(|| ResponseError::Invalid("response body is not a JSON object".into()))
}

/// Sanitized single-line text. Numbers are rendered; empty results are `None`.
pub(crate) fn text(obj: &Object, key: &str) -> Option<String> {
    let raw = match obj.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let clean = sanitize::text(&raw);
    (!clean.is_empty()).then_some(clean)
}

/// Like [`text`] but empty or absent values become `""`.
pub(crate) fn text_or_empty(obj: &Object, key: &str) -> String {
    text(obj, key).unwrap_or_default()
}

/// Sanitized multi-line text.
pub(crate) fn textarea(obj: &Object, key: &str) -> Option<String> {
    let clean = sanitize::textarea(obj.get(key)?.as_str()?);
    (!clean.is_empty()).then_some(clean)
}

/// Integer coercion: integral numbers, floats (truncated) and numeric strings.
pub(crate) fn int(obj: &Object, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(crate) fn float(obj: &Object, key: &str) -> Option<f64> {
    let value = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|f| f.is_finite())
}

pub(crate) fn boolean(obj: &Object, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn array<'a>(obj: &'a Object, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key)?.as_array()
}

pub(crate) fn object<'a>(obj: &'a Object, key: &str) -> Option<&'a Object> {
    obj.get(key)?.as_object()
}

/// Sanitized, non-empty string elements of an array. Other elements are dropped.
pub(crate) fn text_list(obj: &Object, key: &str) -> Vec<String> {
    array(obj, key)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(sanitize::text)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
