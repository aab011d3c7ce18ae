//! Helpers for validating the opaque request parameter object.

use serde_json::{Map, Value};

use crate::adapter::ProviderError;

fn invalid(message: impl Into<String>) -> ProviderError {
    ProviderError::InvalidParams(message.into())
}

/// The params must be a JSON object.
pub(crate) fn object(params: &Value) -> Result<&Map<String, Value>, ProviderError> {
    params
        .as_object()
        .ok_or_else(|| invalid("request parameters must be a JSON object"))
}

/// A required, non-blank string no longer than `max_chars`.
pub(crate) fn required_str<'a>(
    map: &'a Map<String, Value>,
    field: &str,
    max_chars: usize,
) -> Result<&'a str, ProviderError> {
    optional_str(map, field, max_chars)?.ok_or_else(|| invalid(format!("{field} is required")))
}

/// An optional string; present values must be non-blank and within `max_chars`.
pub(crate) fn optional_str<'a>(
    map: &'a Map<String, Value>,
    field: &str,
    max_chars: usize,
) -> Result<Option<&'a str>, ProviderError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(invalid(format!("{field} must not be blank")))
        }
        Some(Value::String(s)) if s.chars().count() > max_chars => Err(invalid(format!(
            "{field} must be at most {max_chars} characters"
        ))),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(format!("{field} must be a string"))),
    }
}

/// An optional string restricted to `allowed`.
pub(crate) fn optional_choice<'a>(
    map: &'a Map<String, Value>,
    field: &str,
    allowed: &[&str],
) -> Result<Option<&'a str>, ProviderError> {
    match optional_str(map, field, 64)? {
        Some(v) if !allowed.contains(&v) => Err(invalid(format!(
            "{field} must be one of: {}",
            allowed.join(", ")
        ))),
        other => Ok(other),
    }
}

/// An optional integer within `min..=max`.
pub(crate) fn optional_int(
    map: &Map<String, Value>,
    field: &str,
    min: i64,
    max: i64,
) -> Result<Option<i64>, ProviderError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if (min..=max).contains(&n) => Ok(Some(n)),
            _ => Err(invalid(format!(
                "{field} must be an integer between {min} and {max}"
            ))),
        },
    }
}

/// An optional number within `min..=max`.
pub(crate) fn optional_number(
    map: &Map<String, Value>,
    field: &str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, ProviderError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n >= min && n <= max => Ok(Some(n)),
            _ => Err(invalid(format!(
                "{field} must be a number between {min} and {max}"
            ))),
        },
    }
}

/// An optional boolean.
pub(crate) fn optional_bool(
    map: &Map<String, Value>,
    field: &str,
) -> Result<Option<bool>, ProviderError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(invalid(format!("{field} must be a boolean"))),
    }
}

/// An optional http(s) URL.
pub(crate) fn optional_url<'a>(
    map: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, ProviderError> {
    match optional_str(map, field, 2048)? {
        Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
            Err(invalid(format!("{field} must be an http(s) URL")))
        }
        other => Ok(other),
    }
}
