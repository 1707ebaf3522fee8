//! Helper filters and functions for InitTemplates
//!
//! On top of minijinja's built-ins (`upper`, `lower`, `replace`, `join`,
//! `tojson`, ...) templates get:
//! - `default`: fallback for undefined or none values
//! - `required`: fail if a value is undefined or empty
//! - `base64_encode` / `base64_decode`
//! - `quote` / `squote`: wrap in double / single quotes
//! - `trim_prefix` / `trim_suffix`
//! - `indent` / `nindent`: indent every line (`nindent` adds a leading newline)
//! - `trunc`: keep the first (or, if negative, last) N characters
//! - `now()` and `date(format)`: timestamps, formatted with strftime syntax

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, Error, ErrorKind, Value};

/// Registers every helper on `env`.
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("default", default_filter);
    env.add_filter("required", required);
    env.add_filter("base64_encode", base64_encode);
    env.add_filter("base64_decode", base64_decode);
    env.add_filter("quote", quote);
    env.add_filter("squote", squote);
    env.add_filter("trim_prefix", trim_prefix);
    env.add_filter("trim_suffix", trim_suffix);
    env.add_filter("indent", indent);
    env.add_filter("nindent", nindent);
    env.add_filter("trunc", trunc);
    env.add_filter("date", date);
    env.add_function("now", now);
}

/// Usage: `{{ value | default("fallback") }}`
pub fn default_filter(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

/// Usage: `{{ value | required("value must be set") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let empty = value.is_undefined() || value.is_none() || value.as_str().is_some_and(str::is_empty);
    if empty {
        Err(Error::new(
            ErrorKind::UndefinedError,
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ))
    } else {
        Ok(value)
    }
}

/// Usage: `{{ value | base64_encode }}`
pub fn base64_encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Usage: `{{ value | base64_decode }}`
pub fn base64_decode(value: &str) -> Result<String, Error> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {e}")))?;

    String::from_utf8(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode produced invalid UTF-8: {e}"),
        )
    })
}

/// Usage: `{{ value | quote }}`; escapes like a JSON string.
pub fn quote(value: Value) -> Result<String, Error> {
    let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
    serde_json::to_string(&text).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Usage: `{{ value | squote }}`
pub fn squote(value: Value) -> String {
    let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
    format!("'{text}'")
}

/// Usage: `{{ value | trim_prefix("root:") }}`
pub fn trim_prefix(value: &str, prefix: &str) -> String {
    value.strip_prefix(prefix).unwrap_or(value).to_string()
}

/// Usage: `{{ value | trim_suffix(".yaml") }}`
pub fn trim_suffix(value: &str, suffix: &str) -> String {
    value.strip_suffix(suffix).unwrap_or(value).to_string()
}

/// Usage: `{{ value | indent(4) }}`; indents every line, including the first.
pub fn indent(value: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    value
        .split('\n')
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Usage: `{{ value | nindent(4) }}`; like `indent`, starting on a new line.
pub fn nindent(value: &str, width: usize) -> String {
    format!("\n{}", indent(value, width))
}

/// Usage: `{{ value | trunc(8) }}` or `{{ value | trunc(-8) }}`
pub fn trunc(value: &str, length: i64) -> String {
    let count = value.chars().count();
    let keep = usize::try_from(length.unsigned_abs()).unwrap_or(usize::MAX);

    if length >= 0 {
        value.chars().take(keep).collect()
    } else {
        value.chars().skip(count.saturating_sub(keep)).collect()
    }
}

/// Usage: `{{ now() }}`; the current time as RFC 3339.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Usage: `{{ now() | date("%Y-%m-%d") }}`
///
/// Accepts RFC 3339 strings and unix timestamps in seconds.
pub fn date(value: Value, format: &str) -> Result<String, Error> {
    let timestamp: DateTime<Utc> = if let Some(text) = value.as_str() {
        DateTime::parse_from_rfc3339(text)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid timestamp {text:?}: {e}")))?
            .with_timezone(&Utc)
    } else if let Some(seconds) = value.as_i64() {
        DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, format!("timestamp {seconds} out of range")))?
    } else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot format {value} as a date"),
        ));
    };

    let mut formatted = String::new();
    std::fmt::Write::write_fmt(&mut formatted, format_args!("{}", timestamp.format(format)))
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, format!("invalid date format {format:?}")))?;
    Ok(formatted)
}
