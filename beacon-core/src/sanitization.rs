//! Payload sanitization
//!
//! Every payload attached to a record passes through [`PayloadSanitizer`]
//! before the record is built. The sanitizer bounds the payload (string
//! length, nesting depth) and masks credentials. It never fails: anything it
//! cannot represent is replaced by a marker string.

use crate::config::SanitizationConfig;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

/// Appended to strings cut at `max_string_length`
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Replaces values nested deeper than `max_depth`
pub const DEPTH_EXCEEDED_MARKER: &str = "[max depth exceeded]";

/// Replaces payloads that fail to serialize
pub const UNSERIALIZABLE_MARKER: &str = "[unserializable payload]";

static PASSWORD_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static TOKEN_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static BEARER_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static API_KEY_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

// Each pattern captures (name, separator, value); the value is replaced.
fn password_regex() -> Option<&'static Regex> {
    PASSWORD_REGEX
        .get_or_init(|| {
            Regex::new(
                r#"(?i)\b([a-z_]*(?:password|passwd|pwd|secret))(\s*[=:]\s*)["'`]?([^'"`\s,}&]+)"#,
            )
            .ok()
        })
        .as_ref()
}

fn token_regex() -> Option<&'static Regex> {
    TOKEN_REGEX
        .get_or_init(|| {
            Regex::new(r#"(?i)\b([a-z_]*token)(\s*[=:]\s*)["']?([a-zA-Z0-9._\-]+)"#).ok()
        })
        .as_ref()
}

fn bearer_regex() -> Option<&'static Regex> {
    BEARER_REGEX
        .get_or_init(|| Regex::new(r#"(?i)\b(bearer)(\s+)([a-zA-Z0-9._\-]+)"#).ok())
        .as_ref()
}

fn api_key_regex() -> Option<&'static Regex> {
    API_KEY_REGEX
        .get_or_init(|| {
            Regex::new(r#"(?i)\b(api[_-]?key)(\s*[=:]\s*)["']?([a-zA-Z0-9._\-]+)"#).ok()
        })
        .as_ref()
}

/// Bounds and redacts payloads and message text
#[derive(Debug, Clone)]
pub struct PayloadSanitizer {
    config: SanitizationConfig,
}

impl PayloadSanitizer {
    pub fn new(config: SanitizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SanitizationConfig {
        &self.config
    }

    /// Serialize and sanitize an arbitrary payload
    pub fn sanitize_serializable<P: Serialize + ?Sized>(&self, payload: &P) -> Value {
        match serde_json::to_value(payload) {
            Ok(value) => self.sanitize_value(&value),
            Err(e) => {
                tracing::debug!(error = %e, "Payload serialization failed");
                Value::String(UNSERIALIZABLE_MARKER.to_string())
            }
        }
    }

    /// Sanitize an already structured payload
    pub fn sanitize_value(&self, value: &Value) -> Value {
        self.sanitize_at_depth(value, 0)
    }

    fn sanitize_at_depth(&self, value: &Value, depth: usize) -> Value {
        match value {
            Value::Object(map) => {
                if depth >= self.config.max_depth {
                    return Value::String(DEPTH_EXCEEDED_MARKER.to_string());
                }
                let mut sanitized = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    let val = if self.config.redact_sensitive && is_sensitive_field(key) {
                        Value::String(self.config.replacement.clone())
                    } else {
                        self.sanitize_at_depth(val, depth + 1)
                    };
                    sanitized.insert(key.clone(), val);
                }
                Value::Object(sanitized)
            }
            Value::Array(items) => {
                if depth >= self.config.max_depth {
                    return Value::String(DEPTH_EXCEEDED_MARKER.to_string());
                }
                Value::Array(
                    items
                        .iter()
                        .map(|v| self.sanitize_at_depth(v, depth + 1))
                        .collect(),
                )
            }
            Value::String(s) => Value::String(self.sanitize_text(s)),
            other => other.clone(),
        }
    }

    /// Mask credentials in free text and bound its length
    pub fn sanitize_text(&self, text: &str) -> String {
        let redacted = if self.config.redact_sensitive {
            self.redact(text)
        } else {
            text.to_string()
        };
        truncate(&redacted, self.config.max_string_length)
    }

    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for regex in [
            password_regex(),
            token_regex(),
            bearer_regex(),
            api_key_regex(),
        ]
            .into_iter()
            .flatten()
        {
            if regex.is_match(&out) {
                out = regex
                    .replace_all(&out, |caps: &regex::Captures| {
                        format!("{}{}{}", &caps[1], &caps[2], self.config.replacement)
                    })
                    .into_owned();
            }
        }
        out
    }
}

impl Default for PayloadSanitizer {
    fn default() -> Self {
        Self::new(SanitizationConfig::default())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Check if a field name indicates sensitive data
fn is_sensitive_field(field_name: &str) -> bool {
    let lower = field_name.to_lowercase();
    if matches!(
        lower.as_str(),
        "pass" | "pwd" | "key" | "auth" | "bearer" | "authorization"
    ) {
        return true;
    }

    lower.contains("password")
        || lower.contains("passwd")
        || lower.contains("token")
        || lower.contains("secret")
        || lower.contains("api_key")
        || lower.contains("apikey")
        || lower.contains("credential")
        || lower.contains("private_key")
}

#[cfg(test)]
#[path = "sanitization_tests.rs"]
mod sanitization_tests;
