//! Typed field updates for devices and roles.
//!
//! Write requests arrive as a JSON object of field name to value. Each entry
//! is parsed into a [`DeviceField`] or [`RoleField`] before anything is
//! applied, so an unknown name or a bad value rejects the whole request.

use serde_json::{Map, Value};
use thiserror::Error;
use u2f_core::DeviceRecord;

use crate::roles::RoleRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("unknown field {0:?}")]
    Unknown(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl FieldError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Updatable device attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceField {
    /// Role whose grant a successful authentication receives
    RoleName(String),
}

impl DeviceField {
    pub fn parse(name: &str, value: &Value) -> Result<Self, FieldError> {
        match name {
            "role_name" | "role" => Ok(Self::RoleName(
                expect_str(name, value)?.trim().to_lowercase(),
            )),
            _ => Err(FieldError::Unknown(name.to_string())),
        }
    }

    pub fn apply(self, record: &mut DeviceRecord) {
        match self {
            Self::RoleName(role) => record.role_name = role,
        }
    }
}

/// Updatable role attributes.
///
/// The legacy names (`policies`, `ttl`, `max_ttl`) and the `token_` names
/// are accepted alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleField {
    Policies(Vec<String>),
    /// Seconds
    TokenTtl(u64),
    /// Seconds
    TokenMaxTtl(u64),
}

impl RoleField {
    pub fn parse(name: &str, value: &Value) -> Result<Self, FieldError> {
        match name {
            "policies" | "token_policies" => Ok(Self::Policies(parse_policies(name, value)?)),
            "ttl" | "token_ttl" => Ok(Self::TokenTtl(parse_duration_secs(name, value)?)),
            "max_ttl" | "token_max_ttl" => Ok(Self::TokenMaxTtl(parse_duration_secs(name, value)?)),
            _ => Err(FieldError::Unknown(name.to_string())),
        }
    }

    pub fn apply(self, role: &mut RoleRecord) {
        match self {
            Self::Policies(policies) => role.policies = policies,
            Self::TokenTtl(ttl) => role.token_ttl = ttl,
            Self::TokenMaxTtl(max_ttl) => role.token_max_ttl = max_ttl,
        }
    }
}

/// Parse every entry of a write request with `parse`.
pub fn parse_all<F>(
    fields: &Map<String, Value>,
    parse: impl Fn(&str, &Value) -> Result<F, FieldError>,
) -> Result<Vec<F>, FieldError> {
    fields
        .iter()
        .map(|(name, value)| parse(name, value))
        .collect()
}

/// Sort, de-duplicate and lower-case a policy list, dropping blanks.
pub fn normalize_policies<I, S>(policies: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = policies
        .into_iter()
        .map(|policy| policy.as_ref().trim().to_lowercase())
        .filter(|policy| !policy.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Whether two policy lists grant the same access. The implicit `default`
/// policy is ignored on both sides.
pub fn equivalent_policies(a: &[String], b: &[String]) -> bool {
    let strip = |policies: &[String]| {
        let mut normalized = normalize_policies(policies);
        normalized.retain(|policy| policy != "default");
        normalized
    };
    strip(a) == strip(b)
}

fn expect_str<'a>(field: &str, value: &'a Value) -> Result<&'a str, FieldError> {
    value
        .as_str()
        .ok_or_else(|| FieldError::invalid(field, "expected a string"))
}

/// Policies as a JSON array of strings or a comma-separated string.
fn parse_policies(field: &str, value: &Value) -> Result<Vec<String>, FieldError> {
    match value {
        Value::String(list) => Ok(normalize_policies(list.split(','))),
        Value::Array(items) => {
            let names = items
                .iter()
                .map(|item| expect_str(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(normalize_policies(names))
        }
        _ => Err(FieldError::invalid(field, "expected a list of policy names")),
    }
}

/// Durations as a JSON number of seconds or a string such as `"90"`,
/// `"90s"`, `"15m"` or `"2h"`.
fn parse_duration_secs(field: &str, value: &Value) -> Result<u64, FieldError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| FieldError::invalid(field, "expected a non-negative integer")),
        Value::String(text) => parse_duration_str(text.trim())
            .ok_or_else(|| FieldError::invalid(field, format!("cannot parse duration {text:?}"))),
        _ => Err(FieldError::invalid(field, "expected a duration")),
    }
}

fn parse_duration_str(text: &str) -> Option<u64> {
    if text.is_empty() {
        return Some(0);
    }
    let (digits, multiplier) = match text.char_indices().last()? {
        (i, 's') => (&text[..i], 1),
        (i, 'm') => (&text[..i], 60),
        (i, 'h') => (&text[..i], 3600),
        _ => (text, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
