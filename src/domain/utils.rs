//! Domain-specific shared validations, normalization and formatting utilities

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// Trims, drops blanks, deduplicates and sorts.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized = tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>();
    normalized.sort();
    normalized.dedup();
    normalized
}

pub fn trim_to_option(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn require_text(field: &'static str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(
            "missing_field",
            format!("{field} must not be empty"),
        ));
    }
    Ok(trimmed.to_string())
}

/// A non-blank replacement wins; absent or blank leaves the current value.
pub fn apply_text(current: &mut String, patch: Option<String>) {
    if let Some(value) = trim_to_option(patch) {
        *current = value;
    }
}

/// Absent leaves the field alone; `null` or blank clears it.
pub fn apply_nullable(current: &mut Option<String>, patch: Option<Option<String>>) {
    if let Some(value) = patch {
        *current = trim_to_option(value);
    }
}

pub fn apply_nullable_value<T>(current: &mut Option<T>, patch: Option<Option<T>>) {
    if let Some(value) = patch {
        *current = value;
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
/// Use with `#[serde(default, deserialize_with = "double_option")]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn validate_confidence(confidence: Option<f64>) -> Result<(), AppError> {
    match confidence {
        Some(value) if !(0.0..=1.0).contains(&value) => Err(AppError::bad_request(
            "invalid_confidence",
            "confidence must be between 0 and 1",
        )),
        _ => Ok(()),
    }
}

/// Rejects values outside `1..=max`; absent means `default`.
pub fn validate_limit(
    field: &'static str,
    value: Option<u32>,
    default: usize,
    max: usize,
) -> Result<usize, AppError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let value = value as usize;
    if value == 0 || value > max {
        return Err(AppError::bad_request(
            "invalid_limit",
            format!("{field} must be between 1 and {max}"),
        ));
    }
    Ok(value)
}

pub fn clamp_limit(value: Option<u32>, default: usize, max: usize) -> usize {
    value.map_or(default, |value| (value as usize).clamp(1, max))
}

pub fn parse_timestamp(field: &'static str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    DateTime::parse_from_rfc3339(value)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|_| {
            AppError::bad_request(
                "invalid_timestamp",
                format!("{field} must be an ISO 8601 date string"),
            )
        })
}

/// Opaque pagination position. `signature` ties a cursor to the filters that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

pub fn encode_cursor(payload: &CursorPayload) -> String {
    let json = serde_json::to_vec(payload).expect("cursor payload serialization");
    URL_SAFE_NO_PAD.encode(json)
}

/// `None` for anything that is not a cursor this server issued.
pub fn decode_cursor(cursor: &str) -> Option<CursorPayload> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor.trim().trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Offset to resume from: 0 unless the cursor is valid and its signature matches.
pub fn resume_offset(cursor: Option<&str>, signature: Option<&str>) -> usize {
    cursor
        .and_then(decode_cursor)
        .filter(|payload| payload.signature.as_deref() == signature)
        .map_or(0, |payload| payload.offset)
}
