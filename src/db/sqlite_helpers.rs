//! SQLite helper utilities for type conversion
//!
//! SQLite has no native sets, enums or timestamps. This module converts between
//! the organizer's Rust types and the TEXT/INTEGER columns they are stored in.

use std::collections::BTreeSet;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};

// ============================================================================
// Set Helpers (stored as JSON arrays in SQLite)
// ============================================================================

/// Serialize a string set to a JSON array for SQLite storage
#[inline]
pub fn set_to_json(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize a JSON array from SQLite into a set (invalid JSON becomes empty)
#[inline]
pub fn json_to_set(s: &str) -> BTreeSet<String> {
    serde_json::from_str(s).unwrap_or_default()
}

// ============================================================================
// Timestamp Helpers (stored as RFC 3339 TEXT in SQLite)
// ============================================================================

/// Current UTC timestamp as a fixed-width RFC 3339 string.
///
/// Fixed microsecond precision keeps lexical order equal to chronological order,
/// which `ORDER BY updated_at` relies on.
#[inline]
pub fn now_iso8601() -> String {
    datetime_to_str(Utc::now())
}

/// Convert a chrono DateTime to a fixed-width RFC 3339 string
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 string (or SQLite's `datetime()` format) to DateTime
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
        })
}

// ============================================================================
// Integer Helpers
// ============================================================================

/// Convert an optional unsigned number to an SQLite integer
#[inline]
pub fn u32_to_int(v: Option<u32>) -> Option<i64> {
    v.map(i64::from)
}

/// Convert an optional SQLite integer back to an unsigned number.
/// Negative or oversized values are treated as missing.
#[inline]
pub fn int_to_u32(v: Option<i64>) -> Option<u32> {
    v.and_then(|i| u32::try_from(i).ok())
}

// ============================================================================
// Query Building Helpers
// ============================================================================

/// Escape `%`, `_` and `\` so user input is matched literally inside `LIKE ... ESCAPE '\'`
pub fn like_contains(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// `?, ?, ?` with `count` placeholders; `count == 0` yields `NULL` so `IN (NULL)` never matches
pub fn placeholders(count: usize) -> String {
    if count == 0 {
        return "NULL".to_string();
    }
    vec!["?"; count].join(", ")
}

/// Build a SQL fragment to check if any value from a list exists in a JSON array column
pub fn json_array_overlaps_sql(column: &str, placeholder_count: usize) -> String {
    if placeholder_count == 0 {
        return "1=0".to_string(); // Always false for empty list
    }

    format!(
        "EXISTS (SELECT 1 FROM json_each({}) WHERE value IN ({}))",
        column,
        placeholders(placeholder_count)
    )
}
