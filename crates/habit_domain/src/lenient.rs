//! Forgiving decoders for stored documents.
//!
//! Documents arrive from a store that other clients write to, so every field
//! is coerced instead of validated: numbers may be strings or `null`, maps may
//! be missing, dates may be empty. Anything unreadable becomes the neutral
//! default for the field.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::item::{LevelStrategy, ProgressMap, TierProgress};

/// Parse-or-zero coercion of a single JSON value.
pub fn coerce_number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn coerce_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(_) => coerce_number(value) != 0.0,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn coerce_date(value: &Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn coerce_progress(value: &Value) -> ProgressMap {
    let Value::Object(entries) = value else {
        return ProgressMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, raw)| {
            let date = NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()?;
            Some((date, coerce_number(raw)))
        })
        .collect()
}

pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_number).unwrap_or(0.0))
}

/// Non-negative integer (counts, indices, versions).
pub fn count<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let n = number(deserializer)?;
    Ok(if n > 0.0 { n.floor() as usize } else { 0 })
}

pub fn version<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = number(deserializer)?;
    Ok(if n > 0.0 { n.floor() as u64 } else { 0 })
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_flag).unwrap_or(false))
}

pub fn date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_date))
}

pub fn progress<'de, D>(deserializer: D) -> Result<ProgressMap, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_progress).unwrap_or_default())
}

pub fn tiers<'de, D>(deserializer: D) -> Result<TierProgress, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(entries)) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .iter()
        .filter_map(|(key, raw)| {
            let tier = key.trim().parse::<usize>().ok()?;
            Some((tier, coerce_progress(raw)))
        })
        .collect())
}

pub fn ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .iter()
        .filter_map(|entry| entry.as_str().map(str::to_string))
        .collect())
}

pub fn strategy<'de, D>(deserializer: D) -> Result<LevelStrategy, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .map(LevelStrategy::from_name)
        .unwrap_or_default())
}
