use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single key/value attribute attached to a metric point. Kept as a list
/// rather than a map so serialized output stays deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dimension {
    pub key: String,
    pub value: String,
}

/// One observed metric value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub key: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub timestamp: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<Dimension>,
}

/// Sorts and normalizes metric points for deterministic output: evidence
/// deduped and sorted, dimensions canonicalized, then a stable total order
/// over (key, dimensions, source, unit, timestamp, value).
pub fn canonicalize_points(points: Vec<MetricPoint>) -> Vec<MetricPoint> {
    let mut normalized: Vec<MetricPoint> = points
        .into_iter()
        .map(|mut point| {
            point.evidence = canonicalize_strings(point.evidence);
            point.dimensions = canonicalize_dimensions(point.dimensions);
            point
        })
        .collect();

    normalized.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| dimensions_key(&a.dimensions).cmp(&dimensions_key(&b.dimensions)))
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.unit.cmp(&b.unit))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal))
    });

    normalized
}

fn canonicalize_strings(values: Vec<String>) -> Vec<String> {
    let unique: BTreeSet<String> = values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    unique.into_iter().collect()
}

/// Sorts dimensions and drops empty or duplicate entries.
pub fn canonicalize_dimensions(dimensions: Vec<Dimension>) -> Vec<Dimension> {
    let unique: BTreeSet<Dimension> = dimensions
        .into_iter()
        .map(|dim| Dimension {
            key: dim.key.trim().to_string(),
            value: dim.value.trim().to_string(),
        })
        .filter(|dim| !dim.key.is_empty() && !dim.value.is_empty())
        .collect();
    unique.into_iter().collect()
}

fn dimensions_key(dimensions: &[Dimension]) -> String {
    dimensions
        .iter()
        .map(|dim| format!("{}={}", dim.key, dim.value))
        .collect::<Vec<_>>()
        .join(";")
}

/// Timestamp attached to snapshot points for a given as-of date: the UTC
/// midnight of that day, RFC 3339.
pub fn as_of_timestamp(as_of: DateTime<Utc>) -> String {
    crate::shared::timefmt::format_utc_seconds(truncate_to_day(as_of))
}

pub fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    crate::shared::timefmt::align_down(ts, 86_400)
}

pub fn as_of_date_string(as_of: DateTime<Utc>) -> String {
    as_of.format("%Y-%m-%d").to_string()
}
