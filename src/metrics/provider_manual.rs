use super::collect::Provider;
use super::types::{
    as_of_timestamp, canonicalize_dimensions, truncate_to_day, Dimension, MetricPoint,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Hand-maintained metrics from `metrics/manual.yml`. The file holds either
/// a `metrics:` list or a top-level list; a missing file contributes
/// nothing.
#[derive(Debug, Clone)]
pub struct ManualProvider {
    pub path: PathBuf,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ManualFile {
    metrics: Vec<ManualMetric>,
}

#[derive(Debug, Deserialize)]
struct ManualMetric {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    dimensions: BTreeMap<String, String>,
}

impl Provider for ManualProvider {
    fn name(&self) -> &str {
        "manual"
    }

    fn collect(&self) -> Result<Vec<MetricPoint>, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(format!("read manual metrics: {err}")),
        };

        if let Ok(file) = serde_yaml::from_str::<ManualFile>(&raw) {
            return Ok(self.points_from(file.metrics));
        }
        if let Ok(list) = serde_yaml::from_str::<Vec<ManualMetric>>(&raw) {
            return Ok(self.points_from(list));
        }
        Err("manual metrics file must contain `metrics:` list or a top-level list".to_string())
    }
}

impl ManualProvider {
    fn points_from(&self, metrics: Vec<ManualMetric>) -> Vec<MetricPoint> {
        let ts = as_of_timestamp(truncate_to_day(self.as_of));
        metrics
            .into_iter()
            .filter(|metric| !metric.key.is_empty())
            .map(|metric| {
                let dimensions = canonicalize_dimensions(
                    metric
                        .dimensions
                        .into_iter()
                        .map(|(key, value)| Dimension { key, value })
                        .collect(),
                );
                MetricPoint {
                    key: metric.key,
                    value: metric.value,
                    unit: metric.unit,
                    timestamp: ts.clone(),
                    source: self.name().to_string(),
                    evidence: metric.evidence,
                    dimensions,
                }
            })
            .collect()
    }
}
