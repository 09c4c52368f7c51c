use super::collect::Provider;
use super::types::{as_of_timestamp, truncate_to_day, MetricPoint};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

/// Numeric fields of `metrics/ci_report.json`, prefixed with `ci.`. The
/// report either holds a top-level `metrics` object or is itself the
/// metrics object. A missing report contributes nothing.
#[derive(Debug, Clone)]
pub struct CiProvider {
    pub report_path: PathBuf,
    pub as_of: DateTime<Utc>,
}

impl Provider for CiProvider {
    fn name(&self) -> &str {
        "ci"
    }

    fn collect(&self) -> Result<Vec<MetricPoint>, String> {
        let data = match fs::read(&self.report_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(format!("read ci report: {err}")),
        };

        let raw: Value =
            serde_json::from_slice(&data).map_err(|err| format!("parse ci report: {err}"))?;
        let metrics = match &raw {
            Value::Object(object) => match object.get("metrics") {
                Some(Value::Object(inner)) => inner.clone(),
                _ => object.clone(),
            },
            _ => return Err("ci report must be a JSON object".to_string()),
        };

        let ts = as_of_timestamp(truncate_to_day(self.as_of));
        let mut keys: Vec<&String> = metrics
            .iter()
            .filter(|(_, value)| value.is_number())
            .map(|(key, _)| key)
            .collect();
        keys.sort();

        let mut points = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = metrics.get(key).and_then(Value::as_f64) else {
                continue;
            };
            points.push(MetricPoint {
                key: format!("ci.{key}"),
                value,
                unit: infer_ci_unit(key).to_string(),
                timestamp: ts.clone(),
                source: self.name().to_string(),
                evidence: Vec::new(),
                dimensions: Vec::new(),
            });
        }
        Ok(points)
    }
}

fn infer_ci_unit(key: &str) -> &'static str {
    match key {
        "pass_rate_30d" | "success_rate_30d" => "ratio",
        _ => "",
    }
}
