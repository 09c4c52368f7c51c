use super::snapshot::Snapshot;
use super::types::MetricPoint;
use crate::okr::{OkrStore, Scope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const KR_SCORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KrScore {
    pub scope: String,
    pub objective_id: String,
    pub objective: String,
    pub kr_id: String,
    pub description: String,
    pub metric_key: String,
    pub baseline: f64,
    pub target: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub percent_to_target: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KrScoreReport {
    pub schema_version: u32,
    pub as_of: String,
    pub snapshot_path: String,
    pub results: Vec<KrScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_metric_keys: Vec<String>,
}

/// Computes a deterministic percent-to-target for every key result against
/// the snapshot's metric values. Dimensioned points are skipped: the KR
/// schema maps one KR to one flat metric key. Duplicate flat keys across
/// sources are an error rather than an arbitrary pick.
pub fn score_key_results(
    store: &OkrStore,
    snapshot: &Snapshot,
    snapshot_path: &Path,
) -> Result<KrScoreReport, String> {
    let mut metric_values: BTreeMap<&str, &MetricPoint> = BTreeMap::new();
    for point in &snapshot.points {
        if point.key.is_empty() || !point.dimensions.is_empty() {
            continue;
        }
        if let Some(existing) = metric_values.get(point.key.as_str()) {
            return Err(format!(
                "duplicate metric key \"{}\" from sources \"{}\" and \"{}\"",
                point.key, existing.source, point.source
            ));
        }
        metric_values.insert(&point.key, point);
    }

    let mut results = Vec::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for scope in [Scope::Org, Scope::Team, Scope::Person] {
        for doc in store.documents(scope) {
            for objective in &doc.objectives {
                for kr in &objective.key_results {
                    let mut score = KrScore {
                        scope: scope.as_str().to_string(),
                        objective_id: objective.id.clone(),
                        objective: objective.objective.clone(),
                        kr_id: kr.id.clone(),
                        description: kr.description.clone(),
                        metric_key: kr.metric_key.clone(),
                        baseline: kr.baseline,
                        target: kr.target,
                        current: None,
                        unit: String::new(),
                        percent_to_target: 0.0,
                    };
                    match metric_values.get(kr.metric_key.as_str()) {
                        Some(point) => {
                            score.current = Some(point.value);
                            score.unit = point.unit.clone();
                            score.percent_to_target =
                                percent_to_target(kr.baseline, kr.target, point.value);
                        }
                        None => {
                            if !kr.metric_key.is_empty() {
                                missing.insert(kr.metric_key.clone());
                            }
                        }
                    }
                    results.push(score);
                }
            }
        }
    }

    results.sort_by(|a, b| {
        a.scope
            .cmp(&b.scope)
            .then_with(|| a.objective_id.cmp(&b.objective_id))
            .then_with(|| a.kr_id.cmp(&b.kr_id))
    });

    Ok(KrScoreReport {
        schema_version: KR_SCORE_SCHEMA_VERSION,
        as_of: snapshot.as_of.clone(),
        snapshot_path: snapshot_path.display().to_string(),
        results,
        missing_metric_keys: missing.into_iter().collect(),
    })
}

/// Progress from baseline toward target, clamped to [0, 100]. A baseline
/// equal to the target scores 100 only once the current value reaches it.
pub fn percent_to_target(baseline: f64, target: f64, current: f64) -> f64 {
    if baseline == target {
        return if current >= target { 100.0 } else { 0.0 };
    }

    let progress = if target > baseline {
        (current - baseline) / (target - baseline)
    } else {
        (baseline - current) / (baseline - target)
    };

    if progress.is_nan() || progress.is_infinite() {
        return 0.0;
    }
    (progress.clamp(0.0, 1.0)) * 100.0
}
