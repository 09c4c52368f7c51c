use super::types::{canonicalize_points, MetricPoint};
use crate::shared::fs_atomic::atomic_write_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub schema_version: u32,
    pub as_of: String,
    pub points: Vec<MetricPoint>,
}

pub fn write_snapshot(path: &Path, mut snapshot: Snapshot) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("snapshot path is required".to_string());
    }
    if snapshot.as_of.is_empty() {
        return Err("snapshot as_of is required".to_string());
    }
    snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION;
    snapshot.points = canonicalize_points(snapshot.points);

    let mut body = serde_json::to_vec_pretty(&snapshot)
        .map_err(|err| format!("marshal snapshot: {err}"))?;
    body.push(b'\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| format!("ensure snapshot dir: {err}"))?;
    }
    atomic_write_file(path, &body).map_err(|err| format!("write snapshot: {err}"))
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, String> {
    let data = fs::read(path).map_err(|err| format!("read snapshot: {err}"))?;
    let mut snapshot: Snapshot =
        serde_json::from_slice(&data).map_err(|err| format!("decode snapshot: {err}"))?;
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(format!(
            "unsupported snapshot schema_version {}",
            snapshot.schema_version
        ));
    }
    if snapshot.as_of.is_empty() {
        return Err("snapshot missing as_of".to_string());
    }
    snapshot.points = canonicalize_points(snapshot.points);
    Ok(snapshot)
}

pub fn snapshot_path_for_date(dir: &Path, as_of: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}.json", super::types::as_of_date_string(as_of)))
}

/// The newest snapshot in a directory. `YYYY-MM-DD.json` names compare
/// lexicographically in chronological order.
pub fn latest_snapshot_path(dir: &Path) -> Result<PathBuf, String> {
    let entries = fs::read_dir(dir).map_err(|err| format!("read snapshots dir: {err}"))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| format!("read snapshots dir: {err}"))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| format!("no snapshots found in {}", dir.display()))
}
