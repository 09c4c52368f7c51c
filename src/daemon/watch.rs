use crate::daemon::store::Store;
use crate::daemon::{JOB_KR_MEASURE, JOB_PLAN_EXECUTE, JOB_PLAN_GENERATE};
use crate::shared::hash::hash_file;
use crate::shared::timefmt::format_utc_seconds;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const WATCH_OKRS_KEY: &str = "watch_okrs_dir_state";
const WATCH_MANUAL_KEY: &str = "watch_manual_yml_state";
const WATCH_PLANS_KEY: &str = "watch_plans_dir_state";

const TRACKED_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Per-file state persisted in the KV between ticks. The decision to report
/// a change is hash-driven; mod_time is recorded for inspection only, so a
/// touch without a content change stays silent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchState {
    pub path: String,
    pub mod_time: String,
    pub content_hash: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Added,
    Modified,
    Deleted,
}

/// A single observed change, surfaced as a typed event rather than an
/// encoded path string so downstream handlers can tell deletions apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

/// Runs one watch pass over the configured workspace locations and folds
/// detected changes into follow-up jobs. Per-resource failures are
/// collected so the remaining resources still get processed; the tick as a
/// whole fails only if every resource failed.
pub fn run_watch_tick(
    store: &Store,
    workspace: &Workspace,
    now: DateTime<Utc>,
) -> Result<serde_json::Value, String> {
    let mut changes: Vec<String> = Vec::new();
    let mut resource_errors: Vec<String> = Vec::new();

    // Watch 1: authored OKR documents. Any event re-measures and replans.
    match watch_directory(store, &workspace.okrs_dir, WATCH_OKRS_KEY, now) {
        Ok(events) if !events.is_empty() => {
            changes.push(format!("okrs: {} files changed", events.len()));
            let payload = serde_json::json!({
                "trigger": "okrs_changed",
                "changes": events,
            });
            enqueue_followup(store, JOB_KR_MEASURE, now, &payload)?;
            enqueue_followup(store, JOB_PLAN_GENERATE, now, &payload)?;
        }
        Ok(_) => {}
        Err(err) => resource_errors.push(format!("watch okrs dir: {err}")),
    }

    // Watch 2: the manual metrics file.
    match watch_file(store, &workspace.manual_metrics_path(), WATCH_MANUAL_KEY, now) {
        Ok(Some(event)) => {
            changes.push("manual.yml changed".to_string());
            let payload = serde_json::json!({
                "trigger": "manual_yml_changed",
                "changes": [event],
            });
            enqueue_followup(store, JOB_KR_MEASURE, now, &payload)?;
        }
        Ok(None) => {}
        Err(err) => resource_errors.push(format!("watch manual.yml: {err}")),
    }

    // Watch 3: generated plans. Only files named plan.json trigger
    // execution, and deletions never do.
    match watch_directory(store, &workspace.plans_dir(), WATCH_PLANS_KEY, now) {
        Ok(events) if !events.is_empty() => {
            changes.push(format!("plans: {} files changed", events.len()));
            for event in &events {
                if event.kind == WatchKind::Deleted {
                    continue;
                }
                let is_plan = Path::new(&event.path)
                    .file_name()
                    .is_some_and(|name| name == "plan.json");
                if !is_plan {
                    continue;
                }
                let payload = serde_json::json!({
                    "trigger": "new_plan_generated",
                    "plan_path": event.path,
                });
                enqueue_followup(store, JOB_PLAN_EXECUTE, now, &payload)?;
            }
        }
        Ok(_) => {}
        Err(err) => resource_errors.push(format!("watch plans dir: {err}")),
    }

    if changes.is_empty() && resource_errors.len() == 3 {
        return Err(resource_errors.join("; "));
    }

    let mut result = serde_json::json!({
        "checked_at": format_utc_seconds(now),
        "changes_count": changes.len(),
        "changes_detail": changes,
        "status": if changes.is_empty() { "no_changes" } else { "changes_detected" },
    });
    if !resource_errors.is_empty() {
        result["resource_errors"] = serde_json::json!(resource_errors);
    }
    Ok(result)
}

fn enqueue_followup(
    store: &Store,
    job_type: &str,
    now: DateTime<Utc>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    store
        .enqueue_unique(job_type, now, payload)
        .map(|_| ())
        .map_err(|err| format!("enqueue {job_type}: {err}"))
}

/// Checks a single file against its stored state. Returns the observed
/// event, if any, and persists the new state. A file that never existed
/// produces nothing and writes nothing.
pub fn watch_file(
    store: &Store,
    path: &Path,
    kv_key: &str,
    now: DateTime<Utc>,
) -> Result<Option<WatchEvent>, String> {
    let prior = load_file_state(store, kv_key)?;

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return match prior {
                None => Ok(None),
                Some(_) => {
                    store
                        .set_kv(kv_key, "")
                        .map_err(|err| format!("clear watch state: {err}"))?;
                    Ok(Some(WatchEvent {
                        path: path.display().to_string(),
                        kind: WatchKind::Deleted,
                    }))
                }
            };
        }
        Err(err) => return Err(format!("stat {}: {err}", path.display())),
    };

    let content_hash = hash_file(path).map_err(|err| format!("hash {}: {err}", path.display()))?;
    let state = WatchState {
        path: path.display().to_string(),
        mod_time: mod_time_string(&metadata),
        content_hash: content_hash.clone(),
        last_seen: format_utc_seconds(now),
    };
    let encoded = serde_json::to_string(&state)
        .map_err(|err| format!("encode watch state: {err}"))?;
    store
        .set_kv(kv_key, &encoded)
        .map_err(|err| format!("save watch state: {err}"))?;

    match prior {
        None => Ok(Some(WatchEvent {
            path: state.path,
            kind: WatchKind::Added,
        })),
        Some(previous) if previous.content_hash != content_hash => Ok(Some(WatchEvent {
            path: state.path,
            kind: WatchKind::Modified,
        })),
        Some(_) => Ok(None),
    }
}

/// Walks a directory subtree, compares the tracked-extension file map
/// against the stored map, and persists the new map wholesale.
pub fn watch_directory(
    store: &Store,
    dir: &Path,
    kv_key: &str,
    now: DateTime<Utc>,
) -> Result<Vec<WatchEvent>, String> {
    let mut current: BTreeMap<String, WatchState> = BTreeMap::new();
    collect_tracked_files(dir, now, &mut current)?;

    let previous = load_dir_state(store, kv_key)?;

    let mut events = Vec::new();
    for (path, state) in &current {
        match previous.get(path) {
            None => events.push(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Added,
            }),
            Some(prior) if prior.content_hash != state.content_hash => events.push(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Modified,
            }),
            Some(_) => {}
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            events.push(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Deleted,
            });
        }
    }

    let encoded = serde_json::to_string(&current)
        .map_err(|err| format!("encode watch state: {err}"))?;
    store
        .set_kv(kv_key, &encoded)
        .map_err(|err| format!("save watch state: {err}"))?;

    Ok(events)
}

fn collect_tracked_files(
    dir: &Path,
    now: DateTime<Utc>,
    out: &mut BTreeMap<String, WatchState>,
) -> Result<(), String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(format!("read {}: {err}", dir.display())),
    };

    for entry in entries {
        let entry = entry.map_err(|err| format!("read {}: {err}", dir.display()))?;
        let path: PathBuf = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| format!("stat {}: {err}", path.display()))?;
        if file_type.is_dir() {
            collect_tracked_files(&path, now, out)?;
            continue;
        }
        if !has_tracked_extension(&path) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| format!("stat {}: {err}", path.display()))?;
        let content_hash =
            hash_file(&path).map_err(|err| format!("hash {}: {err}", path.display()))?;
        out.insert(
            path.display().to_string(),
            WatchState {
                path: path.display().to_string(),
                mod_time: mod_time_string(&metadata),
                content_hash,
                last_seen: format_utc_seconds(now),
            },
        );
    }
    Ok(())
}

fn has_tracked_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TRACKED_EXTENSIONS.contains(&ext))
}

fn load_file_state(store: &Store, kv_key: &str) -> Result<Option<WatchState>, String> {
    let raw = store
        .get_kv(kv_key)
        .map_err(|err| format!("get watch state: {err}"))?;
    match raw {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => serde_json::from_str(&value)
            .map(Some)
            .map_err(|err| format!("parse watch state: {err}")),
    }
}

fn load_dir_state(store: &Store, kv_key: &str) -> Result<BTreeMap<String, WatchState>, String> {
    let raw = store
        .get_kv(kv_key)
        .map_err(|err| format!("get watch state: {err}"))?;
    match raw {
        None => Ok(BTreeMap::new()),
        Some(value) if value.is_empty() => Ok(BTreeMap::new()),
        Some(value) => serde_json::from_str(&value)
            .map_err(|err| format!("parse watch state: {err}")),
    }
}

fn mod_time_string(metadata: &fs::Metadata) -> String {
    metadata
        .modified()
        .ok()
        .map(|mtime| format_utc_seconds(DateTime::<Utc>::from(mtime)))
        .unwrap_or_default()
}
