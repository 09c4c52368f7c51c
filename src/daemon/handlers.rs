use crate::adapters::exec::resolve_adapter;
use crate::audit::AuditLog;
use crate::config::Settings;
use crate::daemon::store::{Job, Store};
use crate::daemon::watch::run_watch_tick;
use crate::metrics::{
    collect_all, snapshot_path_for_date, write_snapshot, CiProvider, GitProvider, ManualProvider,
    Provider, Snapshot,
};
use crate::notify::{format_plan_complete, Notifier};
use crate::planner::{generate_plan, run_plan, GenerateOptions, RunOptions};
use crate::workspace::Workspace;
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Capabilities handed to every job handler. Handlers are plain functions
/// over `(context, workspace, job)`; cancellation travels as a stop flag
/// the handler may consult around long suspensions.
pub struct HandlerContext<'a> {
    pub store: &'a Store,
    pub audit: &'a AuditLog,
    pub notifier: &'a Notifier,
    pub settings: &'a Settings,
    pub stop: &'a AtomicBool,
}

pub type HandlerFunc =
    fn(&HandlerContext<'_>, &Workspace, &Job) -> Result<Value, String>;

/// The built-in handler table. Callers may register additional job types
/// on the daemon before running it.
pub fn default_handlers() -> BTreeMap<String, HandlerFunc> {
    BTreeMap::from([
        (super::JOB_KR_MEASURE.to_string(), handle_kr_measure as HandlerFunc),
        (super::JOB_PLAN_GENERATE.to_string(), handle_plan_generate as HandlerFunc),
        (super::JOB_PLAN_EXECUTE.to_string(), handle_plan_execute as HandlerFunc),
        (super::JOB_WATCH_TICK.to_string(), handle_watch_tick as HandlerFunc),
    ])
}

fn parse_payload<T: Default + for<'de> Deserialize<'de>>(job: &Job) -> Result<T, String> {
    let raw = job.payload_json.trim();
    if raw.is_empty() || raw == "{}" || raw == "null" {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|err| format!("parse payload: {err}"))
}

fn parse_as_of(raw: &str) -> Result<chrono::DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| format!("parse as_of: {err}"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("parse as_of: invalid date {raw}"))
}

#[derive(Debug, Default, Deserialize)]
struct KrMeasurePayload {
    #[serde(default)]
    as_of: String,
    #[serde(default)]
    repo_dir: String,
    #[serde(default)]
    metrics_dir: String,
}

/// Collects metric points from every provider and writes a dated snapshot
/// under `metrics/snapshots/`.
fn handle_kr_measure(
    _ctx: &HandlerContext<'_>,
    workspace: &Workspace,
    job: &Job,
) -> Result<Value, String> {
    let payload: KrMeasurePayload = parse_payload(job)?;

    let as_of = if payload.as_of.is_empty() {
        crate::metrics::types::truncate_to_day(Utc::now())
    } else {
        parse_as_of(&payload.as_of)?
    };
    let repo_dir = if payload.repo_dir.is_empty() {
        workspace.root.clone()
    } else {
        PathBuf::from(&payload.repo_dir)
    };
    let metrics_dir = if payload.metrics_dir.is_empty() {
        workspace.metrics_dir.clone()
    } else {
        PathBuf::from(&payload.metrics_dir)
    };

    let git = GitProvider {
        repo_dir,
        as_of,
    };
    let ci = CiProvider {
        report_path: metrics_dir.join("ci_report.json"),
        as_of,
    };
    let manual = ManualProvider {
        path: metrics_dir.join("manual.yml"),
        as_of,
    };
    let providers: [&dyn Provider; 3] = [&git, &ci, &manual];
    let points = collect_all(&providers).map_err(|err| format!("collect metrics: {err}"))?;

    let snapshots_dir = metrics_dir.join("snapshots");
    let snapshot_path = snapshot_path_for_date(&snapshots_dir, as_of);
    let metric_count = points.len();
    write_snapshot(
        &snapshot_path,
        Snapshot {
            schema_version: crate::metrics::snapshot::SNAPSHOT_SCHEMA_VERSION,
            as_of: crate::metrics::types::as_of_date_string(as_of),
            points,
        },
    )
    .map_err(|err| format!("write snapshot: {err}"))?;

    Ok(json!({
        "snapshot_path": snapshot_path.display().to_string(),
        "metric_count": metric_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct PlanGeneratePayload {
    #[serde(default)]
    as_of: String,
    #[serde(default)]
    objective_id: String,
    #[serde(default)]
    kr_id: String,
    #[serde(default)]
    agent_role: String,
}

fn handle_plan_generate(
    _ctx: &HandlerContext<'_>,
    workspace: &Workspace,
    job: &Job,
) -> Result<Value, String> {
    let payload: PlanGeneratePayload = parse_payload(job)?;

    let as_of = if payload.as_of.is_empty() {
        None
    } else {
        Some(parse_as_of(&payload.as_of)?)
    };
    let result = generate_plan(GenerateOptions {
        okrs_dir: workspace.okrs_dir.clone(),
        output_base_dir: workspace.plans_dir(),
        as_of,
        objective_id: none_if_empty(payload.objective_id),
        kr_id: none_if_empty(payload.kr_id),
        agent_role: none_if_empty(payload.agent_role),
    })
    .map_err(|err| format!("generate plan: {err}"))?;

    Ok(json!({
        "plan_path": result.plan_path.display().to_string(),
        "plan_date": result.plan.as_of,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct PlanExecutePayload {
    #[serde(default)]
    adapter: String,
    #[serde(default)]
    timeout_seconds: u64,
    #[serde(default)]
    plan_path: String,
}

/// Runs the referenced plan (or the most recent one) through the
/// configured agent adapter, then notifies about the outcome.
fn handle_plan_execute(
    ctx: &HandlerContext<'_>,
    workspace: &Workspace,
    job: &Job,
) -> Result<Value, String> {
    let payload: PlanExecutePayload = parse_payload(job)?;

    let adapter_name = if payload.adapter.is_empty() {
        ctx.settings.adapter.name.clone()
    } else {
        payload.adapter
    };
    let adapter = resolve_adapter(
        &adapter_name,
        ctx.settings.adapter.command.as_deref(),
        &ctx.settings.adapter.args,
    )?;

    let timeout_seconds = if payload.timeout_seconds > 0 {
        payload.timeout_seconds
    } else {
        ctx.settings.adapter.timeout_seconds
    };
    let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));

    let plan_path = if payload.plan_path.is_empty() {
        find_most_recent_plan(&workspace.plans_dir())?
    } else {
        let raw = PathBuf::from(&payload.plan_path);
        if raw.is_absolute() {
            raw
        } else {
            workspace.root.join(raw)
        }
    };

    let result = run_plan(RunOptions {
        plan_path,
        workdir: workspace.root.clone(),
        adapter: adapter.as_ref(),
        timeout,
        run_base_dir: workspace.runs_dir(),
        audit: ctx.audit,
        store: Some(ctx.store),
    })
    .map_err(|err| format!("run plan: {err}"))?;

    let items_total = result.plan.items.len();
    let items_succeeded = result.item_runs.len();
    let items_failed = items_total - items_succeeded;

    let kr_id = result
        .plan
        .items
        .first()
        .map(|item| item.kr_id.as_str())
        .unwrap_or("plan");
    let (title, message) =
        format_plan_complete(kr_id, items_total, items_succeeded, items_failed);
    let _ = ctx.notifier.send(&title, &message);

    Ok(json!({
        "run_id": result.run_id,
        "run_dir": result.run_dir.display().to_string(),
        "items_total": items_total,
        "items_succeeded": items_succeeded,
        "items_failed": items_failed,
    }))
}

fn handle_watch_tick(
    ctx: &HandlerContext<'_>,
    workspace: &Workspace,
    _job: &Job,
) -> Result<Value, String> {
    run_watch_tick(ctx.store, workspace, Utc::now())
}

/// The newest `plan.json` under the date-named plan directories.
pub fn find_most_recent_plan(plans_dir: &Path) -> Result<PathBuf, String> {
    let entries =
        fs::read_dir(plans_dir).map_err(|err| format!("read plans dir: {err}"))?;

    let mut date_dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| format!("read plans dir: {err}"))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if NaiveDate::parse_from_str(&name, "%Y-%m-%d").is_ok() {
            date_dirs.push(name);
        }
    }
    date_dirs.sort();

    let most_recent = date_dirs
        .pop()
        .ok_or_else(|| format!("no plan directories found in {}", plans_dir.display()))?;
    let plan_path = plans_dir.join(&most_recent).join("plan.json");
    if !plan_path.exists() {
        return Err(format!(
            "plan.json not found in most recent dir {most_recent}"
        ));
    }
    Ok(plan_path)
}

fn none_if_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
