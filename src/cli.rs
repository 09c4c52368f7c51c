use crate::adapters::exec::resolve_adapter;
use crate::adapters::RunSpec;
use crate::audit::AuditLog;
use crate::config::{load_settings, Settings};
use crate::daemon::handlers::find_most_recent_plan;
use crate::daemon::{Daemon, DaemonConfig, Store};
use crate::metrics::{
    collect_all, latest_snapshot_path, load_snapshot, score_key_results, snapshot_path_for_date,
    write_snapshot, CiProvider, GitProvider, ManualProvider, Provider, Snapshot,
};
use crate::okr::{apply_proposal, create_proposal, OkrStore};
use crate::planner::{generate_plan, run_plan, GenerateOptions, RunOptions};
use crate::shared::timefmt::format_utc_seconds;
use crate::workspace::Workspace;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const APP_NAME: &str = "okra";

pub fn run(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }
    if matches!(args[0].as_str(), "help" | "-h" | "--help") {
        return Ok(help_text());
    }

    let (workspace_path, rest) = extract_workspace_flag(&args)?;
    if rest.is_empty() {
        return Ok(help_text());
    }

    match rest[0].as_str() {
        "init" => cmd_init(&rest[1..], &workspace_path),
        "kr" => cmd_kr(&rest[1..], &workspace_path),
        "plan" => cmd_plan(&rest[1..], &workspace_path),
        "okr" => cmd_okr(&rest[1..], &workspace_path),
        "daemon" => cmd_daemon(&rest[1..], &workspace_path),
        "agent" => cmd_agent(&rest[1..], &workspace_path),
        other => Err(format!("unknown command `{other}`")),
    }
}

fn help_text() -> String {
    [
        "Commands:",
        "  init --workspace <path>                    Initialize a workspace with starter files",
        "  kr measure --workspace <path>              Collect metrics into a dated snapshot",
        "  kr score --workspace <path>                Score key results against a snapshot",
        "  plan generate --workspace <path>           Generate a plan from org OKRs",
        "  plan run [plan-path] --workspace <path>    Execute a plan with an agent adapter",
        "  okr propose --workspace <path>             Package staged OKR updates as a proposal",
        "  okr apply <proposal-dir> --i-understand    Apply a validated proposal to okrs/",
        "  daemon run --workspace <path>              Run the workspace daemon loop",
        "  daemon status --workspace <path>           Show queued/running/completed jobs",
        "  daemon enqueue <type> --at <ts>            Enqueue a job for a specific time",
        "  agent run --workspace <path>               Run a single agent invocation",
        "",
        "Global flags:",
        "  --workspace <path>   Workspace root (required by every command)",
    ]
    .join("\n")
}

/// Pulls `--workspace <path>` (or `--workspace=<path>`) out of the argument
/// list wherever it appears; everything else stays in order.
fn extract_workspace_flag(args: &[String]) -> Result<(String, Vec<String>), String> {
    let mut workspace = String::new();
    let mut remaining = Vec::with_capacity(args.len());
    let mut idx = 0;
    while idx < args.len() {
        let arg = &args[idx];
        if arg == "--workspace" {
            idx += 1;
            let value = args
                .get(idx)
                .ok_or_else(|| "--workspace requires a value".to_string())?;
            workspace = value.clone();
        } else if let Some(value) = arg.strip_prefix("--workspace=") {
            workspace = value.to_string();
        } else {
            remaining.push(arg.clone());
        }
        idx += 1;
    }
    Ok((workspace, remaining))
}

/// Minimal flag parser for subcommands: `valued` flags consume the next
/// token, `switches` are booleans, anything else without a `--` prefix is
/// positional.
fn parse_flags(
    args: &[String],
    valued: &[&str],
    switches: &[&str],
) -> Result<(BTreeMap<String, String>, Vec<String>), String> {
    let mut flags = BTreeMap::new();
    let mut positional = Vec::new();
    let mut idx = 0;
    while idx < args.len() {
        let arg = &args[idx];
        if let Some(name) = arg.strip_prefix("--") {
            if let Some((name, value)) = name.split_once('=') {
                if !valued.contains(&name) {
                    return Err(format!("unknown flag --{name}"));
                }
                flags.insert(name.to_string(), value.to_string());
            } else if valued.contains(&name) {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| format!("--{name} requires a value"))?;
                flags.insert(name.to_string(), value.clone());
            } else if switches.contains(&name) {
                flags.insert(name.to_string(), "true".to_string());
            } else {
                return Err(format!("unknown flag --{name}"));
            }
        } else {
            positional.push(arg.clone());
        }
        idx += 1;
    }
    Ok((flags, positional))
}

fn resolve_workspace(workspace_path: &str) -> Result<Workspace, String> {
    if workspace_path.trim().is_empty() {
        return Err("--workspace is required".to_string());
    }
    Workspace::resolve(workspace_path).map_err(|err| err.to_string())
}

fn parse_as_of_flag(flags: &BTreeMap<String, String>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = flags.get("as-of") else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| format!("parse --as-of: {err}"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("parse --as-of: invalid date {raw}"))?;
    Ok(Some(Utc.from_utc_datetime(&midnight)))
}

fn cmd_init(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, positional) = parse_flags(args, &["template"], &[])?;
    if !positional.is_empty() {
        return Err(format!("unexpected argument `{}`", positional[0]));
    }
    let template = flags
        .get("template")
        .map(String::as_str)
        .unwrap_or("minimal");
    if template != "minimal" {
        return Err(format!("unknown template: {template}"));
    }
    if workspace_path.trim().is_empty() {
        return Err("--workspace is required".to_string());
    }

    let root = Workspace::resolve_root(workspace_path).map_err(|err| err.to_string())?;
    fs::create_dir_all(&root).map_err(|err| format!("create workspace root: {err}"))?;
    let workspace = Workspace::resolve(&root.display().to_string()).map_err(|err| err.to_string())?;

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "workspace_init_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "template": template,
        }),
    );

    let result = init_workspace_files(&workspace);
    let mut finish_payload = json!({
        "workspace": workspace.root.display().to_string(),
        "template": template,
    });
    if let Err(err) = &result {
        finish_payload["error"] = json!(err);
    }
    audit_best_effort(&audit, "workspace_init_finished", &finish_payload);
    result?;

    Ok(format!(
        "Initialized workspace: {root}\nNext steps:\n  {APP_NAME} kr measure --workspace {root}\n  {APP_NAME} plan generate --workspace {root}\n  {APP_NAME} plan run --workspace {root} --adapter mock artifacts/plans/<date>/plan.json",
        root = workspace.root.display(),
    ))
}

fn init_workspace_files(workspace: &Workspace) -> Result<(), String> {
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let seeds = [
        (
            workspace.culture_dir.join("values.md"),
            MINIMAL_VALUES_TEMPLATE,
        ),
        (
            workspace.culture_dir.join("standards.md"),
            MINIMAL_STANDARDS_TEMPLATE,
        ),
        (workspace.okrs_dir.join("org.yml"), MINIMAL_ORG_TEMPLATE),
        (
            workspace.okrs_dir.join("permissions.yml"),
            MINIMAL_PERMISSIONS_TEMPLATE,
        ),
        (
            workspace.manual_metrics_path(),
            MINIMAL_MANUAL_METRICS_TEMPLATE,
        ),
        (
            workspace.metrics_dir.join("ci_report.json"),
            MINIMAL_CI_REPORT_TEMPLATE,
        ),
    ];
    for (path, contents) in seeds {
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("ensure dir for {}: {err}", path.display()))?;
        }
        fs::write(&path, contents).map_err(|err| format!("write {}: {err}", path.display()))?;
    }
    Ok(())
}

fn cmd_kr(args: &[String], workspace_path: &str) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("measure") => cmd_kr_measure(&args[1..], workspace_path),
        Some("score") => cmd_kr_score(&args[1..], workspace_path),
        Some(other) => Err(format!("{APP_NAME} kr: unknown subcommand `{other}`")),
        None => Err(format!("{APP_NAME} kr: missing subcommand")),
    }
}

fn cmd_kr_measure(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["as-of", "repo-dir", "snapshots-dir"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let as_of = parse_as_of_flag(&flags)?
        .unwrap_or_else(|| crate::metrics::types::truncate_to_day(Utc::now()));
    let repo_dir = match flags.get("repo-dir") {
        Some(raw) => workspace.resolve_path(raw).map_err(|err| err.to_string())?,
        None => workspace.root.clone(),
    };
    let snapshots_dir = match flags.get("snapshots-dir") {
        Some(raw) => workspace.resolve_path(raw).map_err(|err| err.to_string())?,
        None => workspace.snapshots_dir(),
    };

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "kr_measure_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "as_of": crate::metrics::types::as_of_date_string(as_of),
            "repo_dir": repo_dir.display().to_string(),
        }),
    );

    let git = GitProvider {
        repo_dir,
        as_of,
    };
    let ci = CiProvider {
        report_path: workspace.metrics_dir.join("ci_report.json"),
        as_of,
    };
    let manual = ManualProvider {
        path: workspace.manual_metrics_path(),
        as_of,
    };
    let providers: [&dyn Provider; 3] = [&git, &ci, &manual];

    let points = match collect_all(&providers) {
        Ok(points) => points,
        Err(err) => {
            audit_best_effort(&audit, "kr_measure_finished", &json!({ "error": err }));
            return Err(err);
        }
    };

    let snapshot_path = snapshot_path_for_date(&snapshots_dir, as_of);
    let point_count = points.len();
    let written = write_snapshot(
        &snapshot_path,
        Snapshot {
            schema_version: crate::metrics::snapshot::SNAPSHOT_SCHEMA_VERSION,
            as_of: crate::metrics::types::as_of_date_string(as_of),
            points,
        },
    );
    if let Err(err) = written {
        audit_best_effort(
            &audit,
            "kr_measure_finished",
            &json!({
                "snapshot_path": snapshot_path.display().to_string(),
                "error": err,
            }),
        );
        return Err(err);
    }

    audit_best_effort(
        &audit,
        "kr_measure_finished",
        &json!({
            "snapshot_path": snapshot_path.display().to_string(),
            "point_count": point_count,
        }),
    );
    Ok(format!("Wrote snapshot: {}", snapshot_path.display()))
}

fn cmd_kr_score(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["snapshot", "output"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "kr_score_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "snapshot": flags.get("snapshot").cloned().unwrap_or_else(|| "latest".to_string()),
        }),
    );

    let finish_err = |audit: &AuditLog, err: String| -> String {
        audit_best_effort(audit, "kr_score_finished", &json!({ "error": err }));
        err
    };

    let snapshot_path = match flags.get("snapshot") {
        Some(raw) => workspace
            .resolve_path(raw)
            .map_err(|err| finish_err(&audit, err.to_string()))?,
        None => latest_snapshot_path(&workspace.snapshots_dir())
            .map_err(|err| finish_err(&audit, err))?,
    };
    let snapshot = load_snapshot(&snapshot_path).map_err(|err| finish_err(&audit, err))?;
    let store =
        OkrStore::load_from_dir(&workspace.okrs_dir).map_err(|err| finish_err(&audit, err))?;
    let report = score_key_results(&store, &snapshot, &snapshot_path)
        .map_err(|err| finish_err(&audit, err))?;

    let out_path = match flags.get("output") {
        Some(raw) => workspace
            .resolve_path(raw)
            .map_err(|err| finish_err(&audit, err.to_string()))?,
        None => workspace
            .artifacts_dir
            .join(format!("kr_score_{}.json", report.as_of)),
    };
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| finish_err(&audit, format!("ensure artifacts dir: {err}")))?;
    }
    let mut body = serde_json::to_vec_pretty(&report)
        .map_err(|err| finish_err(&audit, format!("marshal score report: {err}")))?;
    body.push(b'\n');
    fs::write(&out_path, body)
        .map_err(|err| finish_err(&audit, format!("write score report: {err}")))?;

    audit_best_effort(
        &audit,
        "kr_score_finished",
        &json!({
            "output": out_path.display().to_string(),
            "as_of": report.as_of,
            "results": report.results.len(),
        }),
    );
    Ok(format!("Wrote score report: {}", out_path.display()))
}

fn cmd_plan(args: &[String], workspace_path: &str) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("generate") => cmd_plan_generate(&args[1..], workspace_path),
        Some("run") => cmd_plan_run(&args[1..], workspace_path),
        Some(other) => Err(format!("{APP_NAME} plan: unknown subcommand `{other}`")),
        None => Err(format!("{APP_NAME} plan: missing subcommand")),
    }
}

fn cmd_plan_generate(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["as-of", "objective", "kr", "role"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "plan_generate_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "objective_id": flags.get("objective").cloned().unwrap_or_default(),
            "kr_id": flags.get("kr").cloned().unwrap_or_default(),
        }),
    );

    let result = generate_plan(GenerateOptions {
        okrs_dir: workspace.okrs_dir.clone(),
        output_base_dir: workspace.plans_dir(),
        as_of: parse_as_of_flag(&flags)?,
        objective_id: flags.get("objective").cloned(),
        kr_id: flags.get("kr").cloned(),
        agent_role: flags.get("role").cloned(),
    });

    match result {
        Ok(generated) => {
            audit_best_effort(
                &audit,
                "plan_generate_finished",
                &json!({
                    "plan_path": generated.plan_path.display().to_string(),
                    "plan_id": generated.plan.id,
                }),
            );
            Ok(format!("Wrote plan: {}", generated.plan_path.display()))
        }
        Err(err) => {
            audit_best_effort(&audit, "plan_generate_finished", &json!({ "error": err }));
            Err(err)
        }
    }
}

fn cmd_plan_run(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, positional) = parse_flags(args, &["adapter", "timeout"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;
    let settings = load_settings(&workspace).map_err(|err| err.to_string())?;

    let adapter_name = flags
        .get("adapter")
        .cloned()
        .unwrap_or_else(|| settings.adapter.name.clone());
    let adapter = resolve_adapter(
        &adapter_name,
        settings.adapter.command.as_deref(),
        &settings.adapter.args,
    )?;

    let timeout_seconds = match flags.get("timeout") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|err| format!("parse --timeout: {err}"))?,
        None => settings.adapter.timeout_seconds,
    };
    let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));

    let plan_path = match positional.first() {
        Some(raw) => workspace.resolve_path(raw).map_err(|err| err.to_string())?,
        None => find_most_recent_plan(&workspace.plans_dir())?,
    };

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "plan_run_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "plan_path": plan_path.display().to_string(),
            "adapter": adapter_name,
        }),
    );

    let store = Store::open_with_claim(&workspace.state_db_path, settings.claim.clone())
        .map_err(|err| format!("open store: {err}"))?;
    let result = run_plan(RunOptions {
        plan_path: plan_path.clone(),
        workdir: workspace.root.clone(),
        adapter: adapter.as_ref(),
        timeout,
        run_base_dir: workspace.runs_dir(),
        audit: &audit,
        store: Some(&store),
    });

    match result {
        Ok(run) => {
            audit_best_effort(
                &audit,
                "plan_run_finished",
                &json!({
                    "run_id": run.run_id,
                    "run_dir": run.run_dir.display().to_string(),
                    "items_total": run.plan.items.len(),
                    "items_succeeded": run.item_runs.len(),
                }),
            );
            Ok(format!(
                "Run {} complete: {}/{} items succeeded\nArtifacts: {}",
                run.run_id,
                run.item_runs.len(),
                run.plan.items.len(),
                run.run_dir.display(),
            ))
        }
        Err(err) => {
            audit_best_effort(
                &audit,
                "plan_run_finished",
                &json!({
                    "plan_path": plan_path.display().to_string(),
                    "error": err,
                }),
            );
            Err(err)
        }
    }
}

fn cmd_okr(args: &[String], workspace_path: &str) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("propose") => cmd_okr_propose(&args[1..], workspace_path),
        Some("apply") => cmd_okr_apply(&args[1..], workspace_path),
        Some(other) => Err(format!("{APP_NAME} okr: unknown subcommand `{other}`")),
        None => Err(format!("{APP_NAME} okr: missing subcommand")),
    }
}

fn cmd_okr_propose(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["agent", "updates", "note"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let agent_id = flags
        .get("agent")
        .ok_or_else(|| "--agent is required".to_string())?;
    let updates_raw = flags
        .get("updates")
        .ok_or_else(|| "--updates is required".to_string())?;
    let updates_dir = workspace
        .resolve_path(updates_raw)
        .map_err(|err| err.to_string())?;
    let note = flags.get("note").map(String::as_str).unwrap_or("");

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "okr_propose_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "agent_id": agent_id,
            "updates_dir": updates_dir.display().to_string(),
        }),
    );

    let result = create_proposal(
        agent_id,
        &updates_dir,
        &workspace.okrs_dir,
        &workspace.proposals_dir(),
        note,
    );

    match result {
        Ok(meta) => {
            audit_best_effort(
                &audit,
                "okr_propose_finished",
                &json!({
                    "proposal_id": meta.id,
                    "proposal_dir": meta.proposal_dir,
                    "files": meta.files,
                }),
            );
            Ok(format!("Created proposal: {}", meta.proposal_dir))
        }
        Err(err) => {
            audit_best_effort(&audit, "okr_propose_finished", &json!({ "error": err }));
            Err(err)
        }
    }
}

fn cmd_okr_apply(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, positional) = parse_flags(args, &[], &["i-understand"])?;
    let workspace = resolve_workspace(workspace_path)?;

    let proposal_raw = positional
        .first()
        .ok_or_else(|| "proposal directory is required".to_string())?;
    let proposal_dir = workspace
        .resolve_path(proposal_raw)
        .map_err(|err| err.to_string())?;
    let confirm = flags.contains_key("i-understand");

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "okr_apply_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "proposal_dir": proposal_dir.display().to_string(),
        }),
    );

    match apply_proposal(&proposal_dir, confirm) {
        Ok(meta) => {
            audit_best_effort(
                &audit,
                "okr_apply_finished",
                &json!({
                    "proposal_id": meta.id,
                    "okrs_dir": meta.okrs_dir,
                    "files": meta.files,
                }),
            );
            Ok(format!(
                "Applied proposal {} to {}",
                meta.id, meta.okrs_dir
            ))
        }
        Err(err) => {
            audit_best_effort(&audit, "okr_apply_finished", &json!({ "error": err }));
            Err(err)
        }
    }
}

fn cmd_daemon(args: &[String], workspace_path: &str) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("run") => cmd_daemon_run(&args[1..], workspace_path),
        Some("status") => cmd_daemon_status(&args[1..], workspace_path),
        Some("enqueue") => cmd_daemon_enqueue(&args[1..], workspace_path),
        Some(other) => Err(format!("{APP_NAME} daemon: unknown subcommand `{other}`")),
        None => Err(format!("{APP_NAME} daemon: missing subcommand")),
    }
}

fn cmd_daemon_run(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["poll", "lease", "tz"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;

    let mut settings = load_settings(&workspace).map_err(|err| err.to_string())?;
    if let Some(raw) = flags.get("poll") {
        settings.poll_seconds = parse_seconds_flag("--poll", raw)?;
    }
    if let Some(raw) = flags.get("lease") {
        settings.lease_seconds = parse_seconds_flag("--lease", raw)?;
    }
    if let Some(tz) = flags.get("tz") {
        settings.timezone = tz.clone();
    }

    println!(
        "Starting daemon for workspace: {}",
        workspace.root.display()
    );
    println!(
        "Poll interval: {}s, Lease: {}s",
        settings.poll_seconds, settings.lease_seconds
    );

    let stop_path = workspace.audit_dir.join("daemon.stop");
    if stop_path.exists() {
        let _ = fs::remove_file(&stop_path);
    }

    let daemon = Daemon::new(DaemonConfig {
        workspace,
        settings,
    })
    .map_err(|err| format!("create daemon: {err}"))?;

    // A stop file raises the flag; the loop lets any in-flight handler
    // finish before returning.
    let stop = Arc::new(AtomicBool::new(false));
    let watcher = {
        let stop = stop.clone();
        let stop_path = stop_path.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if stop_path.exists() {
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                std::thread::sleep(Duration::from_millis(200));
            }
        })
    };

    let outcome = daemon.run(&stop);
    stop.store(true, Ordering::Relaxed);
    let _ = watcher.join();
    let _ = fs::remove_file(&stop_path);
    outcome?;
    Ok("daemon stopped".to_string())
}

fn parse_seconds_flag(flag: &str, raw: &str) -> Result<u64, String> {
    let trimmed = raw.strip_suffix('s').unwrap_or(raw);
    let value = trimmed
        .parse::<u64>()
        .map_err(|err| format!("parse {flag}: {err}"))?;
    if value == 0 {
        return Err(format!("{flag} must be >= 1 second"));
    }
    Ok(value)
}

fn cmd_daemon_status(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (_, _) = parse_flags(args, &[], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    let settings = load_settings(&workspace).map_err(|err| err.to_string())?;
    let store = Store::open_with_claim(&workspace.state_db_path, settings.claim)
        .map_err(|err| format!("open daemon store: {err}"))?;

    let mut out = Vec::new();

    let running = store
        .list_running()
        .map_err(|err| format!("list running jobs: {err}"))?;
    out.push(format!("Running jobs: {}", running.len()));
    for job in &running {
        let lease = job
            .lease_expires_at
            .map(format_utc_seconds)
            .unwrap_or_default();
        let started = job.started_at.map(format_utc_seconds).unwrap_or_default();
        out.push(format!(
            "  {} [{}] started={started} lease_expires={lease} owner={}",
            job.id, job.job_type, job.lease_owner,
        ));
    }
    out.push(String::new());

    let queued = store
        .list_queued(10)
        .map_err(|err| format!("list queued jobs: {err}"))?;
    out.push(format!("Queued jobs (next {}):", queued.len()));
    for job in &queued {
        out.push(format!(
            "  {} [{}] scheduled={}",
            job.id,
            job.job_type,
            format_utc_seconds(job.scheduled_at),
        ));
    }
    out.push(String::new());

    let completed = store
        .list_recent_completed(5)
        .map_err(|err| format!("list completed jobs: {err}"))?;
    out.push(format!("Recent completed jobs (last {}):", completed.len()));
    for job in &completed {
        let finished = job.finished_at.map(format_utc_seconds).unwrap_or_default();
        out.push(format!(
            "  {} [{}] status={} finished={finished}",
            job.id,
            job.job_type,
            job.status.as_str(),
        ));
        if !job.result_json.is_empty() {
            out.push(format!("    result: {}", job.result_json));
        }
    }

    Ok(out.join("\n"))
}

fn cmd_daemon_enqueue(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, positional) = parse_flags(args, &["at", "payload-json"], &[])?;
    let job_type = positional
        .first()
        .ok_or_else(|| "job type is required".to_string())?;

    let at_raw = flags
        .get("at")
        .ok_or_else(|| "--at is required".to_string())?;
    let scheduled_at = parse_enqueue_at(at_raw)?;

    let payload_raw = flags
        .get("payload-json")
        .map(String::as_str)
        .unwrap_or("{}");
    let payload: serde_json::Value =
        serde_json::from_str(payload_raw).map_err(|err| format!("parse --payload-json: {err}"))?;

    let workspace = resolve_workspace(workspace_path)?;
    let settings = load_settings(&workspace).map_err(|err| err.to_string())?;
    let store = Store::open_with_claim(&workspace.state_db_path, settings.claim)
        .map_err(|err| format!("open daemon store: {err}"))?;

    let (job_id, created) = store
        .enqueue_unique(job_type, scheduled_at, &payload)
        .map_err(|err| format!("enqueue job: {err}"))?;

    if created {
        Ok(format!("Enqueued job: {job_id}"))
    } else {
        Ok(format!("Job already exists: {job_id}"))
    }
}

/// `--at` accepts `YYYY-MM-DDTHH:MM`, interpreted as UTC.
fn parse_enqueue_at(raw: &str) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map_err(|err| format!("parse --at: {err}"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn cmd_agent(args: &[String], workspace_path: &str) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("run") => cmd_agent_run(&args[1..], workspace_path),
        Some(other) => Err(format!("{APP_NAME} agent: unknown subcommand `{other}`")),
        None => Err(format!("{APP_NAME} agent: missing subcommand")),
    }
}

fn cmd_agent_run(args: &[String], workspace_path: &str) -> Result<String, String> {
    let (flags, _) = parse_flags(args, &["adapter", "prompt", "workdir", "artifacts"], &[])?;
    let workspace = resolve_workspace(workspace_path)?;
    workspace.ensure_dirs().map_err(|err| err.to_string())?;
    let settings = load_settings(&workspace).map_err(|err| err.to_string())?;

    let prompt_raw = flags
        .get("prompt")
        .ok_or_else(|| "prompt is required".to_string())?;
    let artifacts_raw = flags
        .get("artifacts")
        .ok_or_else(|| "artifacts dir is required".to_string())?;

    let prompt_path = workspace
        .resolve_path(prompt_raw)
        .map_err(|err| format!("resolve prompt path: {err}"))?;
    let workdir = match flags.get("workdir") {
        Some(raw) => workspace
            .resolve_path(raw)
            .map_err(|err| format!("resolve workdir: {err}"))?,
        None => workspace.root.clone(),
    };
    let artifacts_dir = workspace
        .resolve_path(artifacts_raw)
        .map_err(|err| format!("resolve artifacts dir: {err}"))?;

    let adapter_name = flags
        .get("adapter")
        .cloned()
        .unwrap_or_else(|| settings.adapter.name.clone());
    let adapter = resolve_adapter(
        &adapter_name,
        settings.adapter.command.as_deref(),
        &settings.adapter.args,
    )?;

    let audit = AuditLog::new(&workspace.audit_db_path);
    audit_best_effort(
        &audit,
        "agent_run_started",
        &json!({
            "workspace": workspace.root.display().to_string(),
            "adapter": adapter.name(),
            "prompt": prompt_path.display().to_string(),
            "workdir": workdir.display().to_string(),
            "artifacts": artifacts_dir.display().to_string(),
        }),
    );

    let spec = RunSpec {
        prompt_path,
        workdir,
        artifacts_dir: artifacts_dir.clone(),
        env: BTreeMap::new(),
        timeout: (settings.adapter.timeout_seconds > 0)
            .then(|| Duration::from_secs(settings.adapter.timeout_seconds)),
    };
    let outcome = adapter.run(&spec);

    let mut finish_payload = json!({
        "adapter": adapter.name(),
        "artifacts": artifacts_dir.display().to_string(),
    });
    match &outcome {
        Ok(result) => {
            finish_payload["exit_code"] = json!(result.exit_code);
            finish_payload["transcript"] = json!(result.transcript_path.display().to_string());
            finish_payload["summary"] = json!(result.summary_path.display().to_string());
        }
        Err(err) => {
            finish_payload["error"] = json!(err.to_string());
            if let Some(code) = err.exit_code() {
                finish_payload["exit_code"] = json!(code);
            }
        }
    }
    audit_best_effort(&audit, "agent_run_finished", &finish_payload);

    match outcome {
        Ok(result) => Ok(format!(
            "Agent run complete (exit {})\nTranscript: {}",
            result.exit_code,
            result.transcript_path.display(),
        )),
        Err(err) => Err(err.to_string()),
    }
}

fn audit_best_effort(audit: &AuditLog, event_type: &str, payload: &serde_json::Value) {
    if let Err(err) = audit.log_event("cli", event_type, payload) {
        eprintln!("audit log failed: {err}");
    }
}

const MINIMAL_VALUES_TEMPLATE: &str = "# Values\n\n- Clarity over ambiguity.\n- Evidence over assumptions.\n";

const MINIMAL_STANDARDS_TEMPLATE: &str = "# Standards\n\n- Keep changes small and reversible.\n- Capture evidence for KR claims.\n";

const MINIMAL_ORG_TEMPLATE: &str = "scope: org
objectives:
  - objective_id: OBJ-INIT-1
    objective: Establish a baseline OKR workspace.
    owner_id: team-okr
    key_results:
      - kr_id: KR-INIT-1
        description: Produce a baseline metric snapshot.
        owner_id: team-okr
        metric_key: manual.baseline_snapshot
        baseline: 0
        target: 1
        confidence: 0.5
        status: in_progress
        evidence:
          - init:baseline
";

const MINIMAL_PERMISSIONS_TEMPLATE: &str = "permissions:
  read:
    - all
  write:
    - owner_id_match
";

const MINIMAL_MANUAL_METRICS_TEMPLATE: &str = "metrics:
  - key: manual.baseline_snapshot
    value: 0
    unit: count
    evidence:
      - init:seed
";

const MINIMAL_CI_REPORT_TEMPLATE: &str = "{
  \"metrics\": {
    \"pass_rate_30d\": 1
  }
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_workspace_flag_handles_both_forms() {
        let args = vec![
            "daemon".to_string(),
            "--workspace".to_string(),
            "/tmp/ws".to_string(),
            "status".to_string(),
        ];
        let (workspace, rest) = extract_workspace_flag(&args).expect("extract");
        assert_eq!(workspace, "/tmp/ws");
        assert_eq!(rest, vec!["daemon".to_string(), "status".to_string()]);

        let args = vec!["init".to_string(), "--workspace=/tmp/other".to_string()];
        let (workspace, rest) = extract_workspace_flag(&args).expect("extract");
        assert_eq!(workspace, "/tmp/other");
        assert_eq!(rest, vec!["init".to_string()]);
    }

    #[test]
    fn extract_workspace_flag_requires_value() {
        let args = vec!["init".to_string(), "--workspace".to_string()];
        assert!(extract_workspace_flag(&args).is_err());
    }

    #[test]
    fn parse_flags_rejects_unknown() {
        let args = vec!["--bogus".to_string()];
        let err = parse_flags(&args, &["as-of"], &[]).expect_err("must reject");
        assert!(err.contains("--bogus"));
    }

    #[test]
    fn parse_enqueue_at_accepts_minute_precision() {
        let parsed = parse_enqueue_at("2024-01-01T10:30").expect("parse");
        assert_eq!(format_utc_seconds(parsed), "2024-01-01T10:30:00Z");
    }

    #[test]
    fn parse_seconds_flag_accepts_suffix() {
        assert_eq!(parse_seconds_flag("--poll", "5").expect("parse"), 5);
        assert_eq!(parse_seconds_flag("--lease", "30s").expect("parse"), 30);
        assert!(parse_seconds_flag("--poll", "0").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = run(vec!["frobnicate".to_string()]).expect_err("must fail");
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn help_lists_every_command_group() {
        let help = help_text();
        for command in ["init", "kr measure", "plan run", "okr propose", "daemon run", "agent run"] {
            assert!(help.contains(command), "help is missing {command}");
        }
    }
}
