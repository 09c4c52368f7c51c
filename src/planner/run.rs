use super::io::{load_plan, resolve_plan_path};
use super::types::{Plan, PlanItem};
use crate::adapters::{AgentAdapter, RunSpec, RESULT_PATH_ENV};
use crate::audit::AuditLog;
use crate::daemon::store::Store;
use crate::guardrails::tree::{
    sanitize_error_message, write_violation, ProtectedTreeCheck, VIOLATION_PROTECTED_TREE,
};
use crate::guardrails::validate_result_file;
use crate::shared::timefmt::{compact_utc, format_utc_seconds};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct RunOptions<'a> {
    pub plan_path: PathBuf,
    pub workdir: PathBuf,
    pub adapter: &'a dyn AgentAdapter,
    pub timeout: Option<Duration>,
    pub run_base_dir: PathBuf,
    pub audit: &'a AuditLog,
    /// When present, run records are mirrored into the daemon store.
    pub store: Option<&'a Store>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub plan: Plan,
    pub item_runs: Vec<ItemRunResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ItemRunResult {
    pub item_id: String,
    pub item_dir: PathBuf,
    pub result_path: PathBuf,
}

/// Executes a plan item by item. Each item gets its own artifacts
/// directory, a deterministic prompt, an integrity guardrail around the
/// protected OKR subtree, and strict validation of the result file the
/// agent declares. The run aborts on the first failing item; artifacts of
/// already-executed items stay on disk.
pub fn run_plan(opts: RunOptions<'_>) -> Result<RunResult, String> {
    let plan_path = resolve_plan_path(&opts.plan_path)?;
    let plan = load_plan(&plan_path)?;

    let started_at = Utc::now();
    let run_id = compact_utc(started_at);
    let run_dir = opts.run_base_dir.join(&run_id);
    fs::create_dir_all(&run_dir).map_err(|err| format!("ensure run dir: {err}"))?;

    if let Some(store) = opts.store {
        // Run bookkeeping is advisory; the artifacts on disk are the
        // source of truth for what executed.
        let _ = store.record_run_started(&run_id, started_at);
    }

    let mut result = RunResult {
        run_id: run_id.clone(),
        run_dir: run_dir.clone(),
        plan: plan.clone(),
        item_runs: Vec::new(),
        started_at,
        ended_at: None,
    };

    for (idx, item) in plan.items.iter().enumerate() {
        match run_item(&opts, &plan, item, idx, &run_id, &run_dir) {
            Ok(item_run) => result.item_runs.push(item_run),
            Err(message) => {
                finish_run(&opts, &mut result, "failed");
                return Err(message);
            }
        }
    }

    finish_run(&opts, &mut result, "succeeded");
    Ok(result)
}

fn finish_run(opts: &RunOptions<'_>, result: &mut RunResult, status: &str) {
    result.ended_at = Some(Utc::now());
    if let Some(store) = opts.store {
        let summary = json!({
            "run_dir": result.run_dir.display().to_string(),
            "items_total": result.plan.items.len(),
            "items_succeeded": result.item_runs.len(),
            "items_failed": result.plan.items.len() - result.item_runs.len(),
            "started_at": format_utc_seconds(result.started_at),
        });
        let _ = store.record_run_finished(&result.run_id, status, &summary);
    }
}

fn run_item(
    opts: &RunOptions<'_>,
    plan: &Plan,
    item: &PlanItem,
    idx: usize,
    run_id: &str,
    run_dir: &Path,
) -> Result<ItemRunResult, String> {
    let item_dir = run_dir.join(format!("item-{:04}", idx + 1));
    fs::create_dir_all(&item_dir).map_err(|err| format!("ensure item dir: {err}"))?;

    let prompt_path = item_dir.join("prompt.md");
    fs::write(&prompt_path, render_prompt(item, &item_dir))
        .map_err(|err| format!("write prompt: {err}"))?;

    let mut audit_payload = json!({
        "run_id": run_id,
        "run_dir": run_dir.display().to_string(),
        "plan_id": plan.id,
        "plan_as_of": plan.as_of,
        "plan_item_id": item.id,
        "objective_id": item.objective_id,
        "kr_id": item.kr_id,
        "metric_key": item.expected_metric_change.metric_key,
        "adapter": opts.adapter.name(),
        "workdir": opts.workdir.display().to_string(),
        "item_dir": item_dir.display().to_string(),
    });
    audit(opts, "plan_item_started", &audit_payload);

    let mut guard = ProtectedTreeCheck::capture_before(&opts.workdir)?;

    let spec = RunSpec {
        prompt_path,
        workdir: opts.workdir.clone(),
        artifacts_dir: item_dir.clone(),
        env: item_env(plan, item, &item_dir),
        timeout: opts.timeout,
    };
    let result_path = spec.result_path();
    let run_outcome = opts.adapter.run(&spec);

    // The subtree is checked whether or not the adapter reported success:
    // a guardrail breach fails the item regardless of exit status.
    guard.capture_after()?;
    if guard.has_changes() {
        let (reverted, revert_error) = match guard.revert() {
            Ok(()) => (true, None),
            Err(err) => (false, Some(sanitize_error_message(&err))),
        };
        let details = json!({
            "changed": guard.changed_paths(),
            "reverted": reverted,
            "revert_error": revert_error,
            "item_id": item.id,
            "run_id": run_id,
        });
        write_violation(&item_dir, VIOLATION_PROTECTED_TREE, details.clone())?;

        audit_payload["violation"] = details;
        audit(opts, "guardrail_violation", &audit_payload);
        return Err(format!(
            "protected tree modified during item {} (violation recorded in {})",
            item.id,
            item_dir.display()
        ));
    }

    match run_outcome {
        Err(adapter_err) => {
            if let Some(code) = adapter_err.exit_code() {
                audit_payload["exit_code"] = json!(code);
            }
            if let Some(transcript) = adapter_err.transcript() {
                audit_payload["transcript"] = json!(transcript.display().to_string());
            }
            match validate_result_file(&result_path) {
                Ok(()) => {
                    // The agent declared a valid result despite the process
                    // error; keep the item and record the error as
                    // non-fatal.
                    audit_payload["adapter_error"] = json!(adapter_err.to_string());
                    audit_payload["result_json"] = json!(result_path.display().to_string());
                    audit(opts, "plan_item_finished", &audit_payload);
                    Ok(ItemRunResult {
                        item_id: item.id.clone(),
                        item_dir,
                        result_path,
                    })
                }
                Err(result_err) => {
                    audit_payload["error"] = json!(adapter_err.to_string());
                    audit_payload["result_error"] = json!(result_err);
                    audit(opts, "plan_item_finished", &audit_payload);
                    match adapter_err.transcript() {
                        Some(transcript) => Err(format!(
                            "agent run failed for item {} (see {}): {adapter_err}",
                            item.id,
                            transcript.display()
                        )),
                        None => Err(format!(
                            "agent run failed for item {}: {adapter_err}",
                            item.id
                        )),
                    }
                }
            }
        }
        Ok(outcome) => {
            audit_payload["exit_code"] = json!(outcome.exit_code);
            audit_payload["transcript"] =
                json!(outcome.transcript_path.display().to_string());
            match validate_result_file(&result_path) {
                Ok(()) => {
                    audit_payload["result_json"] = json!(result_path.display().to_string());
                    audit(opts, "plan_item_finished", &audit_payload);
                    Ok(ItemRunResult {
                        item_id: item.id.clone(),
                        item_dir,
                        result_path,
                    })
                }
                Err(result_err) => {
                    audit_payload["error"] = json!(result_err);
                    audit(opts, "plan_item_finished", &audit_payload);
                    Err(format!(
                        "agent result invalid for item {}: {result_err}",
                        item.id
                    ))
                }
            }
        }
    }
}

fn audit(opts: &RunOptions<'_>, event_type: &str, payload: &serde_json::Value) {
    // Audit never aborts a run.
    let _ = opts.audit.log_event("scheduler", event_type, payload);
}

fn item_env(plan: &Plan, item: &PlanItem, item_dir: &Path) -> BTreeMap<String, String> {
    let change = &item.expected_metric_change;
    BTreeMap::from([
        ("OKRA_PLAN_ID".to_string(), plan.id.clone()),
        ("OKRA_PLAN_ITEM_ID".to_string(), item.id.clone()),
        (
            "OKRA_PLAN_ITEM_DIR".to_string(),
            item_dir.display().to_string(),
        ),
        (
            RESULT_PATH_ENV.to_string(),
            item_dir.join("result.json").display().to_string(),
        ),
        ("OKRA_OBJECTIVE_ID".to_string(), item.objective_id.clone()),
        ("OKRA_KR_ID".to_string(), item.kr_id.clone()),
        ("OKRA_METRIC_KEY".to_string(), change.metric_key.clone()),
        (
            "OKRA_METRIC_BASELINE".to_string(),
            format_float(change.baseline),
        ),
        ("OKRA_METRIC_TARGET".to_string(), format_float(change.target)),
    ])
}

fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Deterministic per-item prompt. Section order and wording are part of the
/// artifact contract: reruns over the same item produce identical bytes.
pub fn render_prompt(item: &PlanItem, item_dir: &Path) -> String {
    let change = &item.expected_metric_change;
    let mut out = String::new();
    out.push_str("# okra Plan Item\n\n");
    out.push_str("You are executing a single plan item for OKR-driven work.\n\n");
    out.push_str(&format!("- objective_id: {}\n", item.objective_id));
    out.push_str(&format!("- kr_id: {}\n", item.kr_id));
    out.push_str(&format!("- agent_role: {}\n\n", item.agent_role));
    out.push_str(&format!("## Task\n{}\n\n", item.task));
    out.push_str(&format!("## Hypothesis\n{}\n\n", item.hypothesis));
    out.push_str(&format!(
        "## Expected Metric Change\n- metric_key: {}\n- direction: {}\n- baseline: {}\n- target: {}\n- delta: {}\n\n",
        change.metric_key, change.direction, change.baseline, change.target, change.delta,
    ));
    if !item.evidence_plan.is_empty() {
        out.push_str("## Evidence Plan\n");
        for step in &item.evidence_plan {
            out.push_str(&format!("- {step}\n"));
        }
        out.push('\n');
    }
    out.push_str("## Required Output\n");
    out.push_str("Write `result.json` to the artifacts directory for this item:\n\n");
    out.push_str(&format!("- {}\n\n", item_dir.join("result.json").display()));
    out.push_str("The file must be valid JSON with exactly these fields:\n");
    out.push_str("- `schema_version` (must be \"1.0\")\n");
    out.push_str("- `summary` (string)\n");
    out.push_str("- `proposed_changes` (array of strings)\n");
    out.push_str("- `kr_targets` (array of strings)\n");
    out.push_str("- `kr_impact_claim` (string)\n\n");
    out.push_str(
        "If you made no code changes, keep `proposed_changes` empty but explain why in `summary`.\n",
    );
    out
}
