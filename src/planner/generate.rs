use super::types::{ExpectedMetricChange, Plan, PlanItem};
use super::validate::validate_plan;
use crate::okr::{KeyResult, Objective, OkrStore, Scope};
use crate::shared::timefmt::format_utc_seconds;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub const DEFAULT_AGENT_ROLE: &str = "software_engineer";

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub okrs_dir: PathBuf,
    pub output_base_dir: PathBuf,
    pub as_of: Option<DateTime<Utc>>,
    pub objective_id: Option<String>,
    pub kr_id: Option<String>,
    pub agent_role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub plan: Plan,
    pub plan_path: PathBuf,
}

/// Derives a single-item plan from the first runnable org-scope key result
/// (or the explicitly selected one) and writes it to
/// `<output>/<date>/plan.json`.
pub fn generate_plan(opts: GenerateOptions) -> Result<GenerateResult, String> {
    let as_of = opts.as_of.unwrap_or_else(Utc::now);
    let as_of_date = as_of.format("%Y-%m-%d").to_string();
    let agent_role = opts
        .agent_role
        .filter(|role| !role.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AGENT_ROLE.to_string());

    let store = OkrStore::load_from_dir(&opts.okrs_dir)?;
    let (objective, kr) = select_org_kr(
        &store,
        opts.objective_id.as_deref(),
        opts.kr_id.as_deref(),
    )?;
    if kr.metric_key.is_empty() {
        return Err(format!("selected KR {} has no metric_key", kr.id));
    }

    let direction = if kr.target < kr.baseline {
        "decrease"
    } else {
        "increase"
    };
    let delta = kr.target - kr.baseline;

    let plan = Plan {
        id: format!("PLAN-{as_of_date}"),
        as_of: as_of_date.clone(),
        generated_at: format_utc_seconds(Utc::now()),
        okrs_dir: opts.okrs_dir.display().to_string(),
        items: vec![PlanItem {
            id: "ITEM-1".to_string(),
            objective_id: objective.id.clone(),
            kr_id: kr.id.clone(),
            hypothesis: format!(
                "If we execute this task, {} will {direction} from {} toward {} (delta {delta}).",
                kr.metric_key, kr.baseline, kr.target,
            ),
            task: format!("Deliver work that advances KR {}: {}", kr.id, kr.description),
            agent_role,
            expected_metric_change: ExpectedMetricChange {
                metric_key: kr.metric_key.clone(),
                direction: direction.to_string(),
                baseline: kr.baseline,
                target: kr.target,
                delta,
                rationale: kr.description.clone(),
                confidence: kr.confidence,
            },
            evidence_plan: vec![
                format!(
                    "Capture evidence for {} and attach references in result.json.",
                    kr.metric_key
                ),
                "Run `okra kr measure` to record a fresh metric snapshot.".to_string(),
                "Run `okra kr score` to verify progress against baseline/target.".to_string(),
            ],
        }],
    };
    validate_plan(&plan)?;

    let plan_path = opts.output_base_dir.join(&as_of_date).join("plan.json");
    super::io::write_plan(&plan_path, &plan)?;

    Ok(GenerateResult { plan, plan_path })
}

fn select_org_kr(
    store: &OkrStore,
    objective_id: Option<&str>,
    kr_id: Option<&str>,
) -> Result<(Objective, KeyResult), String> {
    if let Some(kr_id) = kr_id.filter(|id| !id.is_empty()) {
        let record = store
            .key_result(kr_id)
            .ok_or_else(|| format!("unknown kr_id: {kr_id}"))?;
        if record.scope != Scope::Org {
            return Err(format!("kr_id {kr_id} is not in org scope"));
        }
        return Ok((record.objective.clone(), record.key_result.clone()));
    }

    if let Some(objective_id) = objective_id.filter(|id| !id.is_empty()) {
        let record = store
            .objective(objective_id)
            .ok_or_else(|| format!("unknown objective_id: {objective_id}"))?;
        if record.scope != Scope::Org {
            return Err(format!("objective_id {objective_id} is not in org scope"));
        }
        for kr in &record.objective.key_results {
            if runnable(kr) {
                return Ok((record.objective.clone(), kr.clone()));
            }
        }
        return Err(format!(
            "objective_id {objective_id} has no runnable org key results"
        ));
    }

    for doc in store.org_documents() {
        for objective in &doc.objectives {
            for kr in &objective.key_results {
                if runnable(kr) {
                    return Ok((objective.clone(), kr.clone()));
                }
            }
        }
    }
    Err("no runnable org key results found".to_string())
}

fn runnable(kr: &KeyResult) -> bool {
    !kr.metric_key.is_empty() && kr.status != "achieved"
}
