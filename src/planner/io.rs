use super::types::Plan;
use super::validate::validate_plan;
use std::fs;
use std::path::{Path, PathBuf};

pub fn load_plan(path: &Path) -> Result<Plan, String> {
    let data = fs::read(path).map_err(|err| format!("read plan: {err}"))?;
    let plan: Plan =
        serde_json::from_slice(&data).map_err(|err| format!("parse plan json: {err}"))?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Written with two-space indentation and a trailing newline so generated
/// plans are byte-stable across runs.
pub fn write_plan(path: &Path, plan: &Plan) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| format!("ensure plan dir: {err}"))?;
    }
    let mut body =
        serde_json::to_vec_pretty(plan).map_err(|err| format!("marshal plan: {err}"))?;
    body.push(b'\n');
    fs::write(path, body).map_err(|err| format!("write plan: {err}"))
}

/// Accepts either a plan file or the directory holding `plan.json`.
pub fn resolve_plan_path(input: &Path) -> Result<PathBuf, String> {
    if input.as_os_str().is_empty() {
        return Err("plan path is required".to_string());
    }
    let info = fs::metadata(input).map_err(|err| format!("stat plan path: {err}"))?;
    if info.is_dir() {
        Ok(input.join("plan.json"))
    } else {
        Ok(input.to_path_buf())
    }
}
