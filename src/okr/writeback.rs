use super::load::{yaml_files, OkrStore};
use super::permissions::{load_permissions_for_dir, PermissionConfig};
use crate::shared::timefmt::format_utc_seconds;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Describes a stored OKR proposal package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalMetadata {
    pub id: String,
    pub agent_id: String,
    pub created_at: String,
    pub okrs_dir: String,
    pub proposal_dir: String,
    pub updates_dir: String,
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

/// Validates updated OKRs, enforces permissions, and writes a proposal
/// package (copied YAMLs + diff + metadata) under the proposals root.
/// Direct edits to `okrs/` are never allowed; agents stage updates in a
/// separate directory and humans apply them.
pub fn create_proposal(
    agent_id: &str,
    updates_dir: &Path,
    okrs_dir: &Path,
    proposals_root: &Path,
    note: &str,
) -> Result<ProposalMetadata, String> {
    let agent_id = agent_id.trim();
    if agent_id.is_empty() {
        return Err("agent id is required".to_string());
    }
    if updates_dir.as_os_str().is_empty() {
        return Err("updates directory is required".to_string());
    }
    if !updates_dir.exists() {
        return Err(format!(
            "updates directory: {} does not exist",
            updates_dir.display()
        ));
    }
    if !okrs_dir.exists() {
        return Err(format!("okrs directory: {} does not exist", okrs_dir.display()));
    }
    if same_path(updates_dir, okrs_dir) {
        return Err(
            "updates directory must differ from okrs directory; direct edits to okrs/ are not allowed"
                .to_string(),
        );
    }

    enforce_permissions(agent_id, updates_dir, okrs_dir)?;

    fs::create_dir_all(proposals_root)
        .map_err(|err| format!("create proposals root: {err}"))?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let proposal_id = format!("{timestamp}-{}", sanitize(agent_id));
    let proposal_dir = proposals_root.join(&proposal_id);
    fs::create_dir_all(&proposal_dir).map_err(|err| format!("create proposal dir: {err}"))?;

    let built = build_proposal(
        agent_id,
        updates_dir,
        okrs_dir,
        &proposal_dir,
        &proposal_id,
        note,
    );
    if built.is_err() {
        let _ = fs::remove_dir_all(&proposal_dir);
    }
    built
}

fn build_proposal(
    agent_id: &str,
    updates_dir: &Path,
    okrs_dir: &Path,
    proposal_dir: &Path,
    proposal_id: &str,
    note: &str,
) -> Result<ProposalMetadata, String> {
    let update_files = yaml_files(updates_dir)?;
    if update_files.is_empty() {
        return Err(format!("no YAML files found in {}", updates_dir.display()));
    }

    let mut copied = Vec::new();
    for src in &update_files {
        let name = src
            .file_name()
            .ok_or_else(|| format!("invalid update file name: {}", src.display()))?;
        let dst = proposal_dir.join(name);
        fs::copy(src, &dst).map_err(|err| format!("copy {}: {err}", src.display()))?;
        copied.push(name.to_string_lossy().to_string());
    }

    let diff_file = render_diff(&update_files, okrs_dir, proposal_dir)?;

    let meta = ProposalMetadata {
        id: proposal_id.to_string(),
        agent_id: agent_id.to_string(),
        created_at: format_utc_seconds(Utc::now()),
        okrs_dir: okrs_dir.display().to_string(),
        proposal_dir: proposal_dir.display().to_string(),
        updates_dir: updates_dir.display().to_string(),
        files: copied,
        diff_file,
        note: note.trim().to_string(),
    };
    write_proposal_metadata(&meta)?;
    Ok(meta)
}

/// Applies a validated proposal to the target okrs directory. Requires an
/// explicit confirmation flag from the caller.
pub fn apply_proposal(proposal_dir: &Path, confirm: bool) -> Result<ProposalMetadata, String> {
    if !confirm {
        return Err("apply requires --i-understand confirmation".to_string());
    }
    if proposal_dir.as_os_str().is_empty() {
        return Err("proposal path is required".to_string());
    }

    let meta = read_proposal_metadata(proposal_dir)?;
    let okrs_dir = PathBuf::from(&meta.okrs_dir);

    enforce_permissions(&meta.agent_id, proposal_dir, &okrs_dir)?;

    let store = OkrStore::load_from_dir(proposal_dir)
        .map_err(|err| format!("proposal validation failed: {err}"))?;
    if store.objective_count() == 0 {
        return Err("proposal contains no objectives".to_string());
    }
    if meta.files.is_empty() {
        return Err("proposal metadata lists no files to apply".to_string());
    }

    fs::create_dir_all(&okrs_dir).map_err(|err| format!("ensure okrs dir: {err}"))?;
    for file in &meta.files {
        let src = proposal_dir.join(file);
        let dst = okrs_dir.join(file);
        fs::copy(&src, &dst).map_err(|err| format!("apply {file}: {err}"))?;
    }

    Ok(meta)
}

/// Permission checks run against the staged documents: every objective and
/// key-result owner named in them must be writable by the proposing agent.
fn enforce_permissions(agent_id: &str, staged_dir: &Path, okrs_dir: &Path) -> Result<(), String> {
    let store = OkrStore::load_from_dir(staged_dir)
        .map_err(|err| format!("validate okrs: {err}"))?;
    let permissions = permissions_with_fallback(staged_dir, okrs_dir)
        .map_err(|err| format!("load permissions: {err}"))?;

    for record in store.objective_records() {
        let objective = &record.objective;
        if !objective.owner_id.is_empty() && !permissions.can_propose(agent_id, &objective.owner_id)
        {
            return Err(format!(
                "agent {agent_id} is not permitted to modify owner {}",
                objective.owner_id
            ));
        }
        for kr in &objective.key_results {
            if !permissions.can_propose(agent_id, &kr.owner_id) {
                return Err(format!(
                    "agent {agent_id} is not permitted to modify owner {}",
                    kr.owner_id
                ));
            }
        }
    }
    Ok(())
}

fn permissions_with_fallback(
    staged_dir: &Path,
    okrs_dir: &Path,
) -> Result<PermissionConfig, String> {
    let staged = staged_dir.join(super::load::PERMISSIONS_FILE_NAME);
    if staged.exists() {
        return PermissionConfig::load(&staged);
    }
    load_permissions_for_dir(okrs_dir)
}

fn render_diff(
    update_files: &[PathBuf],
    okrs_dir: &Path,
    proposal_dir: &Path,
) -> Result<String, String> {
    let mut sections = Vec::new();
    for src in update_files {
        let Some(name) = src.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let new_text =
            fs::read_to_string(src).map_err(|err| format!("read {}: {err}", src.display()))?;
        let old_text = fs::read_to_string(okrs_dir.join(name)).unwrap_or_default();
        let diff = unified_diff(
            &old_text,
            &new_text,
            &format!("okrs/{name}"),
            &format!("proposal/{name}"),
        );
        if !diff.trim().is_empty() {
            sections.push(diff);
        }
    }

    if sections.is_empty() {
        return Ok(String::new());
    }

    let diff_path = proposal_dir.join("changes.diff");
    fs::write(&diff_path, sections.join("\n"))
        .map_err(|err| format!("write diff: {err}"))?;
    Ok("changes.diff".to_string())
}

/// Minimal unified-style diff: the common prefix and suffix are elided and
/// the differing middle is emitted as one remove/add hunk. The corpus
/// carries no diff library and proposal review only needs a readable
/// before/after, not minimal hunks.
fn unified_diff(old_text: &str, new_text: &str, from_label: &str, to_label: &str) -> String {
    if old_text == new_text {
        return String::new();
    }

    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();

    let mut prefix = 0;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old_lines.len() - prefix
        && suffix < new_lines.len() - prefix
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let context = 3;
    let start = prefix.saturating_sub(context);
    let old_end = (old_lines.len() - suffix + context).min(old_lines.len());
    let new_end = (new_lines.len() - suffix + context).min(new_lines.len());

    let mut out = String::new();
    out.push_str(&format!("--- {from_label}\n"));
    out.push_str(&format!("+++ {to_label}\n"));
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        start + 1,
        old_end - start,
        start + 1,
        new_end - start,
    ));
    for line in &old_lines[start..prefix] {
        out.push_str(&format!(" {line}\n"));
    }
    for line in &old_lines[prefix..old_lines.len() - suffix] {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new_lines[prefix..new_lines.len() - suffix] {
        out.push_str(&format!("+{line}\n"));
    }
    for line in &old_lines[old_lines.len() - suffix..old_end] {
        out.push_str(&format!(" {line}\n"));
    }
    out
}

fn write_proposal_metadata(meta: &ProposalMetadata) -> Result<(), String> {
    let mut body =
        serde_json::to_vec_pretty(meta).map_err(|err| format!("encode proposal.json: {err}"))?;
    body.push(b'\n');
    let path = Path::new(&meta.proposal_dir).join("proposal.json");
    fs::write(&path, body).map_err(|err| format!("write proposal.json: {err}"))
}

fn read_proposal_metadata(proposal_dir: &Path) -> Result<ProposalMetadata, String> {
    let path = proposal_dir.join("proposal.json");
    let data = fs::read(&path).map_err(|err| format!("read proposal metadata: {err}"))?;
    let mut meta: ProposalMetadata =
        serde_json::from_slice(&data).map_err(|err| format!("parse proposal metadata: {err}"))?;
    if meta.proposal_dir.is_empty() {
        meta.proposal_dir = proposal_dir.display().to_string();
    }
    if meta.agent_id.is_empty() || meta.id.is_empty() {
        return Err("proposal metadata is missing required fields".to_string());
    }
    Ok(meta)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn sanitize(value: &str) -> String {
    let safe: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "agent".to_string()
    } else {
        safe
    }
}
