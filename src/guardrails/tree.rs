use crate::shared::hash::{hash_file, hex_encode};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const PROTECTED_SUBTREE: &str = "okrs";
pub const VIOLATION_PROTECTED_TREE: &str = "protected_tree_modified";

/// Content fingerprint of a directory subtree: the hash of the sorted
/// sequence of `(relative_path, file_hash)` pairs. An absent directory
/// fingerprints to the empty string so creation is detected as a change.
pub fn snapshot_tree_hash(dir: &Path) -> Result<String, String> {
    let metadata = match fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(format!("stat {}: {err}", dir.display())),
    };
    if !metadata.is_dir() {
        return Err(format!("not a directory: {}", dir.display()));
    }

    let mut files = Vec::new();
    walk_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for rel_path in &files {
        let file_hash =
            hash_file(&dir.join(rel_path)).map_err(|err| format!("hash {rel_path}: {err}"))?;
        hasher.update(rel_path.as_bytes());
        hasher.update(file_hash.as_bytes());
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), String> {
    let entries =
        fs::read_dir(dir).map_err(|err| format!("read {}: {err}", dir.display()))?;
    for entry in entries {
        let entry = entry.map_err(|err| format!("read {}: {err}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| format!("stat {}: {err}", path.display()))?;
        if file_type.is_dir() {
            walk_files(root, &path, out)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map_err(|err| format!("relativize {}: {err}", path.display()))?;
        out.push(rel.display().to_string());
    }
    Ok(())
}

/// Before/after integrity check over the protected OKR subtree. The agent
/// subprocess may read the tree freely; any content difference between the
/// two snapshots is a guardrail violation.
#[derive(Debug, Clone)]
pub struct ProtectedTreeCheck {
    workspace_root: PathBuf,
    protected_dir: PathBuf,
    before_hash: String,
    after_hash: Option<String>,
}

impl ProtectedTreeCheck {
    pub fn capture_before(workspace_root: &Path) -> Result<Self, String> {
        let protected_dir = workspace_root.join(PROTECTED_SUBTREE);
        let before_hash = snapshot_tree_hash(&protected_dir)
            .map_err(|err| format!("capture before snapshot: {err}"))?;
        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            protected_dir,
            before_hash,
            after_hash: None,
        })
    }

    pub fn capture_after(&mut self) -> Result<(), String> {
        let after = snapshot_tree_hash(&self.protected_dir)
            .map_err(|err| format!("capture after snapshot: {err}"))?;
        self.after_hash = Some(after);
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        match &self.after_hash {
            Some(after) => *after != self.before_hash,
            None => false,
        }
    }

    /// Coarse change description; the fingerprint does not retain per-file
    /// detail, only that the subtree as a whole diverged.
    pub fn changed_paths(&self) -> Vec<String> {
        if self.has_changes() {
            vec![format!("{PROTECTED_SUBTREE}/ subtree modified (hash mismatch)")]
        } else {
            Vec::new()
        }
    }

    /// Attempts to restore the protected subtree from version control.
    /// Requires the workspace to be a git work tree; failure is reported,
    /// not panicked, so the caller can record it in the violation file.
    pub fn revert(&self) -> Result<(), String> {
        let inside_repo = Command::new("git")
            .args(["-C"])
            .arg(&self.workspace_root)
            .args(["rev-parse", "--git-dir"])
            .output()
            .map_err(|err| format!("run git: {err}"))?
            .status
            .success();
        if !inside_repo {
            return Err(
                "workspace is not a git repository, cannot revert okrs/ changes".to_string(),
            );
        }

        let output = Command::new("git")
            .args(["-C"])
            .arg(&self.workspace_root)
            .args(["checkout", "--", PROTECTED_SUBTREE])
            .output()
            .map_err(|err| format!("run git checkout: {err}"))?;
        if !output.status.success() {
            return Err(format!(
                "git checkout failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        if !self.protected_dir.is_dir() {
            return Err(format!(
                "{PROTECTED_SUBTREE}/ directory missing after revert"
            ));
        }
        Ok(())
    }
}

/// Writes `violation.json` into an item directory. Two-space indentation
/// and a trailing newline, like every other generated artifact.
pub fn write_violation(
    artifacts_dir: &Path,
    violation_type: &str,
    details: serde_json::Value,
) -> Result<PathBuf, String> {
    let violation = serde_json::json!({
        "violation_type": violation_type,
        "details": details,
    });
    let mut body = serde_json::to_vec_pretty(&violation)
        .map_err(|err| format!("encode violation: {err}"))?;
    body.push(b'\n');
    let path = artifacts_dir.join("violation.json");
    fs::write(&path, body).map_err(|err| format!("write {}: {err}", path.display()))?;
    Ok(path)
}

/// Strips newlines and truncates a message so it embeds safely in JSON
/// artifacts.
pub fn sanitize_error_message(message: &str) -> String {
    let flat = message.replace(['\n', '\r'], " ");
    if flat.len() > 500 {
        let mut end = 497;
        while !flat.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &flat[..end])
    } else {
        flat
    }
}
