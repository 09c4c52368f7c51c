use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace root is required")]
    RootMissing,
    #[error("workspace root {path} is not accessible: {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("workspace root is not a directory: {path}")]
    RootNotDirectory { path: String },
    #[error("failed to resolve home directory")]
    HomeDirectoryUnavailable,
    #[error("unsupported home expansion: {path}")]
    UnsupportedHomeExpansion { path: String },
    #[error("failed to create workspace directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Workspace-relative paths for okra operations. The layout is an on-disk
/// contract shared with agents and external tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub okrs_dir: PathBuf,
    pub culture_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub audit_db_path: PathBuf,
    pub state_db_path: PathBuf,
}

impl Workspace {
    /// Expands and validates the workspace root, requiring it to exist.
    pub fn resolve(root: &str) -> Result<Self, WorkspaceError> {
        let abs = resolve_root(root)?;
        let info = fs::metadata(&abs).map_err(|source| WorkspaceError::RootUnavailable {
            path: abs.display().to_string(),
            source,
        })?;
        if !info.is_dir() {
            return Err(WorkspaceError::RootNotDirectory {
                path: abs.display().to_string(),
            });
        }
        Ok(Self::at(abs))
    }

    /// Resolves the workspace root without requiring it to exist.
    pub fn resolve_root(root: &str) -> Result<PathBuf, WorkspaceError> {
        resolve_root(root)
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            okrs_dir: root.join("okrs"),
            culture_dir: root.join("culture"),
            metrics_dir: root.join("metrics"),
            artifacts_dir: root.join("artifacts"),
            audit_dir: root.join("audit"),
            audit_db_path: root.join("audit/audit.sqlite"),
            state_db_path: root.join("audit/daemon.sqlite"),
            root,
        }
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.artifacts_dir.join("plans")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.artifacts_dir.join("runs")
    }

    pub fn proposals_dir(&self) -> PathBuf {
        self.artifacts_dir.join("proposals")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.metrics_dir.join("snapshots")
    }

    pub fn manual_metrics_path(&self) -> PathBuf {
        self.metrics_dir.join("manual.yml")
    }

    /// Creates the standard artifact and audit directories.
    pub fn ensure_dirs(&self) -> Result<(), WorkspaceError> {
        let dirs = [
            self.okrs_dir.clone(),
            self.culture_dir.clone(),
            self.artifacts_dir.clone(),
            self.audit_dir.clone(),
            self.snapshots_dir(),
            self.plans_dir(),
            self.runs_dir(),
            self.proposals_dir(),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|source| WorkspaceError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Returns an absolute path, resolving relative paths from the root.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Ok(PathBuf::new());
        }
        let expanded = expand_home(trimmed)?;
        if expanded.is_absolute() {
            return Ok(normalize(&expanded));
        }
        Ok(normalize(&self.root.join(expanded)))
    }
}

fn resolve_root(root: &str) -> Result<PathBuf, WorkspaceError> {
    let trimmed = root.trim();
    if trimmed.is_empty() {
        return Err(WorkspaceError::RootMissing);
    }
    let expanded = expand_home(trimmed)?;
    if expanded.is_absolute() {
        return Ok(normalize(&expanded));
    }
    let cwd = std::env::current_dir().map_err(|source| WorkspaceError::RootUnavailable {
        path: trimmed.to_string(),
        source,
    })?;
    Ok(normalize(&cwd.join(expanded)))
}

fn expand_home(path: &str) -> Result<PathBuf, WorkspaceError> {
    if !path.starts_with('~') {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(WorkspaceError::HomeDirectoryUnavailable)?;
    if path == "~" {
        return Ok(home);
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(home.join(rest));
    }
    Err(WorkspaceError::UnsupportedHomeExpansion {
        path: path.to_string(),
    })
}

/// Lexical cleanup of `.` and `..` components. The root may not exist yet,
/// so `fs::canonicalize` is not an option here.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
