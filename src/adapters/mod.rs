pub mod exec;
pub mod mock;

pub use exec::ExecAdapter;
pub use mock::MockAdapter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment key through which the result file location is handed to the
/// agent; an override in the per-item env wins over the default
/// `<artifacts_dir>/result.json`.
pub const RESULT_PATH_ENV: &str = "OKRA_AGENT_RESULT";

/// Conventional exit code recorded when an adapter run hits its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("workdir is not a directory: {path}")]
    WorkdirNotDirectory { path: String },
    #[error("adapter binary `{binary}` not found")]
    MissingBinary { binary: String },
    #[error("adapter io failure at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent run timed out after {timeout_secs}s (exit code {exit_code})")]
    Timeout {
        timeout_secs: u64,
        exit_code: i32,
        transcript: PathBuf,
    },
    #[error("agent exited with code {exit_code} (transcript: {})", transcript.display())]
    NonZeroExit { exit_code: i32, transcript: PathBuf },
}

impl AdapterError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AdapterError::Timeout { exit_code, .. }
            | AdapterError::NonZeroExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn transcript(&self) -> Option<&Path> {
        match self {
            AdapterError::Timeout { transcript, .. }
            | AdapterError::NonZeroExit { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}

/// Configuration for one agent execution.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub prompt_path: PathBuf,
    pub workdir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl RunSpec {
    /// The result file the agent is expected to write.
    pub fn result_path(&self) -> PathBuf {
        match self.env.get(RESULT_PATH_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.artifacts_dir.join("result.json"),
        }
    }
}

/// What a completed adapter run produced. Failed runs surface their exit
/// code and transcript through the error instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub transcript_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub summary_path: PathBuf,
}

/// The seam between the plan runner and whatever executes agent work. Both
/// shipped implementations satisfy the same contract; the runner never
/// cares which one it holds.
pub trait AgentAdapter {
    fn name(&self) -> &str;
    fn run(&self, spec: &RunSpec) -> Result<RunOutcome, AdapterError>;
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> AdapterError {
    AdapterError::Io {
        path: path.display().to_string(),
        source,
    }
}
