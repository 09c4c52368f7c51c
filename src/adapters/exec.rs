use super::{io_error, AdapterError, AgentAdapter, RunOutcome, RunSpec, TIMEOUT_EXIT_CODE};
use std::fs;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Drives an external agent executable. The prompt is streamed on stdin,
/// stdout and stderr both land in `<artifacts_dir>/transcript.log`
/// (truncated on start so reruns are clean), and the child environment is
/// the parent environment with the per-item overrides applied on top.
#[derive(Debug, Clone)]
pub struct ExecAdapter {
    pub binary: String,
    pub args: Vec<String>,
}

impl ExecAdapter {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }
}

impl AgentAdapter for ExecAdapter {
    fn name(&self) -> &str {
        "exec"
    }

    fn run(&self, spec: &RunSpec) -> Result<RunOutcome, AdapterError> {
        if spec.prompt_path.as_os_str().is_empty() {
            return Err(AdapterError::MissingField {
                field: "prompt path",
            });
        }
        if spec.workdir.as_os_str().is_empty() {
            return Err(AdapterError::MissingField { field: "workdir" });
        }
        if spec.artifacts_dir.as_os_str().is_empty() {
            return Err(AdapterError::MissingField {
                field: "artifacts dir",
            });
        }

        let workdir_meta =
            fs::metadata(&spec.workdir).map_err(|source| io_error(&spec.workdir, source))?;
        if !workdir_meta.is_dir() {
            return Err(AdapterError::WorkdirNotDirectory {
                path: spec.workdir.display().to_string(),
            });
        }
        fs::create_dir_all(&spec.artifacts_dir)
            .map_err(|source| io_error(&spec.artifacts_dir, source))?;

        let transcript_path = spec.artifacts_dir.join("transcript.log");
        let transcript = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&transcript_path)
            .map_err(|source| io_error(&transcript_path, source))?;
        let transcript_err = transcript
            .try_clone()
            .map_err(|source| io_error(&transcript_path, source))?;

        let prompt = fs::File::open(&spec.prompt_path)
            .map_err(|source| io_error(&spec.prompt_path, source))?;

        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::from(prompt))
            .stdout(Stdio::from(transcript))
            .stderr(Stdio::from(transcript_err));
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AdapterError::MissingBinary {
                    binary: self.binary.clone(),
                })
            }
            Err(err) => return Err(io_error(&spec.workdir, err)),
        };

        let start = Instant::now();
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(timeout) = spec.timeout {
                        if start.elapsed() > timeout {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(AdapterError::Timeout {
                                timeout_secs: timeout.as_secs(),
                                exit_code: TIMEOUT_EXIT_CODE,
                                transcript: transcript_path,
                            });
                        }
                    }
                    thread::sleep(Duration::from_millis(25));
                }
                Err(err) => return Err(io_error(&spec.workdir, err)),
            }
        };

        let exit_code = exit_status.code().unwrap_or(-1);
        if !exit_status.success() {
            return Err(AdapterError::NonZeroExit {
                exit_code,
                transcript: transcript_path,
            });
        }

        Ok(RunOutcome {
            exit_code,
            transcript_path,
            artifacts_dir: spec.artifacts_dir.clone(),
            summary_path: spec.result_path(),
        })
    }
}

/// Resolves the adapter named in settings into a boxed implementation.
pub fn resolve_adapter(
    name: &str,
    command: Option<&str>,
    args: &[String],
) -> Result<Box<dyn AgentAdapter>, String> {
    match name {
        "mock" => Ok(Box::new(super::MockAdapter)),
        "exec" => {
            let binary = command
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
                .ok_or_else(|| "adapter command is required for `exec`".to_string())?;
            Ok(Box::new(ExecAdapter::new(
                binary.to_string(),
                args.to_vec(),
            )))
        }
        other => Err(format!("unknown adapter: {other}")),
    }
}
