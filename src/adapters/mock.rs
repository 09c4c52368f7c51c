use super::{io_error, AdapterError, AgentAdapter, RunOutcome, RunSpec};
use std::fs;

/// Deterministic offline adapter: writes a transcript and a fixed, valid
/// result file without executing anything. Used for end-to-end exercise of
/// the scheduler and plan runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockAdapter;

impl AgentAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&self, spec: &RunSpec) -> Result<RunOutcome, AdapterError> {
        if spec.workdir.as_os_str().is_empty() {
            return Err(AdapterError::MissingField { field: "workdir" });
        }
        if spec.artifacts_dir.as_os_str().is_empty() {
            return Err(AdapterError::MissingField {
                field: "artifacts dir",
            });
        }

        fs::create_dir_all(&spec.artifacts_dir)
            .map_err(|source| io_error(&spec.artifacts_dir, source))?;

        let transcript_path = spec.artifacts_dir.join("transcript.log");
        fs::write(&transcript_path, "mock adapter: no agent executed\n")
            .map_err(|source| io_error(&transcript_path, source))?;

        let result_path = spec.result_path();
        let metric_key = spec
            .env
            .get("OKRA_METRIC_KEY")
            .cloned()
            .unwrap_or_default();
        let payload = serde_json::json!({
            "schema_version": "1.0",
            "summary": "mock run completed (no changes applied)",
            "proposed_changes": [],
            "kr_targets": [],
            "kr_impact_claim": format!("No claim (mock adapter). Metric key: {metric_key}."),
        });
        let mut body = serde_json::to_vec_pretty(&payload)
            .map_err(|source| io_error(&result_path, std::io::Error::other(source)))?;
        body.push(b'\n');
        fs::write(&result_path, body).map_err(|source| io_error(&result_path, source))?;

        Ok(RunOutcome {
            exit_code: 0,
            transcript_path,
            artifacts_dir: spec.artifacts_dir.clone(),
            summary_path: result_path,
        })
    }
}
