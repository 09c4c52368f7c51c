use okra::adapters::{
    AdapterError, AgentAdapter, ExecAdapter, MockAdapter, RunSpec, RESULT_PATH_ENV,
    TIMEOUT_EXIT_CODE,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn spec_in(dir: &Path) -> RunSpec {
    let prompt = dir.join("prompt.md");
    fs::write(&prompt, "# prompt\n").expect("write prompt");
    RunSpec {
        prompt_path: prompt,
        workdir: dir.to_path_buf(),
        artifacts_dir: dir.join("artifacts"),
        env: BTreeMap::new(),
        timeout: None,
    }
}

#[test]
fn mock_adapter_writes_a_valid_result_and_transcript() {
    let dir = tempdir().expect("tempdir");
    let spec = spec_in(dir.path());

    let outcome = MockAdapter.run(&spec).expect("mock run");
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.transcript_path.exists());
    assert!(outcome.summary_path.exists());

    let result: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&outcome.summary_path).expect("read result"),
    )
    .expect("parse result");
    assert_eq!(result["schema_version"], "1.0");
    assert!(okra::guardrails::result::validate_result_value(&result).is_ok());
}

#[test]
fn mock_adapter_honours_the_result_path_override() {
    let dir = tempdir().expect("tempdir");
    let mut spec = spec_in(dir.path());
    let override_path = dir.path().join("elsewhere/out.json");
    fs::create_dir_all(override_path.parent().expect("parent")).expect("mkdir");
    spec.env.insert(
        RESULT_PATH_ENV.to_string(),
        override_path.display().to_string(),
    );

    let outcome = MockAdapter.run(&spec).expect("mock run");
    assert_eq!(outcome.summary_path, override_path);
    assert!(override_path.exists());
}

#[test]
fn missing_binary_is_reported_as_such() {
    let dir = tempdir().expect("tempdir");
    let spec = spec_in(dir.path());
    let adapter = ExecAdapter::new("okra-no-such-binary", Vec::new());
    match adapter.run(&spec) {
        Err(AdapterError::MissingBinary { binary }) => {
            assert_eq!(binary, "okra-no-such-binary");
        }
        other => panic!("expected MissingBinary, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn exec_adapter_streams_prompt_and_captures_transcript() {
    let dir = tempdir().expect("tempdir");
    let spec = spec_in(dir.path());
    let script = dir.path().join("agent.sh");
    write_script(&script, "#!/bin/sh\ncat\necho done-marker\n");

    let adapter = ExecAdapter::new(script.display().to_string(), Vec::new());
    let outcome = adapter.run(&spec).expect("run");
    assert_eq!(outcome.exit_code, 0);

    let transcript = fs::read_to_string(&outcome.transcript_path).expect("read transcript");
    assert!(transcript.contains("# prompt"), "stdin carries the prompt");
    assert!(transcript.contains("done-marker"));
}

#[cfg(unix)]
#[test]
fn exec_adapter_truncates_the_transcript_between_runs() {
    let dir = tempdir().expect("tempdir");
    let spec = spec_in(dir.path());
    let script = dir.path().join("agent.sh");
    write_script(&script, "#!/bin/sh\ncat > /dev/null\necho run-marker\n");

    let adapter = ExecAdapter::new(script.display().to_string(), Vec::new());
    adapter.run(&spec).expect("first run");
    adapter.run(&spec).expect("second run");

    let transcript =
        fs::read_to_string(spec.artifacts_dir.join("transcript.log")).expect("read");
    assert_eq!(
        transcript.matches("run-marker").count(),
        1,
        "reruns start from a clean transcript"
    );
}

#[cfg(unix)]
#[test]
fn exec_adapter_env_overrides_win_over_the_parent_env() {
    let dir = tempdir().expect("tempdir");
    let mut spec = spec_in(dir.path());
    spec.env
        .insert("OKRA_METRIC_KEY".to_string(), "ci.pass_rate_30d".to_string());
    // PATH exists in the parent environment; the override must win.
    spec.env.insert("PATH".to_string(), "/okra-test-path".to_string());

    let script = dir.path().join("agent.sh");
    write_script(
        &script,
        "#!/bin/sh\ncat > /dev/null\necho \"metric=$OKRA_METRIC_KEY path=$PATH\"\n",
    );

    let adapter = ExecAdapter::new(script.display().to_string(), Vec::new());
    let outcome = adapter.run(&spec).expect("run");
    let transcript = fs::read_to_string(&outcome.transcript_path).expect("read");
    assert!(transcript.contains("metric=ci.pass_rate_30d"));
    assert!(transcript.contains("path=/okra-test-path"));
}

#[cfg(unix)]
#[test]
fn exec_adapter_times_out_with_the_conventional_exit_code() {
    let dir = tempdir().expect("tempdir");
    let mut spec = spec_in(dir.path());
    spec.timeout = Some(Duration::from_millis(200));

    let script = dir.path().join("agent.sh");
    write_script(&script, "#!/bin/sh\ncat > /dev/null\nsleep 5\n");

    let adapter = ExecAdapter::new(script.display().to_string(), Vec::new());
    match adapter.run(&spec) {
        Err(err @ AdapterError::Timeout { .. }) => {
            assert_eq!(err.exit_code(), Some(TIMEOUT_EXIT_CODE));
            assert!(err.transcript().is_some());
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn exec_adapter_surfaces_nonzero_exit_with_transcript() {
    let dir = tempdir().expect("tempdir");
    let spec = spec_in(dir.path());
    let script = dir.path().join("agent.sh");
    write_script(&script, "#!/bin/sh\ncat > /dev/null\necho boom >&2\nexit 9\n");

    let adapter = ExecAdapter::new(script.display().to_string(), Vec::new());
    match adapter.run(&spec) {
        Err(err @ AdapterError::NonZeroExit { .. }) => {
            assert_eq!(err.exit_code(), Some(9));
            let transcript =
                fs::read_to_string(err.transcript().expect("transcript")).expect("read");
            assert!(transcript.contains("boom"), "stderr lands in the transcript");
        }
        other => panic!("expected NonZeroExit, got {other:?}"),
    }
}
