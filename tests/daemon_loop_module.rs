use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use okra::audit::AuditLog;
use okra::config::Settings;
use okra::daemon::store::{JobStatus, Store};
use okra::daemon::{Daemon, DaemonConfig, JOB_PLAN_EXECUTE};
use okra::planner::{write_plan, ExpectedMetricChange, Plan, PlanItem};
use okra::workspace::Workspace;
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn test_settings() -> Settings {
    Settings {
        lease_owner: Some("daemon-test".to_string()),
        ..Settings::default()
    }
}

fn seeded_workspace(dir: &std::path::Path) -> Workspace {
    let workspace = Workspace::at(dir);
    workspace.ensure_dirs().expect("ensure dirs");
    workspace
}

fn write_sample_plan(workspace: &Workspace) -> std::path::PathBuf {
    let plan = Plan {
        id: "PLAN-2024-01-01".to_string(),
        as_of: "2024-01-01".to_string(),
        generated_at: "2024-01-01T00:00:00Z".to_string(),
        okrs_dir: "okrs".to_string(),
        items: vec![PlanItem {
            id: "ITEM-1".to_string(),
            objective_id: "OBJ-1".to_string(),
            kr_id: "KR-1".to_string(),
            hypothesis: "Doing the task moves the metric.".to_string(),
            task: "Do the task.".to_string(),
            agent_role: "software_engineer".to_string(),
            expected_metric_change: ExpectedMetricChange {
                metric_key: "manual.users".to_string(),
                direction: "increase".to_string(),
                baseline: 1.0,
                target: 2.0,
                delta: 1.0,
                rationale: String::new(),
                confidence: 0.0,
            },
            evidence_plan: Vec::new(),
        }],
    };
    let path = workspace.plans_dir().join("2024-01-01/plan.json");
    write_plan(&path, &plan).expect("write plan");
    path
}

#[test]
fn claim_and_execute_runs_a_plan_job_to_success() {
    let dir = tempdir().expect("tempdir");
    let workspace = seeded_workspace(dir.path());
    let plan_path = write_sample_plan(&workspace);

    let daemon = Daemon::new(DaemonConfig {
        workspace: workspace.clone(),
        settings: test_settings(),
    })
    .expect("daemon");

    let at = Utc::now() - ChronoDuration::seconds(5);
    daemon
        .store()
        .enqueue_unique(
            JOB_PLAN_EXECUTE,
            at,
            &json!({
                "adapter": "mock",
                "plan_path": plan_path.display().to_string(),
            }),
        )
        .expect("enqueue");

    let stop = AtomicBool::new(false);
    daemon.claim_and_execute(&stop).expect("execute");

    let completed = daemon
        .store()
        .list_recent_completed(10)
        .expect("completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, JobStatus::Succeeded);
    assert_eq!(completed[0].lease_owner, "daemon-test");
    let result: serde_json::Value =
        serde_json::from_str(&completed[0].result_json).expect("result");
    assert_eq!(result["items_total"], 1);
    assert_eq!(result["items_succeeded"], 1);

    let audit = AuditLog::new(&workspace.audit_db_path);
    let types: Vec<String> = audit
        .recent_events(20)
        .expect("events")
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert!(types.contains(&"job_started".to_string()));
    assert!(types.contains(&"job_succeeded".to_string()));
    assert!(types.contains(&"plan_item_started".to_string()));
    assert!(types.contains(&"plan_item_finished".to_string()));
}

#[test]
fn jobs_without_a_handler_fail_loudly() {
    let dir = tempdir().expect("tempdir");
    let workspace = seeded_workspace(dir.path());

    let daemon = Daemon::new(DaemonConfig {
        workspace: workspace.clone(),
        settings: test_settings(),
    })
    .expect("daemon");

    let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    daemon
        .store()
        .enqueue_unique("mystery_job", at, &json!({}))
        .expect("enqueue");

    let stop = AtomicBool::new(false);
    let err = daemon
        .claim_and_execute(&stop)
        .expect_err("missing handler is an error");
    assert!(err.contains("no handler"));

    let completed = daemon
        .store()
        .list_recent_completed(10)
        .expect("completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, JobStatus::Failed);
    assert!(completed[0].result_json.contains("no handler"));

    let audit = AuditLog::new(&workspace.audit_db_path);
    assert!(audit
        .recent_events(20)
        .expect("events")
        .iter()
        .any(|event| event.event_type == "job_failed"));
}

#[test]
fn registered_handlers_are_dispatched_by_type() {
    let dir = tempdir().expect("tempdir");
    let workspace = seeded_workspace(dir.path());

    let mut daemon = Daemon::new(DaemonConfig {
        workspace,
        settings: test_settings(),
    })
    .expect("daemon");
    daemon.register_handler("echo", |_ctx, _workspace, job| {
        Ok(json!({ "echoed": job.payload_json }))
    });

    let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    daemon
        .store()
        .enqueue_unique("echo", at, &json!({"hello": "world"}))
        .expect("enqueue");

    let stop = AtomicBool::new(false);
    daemon.claim_and_execute(&stop).expect("execute");

    let completed = daemon
        .store()
        .list_recent_completed(10)
        .expect("completed");
    assert_eq!(completed[0].status, JobStatus::Succeeded);
    assert!(completed[0].result_json.contains("hello"));
}

#[test]
fn run_loop_processes_jobs_and_stops_cleanly() {
    let dir = tempdir().expect("tempdir");
    let workspace = seeded_workspace(dir.path());
    let plan_path = write_sample_plan(&workspace);

    let daemon = Daemon::new(DaemonConfig {
        workspace: workspace.clone(),
        settings: test_settings(),
    })
    .expect("daemon");
    daemon
        .store()
        .enqueue_unique(
            JOB_PLAN_EXECUTE,
            Utc::now() - ChronoDuration::seconds(5),
            &json!({
                "adapter": "mock",
                "plan_path": plan_path.display().to_string(),
            }),
        )
        .expect("enqueue");

    let store = Store::open(&workspace.state_db_path).expect("open observer store");
    let stop = Arc::new(AtomicBool::new(false));
    let handle = thread::spawn({
        let stop = stop.clone();
        move || daemon.run(&stop)
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let completed = store.list_recent_completed(10).expect("completed");
        if !completed.is_empty() {
            assert_eq!(completed[0].status, JobStatus::Succeeded);
            break;
        }
        assert!(
            Instant::now() < deadline,
            "daemon never completed the queued job"
        );
        thread::sleep(Duration::from_millis(50));
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().expect("join daemon").expect("clean shutdown");

    let audit = AuditLog::new(&workspace.audit_db_path);
    let types: Vec<String> = audit
        .recent_events(50)
        .expect("events")
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert!(types.contains(&"daemon_started".to_string()));
    assert!(types.contains(&"daemon_stopped".to_string()));
}

#[test]
fn daemon_requires_valid_settings() {
    let dir = tempdir().expect("tempdir");
    let workspace = seeded_workspace(dir.path());
    fs::write(
        workspace.root.join("okra.yml"),
        "timezone: Not/AZone\n",
    )
    .expect("write settings");

    let settings = Settings {
        timezone: "Not/AZone".to_string(),
        ..Settings::default()
    };
    let err = Daemon::new(DaemonConfig {
        workspace,
        settings,
    })
    .expect_err("bad timezone is fatal at start");
    assert!(err.contains("invalid timezone") || err.contains("daemon settings"));
}
