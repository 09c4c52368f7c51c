use crate::audit::AuditLog;
use crate::config::Settings;
use crate::daemon::handlers::{default_handlers, HandlerContext, HandlerFunc};
use crate::daemon::schedule::Scheduler;
use crate::daemon::store::{Job, Store};
use crate::notify::Notifier;
use crate::shared::logging::append_daemon_log;
use crate::workspace::Workspace;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace: Workspace,
    pub settings: Settings,
}

/// A long-running process bound to one workspace: every poll tick it
/// materialises due scheduled jobs, claims at most one ready job under a
/// lease, and dispatches it to its typed handler. Parallelism comes from
/// running more instances against the same store, each with a distinct
/// lease owner; they serialise on the transactional claim.
#[derive(Debug)]
pub struct Daemon {
    workspace: Workspace,
    settings: Settings,
    store: Store,
    scheduler: Scheduler,
    handlers: BTreeMap<String, HandlerFunc>,
    audit: AuditLog,
    notifier: Notifier,
    lease_owner: String,
    lease_for: chrono::Duration,
    poll_interval: Duration,
}

impl Daemon {
    pub fn new(cfg: DaemonConfig) -> Result<Self, String> {
        let DaemonConfig {
            workspace,
            settings,
        } = cfg;
        settings
            .validate()
            .map_err(|err| format!("daemon settings: {err}"))?;

        let store = Store::open_with_claim(&workspace.state_db_path, settings.claim.clone())
            .map_err(|err| format!("open store: {err}"))?;
        let scheduler = Scheduler::new(store.clone(), &settings.timezone)
            .map_err(|err| format!("create scheduler: {err}"))?;

        let lease_owner = settings
            .lease_owner
            .clone()
            .filter(|owner| !owner.trim().is_empty())
            .unwrap_or_else(default_lease_owner);

        Ok(Self {
            audit: AuditLog::new(&workspace.audit_db_path),
            notifier: Notifier::new(settings.notifications),
            lease_owner,
            lease_for: chrono::Duration::seconds(settings.lease_seconds as i64),
            poll_interval: Duration::from_secs(settings.poll_seconds),
            handlers: default_handlers(),
            store,
            scheduler,
            workspace,
            settings,
        })
    }

    pub fn register_handler(&mut self, job_type: &str, handler: HandlerFunc) {
        self.handlers.insert(job_type.to_string(), handler);
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn lease_owner(&self) -> &str {
        &self.lease_owner
    }

    /// The main loop. Runs until the stop flag is raised; an in-flight
    /// handler finishes before the loop returns.
    pub fn run(&self, stop: &AtomicBool) -> Result<(), String> {
        let start_payload = json!({
            "workspace": self.workspace.root.display().to_string(),
            "lease_owner": self.lease_owner,
            "lease_seconds": self.settings.lease_seconds,
            "poll_seconds": self.settings.poll_seconds,
        });
        self.audit_event("daemon_started", &start_payload);
        self.log("info", "daemon.started", &format!("owner={}", self.lease_owner));

        while !stop.load(Ordering::Relaxed) {
            // Scheduler problems are retried next tick, never fatal.
            if let Err(err) = self.scheduler.tick(Utc::now()) {
                self.log("warn", "scheduler.tick_failed", &err);
            }

            if let Err(err) = self.claim_and_execute(stop) {
                self.log("warn", "job.execute_failed", &err);
            }

            sleep_with_stop(stop, self.poll_interval);
        }

        let stop_payload = json!({
            "workspace": self.workspace.root.display().to_string(),
        });
        self.audit_event("daemon_stopped", &stop_payload);
        self.log("info", "daemon.stopped", "runtime stopped cleanly");
        Ok(())
    }

    /// Claims at most one ready job and runs it to a terminal state. The
    /// stop flag is forwarded to the handler so shutdown can short-circuit
    /// long-running work.
    pub fn claim_and_execute(&self, stop: &AtomicBool) -> Result<(), String> {
        let job = self
            .store
            .claim_next(Utc::now(), &self.lease_owner, self.lease_for)
            .map_err(|err| format!("claim job: {err}"))?;
        let Some(job) = job else {
            return Ok(());
        };

        self.audit_event(
            "job_started",
            &json!({
                "job_id": job.id,
                "job_type": job.job_type,
                "payload": job.payload_json,
            }),
        );

        let Some(handler) = self.handlers.get(&job.job_type) else {
            let message = format!("no handler for job type: {}", job.job_type);
            self.fail_job(&job, &message);
            return Err(message);
        };

        let ctx = HandlerContext {
            store: &self.store,
            audit: &self.audit,
            notifier: &self.notifier,
            settings: &self.settings,
            stop,
        };

        match handler(&ctx, &self.workspace, &job) {
            Ok(result) => {
                self.store
                    .succeed(&job.id, &result)
                    .map_err(|err| format!("mark job succeeded: {err}"))?;
                self.audit_event(
                    "job_succeeded",
                    &json!({
                        "job_id": job.id,
                        "job_type": job.job_type,
                        "result": result,
                    }),
                );
                Ok(())
            }
            Err(message) => {
                self.fail_job(&job, &message);
                Err(message)
            }
        }
    }

    fn fail_job(&self, job: &Job, message: &str) {
        if let Err(err) = self.store.fail(&job.id, message) {
            self.log("error", "job.fail_mark_failed", &format!("job={} error={err}", job.id));
        }
        self.audit_event(
            "job_failed",
            &json!({
                "job_id": job.id,
                "job_type": job.job_type,
                "error": message,
            }),
        );
    }

    fn audit_event(&self, event_type: &str, payload: &serde_json::Value) {
        if let Err(err) = self.audit.log_event("daemon", event_type, payload) {
            self.log("warn", "audit.log_failed", &err.to_string());
        }
    }

    fn log(&self, level: &str, event: &str, message: &str) {
        let _ = append_daemon_log(&self.workspace.audit_dir, level, event, message);
    }
}

fn default_lease_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("daemon-{host}-{}", std::process::id())
}

fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(100));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}
