use crate::config::ClaimSettings;
use crate::shared::timefmt::{format_utc_seconds, parse_utc_seconds, truncate_to_second};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create store parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to encode job payload: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },
    #[error("invalid job status `{value}` in database")]
    InvalidStatus { value: String },
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    fn from_db(value: &str) -> Result<Self, StoreError> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// A durable unit of deferred work. One row exists per
/// `(job_type, scheduled_at)`; the id is derived from both so duplicate
/// emissions collide instead of duplicating.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub payload_json: String,
    pub result_json: String,
    pub lease_owner: String,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub summary_json: String,
}

/// SQLite-backed daemon state: jobs, KV, and run records. This is the only
/// coordination point between concurrent daemon instances; every mutation
/// goes through its transactional interface.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
    claim: ClaimSettings,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        Self::open_with_claim(db_path, ClaimSettings::default())
    }

    pub fn open_with_claim(db_path: &Path, claim: ClaimSettings) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            claim,
        };
        // Fail fast on an unusable path.
        let _ = store.connect()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Enqueues a job unless a row for `(job_type, scheduled_at)` already
    /// exists. `scheduled_at` is truncated to UTC seconds. Returns the job
    /// id and whether a new row was inserted.
    pub fn enqueue_unique(
        &self,
        job_type: &str,
        scheduled_at: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> Result<(String, bool), StoreError> {
        let scheduled_at = truncate_to_second(scheduled_at);
        let scheduled_str = format_utc_seconds(scheduled_at);
        let job_id = job_id_for(job_type, scheduled_at);
        let payload_json =
            serde_json::to_string(payload).map_err(|source| StoreError::Encode { source })?;

        let connection = self.connect()?;
        let inserted = connection
            .execute(
                "INSERT INTO jobs (id, type, status, scheduled_at, payload_json)
                 VALUES (?1, ?2, 'queued', ?3, ?4)
                 ON CONFLICT(type, scheduled_at) DO NOTHING",
                params![job_id, job_type, scheduled_str, payload_json],
            )
            .map_err(|source| StoreError::Sql { source })?;

        if inserted > 0 {
            return Ok((job_id, true));
        }

        let existing: String = connection
            .query_row(
                "SELECT id FROM jobs WHERE type = ?1 AND scheduled_at = ?2",
                params![job_type, scheduled_str],
                |row| row.get(0),
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok((existing, false))
    }

    /// Atomically claims the next ready job: the smallest
    /// `(scheduled_at, id)` queued row with `scheduled_at <= now` becomes
    /// running under a lease. With `claim.reclaim_expired` enabled, running
    /// rows whose lease has lapsed are candidates too. Returns the hydrated
    /// row, or `None` when nothing is ready.
    pub fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_owner: &str,
        lease_for: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let now = truncate_to_second(now);
        let now_str = format_utc_seconds(now);
        let lease_expires = format_utc_seconds(now + lease_for);

        let mut connection = self.connect()?;
        // The write lock is taken upfront so concurrent claimers serialise
        // here instead of racing read snapshots.
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;

        let candidate_sql = if self.claim.reclaim_expired {
            "SELECT id, status FROM jobs
             WHERE (status = 'queued' AND scheduled_at <= ?1)
                OR (status = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?1)
             ORDER BY scheduled_at ASC, id ASC
             LIMIT 1"
        } else {
            "SELECT id, status FROM jobs
             WHERE status = 'queued' AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, id ASC
             LIMIT 1"
        };

        let candidate: Option<(String, String)> = tx
            .query_row(candidate_sql, params![now_str], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(|source| StoreError::Sql { source })?;

        let Some((job_id, observed_status)) = candidate else {
            return Ok(None);
        };

        // Compare-and-swap on the observed status: if another daemon won
        // the race between the select and this update, zero rows change
        // and the claim is abandoned for this tick.
        let updated = tx
            .execute(
                "UPDATE jobs
                 SET status = 'running',
                     started_at = ?1,
                     lease_owner = ?2,
                     lease_expires_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![now_str, lease_owner, lease_expires, job_id, observed_status],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if updated != 1 {
            return Ok(None);
        }

        tx.commit().map_err(|source| StoreError::Sql { source })?;
        drop(connection);
        self.get_job(&job_id).map(Some)
    }

    pub fn succeed(&self, job_id: &str, result: &serde_json::Value) -> Result<(), StoreError> {
        let result_json =
            serde_json::to_string(result).map_err(|source| StoreError::Encode { source })?;
        self.finish(job_id, JobStatus::Succeeded, &result_json)
    }

    pub fn fail(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
        let result_json = serde_json::to_string(&serde_json::json!({ "error": error }))
            .map_err(|source| StoreError::Encode { source })?;
        self.finish(job_id, JobStatus::Failed, &result_json)
    }

    fn finish(&self, job_id: &str, status: JobStatus, result_json: &str) -> Result<(), StoreError> {
        let finished_at = format_utc_seconds(Utc::now());
        let connection = self.connect()?;
        let updated = connection
            .execute(
                "UPDATE jobs
                 SET status = ?1, finished_at = ?2, result_json = ?3
                 WHERE id = ?4",
                params![status.as_str(), finished_at, result_json, job_id],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if updated == 0 {
            return Err(StoreError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                &format!("{JOB_SELECT} WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?
            .ok_or_else(|| StoreError::JobNotFound {
                job_id: job_id.to_string(),
            })?
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!("{JOB_SELECT} ORDER BY scheduled_at DESC LIMIT ?1"),
            params![limit as i64],
        )
    }

    pub fn list_queued(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!(
                "{JOB_SELECT} WHERE status = 'queued' ORDER BY scheduled_at ASC, id ASC LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    pub fn list_running(&self) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!("{JOB_SELECT} WHERE status = 'running' ORDER BY scheduled_at ASC, id ASC"),
            params![],
        )
    }

    pub fn list_recent_completed(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!(
                "{JOB_SELECT} WHERE status IN ('succeeded', 'failed')
                 ORDER BY finished_at DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    fn query_jobs(
        &self,
        sql: &str,
        query_params: impl rusqlite::Params,
    ) -> Result<Vec<Job>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(sql)
            .map_err(|source| StoreError::Sql { source })?;
        let rows = statement
            .query_map(query_params, job_from_row)
            .map_err(|source| StoreError::Sql { source })?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(|source| StoreError::Sql { source })??);
        }
        Ok(jobs)
    }

    pub fn get_kv(&self, key: &str) -> Result<Option<String>, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })
    }

    pub fn set_kv(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok(())
    }

    pub fn record_run_started(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO runs (id, started_at, status) VALUES (?1, ?2, 'running')
                 ON CONFLICT(id) DO NOTHING",
                params![run_id, format_utc_seconds(started_at)],
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok(())
    }

    pub fn record_run_finished(
        &self,
        run_id: &str,
        status: &str,
        summary: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let summary_json =
            serde_json::to_string(summary).map_err(|source| StoreError::Encode { source })?;
        let connection = self.connect()?;
        connection
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, summary_json = ?3 WHERE id = ?4",
                params![
                    format_utc_seconds(Utc::now()),
                    status,
                    summary_json,
                    run_id
                ],
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT id, started_at, finished_at, status, summary_json
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?
            .map(|(id, started_at, finished_at, status, summary_json)| {
                Ok(RunRecord {
                    id,
                    started_at: parse_stored_timestamp(&started_at)?,
                    finished_at: finished_at
                        .map(|raw| parse_stored_timestamp(&raw))
                        .transpose()?,
                    status,
                    summary_json: summary_json.unwrap_or_default(),
                })
            })
            .transpose()
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let connection =
            Connection::open(&self.db_path).map_err(|source| StoreError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;

                 CREATE TABLE IF NOT EXISTS jobs (
                     id TEXT PRIMARY KEY,
                     type TEXT NOT NULL,
                     status TEXT NOT NULL,
                     scheduled_at TEXT NOT NULL,
                     started_at TEXT,
                     finished_at TEXT,
                     payload_json TEXT,
                     result_json TEXT,
                     lease_owner TEXT,
                     lease_expires_at TEXT
                 );

                 CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_type_scheduled
                     ON jobs(type, scheduled_at);
                 CREATE INDEX IF NOT EXISTS idx_jobs_status_scheduled
                     ON jobs(status, scheduled_at);

                 CREATE TABLE IF NOT EXISTS kv (
                     key TEXT PRIMARY KEY,
                     value TEXT
                 );

                 CREATE TABLE IF NOT EXISTS runs (
                     id TEXT PRIMARY KEY,
                     started_at TEXT NOT NULL,
                     finished_at TEXT,
                     status TEXT NOT NULL,
                     summary_json TEXT
                 );",
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok(connection)
    }
}

/// Stable job identifier: the type plus the second-resolution UTC schedule,
/// so duplicate emissions collide.
pub fn job_id_for(job_type: &str, scheduled_at: DateTime<Utc>) -> String {
    format!(
        "{job_type}_{}",
        truncate_to_second(scheduled_at).format("%Y-%m-%dT%H:%M:%S")
    )
}

const JOB_SELECT: &str = "SELECT id, type, status, scheduled_at, started_at, finished_at,
        payload_json, result_json, lease_owner, lease_expires_at
 FROM jobs";

type JobRow = Result<Job, StoreError>;

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    let id: String = row.get(0)?;
    let job_type: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let scheduled_at: String = row.get(3)?;
    let started_at: Option<String> = row.get(4)?;
    let finished_at: Option<String> = row.get(5)?;
    let payload_json: Option<String> = row.get(6)?;
    let result_json: Option<String> = row.get(7)?;
    let lease_owner: Option<String> = row.get(8)?;
    let lease_expires_at: Option<String> = row.get(9)?;

    Ok(build_job(
        id,
        job_type,
        status_raw,
        scheduled_at,
        started_at,
        finished_at,
        payload_json,
        result_json,
        lease_owner,
        lease_expires_at,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    id: String,
    job_type: String,
    status_raw: String,
    scheduled_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    payload_json: Option<String>,
    result_json: Option<String>,
    lease_owner: Option<String>,
    lease_expires_at: Option<String>,
) -> JobRow {
    Ok(Job {
        id,
        job_type,
        status: JobStatus::from_db(&status_raw)?,
        scheduled_at: parse_stored_timestamp(&scheduled_at)?,
        started_at: started_at
            .map(|raw| parse_stored_timestamp(&raw))
            .transpose()?,
        finished_at: finished_at
            .map(|raw| parse_stored_timestamp(&raw))
            .transpose()?,
        payload_json: payload_json.unwrap_or_default(),
        result_json: result_json.unwrap_or_default(),
        lease_owner: lease_owner.unwrap_or_default(),
        lease_expires_at: lease_expires_at
            .map(|raw| parse_stored_timestamp(&raw))
            .transpose()?,
    })
}

fn parse_stored_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_utc_seconds(raw).map_err(StoreError::InvalidTimestamp)
}
