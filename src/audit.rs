use chrono::Utc;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to create audit db parent {path}: {source}")]
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
    #[error("failed to encode audit payload: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only event log backed by `audit/audit.sqlite`. Events record the
/// progression of daemon and plan activity; failures here must never abort
/// the work being audited, so callers log the error and continue.
#[derive(Debug, Clone)]
pub struct AuditLog {
    db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: i64,
    pub ts: String,
    pub actor: String,
    pub event_type: String,
    pub payload_json: String,
}

impl AuditLog {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn log_event(
        &self,
        actor: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AuditError> {
        let payload_json =
            serde_json::to_string(payload).map_err(|source| AuditError::Encode { source })?;
        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO events (ts, actor, type, payload_json) VALUES (?1, ?2, ?3, ?4)",
                params![
                    crate::shared::timefmt::format_utc_seconds(Utc::now()),
                    actor,
                    event_type,
                    payload_json,
                ],
            )
            .map_err(|source| AuditError::Sql { source })?;
        Ok(())
    }

    /// Returns the most recent events, newest first. Used by inspection and
    /// by tests that assert on progression.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AuditEvent>, AuditError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "SELECT id, ts, actor, type, payload_json
                 FROM events
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(|source| AuditError::Sql { source })?;
        let rows = statement
            .query_map(params![limit as i64], |row| {
                Ok(AuditEvent {
                    id: row.get(0)?,
                    ts: row.get(1)?,
                    actor: row.get(2)?,
                    event_type: row.get(3)?,
                    payload_json: row.get(4)?,
                })
            })
            .map_err(|source| AuditError::Sql { source })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(|source| AuditError::Sql { source })?);
        }
        Ok(events)
    }

    fn connect(&self) -> Result<Connection, AuditError> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| AuditError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let connection =
            Connection::open(&self.db_path).map_err(|source| AuditError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS events (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     ts TEXT NOT NULL,
                     actor TEXT NOT NULL,
                     type TEXT NOT NULL,
                     payload_json TEXT NOT NULL
                 );",
            )
            .map_err(|source| AuditError::Sql { source })?;
        Ok(connection)
    }
}
