//! Persistent job records, one per identity.
//!
//! The record is the only durable state of the backup engine and the single
//! source of truth for whether a run is in flight. Entering a running state
//! is a compare-and-swap in one SQL statement, so two near-simultaneous
//! triggers cannot both win.

use crate::utils::errors::{NodeError, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault_backup_jobs (
  identity TEXT PRIMARY KEY,
  state TEXT NOT NULL CHECK(state IN ('stopped','running_backup','running_restore')),
  last_message TEXT CHECK(last_message IS NULL OR last_message IN ('success','failed')),
  last_update TEXT NOT NULL,
  remote_host TEXT,
  access_token TEXT
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Stopped,
    RunningBackup,
    RunningRestore,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Stopped => "stopped",
            JobState::RunningBackup => "running_backup",
            JobState::RunningRestore => "running_restore",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(JobState::Stopped),
            "running_backup" => Some(JobState::RunningBackup),
            "running_restore" => Some(JobState::RunningRestore),
            _ => None,
        }
    }
}

/// Outcome of the last finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMessage {
    Success,
    Failed,
}

impl JobMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMessage::Success => "success",
            JobMessage::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(JobMessage::Success),
            "failed" => Some(JobMessage::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub identity: String,
    pub state: JobState,
    pub last_message: Option<JobMessage>,
    pub last_update: DateTime<Utc>,
    pub remote_host: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

fn row_to_record(row: &Row) -> rusqlite::Result<JobRecord> {
    let bad = |col: usize, what: String| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, what.into())
    };

    let state: String = row.get("state")?;
    let message: Option<String> = row.get("last_message")?;
    let updated: String = row.get("last_update")?;

    Ok(JobRecord {
        identity: row.get("identity")?,
        state: JobState::parse(&state).ok_or_else(|| bad(1, format!("unknown state {}", state)))?,
        last_message: match message {
            Some(m) => Some(JobMessage::parse(&m).ok_or_else(|| bad(2, format!("unknown message {}", m)))?),
            None => None,
        },
        last_update: DateTime::parse_from_rfc3339(&updated)
            .map_err(|e| bad(3, e.to_string()))?
            .with_timezone(&Utc),
        remote_host: row.get("remote_host")?,
        access_token: row.get("access_token")?,
    })
}

#[derive(Clone)]
pub struct JobStore {
    pool: DbPool,
}

impl JobStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = FULL;",
            )
        });
        let pool = Pool::builder().max_size(4).build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Move `identity` into `state` if it is stopped (or has no record yet).
    ///
    /// Returns `false` when another run holds the identity; nothing is
    /// written in that case.
    pub fn begin(&self, identity: &str, state: JobState, remote_host: &str, access_token: &str) -> Result<bool> {
        if state == JobState::Stopped {
            return Err(NodeError::Database("cannot begin a job in the stopped state".into()));
        }

        let conn = self.pool.get()?;
        let changed = conn.execute(
            "INSERT INTO vault_backup_jobs (identity, state, last_message, last_update, remote_host, access_token)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5)
             ON CONFLICT(identity) DO UPDATE SET
               state = excluded.state,
               last_update = excluded.last_update,
               remote_host = excluded.remote_host,
               access_token = excluded.access_token
             WHERE vault_backup_jobs.state = 'stopped'",
            params![identity, state.as_str(), Utc::now().to_rfc3339(), remote_host, access_token],
        )?;
        Ok(changed == 1)
    }

    /// Return `identity` to stopped with the outcome of its run.
    pub fn finish(&self, identity: &str, message: JobMessage) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE vault_backup_jobs SET state = 'stopped', last_message = ?1, last_update = ?2
             WHERE identity = ?3",
            params![message.as_str(), Utc::now().to_rfc3339(), identity],
        )?;
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Result<Option<JobRecord>> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                "SELECT * FROM vault_backup_jobs WHERE identity = ?1",
                params![identity],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Mark runs a crash left behind as failed. Call before accepting jobs.
    pub fn reset_interrupted(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE vault_backup_jobs SET state = 'stopped', last_message = 'failed', last_update = ?1
             WHERE state != 'stopped'",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }
}
