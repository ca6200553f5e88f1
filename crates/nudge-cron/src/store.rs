//! SQLite-backed job storage.
//!
//! One connection behind a mutex: concurrent readers serialize here, and
//! every mutation is a single statement or transaction, so the scheduler
//! never observes a half-updated record.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use nudge_types::{DeliverPolicy, Job, JobBatch, JobError, JobPatch, JobSpec, Schedule};

use crate::parse::CronExpr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent storage for job records.
pub struct JobStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "PRAGMA journal_mode = WAL;

     CREATE TABLE IF NOT EXISTS jobs (
         id TEXT PRIMARY KEY,
         name TEXT,
         message TEXT NOT NULL,
         schedule TEXT NOT NULL,
         deliver TEXT NOT NULL,
         channel TEXT NOT NULL,
         to_addr TEXT NOT NULL,
         enabled INTEGER NOT NULL DEFAULT 1,
         last_fired_at TEXT,
         created_at TEXT NOT NULL,
         updated_at TEXT NOT NULL
     );";

impl JobStore {
    /// Open or create a job store.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Job store opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Validate and persist a new job. Returns the stored record with its
    /// freshly assigned id.
    pub fn add(&self, spec: &JobSpec) -> Result<Job> {
        validate_spec(spec)?;
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            message: spec.message.clone(),
            schedule: spec.schedule.clone(),
            deliver: spec.deliver,
            channel: spec.channel.clone(),
            to: spec.to.clone(),
            enabled: spec.enabled,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        };
        let conn = self.conn.lock().unwrap();
        insert_job(&conn, &job)?;
        Ok(job)
    }

    /// Get a job by id.
    pub fn get(&self, id: &str) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        get_by_id(&conn, id)
    }

    /// List jobs, newest first. Disabled jobs are included only on request.
    pub fn list(&self, include_disabled: bool) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_disabled {
            format!("{SELECT_COLS} FROM jobs ORDER BY created_at DESC")
        } else {
            format!("{SELECT_COLS} FROM jobs WHERE enabled = 1 ORDER BY created_at DESC")
        };
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Apply a partial update. Absent patch fields are left untouched; the
    /// patched record is re-validated before anything is written. Read and
    /// write happen inside one transaction, so a firing recorded while the
    /// update is in progress is never overwritten with the stale value.
    pub fn update(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut job = get_by_id(&tx, id)?;
        patch.apply(&mut job);
        job.updated_at = Utc::now();
        validate_spec(&JobSpec::from(&job))?;
        insert_job(&tx, &job)?;
        tx.commit()?;
        Ok(job)
    }

    /// Enable or disable a job. Disabled jobs stay stored but are never
    /// scheduled.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE jobs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![enabled as i64, Utc::now().to_rfc3339(), id],
        )?;
        if count == 0 {
            return Err(JobError::NotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// Record a completed firing. The scheduler calls this after the
    /// execution session finishes, success or not.
    pub fn mark_fired(&self, id: &str, fired_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET last_fired_at = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![fired_at.to_rfc3339(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Remove a job. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![id])?;
        Ok(count > 0)
    }

    /// Export jobs as a bulk document, optionally filtered by id.
    pub fn export(&self, ids: Option<&[String]>, include_disabled: bool) -> Result<JobBatch> {
        let wanted: Option<HashSet<&str>> =
            ids.map(|ids| ids.iter().map(String::as_str).collect());
        let jobs = self
            .list(include_disabled)?
            .iter()
            .filter(|j| wanted.as_ref().is_none_or(|w| w.contains(j.id.as_str())))
            .map(JobSpec::from)
            .collect();
        Ok(JobBatch { jobs })
    }

    /// Import a bulk document. Every entry is validated before anything is
    /// written, and all inserts happen inside one transaction: a single bad
    /// entry fails the whole batch. Incoming ids are ignored; fresh ids are
    /// always allocated. Returns the new ids in input order.
    pub fn import(&self, batch: &JobBatch) -> Result<Vec<String>> {
        for (index, spec) in batch.jobs.iter().enumerate() {
            validate_spec(spec).map_err(|e| JobError::Validation(format!("job {index}: {e}")))?;
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut new_ids = Vec::with_capacity(batch.jobs.len());
        for spec in &batch.jobs {
            let job = Job {
                id: Uuid::new_v4().to_string(),
                name: spec.name.clone(),
                message: spec.message.clone(),
                schedule: spec.schedule.clone(),
                deliver: spec.deliver,
                channel: spec.channel.clone(),
                to: spec.to.clone(),
                enabled: spec.enabled,
                last_fired_at: None,
                created_at: now,
                updated_at: now,
            };
            insert_job(&tx, &job)?;
            new_ids.push(job.id);
        }
        tx.commit()?;
        Ok(new_ids)
    }
}

/// Validate a job spec before persisting. Schedules and timezones are only
/// ever checked here (and in `update`/`import`, which reuse this), never at
/// evaluation time.
pub fn validate_spec(spec: &JobSpec) -> std::result::Result<(), JobError> {
    if spec.message.trim().is_empty() {
        return Err(JobError::Validation("message must be non-empty".into()));
    }
    if spec.channel.trim().is_empty() {
        return Err(JobError::Validation("channel must be non-empty".into()));
    }
    if spec.to.trim().is_empty() {
        return Err(JobError::Validation("to must be non-empty".into()));
    }
    match &spec.schedule {
        Schedule::Cron { expr, tz } => {
            CronExpr::parse(expr).map_err(|e| JobError::Validation(e.to_string()))?;
            if let Some(tz) = tz {
                chrono_tz::Tz::from_str(tz)
                    .map_err(|_| JobError::Validation(format!("unknown timezone '{tz}'")))?;
            }
        }
        Schedule::Every { seconds } => {
            if *seconds < 1 {
                return Err(JobError::Validation("interval must be at least 1 second".into()));
            }
        }
        Schedule::At { .. } => {}
    }
    Ok(())
}

const SELECT_COLS: &str = "SELECT id, name, message, schedule, deliver, channel, to_addr, \
                           enabled, last_fired_at, created_at, updated_at";

fn get_by_id(conn: &Connection, id: &str) -> Result<Job> {
    let row = conn
        .prepare(&format!("{SELECT_COLS} FROM jobs WHERE id = ?1"))?
        .query_row(rusqlite::params![id], row_to_job)
        .optional()?;
    row.ok_or_else(|| JobError::NotFound(id.to_string()).into())
}

fn insert_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, name, message, schedule, deliver, channel, to_addr, enabled, last_fired_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            message = excluded.message,
            schedule = excluded.schedule,
            deliver = excluded.deliver,
            channel = excluded.channel,
            to_addr = excluded.to_addr,
            enabled = excluded.enabled,
            last_fired_at = excluded.last_fired_at,
            updated_at = excluded.updated_at",
        rusqlite::params![
            job.id,
            job.name,
            job.message,
            serde_json::to_string(&job.schedule).map_err(StoreError::Json)?,
            deliver_str(job.deliver),
            job.channel,
            job.to,
            job.enabled as i64,
            job.last_fired_at.map(|t| t.to_rfc3339()),
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let schedule_json: String = row.get(3)?;
    let schedule = serde_json::from_str(&schedule_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        message: row.get(2)?,
        schedule,
        deliver: parse_deliver(&row.get::<_, String>(4)?),
        channel: row.get(5)?,
        to: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        last_fired_at: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| s.parse().ok()),
        created_at: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        updated_at: row
            .get::<_, String>(10)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn deliver_str(policy: DeliverPolicy) -> &'static str {
    match policy {
        DeliverPolicy::Always => "always",
        DeliverPolicy::Auto => "auto",
        DeliverPolicy::Never => "never",
    }
}

fn parse_deliver(text: &str) -> DeliverPolicy {
    match text {
        "auto" => DeliverPolicy::Auto,
        "never" => DeliverPolicy::Never,
        _ => DeliverPolicy::Always,
    }
}
