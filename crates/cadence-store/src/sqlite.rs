use std::path::Path;
use std::sync::Mutex;

use cadence_core::Job;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use tracing::{debug, info, warn};

use crate::codec;
use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::memory::MemoryJobStore;
use crate::store::JobStore;
use crate::types::{DecodeFailure, HistoryEntry, JobFilter, Page, ReloadReport};

/// Longest `cmd_output` kept in `jobs_history`.
pub const HISTORY_OUTPUT_CHARS: usize = 4096;

/// Durable store on SQLite.
///
/// Every row is mirrored in a [`MemoryJobStore`] that answers all reads; writes
/// go to both. When a write to the database fails the mirror keeps the new
/// state, and the next write of the same job (an upsert) persists it.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    mirror: MemoryJobStore,
}

impl SqliteJobStore {
    /// Wrap an open connection, creating the schema if needed. Call
    /// [`JobStore::reload`] before use to load existing rows.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            mirror: MemoryJobStore::new(),
        })
    }

    /// Open (creating parent directories) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "opening job database");
        Self::new(Connection::open(path)?)
    }

    /// Most recent history rows for `job_id`, newest first.
    pub fn history(&self, job_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().expect("job database poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, job_name, cmd, cmd_is_success, cmd_output, cmd_cost,
                    scheduler_name, created_at
             FROM jobs_history WHERE job_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (job_id, job_name, cmd, success, output, cost_secs, scheduler_name, created_at) =
                row?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::Decode {
                    id: job_id.clone(),
                    reason: format!("bad history timestamp: {e}"),
                })?;
            entries.push(HistoryEntry {
                job_id,
                job_name,
                cmd,
                success,
                output,
                cost_secs,
                scheduler_name,
                created_at,
            });
        }
        Ok(entries)
    }

    fn upsert(&self, job: &Job) -> Result<()> {
        let state = codec::encode(job)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("job database poisoned");
        conn.execute(
            "INSERT INTO jobs
             (id, next_run_time, job_state, job_name, job_trigger, job_rule, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                next_run_time = excluded.next_run_time,
                job_state     = excluded.job_state,
                job_name      = excluded.job_name,
                job_trigger   = excluded.job_trigger,
                job_rule      = excluded.job_rule,
                updated_at    = excluded.updated_at",
            params![
                job.id,
                epoch_ms(job.next_run_time),
                state,
                job.name,
                job.trigger.kind().as_str(),
                job.trigger.rule(),
                now
            ],
        )?;
        Ok(())
    }
}

fn epoch_ms(t: Option<DateTime<Utc>>) -> Option<f64> {
    t.map(|t| t.timestamp_micros() as f64 / 1_000.0)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl JobStore for SqliteJobStore {
    fn reload(&self) -> Result<ReloadReport> {
        let rows: Vec<(String, Vec<u8>)> = {
            let conn = self.conn.lock().expect("job database poisoned");
            let mut stmt = conn.prepare("SELECT id, job_state FROM jobs")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut report = ReloadReport::default();
        let mut jobs = Vec::with_capacity(rows.len());
        for (id, state) in rows {
            match codec::decode(&id, &state) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "skipping undecodable job");
                    report.failures.push(DecodeFailure {
                        job_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.loaded = jobs.len();
        self.mirror.replace_all(jobs);
        info!(loaded = report.loaded, failed = report.failures.len(), "job store reloaded");
        Ok(report)
    }

    fn add(&self, job: &Job) -> Result<()> {
        if self.mirror.get(&job.id)?.is_some() {
            return Err(StoreError::Conflict { id: job.id.clone() });
        }
        let state = codec::encode(job)?;
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock().expect("job database poisoned");
            conn.execute(
                "INSERT INTO jobs
                 (id, next_run_time, job_state, job_name, job_trigger, job_rule, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    job.id,
                    epoch_ms(job.next_run_time),
                    state,
                    job.name,
                    job.trigger.kind().as_str(),
                    job.trigger.rule(),
                    now
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Conflict { id: job.id.clone() }
                } else {
                    StoreError::Database(e)
                }
            })?;
        }
        self.mirror.add(job)?;
        debug!(job_id = %job.id, "job persisted");
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<()> {
        self.mirror.update(job)?;
        self.upsert(job)
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.mirror.remove(id)?;
        let conn = self.conn.lock().expect("job database poisoned");
        conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        Ok(())
    }

    fn remove_all(&self) -> Result<usize> {
        let removed = self.mirror.remove_all()?;
        let conn = self.conn.lock().expect("job database poisoned");
        conn.execute("DELETE FROM jobs", [])?;
        Ok(removed)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        self.mirror.get(id)
    }

    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        self.mirror.due_jobs(now)
    }

    fn next_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.mirror.next_run_time()
    }

    fn jobs(&self, filter: &JobFilter, page: Page) -> Result<(usize, Vec<Job>)> {
        self.mirror.jobs(filter, page)
    }

    fn record_execution(&self, entry: &HistoryEntry) -> Result<()> {
        let output: String = entry.output.chars().take(HISTORY_OUTPUT_CHARS).collect();
        let conn = self.conn.lock().expect("job database poisoned");
        conn.execute(
            "INSERT INTO jobs_history
             (job_id, job_name, cmd, cmd_is_success, cmd_output, cmd_cost, scheduler_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.job_id,
                entry.job_name,
                entry.cmd,
                entry.success,
                output,
                entry.cost_secs,
                entry.scheduler_name,
                entry.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
