use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`.
///
/// `jobs.next_run_time` holds epoch milliseconds; NULL marks a paused job.
/// `jobs_history` is append-only and never read by the scheduler loop.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            next_run_time REAL,               -- epoch ms, NULL = paused
            job_state     BLOB    NOT NULL,   -- versioned JSON
            job_name      TEXT    NOT NULL,
            job_trigger   TEXT    NOT NULL,
            job_rule      TEXT    NOT NULL,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run_time ON jobs (next_run_time);
        CREATE INDEX IF NOT EXISTS idx_jobs_job_name ON jobs (job_name);

        CREATE TABLE IF NOT EXISTS jobs_history (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id         TEXT    NOT NULL,
            job_name       TEXT    NOT NULL,
            cmd            TEXT    NOT NULL,
            cmd_is_success INTEGER NOT NULL,
            cmd_output     TEXT    NOT NULL,   -- at most 4096 chars
            cmd_cost       REAL    NOT NULL,   -- seconds
            scheduler_name TEXT    NOT NULL,
            created_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_history_job_id ON jobs_history (job_id);
        CREATE INDEX IF NOT EXISTS idx_history_job_name ON jobs_history (job_name);
        CREATE INDEX IF NOT EXISTS idx_history_success ON jobs_history (cmd_is_success);
        CREATE INDEX IF NOT EXISTS idx_history_cost ON jobs_history (cmd_cost);
        ",
    )?;
    Ok(())
}
