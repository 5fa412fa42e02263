use cadence_core::Job;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{HistoryEntry, JobFilter, Page, ReloadReport};

/// Catalog of jobs ordered by next fire time.
///
/// Every method is atomic on its own; callers must not assume consistency
/// across calls.
pub trait JobStore: Send + Sync {
    /// Rebuild the in-memory view from durable state.
    fn reload(&self) -> Result<ReloadReport> {
        Ok(ReloadReport::default())
    }

    /// Fails with `Conflict` if the id is taken.
    fn add(&self, job: &Job) -> Result<()>;

    /// Replace by id; fails with `NotFound` if absent.
    fn update(&self, job: &Job) -> Result<()>;

    fn remove(&self, id: &str) -> Result<()>;

    /// Returns how many jobs were removed.
    fn remove_all(&self) -> Result<usize>;

    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Runnable jobs with `next_run_time <= now`, ascending by `(next_run_time, id)`.
    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Smallest `next_run_time` among runnable jobs.
    fn next_run_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Total number of matches and the requested page, runnable jobs first.
    fn jobs(&self, filter: &JobFilter, page: Page) -> Result<(usize, Vec<Job>)>;

    /// Append to the execution history, where the store keeps one.
    fn record_execution(&self, _entry: &HistoryEntry) -> Result<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
