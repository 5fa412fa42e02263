use async_trait::async_trait;
use cadence_core::Job;
use chrono::{DateTime, Utc};

use crate::types::{ReportSender, SubmitStatus};

/// Dispatches job runs to workers.
///
/// `submit` never blocks. The run times owed by one loop iteration are
/// admitted or refused together and count as a single instance against
/// `max_instances`; each still runs as its own task. Every accepted run time
/// posts exactly one [`crate::types::ExecutionReport`] on `reply` when it
/// finishes; failures of the job itself never escape the worker.
#[async_trait]
pub trait Executor: Send + Sync {
    fn submit(&self, job: &Job, run_times: &[DateTime<Utc>], reply: ReportSender) -> SubmitStatus;

    /// Queued plus running instances of `job_id`.
    fn running_count(&self, job_id: &str) -> usize;

    /// Refuse further submissions; with `wait`, resolve once all accepted
    /// runs have finished.
    async fn shutdown(&self, wait: bool);
}
