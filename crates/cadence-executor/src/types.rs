use std::fmt;
use std::time::Duration;

use cadence_core::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Whether an executor took a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    /// The job is at `max_instances`, or the pool backlog is full, or the
    /// pool is shut down. The run is dropped, not queued.
    Saturated,
}

/// What a handler sees of the job it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: String,
    pub job_name: String,
    pub job_ref: String,
    pub run_time: DateTime<Utc>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl JobContext {
    pub fn new(job: &Job, run_time: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            job_ref: job.job_ref.clone(),
            run_time,
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
        }
    }
}

/// Failure class carried on `JOB_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// `job_ref` did not resolve to a handler.
    Unresolved,
    /// The handler returned an error.
    Handler,
    /// The handler panicked.
    Panic,
    /// The handler task was cancelled before finishing.
    Cancelled,
    /// The command could not be started.
    Spawn,
    /// The command exited non-zero or by signal.
    ExitStatus,
    /// The command outlived its time budget and was killed.
    Timeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Unresolved => "Unresolved",
            FailureKind::Handler => "Handler",
            FailureKind::Panic => "Panic",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Spawn => "Spawn",
            FailureKind::ExitStatus => "ExitStatus",
            FailureKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        output: Option<String>,
    },
    Failure {
        kind: FailureKind,
        message: String,
        traceback: Option<String>,
    },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Completion message posted back to the scheduler for every accepted run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub job_id: String,
    pub job_name: String,
    pub job_ref: String,
    pub jobstore: String,
    pub run_time: DateTime<Utc>,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn new(job: &Job, run_time: DateTime<Utc>, outcome: Outcome, elapsed: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            job_ref: job.job_ref.clone(),
            jobstore: job.jobstore.clone(),
            run_time,
            outcome,
            elapsed,
        }
    }
}

pub type ReportSender = mpsc::UnboundedSender<ExecutionReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<ExecutionReport>;
