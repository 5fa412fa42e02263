use cadence_core::{CoreError, TriggerError};
use cadence_executor::ExecutorError;
use cadence_store::StoreError;
use thiserror::Error;

/// Errors returned by the scheduler's administrative API. Failures inside
/// the main loop are published as events instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job already exists: {id}")]
    Conflict { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Bad trigger: {0}")]
    BadTrigger(#[from] TriggerError),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("No job store named {0:?}")]
    UnknownJobstore(String),

    #[error("No executor named {0:?}")]
    UnknownExecutor(String),

    /// A store or executor alias is registered twice.
    #[error("{kind} alias already registered: {alias}")]
    DuplicateAlias { kind: &'static str, alias: String },

    #[error("Job store error: {0}")]
    Store(StoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// `start` after `shutdown`: executors have been closed.
    #[error("Scheduler has been shut down")]
    ShutDown,
}

impl SchedulerError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Conflict { .. } | SchedulerError::DuplicateAlias { .. } => "CONFLICT",
            SchedulerError::JobNotFound { .. } => "NOT_FOUND",
            SchedulerError::BadTrigger(_) => "BAD_TRIGGER",
            SchedulerError::InvalidJob(_) => "INVALID_JOB",
            SchedulerError::UnknownJobstore(_) => "UNKNOWN_JOBSTORE",
            SchedulerError::UnknownExecutor(_) => "UNKNOWN_EXECUTOR",
            SchedulerError::Store(_) => "JOBSTORE_ERROR",
            SchedulerError::Executor(_) | SchedulerError::Config(_) => "CONFIG_ERROR",
            SchedulerError::ShutDown => "SHUT_DOWN",
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id } => SchedulerError::Conflict { id },
            StoreError::NotFound { id } => SchedulerError::JobNotFound { id },
            other => SchedulerError::Store(other),
        }
    }
}

impl From<CoreError> for SchedulerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Trigger(e) => SchedulerError::BadTrigger(e),
            CoreError::InvalidJob(reason) => SchedulerError::InvalidJob(reason),
            other => SchedulerError::Config(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
