use thiserror::Error;

/// Errors raised while building executors. Failures of the jobs they run are
/// reported as [`crate::types::Outcome::Failure`], never as errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid executor configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
