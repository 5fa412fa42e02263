use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

impl CoreError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Trigger(_) => "BAD_TRIGGER",
            CoreError::InvalidJob(_) => "INVALID_JOB",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures raised while building or evaluating a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// Unknown trigger kind in a rule string (`date`, `interval`, `cron` are valid).
    #[error("Unknown trigger kind: {0}")]
    UnknownKind(String),

    /// The rule string does not follow the grammar of its trigger kind.
    #[error("Invalid {kind} rule {rule:?}: {reason}")]
    BadRule {
        kind: &'static str,
        rule: String,
        reason: String,
    },

    /// A cron field expression failed to compile.
    #[error("Invalid cron expression {expr:?} for field {field}: {reason}")]
    BadExpression {
        field: &'static str,
        expr: String,
        reason: String,
    },

    /// The trigger is valid but has no fire time left.
    #[error("Trigger {0} never fires")]
    NeverFires(String),

    /// Evaluation left the representable calendar or did not converge.
    #[error("Trigger evaluation failed: {0}")]
    Evaluation(String),
}
