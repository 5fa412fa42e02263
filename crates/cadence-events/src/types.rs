use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use cadence_core::TriggerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every observable point in the scheduler's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SchedulerStarted,
    SchedulerShutdown,
    SchedulerPaused,
    SchedulerResumed,
    JobAdded,
    JobModified,
    JobRemoved,
    AllJobsRemoved,
    JobSubmitted,
    JobExecuted,
    JobError,
    JobMissed,
    JobMaxInstances,
    JobDecodeFailed,
    JobstoreError,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::SchedulerStarted,
        EventKind::SchedulerShutdown,
        EventKind::SchedulerPaused,
        EventKind::SchedulerResumed,
        EventKind::JobAdded,
        EventKind::JobModified,
        EventKind::JobRemoved,
        EventKind::AllJobsRemoved,
        EventKind::JobSubmitted,
        EventKind::JobExecuted,
        EventKind::JobError,
        EventKind::JobMissed,
        EventKind::JobMaxInstances,
        EventKind::JobDecodeFailed,
        EventKind::JobstoreError,
    ];

    /// Single-bit mask for this kind.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SchedulerStarted => "SCHEDULER_STARTED",
            EventKind::SchedulerShutdown => "SCHEDULER_SHUTDOWN",
            EventKind::SchedulerPaused => "SCHEDULER_PAUSED",
            EventKind::SchedulerResumed => "SCHEDULER_RESUMED",
            EventKind::JobAdded => "JOB_ADDED",
            EventKind::JobModified => "JOB_MODIFIED",
            EventKind::JobRemoved => "JOB_REMOVED",
            EventKind::AllJobsRemoved => "ALL_JOBS_REMOVED",
            EventKind::JobSubmitted => "JOB_SUBMITTED",
            EventKind::JobExecuted => "JOB_EXECUTED",
            EventKind::JobError => "JOB_ERROR",
            EventKind::JobMissed => "JOB_MISSED",
            EventKind::JobMaxInstances => "JOB_MAX_INSTANCES",
            EventKind::JobDecodeFailed => "JOB_DECODE_FAILED",
            EventKind::JobstoreError => "JOBSTORE_ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of [`EventKind`]s a listener wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const ALL: EventMask = EventMask(u32::MAX);

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Every job-level failure: errors, misses, refusals, decode and store faults.
    pub fn failures() -> Self {
        EventKind::JobError
            | EventKind::JobMissed
            | EventKind::JobMaxInstances
            | EventKind::JobDecodeFailed
            | EventKind::JobstoreError
    }
}

impl From<EventKind> for EventMask {
    fn from(kind: EventKind) -> Self {
        EventMask(kind.bit())
    }
}

impl FromIterator<EventKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(EventMask::NONE, |mask, kind| mask | kind)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOr<EventKind> for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventKind) -> EventMask {
        EventMask(self.0 | rhs.bit())
    }
}

impl BitOr for EventKind {
    type Output = EventMask;
    fn bitor(self, rhs: EventKind) -> EventMask {
        EventMask(self.bit() | rhs.bit())
    }
}

impl BitOrAssign<EventKind> for EventMask {
    fn bitor_assign(&mut self, rhs: EventKind) {
        self.0 |= rhs.bit();
    }
}

/// Why a job left its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// `remove_job` was called.
    Requested,
    /// The trigger has no fire time left.
    Completed,
    /// Evaluating the trigger failed.
    TriggerError,
    /// The job names an executor that is not registered.
    ExecutorMissing,
}

/// A published event with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerShutdown,
    SchedulerPaused,
    SchedulerResumed,
    JobAdded {
        job_id: String,
        jobstore: String,
        trigger: TriggerKind,
        /// Canonical rule string.
        rule: String,
    },
    JobModified {
        job_id: String,
        jobstore: String,
        trigger: TriggerKind,
        rule: String,
        next_run_time: Option<DateTime<Utc>>,
    },
    JobRemoved {
        job_id: String,
        jobstore: String,
        reason: RemovalReason,
    },
    AllJobsRemoved {
        /// `None` when every store was cleared.
        jobstore: Option<String>,
    },
    JobSubmitted {
        job_id: String,
        jobstore: String,
        run_time: DateTime<Utc>,
    },
    JobExecuted {
        job_id: String,
        jobstore: String,
        run_time: DateTime<Utc>,
        output: Option<String>,
        elapsed_ms: u64,
    },
    JobError {
        job_id: String,
        jobstore: String,
        run_time: DateTime<Utc>,
        /// Failure class reported by the executor (`ExitStatus`, `Panic`, ...).
        kind: String,
        message: String,
        traceback: Option<String>,
    },
    JobMissed {
        job_id: String,
        jobstore: String,
        run_time: DateTime<Utc>,
    },
    JobMaxInstances {
        job_id: String,
        jobstore: String,
        run_time: DateTime<Utc>,
    },
    JobDecodeFailed {
        job_id: String,
        jobstore: String,
        reason: String,
    },
    JobstoreError {
        jobstore: String,
        job_id: Option<String>,
        message: String,
    },
}

impl SchedulerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SchedulerEvent::SchedulerStarted => EventKind::SchedulerStarted,
            SchedulerEvent::SchedulerShutdown => EventKind::SchedulerShutdown,
            SchedulerEvent::SchedulerPaused => EventKind::SchedulerPaused,
            SchedulerEvent::SchedulerResumed => EventKind::SchedulerResumed,
            SchedulerEvent::JobAdded { .. } => EventKind::JobAdded,
            SchedulerEvent::JobModified { .. } => EventKind::JobModified,
            SchedulerEvent::JobRemoved { .. } => EventKind::JobRemoved,
            SchedulerEvent::AllJobsRemoved { .. } => EventKind::AllJobsRemoved,
            SchedulerEvent::JobSubmitted { .. } => EventKind::JobSubmitted,
            SchedulerEvent::JobExecuted { .. } => EventKind::JobExecuted,
            SchedulerEvent::JobError { .. } => EventKind::JobError,
            SchedulerEvent::JobMissed { .. } => EventKind::JobMissed,
            SchedulerEvent::JobMaxInstances { .. } => EventKind::JobMaxInstances,
            SchedulerEvent::JobDecodeFailed { .. } => EventKind::JobDecodeFailed,
            SchedulerEvent::JobstoreError { .. } => EventKind::JobstoreError,
        }
    }

    /// Id of the job the event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            SchedulerEvent::JobAdded { job_id, .. }
            | SchedulerEvent::JobModified { job_id, .. }
            | SchedulerEvent::JobRemoved { job_id, .. }
            | SchedulerEvent::JobSubmitted { job_id, .. }
            | SchedulerEvent::JobExecuted { job_id, .. }
            | SchedulerEvent::JobError { job_id, .. }
            | SchedulerEvent::JobMissed { job_id, .. }
            | SchedulerEvent::JobMaxInstances { job_id, .. }
            | SchedulerEvent::JobDecodeFailed { job_id, .. } => Some(job_id),
            SchedulerEvent::JobstoreError { job_id, .. } => job_id.as_deref(),
            _ => None,
        }
    }
}

/// Synchronous observer.
///
/// Runs on the publishing task after the state it reports is committed, so
/// it must be cheap. Panics are caught and logged by the bus.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &SchedulerEvent);
}

impl<F> EventListener for F
where
    F: Fn(&SchedulerEvent) + Send + Sync,
{
    fn on_event(&self, event: &SchedulerEvent) {
        self(event)
    }
}
