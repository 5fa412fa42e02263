use cadence_core::{Job, TriggerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query over stored jobs; every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Exact name.
    pub name: Option<String>,
    /// Case-sensitive substring of the name.
    pub name_contains: Option<String>,
    pub trigger: Option<TriggerKind>,
    pub paused: Option<bool>,
    /// Restrict to one store alias.
    pub jobstore: Option<String>,
}

impl JobFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.name.as_ref().map_or(true, |n| job.name == *n)
            && self
                .name_contains
                .as_ref()
                .map_or(true, |s| job.name.contains(s.as_str()))
            && self.trigger.map_or(true, |t| job.trigger.kind() == t)
            && self.paused.map_or(true, |p| job.is_paused() == p)
            && self.jobstore.as_ref().map_or(true, |s| job.jobstore == *s)
    }
}

/// Window over an ordered result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    /// `None` returns everything after `offset`.
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// A persisted row that could not be decoded during reload. The row is left
/// in place and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub job_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: usize,
    pub failures: Vec<DecodeFailure>,
}

/// One row of the append-only `jobs_history` log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub job_id: String,
    pub job_name: String,
    /// The job reference that ran.
    pub cmd: String,
    pub success: bool,
    pub output: String,
    /// Wall-clock seconds the run took.
    pub cost_secs: f64,
    pub scheduler_name: String,
    pub created_at: DateTime<Utc>,
}
