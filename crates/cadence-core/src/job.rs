use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{SchedulerConfig, DEFAULT_ALIAS};
use crate::error::{CoreError, Result, TriggerError};
use crate::trigger::Trigger;

/// A stored unit of work bound to a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique within its store.
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    /// Symbolic reference the executor resolves: a registry key or a shell command.
    pub job_ref: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Collapse several missed fires into one run.
    pub coalesce: bool,
    /// Seconds a run time may lag behind "now" and still be dispatched.
    pub misfire_grace_time: u64,
    /// Concurrent running instances allowed; always >= 1.
    pub max_instances: u32,
    /// `None` while paused.
    pub next_run_time: Option<DateTime<Utc>>,
    pub executor: String,
    pub jobstore: String,
}

/// Fire times a job owes at `now`, walked lazily from its stored
/// `next_run_time`.
///
/// Yields ascending times `<= now`. A trigger error is yielded once and ends
/// the walk. Once exhausted, [`DueTimes::next_run_time`] is where the
/// schedule resumes.
pub struct DueTimes<'a> {
    trigger: &'a Trigger,
    now: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
    failed: bool,
}

impl DueTimes<'_> {
    /// First fire time after now; `None` once the trigger is exhausted.
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.next
    }
}

impl Iterator for DueTimes<'_> {
    type Item = std::result::Result<DateTime<Utc>, TriggerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let run_time = self.next.filter(|t| *t <= self.now)?;
        match self.trigger.next_fire_time(Some(run_time), self.now) {
            Ok(following) => {
                self.next = following;
                Some(Ok(run_time))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Job {
    pub fn is_paused(&self) -> bool {
        self.next_run_time.is_none()
    }

    pub fn misfire_grace(&self) -> Duration {
        let max_secs = (i64::MAX / 1_000) as u64;
        Duration::seconds(self.misfire_grace_time.min(max_secs) as i64)
    }

    /// Every fire time already due at `now`.
    pub fn due_times(&self, now: DateTime<Utc>) -> DueTimes<'_> {
        DueTimes {
            trigger: &self.trigger,
            now,
            next: self.next_run_time,
            failed: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidJob("id must not be empty".to_string()));
        }
        if self.job_ref.trim().is_empty() {
            return Err(CoreError::InvalidJob(format!(
                "job {} has an empty job_ref",
                self.id
            )));
        }
        if self.max_instances == 0 {
            return Err(CoreError::InvalidJob(format!(
                "job {}: max_instances must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

/// Everything `add_job` accepts. Unset options fall back to the scheduler
/// defaults.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub trigger: Trigger,
    pub job_ref: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub coalesce: Option<bool>,
    pub misfire_grace_time: Option<u64>,
    pub max_instances: Option<u32>,
    pub executor: Option<String>,
    pub jobstore: Option<String>,
    /// Overwrite a job with the same id instead of failing with a conflict.
    pub replace_existing: bool,
    /// Store the job paused.
    pub paused: bool,
}

impl JobSpec {
    pub fn new(trigger: Trigger, job_ref: impl Into<String>) -> Self {
        Self {
            trigger,
            job_ref: job_ref.into(),
            id: None,
            name: None,
            args: Vec::new(),
            kwargs: Map::new(),
            coalesce: None,
            misfire_grace_time: None,
            max_instances: None,
            executor: None,
            jobstore: None,
            replace_existing: false,
            paused: false,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = Some(coalesce);
        self
    }

    pub fn misfire_grace_time(mut self, secs: u64) -> Self {
        self.misfire_grace_time = Some(secs);
        self
    }

    pub fn max_instances(mut self, max: u32) -> Self {
        self.max_instances = Some(max);
        self
    }

    pub fn executor(mut self, alias: impl Into<String>) -> Self {
        self.executor = Some(alias.into());
        self
    }

    pub fn jobstore(mut self, alias: impl Into<String>) -> Self {
        self.jobstore = Some(alias.into());
        self
    }

    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Resolve defaults and compute the first fire time.
    ///
    /// A trigger with no fire time at all is rejected even when the job is
    /// added paused, since resuming it could never schedule anything.
    pub fn into_job(self, defaults: &SchedulerConfig, now: DateTime<Utc>) -> Result<Job> {
        let first = self
            .trigger
            .next_fire_time(None, now)?
            .ok_or_else(|| TriggerError::NeverFires(self.trigger.to_string()))?;

        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let job = Job {
            name: self.name.unwrap_or_else(|| self.job_ref.clone()),
            id,
            trigger: self.trigger,
            job_ref: self.job_ref,
            args: self.args,
            kwargs: self.kwargs,
            coalesce: self.coalesce.unwrap_or(defaults.default_coalesce),
            misfire_grace_time: self
                .misfire_grace_time
                .unwrap_or(defaults.default_misfire_grace_time),
            max_instances: self.max_instances.unwrap_or(defaults.default_max_instances),
            next_run_time: (!self.paused).then_some(first),
            executor: self.executor.unwrap_or_else(|| DEFAULT_ALIAS.to_string()),
            jobstore: self.jobstore.unwrap_or_else(|| DEFAULT_ALIAS.to_string()),
        };
        job.validate()?;
        Ok(job)
    }
}

/// Partial update for `modify_job`; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub trigger: Option<Trigger>,
    pub job_ref: Option<String>,
    pub args: Option<Vec<Value>>,
    pub kwargs: Option<Map<String, Value>>,
    pub coalesce: Option<bool>,
    pub misfire_grace_time: Option<u64>,
    pub max_instances: Option<u32>,
    pub executor: Option<String>,
}

impl JobPatch {
    pub fn trigger(trigger: Trigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    /// Produce the patched job. A new trigger restarts the schedule from
    /// scratch unless the job is paused, which it stays.
    pub fn apply(self, job: &Job, now: DateTime<Utc>) -> Result<Job> {
        let mut patched = job.clone();
        if let Some(name) = self.name {
            patched.name = name;
        }
        if let Some(job_ref) = self.job_ref {
            patched.job_ref = job_ref;
        }
        if let Some(args) = self.args {
            patched.args = args;
        }
        if let Some(kwargs) = self.kwargs {
            patched.kwargs = kwargs;
        }
        if let Some(coalesce) = self.coalesce {
            patched.coalesce = coalesce;
        }
        if let Some(grace) = self.misfire_grace_time {
            patched.misfire_grace_time = grace;
        }
        if let Some(max) = self.max_instances {
            patched.max_instances = max;
        }
        if let Some(executor) = self.executor {
            patched.executor = executor;
        }
        if let Some(trigger) = self.trigger {
            let first = trigger
                .next_fire_time(None, now)?
                .ok_or_else(|| TriggerError::NeverFires(trigger.to_string()))?;
            if !patched.is_paused() {
                patched.next_run_time = Some(first);
            }
            patched.trigger = trigger;
        }
        patched.validate()?;
        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{DateTrigger, IntervalTrigger};
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
    }

    fn every_five(now: DateTime<Utc>) -> Trigger {
        Trigger::Interval(
            IntervalTrigger::every(Duration::seconds(5), now).starting_at(at(0, 0, 0)),
        )
    }

    #[test]
    fn spec_defaults_come_from_config() {
        let defaults = SchedulerConfig::default();
        let job = JobSpec::new(every_five(at(0, 0, 0)), "echo hi")
            .into_job(&defaults, at(0, 0, 3))
            .unwrap();
        assert_eq!(job.name, "echo hi");
        assert_eq!(job.id.len(), 32);
        assert!(job.coalesce);
        assert_eq!(job.misfire_grace_time, 30);
        assert_eq!(job.max_instances, 1);
        assert_eq!(job.executor, "default");
        assert_eq!(job.jobstore, "default");
        assert_eq!(job.next_run_time, Some(at(0, 0, 5)));
    }

    #[test]
    fn paused_spec_has_no_next_run_time() {
        let job = JobSpec::new(every_five(at(0, 0, 0)), "echo hi")
            .id("j1")
            .paused(true)
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        assert!(job.is_paused());
    }

    #[test]
    fn exhausted_trigger_is_rejected() {
        let trigger = Trigger::Cron(
            crate::trigger::CronTrigger::from_crontab("0 0 0 1 1 *")
                .unwrap()
                .with_end_date(at(0, 0, 0)),
        );
        let err = JobSpec::new(trigger, "x")
            .into_job(&SchedulerConfig::default(), at(1, 0, 0))
            .unwrap_err();
        assert_eq!(err.code(), "BAD_TRIGGER");
    }

    #[test]
    fn zero_max_instances_is_invalid() {
        let err = JobSpec::new(every_five(at(0, 0, 0)), "x")
            .max_instances(0)
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
    }

    #[test]
    fn due_times_walks_every_missed_fire() {
        let mut job = JobSpec::new(every_five(at(0, 0, 0)), "x")
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        job.next_run_time = Some(at(0, 0, 5));
        let mut due = job.due_times(at(0, 0, 17));
        let run_times: Vec<_> = due.by_ref().map(|t| t.unwrap()).collect();
        assert_eq!(run_times, vec![at(0, 0, 5), at(0, 0, 10), at(0, 0, 15)]);
        assert_eq!(due.next_run_time(), Some(at(0, 0, 20)));
    }

    #[test]
    fn due_times_of_date_trigger_exhausts() {
        let job = JobSpec::new(Trigger::Date(DateTrigger::new(at(0, 0, 2))), "x")
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        let mut due = job.due_times(at(0, 0, 2));
        let run_times: Vec<_> = due.by_ref().map(|t| t.unwrap()).collect();
        assert_eq!(run_times, vec![at(0, 0, 2)]);
        assert_eq!(due.next_run_time(), None);
    }

    #[test]
    fn due_times_stop_at_a_trigger_error() {
        let start = at(0, 0, 5);
        // previous + interval leaves the representable calendar
        let trigger = Trigger::Interval(IntervalTrigger {
            interval_secs: 300_000 * 366 * 86_400,
            start_date: start,
            end_date: None,
            jitter: None,
        });
        let job = JobSpec::new(trigger, "x")
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        assert_eq!(job.next_run_time, Some(start));

        let mut due = job.due_times(at(0, 0, 6));
        assert!(due.next().unwrap().is_err());
        assert!(due.next().is_none());
    }

    #[test]
    fn patch_with_trigger_restarts_schedule_but_keeps_pause() {
        let job = JobSpec::new(every_five(at(0, 0, 0)), "x")
            .id("j1")
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        let hourly = Trigger::parse("cron", "0 0 * * * *", at(0, 0, 30)).unwrap();

        let patched = JobPatch::trigger(hourly.clone()).apply(&job, at(0, 0, 30)).unwrap();
        assert_eq!(patched.next_run_time, Some(at(1, 0, 0)));

        let mut paused = job.clone();
        paused.next_run_time = None;
        let patched = JobPatch::trigger(hourly).apply(&paused, at(0, 0, 30)).unwrap();
        assert!(patched.is_paused());
        assert_eq!(patched.trigger.kind(), crate::trigger::TriggerKind::Cron);
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let job = JobSpec::new(every_five(at(0, 0, 0)), "x")
            .id("j1")
            .kwarg("k", "v")
            .into_job(&SchedulerConfig::default(), at(0, 0, 0))
            .unwrap();
        let patch = JobPatch {
            name: Some("renamed".into()),
            max_instances: Some(3),
            ..JobPatch::default()
        };
        let patched = patch.apply(&job, at(0, 0, 1)).unwrap();
        assert_eq!(patched.name, "renamed");
        assert_eq!(patched.max_instances, 3);
        assert_eq!(patched.kwargs, job.kwargs);
        assert_eq!(patched.next_run_time, job.next_run_time);
    }
}
