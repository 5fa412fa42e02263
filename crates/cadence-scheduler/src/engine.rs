use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use cadence_core::{Clock, Job, SchedulerConfig};
use cadence_events::{EventBus, RemovalReason, SchedulerEvent};
use cadence_executor::{
    ExecutionReport, Executor, Outcome, ReportReceiver, ReportSender, SubmitStatus,
};
use cadence_store::{HistoryEntry, JobStore};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest single sleep; the loop re-evaluates afterwards even when idle.
const MAX_SLEEP: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    /// The loop keeps running but does not dispatch.
    Paused,
}

pub(crate) type StoreEntry = (String, Arc<dyn JobStore>);

/// State shared between the [`crate::Scheduler`] handles and the loop task.
pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    /// Registration order is processing order.
    pub(crate) stores: RwLock<Vec<StoreEntry>>,
    pub(crate) executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) wake: Notify,
    pub(crate) reports_tx: ReportSender,
    /// Held by the loop task for its whole life.
    pub(crate) reports_rx: tokio::sync::Mutex<ReportReceiver>,
    pub(crate) loop_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes every change to job state, from the loop and admin calls.
    pub(crate) mutation: Mutex<()>,
    /// Set once `shutdown` has closed the executors.
    pub(crate) shut_down: AtomicBool,
}

impl Inner {
    pub(crate) fn state(&self) -> SchedulerState {
        *self.state.lock().expect("scheduler state poisoned")
    }

    /// Returns the previous state.
    pub(crate) fn set_state(&self, next: SchedulerState) -> SchedulerState {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        std::mem::replace(&mut *state, next)
    }

    pub(crate) fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().expect("scheduler mutation lock poisoned")
    }

    pub(crate) fn stores(&self) -> Vec<StoreEntry> {
        self.stores.read().expect("store registry poisoned").clone()
    }

    pub(crate) fn store(&self, alias: &str) -> Option<Arc<dyn JobStore>> {
        self.stores
            .read()
            .expect("store registry poisoned")
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, store)| Arc::clone(store))
    }

    pub(crate) fn executor(&self, alias: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .read()
            .expect("executor registry poisoned")
            .get(alias)
            .cloned()
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn publish_all(&self, events: Vec<SchedulerEvent>) {
        for event in &events {
            self.events.publish(event);
        }
    }

    fn idle_max(&self) -> Duration {
        Duration::from_secs(self.config.idle_max_seconds)
    }

    /// Rebuild a persistent store's view and turn undecodable rows into
    /// `JOB_DECODE_FAILED` events.
    pub(crate) fn reload_store(
        &self,
        alias: &str,
        store: &dyn JobStore,
        events: &mut Vec<SchedulerEvent>,
    ) -> cadence_store::Result<()> {
        if !store.is_persistent() {
            return Ok(());
        }
        let _guard = self.lock_mutations();
        let report = store.reload()?;
        info!(
            jobstore = alias,
            loaded = report.loaded,
            failed = report.failures.len(),
            "job store reloaded"
        );
        for failure in report.failures {
            warn!(jobstore = alias, job_id = %failure.job_id, reason = %failure.reason, "skipping undecodable job");
            events.push(SchedulerEvent::JobDecodeFailed {
                job_id: failure.job_id,
                jobstore: alias.to_string(),
                reason: failure.reason,
            });
        }
        Ok(())
    }

    /// One loop iteration: dispatch everything due and return how long the
    /// loop may sleep before the next fire time.
    pub(crate) fn process_jobs(&self) -> Duration {
        if self.state() == SchedulerState::Paused {
            debug!("scheduler paused, nothing dispatched");
            return self.idle_max();
        }

        let mut events = Vec::new();
        let wait = {
            let _guard = self.lock_mutations();
            let now = self.clock.now();
            for (alias, store) in self.stores() {
                match store.due_jobs(now) {
                    Ok(due) => {
                        for job in due {
                            self.process_job(&alias, store.as_ref(), job, now, &mut events);
                        }
                    }
                    Err(e) => {
                        error!(jobstore = %alias, error = %e, "failed to fetch due jobs");
                        events.push(store_error(&alias, None, &e));
                    }
                }
            }
            self.wait_time(now, &mut events)
        };
        self.publish_all(events);
        wait
    }

    fn process_job(
        &self,
        alias: &str,
        store: &dyn JobStore,
        job: Job,
        now: DateTime<Utc>,
        events: &mut Vec<SchedulerEvent>,
    ) {
        let Some(executor) = self.executor(&job.executor) else {
            error!(job_id = %job.id, executor = %job.executor, "executor not registered, removing job");
            remove_job(alias, store, &job.id, RemovalReason::ExecutorMissing, events);
            return;
        };

        let grace = job.misfire_grace();
        let mut due = job.due_times(now);
        let mut run_times = Vec::new();
        let mut missed: Option<(usize, DateTime<Utc>)> = None;
        for item in due.by_ref() {
            let run_time = match item {
                Ok(run_time) => run_time,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "trigger evaluation failed, removing job");
                    remove_job(alias, store, &job.id, RemovalReason::TriggerError, events);
                    return;
                }
            };
            if now - run_time > grace {
                let (count, _) = missed.get_or_insert((0, run_time));
                *count += 1;
                events.push(SchedulerEvent::JobMissed {
                    job_id: job.id.clone(),
                    jobstore: alias.to_string(),
                    run_time,
                });
                continue;
            }
            if job.coalesce {
                run_times.clear();
            }
            run_times.push(run_time);
        }
        let next_run_time = due.next_run_time();
        if let Some((count, first)) = missed {
            warn!(job_id = %job.id, count, %first, "run times missed by more than the grace period");
        }

        if !run_times.is_empty() {
            let status = if executor.running_count(&job.id) >= job.max_instances as usize {
                SubmitStatus::Saturated
            } else {
                executor.submit(&job, &run_times, self.reports_tx.clone())
            };
            match status {
                SubmitStatus::Accepted => debug!(
                    job_id = %job.id,
                    runs = run_times.len(),
                    executor = %job.executor,
                    "job submitted"
                ),
                SubmitStatus::Saturated => warn!(
                    job_id = %job.id,
                    runs = run_times.len(),
                    max_instances = job.max_instances,
                    "executor refused run, skipping"
                ),
            }
            for run_time in run_times {
                let (job_id, jobstore) = (job.id.clone(), alias.to_string());
                events.push(match status {
                    SubmitStatus::Accepted => SchedulerEvent::JobSubmitted {
                        job_id,
                        jobstore,
                        run_time,
                    },
                    SubmitStatus::Saturated => SchedulerEvent::JobMaxInstances {
                        job_id,
                        jobstore,
                        run_time,
                    },
                });
            }
        }

        match next_run_time {
            Some(next) => {
                let updated = Job {
                    next_run_time: Some(next),
                    ..job
                };
                if let Err(e) = store.update(&updated) {
                    error!(job_id = %updated.id, jobstore = alias, error = %e, "failed to persist next run time");
                    events.push(store_error(alias, Some(&updated.id), &e));
                }
            }
            None => {
                debug!(job_id = %job.id, "trigger exhausted");
                remove_job(alias, store, &job.id, RemovalReason::Completed, events);
            }
        }
    }

    fn wait_time(&self, now: DateTime<Utc>, events: &mut Vec<SchedulerEvent>) -> Duration {
        let mut earliest: Option<DateTime<Utc>> = None;
        for (alias, store) in self.stores() {
            match store.next_run_time() {
                Ok(Some(t)) => earliest = Some(earliest.map_or(t, |e| e.min(t))),
                Ok(None) => {}
                Err(e) => {
                    error!(jobstore = %alias, error = %e, "failed to read next run time");
                    events.push(store_error(&alias, None, &e));
                }
            }
        }
        let idle_max = self.idle_max();
        match earliest {
            Some(t) => (t - now).to_std().unwrap_or(Duration::ZERO).min(idle_max),
            None => idle_max,
        }
    }

    /// Turn a completion report into `JOB_EXECUTED` / `JOB_ERROR` and append
    /// it to the owning store's history.
    pub(crate) fn handle_report(&self, report: ExecutionReport) {
        let ExecutionReport {
            job_id,
            job_name,
            job_ref,
            jobstore,
            run_time,
            outcome,
            elapsed,
        } = report;
        let elapsed_ms = elapsed.as_millis() as u64;

        let (event, success, output) = match outcome {
            Outcome::Success { output } => {
                info!(job_id = %job_id, %run_time, elapsed_ms, "job executed");
                let history = output.clone().unwrap_or_default();
                let event = SchedulerEvent::JobExecuted {
                    job_id: job_id.clone(),
                    jobstore: jobstore.clone(),
                    run_time,
                    output,
                    elapsed_ms,
                };
                (event, true, history)
            }
            Outcome::Failure {
                kind,
                message,
                traceback,
            } => {
                warn!(job_id = %job_id, %run_time, %kind, %message, "job raised an error");
                let history = match &traceback {
                    Some(tb) => format!("{message}\n{tb}"),
                    None => message.clone(),
                };
                let event = SchedulerEvent::JobError {
                    job_id: job_id.clone(),
                    jobstore: jobstore.clone(),
                    run_time,
                    kind: kind.to_string(),
                    message,
                    traceback,
                };
                (event, false, history)
            }
        };

        let mut events = vec![event];
        if let Some(store) = self.store(&jobstore) {
            let entry = HistoryEntry {
                job_id: job_id.clone(),
                job_name,
                cmd: job_ref,
                success,
                output,
                cost_secs: elapsed.as_secs_f64(),
                scheduler_name: self.name.clone(),
                created_at: self.clock.now(),
            };
            if let Err(e) = store.record_execution(&entry) {
                warn!(job_id = %job_id, jobstore = %jobstore, error = %e, "failed to record execution history");
                events.push(store_error(&jobstore, Some(&job_id), &e));
            }
        }
        self.publish_all(events);
    }

    /// Handle every report already queued. Returns how many were handled.
    pub(crate) fn drain_reports(&self, reports: &mut ReportReceiver) -> usize {
        let mut handled = 0;
        while let Ok(report) = reports.try_recv() {
            self.handle_report(report);
            handled += 1;
        }
        handled
    }
}

fn remove_job(
    alias: &str,
    store: &dyn JobStore,
    id: &str,
    reason: RemovalReason,
    events: &mut Vec<SchedulerEvent>,
) {
    match store.remove(id) {
        Ok(()) => {
            info!(job_id = id, jobstore = alias, ?reason, "job removed");
            events.push(SchedulerEvent::JobRemoved {
                job_id: id.to_string(),
                jobstore: alias.to_string(),
                reason,
            });
        }
        Err(e) => {
            error!(job_id = id, jobstore = alias, error = %e, "failed to remove job");
            events.push(store_error(alias, Some(id), &e));
        }
    }
}

fn store_error(alias: &str, job_id: Option<&str>, err: &impl Display) -> SchedulerEvent {
    SchedulerEvent::JobstoreError {
        jobstore: alias.to_string(),
        job_id: job_id.map(String::from),
        message: err.to_string(),
    }
}

/// Main loop: process due jobs, then sleep until the next fire time, a
/// wakeup, or shutdown. Completion reports are handled while sleeping.
pub(crate) async fn run_loop(inner: Arc<Inner>) {
    info!(scheduler = %inner.name, "scheduler loop started");
    let mut reports = inner.reports_rx.lock().await;

    loop {
        if inner.state() == SchedulerState::Stopped {
            break;
        }
        let wait = inner.process_jobs();
        debug!(wait_secs = wait.as_secs_f64(), "scheduler sleeping");

        let deadline = tokio::time::Instant::now() + wait.min(MAX_SLEEP);
        loop {
            tokio::select! {
                _ = inner.wake.notified() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                Some(report) = reports.recv() => inner.handle_report(report),
            }
        }
    }

    info!(scheduler = %inner.name, "scheduler loop stopped");
}
