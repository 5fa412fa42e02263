use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::DEFAULT_ALIAS;
use cadence_core::{Job, JobPatch, JobSpec, Trigger};
use cadence_events::{EventBus, EventListener, EventMask, RemovalReason, SchedulerEvent};
use cadence_executor::Executor;
use cadence_store::{JobFilter, JobStore, Page};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::builder::SchedulerBuilder;
use crate::engine::{run_loop, Inner, SchedulerState, StoreEntry};
use crate::error::{Result, SchedulerError};

/// Cheap, cloneable handle to one scheduler instance.
///
/// Every administrative call commits its change, publishes the matching
/// event and wakes the loop so it recomputes its sleep.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.events)
    }

    // --- lifecycle -----------------------------------------------------------

    /// Reload persistent stores, emit `SCHEDULER_STARTED` and spawn the main
    /// loop on the current Tokio runtime. A no-op unless stopped.
    pub fn start(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SchedulerError::Config("start() must be called within a Tokio runtime".to_string())
        })?;
        {
            let mut state = self.inner.state.lock().expect("scheduler state poisoned");
            if *state != SchedulerState::Stopped {
                debug!("scheduler already started");
                return Ok(());
            }
            *state = SchedulerState::Running;
        }

        let mut events = Vec::new();
        for (alias, store) in self.inner.stores() {
            if let Err(e) = self.inner.reload_store(&alias, store.as_ref(), &mut events) {
                error!(jobstore = %alias, error = %e, "failed to load job store");
                self.inner.set_state(SchedulerState::Stopped);
                return Err(e.into());
            }
        }
        events.push(SchedulerEvent::SchedulerStarted);
        self.inner.publish_all(events);

        let task = runtime.spawn(run_loop(Arc::clone(&self.inner)));
        *self.inner.loop_task.lock().expect("loop task slot poisoned") = Some(task);
        info!(scheduler = %self.inner.name, "scheduler started");
        Ok(())
    }

    /// Stop the loop and close every executor. With `wait`, block until all
    /// accepted runs have finished and their reports have been handled.
    /// `SCHEDULER_SHUTDOWN` is the last event published.
    pub async fn shutdown(&self, wait: bool) {
        if self.inner.set_state(SchedulerState::Stopped) == SchedulerState::Stopped {
            debug!("scheduler not running, shutdown ignored");
            return;
        }
        info!(scheduler = %self.inner.name, wait, "scheduler shutting down");
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.wake();

        let task = self
            .inner
            .loop_task
            .lock()
            .expect("loop task slot poisoned")
            .take();
        if wait {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    error!(error = %e, "scheduler loop ended abnormally");
                }
            }
        }

        let executors: Vec<Arc<dyn Executor>> = self
            .inner
            .executors
            .read()
            .expect("executor registry poisoned")
            .values()
            .cloned()
            .collect();
        for executor in executors {
            executor.shutdown(wait).await;
        }

        if wait {
            let mut reports = self.inner.reports_rx.lock().await;
            let handled = self.inner.drain_reports(&mut reports);
            debug!(handled, "final reports handled");
        }
        self.inner
            .publish_all(vec![SchedulerEvent::SchedulerShutdown]);
        info!(scheduler = %self.inner.name, "scheduler stopped");
    }

    /// Stop dispatching until [`Scheduler::resume`]. Due jobs accumulate and
    /// are subject to the misfire policy when processing resumes.
    pub fn pause(&self) {
        {
            let mut state = self.inner.state.lock().expect("scheduler state poisoned");
            if *state != SchedulerState::Running {
                return;
            }
            *state = SchedulerState::Paused;
        }
        info!("scheduler paused");
        self.inner.publish_all(vec![SchedulerEvent::SchedulerPaused]);
        self.inner.wake();
    }

    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock().expect("scheduler state poisoned");
            if *state != SchedulerState::Paused {
                return;
            }
            *state = SchedulerState::Running;
        }
        info!("scheduler resumed");
        self.inner.publish_all(vec![SchedulerEvent::SchedulerResumed]);
        self.inner.wake();
    }

    /// Make the loop re-evaluate now.
    pub fn wakeup(&self) {
        self.inner.wake();
    }

    /// Run one loop iteration on the caller's task and return how long the
    /// loop would sleep afterwards. Dispatches nothing while paused.
    pub fn process_jobs(&self) -> Duration {
        self.inner.process_jobs()
    }

    /// Handle completion reports already received. Returns 0 while the loop
    /// task owns the report channel.
    pub fn drain_reports(&self) -> usize {
        match self.inner.reports_rx.try_lock() {
            Ok(mut reports) => self.inner.drain_reports(&mut reports),
            Err(_) => 0,
        }
    }

    // --- jobs ----------------------------------------------------------------

    /// Validate `spec`, compute its first fire time and insert it into its
    /// store. With `replace_existing`, an existing job of the same id is
    /// overwritten instead of failing with `CONFLICT`.
    pub fn add_job(&self, spec: JobSpec) -> Result<Job> {
        let job = {
            let _guard = self.inner.lock_mutations();
            let alias = spec.jobstore.as_deref().unwrap_or(DEFAULT_ALIAS).to_string();
            let store = self
                .inner
                .store(&alias)
                .ok_or_else(|| SchedulerError::UnknownJobstore(alias.clone()))?;
            let executor = spec.executor.as_deref().unwrap_or(DEFAULT_ALIAS);
            if self.inner.executor(executor).is_none() {
                return Err(SchedulerError::UnknownExecutor(executor.to_string()));
            }

            let replace = spec.replace_existing;
            let job = spec.into_job(&self.inner.config, self.inner.clock.now())?;
            if replace && store.get(&job.id)?.is_some() {
                store.update(&job)?;
            } else {
                store.add(&job)?;
            }
            job
        };

        info!(
            job_id = %job.id,
            name = %job.name,
            trigger = %job.trigger,
            next_run_time = ?job.next_run_time,
            "job added"
        );
        self.inner.publish_all(vec![SchedulerEvent::JobAdded {
            job_id: job.id.clone(),
            jobstore: job.jobstore.clone(),
            trigger: job.trigger.kind(),
            rule: job.trigger.rule(),
        }]);
        self.inner.wake();
        Ok(job)
    }

    /// Patch a job in place. In-flight runs of the old definition are left
    /// to finish.
    pub fn modify_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let job = {
            let _guard = self.inner.lock_mutations();
            let (_, store, current) = self.locate(id)?;
            if let Some(executor) = patch.executor.as_deref() {
                if self.inner.executor(executor).is_none() {
                    return Err(SchedulerError::UnknownExecutor(executor.to_string()));
                }
            }
            let job = patch.apply(&current, self.inner.clock.now())?;
            store.update(&job)?;
            job
        };
        info!(job_id = %job.id, next_run_time = ?job.next_run_time, "job modified");
        self.inner.publish_all(vec![modified(&job)]);
        self.inner.wake();
        Ok(job)
    }

    /// Swap the trigger and restart the schedule from now.
    pub fn reschedule_job(&self, id: &str, trigger: Trigger) -> Result<Job> {
        self.modify_job(id, JobPatch::trigger(trigger))
    }

    pub fn pause_job(&self, id: &str) -> Result<Job> {
        let job = {
            let _guard = self.inner.lock_mutations();
            let (_, store, mut job) = self.locate(id)?;
            job.next_run_time = None;
            store.update(&job)?;
            job
        };
        info!(job_id = %job.id, "job paused");
        self.inner.publish_all(vec![modified(&job)]);
        self.inner.wake();
        Ok(job)
    }

    /// Recompute the next fire time from now. A trigger with nothing left to
    /// fire removes the job and returns `None`.
    pub fn resume_job(&self, id: &str) -> Result<Option<Job>> {
        let (job, event) = {
            let _guard = self.inner.lock_mutations();
            let (alias, store, mut job) = self.locate(id)?;
            match job.trigger.next_fire_time(None, self.inner.clock.now())? {
                Some(next) => {
                    job.next_run_time = Some(next);
                    store.update(&job)?;
                    let event = modified(&job);
                    (Some(job), event)
                }
                None => {
                    store.remove(id)?;
                    let event = SchedulerEvent::JobRemoved {
                        job_id: id.to_string(),
                        jobstore: alias,
                        reason: RemovalReason::Completed,
                    };
                    (None, event)
                }
            }
        };
        match &job {
            Some(job) => info!(job_id = %job.id, next_run_time = ?job.next_run_time, "job resumed"),
            None => info!(job_id = id, "job has no fire time left, removed"),
        }
        self.inner.publish_all(vec![event]);
        self.inner.wake();
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let alias = {
            let _guard = self.inner.lock_mutations();
            let (alias, store, _) = self.locate(id)?;
            store.remove(id)?;
            alias
        };
        info!(job_id = id, jobstore = %alias, "job removed");
        self.inner.publish_all(vec![SchedulerEvent::JobRemoved {
            job_id: id.to_string(),
            jobstore: alias,
            reason: RemovalReason::Requested,
        }]);
        self.inner.wake();
        Ok(())
    }

    /// Clear one store, or every store when `jobstore` is `None`. Returns how
    /// many jobs were removed.
    pub fn remove_all_jobs(&self, jobstore: Option<&str>) -> Result<usize> {
        let removed = {
            let _guard = self.inner.lock_mutations();
            let targets: Vec<StoreEntry> = match jobstore {
                Some(alias) => vec![(alias.to_string(), self.store(alias)?)],
                None => self.inner.stores(),
            };
            let mut removed = 0;
            for (_, store) in targets {
                removed += store.remove_all()?;
            }
            removed
        };
        info!(jobstore = ?jobstore, removed, "all jobs removed");
        self.inner.publish_all(vec![SchedulerEvent::AllJobsRemoved {
            jobstore: jobstore.map(String::from),
        }]);
        self.inner.wake();
        Ok(removed)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.locate(id).map(|(_, _, job)| job)
    }

    /// Matching jobs, store by store in registration order, runnable jobs
    /// first within each store. Returns the total match count and the page.
    pub fn get_jobs(&self, filter: &JobFilter, page: Page) -> Result<(usize, Vec<Job>)> {
        if let Some(alias) = filter.jobstore.as_deref() {
            return Ok(self.store(alias)?.jobs(filter, page)?);
        }
        let mut all = Vec::new();
        for (_, store) in self.inner.stores() {
            let (_, jobs) = store.jobs(filter, Page::all())?;
            all.extend(jobs);
        }
        Ok((all.len(), page.apply(all)))
    }

    // --- registries ----------------------------------------------------------

    pub fn add_listener(
        &self,
        name: impl Into<String>,
        mask: EventMask,
        listener: Arc<dyn EventListener>,
    ) {
        self.inner.events.subscribe(name, mask, listener);
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        self.inner.events.unsubscribe(name)
    }

    /// Register a store under `alias`. A persistent store added to a running
    /// scheduler is loaded immediately.
    pub fn add_jobstore(&self, alias: impl Into<String>, store: Arc<dyn JobStore>) -> Result<()> {
        let alias = alias.into();
        {
            let mut stores = self.inner.stores.write().expect("store registry poisoned");
            if stores.iter().any(|(a, _)| *a == alias) {
                return Err(SchedulerError::DuplicateAlias {
                    kind: "job store",
                    alias,
                });
            }
            stores.push((alias.clone(), Arc::clone(&store)));
        }
        info!(jobstore = %alias, persistent = store.is_persistent(), "job store added");

        if self.state() != SchedulerState::Stopped {
            let mut events = Vec::new();
            self.inner.reload_store(&alias, store.as_ref(), &mut events)?;
            self.inner.publish_all(events);
        }
        self.inner.wake();
        Ok(())
    }

    pub fn add_executor(&self, alias: impl Into<String>, executor: Arc<dyn Executor>) -> Result<()> {
        let alias = alias.into();
        let mut executors = self.inner.executors.write().expect("executor registry poisoned");
        if executors.contains_key(&alias) {
            return Err(SchedulerError::DuplicateAlias {
                kind: "executor",
                alias,
            });
        }
        info!(executor = %alias, "executor added");
        executors.insert(alias, executor);
        Ok(())
    }

    // --- helpers -------------------------------------------------------------

    fn store(&self, alias: &str) -> Result<Arc<dyn JobStore>> {
        self.inner
            .store(alias)
            .ok_or_else(|| SchedulerError::UnknownJobstore(alias.to_string()))
    }

    /// First store, in registration order, holding `id`.
    fn locate(&self, id: &str) -> Result<(String, Arc<dyn JobStore>, Job)> {
        for (alias, store) in self.inner.stores() {
            if let Some(job) = store.get(id)? {
                return Ok((alias, store, job));
            }
        }
        Err(SchedulerError::JobNotFound { id: id.to_string() })
    }
}

fn modified(job: &Job) -> SchedulerEvent {
    SchedulerEvent::JobModified {
        job_id: job.id.clone(),
        jobstore: job.jobstore.clone(),
        trigger: job.trigger.kind(),
        rule: job.trigger.rule(),
        next_run_time: job.next_run_time,
    }
}
