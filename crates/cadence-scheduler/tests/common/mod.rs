#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use cadence_core::{JobSpec, ManualClock, Trigger};
use cadence_events::{EventKind, EventMask, SchedulerEvent};
use cadence_executor::{handler_fn, Executor, HandlerRegistry, JobContext, ThreadPoolExecutor};
use cadence_scheduler::Scheduler;
use cadence_store::JobStore;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    rfc3339.parse().unwrap()
}

/// A scheduler on a manual clock, with a thread-pool executor whose handlers
/// are `count`, `fail` and `block` (waits until [`Harness::release`]).
pub struct Harness {
    pub scheduler: Scheduler,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<ThreadPoolExecutor>,
    pub runs: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
    events: Arc<Mutex<Vec<SchedulerEvent>>>,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_store(start, None)
    }

    pub fn with_store(start: DateTime<Utc>, store: Option<Arc<dyn JobStore>>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let registry = Arc::new(HandlerRegistry::new());
        let counter = Arc::clone(&runs);
        registry.register(
            "count",
            handler_fn(move |_ctx: JobContext| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("ok".to_string()))
                }
            }),
        );
        registry.register(
            "fail",
            handler_fn(|_ctx: JobContext| async move { Err(anyhow::anyhow!("disk full")) }),
        );
        let held = Arc::clone(&gate);
        registry.register(
            "block",
            handler_fn(move |_ctx: JobContext| {
                let held = Arc::clone(&held);
                async move {
                    let _permit = held.acquire().await;
                    Ok(None)
                }
            }),
        );

        let executor = Arc::new(ThreadPoolExecutor::new(4, registry).unwrap());
        let mut builder = Scheduler::builder()
            .name("test-scheduler")
            .clock(clock.clone())
            .executor("default", executor.clone());
        if let Some(store) = store {
            builder = builder.jobstore("default", store);
        }
        let scheduler = builder.build().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        scheduler.add_listener(
            "recorder",
            EventMask::ALL,
            Arc::new(move |event: &SchedulerEvent| sink.lock().unwrap().push(event.clone())),
        );

        Self {
            scheduler,
            clock,
            executor,
            runs,
            gate,
            events,
        }
    }

    pub fn spec(&self, trigger: Trigger, job_ref: &str, id: &str) -> JobSpec {
        JobSpec::new(trigger, job_ref).id(id)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn submitted_run_times(&self) -> Vec<DateTime<Utc>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SchedulerEvent::JobSubmitted { run_time, .. } => Some(run_time),
                _ => None,
            })
            .collect()
    }

    /// Unblock every `block` handler, present and future.
    pub fn release(&self) {
        self.gate.close();
    }

    pub fn release_after(&self, delay: StdDuration) {
        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            gate.close();
        });
    }

    /// Wait for every accepted run, then hand its report to the scheduler.
    pub async fn settle(&self) {
        self.executor.shutdown(true).await;
        self.scheduler.drain_reports();
    }

    /// Poll until `check` holds, failing after two seconds.
    pub async fn eventually(&self, what: &str, check: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        while !check(self) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }
}
