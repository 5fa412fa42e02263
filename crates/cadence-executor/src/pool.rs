use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::error::{ExecutorError, Result};
use crate::types::SubmitStatus;

#[derive(Default)]
struct Counters {
    per_job: HashMap<String, usize>,
    total: usize,
}

/// In-flight bookkeeping shared with every spawned run.
#[derive(Default)]
struct InFlight {
    counters: Mutex<Counters>,
    idle: Notify,
}

impl InFlight {
    fn release(&self, job_id: &str) {
        let mut counters = self.counters.lock().expect("pool counters poisoned");
        if let Some(count) = counters.per_job.get_mut(job_id) {
            *count -= 1;
            if *count == 0 {
                counters.per_job.remove(job_id);
            }
        }
        counters.total = counters.total.saturating_sub(1);
        if counters.total == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Decrements the counters when a run ends, including by panic.
struct Slot {
    job_id: String,
    in_flight: Arc<InFlight>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.release(&self.job_id);
    }
}

/// Fixed-size task pool shared by the executors.
///
/// At most `max_workers` runs execute at once; up to `queue_depth` more wait
/// for a worker. Anything beyond that, or beyond a job's `max_instances`, is
/// refused with [`SubmitStatus::Saturated`].
pub struct WorkerPool {
    name: String,
    max_workers: usize,
    queue_depth: usize,
    workers: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Pool with the default backlog of `2 * max_workers`.
    pub fn new(name: impl Into<String>, max_workers: usize) -> Result<Self> {
        Self::with_queue_depth(name, max_workers, max_workers.saturating_mul(2))
    }

    pub fn with_queue_depth(
        name: impl Into<String>,
        max_workers: usize,
        queue_depth: usize,
    ) -> Result<Self> {
        if max_workers == 0 {
            return Err(ExecutorError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        let name = name.into();
        info!(pool = %name, max_workers, queue_depth, "worker pool created");
        Ok(Self {
            name,
            max_workers,
            queue_depth,
            workers: Arc::new(Semaphore::new(max_workers)),
            in_flight: Arc::new(InFlight::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Queued plus running instances of `job_id`.
    pub fn running_count(&self, job_id: &str) -> usize {
        self.in_flight
            .counters
            .lock()
            .expect("pool counters poisoned")
            .per_job
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Queued plus running instances of every job.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .counters
            .lock()
            .expect("pool counters poisoned")
            .total
    }

    /// Admit `work` for `job_id` if capacity allows, then run it on a worker.
    ///
    /// Never blocks: admission is decided immediately and the wait for a
    /// free worker happens on the spawned task.
    pub fn try_spawn<F>(&self, job_id: &str, max_instances: u32, work: F) -> SubmitStatus
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_spawn_all(job_id, max_instances, vec![work])
    }

    /// Admit `works` together as a single instance of `job_id`.
    ///
    /// Each future gets its own task and worker permit; the instance is
    /// released once the last of them ends.
    pub fn try_spawn_all<F>(&self, job_id: &str, max_instances: u32, works: Vec<F>) -> SubmitStatus
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            debug!(pool = %self.name, job_id, "pool is shut down, refusing run");
            return SubmitStatus::Saturated;
        }
        if works.is_empty() {
            return SubmitStatus::Accepted;
        }

        {
            let mut counters = self.in_flight.counters.lock().expect("pool counters poisoned");
            let running = counters.per_job.get(job_id).copied().unwrap_or(0);
            if running >= max_instances as usize {
                debug!(pool = %self.name, job_id, running, "job at max instances");
                return SubmitStatus::Saturated;
            }
            if counters.total >= self.max_workers + self.queue_depth {
                debug!(pool = %self.name, job_id, in_flight = counters.total, "pool backlog full");
                return SubmitStatus::Saturated;
            }
            *counters.per_job.entry(job_id.to_string()).or_insert(0) += 1;
            counters.total += 1;
        }

        let slot = Arc::new(Slot {
            job_id: job_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        });
        for work in works {
            let slot = Arc::clone(&slot);
            let workers = Arc::clone(&self.workers);
            tokio::spawn(async move {
                let _slot = slot;
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                work.await;
            });
        }
        SubmitStatus::Accepted
    }

    /// Stop admitting runs; with `wait`, return once every admitted run has
    /// finished.
    pub async fn shutdown(&self, wait: bool) {
        self.closed.store(true, Ordering::SeqCst);
        if !wait {
            return;
        }
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                break;
            }
            idle.await;
        }
        info!(pool = %self.name, "worker pool drained");
    }
}
