use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use cadence_core::Job;
use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};
use crate::store::JobStore;
use crate::types::{JobFilter, Page};

/// `(paused, next_run_time, id)`: runnable jobs ascend by fire time then id,
/// paused jobs trail.
type OrderKey = (bool, Option<DateTime<Utc>>, String);

fn order_key(job: &Job) -> OrderKey {
    (job.is_paused(), job.next_run_time, job.id.clone())
}

#[derive(Default)]
struct Index {
    jobs: HashMap<String, Job>,
    order: BTreeSet<OrderKey>,
}

impl Index {
    fn insert(&mut self, job: Job) {
        self.order.insert(order_key(&job));
        self.jobs.insert(job.id.clone(), job);
    }

    fn take(&mut self, id: &str) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.order.remove(&order_key(&job));
        Some(job)
    }

    fn ordered(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|(_, _, id)| self.jobs.get(id))
    }
}

/// Volatile store: an id index plus an ordered set of `(next_run_time, id)`.
#[derive(Default)]
pub struct MemoryJobStore {
    index: Mutex<Index>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the whole content; used by persistent stores on reload.
    pub(crate) fn replace_all(&self, jobs: Vec<Job>) {
        let mut fresh = Index::default();
        for job in jobs {
            fresh.insert(job);
        }
        *self.index.lock().expect("job index poisoned") = fresh;
    }

    pub fn len(&self) -> usize {
        self.index.lock().expect("job index poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for MemoryJobStore {
    fn add(&self, job: &Job) -> Result<()> {
        let mut index = self.index.lock().expect("job index poisoned");
        if index.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict { id: job.id.clone() });
        }
        index.insert(job.clone());
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<()> {
        let mut index = self.index.lock().expect("job index poisoned");
        if index.take(&job.id).is_none() {
            return Err(StoreError::NotFound { id: job.id.clone() });
        }
        index.insert(job.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut index = self.index.lock().expect("job index poisoned");
        index
            .take(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    fn remove_all(&self) -> Result<usize> {
        let mut index = self.index.lock().expect("job index poisoned");
        let removed = index.jobs.len();
        *index = Index::default();
        Ok(removed)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self
            .index
            .lock()
            .expect("job index poisoned")
            .jobs
            .get(id)
            .cloned())
    }

    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let index = self.index.lock().expect("job index poisoned");
        Ok(index
            .ordered()
            .take_while(|job| job.next_run_time.is_some_and(|t| t <= now))
            .cloned()
            .collect())
    }

    fn next_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        let index = self.index.lock().expect("job index poisoned");
        Ok(index.order.first().and_then(|(_, next, _)| *next))
    }

    fn jobs(&self, filter: &JobFilter, page: Page) -> Result<(usize, Vec<Job>)> {
        let index = self.index.lock().expect("job index poisoned");
        let matching: Vec<&Job> = index.ordered().filter(|job| filter.matches(job)).collect();
        let total = matching.len();
        Ok((total, page.apply(matching.into_iter().cloned())))
    }
}
