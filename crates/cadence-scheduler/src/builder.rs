use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use cadence_core::config::DEFAULT_ALIAS;
use cadence_core::{CadenceConfig, Clock, StoreKind, SystemClock};
use cadence_events::EventBus;
use cadence_executor::{Executor, ProcessPoolExecutor};
use cadence_store::{JobStore, MemoryJobStore, SqliteJobStore};
use tokio::sync::{mpsc, Notify};
use tracing::info;

use crate::engine::{Inner, SchedulerState, StoreEntry};
use crate::error::{Result, SchedulerError};
use crate::handle::Scheduler;

/// Assembles a [`Scheduler`].
///
/// Anything not supplied is filled from the configuration: the `default`
/// store is a memory or SQLite store per `scheduler.store`, the `default`
/// executor a process pool of `scheduler.executor_max_workers`.
pub struct SchedulerBuilder {
    name: String,
    config: CadenceConfig,
    clock: Option<Arc<dyn Clock>>,
    stores: Vec<StoreEntry>,
    executors: Vec<(String, Arc<dyn Executor>)>,
    events: Option<Arc<EventBus>>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            name: "cadence".to_string(),
            config: CadenceConfig::default(),
            clock: None,
            stores: Vec::new(),
            executors: Vec::new(),
            events: None,
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded as `scheduler_name` in the execution history.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: CadenceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn jobstore(mut self, alias: impl Into<String>, store: Arc<dyn JobStore>) -> Self {
        self.stores.push((alias.into(), store));
        self
    }

    pub fn executor(mut self, alias: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.executors.push((alias.into(), executor));
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        self.config.validate()?;

        let mut stores: Vec<StoreEntry> = Vec::new();
        if !self.stores.iter().any(|(alias, _)| alias == DEFAULT_ALIAS) {
            let store: Arc<dyn JobStore> = match self.config.scheduler.store {
                StoreKind::Memory => Arc::new(MemoryJobStore::new()),
                StoreKind::Persistent => {
                    Arc::new(SqliteJobStore::open(&self.config.database.path)?)
                }
            };
            stores.push((DEFAULT_ALIAS.to_string(), store));
        }
        for (alias, store) in self.stores {
            if stores.iter().any(|(a, _)| *a == alias) {
                return Err(SchedulerError::DuplicateAlias {
                    kind: "job store",
                    alias,
                });
            }
            stores.push((alias, store));
        }

        let mut executors: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        for (alias, executor) in self.executors {
            if executors.contains_key(&alias) {
                return Err(SchedulerError::DuplicateAlias {
                    kind: "executor",
                    alias,
                });
            }
            executors.insert(alias, executor);
        }
        if !executors.contains_key(DEFAULT_ALIAS) {
            let pool = ProcessPoolExecutor::new(
                self.config.scheduler.executor_max_workers,
                self.config.process.clone(),
            )?;
            executors.insert(DEFAULT_ALIAS.to_string(), Arc::new(pool));
        }

        info!(
            scheduler = %self.name,
            stores = stores.len(),
            executors = executors.len(),
            "scheduler built"
        );

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Ok(Scheduler::from_inner(Inner {
            name: self.name,
            config: self.config.scheduler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            stores: RwLock::new(stores),
            executors: RwLock::new(executors),
            events: self.events.unwrap_or_else(|| Arc::new(EventBus::new())),
            state: Mutex::new(SchedulerState::Stopped),
            wake: Notify::new(),
            reports_tx,
            reports_rx: tokio::sync::Mutex::new(reports_rx),
            loop_task: Mutex::new(None),
            mutation: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }))
    }
}
