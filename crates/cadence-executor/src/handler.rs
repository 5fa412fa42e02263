use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::types::JobContext;

/// In-process unit of work a `job_ref` can resolve to.
///
/// `Ok(Some(output))` is reported on `JOB_EXECUTED`; an `Err` becomes
/// `JOB_ERROR` with the error chain as traceback.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>>;
}

/// Maps a symbolic `job_ref` to a handler.
pub trait Resolver: Send + Sync {
    fn resolve(&self, job_ref: &str) -> Option<Arc<dyn JobHandler>>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>> {
        (self.0)(ctx).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Name-keyed handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, replacing any previous one.
    pub fn register(&self, key: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let key = key.into();
        debug!(job_ref = %key, "handler registered");
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(key, handler);
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .remove(key)
            .is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .handlers
            .read()
            .expect("handler registry poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Resolver for HandlerRegistry {
    fn resolve(&self, job_ref: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .get(job_ref)
            .cloned()
    }
}
