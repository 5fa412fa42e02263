use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cadence_core::Job;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::executor::Executor;
use crate::handler::{JobHandler, Resolver};
use crate::pool::WorkerPool;
use crate::types::{ExecutionReport, FailureKind, JobContext, Outcome, ReportSender, SubmitStatus};

/// Runs in-process handlers looked up through a [`Resolver`].
pub struct ThreadPoolExecutor {
    pool: WorkerPool,
    resolver: Arc<dyn Resolver>,
}

impl ThreadPoolExecutor {
    pub fn new(max_workers: usize, resolver: Arc<dyn Resolver>) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new("thread", max_workers)?,
            resolver,
        })
    }

    pub fn with_pool(pool: WorkerPool, resolver: Arc<dyn Resolver>) -> Self {
        Self { pool, resolver }
    }
}

#[async_trait]
impl Executor for ThreadPoolExecutor {
    fn submit(&self, job: &Job, run_times: &[DateTime<Utc>], reply: ReportSender) -> SubmitStatus {
        let handler = self.resolver.resolve(&job.job_ref);
        let works: Vec<_> = run_times
            .iter()
            .map(|&run_time| run_handler(job.clone(), handler.clone(), run_time, reply.clone()))
            .collect();
        self.pool.try_spawn_all(&job.id, job.max_instances, works)
    }

    fn running_count(&self, job_id: &str) -> usize {
        self.pool.running_count(job_id)
    }

    async fn shutdown(&self, wait: bool) {
        self.pool.shutdown(wait).await;
    }
}

async fn run_handler(
    job: Job,
    handler: Option<Arc<dyn JobHandler>>,
    run_time: DateTime<Utc>,
    reply: ReportSender,
) {
    let started = Instant::now();
    let outcome = match handler {
        None => Outcome::failure(
            FailureKind::Unresolved,
            format!("no handler registered for {:?}", job.job_ref),
        ),
        Some(handler) => {
            let ctx = JobContext::new(&job, run_time);
            // A separate task so a panic surfaces as a JoinError.
            match tokio::spawn(async move { handler.run(ctx).await }).await {
                Ok(Ok(output)) => Outcome::Success { output },
                Ok(Err(e)) => Outcome::Failure {
                    kind: FailureKind::Handler,
                    message: e.to_string(),
                    traceback: Some(format!("{e:?}")),
                },
                Err(join) if join.is_panic() => {
                    let payload = join.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    Outcome::failure(FailureKind::Panic, message)
                }
                Err(_) => Outcome::failure(FailureKind::Cancelled, "handler task cancelled"),
            }
        }
    };

    if let Outcome::Failure { kind, message, .. } = &outcome {
        warn!(job_id = %job.id, %run_time, %kind, %message, "job failed");
    } else {
        debug!(job_id = %job.id, %run_time, "job finished");
    }
    let report = ExecutionReport::new(&job, run_time, outcome, started.elapsed());
    // The scheduler may already be gone during shutdown.
    let _ = reply.send(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, HandlerRegistry};
    use cadence_core::{JobSpec, SchedulerConfig, Trigger};
    use tokio::sync::mpsc;

    fn job(job_ref: &str) -> Job {
        let now = Utc::now();
        JobSpec::new(Trigger::parse("date", "now", now).unwrap(), job_ref)
            .id(format!("job-{job_ref}"))
            .arg(21)
            .into_job(&SchedulerConfig::default(), now)
            .unwrap()
    }

    fn registry() -> Arc<HandlerRegistry> {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "double",
            handler_fn(|ctx: JobContext| async move {
                let n = ctx.args[0].as_i64().unwrap_or_default();
                Ok(Some((n * 2).to_string()))
            }),
        );
        registry.register(
            "fail",
            handler_fn(|_ctx: JobContext| async move { Err(anyhow::anyhow!("disk full")) }),
        );
        registry.register(
            "panic",
            handler_fn(|_ctx: JobContext| async move {
                if true {
                    panic!("handler exploded");
                }
                Ok(None)
            }),
        );
        registry
    }

    async fn run_one(job_ref: &str) -> ExecutionReport {
        let executor = ThreadPoolExecutor::new(2, registry()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = job(job_ref);
        assert_eq!(executor.submit(&job, &[Utc::now()], tx), SubmitStatus::Accepted);
        executor.shutdown(true).await;
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn success_carries_output() {
        let report = run_one("double").await;
        assert_eq!(report.outcome, Outcome::Success { output: Some("42".into()) });
        assert_eq!(report.job_id, "job-double");
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let report = run_one("fail").await;
        match report.outcome {
            Outcome::Failure { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Handler);
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let report = run_one("panic").await;
        assert!(matches!(
            report.outcome,
            Outcome::Failure { kind: FailureKind::Panic, ref message, .. } if message == "handler exploded"
        ));
    }

    #[tokio::test]
    async fn each_run_time_gets_a_report() {
        let executor = ThreadPoolExecutor::new(2, registry()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = job("double");
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);
        assert_eq!(executor.submit(&job, &[first, second], tx), SubmitStatus::Accepted);
        executor.shutdown(true).await;

        let mut run_times = vec![rx.recv().await.unwrap().run_time, rx.recv().await.unwrap().run_time];
        run_times.sort();
        assert_eq!(run_times, vec![first, second]);
        assert_eq!(executor.running_count(&job.id), 0);
    }

    #[tokio::test]
    async fn unknown_ref_is_unresolved() {
        let report = run_one("nope").await;
        assert!(matches!(
            report.outcome,
            Outcome::Failure { kind: FailureKind::Unresolved, .. }
        ));
    }
}
