use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_core::config::ProcessConfig;
use cadence_core::Job;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;
use crate::executor::Executor;
use crate::pool::WorkerPool;
use crate::truncate::truncate_output;
use crate::types::{ExecutionReport, FailureKind, JobContext, Outcome, ReportSender, SubmitStatus};

/// Runs each `job_ref` as a shell command in a child process.
///
/// `sh -c '<job_ref>' <job name> <args...>`: positional args arrive as `$1`,
/// `$2`, …; kwargs are exported as environment variables alongside
/// `CADENCE_JOB_ID` and `CADENCE_RUN_TIME`.
pub struct ProcessPoolExecutor {
    pool: WorkerPool,
    config: ProcessConfig,
}

impl ProcessPoolExecutor {
    pub fn new(max_workers: usize, config: ProcessConfig) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new("process", max_workers)?,
            config,
        })
    }
}

#[async_trait]
impl Executor for ProcessPoolExecutor {
    fn submit(&self, job: &Job, run_times: &[DateTime<Utc>], reply: ReportSender) -> SubmitStatus {
        let works: Vec<_> = run_times
            .iter()
            .map(|&run_time| {
                let ctx = JobContext::new(job, run_time);
                let config = self.config.clone();
                let job = job.clone();
                let reply = reply.clone();
                async move {
                    let started = Instant::now();
                    let outcome = run_command(&ctx, &config).await;
                    match &outcome {
                        Outcome::Failure { kind, message, .. } => {
                            warn!(job_id = %ctx.job_id, run_time = %ctx.run_time, %kind, %message, "command failed")
                        }
                        Outcome::Success { .. } => {
                            debug!(job_id = %ctx.job_id, run_time = %ctx.run_time, "command finished")
                        }
                    }
                    let _ = reply.send(ExecutionReport::new(&job, run_time, outcome, started.elapsed()));
                }
            })
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

async fn run_command(ctx: &JobContext, config: &ProcessConfig) -> Outcome {
    let mut command = Command::new(&config.shell);
    command
        .arg("-c")
        .arg(&ctx.job_ref)
        .arg(&ctx.job_name)
        .args(ctx.args.iter().map(value_to_arg))
        .envs(ctx.kwargs.iter().map(|(k, v)| (k.as_str(), value_to_arg(v))))
        .env("CADENCE_JOB_ID", &ctx.job_id)
        .env("CADENCE_RUN_TIME", ctx.run_time.to_rfc3339())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the wait future on timeout kills the child.
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return Outcome::failure(FailureKind::Spawn, format!("spawn failed: {e}")),
    };

    let budget = Duration::from_secs(config.timeout_secs);
    let output = match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Outcome::failure(FailureKind::Spawn, format!("wait failed: {e}")),
        Err(_elapsed) => {
            return Outcome::failure(
                FailureKind::Timeout,
                format!("timed out after {}s", config.timeout_secs),
            )
        }
    };

    let stdout = truncate_output(&clean_text(&output.stdout), config.max_output_chars);
    if output.status.success() {
        return Outcome::Success {
            output: Some(stdout),
        };
    }

    let stderr = truncate_output(&clean_text(&output.stderr), config.max_output_chars);
    let message = match output.status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    };
    Outcome::Failure {
        kind: FailureKind::ExitStatus,
        message,
        traceback: Some(stderr),
    }
}

/// Strings are passed as-is, everything else as its JSON text.
fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strip ANSI escape codes and decode as (lossy) UTF-8.
fn clean_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use cadence_core::{JobSpec, SchedulerConfig, Trigger};
    use tokio::sync::mpsc;

    fn job(cmd: &str) -> Job {
        let now = Utc::now();
        JobSpec::new(Trigger::parse("date", "now", now).unwrap(), cmd)
            .id("proc")
            .name("proc-test")
            .arg("world")
            .arg(7)
            .kwarg("GREETING", "hello")
            .into_job(&SchedulerConfig::default(), now)
            .unwrap()
    }

    async fn run(cmd: &str, config: ProcessConfig) -> ExecutionReport {
        let executor = ProcessPoolExecutor::new(1, config).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(executor.submit(&job(cmd), &[Utc::now()], tx), SubmitStatus::Accepted);
        executor.shutdown(true).await;
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn args_and_env_reach_the_command() {
        let report = run(
            r#"printf '%s %s %s %s' "$GREETING" "$1" "$2" "$CADENCE_JOB_ID""#,
            ProcessConfig::default(),
        )
        .await;
        assert_eq!(
            report.outcome,
            Outcome::Success {
                output: Some("hello world 7 proc".into())
            }
        );
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let report = run("echo broken >&2; exit 3", ProcessConfig::default()).await;
        match report.outcome {
            Outcome::Failure {
                kind,
                message,
                traceback,
            } => {
                assert_eq!(kind, FailureKind::ExitStatus);
                assert_eq!(message, "exited with status 3");
                assert_eq!(traceback.as_deref(), Some("broken\n"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let config = ProcessConfig {
            timeout_secs: 1,
            ..ProcessConfig::default()
        };
        let report = run("sleep 30", config).await;
        assert!(matches!(
            report.outcome,
            Outcome::Failure { kind: FailureKind::Timeout, .. }
        ));
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_is_truncated() {
        let config = ProcessConfig {
            max_output_chars: 10,
            ..ProcessConfig::default()
        };
        let report = run("printf '%0500d' 0", config).await;
        match report.outcome {
            Outcome::Success { output: Some(out) } => assert!(out.contains("chars omitted")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
