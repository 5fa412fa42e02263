//! `cadence-scheduler`: the main loop and the administrative API.
//!
//! # Overview
//!
//! A [`Scheduler`] owns a list of job stores and a table of executors, both
//! keyed by alias. Its loop runs on a Tokio task: each iteration asks every
//! store for due jobs, applies the misfire and coalesce policy, submits runs
//! to executors, advances `next_run_time`, then sleeps until the earliest
//! next fire time or until an administrative call wakes it.
//!
//! Executors report completions back over a channel; the loop turns them into
//! `JOB_EXECUTED` / `JOB_ERROR` events and appends them to the store history.
//!
//! ```no_run
//! # async fn demo() -> Result<(), cadence_scheduler::SchedulerError> {
//! use cadence_core::{JobSpec, Trigger};
//! use cadence_scheduler::Scheduler;
//!
//! let scheduler = Scheduler::builder().build()?;
//! scheduler.start()?;
//! let every_minute = Trigger::parse("interval", "1m", scheduler.now())?;
//! scheduler.add_job(JobSpec::new(every_minute, "date >> /tmp/ticks"))?;
//! scheduler.shutdown(true).await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
mod engine;
pub mod error;
pub mod handle;

pub use builder::SchedulerBuilder;
pub use engine::SchedulerState;
pub use error::{Result, SchedulerError};
pub use handle::Scheduler;
