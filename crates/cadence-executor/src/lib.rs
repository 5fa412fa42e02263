//! `cadence-executor`: runs what the scheduler dispatches.
//!
//! Both executors share a [`WorkerPool`]: a fixed number of workers, a
//! bounded backlog, and per-job instance counts used to enforce
//! `max_instances`. Completion is reported over an mpsc channel as an
//! [`ExecutionReport`].
//!
//! | Executor              | `job_ref` is                  |
//! |-----------------------|-------------------------------|
//! | `ThreadPoolExecutor`  | a key in a [`Resolver`]       |
//! | `ProcessPoolExecutor` | a shell command               |

pub mod error;
pub mod executor;
pub mod handler;
pub mod pool;
pub mod process;
pub mod thread;
pub mod truncate;
pub mod types;

pub use error::{ExecutorError, Result};
pub use executor::Executor;
pub use handler::{handler_fn, HandlerRegistry, JobHandler, Resolver};
pub use pool::WorkerPool;
pub use process::ProcessPoolExecutor;
pub use thread::ThreadPoolExecutor;
pub use types::{
    ExecutionReport, FailureKind, JobContext, Outcome, ReportReceiver, ReportSender, SubmitStatus,
};
