//! `cadence-core`: the value types every other cadence crate shares.
//!
//! * [`config`]: `cadence.toml` + `CADENCE_*` environment layering.
//! * [`clock`]: injectable time source.
//! * [`trigger`]: date / interval / cron fire-time computation.
//! * [`job`]: the stored unit of work and its run-time planning.

pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CadenceConfig, SchedulerConfig, StoreKind};
pub use error::{CoreError, Result, TriggerError};
pub use job::{DueTimes, Job, JobPatch, JobSpec};
pub use trigger::{CronFields, CronTrigger, DateTrigger, IntervalTrigger, Trigger, TriggerKind};
