//! `cadence-events`: what the scheduler tells the outside world.
//!
//! Listeners register with an [`EventMask`] and are invoked synchronously,
//! in registration order, for every matching [`SchedulerEvent`].

pub mod engine;
pub mod types;

pub use engine::EventBus;
pub use types::{EventKind, EventListener, EventMask, RemovalReason, SchedulerEvent};
