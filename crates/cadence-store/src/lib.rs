//! `cadence-store`: where jobs live between fires.
//!
//! | Store            | Durability | Reads served from      |
//! |------------------|------------|------------------------|
//! | `MemoryJobStore` | none       | ordered in-memory index |
//! | `SqliteJobStore` | SQLite     | in-memory mirror        |
//!
//! Persistent rows carry a versioned JSON `job_state` blob (see [`codec`]).

pub mod codec;
pub mod db;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use store::JobStore;
pub use types::{DecodeFailure, HistoryEntry, JobFilter, Page, ReloadReport};
