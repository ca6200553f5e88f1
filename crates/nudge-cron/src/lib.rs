//! nudge-cron: job store, schedule evaluation, and the scheduler loop.
//!
//! The store persists job records to SQLite; the evaluator maps a schedule
//! plus "last fired" marker to the next fire instant; the scheduler wakes at
//! the earliest due time and hands firings to a [`scheduler::JobExecutor`].

pub mod parse;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use parse::{CronExpr, CronParseError};
pub use schedule::next_fire_time;
pub use scheduler::{JobExecutor, Scheduler, SchedulerHandle};
pub use store::{JobStore, StoreError};
