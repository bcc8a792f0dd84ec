//! # Anchora Engine
//!
//! The backup scheduling and execution engine: schedule CRUD, the
//! discrete-minute due-schedule evaluator with overdue recovery, the backup
//! executor (fetch, archive, upload, log, prune, notify), and the
//! long-running scheduler loop.
//!
//! ## Architecture
//!
//! - `schedule`: validated weekly schedules and next-run computation
//! - `log`: the append-mostly audit log and its conditional running insert
//! - `evaluator`: pure due-set computation over wall clock plus history
//! - `archive`: the per-collection ZIP artifact format
//! - `executor`: one backup execution end to end
//! - `runtime`: the tick loop, worker pool, and graceful shutdown

#![warn(clippy::all)]

pub mod archive;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod log;
pub mod runtime;
pub mod schedule;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use evaluator::ScheduleEvaluator;
pub use executor::{
    AdHocBackup, BackupExecutor, ExecutionAuth, ExecutionOutcome, ExecutionRequest,
};
pub use log::{BackupLog, ExecutionHistory, LogStatus, LogStore};
pub use runtime::SchedulerLoop;
pub use schedule::{
    BackupSchedule, Destination, NewSchedule, ScheduleStore, ScheduleUpdate, ScheduleView,
    WeeklySchedule,
};
