//! Dependency-aware, priority-driven task scheduler with a worker pool and
//! observable task state machines.
//!
//! See `SPEC_FULL.md` at the workspace root for the full design. The module
//! layout mirrors the component table there: [`observer`] is the fan-out
//! primitive everything else is built on; [`task`] and [`prerequisites`] make
//! up the per-task state machine and its dependency-aware readiness; and
//! [`monitoring`], [`book`], [`worker`], [`processor`] are the scheduler
//! proper, smallest building block first.

pub mod book;
pub mod config;
pub mod error;
pub mod groups;
pub mod monitoring;
pub mod observer;
pub mod prerequisites;
pub mod processor;
pub mod task;
pub mod worker;

pub use error::{BoxError, CauseError, Result, SchedulerError};
pub use monitoring::{Monitoring, StateCounts};
pub use observer::{ListenerId, Observer};
pub use prerequisites::{Prerequisites, PrerequisitesState};
pub use processor::Processor;
pub use task::{Task, TaskHandle, TaskId, TaskSpec, TaskState};
pub use worker::{Worker, WorkerState};
pub use config::ProcessorConfig;
pub use groups::TaskGroups;
