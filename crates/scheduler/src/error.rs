//! Error taxonomy for the scheduler (spec.md §7).

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::task::TaskState;

/// Boxed, thread-safe error type a callable returns on failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Reference-counted form of [`BoxError`] a failed task keeps internally,
/// so that `Task::result()` can be read more than once without requiring
/// the original error to implement `Clone`.
pub type CauseError = Arc<dyn StdError + Send + Sync + 'static>;

/// Every kind of failure the scheduler surfaces to callers.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Reading `result` of a task that finished in `Failed`.
    #[error("task execution failed: {task_debug}")]
    TaskExecution {
        task_debug: String,
        #[source]
        cause: CauseError,
    },

    /// Reading `result` of a task that finished in `PrerequisiteFailed`.
    #[error("a prerequisite of task failed: {task_debug}")]
    TaskPrerequisite { task_debug: String },

    /// Reading `result` of a task that has not reached a terminal state.
    #[error("task has not finished executing")]
    NotFinished,

    /// Setting `state` to a value the machine in §4.2 forbids.
    #[error("cannot transition task from {from:?} to {to:?}")]
    IllegalTransition { from: TaskState, to: TaskState },

    /// Submitting a task whose state is not `Creating`.
    #[error("cannot submit task with state {state:?}, expected Creating")]
    IllegalSubmission { state: TaskState },

    /// Mutating a `Prerequisites` aggregate after its owning task left `Creating`.
    #[error("cannot mutate a locked prerequisites aggregate")]
    LockedAggregate,

    /// Synchronously submitting a non-submission task from a worker thread.
    #[error("cannot synchronously submit a task from a worker thread; wrap it in a submission task and submit asynchronously")]
    UnsafeSubmission,

    /// A required constructor field was omitted.
    #[error("missing required argument: {field}")]
    MissingArgument { field: &'static str },

    /// A prerequisite cycle was detected at submission time (§9 open-question resolution).
    #[error("cyclic prerequisite relationship detected")]
    CyclicPrerequisites,

    /// An unknown group identifier was referenced.
    #[error("no group registered with identifier {id:?}")]
    UnknownGroup { id: String },

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread")]
    WorkerSpawnFailed(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
