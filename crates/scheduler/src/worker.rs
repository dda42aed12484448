//! Worker thread lifecycle (spec.md §4.6).
//!
//! Grounded on `TaskWorker`/`TaskWorkerState` in `multitasking.py`: an OS
//! thread looping on the Ready Book's blocking pop, with its own small
//! lifecycle independent of the tasks it happens to run.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::book::ReadyBook;
use crate::error::{Result, SchedulerError};
use crate::task::TaskHandle;

/// Default for how long a worker blocks on an empty Ready Book before
/// re-checking its own stop flag, mirroring the original's fixed wait
/// timeout inside `pop_next_executable_task`. Overridable via
/// [`crate::config::ProcessorConfig::with_pop_timeout`].
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(5);

thread_local! {
    /// Set for the lifetime of a main-pool worker's thread (never for the
    /// submission pool's). [`is_worker_thread`] reads this to drive the
    /// safe-submission check in `processor.rs` (spec.md §4.7): only a main
    /// worker blocking on more main-pool work risks deadlocking the pool it
    /// is itself part of — the submission worker is dedicated and exempt.
    static IS_MAIN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// `true` if the calling thread is one of a [`crate::processor::Processor`]'s
/// main-pool workers. Used by `Processor::submit_task_and_wait` to reject a
/// synchronous submission that would otherwise deadlock the pool.
pub fn is_worker_thread() -> bool {
    IS_MAIN_WORKER.with(Cell::get)
}

/// Which pool a [`Worker`] belongs to. Only [`WorkerKind::Main`] threads mark
/// themselves via [`IS_MAIN_WORKER`] — the submission pool's single worker is
/// exempt from the safe-submission check by design (spec.md §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Main,
    Submission,
}

/// The worker's own lifecycle (spec.md §4.6), distinct from the state of
/// whatever task it is currently running.
///
/// `Stopped` and `Terminate` both mean the thread has exited, but only
/// `Stopped` is restart-eligible: `Terminate` is the state a worker removed
/// during pool shrink is driven to, and it also releases the worker's
/// reference to its Ready Book (spec.md §4.7), matching the original's
/// `_remove_worker` calling `TaskWorker.__del__` explicitly rather than
/// leaving the worker for garbage collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Restarting,
    Waiting,
    Processing,
    Stopping,
    Stopped,
    Terminate,
}

/// One OS thread pulling tasks off a [`ReadyBook`] and running them.
pub struct Worker {
    id: usize,
    kind: WorkerKind,
    book: Mutex<Option<Arc<ReadyBook>>>,
    pop_timeout: Duration,
    state: Mutex<WorkerState>,
    stop_requested: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Creates and immediately starts a worker thread popping from `book`,
    /// using [`DEFAULT_POP_TIMEOUT`].
    pub fn new(id: usize, kind: WorkerKind, book: Arc<ReadyBook>) -> Result<Arc<Self>> {
        Self::with_pop_timeout(id, kind, book, DEFAULT_POP_TIMEOUT)
    }

    /// Creates and immediately starts a worker thread, overriding how long
    /// each pop blocks on an empty Ready Book before re-checking the stop
    /// flag.
    pub fn with_pop_timeout(
        id: usize,
        kind: WorkerKind,
        book: Arc<ReadyBook>,
        pop_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let worker = Arc::new(Self {
            id,
            kind,
            book: Mutex::new(Some(book)),
            pop_timeout,
            state: Mutex::new(WorkerState::Created),
            stop_requested: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        worker.start()?;
        Ok(worker)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        *self.state.lock().unwrap() = WorkerState::Waiting;
        self.stop_requested.store(false, Ordering::SeqCst);

        let worker = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("ewe-scheduler-worker-{}", self.id))
            .spawn(move || worker.run_loop())
            .map_err(SchedulerError::WorkerSpawnFailed)?;
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn run_loop(self: Arc<Self>) {
        if self.kind == WorkerKind::Main {
            IS_MAIN_WORKER.with(|flag| flag.set(true));
        }
        tracing::debug!(worker = self.id, kind = ?self.kind, "worker started");
        let Some(book) = self.book.lock().unwrap().clone() else {
            *self.state.lock().unwrap() = WorkerState::Stopped;
            return;
        };
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            *self.state.lock().unwrap() = WorkerState::Waiting;
            match book.pop_next_executable(Some(self.pop_timeout)) {
                Some(task) => {
                    *self.state.lock().unwrap() = WorkerState::Processing;
                    tracing::debug!(worker = self.id, task = %task.debug_string(), "running task");
                    task.run();
                }
                None => continue,
            }
        }
        *self.state.lock().unwrap() = WorkerState::Stopped;
        tracing::debug!(worker = self.id, "worker stopped");
    }

    /// Requests that the worker stop after its current task (if any)
    /// finishes. Idempotent; does not block — call [`Worker::join`] to wait
    /// for the thread to actually exit.
    ///
    /// A no-op once the worker has reached `Terminate`: that state is final
    /// (the worker has already released its Ready Book reference), so a
    /// later `stop()` — e.g. from `Processor`'s `Drop` after an explicit
    /// `shutdown()` already ran — must not resurrect it into `Stopping`.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == WorkerState::Terminate {
            return;
        }
        *state = WorkerState::Stopping;
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Blocks until the worker thread has exited.
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Stops the worker, waits for its thread to exit, then drives it to
    /// `Terminate` and drops its reference to the Ready Book. Used by pool
    /// shrink (spec.md §4.7) instead of [`Worker::stop`] so a removed worker
    /// is not restart-eligible, grounded on `TaskProcessor._remove_worker`
    /// explicitly calling `TaskWorker.__del__` rather than relying on
    /// garbage collection.
    pub fn terminate(&self) {
        self.stop();
        self.join();
        *self.state.lock().unwrap() = WorkerState::Terminate;
        *self.book.lock().unwrap() = None;
    }

    /// Restarts a stopped worker with a fresh thread. Only legal from
    /// `Stopped`, matching the original's `restart` precondition — a worker
    /// that is still running, or already terminated, cannot be restarted.
    pub fn restart(self: &Arc<Self>) -> Result<bool> {
        if self.state() != WorkerState::Stopped {
            return Ok(false);
        }
        *self.state.lock().unwrap() = WorkerState::Restarting;
        self.start()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskSpec};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn worker_runs_a_submitted_task_and_stops_cleanly() {
        let book = Arc::new(ReadyBook::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let task = Task::new(TaskSpec::new("t", move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, crate::error::BoxError>(1)
        }));
        book.insert(task.clone()).unwrap();

        let worker = Worker::new(0, WorkerKind::Main, book.clone()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ran.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        worker.stop();
        worker.join();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn restart_is_only_legal_once_stopped() {
        let book = Arc::new(ReadyBook::new());
        let worker = Worker::new(0, WorkerKind::Main, book).unwrap();
        assert!(!worker.restart().unwrap());
        worker.stop();
        worker.join();
        assert!(worker.restart().unwrap());
        worker.stop();
        worker.join();
    }

    #[test]
    fn terminate_is_not_restart_eligible() {
        let book = Arc::new(ReadyBook::new());
        let worker = Worker::new(0, WorkerKind::Main, book).unwrap();
        worker.terminate();
        assert_eq!(worker.state(), WorkerState::Terminate);
        assert!(!worker.restart().unwrap());
        assert_eq!(worker.state(), WorkerState::Terminate);
    }
}
