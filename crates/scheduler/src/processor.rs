//! Worker-pool façade tying the Ready Book, Monitoring/Barrier, and worker
//! lifecycle together (spec.md §4.7).
//!
//! Grounded on `TaskProcessor` in `multitasking.py`: a resizable worker
//! pool dispatching off a priority book, a second book/worker dedicated to
//! tasks that submit further tasks (so dynamic submission from inside a
//! running task can't deadlock the main pool), and a thread-identity check
//! rejecting a synchronous wait called from one of this processor's own
//! worker threads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::book::ReadyBook;
use crate::config::ProcessorConfig;
use crate::error::{Result, SchedulerError};
use crate::monitoring::Monitoring;
use crate::task::{Task, TaskHandle};
use crate::worker::{self, Worker, WorkerKind, WorkerState};

/// A resizable pool of workers dispatching off a shared [`ReadyBook`], plus
/// a dedicated single-worker pool for tasks that submit further tasks.
pub struct Processor {
    config: Mutex<ProcessorConfig>,
    book: Arc<ReadyBook>,
    monitoring: Arc<Monitoring>,
    workers: Mutex<Vec<Arc<Worker>>>,
    submission_book: Arc<ReadyBook>,
    submission_workers: Mutex<Vec<Arc<Worker>>>,
}

impl Processor {
    pub fn new(config: ProcessorConfig) -> Result<Arc<Self>> {
        let processor = Arc::new(Self {
            book: Arc::new(ReadyBook::new()),
            submission_book: Arc::new(ReadyBook::new()),
            monitoring: Arc::new(Monitoring::new()),
            workers: Mutex::new(Vec::new()),
            submission_workers: Mutex::new(Vec::new()),
            config: Mutex::new(config),
        });
        processor.resize_workers()?;
        Ok(processor)
    }

    fn resize_workers(&self) -> Result<()> {
        let (target, pop_timeout) = {
            let config = self.config.lock().unwrap();
            (config.num_workers(), config.pop_timeout())
        };
        Self::resize_pool(&self.workers, &self.book, WorkerKind::Main, target.max(1), pop_timeout)?;
        Self::resize_pool(
            &self.submission_workers,
            &self.submission_book,
            WorkerKind::Submission,
            1,
            pop_timeout,
        )?;
        Ok(())
    }

    fn resize_pool(
        pool: &Mutex<Vec<Arc<Worker>>>,
        book: &Arc<ReadyBook>,
        kind: WorkerKind,
        target: usize,
        pop_timeout: Duration,
    ) -> Result<()> {
        let mut workers = pool.lock().unwrap();
        while workers.len() < target {
            let id = Self::lowest_free_id(&workers);
            workers.push(Worker::with_pop_timeout(id, kind, book.clone(), pop_timeout)?);
        }
        while workers.len() > target {
            if let Some(worker) = workers.pop() {
                worker.terminate();
            }
        }
        Ok(())
    }

    fn lowest_free_id(workers: &[Arc<Worker>]) -> usize {
        let mut used: Vec<usize> = workers.iter().map(|worker| worker.id()).collect();
        used.sort_unstable();
        let mut candidate = 0;
        for id in used {
            if id == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        candidate
    }

    /// Grows or shrinks the main worker pool to `num_workers` (minimum 1).
    pub fn set_num_workers(&self, num_workers: usize) -> Result<()> {
        let pop_timeout = {
            let mut config = self.config.lock().unwrap();
            *config = config.clone().with_num_workers(num_workers);
            config.pop_timeout()
        };
        Self::resize_pool(
            &self.workers,
            &self.book,
            WorkerKind::Main,
            num_workers.max(1),
            pop_timeout,
        )
    }

    pub fn num_workers(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Submits a single task onto the main Ready Book. Non-blocking.
    #[tracing::instrument(skip(self, task), fields(task = %task.debug_string()))]
    pub fn submit_task(&self, task: Arc<dyn TaskHandle>) -> Result<()> {
        self.monitoring.add_task(&task);
        self.book.insert(task)
    }

    /// Submits a batch of tasks onto the main Ready Book, rejecting the
    /// whole batch on a prerequisite cycle. Non-blocking.
    pub fn submit_tasks(&self, tasks: Vec<Arc<dyn TaskHandle>>) -> Result<()> {
        for task in &tasks {
            self.monitoring.add_task(task);
        }
        self.book.extend(tasks)
    }

    /// Submits `task` onto the dedicated submission book/worker, used for
    /// tasks whose callable itself calls back into `submit_task`/
    /// `submit_tasks` — keeping them off the main pool avoids the deadlock
    /// a worker would hit blocking on a queue only the pool itself can
    /// drain (spec.md §4.7 safe-submission rule).
    pub fn submit_submission_task(&self, task: Arc<dyn TaskHandle>) -> Result<()> {
        self.monitoring.add_task(&task);
        self.submission_book.insert(task)
    }

    /// Submits `task` and blocks until its result is determined.
    ///
    /// Returns `SchedulerError::UnsafeSubmission` instead of blocking when
    /// called from one of this processor's own worker threads: a worker
    /// waiting synchronously on a task only the same pool can run is a
    /// deadlock waiting to happen (spec.md §9). Submit via
    /// `submit_submission_task` and poll instead, from inside a task body.
    pub fn submit_task_and_wait<T: Send + Clone + 'static>(
        &self,
        task: Arc<Task<T>>,
    ) -> Result<T> {
        if worker::is_worker_thread() {
            return Err(SchedulerError::UnsafeSubmission);
        }
        let handle: Arc<dyn TaskHandle> = task.clone();
        self.submit_task(handle)?;
        task.safe_result()
    }

    /// Blocks (with optional timeout) until every task submitted so far has
    /// left `Creating`.
    pub fn wait_until_all_submitted(&self, timeout: Option<Duration>) -> bool {
        self.monitoring.wait_until_all_submitted(timeout)
    }

    /// Blocks (with optional timeout) until every task submitted so far has
    /// reached a terminal state.
    pub fn wait_until_all_determined(&self, timeout: Option<Duration>) -> bool {
        self.monitoring.wait_until_all_determined(timeout)
    }

    /// Blocks (with optional timeout) until every task in `tasks` — not the
    /// whole pool — has reached a terminal state, matching spec.md §6/§4.7's
    /// `waitAllDetermined(tasks, timeout)`.
    ///
    /// Builds a throwaway [`Monitoring`] over just `tasks` rather than
    /// reusing the pool-wide one, so a caller waiting on 2 of 10 submitted
    /// tasks isn't forced to wait on the other 8. Grounded on
    /// `TaskProcessor.wait_until_task_results_have_been_determined`
    /// (`multitasking.py:1007-1010`), which constructs a temporary barrier
    /// around the given tasks the same way.
    pub fn wait_all_determined(
        &self,
        tasks: &[Arc<dyn TaskHandle>],
        timeout: Option<Duration>,
    ) -> bool {
        let monitoring = Arc::new(Monitoring::new());
        monitoring.add_tasks(tasks.iter());
        monitoring.wait_until_all_determined(timeout)
    }

    pub fn monitoring(&self) -> &Arc<Monitoring> {
        &self.monitoring
    }

    /// Terminates every worker (main and submission pools) and waits for
    /// their threads to exit. The processor is unusable afterward — every
    /// worker lands in `Terminate`, not the restart-eligible `Stopped`.
    pub fn shutdown(&self) {
        let workers = self.workers.lock().unwrap();
        let submission_workers = self.submission_workers.lock().unwrap();
        for worker in workers.iter().chain(submission_workers.iter()) {
            worker.stop();
        }
        for worker in workers.iter().chain(submission_workers.iter()) {
            worker.terminate();
        }
    }
}

impl Drop for Processor {
    /// With `daemon_workers = true` (the default, spec.md §6), worker
    /// threads are requested to stop but this drop does not block on them —
    /// matching Python's daemon threads, which never keep the process alive
    /// past `main` exiting. `std::thread` has no such distinction for a
    /// `JoinHandle` dropped without joining; it already detaches. With
    /// `daemon_workers = false`, this runs the blocking [`Processor::shutdown`]
    /// instead, the Rust equivalent of opting out of that default.
    fn drop(&mut self) {
        let daemon = self.config.lock().unwrap().daemon_workers();
        if daemon {
            let workers = self.workers.lock().unwrap();
            let submission_workers = self.submission_workers.lock().unwrap();
            for worker in workers.iter().chain(submission_workers.iter()) {
                worker.stop();
            }
        } else {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSpec, TaskState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn processor(num_workers: usize) -> Arc<Processor> {
        Processor::new(ProcessorConfig::new(Some(num_workers))).unwrap()
    }

    #[test]
    fn submit_task_and_wait_returns_the_result() {
        let processor = processor(2);
        let task = Task::new(TaskSpec::new("t", || Ok::<_, crate::error::BoxError>(99)));
        let result = processor.submit_task_and_wait(task).unwrap();
        assert_eq!(result, 99);
        processor.shutdown();
    }

    #[test]
    fn higher_priority_tasks_run_first() {
        let processor = processor(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let make = |label: &'static str, priority: i64| {
            let order = order.clone();
            Task::new(
                TaskSpec::new(label, move || {
                    order.lock().unwrap().push(label);
                    Ok::<_, crate::error::BoxError>(())
                })
                .with_priority(priority),
            )
        };

        let low: Arc<dyn TaskHandle> = make("low", 0);
        let high: Arc<dyn TaskHandle> = make("high", 10);
        processor.submit_tasks(vec![low, high]).unwrap();

        assert!(processor.wait_until_all_determined(Some(Duration::from_secs(2))));
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
        processor.shutdown();
    }

    #[test]
    fn set_num_workers_resizes_the_pool() {
        let processor = processor(1);
        assert_eq!(processor.num_workers(), 1);
        processor.set_num_workers(3).unwrap();
        assert_eq!(processor.num_workers(), 3);
        processor.set_num_workers(1).unwrap();
        assert_eq!(processor.num_workers(), 1);
        processor.shutdown();
    }

    #[test]
    fn shrinking_the_pool_terminates_the_removed_workers() {
        let processor = processor(2);
        let removed = {
            let workers = processor.workers.lock().unwrap();
            workers[1].clone()
        };
        processor.set_num_workers(1).unwrap();
        assert_eq!(removed.state(), WorkerState::Terminate);
        processor.shutdown();
    }

    #[test]
    fn synchronous_submission_from_a_worker_thread_is_rejected() {
        let processor = processor(1);
        let outer = Arc::new(AtomicUsize::new(0));
        let outer_clone = outer.clone();
        let processor_clone = processor.clone();

        let task = Task::new(TaskSpec::new("outer", move || {
            let inner = Task::new(TaskSpec::new("inner", || Ok::<_, crate::error::BoxError>(1)));
            match processor_clone.submit_task_and_wait(inner) {
                Err(SchedulerError::UnsafeSubmission) => {
                    outer_clone.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("expected UnsafeSubmission, got {other:?}"),
            }
            Ok::<_, crate::error::BoxError>(())
        }));

        let handle: Arc<dyn TaskHandle> = task.clone();
        processor.submit_task(handle).unwrap();
        assert!(processor.wait_until_all_determined(Some(Duration::from_secs(2))));
        assert_eq!(outer.load(Ordering::SeqCst), 1);
        processor.shutdown();
    }

    #[test]
    fn wait_all_determined_returns_once_the_named_subset_finishes() {
        let processor = processor(2);

        let fast: Arc<dyn TaskHandle> = Task::new(TaskSpec::new("fast", || Ok::<_, crate::error::BoxError>(1)));
        let slow: Arc<dyn TaskHandle> = Task::new(TaskSpec::new("slow", || {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<_, crate::error::BoxError>(1)
        }));

        processor
            .submit_tasks(vec![fast.clone(), slow.clone()])
            .unwrap();

        assert!(processor.wait_all_determined(&[fast.clone()], Some(Duration::from_secs(2))));
        assert_eq!(fast.state(), TaskState::Successful);
        assert_ne!(slow.state(), TaskState::Successful);

        processor.shutdown();
    }

    #[test]
    fn non_daemon_drop_blocks_until_every_worker_exits() {
        let processor = Processor::new(
            ProcessorConfig::new(Some(2)).with_daemon_workers(false),
        )
        .unwrap();
        let workers = processor.workers.lock().unwrap().clone();
        drop(processor);
        for worker in workers {
            assert_eq!(worker.state(), WorkerState::Terminate);
        }
    }

    #[test]
    fn daemon_drop_requests_stop_without_blocking() {
        let processor = Processor::new(ProcessorConfig::new(Some(1))).unwrap();
        assert!(processor.config.lock().unwrap().daemon_workers());
        drop(processor);
    }
}
