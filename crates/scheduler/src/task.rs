//! Per-task state machine (spec.md §3, §4.2).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{BoxError, CauseError, Result, SchedulerError};
use crate::observer::{ListenerId, Observer};
use crate::prerequisites::{Prerequisites, PrerequisitesState};

/// Unique, process-local task identity. Used for debug output and by the
/// Ready Book's priority ordering as the FIFO tie-break key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The task state machine (spec.md §4.2). Legal transitions are enforced by
/// [`Task::set_state`]; everything else is `SchedulerError::IllegalTransition`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Creating,
    PrerequisitesUnfulfilled,
    Executable,
    Running,
    Successful,
    Failed,
    PrerequisiteFailed,
}

impl TaskState {
    /// All seven states, in declaration order — used to build `StateCounts`.
    pub const ALL: [TaskState; 7] = [
        TaskState::Creating,
        TaskState::PrerequisitesUnfulfilled,
        TaskState::Executable,
        TaskState::Running,
        TaskState::Successful,
        TaskState::Failed,
        TaskState::PrerequisiteFailed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Successful | TaskState::Failed | TaskState::PrerequisiteFailed
        )
    }

    pub fn is_submitted(self) -> bool {
        matches!(
            self,
            TaskState::Executable | TaskState::PrerequisitesUnfulfilled
        )
    }

    fn legal_from(self, from: TaskState) -> bool {
        use TaskState::{
            Creating, Executable, Failed, PrerequisiteFailed, PrerequisitesUnfulfilled, Running,
            Successful,
        };
        match self {
            Creating => false,
            PrerequisitesUnfulfilled => from == Creating,
            Executable => matches!(from, Creating | PrerequisitesUnfulfilled),
            Running => from == Executable,
            Successful | Failed => from == Running,
            PrerequisiteFailed => !from.is_terminal() && from != Running,
        }
    }
}

/// Either a return value (`Successful`) or a failing cause (`Failed`);
/// undefined while non-terminal, and intentionally absent for
/// `PrerequisiteFailed` (no execution occurred, spec.md §3).
///
/// The failing cause is kept behind an `Arc` (rather than the `Box` a
/// callable returns) so that `result()` can be read more than once without
/// requiring the original error type to implement `Clone` — matching the
/// original's `return_value`/`failing_cause` properties, which are plain
/// reads with no consuming side effect.
pub enum Outcome<T> {
    Value(T),
    Cause(CauseError),
}

struct TaskInner<T> {
    state: TaskState,
    outcome: Option<Outcome<T>>,
}

/// A unit of work: a callable frozen at construction, an optional
/// prerequisites aggregate, a priority, and a state machine.
///
/// The original's separate `function`/`arguments`/`keywords` triple
/// (spec.md §3, §6) is realized here as a single boxed closure that has
/// already closed over its arguments — Rust has no positional/keyword
/// calling convention to preserve, so "frozen at submission" falls out of
/// the closure having captured everything it needs at construction time
/// (see SPEC_FULL.md §3).
pub struct Task<T> {
    id: TaskId,
    inner: Mutex<TaskInner<T>>,
    callable: Mutex<Option<Box<dyn FnOnce() -> std::result::Result<T, BoxError> + Send>>>,
    prerequisites: Mutex<Option<Prerequisites>>,
    priority: Mutex<i64>,
    state_observer: Mutex<Option<Observer<(TaskState, TaskState)>>>,
    prerequisites_observer: Mutex<Option<Observer<(PrerequisitesState, PrerequisitesState)>>>,
    done_signal: crate::monitoring::DoneSignal,
    print_state_changes: std::sync::atomic::AtomicBool,
    debug_label: String,
}

/// What a `Task` is constructed from. Mirrors the original's constructor
/// keyword arguments (spec.md §6): `callable`, `prerequisites?`, `priority`,
/// `state_listener?`, `prerequisites_listener?`, `print_state_changes`.
pub struct TaskSpec<T> {
    pub label: String,
    pub callable: Box<dyn FnOnce() -> std::result::Result<T, BoxError> + Send>,
    pub prerequisites: Option<Prerequisites>,
    pub priority: i64,
    pub print_state_changes: bool,
}

impl<T> TaskSpec<T> {
    pub fn new(
        label: impl Into<String>,
        callable: impl FnOnce() -> std::result::Result<T, BoxError> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            callable: Box::new(callable),
            prerequisites: None,
            priority: 0,
            print_state_changes: false,
        }
    }

    pub fn with_prerequisites(mut self, prerequisites: Prerequisites) -> Self {
        self.prerequisites = Some(prerequisites);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_print_state_changes(mut self, print: bool) -> Self {
        self.print_state_changes = print;
        self
    }
}

impl<T: Send + Clone + 'static> Task<T> {
    pub fn new(spec: TaskSpec<T>) -> Arc<Self> {
        let task = Arc::new(Self {
            id: TaskId::next(),
            inner: Mutex::new(TaskInner {
                state: TaskState::Creating,
                outcome: None,
            }),
            callable: Mutex::new(Some(spec.callable)),
            prerequisites: Mutex::new(spec.prerequisites),
            priority: Mutex::new(spec.priority),
            state_observer: Mutex::new(Some(Observer::new())),
            prerequisites_observer: Mutex::new(Some(Observer::new())),
            done_signal: crate::monitoring::DoneSignal::new(),
            print_state_changes: std::sync::atomic::AtomicBool::new(spec.print_state_changes),
            debug_label: spec.label,
        });

        if let Some(prereqs) = task.prerequisites.lock().unwrap().as_ref().cloned() {
            task.attach_prerequisites_listener(&prereqs);
        }

        if task.print_state_changes.load(Ordering::Relaxed) {
            let task_weak = Arc::downgrade(&task);
            task.add_state_change_listener(move |_previous, new_state| {
                if let Some(task) = task_weak.upgrade() {
                    tracing::info!(task = %task.debug_label, state = ?new_state, "task state changed");
                }
            });
        }

        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.debug_label
    }

    pub fn priority(&self) -> i64 {
        *self.priority.lock().unwrap()
    }

    /// Sets priority. Only legal while `state == Creating` (spec.md §3).
    pub fn set_priority(&self, priority: i64) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if inner.state != TaskState::Creating {
            return Err(SchedulerError::IllegalTransition {
                from: inner.state,
                to: inner.state,
            });
        }
        *self.priority.lock().unwrap() = priority;
        Ok(())
    }

    /// Replaces the whole prerequisites aggregate. Only legal while
    /// `state == Creating` (spec.md §3); mirrors `set_priority` for the
    /// other Creating-time-mutable field spec.md §3 lists alongside it.
    pub fn set_prerequisites(self: &Arc<Self>, prerequisites: Prerequisites) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Creating {
                return Err(SchedulerError::IllegalTransition {
                    from: inner.state,
                    to: inner.state,
                });
            }
        }
        *self.prerequisites.lock().unwrap() = Some(prerequisites.clone());
        self.attach_prerequisites_listener(&prerequisites);
        Ok(())
    }

    /// Adds a single upstream task to this task's prerequisites, creating an
    /// aggregate on demand if it has none yet (grounded on
    /// `TaskGroupCollection._add_prerequisites_to_tasks` in
    /// `multitasking.py`, which does the same rather than requiring one to
    /// pre-exist). Only legal while `state == Creating`.
    pub fn add_prerequisite(self: &Arc<Self>, prerequisite: Arc<dyn TaskHandle>) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Creating {
                return Err(SchedulerError::IllegalTransition {
                    from: inner.state,
                    to: inner.state,
                });
            }
        }
        let existing = self.prerequisites.lock().unwrap().clone();
        match existing {
            Some(prereqs) => prereqs.add_task(&prerequisite),
            None => self.set_prerequisites(Prerequisites::new(vec![prerequisite])),
        }
    }

    /// Registers the Ready-Book-independent listener that keeps this task's
    /// own state transitions driven by `prereqs`' summary changes. Shared by
    /// [`Task::new`] and [`Task::set_prerequisites`].
    fn attach_prerequisites_listener(self: &Arc<Self>, prereqs: &Prerequisites) {
        let task_weak = Arc::downgrade(self);
        prereqs.add_state_change_listener(move |previous, _new| {
            if let Some(task) = task_weak.upgrade() {
                task.on_prerequisites_changed(previous);
            }
        });
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().unwrap().state
    }

    pub fn is_determined(&self) -> bool {
        self.done_signal.is_set()
    }

    pub fn prerequisites_summary(&self) -> Option<PrerequisitesState> {
        self.prerequisites
            .lock()
            .unwrap()
            .as_ref()
            .map(Prerequisites::state)
    }

    /// The tasks this one depends on, or an empty vec if it has none.
    pub fn prerequisite_handles(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.prerequisites
            .lock()
            .unwrap()
            .as_ref()
            .map(Prerequisites::handles)
            .unwrap_or_default()
    }

    /// The prerequisites aggregate itself, if this task has one. Used by
    /// `groups.rs` to wire cross-group prerequisites onto already
    /// constructed tasks.
    pub fn prerequisites(&self) -> Option<Prerequisites> {
        self.prerequisites.lock().unwrap().clone()
    }

    /// Blocks (with optional timeout) until the task reaches a terminal
    /// state. Returns `true` if it is now determined, `false` on timeout.
    pub fn wait_for_result(&self, timeout: Option<Duration>) -> bool {
        self.done_signal.wait(timeout)
    }

    /// Returns the result, or a classified error (spec.md §7):
    /// `TaskExecution` (Failed), `TaskPrerequisite` (PrerequisiteFailed), or
    /// `NotFinished`.
    pub fn result(&self) -> Result<T> {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            TaskState::Successful => match inner.outcome.as_ref() {
                Some(Outcome::Value(value)) => Ok(value.clone()),
                _ => unreachable!("Successful task must carry a Value outcome"),
            },
            TaskState::Failed => {
                let cause = match inner.outcome.as_ref() {
                    Some(Outcome::Cause(cause)) => cause.clone(),
                    _ => unreachable!("Failed task must carry a Cause outcome"),
                };
                drop(inner);
                Err(SchedulerError::TaskExecution {
                    task_debug: format!("{self:?}"),
                    cause,
                })
            }
            TaskState::PrerequisiteFailed => {
                drop(inner);
                Err(SchedulerError::TaskPrerequisite {
                    task_debug: format!("{self:?}"),
                })
            }
            _ => Err(SchedulerError::NotFinished),
        }
    }

    /// Blocks until determined, then returns `result()`.
    pub fn safe_result(&self) -> Result<T> {
        self.wait_for_result(None);
        self.result()
    }

    pub fn add_state_change_listener(
        &self,
        listener: impl Fn(TaskState, TaskState) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.state_observer
            .lock()
            .unwrap()
            .as_ref()
            .map(|observer| observer.add(move |(previous, new)| listener(previous, new)))
    }

    pub fn remove_state_change_listener(&self, id: ListenerId) {
        if let Some(observer) = self.state_observer.lock().unwrap().as_ref() {
            observer.remove(id);
        }
    }

    pub fn add_prerequisites_change_listener(
        &self,
        listener: impl Fn(PrerequisitesState, PrerequisitesState) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.prerequisites_observer
            .lock()
            .unwrap()
            .as_ref()
            .map(|observer| observer.add(move |(previous, new)| listener(previous, new)))
    }

    pub fn remove_prerequisites_change_listener(&self, id: ListenerId) {
        if let Some(observer) = self.prerequisites_observer.lock().unwrap().as_ref() {
            observer.remove(id);
        }
    }

    fn on_prerequisites_changed(&self, previous: PrerequisitesState) {
        let current = match self.prerequisites_summary() {
            Some(state) => state,
            None => return,
        };
        if let Some(observer) = self.prerequisites_observer.lock().unwrap().as_ref() {
            observer.notify((previous, current));
        }
    }

    /// Applies a state transition, enforcing the legality table in §4.2 and
    /// running the side effects: locking prerequisites on first departure
    /// from `Creating`, notifying the state observer, releasing the
    /// prerequisites observer on `Running`, and releasing the state
    /// observer plus firing the done-signal on any terminal state.
    ///
    /// Only the Ready Book (pre-`Running` transitions) and the worker that
    /// owns this task (`Running`, `Successful`, `Failed`) are legal callers
    /// (spec.md §5 locking discipline) — this method does not itself check
    /// *who* is calling, only *whether* the transition is legal from the
    /// current state.
    pub(crate) fn set_state(&self, new_state: TaskState) -> Result<()> {
        let previous_state = {
            let mut inner = self.inner.lock().unwrap();
            if !new_state.legal_from(inner.state) {
                return Err(SchedulerError::IllegalTransition {
                    from: inner.state,
                    to: new_state,
                });
            }
            let previous = inner.state;
            inner.state = new_state;
            previous
        };

        if previous_state == TaskState::Creating {
            if let Some(prereqs) = self.prerequisites.lock().unwrap().as_ref() {
                prereqs.lock();
            }
        }

        if let Some(observer) = self.state_observer.lock().unwrap().as_ref() {
            observer.notify((previous_state, new_state));
        }

        if new_state == TaskState::Running {
            *self.prerequisites_observer.lock().unwrap() = None;
        } else if new_state.is_terminal() {
            *self.state_observer.lock().unwrap() = None;
            self.done_signal.fire();
        }

        Ok(())
    }

    /// Called by a worker immediately before invoking the callable.
    /// Transitions `Executable -> Running` and takes ownership of the
    /// callable, returning it so the worker can run it outside any lock.
    pub(crate) fn begin_running(
        &self,
    ) -> Result<Box<dyn FnOnce() -> std::result::Result<T, BoxError> + Send>> {
        self.set_state(TaskState::Running)?;
        self.callable
            .lock()
            .unwrap()
            .take()
            .ok_or(SchedulerError::NotFinished)
    }

    /// Called by a worker after the callable returns or fails.
    pub(crate) fn finish(&self, outcome: std::result::Result<T, BoxError>) {
        let mut inner = self.inner.lock().unwrap();
        let terminal = match &outcome {
            Ok(_) => TaskState::Successful,
            Err(_) => TaskState::Failed,
        };
        inner.outcome = Some(match outcome {
            Ok(value) => Outcome::Value(value),
            Err(cause) => Outcome::Cause(CauseError::from(cause)),
        });
        drop(inner);
        // set_state handles its own locking of `inner`; ignore the legality
        // result here because the worker always drives Running -> terminal.
        let _ = self.set_state(terminal);
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        let (fulfilled, total) = self
            .prerequisites
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| (p.counts().successful, p.len()))
            .unwrap_or((0, 0));
        write!(
            f,
            "Task(id: {:?}, label: {:?}, priority: {}, state: {:?}, prerequisites: {}/{})",
            self.id,
            self.debug_label,
            self.priority(),
            inner.state,
            fulfilled,
            total,
        )
    }
}

/// Type-erased handle to a task, used wherever code only needs to observe
/// or order tasks without knowing their output type (the Ready Book, the
/// Monitoring buckets, Prerequisites).
pub trait TaskHandle: Send + Sync {
    fn id(&self) -> TaskId;
    fn state(&self) -> TaskState;
    fn priority(&self) -> i64;
    fn prerequisites_summary(&self) -> Option<PrerequisitesState>;
    fn prerequisite_handles(&self) -> Vec<Arc<dyn TaskHandle>>;
    fn prerequisites(&self) -> Option<Prerequisites>;
    fn add_state_change_listener(
        &self,
        listener: Box<dyn Fn(TaskState, TaskState) + Send + Sync>,
    ) -> ListenerId;
    fn remove_state_change_listener(&self, id: ListenerId);
    fn add_prerequisites_change_listener(
        &self,
        listener: Box<dyn Fn(PrerequisitesState, PrerequisitesState) + Send + Sync>,
    ) -> ListenerId;
    fn remove_prerequisites_change_listener(&self, id: ListenerId);
    fn set_state_dyn(&self, new_state: TaskState) -> Result<()>;
    /// Replaces the whole prerequisites aggregate through a type-erased
    /// handle. `self_handle` must be a weak reference to the very `Arc<dyn
    /// TaskHandle>` this call is made through — a trait method cannot derive
    /// its own strong reference from `&self` alone, so the caller (which
    /// already holds the `Arc`) supplies it. Creating-gated, same as
    /// [`Task::set_prerequisites`].
    fn set_prerequisites_dyn(
        &self,
        self_handle: std::sync::Weak<dyn TaskHandle>,
        prerequisites: Prerequisites,
    ) -> Result<()>;
    /// Adds a single upstream task, creating the aggregate on demand if this
    /// task has none yet. See [`Task::add_prerequisite`].
    fn add_prerequisite_dyn(
        &self,
        self_handle: std::sync::Weak<dyn TaskHandle>,
        prerequisite: Arc<dyn TaskHandle>,
    ) -> Result<()>;
    /// Re-runs this task's own prerequisites-summary recomputation. Called
    /// back by the listener [`TaskHandle::set_prerequisites_dyn`] attaches.
    fn notify_prerequisites_changed_dyn(&self, previous: PrerequisitesState);
    fn debug_string(&self) -> String;
    /// Runs the callable to completion (or panic) and records the outcome.
    /// Only a [`crate::worker::Worker`] should call this, immediately after
    /// popping the task off the Ready Book.
    fn run(&self);
}

impl<T: Send + Clone + 'static> TaskHandle for Task<T> {
    fn id(&self) -> TaskId {
        Task::id(self)
    }

    fn state(&self) -> TaskState {
        Task::state(self)
    }

    fn priority(&self) -> i64 {
        Task::priority(self)
    }

    fn prerequisites_summary(&self) -> Option<PrerequisitesState> {
        Task::prerequisites_summary(self)
    }

    fn prerequisite_handles(&self) -> Vec<Arc<dyn TaskHandle>> {
        Task::prerequisite_handles(self)
    }

    fn prerequisites(&self) -> Option<Prerequisites> {
        Task::prerequisites(self)
    }

    fn set_prerequisites_dyn(
        &self,
        self_handle: std::sync::Weak<dyn TaskHandle>,
        prerequisites: Prerequisites,
    ) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != TaskState::Creating {
                return Err(SchedulerError::IllegalTransition {
                    from: inner.state,
                    to: inner.state,
                });
            }
        }
        *self.prerequisites.lock().unwrap() = Some(prerequisites.clone());
        prerequisites.add_state_change_listener(move |previous, _new| {
            if let Some(task) = self_handle.upgrade() {
                task.notify_prerequisites_changed_dyn(previous);
            }
        });
        Ok(())
    }

    fn add_prerequisite_dyn(
        &self,
        self_handle: std::sync::Weak<dyn TaskHandle>,
        prerequisite: Arc<dyn TaskHandle>,
    ) -> Result<()> {
        match Task::prerequisites(self) {
            Some(prereqs) => prereqs.add_task(&prerequisite),
            None => self.set_prerequisites_dyn(self_handle, Prerequisites::new(vec![prerequisite])),
        }
    }

    fn notify_prerequisites_changed_dyn(&self, previous: PrerequisitesState) {
        self.on_prerequisites_changed(previous);
    }

    fn add_state_change_listener(
        &self,
        listener: Box<dyn Fn(TaskState, TaskState) + Send + Sync>,
    ) -> ListenerId {
        self.state_observer
            .lock()
            .unwrap()
            .as_ref()
            .map(|observer| observer.add(move |(previous, new)| listener(previous, new)))
            .unwrap_or(ListenerId::sentinel())
    }

    fn remove_state_change_listener(&self, id: ListenerId) {
        Task::remove_state_change_listener(self, id);
    }

    fn add_prerequisites_change_listener(
        &self,
        listener: Box<dyn Fn(PrerequisitesState, PrerequisitesState) + Send + Sync>,
    ) -> ListenerId {
        self.prerequisites_observer
            .lock()
            .unwrap()
            .as_ref()
            .map(|observer| observer.add(move |(previous, new)| listener(previous, new)))
            .unwrap_or(ListenerId::sentinel())
    }

    fn remove_prerequisites_change_listener(&self, id: ListenerId) {
        Task::remove_prerequisites_change_listener(self, id);
    }

    fn set_state_dyn(&self, new_state: TaskState) -> Result<()> {
        self.set_state(new_state)
    }

    fn debug_string(&self) -> String {
        format!("{self:?}")
    }

    fn run(&self) {
        let callable = match self.begin_running() {
            Ok(callable) => callable,
            Err(error) => {
                tracing::warn!(task = %self.debug_string(), %error, "could not begin running task");
                return;
            }
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callable()));
        match outcome {
            Ok(result) => self.finish(result),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic>")
                    .to_string();
                self.finish(Err(format!("task panicked: {message}").into()));
            }
        }
    }
}

impl ListenerId {
    /// A handle that matches no real listener; used when a listener is
    /// registered against an already-released observer (e.g. adding a
    /// prerequisites listener to a task already `Running`).
    pub(crate) fn sentinel() -> Self {
        ListenerId(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_task(priority: i64) -> Arc<Task<i32>> {
        Task::new(TaskSpec::new("t", move || Ok(42)).with_priority(priority))
    }

    #[test]
    fn legal_transitions_follow_the_machine() {
        let task = ok_task(0);
        assert_eq!(task.state(), TaskState::Creating);
        task.set_state(TaskState::Executable).unwrap();
        assert_eq!(task.state(), TaskState::Executable);
        task.set_state(TaskState::Running).unwrap();
        task.finish(Ok(7));
        assert_eq!(task.state(), TaskState::Successful);
        assert!(task.is_determined());
        assert_eq!(task.result().unwrap(), 7);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let task = ok_task(0);
        let err = task.set_state(TaskState::Running).unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalTransition { .. }));
    }

    #[test]
    fn failed_task_result_is_task_execution_error() {
        let task = ok_task(0);
        task.set_state(TaskState::Executable).unwrap();
        task.set_state(TaskState::Running).unwrap();
        task.finish(Err("boom".into()));
        assert_eq!(task.state(), TaskState::Failed);
        match task.result() {
            Err(SchedulerError::TaskExecution { .. }) => {}
            other => panic!("expected TaskExecution, got {other:?}"),
        }
    }

    #[test]
    fn prerequisite_failed_task_never_executes_and_reports_task_prerequisite() {
        let task = ok_task(0);
        task.set_state(TaskState::PrerequisiteFailed).unwrap();
        match task.result() {
            Err(SchedulerError::TaskPrerequisite { .. }) => {}
            other => panic!("expected TaskPrerequisite, got {other:?}"),
        }
    }

    #[test]
    fn reading_result_before_terminal_state_is_not_finished() {
        let task = ok_task(0);
        match task.result() {
            Err(SchedulerError::NotFinished) => {}
            other => panic!("expected NotFinished, got {other:?}"),
        }
    }

    #[test]
    fn set_prerequisites_is_only_legal_while_creating() {
        let task = ok_task(0);
        let upstream: Arc<dyn TaskHandle> = ok_task(0);
        task.set_prerequisites(Prerequisites::new(vec![upstream]))
            .unwrap();
        assert_eq!(task.prerequisites_summary(), Some(PrerequisitesState::Unfulfilled));

        task.set_state(TaskState::PrerequisitesUnfulfilled).unwrap();
        let err = task
            .set_prerequisites(Prerequisites::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalTransition { .. }));
    }

    #[test]
    fn add_prerequisite_creates_an_aggregate_on_demand() {
        let task = ok_task(0);
        assert!(task.prerequisites().is_none());

        let upstream: Arc<dyn TaskHandle> = ok_task(0);
        task.add_prerequisite(upstream.clone()).unwrap();
        let prereqs = task.prerequisites().unwrap();
        assert_eq!(prereqs.len(), 1);
        assert_eq!(task.prerequisites_summary(), Some(PrerequisitesState::Unfulfilled));

        let second_upstream: Arc<dyn TaskHandle> = ok_task(0);
        task.add_prerequisite(second_upstream).unwrap();
        assert_eq!(task.prerequisites().unwrap().len(), 2);
    }
}
