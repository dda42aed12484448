//! Bucketed task multiset, blocking barrier waits, and the done-signal a
//! task fires when it reaches a terminal state (spec.md §4.4).
//!
//! Grounded on `TaskMonitoring`/`TaskBarrier` in `multitasking.py`: a
//! `Mutex`-guarded bucket-by-state count, a change-listener fan-out, and a
//! `Condvar` the barrier waits on instead of Python's `Condition.wait_for`.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::observer::{ListenerId, Observer};
use crate::task::{TaskHandle, TaskId, TaskState};

/// Per-state task counts (SPEC_FULL.md §4.4), replacing the original's seven
/// separate `num_*_tasks` accessors with a single value type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub creating: usize,
    pub prerequisites_unfulfilled: usize,
    pub executable: usize,
    pub running: usize,
    pub successful: usize,
    pub failed: usize,
    pub prerequisite_failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.creating
            + self.prerequisites_unfulfilled
            + self.executable
            + self.running
            + self.successful
            + self.failed
            + self.prerequisite_failed
    }

    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Creating => self.creating,
            TaskState::PrerequisitesUnfulfilled => self.prerequisites_unfulfilled,
            TaskState::Executable => self.executable,
            TaskState::Running => self.running,
            TaskState::Successful => self.successful,
            TaskState::Failed => self.failed,
            TaskState::PrerequisiteFailed => self.prerequisite_failed,
        }
    }

    fn bucket_mut(&mut self, state: TaskState) -> &mut usize {
        match state {
            TaskState::Creating => &mut self.creating,
            TaskState::PrerequisitesUnfulfilled => &mut self.prerequisites_unfulfilled,
            TaskState::Executable => &mut self.executable,
            TaskState::Running => &mut self.running,
            TaskState::Successful => &mut self.successful,
            TaskState::Failed => &mut self.failed,
            TaskState::PrerequisiteFailed => &mut self.prerequisite_failed,
        }
    }
}

struct State {
    counts: StateCounts,
    tasks: HashMap<TaskId, (TaskState, Arc<dyn TaskHandle>)>,
}

/// Tracks a set of tasks by current state and lets callers block on
/// aggregate predicates over that set.
pub struct Monitoring {
    state: Mutex<State>,
    condvar: Condvar,
    change_observer: Observer<StateCounts>,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitoring {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                counts: StateCounts::default(),
                tasks: HashMap::new(),
            }),
            condvar: Condvar::new(),
            change_observer: Observer::new(),
        }
    }

    /// Starts tracking `task`, bucketing it by its current state and
    /// attaching a state-change listener that keeps the bucket counts in
    /// sync for the task's whole lifetime. A task already tracked is a
    /// no-op, matching the original's dict-keyed `_tasks_per_state`
    /// membership semantics.
    pub fn add_task(self: &Arc<Self>, task: &Arc<dyn TaskHandle>) {
        let id = task.id();
        let state = task.state();
        {
            let mut guard = self.state.lock().unwrap();
            if guard.tasks.contains_key(&id) {
                return;
            }
            guard.tasks.insert(id, (state, task.clone()));
            *guard.counts.bucket_mut(state) += 1;
        }
        self.condvar.notify_all();
        self.change_observer.notify(self.counts());

        let weak = Arc::downgrade(self);
        task.add_state_change_listener(Box::new(move |previous, new| {
            if let Some(monitoring) = weak.upgrade() {
                monitoring.on_task_state_changed(id, previous, new);
            }
        }));
    }

    pub fn add_tasks<'a>(self: &Arc<Self>, tasks: impl IntoIterator<Item = &'a Arc<dyn TaskHandle>>) {
        for task in tasks {
            self.add_task(task);
        }
    }

    /// Stops tracking `id`. Used when a task is detached from an aggregate
    /// before it has run (e.g. removed from a `Prerequisites` set while
    /// still unlocked).
    pub fn remove_task(&self, id: TaskId) {
        let removed = {
            let mut guard = self.state.lock().unwrap();
            match guard.tasks.remove(&id) {
                Some((state, _)) => {
                    *guard.counts.bucket_mut(state) -= 1;
                    true
                }
                None => false,
            }
        };
        if removed {
            self.condvar.notify_all();
            self.change_observer.notify(self.counts());
        }
    }

    pub fn clear(&self) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.tasks.clear();
            guard.counts = StateCounts::default();
        }
        self.condvar.notify_all();
        self.change_observer.notify(self.counts());
    }

    fn on_task_state_changed(&self, id: TaskId, previous: TaskState, new: TaskState) {
        let counts = {
            let mut guard = self.state.lock().unwrap();
            let Some(entry) = guard.tasks.get_mut(&id) else {
                return;
            };
            entry.0 = new;
            *guard.counts.bucket_mut(previous) -= 1;
            *guard.counts.bucket_mut(new) += 1;
            guard.counts
        };
        self.condvar.notify_all();
        self.change_observer.notify(counts);
    }

    pub fn counts(&self) -> StateCounts {
        self.state.lock().unwrap().counts
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every tracked task, in no particular order. Grounded on the
    /// original's `all_tasks` property.
    pub fn handles(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .values()
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Every tracked task that has not yet left `Creating`. Grounded on the
    /// original's `unsubmitted_tasks` property.
    pub fn unsubmitted_handles(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|(state, _)| *state == TaskState::Creating)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    pub fn add_change_listener(
        &self,
        listener: impl Fn(StateCounts) + Send + Sync + 'static,
    ) -> ListenerId {
        self.change_observer.add(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) {
        self.change_observer.remove(id);
    }

    /// `True` once every tracked task has left `Creating` (spec.md §4.4).
    pub fn all_tasks_submitted(&self) -> bool {
        Self::submitted_predicate(&self.counts())
    }

    /// `True` once every tracked task has reached a terminal state.
    pub fn all_results_determined(&self) -> bool {
        Self::determined_predicate(&self.counts())
    }

    fn submitted_predicate(counts: &StateCounts) -> bool {
        counts.total() > 0 && counts.creating == 0
    }

    fn determined_predicate(counts: &StateCounts) -> bool {
        counts.total() > 0
            && counts.creating == 0
            && counts.prerequisites_unfulfilled == 0
            && counts.executable == 0
            && counts.running == 0
    }

    fn wait_until(&self, timeout: Option<Duration>, predicate: fn(&StateCounts) -> bool) -> bool {
        let guard = self.state.lock().unwrap();
        if predicate(&guard.counts) {
            return true;
        }
        match timeout {
            None => {
                let guard = self
                    .condvar
                    .wait_while(guard, |state| !predicate(&state.counts))
                    .unwrap();
                predicate(&guard.counts)
            }
            Some(timeout) => {
                let (guard, _) = self
                    .condvar
                    .wait_timeout_while(guard, timeout, |state| !predicate(&state.counts))
                    .unwrap();
                predicate(&guard.counts)
            }
        }
    }

    /// Blocks (with optional timeout) until every tracked task has left
    /// `Creating`. Returns `false` on timeout.
    pub fn wait_until_all_submitted(&self, timeout: Option<Duration>) -> bool {
        self.wait_until(timeout, Self::submitted_predicate)
    }

    /// Blocks (with optional timeout) until every tracked task's result is
    /// determined. Returns `false` on timeout.
    pub fn wait_until_all_determined(&self, timeout: Option<Duration>) -> bool {
        self.wait_until(timeout, Self::determined_predicate)
    }
}

/// A single-fire latch a task sets on reaching a terminal state, read by
/// `Task::wait_for_result`. Grounded on `synca::event::LockSignal`'s
/// `Mutex<LockState>` + `Condvar` pairing, specialized to a one-shot flag.
pub struct DoneSignal {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl DoneSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    pub fn fire(&self) {
        *self.state.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    /// Blocks (with optional timeout) until fired. Returns whether it is
    /// set by the time this returns.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.state.lock().unwrap();
        if *guard {
            return true;
        }
        match timeout {
            None => {
                let guard = self.condvar.wait_while(guard, |set| !*set).unwrap();
                *guard
            }
            Some(timeout) => {
                let (guard, _) = self
                    .condvar
                    .wait_timeout_while(guard, timeout, |set| !*set)
                    .unwrap();
                *guard
            }
        }
    }
}
