//! Priority-ordered dispatch queue (spec.md §4.5 "Ready Book").
//!
//! Grounded on `TaskBook` in `multitasking.py`: tasks are kept in
//! priority-sorted lists (`insort`-style insertion keyed by
//! `(-priority, sequence)`, giving FIFO tie-break within a priority) split
//! into "ready to run" and "waiting on prerequisites", with a blocking
//! `pop_next_executable_task` built on a condition variable instead of a
//! spin/sleep loop.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, SchedulerError};
use crate::task::{TaskHandle, TaskId, TaskState};

#[derive(Clone)]
struct Entry {
    sequence: u64,
    priority: i64,
    task: Arc<dyn TaskHandle>,
}

fn sort_key(entry: &Entry) -> (i64, u64) {
    (-entry.priority, entry.sequence)
}

fn insert_sorted(queue: &mut Vec<Entry>, entry: Entry) {
    let key = sort_key(&entry);
    let pos = queue.partition_point(|existing| sort_key(existing) <= key);
    queue.insert(pos, entry);
}

struct State {
    ready: Vec<Entry>,
    waiting: Vec<Entry>,
    next_sequence: u64,
}

/// The queue a [`crate::worker::Worker`] pops its next task from.
///
/// Newly submitted tasks land in `ready` (no unfulfilled prerequisites) or
/// `waiting`; a task in `waiting` relocates itself to `ready` the moment its
/// prerequisites resolve (or is dropped from the book entirely on
/// `PrerequisiteFailed`, since it will never run).
pub struct ReadyBook {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Default for ReadyBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyBook {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready: Vec::new(),
                waiting: Vec::new(),
                next_sequence: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Submits a batch of newly created tasks, checking the whole batch for
    /// prerequisite cycles before placing any of them (SPEC_FULL.md §9).
    ///
    /// Holds `state`'s lock across the entire batch — every task is placed
    /// on `ready`/`waiting` before the condvar is notified once — so a
    /// worker can never pop an early batch member before a later,
    /// higher-priority sibling submitted in the same call has landed
    /// (spec.md §8 S3 / Testable Property 3). Grounded on `multitasking.py`
    /// `TaskBook.extend` (822-827), which holds `self._mutex` for the whole
    /// loop for the same reason.
    pub fn extend(self: &Arc<Self>, tasks: Vec<Arc<dyn TaskHandle>>) -> Result<()> {
        detect_cycles(&tasks)?;

        let mut state = self.state.lock().unwrap();
        let mut any_ready = false;
        for task in tasks {
            if self.place_locked(&mut state, task)? {
                any_ready = true;
            }
        }
        drop(state);
        if any_ready {
            self.condvar.notify_all();
        }
        Ok(())
    }

    /// Submits a single task: `Creating -> Executable`, `Creating ->
    /// PrerequisitesUnfulfilled`, or `Creating -> PrerequisiteFailed`,
    /// depending on its prerequisites' summary state (spec.md §4.2, §4.5
    /// step 4), then places it in the matching queue (or, in the terminal
    /// case, nowhere — it will never run).
    #[tracing::instrument(skip(self, task), fields(task = %task.debug_string()))]
    pub fn insert(self: &Arc<Self>, task: Arc<dyn TaskHandle>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let became_ready = self.place_locked(&mut state, task)?;
        drop(state);
        if became_ready {
            self.condvar.notify_all();
        }
        Ok(())
    }

    /// Shared placement logic behind [`ReadyBook::insert`] and
    /// [`ReadyBook::extend`]: transitions `task` out of `Creating` and
    /// inserts it into `ready` or `waiting` under the already-held `state`
    /// guard. Returns `Ok(true)` iff the task landed on `ready`, so the
    /// caller knows whether the condvar needs notifying once the whole
    /// batch (or single task) has been placed.
    fn place_locked(self: &Arc<Self>, state: &mut State, task: Arc<dyn TaskHandle>) -> Result<bool> {
        if task.state() != TaskState::Creating {
            return Err(SchedulerError::IllegalSubmission { state: task.state() });
        }

        use crate::prerequisites::PrerequisitesState;
        let next_state = match task.prerequisites_summary() {
            None | Some(PrerequisitesState::Fulfilled) => TaskState::Executable,
            Some(PrerequisitesState::Unfulfilled) => TaskState::PrerequisitesUnfulfilled,
            Some(PrerequisitesState::Unfulfillable) => TaskState::PrerequisiteFailed,
        };
        task.set_state_dyn(next_state)?;

        if next_state == TaskState::PrerequisiteFailed {
            tracing::debug!(
                task = %task.debug_string(),
                "task's prerequisites already unfulfillable at submission; not enqueued"
            );
            return Ok(false);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let entry = Entry {
            sequence,
            priority: task.priority(),
            task: task.clone(),
        };

        if next_state == TaskState::Executable {
            insert_sorted(&mut state.ready, entry);
            tracing::debug!(task = %task.debug_string(), "task placed on ready queue");
            Ok(true)
        } else {
            insert_sorted(&mut state.waiting, entry);
            tracing::debug!(task = %task.debug_string(), "task placed on waiting queue");

            let weak_book = Arc::downgrade(self);
            let id = task.id();
            task.add_prerequisites_change_listener(Box::new(move |_previous, new| {
                if let Some(book) = weak_book.upgrade() {
                    book.on_waiting_task_prerequisites_changed(id, new);
                }
            }));
            Ok(false)
        }
    }

    /// The relocation listener of spec.md §4.5: fires when a waiting task's
    /// `Prerequisites` summary changes, drives the task's own state
    /// transition (the Ready Book is one of the legal callers of
    /// `set_state`, spec.md §5), then re-runs steps 4-6 of the insert
    /// protocol — move to `ready` if now `Executable`, drop it if the
    /// prerequisites became `Unfulfillable` (it will never run).
    fn on_waiting_task_prerequisites_changed(
        &self,
        id: TaskId,
        new_summary: crate::prerequisites::PrerequisitesState,
    ) {
        use crate::prerequisites::PrerequisitesState;

        let entry = {
            let mut state = self.state.lock().unwrap();
            let position = state.waiting.iter().position(|entry| entry.task.id() == id);
            position.map(|position| state.waiting.remove(position))
        };
        let Some(entry) = entry else {
            return;
        };

        let next_state = match new_summary {
            PrerequisitesState::Fulfilled => TaskState::Executable,
            PrerequisitesState::Unfulfillable => TaskState::PrerequisiteFailed,
            PrerequisitesState::Unfulfilled => {
                // Not a transition the waiting queue cares about; put it
                // back rather than silently losing track of the task.
                let mut state = self.state.lock().unwrap();
                insert_sorted(&mut state.waiting, entry);
                return;
            }
        };

        if let Err(error) = entry.task.set_state_dyn(next_state) {
            tracing::warn!(task = %entry.task.debug_string(), %error, "could not relocate waiting task");
            let mut state = self.state.lock().unwrap();
            insert_sorted(&mut state.waiting, entry);
            return;
        }

        match next_state {
            TaskState::Executable => {
                {
                    let mut state = self.state.lock().unwrap();
                    insert_sorted(&mut state.ready, entry);
                }
                self.condvar.notify_all();
            }
            TaskState::PrerequisiteFailed => {
                // Never executes; dropping it from the book is correct.
            }
            _ => unreachable!("next_state is only ever Executable or PrerequisiteFailed here"),
        }
    }

    /// Blocks (with optional timeout) for the next ready task, dequeuing it
    /// in priority order with FIFO tie-break. Returns `None` on timeout.
    #[tracing::instrument(skip(self))]
    pub fn pop_next_executable(&self, timeout: Option<Duration>) -> Option<Arc<dyn TaskHandle>> {
        let mut guard = self.state.lock().unwrap();
        if guard.ready.is_empty() {
            match timeout {
                None => {
                    guard = self
                        .condvar
                        .wait_while(guard, |state| state.ready.is_empty())
                        .unwrap();
                }
                Some(timeout) => {
                    let (next_guard, _) = self
                        .condvar
                        .wait_timeout_while(guard, timeout, |state| state.ready.is_empty())
                        .unwrap();
                    guard = next_guard;
                }
            }
        }
        if guard.ready.is_empty() {
            return None;
        }
        Some(guard.ready.remove(0).task)
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.state.lock().unwrap().waiting.len()
    }

    pub fn len(&self) -> usize {
        self.ready_len() + self.waiting_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Depth-first search over the submitted batch's prerequisite graph,
/// rejecting the whole batch if any task is reachable from itself.
fn detect_cycles(tasks: &[Arc<dyn TaskHandle>]) -> Result<()> {
    for task in tasks {
        let mut visited = HashSet::new();
        if reaches_itself(task.id(), task, &mut visited) {
            return Err(SchedulerError::CyclicPrerequisites);
        }
    }
    Ok(())
}

fn reaches_itself(origin: TaskId, task: &Arc<dyn TaskHandle>, visited: &mut HashSet<TaskId>) -> bool {
    for prerequisite in task.prerequisite_handles() {
        if prerequisite.id() == origin {
            return true;
        }
        if visited.insert(prerequisite.id()) && reaches_itself(origin, &prerequisite, visited) {
            return true;
        }
    }
    false
}
