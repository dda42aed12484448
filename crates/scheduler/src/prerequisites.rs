//! Derived prerequisites aggregate (spec.md §4.3).
//!
//! Grounded on `TaskPrerequisites(TaskMonitoring)` in `multitasking.py`: a
//! `Monitoring` instance plus a derived summary state recomputed on every
//! bucket change, and a `_is_locked` flag that freezes membership once the
//! owning task leaves `Creating`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, SchedulerError};
use crate::monitoring::{Monitoring, StateCounts};
use crate::observer::{ListenerId, Observer};
use crate::task::TaskHandle;

/// Derived summary of a prerequisite set (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrerequisitesState {
    Unfulfilled,
    Fulfilled,
    Unfulfillable,
}

fn compute_state(counts: &StateCounts) -> PrerequisitesState {
    let failed = counts.failed + counts.prerequisite_failed;
    if failed > 0 {
        return PrerequisitesState::Unfulfillable;
    }
    if counts.total() - counts.successful > 0 {
        PrerequisitesState::Unfulfilled
    } else {
        PrerequisitesState::Fulfilled
    }
}

struct Core {
    monitoring: Arc<Monitoring>,
    state: Mutex<PrerequisitesState>,
    locked: AtomicBool,
    state_observer: Observer<(PrerequisitesState, PrerequisitesState)>,
}

/// A set of tasks another task depends on, with a derived
/// [`PrerequisitesState`] that recomputes as member tasks progress.
///
/// Cheap to clone: internally a single `Arc`, the way `ewe_channels`' sender
/// and receiver handles wrap their shared state.
#[derive(Clone)]
pub struct Prerequisites(Arc<Core>);

impl Prerequisites {
    pub fn new(tasks: impl IntoIterator<Item = Arc<dyn TaskHandle>>) -> Self {
        let monitoring = Arc::new(Monitoring::new());
        for task in tasks {
            monitoring.add_task(&task);
        }
        let initial_state = compute_state(&monitoring.counts());
        let core = Arc::new(Core {
            monitoring,
            state: Mutex::new(initial_state),
            locked: AtomicBool::new(false),
            state_observer: Observer::new(),
        });

        let weak = Arc::downgrade(&core);
        core.monitoring.add_change_listener(move |counts| {
            if let Some(core) = weak.upgrade() {
                Prerequisites(core).on_counts_changed(counts);
            }
        });

        Prerequisites(core)
    }

    pub fn is_locked(&self) -> bool {
        self.0.locked.load(Ordering::SeqCst)
    }

    /// Freezes membership. Called once by the owning task's first
    /// departure from `Creating`.
    pub(crate) fn lock(&self) {
        self.0.locked.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> PrerequisitesState {
        *self.0.state.lock().unwrap()
    }

    pub fn counts(&self) -> StateCounts {
        self.0.monitoring.counts()
    }

    pub fn len(&self) -> usize {
        self.0.monitoring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The member tasks, used by the Ready Book to walk the prerequisite
    /// graph for cycle detection (SPEC_FULL.md §9).
    pub fn handles(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.0.monitoring.handles()
    }

    /// Adds another prerequisite task. Rejected with
    /// `SchedulerError::LockedAggregate` once the owning task has left
    /// `Creating`.
    pub fn add_task(&self, task: &Arc<dyn TaskHandle>) -> Result<()> {
        if self.is_locked() {
            return Err(SchedulerError::LockedAggregate);
        }
        self.0.monitoring.add_task(task);
        Ok(())
    }

    /// Removes a prerequisite task. Rejected with
    /// `SchedulerError::LockedAggregate` once the owning task has left
    /// `Creating` — grounded on `TaskPrerequisites.remove_tasks` in
    /// `multitasking.py`, which guards removal with the same `is_locked`
    /// check as `add_tasks`.
    pub fn remove_task(&self, task: &Arc<dyn TaskHandle>) -> Result<()> {
        if self.is_locked() {
            return Err(SchedulerError::LockedAggregate);
        }
        self.0.monitoring.remove_task(task.id());
        Ok(())
    }

    /// Removes a batch of prerequisite tasks. See [`Prerequisites::remove_task`].
    pub fn remove_tasks(&self, tasks: impl IntoIterator<Item = Arc<dyn TaskHandle>>) -> Result<()> {
        if self.is_locked() {
            return Err(SchedulerError::LockedAggregate);
        }
        for task in tasks {
            self.0.monitoring.remove_task(task.id());
        }
        Ok(())
    }

    pub fn add_state_change_listener(
        &self,
        listener: impl Fn(PrerequisitesState, PrerequisitesState) + Send + Sync + 'static,
    ) -> ListenerId {
        self.0.state_observer.add(listener)
    }

    pub fn remove_state_change_listener(&self, id: ListenerId) {
        self.0.state_observer.remove(id);
    }

    fn on_counts_changed(&self, counts: StateCounts) {
        let (previous, new_state) = {
            let mut guard = self.0.state.lock().unwrap();
            let previous = *guard;
            let new_state = compute_state(&counts);
            *guard = new_state;
            (previous, new_state)
        };
        if previous != new_state {
            self.0.state_observer.notify((previous, new_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskSpec, TaskState};

    fn handle(label: &str) -> Arc<dyn TaskHandle> {
        Task::new(TaskSpec::new(label, || Ok::<_, crate::error::BoxError>(1)))
    }

    #[test]
    fn empty_prerequisites_start_fulfilled() {
        let prereqs = Prerequisites::new(Vec::new());
        assert_eq!(prereqs.state(), PrerequisitesState::Fulfilled);
    }

    #[test]
    fn becomes_fulfilled_once_every_member_succeeds() {
        let a = handle("a");
        let b = handle("b");
        let prereqs = Prerequisites::new(vec![a.clone(), b.clone()]);
        assert_eq!(prereqs.state(), PrerequisitesState::Unfulfilled);

        a.set_state_dyn(TaskState::Executable).unwrap();
        a.set_state_dyn(TaskState::Running).unwrap();
        a.set_state_dyn(TaskState::Successful).unwrap();
        assert_eq!(prereqs.state(), PrerequisitesState::Unfulfilled);

        b.set_state_dyn(TaskState::Executable).unwrap();
        b.set_state_dyn(TaskState::Running).unwrap();
        b.set_state_dyn(TaskState::Successful).unwrap();
        assert_eq!(prereqs.state(), PrerequisitesState::Fulfilled);
    }

    #[test]
    fn one_failure_makes_the_whole_set_unfulfillable() {
        let a = handle("a");
        let b = handle("b");
        let prereqs = Prerequisites::new(vec![a.clone(), b.clone()]);

        a.set_state_dyn(TaskState::Executable).unwrap();
        a.set_state_dyn(TaskState::Running).unwrap();
        a.set_state_dyn(TaskState::Failed).unwrap();

        assert_eq!(prereqs.state(), PrerequisitesState::Unfulfillable);
    }

    #[test]
    fn locked_aggregate_rejects_new_members() {
        let prereqs = Prerequisites::new(Vec::new());
        prereqs.lock();
        let err = prereqs.add_task(&handle("late")).unwrap_err();
        assert!(matches!(err, SchedulerError::LockedAggregate));
    }

    #[test]
    fn removing_the_only_unfulfilled_member_makes_the_set_fulfilled() {
        let a = handle("a");
        let b = handle("b");
        let prereqs = Prerequisites::new(vec![a.clone(), b.clone()]);
        assert_eq!(prereqs.state(), PrerequisitesState::Unfulfilled);

        prereqs.remove_task(&b).unwrap();
        assert_eq!(prereqs.len(), 1);

        a.set_state_dyn(TaskState::Executable).unwrap();
        a.set_state_dyn(TaskState::Running).unwrap();
        a.set_state_dyn(TaskState::Successful).unwrap();
        assert_eq!(prereqs.state(), PrerequisitesState::Fulfilled);
    }

    #[test]
    fn locked_aggregate_rejects_removal() {
        let a = handle("a");
        let prereqs = Prerequisites::new(vec![a.clone()]);
        prereqs.lock();
        let err = prereqs.remove_task(&a).unwrap_err();
        assert!(matches!(err, SchedulerError::LockedAggregate));
        assert_eq!(prereqs.len(), 1);
    }

    #[test]
    fn remove_tasks_detaches_a_batch() {
        let a = handle("a");
        let b = handle("b");
        let prereqs = Prerequisites::new(vec![a.clone(), b.clone()]);
        prereqs.remove_tasks(vec![a, b]).unwrap();
        assert_eq!(prereqs.len(), 0);
        assert_eq!(prereqs.state(), PrerequisitesState::Fulfilled);
    }
}
