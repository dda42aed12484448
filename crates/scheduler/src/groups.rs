//! Named task groups with cross-group prerequisite wiring (spec.md §6).
//!
//! Grounded on `TaskGroupCollection` in `multitasking.py`: group identifiers
//! are opaque keys mapping to a set of tasks, and
//! `set_group_with_prerequisite`/`_add_prerequisites_to_tasks` wire every
//! task in one group as a prerequisite of every task in another.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::task::{TaskHandle, TaskState};

/// A named collection of tasks, with group-to-group prerequisite wiring.
/// Group identifiers are `String` — the original's `Immutable` type bound
/// collapses to anything `Eq + Hash + Clone`, and `String` is what the Rust
/// ecosystem reaches for over a generic immutable-key abstraction
/// (SPEC_FULL.md §6).
#[derive(Default)]
pub struct TaskGroups {
    groups: HashMap<String, Vec<Arc<dyn TaskHandle>>>,
}

impl TaskGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a group's membership.
    pub fn insert(&mut self, id: impl Into<String>, tasks: Vec<Arc<dyn TaskHandle>>) {
        self.groups.insert(id.into(), tasks);
    }

    pub fn group(&self, id: &str) -> Result<&[Arc<dyn TaskHandle>]> {
        self.groups
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| SchedulerError::UnknownGroup { id: id.to_string() })
    }

    pub fn group_identifiers(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn group_size(&self, id: &str) -> Result<usize> {
        self.group(id).map(<[_]>::len)
    }

    /// Adds every task in each group named by `prerequisite_group_ids` as a
    /// prerequisite of every task in group `id` — the cross-product wiring
    /// `_add_prerequisites_to_tasks` performs in the original. Every task in
    /// `id` must still be `Creating`; a member with no `Prerequisites`
    /// aggregate yet gets one created on demand (matching
    /// `_add_prerequisites_to_tasks`'s `else: task.prerequisites =
    /// prerequisite_tasks` branch, rather than requiring one to pre-exist).
    pub fn add_prerequisite_groups(&self, id: &str, prerequisite_group_ids: &[&str]) -> Result<()> {
        let members = self.group(id)?.to_vec();
        let mut prerequisite_tasks = Vec::new();
        for group_id in prerequisite_group_ids {
            prerequisite_tasks.extend(self.group(group_id)?.iter().cloned());
        }
        for member in &members {
            for prerequisite in &prerequisite_tasks {
                member.add_prerequisite_dyn(Arc::downgrade(member), prerequisite.clone())?;
            }
        }
        Ok(())
    }

    /// Every task across every group that has not yet left `Creating`.
    /// Grounded on the original's `unsubmitted_tasks` property.
    pub fn unsubmitted_tasks(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.groups
            .values()
            .flatten()
            .filter(|task| task.state() == TaskState::Creating)
            .cloned()
            .collect()
    }

    /// Every task across every group. Grounded on the original's
    /// `all_tasks` property.
    pub fn all_tasks(&self) -> Vec<Arc<dyn TaskHandle>> {
        self.groups.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prerequisites::Prerequisites;
    use crate::task::{Task, TaskSpec};

    fn handle(label: &str) -> Arc<dyn TaskHandle> {
        Task::new(TaskSpec::new(label, || Ok::<_, crate::error::BoxError>(1)))
    }

    fn handle_with_prerequisites(label: &str) -> Arc<dyn TaskHandle> {
        Task::new(
            TaskSpec::new(label, || Ok::<_, crate::error::BoxError>(1))
                .with_prerequisites(Prerequisites::new(Vec::new())),
        )
    }

    #[test]
    fn unknown_group_is_reported() {
        let groups = TaskGroups::new();
        let err = groups.group("missing").unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownGroup { .. }));
    }

    #[test]
    fn cross_product_wiring_makes_every_upstream_task_a_prerequisite() {
        let mut groups = TaskGroups::new();
        let upstream_a = handle("upstream-a");
        let upstream_b = handle("upstream-b");
        let downstream = handle_with_prerequisites("downstream");

        groups.insert("upstream", vec![upstream_a.clone(), upstream_b.clone()]);
        groups.insert("downstream", vec![downstream.clone()]);

        groups
            .add_prerequisite_groups("downstream", &["upstream"])
            .unwrap();

        let prereqs = downstream.prerequisites().unwrap();
        assert_eq!(prereqs.len(), 2);
    }

    #[test]
    fn cross_product_wiring_creates_an_aggregate_on_demand() {
        let mut groups = TaskGroups::new();
        let upstream_a = handle("upstream-a");
        let downstream = handle("downstream");
        assert!(downstream.prerequisites().is_none());

        groups.insert("upstream", vec![upstream_a.clone()]);
        groups.insert("downstream", vec![downstream.clone()]);

        groups
            .add_prerequisite_groups("downstream", &["upstream"])
            .unwrap();

        let prereqs = downstream.prerequisites().unwrap();
        assert_eq!(prereqs.len(), 1);
    }

    #[test]
    fn unsubmitted_tasks_excludes_tasks_already_past_creating() {
        let mut groups = TaskGroups::new();
        let a = handle("a");
        let b = handle("b");
        b.set_state_dyn(TaskState::Executable).unwrap();
        groups.insert("g", vec![a.clone(), b.clone()]);

        let unsubmitted = groups.unsubmitted_tasks();
        assert_eq!(unsubmitted.len(), 1);
        assert_eq!(unsubmitted[0].id(), a.id());
    }
}
