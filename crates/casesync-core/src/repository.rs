//! Last-known task list for a case and the id-set diff between fetches.

use std::collections::HashSet;

use serde::Serialize;

use crate::{CoreError, Task, TaskId, TaskSnapshot};

/// Structural change between two snapshots, computed on task identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDiff {
    /// Tasks present in the new snapshot only, newest first.
    pub added: Vec<Task>,
    /// Tasks present in the old snapshot only, in old snapshot order.
    pub removed: Vec<Task>,
}

impl TaskDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn added_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.added.iter().map(|task| &task.id)
    }
}

/// Holds the current [`TaskSnapshot`] for one case.
#[derive(Debug, Default)]
pub struct TaskRepository {
    snapshot: TaskSnapshot,
    version: u64,
}

impl TaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot.
    pub fn current(&self) -> TaskSnapshot {
        self.snapshot.clone()
    }

    /// Bumped every time the snapshot contents change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Swap in a freshly fetched task list and report what changed.
    ///
    /// Identical input leaves the snapshot and version untouched. A list
    /// naming the same task twice is rejected and the current snapshot is
    /// kept.
    pub fn replace(&mut self, tasks: Vec<Task>) -> Result<TaskDiff, CoreError> {
        let mut new_ids = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !new_ids.insert(task.id.clone()) {
                return Err(CoreError::DuplicateTaskId(task.id.clone()));
            }
        }

        let old_ids = self.snapshot.ids();

        let mut added: Vec<Task> = tasks
            .iter()
            .filter(|task| !old_ids.contains(&task.id))
            .cloned()
            .collect();
        // Stable, so equal timestamps keep fetch order.
        added.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let removed: Vec<Task> = self
            .snapshot
            .iter()
            .filter(|task| !new_ids.contains(&task.id))
            .cloned()
            .collect();

        if self.snapshot.tasks() != tasks.as_slice() {
            self.snapshot = TaskSnapshot::from(tasks);
            self.version += 1;
        }

        Ok(TaskDiff { added, removed })
    }
}
