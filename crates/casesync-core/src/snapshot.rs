//! Immutable, shareable task list snapshots.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::{Task, TaskId};

/// All tasks known for one case at one point in time.
///
/// Cloning is cheap and never copies the tasks. A snapshot is never mutated
/// after it is built; the repository swaps in a new one instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    tasks: Arc<[Task]>,
}

impl TaskSnapshot {
    /// An empty snapshot.
    pub fn empty() -> Self {
        Self {
            tasks: Arc::from(Vec::new()),
        }
    }

    /// Tasks in fetch order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Iterate over the tasks in fetch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.get(id).is_some()
    }

    /// The identifier set of this snapshot.
    pub fn ids(&self) -> HashSet<TaskId> {
        self.tasks.iter().map(|task| task.id.clone()).collect()
    }

    /// Whether two snapshots share the same backing allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }
}

impl Default for TaskSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Task>> for TaskSnapshot {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Arc::from(tasks),
        }
    }
}

/// Serializes as a plain array of tasks.
impl Serialize for TaskSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tasks().serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a TaskSnapshot {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
