//! Local task cache.
//!
//! The single in-memory source of truth for the current viewer's task
//! list. All three mutators are idempotent, which lets the optimistic
//! path and the change-feed path apply the same logical event without
//! producing duplicates or errors.

use crate::task::{sort_tasks, Task};

/// Ordered in-memory task collection, newest first.
#[derive(Debug, Default)]
pub struct TaskCache {
    tasks: Vec<Task>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Insert a task, keeping the ordering invariant.
    ///
    /// Inserting an already-present id degrades to a replace.
    pub fn insert(&mut self, task: Task) {
        match self.position(&task.id) {
            Some(index) => self.tasks[index] = task,
            None => {
                self.tasks.push(task);
                sort_tasks(&mut self.tasks);
            }
        }
    }

    /// Replace the entry with the same id; absent ids are a no-op.
    pub fn replace(&mut self, task: Task) {
        if let Some(index) = self.position(&task.id) {
            self.tasks[index] = task;
            // A replace may change created_at (placeholder -> confirmed row).
            sort_tasks(&mut self.tasks);
        }
    }

    /// Remove by id; absent ids are a no-op.
    pub fn remove(&mut self, id: &str) {
        self.tasks.retain(|task| task.id != id);
    }

    /// Swap out the entire contents. Resync-only: incremental application
    /// is preferred during normal operation.
    pub fn replace_all(&mut self, mut tasks: Vec<Task>) {
        sort_tasks(&mut tasks);
        self.tasks = tasks;
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.position(id).map(|index| &self.tasks[index])
    }

    /// Clone of the entry, retained by the orchestrator for revert.
    pub fn snapshot(&self, id: &str) -> Option<Task> {
        self.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == id)
    }
}
