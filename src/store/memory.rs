use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use conductor_common::Task;

use super::{TaskMutation, TaskStore};
use crate::errors::{PipelineError, StoreError};

/// Process-local task store. Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Task>>> {
        self.tasks.lock().map_err(|_| StoreError::LockPoisoned.into())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let mut task = task.clone();
        task.touch();
        self.lock()?.insert(task.id.clone(), task);
        Ok(())
    }

    async fn update(&self, id: &str, mutation: TaskMutation) -> Result<Task> {
        let mut tasks = self.lock()?;
        let task = tasks.get_mut(id).ok_or_else(|| PipelineError::TaskNotFound {
            id: id.to_string(),
        })?;
        mutation(task);
        task.touch();
        Ok(task.clone())
    }

    async fn list(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.lock()?.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}
