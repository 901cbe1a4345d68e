use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use conductor_common::Task;
use rusqlite::{Connection, OptionalExtension, params};

use super::{TaskMutation, TaskStore};
use crate::errors::{PipelineError, StoreError};

/// Synchronous SQLite access. Each task is one row holding its JSON document.
pub struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    document TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query task")?;
        document
            .map(|doc| serde_json::from_str(&doc).context("Failed to decode task document"))
            .transpose()
    }

    pub fn put_task(&self, task: &Task) -> Result<()> {
        let document = serde_json::to_string(task).context("Failed to encode task document")?;
        self.conn
            .execute(
                "INSERT INTO tasks (id, status, document, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    status = ?2,
                    document = ?3,
                    updated_at = ?5",
                params![
                    task.id,
                    task.status.as_str(),
                    document,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339()
                ],
            )
            .context("Failed to upsert task")?;
        Ok(())
    }

    /// Read-modify-write inside one immediate transaction.
    pub fn update_task(&mut self, id: &str, mutation: TaskMutation) -> Result<Task> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;
        let document: Option<String> = tx
            .query_row(
                "SELECT document FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query task")?;
        let document = document.ok_or_else(|| PipelineError::TaskNotFound { id: id.to_string() })?;
        let mut task: Task =
            serde_json::from_str(&document).context("Failed to decode task document")?;
        mutation(&mut task);
        task.touch();
        let document = serde_json::to_string(&task).context("Failed to encode task document")?;
        tx.execute(
            "UPDATE tasks SET status = ?1, document = ?2, updated_at = ?3 WHERE id = ?4",
            params![task.status.as_str(), document, task.updated_at.to_rfc3339(), id],
        )
        .context("Failed to update task")?;
        tx.commit().context("Failed to commit task update")?;
        Ok(task)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM tasks ORDER BY created_at ASC")
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let document = row.context("Failed to read task row")?;
            tasks.push(serde_json::from_str(&document).context("Failed to decode task document")?);
        }
        Ok(tasks)
    }
}

/// Async-safe handle to the task database.
///
/// Wraps `TaskDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads (the cancellation poller shares the
/// runtime with phase work).
#[derive(Clone)]
pub struct SqliteTaskStore {
    inner: Arc<std::sync::Mutex<TaskDb>>,
}

impl SqliteTaskStore {
    pub fn new(db: TaskDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let db = TaskDb::new(path).map_err(StoreError::Database)?;
        Ok(Self::new(db))
    }

    /// Run a closure with access to the database on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut TaskDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .context("DB task panicked")?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let id = id.to_string();
        self.call(move |db| db.get_task(&id)).await
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let mut task = task.clone();
        task.touch();
        self.call(move |db| db.put_task(&task)).await
    }

    async fn update(&self, id: &str, mutation: TaskMutation) -> Result<Task> {
        let id = id.to_string();
        self.call(move |db| db.update_task(&id, mutation)).await
    }

    async fn list(&self) -> Result<Vec<Task>> {
        self.call(|db| db.list_tasks()).await
    }
}
