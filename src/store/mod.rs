//! Persistence of Task documents.
//!
//! The pipeline treats persistence abstractly: a [`TaskStore`] can look a
//! Task up, write a whole document, and apply an atomic read-modify-write.
//! Field-level updates such as [`TaskStore::update_phase_record`] go through
//! `update` so a concurrent writer (a user setting `cancel_requested` from
//! another process, say) is never clobbered by a stale snapshot.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::{SqliteTaskStore, TaskDb};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_common::{PhaseRecord, PhaseStatus, Task};

use crate::errors::PipelineError;

/// Mutation applied to a Task inside [`TaskStore::update`].
pub type TaskMutation = Box<dyn FnOnce(&mut Task) + Send + 'static>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;

    /// Insert or replace the whole document.
    async fn save(&self, task: &Task) -> Result<()>;

    /// Atomically apply `mutation` to the stored document and return the
    /// updated copy.
    async fn update(&self, id: &str, mutation: TaskMutation) -> Result<Task>;

    async fn list(&self) -> Result<Vec<Task>>;

    /// Like `find_by_id`, but a missing task is an error.
    async fn get(&self, id: &str) -> Result<Task> {
        self.find_by_id(id).await?.ok_or_else(|| {
            PipelineError::TaskNotFound { id: id.to_string() }.into()
        })
    }

    /// Set individual fields of one phase record, leaving the rest of the
    /// document untouched. Creates the record if needed.
    async fn update_phase_record(
        &self,
        id: &str,
        phase: &str,
        update: PhaseRecordUpdate,
    ) -> Result<()> {
        let phase = phase.to_string();
        self.update(
            id,
            Box::new(move |task| update.apply(task.phase_record_mut(&phase))),
        )
        .await?;
        Ok(())
    }

    async fn is_cancel_requested(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.orchestration.cancel_requested)
    }

    /// Raise the persisted cancellation flag polled by running phases.
    async fn request_cancel(&self, id: &str) -> Result<Task> {
        self.update(
            id,
            Box::new(|task| task.orchestration.cancel_requested = true),
        )
        .await
    }
}

/// Sparse update of a [`PhaseRecord`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseRecordUpdate {
    pub status: Option<PhaseStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_on_recovery: Option<bool>,
    pub skipped_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears a previous error.
    pub error: Option<Option<String>>,
}

impl PhaseRecordUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(PhaseStatus::Running),
            started_at: Some(Utc::now()),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(PhaseStatus::Completed),
            completed_at: Some(Utc::now()),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: Some(PhaseStatus::Failed),
            completed_at: Some(Utc::now()),
            error: Some(Some(error.to_string())),
            ..Default::default()
        }
    }

    pub fn waiting_approval() -> Self {
        Self {
            status: Some(PhaseStatus::WaitingApproval),
            ..Default::default()
        }
    }

    /// Completed without running, as recorded when a phase is skipped.
    pub fn skipped_on_recovery() -> Self {
        let now = Utc::now();
        Self {
            status: Some(PhaseStatus::Completed),
            completed_at: Some(now),
            skipped_on_recovery: Some(true),
            skipped_at: Some(now),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut PhaseRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(at) = self.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            record.completed_at = Some(at);
        }
        if let Some(skipped) = self.skipped_on_recovery {
            record.skipped_on_recovery = skipped;
        }
        if let Some(at) = self.skipped_at {
            record.skipped_at = Some(at);
        }
        if let Some(error) = self.error {
            record.error = error;
        }
    }
}
