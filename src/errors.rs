//! Typed error hierarchy for the conductor pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError`: coordinator and context failures
//! - `PhaseError`: per-phase execution failures, rendered into `PhaseResult.error`
//! - `StoreError`: task store failures

use thiserror::Error;

/// Errors from the coordinator and the orchestration context.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Workspace path is required to run a pipeline")]
    MissingWorkspace,

    #[error("Repository {repository} already has epic branch {existing}")]
    DuplicateEpicBranch { repository: String, existing: String },

    #[error("Phase {name} is not registered with the coordinator")]
    PhaseNotFound { name: String },

    #[error("Recovery routing exceeded {hops} hops")]
    RecoveryLoop { hops: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Task cancelled by user")]
    Cancelled,

    #[error("Agent path '{path}' not found on task")]
    AgentPathNotFound { path: String },

    #[error("Conflict markers remain in: {}", files.join(", "))]
    ConflictsRemain { files: Vec<String> },

    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    #[error("git {command} timed out after {secs}s")]
    GitTimeout { command: String, secs: u64 },

    #[error("Agent execution failed: {0}")]
    Agent(#[source] anyhow::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Errors from the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task store lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}
