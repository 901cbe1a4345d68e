//! Shared persisted domain types for the conductor pipeline.
//!
//! Everything in this crate is plain data: the `Task` document the
//! coordinator persists between runs, the branch lineage snapshot, the
//! repository descriptors and the user-injected directives. No I/O lives
//! here so that stores, the CLI and tests can all share the same shapes.

pub mod branch;
pub mod directive;
pub mod repository;
pub mod task;

pub use branch::{BranchInfo, BranchKind};
pub use directive::{Directive, DirectivePriority};
pub use repository::{RepositoryInfo, RepositoryKind};
pub use task::{
    ApprovalRecord, ApprovalStatus, ContractFixerState, ErrorHistoryEntry, Orchestration,
    PhaseRecord, PhaseStatus, Task, TaskStatus,
};

/// Error returned when parsing one of the string-backed enums fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind} '{value}'. Valid values: {expected}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}
