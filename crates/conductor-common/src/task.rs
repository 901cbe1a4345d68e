//! The persisted Task document.
//!
//! A Task is the unit of work a coordinator drives through the pipeline.
//! Its `orchestration` section carries everything needed to rebuild an
//! in-memory context after a crash or a suspension: per-phase records,
//! the cancellation flag, the branch registry snapshot and the contract
//! fixer retry state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ParseEnumError;
use crate::branch::BranchInfo;
use crate::directive::Directive;
use crate::repository::RepositoryInfo;

/// Overall lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::WaitingApproval => "waiting_approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one phase (or agent) sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::WaitingApproval => "waiting_approval",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhaseStatus::Pending),
            "running" => Ok(PhaseStatus::Running),
            "waiting_approval" => Ok(PhaseStatus::WaitingApproval),
            "completed" => Ok(PhaseStatus::Completed),
            "failed" => Ok(PhaseStatus::Failed),
            _ => Err(ParseEnumError {
                kind: "phase status",
                value: s.to_string(),
                expected: "pending, running, waiting_approval, completed, failed",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

/// Display-oriented approval record. The `approved` boolean on the owning
/// [`PhaseRecord`] is the authoritative gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

impl ApprovalRecord {
    pub fn pending() -> Self {
        Self {
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            approved_at: None,
            approved_by: None,
        }
    }

    pub fn approved_by(actor: &str) -> Self {
        let now = Utc::now();
        Self {
            status: ApprovalStatus::Approved,
            requested_at: now,
            approved_at: Some(now),
            approved_by: Some(actor.to_string()),
        }
    }
}

/// Persisted state of one phase or agent.
///
/// Records nest through `children` so that agents running inside a phase
/// (one per story, for instance) are addressable with a dotted path such
/// as `development.story-3`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skipped_on_recovery: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, PhaseRecord>,
}

/// One failed fix attempt as remembered by the contract fixer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub error_hash: String,
    pub error_type: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Retry budget of the contract fixer, keyed by error fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractFixerState {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_hash: Option<String>,
    #[serde(default)]
    pub error_history: Vec<ErrorHistoryEntry>,
    /// Set once the fixer abandoned a recurring error.
    #[serde(default)]
    pub gave_up: bool,
}

/// Orchestration section of the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orchestration {
    /// Phase the pipeline is suspended at (or currently running).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseRecord>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub branch_registry: Vec<BranchInfo>,
    #[serde(default)]
    pub contract_fixer: ContractFixerState,
    /// Set when new work was added to an already-processed task.
    #[serde(default)]
    pub continuation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub repositories: Vec<RepositoryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    #[serde(default)]
    pub orchestration: Orchestration,
    #[serde(default)]
    pub directives: Vec<Directive>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            repositories: Vec::new(),
            workspace_path: None,
            orchestration: Orchestration::default(),
            directives: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(workspace.into());
        self
    }

    pub fn with_repository(mut self, repository: RepositoryInfo) -> Self {
        self.repositories.push(repository);
        self
    }

    /// Bump `updated_at`; stores call this before writing.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn phase_record(&self, phase: &str) -> Option<&PhaseRecord> {
        self.orchestration.phases.get(phase)
    }

    /// Record for `phase`, created on first access.
    pub fn phase_record_mut(&mut self, phase: &str) -> &mut PhaseRecord {
        self.orchestration
            .phases
            .entry(phase.to_string())
            .or_default()
    }

    /// Navigate a dotted agent path (`planning`, `development.story-3`).
    ///
    /// Returns `None` when any segment is missing or empty.
    pub fn agent_record(&self, path: &str) -> Option<&PhaseRecord> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut record = self.orchestration.phases.get(first)?;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            record = record.children.get(segment)?;
        }
        Some(record)
    }

    /// Mutable variant of [`Task::agent_record`]. Never creates records.
    pub fn agent_record_mut(&mut self, path: &str) -> Option<&mut PhaseRecord> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut record = self.orchestration.phases.get_mut(first)?;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            record = record.children.get_mut(segment)?;
        }
        Some(record)
    }

    pub fn is_phase_completed(&self, phase: &str) -> bool {
        self.phase_record(phase)
            .is_some_and(|r| r.status == PhaseStatus::Completed)
    }

    /// Withdraw every granted approval, nested records included, so each
    /// gate asks again. Returns how many approvals were withdrawn.
    pub fn revoke_approvals(&mut self) -> usize {
        fn revoke(record: &mut PhaseRecord) -> usize {
            let mut revoked = 0;
            if record.approved {
                record.approved = false;
                record.approval = None;
                revoked += 1;
            }
            for child in record.children.values_mut() {
                revoked += revoke(child);
            }
            revoked
        }
        self.orchestration.phases.values_mut().map(revoke).sum()
    }
}
