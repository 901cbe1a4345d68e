//! In-memory state shared by every phase of one pipeline run.
//!
//! The coordinator builds exactly one [`OrchestrationContext`] per task run
//! and hands it to each phase in turn. Nothing here touches the store: the
//! persisted Task is only a snapshot, refreshed by the coordinator or by a
//! phase that needs the latest externally-mutated flags. Progress reports
//! go to the run's notification sink.

mod branches;
mod directives;
mod history;
pub mod keys;

pub use branches::BranchRegistry;
pub use directives::directives_block;
pub use history::{ConversationHistory, ConversationTurn, DEFAULT_HISTORY_BUDGET_CHARS, TurnRole};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use conductor_common::{BranchInfo, RepositoryInfo, RepositoryKind, Task};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::PipelineError;
use crate::notify::{NotificationSink, PipelineEvent, TracingNotifier};
use crate::phase::{CancellationFlag, PhaseMetrics, PhaseResult};

pub struct OrchestrationContext {
    task: Task,
    repositories: Vec<RepositoryInfo>,
    workspace_path: PathBuf,
    phase_results: HashMap<String, PhaseResult>,
    run_metrics: PhaseMetrics,
    shared_data: HashMap<String, Value>,
    branches: BranchRegistry,
    history: ConversationHistory,
    continuation: bool,
    cancellation: CancellationFlag,
    notifier: Arc<dyn NotificationSink>,
}

impl OrchestrationContext {
    /// Create a context for `task` rooted at `workspace_path`.
    ///
    /// An empty workspace path is a fatal precondition.
    pub fn new(task: Task, workspace_path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let workspace_path = workspace_path.into();
        if workspace_path.as_os_str().is_empty() {
            return Err(PipelineError::MissingWorkspace);
        }
        Ok(Self {
            repositories: task.repositories.clone(),
            branches: BranchRegistry::restore(&task.orchestration.branch_registry),
            continuation: task.orchestration.continuation,
            task,
            workspace_path,
            phase_results: HashMap::new(),
            run_metrics: PhaseMetrics::default(),
            shared_data: HashMap::new(),
            history: ConversationHistory::default(),
            cancellation: CancellationFlag::new(),
            notifier: Arc::new(TracingNotifier),
        })
    }

    /// Rebuild a context from the persisted Task alone, as done when a run
    /// resumes after a suspension or a crash.
    pub fn from_task(task: Task) -> Result<Self, PipelineError> {
        let workspace = task
            .workspace_path
            .clone()
            .ok_or(PipelineError::MissingWorkspace)?;
        Self::new(task, workspace)
    }

    // ── Task snapshot ─────────────────────────────────────────────────

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    /// Replace the task snapshot with a freshly read copy.
    pub fn refresh_task(&mut self, task: Task) {
        self.task = task;
    }

    /// Write the in-memory branch registry back into the task snapshot.
    pub fn sync_branches_into_task(&mut self) {
        self.task.orchestration.branch_registry = self.branches.snapshot();
    }

    // ── Repositories ──────────────────────────────────────────────────

    pub fn repositories(&self) -> &[RepositoryInfo] {
        &self.repositories
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryInfo> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn repositories_of_kind(&self, kind: RepositoryKind) -> Vec<&RepositoryInfo> {
        self.repositories.iter().filter(|r| r.kind == kind).collect()
    }

    /// Absolute path of a repository checkout inside the workspace.
    pub fn repository_path(&self, repository: &RepositoryInfo) -> PathBuf {
        self.workspace_path.join(&repository.path)
    }

    // ── Shared data ───────────────────────────────────────────────────

    pub fn set_data(&mut self, key: &str, value: impl Into<Value>) {
        self.shared_data.insert(key.to_string(), value.into());
    }

    /// Store any serializable value under `key`.
    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        self.shared_data.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.shared_data.get(key)
    }

    /// Deserialize the value under `key`; `None` if absent or of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.shared_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.shared_data.get(key).and_then(Value::as_str)
    }

    /// Missing or non-boolean values read as `false`.
    pub fn get_flag(&self, key: &str) -> bool {
        self.shared_data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn remove_data(&mut self, key: &str) -> Option<Value> {
        self.shared_data.remove(key)
    }

    /// Ask the coordinator to run `phase` next.
    pub fn request_phase(&mut self, phase: &str) {
        self.set_data(keys::NEXT_PHASE, phase);
    }

    pub fn requested_phase(&self) -> Option<&str> {
        self.get_str(keys::NEXT_PHASE)
    }

    pub fn take_requested_phase(&mut self) -> Option<String> {
        match self.shared_data.remove(keys::NEXT_PHASE) {
            Some(Value::String(phase)) => Some(phase),
            _ => None,
        }
    }

    // ── Phase results ─────────────────────────────────────────────────

    /// Record a result; re-running a phase overwrites its prior result but
    /// its metrics still count toward the run totals.
    pub fn set_phase_result(&mut self, result: PhaseResult) {
        self.phase_results.insert(result.phase_name.clone(), result);
    }

    pub fn record_metrics(&mut self, metrics: &PhaseMetrics) {
        self.run_metrics.add(metrics);
    }

    pub fn run_metrics(&self) -> &PhaseMetrics {
        &self.run_metrics
    }

    pub fn get_phase_result(&self, phase: &str) -> Option<&PhaseResult> {
        self.phase_results.get(phase)
    }

    pub fn phase_results(&self) -> &HashMap<String, PhaseResult> {
        &self.phase_results
    }

    pub fn all_phases_passed(&self) -> bool {
        self.phase_results.values().all(|r| r.success)
    }

    // ── Branches ──────────────────────────────────────────────────────

    pub fn branches(&self) -> &BranchRegistry {
        &self.branches
    }

    pub fn register_branch(&mut self, info: BranchInfo) -> Result<(), PipelineError> {
        self.branches.register(info)
    }

    pub fn get_branch(&self, name: &str) -> Option<&BranchInfo> {
        self.branches.get(name)
    }

    pub fn get_epic_branch(&self, repository: &str) -> Option<&BranchInfo> {
        self.branches.get_epic_branch(repository)
    }

    pub fn get_story_branches(&self, epic_id: &str, repository: Option<&str>) -> Vec<&BranchInfo> {
        self.branches.get_story_branches(epic_id, repository)
    }

    pub fn mark_branch_pushed(&mut self, name: &str) {
        self.branches.mark_pushed(name);
    }

    pub fn mark_branch_merged(&mut self, name: &str) {
        self.branches.mark_merged(name);
    }

    // ── Directives and history ────────────────────────────────────────

    /// Prompt block with the directives from the task snapshot that apply to
    /// `agent_type`; empty when none apply.
    pub fn get_directives_block(&self, agent_type: Option<&str>) -> String {
        directives_block(&self.task.directives, agent_type)
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ConversationHistory {
        &mut self.history
    }

    /// Prompt block with the newest exchanges of this run; empty before the
    /// first agent call.
    pub fn history_block(&self, max_chars: usize) -> String {
        if self.history.is_empty() {
            return String::new();
        }
        format!(
            "## Earlier exchanges in this run\n\n{}",
            self.history.render_recent(max_chars)
        )
    }

    // ── Run flags ─────────────────────────────────────────────────────

    pub fn is_continuation(&self) -> bool {
        self.continuation
    }

    pub fn set_continuation(&mut self, continuation: bool) {
        self.continuation = continuation;
    }

    /// Flag raised by the cancellation poller while a phase runs.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    // ── Progress ──────────────────────────────────────────────────────

    pub fn set_notifier(&mut self, notifier: Arc<dyn NotificationSink>) {
        self.notifier = notifier;
    }

    /// Report a milestone inside a running phase.
    pub fn report_progress(&self, phase: &str, message: impl Into<String>) {
        self.notifier.notify(PipelineEvent::PhaseProgress {
            task_id: self.task.id.clone(),
            phase: phase.to_string(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::{Directive, DirectivePriority};

    fn task() -> Task {
        Task::new("Checkout", "")
            .with_workspace("/tmp/ws")
            .with_repository(RepositoryInfo::new("web", RepositoryKind::Frontend, "web"))
            .with_repository(RepositoryInfo::new("api", RepositoryKind::Backend, "services/api"))
    }

    #[test]
    fn test_empty_workspace_is_fatal() {
        let result = OrchestrationContext::new(task(), "");
        assert!(matches!(result, Err(PipelineError::MissingWorkspace)));
    }

    #[test]
    fn test_from_task_requires_workspace() {
        let mut t = task();
        t.workspace_path = None;
        assert!(matches!(
            OrchestrationContext::from_task(t),
            Err(PipelineError::MissingWorkspace)
        ));
    }

    #[test]
    fn test_from_task_restores_branch_snapshot() {
        let mut t = task();
        let mut epic = BranchInfo::epic("epic/e1-web", "e1", "web", "main");
        epic.pushed = true;
        t.orchestration.branch_registry.push(epic);
        t.orchestration.continuation = true;

        let ctx = OrchestrationContext::from_task(t).unwrap();
        assert!(ctx.get_epic_branch("web").unwrap().pushed);
        assert!(ctx.is_continuation());
        assert_eq!(ctx.repositories().len(), 2);
    }

    #[test]
    fn test_repository_path_joins_workspace() {
        let ctx = OrchestrationContext::from_task(task()).unwrap();
        let api = ctx.repository("api").unwrap();
        assert_eq!(
            ctx.repository_path(api),
            PathBuf::from("/tmp/ws/services/api")
        );
    }

    #[test]
    fn test_shared_data_accessors() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        ctx.set_data(keys::E2E_ERROR_TYPE, "cors");
        ctx.set_data(keys::E2E_REQUESTS_FIX, true);
        assert_eq!(ctx.get_str(keys::E2E_ERROR_TYPE), Some("cors"));
        assert!(ctx.get_flag(keys::E2E_REQUESTS_FIX));
        assert!(!ctx.get_flag("missing"));
        ctx.remove_data(keys::E2E_REQUESTS_FIX);
        assert!(!ctx.get_flag(keys::E2E_REQUESTS_FIX));
    }

    #[test]
    fn test_set_json_and_get_as() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        ctx.set_json("files", &vec!["a.ts", "b.ts"]).unwrap();
        let files: Vec<String> = ctx.get_as("files").unwrap();
        assert_eq!(files, vec!["a.ts", "b.ts"]);
        let wrong: Option<u32> = ctx.get_as("files");
        assert!(wrong.is_none());
    }

    #[test]
    fn test_requested_phase_is_taken_once() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        ctx.request_phase("contract-fixer");
        assert_eq!(ctx.requested_phase(), Some("contract-fixer"));
        assert_eq!(ctx.take_requested_phase().as_deref(), Some("contract-fixer"));
        assert!(ctx.take_requested_phase().is_none());
    }

    #[test]
    fn test_phase_results_overwrite_and_all_passed() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        assert!(ctx.all_phases_passed());
        ctx.set_phase_result(PhaseResult::failure("e2e-testing", "boom"));
        assert!(!ctx.all_phases_passed());
        ctx.set_phase_result(PhaseResult::success("e2e-testing"));
        assert!(ctx.all_phases_passed());
        assert_eq!(ctx.phase_results().len(), 1);
    }

    #[test]
    fn test_directives_block_reads_task_snapshot() {
        let mut t = task();
        t.directives.push(Directive::new(
            "keep the old endpoint",
            DirectivePriority::Critical,
            Some("contract-fixer"),
        ));
        let ctx = OrchestrationContext::from_task(t).unwrap();
        assert!(
            ctx.get_directives_block(Some("contract-fixer"))
                .contains("keep the old endpoint")
        );
        assert_eq!(ctx.get_directives_block(Some("e2e-testing")), "");
    }

    #[test]
    fn test_sync_branches_into_task() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        ctx.register_branch(BranchInfo::epic("epic/e1-api", "e1", "api", "main"))
            .unwrap();
        ctx.mark_branch_pushed("epic/e1-api");
        ctx.sync_branches_into_task();
        let snapshot = &ctx.task().orchestration.branch_registry;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].pushed);
    }

    #[test]
    fn test_history_block_empty_until_first_turn() {
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        assert_eq!(ctx.history_block(1000), "");
        ctx.history_mut()
            .push(TurnRole::Response, "e2e-testing", "GET /api/orders 404");
        let block = ctx.history_block(1000);
        assert!(block.starts_with("## Earlier exchanges in this run"));
        assert!(block.contains("GET /api/orders 404"));
    }

    #[test]
    fn test_report_progress_reaches_notifier() {
        let notifier = crate::notify::BroadcastNotifier::new(4);
        let mut rx = notifier.subscribe();
        let mut ctx = OrchestrationContext::from_task(task()).unwrap();
        ctx.set_notifier(Arc::new(notifier));
        ctx.report_progress("contract-fixer", "attempt 1/3");

        let event: PipelineEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            event,
            PipelineEvent::PhaseProgress {
                task_id: ctx.task_id().to_string(),
                phase: "contract-fixer".to_string(),
                message: "attempt 1/3".to_string(),
            }
        );
    }
}
