//! Pipeline coordination: sequencing phases over a persisted task, and the
//! control operations external actors use to steer it.

pub mod control;
pub mod coordinator;

pub use coordinator::{DEFAULT_MAX_RECOVERY_HOPS, PipelineCoordinator, RunOptions, RunOutcome};

use std::sync::Arc;

use crate::agent::AgentExecutor;
use crate::conductor_config::ConductorConfig;
use crate::git::GitClient;
use crate::notify::NotificationSink;
use crate::phases::{
    ApprovalPhase, ConflictResolverPhase, ContractFixerPhase, E2ETestingPhase, E2E_TESTING,
};
use crate::store::TaskStore;

/// Agent name of the approval gate that follows integration testing.
pub const INTEGRATION_AGENT: &str = "integration";

/// The standard pipeline: conflict resolution, integration testing gated
/// by human approval, with the contract fixer as recovery.
pub fn default_pipeline(
    config: &ConductorConfig,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    agent: Arc<dyn AgentExecutor>,
    git: Arc<dyn GitClient>,
) -> PipelineCoordinator {
    let toml = &config.toml;
    let conflict = ConflictResolverPhase::new(agent.clone(), git)
        .with_settings(toml.conflicts.clone());
    let e2e = E2ETestingPhase::new(agent.clone());
    let approval = ApprovalPhase::new(INTEGRATION_AGENT, E2E_TESTING, store.clone(), notifier.clone())
        .with_auto_pilot(config.auto_pilot());
    let fixer = ContractFixerPhase::new(agent, store.clone())
        .with_max_retries(toml.contract_fixer.max_retries);

    PipelineCoordinator::new(store, notifier)
        .with_phase(Arc::new(conflict))
        .with_phase(Arc::new(e2e))
        .with_phase(Arc::new(approval))
        .with_recovery_phase(Arc::new(fixer))
        .with_poll_interval(toml.cancellation_poll_interval())
        .with_max_recovery_hops(toml.pipeline.max_recovery_hops)
}
