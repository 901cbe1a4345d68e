use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use conductor_common::TaskStatus;
use serde::Serialize;
use serde_json::Value;

use crate::context::OrchestrationContext;
use crate::errors::PipelineError;
use crate::notify::{NotificationSink, PipelineEvent};
use crate::phase::{Phase, PhaseResult, PhaseRunner};
use crate::store::{PhaseRecordUpdate, TaskStore};

pub const DEFAULT_MAX_RECOVERY_HOPS: usize = 8;

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Suspended until a human approves; re-run to resume.
    AwaitingApproval { phase: String },
    Cancelled { phase: String },
    Failed { phase: String, error: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::AwaitingApproval { .. } => "awaiting_approval",
            RunOutcome::Cancelled { .. } => "cancelled",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    fn task_status(&self) -> TaskStatus {
        match self {
            RunOutcome::Completed => TaskStatus::Completed,
            RunOutcome::AwaitingApproval { .. } => TaskStatus::WaitingApproval,
            RunOutcome::Cancelled { .. } => TaskStatus::Cancelled,
            RunOutcome::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// Per-run inputs that are not part of the persisted Task.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Force re-verification of phases that already completed. Persisted on
    /// the task, withdrawing earlier approvals, when not already set there.
    pub continuation: bool,
    /// Seed values for the shared-data map.
    pub shared_data: Vec<(String, Value)>,
}

/// Drives one task through a statically composed phase sequence.
///
/// Phases in the main sequence run in order. After each one, any phase it
/// requested through shared data runs next, looked up among the recovery
/// phases and then the main sequence, until no further phase is requested.
pub struct PipelineCoordinator {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    runner: PhaseRunner,
    main: Vec<Arc<dyn Phase>>,
    recovery: HashMap<String, Arc<dyn Phase>>,
    max_recovery_hops: usize,
}

impl PipelineCoordinator {
    pub fn new(store: Arc<dyn TaskStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            runner: PhaseRunner::new(store.clone(), notifier.clone()),
            store,
            notifier,
            main: Vec::new(),
            recovery: HashMap::new(),
            max_recovery_hops: DEFAULT_MAX_RECOVERY_HOPS,
        }
    }

    pub fn with_phase(mut self, phase: Arc<dyn Phase>) -> Self {
        self.main.push(phase);
        self
    }

    /// Register a phase that only runs when another phase requests it.
    pub fn with_recovery_phase(mut self, phase: Arc<dyn Phase>) -> Self {
        self.recovery.insert(phase.name().to_string(), phase);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.runner = self.runner.with_poll_interval(interval);
        self
    }

    pub fn with_max_recovery_hops(mut self, hops: usize) -> Self {
        self.max_recovery_hops = hops;
        self
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.main.iter().map(|p| p.name()).collect()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Phase>> {
        self.recovery
            .get(name)
            .cloned()
            .or_else(|| self.main.iter().find(|p| p.name() == name).cloned())
    }

    pub async fn run(&self, task_id: &str) -> Result<RunOutcome> {
        self.run_with(task_id, RunOptions::default()).await
    }

    pub async fn run_with(&self, task_id: &str, options: RunOptions) -> Result<RunOutcome> {
        let task = self.store.get(task_id).await?;
        let start = task
            .orchestration
            .current_phase
            .as_deref()
            .and_then(|current| self.main.iter().position(|p| p.name() == current))
            .unwrap_or(0);
        let fresh_continuation = options.continuation && !task.orchestration.continuation;
        let continuation = options.continuation || task.orchestration.continuation;

        let mut ctx = OrchestrationContext::from_task(task)?;
        ctx.set_continuation(continuation);
        ctx.set_notifier(self.notifier.clone());
        for (key, value) in options.shared_data {
            ctx.set_data(&key, value);
        }

        tracing::info!(
            task_id = %task_id,
            phases = ?self.phase_names(),
            start_phase = self.main.get(start).map(|p| p.name()).unwrap_or(""),
            continuation,
            "Starting pipeline run"
        );
        let updated = self
            .store
            .update(
                task_id,
                Box::new(move |task| {
                    task.status = TaskStatus::Running;
                    if fresh_continuation {
                        task.orchestration.continuation = true;
                        task.revoke_approvals();
                    }
                }),
            )
            .await?;
        ctx.refresh_task(updated);

        for phase in &self.main[start..] {
            let name = phase.name().to_string();
            let updated = self
                .store
                .update(
                    task_id,
                    Box::new(move |task| task.orchestration.current_phase = Some(name)),
                )
                .await?;
            ctx.refresh_task(updated);

            let mut last = self.run_phase(phase.as_ref(), &mut ctx).await?;
            if let Some(outcome) = halt_outcome(&last) {
                return self.finish(&mut ctx, outcome).await;
            }

            let mut hops = 0;
            while let Some(next) = ctx.take_requested_phase() {
                hops += 1;
                if hops > self.max_recovery_hops {
                    let err = PipelineError::RecoveryLoop {
                        hops: self.max_recovery_hops,
                    };
                    tracing::error!(task_id = %task_id, phase = %next, "{}", err);
                    let outcome = RunOutcome::Failed {
                        phase: next,
                        error: err.to_string(),
                    };
                    return self.finish(&mut ctx, outcome).await;
                }
                let recovery = self
                    .lookup(&next)
                    .ok_or_else(|| PipelineError::PhaseNotFound { name: next.clone() })?;
                tracing::info!(task_id = %task_id, phase = %next, hop = hops, "Running requested phase");
                last = self.run_phase(recovery.as_ref(), &mut ctx).await?;
                if let Some(outcome) = halt_outcome(&last) {
                    return self.finish(&mut ctx, outcome).await;
                }
            }

            if !last.success {
                let outcome = RunOutcome::Failed {
                    phase: last.phase_name.clone(),
                    error: last.error.clone().unwrap_or_default(),
                };
                return self.finish(&mut ctx, outcome).await;
            }
        }

        self.finish(&mut ctx, RunOutcome::Completed).await
    }

    /// Run one phase and persist its status with the branch snapshot.
    async fn run_phase(
        &self,
        phase: &dyn Phase,
        ctx: &mut OrchestrationContext,
    ) -> Result<PhaseResult> {
        let result = self.runner.execute(phase, ctx).await;
        if let Some(metrics) = &result.metrics {
            ctx.record_metrics(metrics);
        }

        // Skips are synced by the runner itself; a cancelled phase keeps
        // its running record so a resume starts it over.
        let update = if result.is_skipped() || result.is_cancelled() {
            None
        } else if result.needs_approval {
            Some(PhaseRecordUpdate::waiting_approval())
        } else if result.success {
            Some(PhaseRecordUpdate::completed())
        } else {
            Some(PhaseRecordUpdate::failed(
                result.error.as_deref().unwrap_or("unknown error"),
            ))
        };

        ctx.sync_branches_into_task();
        let branches = ctx.branches().snapshot();
        let name = result.phase_name.clone();
        let updated = self
            .store
            .update(
                ctx.task_id(),
                Box::new(move |task| {
                    if let Some(update) = update {
                        update.apply(task.phase_record_mut(&name));
                    }
                    task.orchestration.branch_registry = branches;
                }),
            )
            .await?;
        ctx.refresh_task(updated);
        Ok(result)
    }

    async fn finish(
        &self,
        ctx: &mut OrchestrationContext,
        outcome: RunOutcome,
    ) -> Result<RunOutcome> {
        let status = outcome.task_status();
        let completed = outcome == RunOutcome::Completed;
        let suspended_at = match &outcome {
            RunOutcome::AwaitingApproval { phase } => Some(phase.clone()),
            _ => None,
        };
        let branches = ctx.branches().snapshot();
        let updated = self
            .store
            .update(
                ctx.task_id(),
                Box::new(move |task| {
                    task.status = status;
                    task.orchestration.branch_registry = branches;
                    if completed {
                        task.orchestration.current_phase = None;
                        task.orchestration.continuation = false;
                    }
                    if let Some(phase) = suspended_at {
                        task.orchestration.current_phase = Some(phase);
                    }
                }),
            )
            .await?;
        ctx.refresh_task(updated);

        tracing::info!(task_id = %ctx.task_id(), outcome = outcome.label(), "Pipeline run finished");
        self.notifier.notify(PipelineEvent::RunFinished {
            task_id: ctx.task_id().to_string(),
            outcome: outcome.label().to_string(),
            metrics: ctx.run_metrics().clone(),
        });
        Ok(outcome)
    }
}

fn halt_outcome(result: &PhaseResult) -> Option<RunOutcome> {
    if result.is_cancelled() {
        return Some(RunOutcome::Cancelled {
            phase: result.phase_name.clone(),
        });
    }
    if result.needs_approval {
        return Some(RunOutcome::AwaitingApproval {
            phase: result.phase_name.clone(),
        });
    }
    None
}
