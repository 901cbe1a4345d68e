use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use conductor_common::{ApprovalRecord, ApprovalStatus, TaskStatus};
use serde_json::json;

use crate::context::OrchestrationContext;
use crate::errors::PhaseError;
use crate::notify::{NotificationSink, PipelineEvent};
use crate::phase::{Phase, PhaseResult, SkipDecision};
use crate::store::TaskStore;

/// Actor recorded on approvals granted by auto-pilot.
pub const AUTO_PILOT_ACTOR: &str = "auto-pilot";

/// Human-in-the-loop gate after an agent's output is ready.
///
/// Suspends the pipeline until the agent record at `agent_path` carries
/// `approved = true`. Re-running the gate after approval is a no-op.
pub struct ApprovalPhase {
    name: String,
    agent_name: String,
    agent_path: String,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    auto_pilot: bool,
}

impl ApprovalPhase {
    pub fn new(
        agent_name: &str,
        agent_path: &str,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            name: format!("{}-approval", agent_name),
            agent_name: agent_name.to_string(),
            agent_path: agent_path.to_string(),
            store,
            notifier,
            auto_pilot: false,
        }
    }

    pub fn with_auto_pilot(mut self, auto_pilot: bool) -> Self {
        self.auto_pilot = auto_pilot;
        self
    }

    pub fn agent_path(&self) -> &str {
        &self.agent_path
    }
}

#[async_trait]
impl Phase for ApprovalPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Wait for a human to approve the agent's output"
    }

    /// Always evaluated; `execute_phase` short-circuits once approved.
    async fn should_skip(&self, _ctx: &mut OrchestrationContext) -> Result<SkipDecision> {
        Ok(SkipDecision::Run)
    }

    async fn execute_phase(&self, ctx: &mut OrchestrationContext) -> Result<PhaseResult> {
        let task = self.store.get(ctx.task_id()).await?;
        let task_id = task.id.clone();
        ctx.refresh_task(task);

        let Some(record) = ctx.task().agent_record(&self.agent_path) else {
            let err = PhaseError::AgentPathNotFound {
                path: self.agent_path.clone(),
            };
            return Ok(PhaseResult::failure(&self.name, err.to_string()));
        };

        if record.approved {
            tracing::debug!(task_id = %task_id, agent = %self.agent_name, "Already approved");
            return Ok(PhaseResult::success_with_data(
                &self.name,
                json!({ "alreadyApproved": true, "agent": self.agent_name }),
            ));
        }

        if self.auto_pilot {
            let path = self.agent_path.clone();
            let updated = self
                .store
                .update(
                    &task_id,
                    Box::new(move |task| {
                        if let Some(record) = task.agent_record_mut(&path) {
                            record.approved = true;
                            record.approval = Some(ApprovalRecord::approved_by(AUTO_PILOT_ACTOR));
                        }
                    }),
                )
                .await?;
            ctx.refresh_task(updated);
            self.notifier.notify(PipelineEvent::audit(
                &task_id,
                "approval.auto_approved",
                AUTO_PILOT_ACTOR,
                json!({ "agent": self.agent_name, "agentPath": self.agent_path }),
            ));
            tracing::info!(task_id = %task_id, agent = %self.agent_name, "Auto-approved");
            return Ok(PhaseResult::success_with_data(
                &self.name,
                json!({ "autoApproved": true, "agent": self.agent_name }),
            ));
        }

        let path = self.agent_path.clone();
        let phase_name = self.name.clone();
        let updated = self
            .store
            .update(
                &task_id,
                Box::new(move |task| {
                    if let Some(record) = task.agent_record_mut(&path) {
                        let already_pending = record
                            .approval
                            .as_ref()
                            .is_some_and(|a| a.status == ApprovalStatus::Pending);
                        if !already_pending {
                            record.approval = Some(ApprovalRecord::pending());
                        }
                    }
                    task.status = TaskStatus::WaitingApproval;
                    task.orchestration.current_phase = Some(phase_name);
                }),
            )
            .await?;
        ctx.refresh_task(updated);

        self.notifier.notify(PipelineEvent::ApprovalRequested {
            task_id: task_id.clone(),
            phase: self.name.clone(),
            agent_path: self.agent_path.clone(),
        });
        tracing::info!(task_id = %task_id, agent = %self.agent_name, "Waiting for approval");

        Ok(PhaseResult::needs_approval(&self.name).with_data(json!({
            "agent": self.agent_name,
            "agentPath": self.agent_path,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BroadcastNotifier;
    use crate::phases::test_support::{fullstack_task, saved_context};
    use crate::store::MemoryTaskStore;
    use conductor_common::{PhaseRecord, Task};

    fn task_with_agent(approved: bool) -> Task {
        let mut task = fullstack_task(std::path::Path::new("/tmp/ws"));
        let planning = task.phase_record_mut("planning");
        planning.children.insert(
            "story-1".to_string(),
            PhaseRecord {
                approved,
                ..Default::default()
            },
        );
        task
    }

    fn phase(store: &MemoryTaskStore, notifier: &BroadcastNotifier, auto: bool) -> ApprovalPhase {
        ApprovalPhase::new(
            "planning",
            "planning.story-1",
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
        )
        .with_auto_pilot(auto)
    }

    #[tokio::test]
    async fn test_missing_agent_path_fails() {
        let store = MemoryTaskStore::new();
        let notifier = BroadcastNotifier::new(8);
        let mut ctx = saved_context(&store, task_with_agent(false)).await;
        let gate = ApprovalPhase::new(
            "review",
            "review.story-9",
            Arc::new(store.clone()),
            Arc::new(notifier),
        );
        let result = gate.execute_phase(&mut ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("review.story-9"));
    }

    #[tokio::test]
    async fn test_already_approved_is_idempotent() {
        let store = MemoryTaskStore::new();
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let mut ctx = saved_context(&store, task_with_agent(true)).await;
        let gate = phase(&store, &notifier, false);

        let before = store.get(ctx.task_id()).await.unwrap();
        for _ in 0..2 {
            let result = gate.execute_phase(&mut ctx).await.unwrap();
            assert!(result.success);
            assert!(!result.needs_approval);
            assert!(result.data_flag("alreadyApproved"));
        }
        let after = store.get(ctx.task_id()).await.unwrap();
        assert_eq!(before, after);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_suspends_without_failure() {
        let store = MemoryTaskStore::new();
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let mut ctx = saved_context(&store, task_with_agent(false)).await;
        let gate = phase(&store, &notifier, false);

        let result = gate.execute_phase(&mut ctx).await.unwrap();
        assert!(result.success);
        assert!(result.needs_approval);

        let stored = store.get(ctx.task_id()).await.unwrap();
        assert_eq!(stored.status, TaskStatus::WaitingApproval);
        assert_eq!(
            stored.orchestration.current_phase.as_deref(),
            Some("planning-approval")
        );
        let record = stored.agent_record("planning.story-1").unwrap();
        assert!(!record.approved);
        assert_eq!(
            record.approval.as_ref().unwrap().status,
            ApprovalStatus::Pending
        );
        let event: PipelineEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(event, PipelineEvent::ApprovalRequested { .. }));
    }

    #[tokio::test]
    async fn test_auto_pilot_approves_and_audits() {
        let store = MemoryTaskStore::new();
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let mut ctx = saved_context(&store, task_with_agent(false)).await;
        let gate = phase(&store, &notifier, true);

        let result = gate.execute_phase(&mut ctx).await.unwrap();
        assert!(result.success);
        assert!(!result.needs_approval);
        assert!(result.data_flag("autoApproved"));

        let stored = store.get(ctx.task_id()).await.unwrap();
        let record = stored.agent_record("planning.story-1").unwrap();
        assert!(record.approved);
        assert_eq!(
            record.approval.as_ref().unwrap().approved_by.as_deref(),
            Some(AUTO_PILOT_ACTOR)
        );
        let event: PipelineEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(event, PipelineEvent::Audit { .. }));

        // Second pass sees the persisted approval
        let again = gate.execute_phase(&mut ctx).await.unwrap();
        assert!(again.data_flag("alreadyApproved"));
    }
}
