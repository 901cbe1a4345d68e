//! Operations performed by actors outside a running pipeline: a human
//! approving a gate, cancelling, or steering an in-flight run.

use anyhow::Result;
use chrono::Utc;
use conductor_common::{ApprovalRecord, ApprovalStatus, Directive, Task, TaskStatus};

use crate::errors::PhaseError;
use crate::store::TaskStore;

/// Flip the `approved` gate of the agent record at `agent_path`.
///
/// A task suspended for approval goes back to pending, ready to be resumed.
pub async fn approve(
    store: &dyn TaskStore,
    task_id: &str,
    agent_path: &str,
    actor: &str,
) -> Result<Task> {
    let task = store.get(task_id).await?;
    if task.agent_record(agent_path).is_none() {
        return Err(PhaseError::AgentPathNotFound {
            path: agent_path.to_string(),
        }
        .into());
    }

    let path = agent_path.to_string();
    let actor = actor.to_string();
    let updated = store
        .update(
            task_id,
            Box::new(move |task| {
                if let Some(record) = task.agent_record_mut(&path) {
                    let now = Utc::now();
                    let requested_at = record
                        .approval
                        .as_ref()
                        .map(|a| a.requested_at)
                        .unwrap_or(now);
                    record.approved = true;
                    record.approval = Some(ApprovalRecord {
                        status: ApprovalStatus::Approved,
                        requested_at,
                        approved_at: Some(now),
                        approved_by: Some(actor),
                    });
                }
                if task.status == TaskStatus::WaitingApproval {
                    task.status = TaskStatus::Pending;
                }
            }),
        )
        .await?;
    tracing::info!(task_id = %task_id, agent_path = %agent_path, "Approved");
    Ok(updated)
}

/// Raise the cancellation flag; running phases observe it on their next poll.
pub async fn request_cancel(store: &dyn TaskStore, task_id: &str) -> Result<Task> {
    let task = store.request_cancel(task_id).await?;
    tracing::info!(task_id = %task_id, "Cancellation requested");
    Ok(task)
}

/// Clear a previous cancellation so the task can be run again.
pub async fn clear_cancel(store: &dyn TaskStore, task_id: &str) -> Result<Task> {
    store
        .update(
            task_id,
            Box::new(|task| {
                task.orchestration.cancel_requested = false;
                if task.status == TaskStatus::Cancelled {
                    task.status = TaskStatus::Pending;
                }
            }),
        )
        .await
}

/// Queue a directive; it is picked up by the next prompt built for a
/// matching agent.
pub async fn add_directive(store: &dyn TaskStore, task_id: &str, directive: Directive) -> Result<Task> {
    let priority = directive.priority;
    let updated = store
        .update(task_id, Box::new(move |task| task.directives.push(directive)))
        .await?;
    tracing::info!(task_id = %task_id, priority = %priority.as_str(), "Directive added");
    Ok(updated)
}

/// Mark a task as having new work, so verification phases run again.
///
/// Approvals granted for the previous output are withdrawn: the gates
/// must see the re-verified output before the run can complete.
pub async fn request_continuation(store: &dyn TaskStore, task_id: &str) -> Result<Task> {
    let updated = store
        .update(
            task_id,
            Box::new(|task| {
                task.orchestration.continuation = true;
                let revoked = task.revoke_approvals();
                if revoked > 0 {
                    tracing::info!(task_id = %task.id, revoked, "Approvals withdrawn for continuation");
                }
            }),
        )
        .await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use conductor_common::DirectivePriority;

    async fn task_waiting(store: &MemoryTaskStore) -> Task {
        let mut task = Task::new("t", "");
        task.phase_record_mut("planning").approval = Some(ApprovalRecord::pending());
        task.status = TaskStatus::WaitingApproval;
        store.save(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_approve_sets_gate_and_resets_status() {
        let store = MemoryTaskStore::new();
        let task = task_waiting(&store).await;
        let requested_at = task.phase_record("planning").unwrap().approval.as_ref().unwrap().requested_at;

        let updated = approve(&store, &task.id, "planning", "alice").await.unwrap();
        let record = updated.agent_record("planning").unwrap();
        assert!(record.approved);
        let approval = record.approval.as_ref().unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.requested_at, requested_at);
        assert_eq!(approval.approved_by.as_deref(), Some("alice"));
        assert_eq!(updated.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_approve_unknown_path_is_error() {
        let store = MemoryTaskStore::new();
        let task = task_waiting(&store).await;
        assert!(approve(&store, &task.id, "planning.nope", "alice").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_and_clear() {
        let store = MemoryTaskStore::new();
        let task = task_waiting(&store).await;
        assert!(request_cancel(&store, &task.id).await.unwrap().orchestration.cancel_requested);
        assert!(!clear_cancel(&store, &task.id).await.unwrap().orchestration.cancel_requested);
    }

    #[tokio::test]
    async fn test_add_directive_appends() {
        let store = MemoryTaskStore::new();
        let task = task_waiting(&store).await;
        let d = Directive::new("use v2 API", DirectivePriority::High, None);
        let updated = add_directive(&store, &task.id, d).await.unwrap();
        assert_eq!(updated.directives.len(), 1);
        assert!(request_continuation(&store, &task.id).await.unwrap().orchestration.continuation);
    }

    #[tokio::test]
    async fn test_continuation_withdraws_granted_approval() {
        let store = MemoryTaskStore::new();
        let task = task_waiting(&store).await;
        approve(&store, &task.id, "planning", "alice").await.unwrap();

        let updated = request_continuation(&store, &task.id).await.unwrap();
        let record = updated.agent_record("planning").unwrap();
        assert!(!record.approved);
        assert!(record.approval.is_none());
    }
}
