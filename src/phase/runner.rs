use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::OrchestrationContext;
use crate::notify::{NotificationSink, PipelineEvent};
use crate::store::{PhaseRecordUpdate, TaskStore};

use super::poller::CancellationPoller;
use super::{Phase, PhaseResult, SkipDecision};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs phases with the shared execution contract.
///
/// `execute` never returns an error: every failure, including errors from
/// the phase's own hooks, comes back as a failed [`PhaseResult`].
#[derive(Clone)]
pub struct PhaseRunner {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    poll_interval: Duration,
}

impl PhaseRunner {
    pub fn new(store: Arc<dyn TaskStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifier,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notifier
    }

    pub async fn execute(&self, phase: &dyn Phase, ctx: &mut OrchestrationContext) -> PhaseResult {
        let start = Instant::now();
        let name = phase.name().to_string();
        let task_id = ctx.task_id().to_string();

        // Pre-flight: the context's task copy may be stale across suspensions.
        match self.store.find_by_id(&task_id).await {
            Ok(Some(task)) => {
                let cancelled = task.orchestration.cancel_requested;
                ctx.refresh_task(task);
                if cancelled {
                    tracing::info!(task_id = %task_id, phase = %name, "Task cancelled before phase start");
                    return self.finish(ctx, PhaseResult::cancelled(&name), start);
                }
            }
            Ok(None) => {
                let msg = format!("Task {} not found", task_id);
                return self.finish(ctx, PhaseResult::failure(&name, msg), start);
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, phase = %name, error = %e, "Pre-flight task read failed");
            }
        }

        self.notifier.notify(PipelineEvent::PhaseStarted {
            task_id: task_id.clone(),
            phase: name.clone(),
        });

        match phase.should_skip(ctx).await {
            Ok(SkipDecision::Run) => {}
            Ok(SkipDecision::Skip { reason }) => {
                tracing::info!(task_id = %task_id, phase = %name, reason = %reason, "Skipping phase");
                if let Err(e) = self
                    .store
                    .update_phase_record(&task_id, &name, PhaseRecordUpdate::skipped_on_recovery())
                    .await
                {
                    tracing::warn!(task_id = %task_id, phase = %name, error = %e, "Failed to sync skipped phase status");
                }
                return self.finish(ctx, PhaseResult::skipped(&name, &reason), start);
            }
            Err(e) => {
                return self.finish(ctx, PhaseResult::failure(&name, format!("{:#}", e)), start);
            }
        }

        if let Err(e) = self
            .store
            .update_phase_record(&task_id, &name, PhaseRecordUpdate::running())
            .await
        {
            tracing::warn!(task_id = %task_id, phase = %name, error = %e, "Failed to mark phase running");
        }

        let poller = CancellationPoller::start(
            self.store.clone(),
            &task_id,
            self.poll_interval,
            ctx.cancellation().clone(),
        );
        let outcome = phase.execute_phase(ctx).await;
        let cancelled = poller.stop().await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let msg = format!("{:#}", e);
                tracing::warn!(task_id = %task_id, phase = %name, error = %msg, "Phase raised an error");
                PhaseResult::failure(&name, msg)
            }
        };
        if cancelled {
            result = PhaseResult::cancelled(&name);
        }
        result.phase_name = name.clone();
        result.duration = start.elapsed();
        ctx.set_phase_result(result.clone());

        if let Err(e) = phase.cleanup(ctx).await {
            tracing::warn!(task_id = %task_id, phase = %name, error = %e, "Phase cleanup failed");
            result = result.with_warning(format!("Cleanup failed: {:#}", e));
            ctx.set_phase_result(result.clone());
        }

        self.notify_completed(&task_id, &result);
        result
    }

    fn finish(
        &self,
        ctx: &mut OrchestrationContext,
        mut result: PhaseResult,
        start: Instant,
    ) -> PhaseResult {
        result.duration = start.elapsed();
        ctx.set_phase_result(result.clone());
        self.notify_completed(ctx.task_id(), &result);
        result
    }

    fn notify_completed(&self, task_id: &str, result: &PhaseResult) {
        self.notifier.notify(PipelineEvent::PhaseCompleted {
            task_id: task_id.to_string(),
            phase: result.phase_name.clone(),
            success: result.success,
            needs_approval: result.needs_approval,
            duration_ms: result.duration.as_millis() as u64,
            error: result.error.clone(),
        });
    }
}
