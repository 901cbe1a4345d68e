//! Fire-and-forget pipeline notifications.
//!
//! Phases report progress through a [`NotificationSink`]. Delivery problems
//! are logged by the sink itself; a notification never fails a phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::phase::PhaseMetrics;

// ── Event types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    PhaseStarted {
        task_id: String,
        phase: String,
    },
    PhaseProgress {
        task_id: String,
        phase: String,
        message: String,
    },
    PhaseCompleted {
        task_id: String,
        phase: String,
        success: bool,
        needs_approval: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ApprovalRequested {
        task_id: String,
        phase: String,
        agent_path: String,
    },
    Audit {
        task_id: String,
        action: String,
        actor: String,
        #[serde(default)]
        details: Value,
        at: DateTime<Utc>,
    },
    RunFinished {
        task_id: String,
        outcome: String,
        /// Agent cost and tokens summed over every phase of the run.
        #[serde(default)]
        metrics: PhaseMetrics,
    },
}

impl PipelineEvent {
    pub fn task_id(&self) -> &str {
        match self {
            PipelineEvent::PhaseStarted { task_id, .. }
            | PipelineEvent::PhaseProgress { task_id, .. }
            | PipelineEvent::PhaseCompleted { task_id, .. }
            | PipelineEvent::ApprovalRequested { task_id, .. }
            | PipelineEvent::Audit { task_id, .. }
            | PipelineEvent::RunFinished { task_id, .. } => task_id,
        }
    }

    pub fn audit(task_id: &str, action: &str, actor: &str, details: Value) -> Self {
        PipelineEvent::Audit {
            task_id: task_id.to_string(),
            action: action.to_string(),
            actor: actor.to_string(),
            details,
            at: Utc::now(),
        }
    }
}

// ── Sinks ────────────────────────────────────────────────────────────

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: PipelineEvent);
}

/// Serializes events as JSON onto a broadcast channel, for any number of
/// live subscribers (a UI socket, a log tailer).
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<String>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn from_sender(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, event: PipelineEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => {
                let _ = self.tx.send(json); // Ignore error if no receivers
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize pipeline event");
            }
        }
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::PhaseStarted { task_id, phase } => {
                tracing::info!(task_id = %task_id, phase = %phase, "Phase started");
            }
            PipelineEvent::PhaseProgress {
                task_id,
                phase,
                message,
            } => {
                tracing::debug!(task_id = %task_id, phase = %phase, "{}", message);
            }
            PipelineEvent::PhaseCompleted {
                task_id,
                phase,
                success,
                needs_approval,
                duration_ms,
                error,
            } => {
                if *success {
                    tracing::info!(
                        task_id = %task_id,
                        phase = %phase,
                        needs_approval,
                        duration_ms,
                        "Phase completed"
                    );
                } else {
                    tracing::warn!(
                        task_id = %task_id,
                        phase = %phase,
                        duration_ms,
                        error = error.as_deref().unwrap_or(""),
                        "Phase failed"
                    );
                }
            }
            PipelineEvent::ApprovalRequested {
                task_id,
                phase,
                agent_path,
            } => {
                tracing::info!(task_id = %task_id, phase = %phase, agent_path = %agent_path, "Approval requested");
            }
            PipelineEvent::Audit {
                task_id,
                action,
                actor,
                ..
            } => {
                tracing::info!(task_id = %task_id, action = %action, actor = %actor, "Audit");
            }
            PipelineEvent::RunFinished {
                task_id,
                outcome,
                metrics,
            } => {
                tracing::info!(
                    task_id = %task_id,
                    outcome = %outcome,
                    cost_usd = metrics.cost_usd,
                    input_tokens = metrics.input_tokens,
                    output_tokens = metrics.output_tokens,
                    "Run finished"
                );
            }
        }
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct MultiNotifier {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for MultiNotifier {
    fn notify(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::PhaseStarted {
            task_id: "t1".to_string(),
            phase: "e2e-testing".to_string(),
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PhaseStarted");
        assert_eq!(json["data"]["phase"], "e2e-testing");
    }

    #[test]
    fn test_broadcast_without_receivers_is_ignored() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(PipelineEvent::RunFinished {
            task_id: "t1".to_string(),
            outcome: "completed".to_string(),
            metrics: PhaseMetrics::default(),
        });
    }

    #[tokio::test]
    async fn test_broadcast_delivers_json() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.notify(PipelineEvent::audit(
            "t1",
            "auto_approved",
            "auto-pilot",
            serde_json::json!({"agentPath": "planning"}),
        ));
        let msg = rx.recv().await.unwrap();
        let event: PipelineEvent = serde_json::from_str(&msg).unwrap();
        assert_eq!(event.task_id(), "t1");
        assert!(matches!(event, PipelineEvent::Audit { .. }));
    }

    #[tokio::test]
    async fn test_multi_notifier_fans_out() {
        let a = BroadcastNotifier::new(4);
        let b = BroadcastNotifier::new(4);
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();
        let multi = MultiNotifier::new()
            .with(Arc::new(a))
            .with(Arc::new(b))
            .with(Arc::new(TracingNotifier));
        multi.notify(PipelineEvent::PhaseStarted {
            task_id: "t".to_string(),
            phase: "p".to_string(),
        });
        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.recv().await.is_ok());
    }
}
