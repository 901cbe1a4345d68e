//! The phase engine.
//!
//! A [`Phase`] supplies domain logic (`should_skip`, `execute_phase`,
//! `cleanup`); the [`PhaseRunner`] wraps it with the pre-flight
//! cancellation check, skip handling and its persisted-status sync, the
//! cancellation poller, timing, and result recording.

mod poller;
mod result;
mod runner;

pub use poller::{CancellationFlag, CancellationPoller};
pub use result::{PhaseMetrics, PhaseResult};
pub use runner::{DEFAULT_POLL_INTERVAL, PhaseRunner};

use anyhow::Result;
use async_trait::async_trait;

use crate::context::OrchestrationContext;

/// Outcome of [`Phase::should_skip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    Run,
    Skip { reason: String },
}

impl SkipDecision {
    pub fn skip(reason: impl Into<String>) -> Self {
        SkipDecision::Skip {
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, SkipDecision::Skip { .. })
    }
}

#[async_trait]
pub trait Phase: Send + Sync {
    /// Unique name; keys the phase record on the Task and the result map.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Skip a phase the persisted Task already records as completed, unless
    /// this run is a continuation.
    async fn should_skip(&self, ctx: &mut OrchestrationContext) -> Result<SkipDecision> {
        if ctx.task().is_phase_completed(self.name()) && !ctx.is_continuation() {
            return Ok(SkipDecision::skip("already completed"));
        }
        Ok(SkipDecision::Run)
    }

    async fn execute_phase(&self, ctx: &mut OrchestrationContext) -> Result<PhaseResult>;

    async fn cleanup(&self, _ctx: &mut OrchestrationContext) -> Result<()> {
        Ok(())
    }
}
