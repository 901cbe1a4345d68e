//! Delegation to external coding agents.
//!
//! Phases only see the [`AgentExecutor`] trait; the real implementation is
//! [`ClaudeCliExecutor`], tests inject scripted fakes.

mod claude;
mod json;
mod stream;

pub use claude::ClaudeCliExecutor;
pub use json::extract_json_object;
pub use stream::{ContentBlock, StreamEvent, StreamUsage, describe_tool_use};

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::phase::PhaseMetrics;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    /// Identifies the agent role, e.g. `conflict-resolver`.
    pub agent_id: String,
    pub prompt: String,
    pub workspace_path: PathBuf,
    pub task_id: String,
    pub display_name: String,
}

impl AgentRequest {
    pub fn new(agent_id: &str, prompt: String, workspace_path: impl Into<PathBuf>, task_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            prompt,
            workspace_path: workspace_path.into(),
            task_id: task_id.to_string(),
            display_name: agent_id.to_string(),
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub output: String,
    pub cost: f64,
    pub usage: TokenUsage,
    pub session_id: Option<String>,
}

impl AgentResponse {
    pub fn from_output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn metrics(&self) -> PhaseMetrics {
        PhaseMetrics {
            cost_usd: self.cost,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
        }
    }
}

/// An opaque, possibly slow, possibly failing agent call.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse>;
}
