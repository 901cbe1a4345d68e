//! Shared doubles for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use conductor::agent::{AgentExecutor, AgentRequest, AgentResponse};
use conductor::common::{RepositoryInfo, RepositoryKind, Task};
use conductor::git::GitClient;
use conductor::notify::{NotificationSink, PipelineEvent};

/// Scripted replies keyed by agent id, replayed in order.
#[derive(Default)]
pub struct RoutedAgent {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    delay: Option<Duration>,
    /// Files rewritten (path, new content) before the next reply.
    rewrites: Mutex<Vec<(PathBuf, String)>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl RoutedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, agent_id: &str, output: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(output.to_string());
        self
    }

    pub fn reply_times(mut self, agent_id: &str, output: &str, times: usize) -> Self {
        for _ in 0..times {
            self = self.reply(agent_id, output);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rewriting(self, path: &Path, content: &str) -> Self {
        self.rewrites
            .lock()
            .unwrap()
            .push((path.to_path_buf(), content.to_string()));
        self
    }

    pub fn calls_for(&self, agent_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .count()
    }

    pub fn prompts_for(&self, agent_id: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl AgentExecutor for RoutedAgent {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse> {
        let agent_id = request.agent_id.clone();
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let rewrites: Vec<_> = self.rewrites.lock().unwrap().drain(..).collect();
        for (path, content) in rewrites {
            std::fs::write(path, content)?;
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&agent_id)
            .and_then(|queue| queue.pop_front());
        next.map(AgentResponse::from_output)
            .ok_or_else(|| anyhow!("no scripted reply for {}", agent_id))
    }
}

/// Git double tracking commits and pushes.
#[derive(Default)]
pub struct FakeGit {
    pub dirty: Mutex<bool>,
    pub ahead: Mutex<bool>,
    pub commits: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn dirty() -> Self {
        let git = Self::default();
        *git.dirty.lock().unwrap() = true;
        git
    }
}

#[async_trait]
impl GitClient for FakeGit {
    async fn conflicted_files(&self, _repo: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn has_uncommitted_changes(&self, _repo: &Path) -> Result<bool> {
        Ok(*self.dirty.lock().unwrap())
    }

    async fn is_ahead_of_remote(&self, _repo: &Path, _branch: &str) -> Result<bool> {
        Ok(*self.ahead.lock().unwrap())
    }

    async fn commit_all(&self, _repo: &Path, message: &str) -> Result<()> {
        self.commits.lock().unwrap().push(message.to_string());
        *self.dirty.lock().unwrap() = false;
        *self.ahead.lock().unwrap() = true;
        Ok(())
    }

    async fn push_force_with_lease(&self, _repo: &Path, branch: &str) -> Result<()> {
        self.pushes.lock().unwrap().push(branch.to_string());
        *self.ahead.lock().unwrap() = false;
        Ok(())
    }

    async fn current_branch(&self, _repo: &Path) -> Result<String> {
        Ok("story/checkout".to_string())
    }
}

/// Collects every event for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingNotifier {
    pub fn started_phases(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::PhaseStarted { phase, .. } => Some(phase.clone()),
                _ => None,
            })
            .collect()
    }

    /// Event kinds and phases in arrival order, e.g. `progress:e2e-testing`.
    pub fn timeline(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::PhaseStarted { phase, .. } => Some(format!("started:{}", phase)),
                PipelineEvent::PhaseProgress { phase, .. } => Some(format!("progress:{}", phase)),
                PipelineEvent::PhaseCompleted { phase, .. } => Some(format!("completed:{}", phase)),
                _ => None,
            })
            .collect()
    }

    pub fn progress_messages(&self, phase: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::PhaseProgress { phase: p, message, .. } if p == phase => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(*e)).count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn fullstack_task(workspace: &Path) -> Task {
    Task::new("Checkout", "Build the checkout flow")
        .with_workspace(workspace)
        .with_repository(RepositoryInfo::new("web", RepositoryKind::Frontend, "web"))
        .with_repository(RepositoryInfo::new("api", RepositoryKind::Backend, "api"))
}

pub fn single_repo_task(workspace: &Path) -> Task {
    Task::new("Docs", "Update docs")
        .with_workspace(workspace)
        .with_repository(RepositoryInfo::new("web", RepositoryKind::Frontend, "web"))
}

pub const E2E_404: &str = "Called GET /api/orders: 404 Not Found\n{\"integrationPass\": false}";
pub const E2E_CORS: &str =
    "{\"integrationPass\": false, \"issues\": [{\"type\": \"cors\", \"endpoint\": \"POST /api/cart\", \"description\": \"blocked by CORS policy\"}]}";
pub const E2E_PASS: &str = "{\"integrationPass\": true, \"summary\": \"all good\"}";
pub const FIX_FAILED: &str =
    "Could not find where the orders router is mounted.\n{\"fixed\": false, \"filesModified\": [], \"changes\": []}";
pub const FIX_OK: &str =
    "{\"fixed\": true, \"filesModified\": [\"api/src/cart.rs\"], \"changes\": [\"allow origin\"]}";
