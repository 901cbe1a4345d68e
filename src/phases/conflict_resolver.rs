use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CONFLICT_RESOLVER, preview};
use crate::agent::{AgentExecutor, AgentRequest};
use crate::conductor_config::ConflictsSection;
use crate::context::{OrchestrationContext, TurnRole, keys};
use crate::errors::PhaseError;
use crate::git::{GitClient, files_with_markers, find_conflict_markers};
use crate::phase::{Phase, PhaseResult, SkipDecision};

/// Merge-conflict report left in shared data by a review phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRequest {
    pub story_id: String,
    #[serde(default)]
    pub story_title: String,
    pub epic_id: String,
    /// Repository holding the conflict; the whole workspace when absent.
    #[serde(default)]
    pub repository: Option<String>,
    pub target_branch: String,
    /// Branch to push after resolution; the checked-out branch when absent.
    #[serde(default)]
    pub story_branch: Option<String>,
    #[serde(default)]
    pub judge_feedback: String,
}

/// Resolves git merge conflicts through an agent, then verifies the result
/// and finishes the commit/push itself.
pub struct ConflictResolverPhase {
    agent: Arc<dyn AgentExecutor>,
    git: Arc<dyn GitClient>,
    settings: ConflictsSection,
}

impl ConflictResolverPhase {
    pub fn new(agent: Arc<dyn AgentExecutor>, git: Arc<dyn GitClient>) -> Self {
        Self {
            agent,
            git,
            settings: ConflictsSection::default(),
        }
    }

    pub fn with_settings(mut self, settings: ConflictsSection) -> Self {
        self.settings = settings;
        self
    }

    fn repo_root(&self, ctx: &OrchestrationContext, request: &ConflictRequest) -> PathBuf {
        request
            .repository
            .as_deref()
            .and_then(|name| ctx.repository(name))
            .map(|repo| ctx.repository_path(repo))
            .unwrap_or_else(|| ctx.workspace_path().to_path_buf())
    }

    /// Union of the marker scan and the porcelain `UU`/`AA` entries, sorted.
    async fn detect(&self, root: &Path) -> Vec<String> {
        let mut files = find_conflict_markers(root, &self.settings.extensions);
        match self.git.conflicted_files(root).await {
            Ok(unmerged) => files.extend(unmerged),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "git status scan failed");
            }
        }
        files.sort();
        files.dedup();
        files
    }

    fn build_prompt(
        &self,
        request: &ConflictRequest,
        root: &Path,
        files: &[String],
        directives: &str,
    ) -> String {
        let mut prompt = format!(
            "# Resolve Git Merge Conflicts\n\n\
             Story: {} ({})\n\
             Epic: {}\n\
             Target branch: {}\n",
            request.story_title, request.story_id, request.epic_id, request.target_branch
        );
        if let Some(branch) = &request.story_branch {
            prompt.push_str(&format!("Story branch: {}\n", branch));
        }
        if !request.judge_feedback.is_empty() {
            prompt.push_str(&format!(
                "\n## Reviewer feedback\n\n{}\n",
                request.judge_feedback
            ));
        }

        prompt.push_str("\n## Conflicting files\n\n");
        for file in files {
            prompt.push_str(&format!("- {}\n", file));
        }

        for file in files.iter().take(self.settings.max_files_in_prompt) {
            let Ok(content) = std::fs::read_to_string(root.join(file)) else {
                continue;
            };
            prompt.push_str(&format!(
                "\n### {}\n\n```\n{}\n```\n",
                file,
                preview(&content, self.settings.max_file_preview_chars)
            ));
        }
        if files.len() > self.settings.max_files_in_prompt {
            prompt.push_str(&format!(
                "\n({} more files not shown; open them directly.)\n",
                files.len() - self.settings.max_files_in_prompt
            ));
        }

        prompt.push_str(
            "\n## Resolution policy\n\n\
             1. Prefer the incoming story-branch change over the target branch's prior content.\n\
             2. Keep target-branch content only where dropping it would break functionality already merged there.\n\
             3. Remove every conflict marker (<<<<<<<, =======, >>>>>>>) from every file listed above.\n\
             4. Stage and commit the resolution, then push the story branch.\n",
        );
        if !directives.is_empty() {
            prompt.push('\n');
            prompt.push_str(directives);
        }
        prompt
    }

    /// Commit and push whatever the agent left unfinished.
    async fn finish_git(
        &self,
        ctx: &mut OrchestrationContext,
        root: &Path,
        request: &ConflictRequest,
    ) -> Result<(bool, bool)> {
        let branch = match &request.story_branch {
            Some(branch) => branch.clone(),
            None => self.git.current_branch(root).await?,
        };

        let mut committed = false;
        if self.git.has_uncommitted_changes(root).await? {
            let message = format!(
                "Resolve merge conflicts for story {} against {}",
                request.story_id, request.target_branch
            );
            self.git.commit_all(root, &message).await?;
            committed = true;
        }

        let mut pushed = false;
        if self.git.is_ahead_of_remote(root, &branch).await? {
            self.git.push_force_with_lease(root, &branch).await?;
            ctx.mark_branch_pushed(&branch);
            pushed = true;
        }
        Ok((committed, pushed))
    }
}

#[async_trait]
impl Phase for ConflictResolverPhase {
    fn name(&self) -> &str {
        CONFLICT_RESOLVER
    }

    fn description(&self) -> &str {
        "Resolve git merge conflicts reported by review"
    }

    async fn should_skip(&self, ctx: &mut OrchestrationContext) -> Result<SkipDecision> {
        if ctx.get_data(keys::MERGE_CONFLICT).is_none() {
            return Ok(SkipDecision::skip("no merge conflict reported"));
        }
        Ok(SkipDecision::Run)
    }

    async fn execute_phase(&self, ctx: &mut OrchestrationContext) -> Result<PhaseResult> {
        let Some(request) = ctx.get_as::<ConflictRequest>(keys::MERGE_CONFLICT) else {
            return Ok(PhaseResult::failure(
                CONFLICT_RESOLVER,
                "Merge conflict request is malformed",
            ));
        };
        let root = self.repo_root(ctx, &request);

        let files = self.detect(&root).await;
        if files.is_empty() {
            tracing::info!(task_id = %ctx.task_id(), story = %request.story_id, "No conflicts found, nothing to resolve");
            ctx.remove_data(keys::MERGE_CONFLICT);
            return Ok(PhaseResult::success_with_data(
                CONFLICT_RESOLVER,
                json!({ "alreadyResolved": true }),
            ));
        }
        tracing::info!(task_id = %ctx.task_id(), files = files.len(), "Resolving merge conflicts");
        ctx.report_progress(
            CONFLICT_RESOLVER,
            format!("{} conflicted file(s) detected", files.len()),
        );

        let directives = ctx.get_directives_block(Some(CONFLICT_RESOLVER));
        let prompt = self.build_prompt(&request, &root, &files, &directives);
        ctx.history_mut().push(
            TurnRole::Prompt,
            CONFLICT_RESOLVER,
            &format!(
                "Resolve conflicts for story {} against {}: {}",
                request.story_id,
                request.target_branch,
                files.join(", ")
            ),
        );

        let agent_request = AgentRequest::new(CONFLICT_RESOLVER, prompt, &root, ctx.task_id())
            .with_display_name(&format!("Conflict resolver ({})", request.story_id));
        let response = self
            .agent
            .execute(agent_request)
            .await
            .map_err(PhaseError::Agent)?;
        ctx.history_mut()
            .push(TurnRole::Response, CONFLICT_RESOLVER, &response.output);

        let remaining = files_with_markers(&root, &files);
        if remaining.is_empty() {
            ctx.report_progress(CONFLICT_RESOLVER, "re-scan clean");
        } else {
            ctx.report_progress(
                CONFLICT_RESOLVER,
                format!("{} file(s) still conflicted after re-scan", remaining.len()),
            );
            let err = PhaseError::ConflictsRemain { files: remaining.clone() };
            return Ok(PhaseResult::failure(CONFLICT_RESOLVER, err.to_string())
                .with_data(json!({ "remainingFiles": remaining }))
                .with_metrics(response.metrics()));
        }

        let (committed, pushed) = self.finish_git(ctx, &root, &request).await?;
        ctx.remove_data(keys::MERGE_CONFLICT);

        let mut result = PhaseResult::success_with_data(
            CONFLICT_RESOLVER,
            json!({
                "resolvedFiles": files,
                "fallbackCommit": committed,
                "fallbackPush": pushed,
            }),
        )
        .with_metrics(response.metrics());
        if committed {
            result = result.with_warning("Agent left uncommitted changes; committed them");
        }
        Ok(result)
    }
}
