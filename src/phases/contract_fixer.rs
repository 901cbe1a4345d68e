//! Integration-bug remediation with a fingerprint-bounded retry budget.
//!
//! Each failure reported by the integration tests is fingerprinted from its
//! category and text. A new fingerprint always gets a fresh budget; the same
//! fingerprint gets at most [`MAX_RETRIES`] attempts before the fixer gives
//! up and lets the pipeline continue with the error documented.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use conductor_common::ErrorHistoryEntry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::classify::{ErrorClassifier, IntegrationErrorKind, RegexErrorClassifier};
use super::{CONTRACT_FIXER, E2E_TESTING, preview};
use crate::agent::{AgentExecutor, AgentRequest, extract_json_object};
use crate::context::{OrchestrationContext, TurnRole, keys};
use crate::phase::{Phase, PhaseResult, SkipDecision};
use crate::store::TaskStore;

pub const MAX_RETRIES: u32 = 3;

const MAX_ERROR_CHARS_IN_PROMPT: usize = 8000;
const MAX_HISTORY_CHARS_IN_PROMPT: usize = 6000;

/// `sha256(error_type + ":" + error_output)`, first 16 hex characters.
pub fn error_fingerprint(error_type: &str, error_output: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    hasher.update(b":");
    hasher.update(error_output.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)[..16].to_string()
}

/// Structured verdict expected from the fixing agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOutcome {
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub changes: Vec<String>,
}

fn remediation_template(kind: IntegrationErrorKind) -> &'static str {
    match kind {
        IntegrationErrorKind::EndpointNotFound => {
            "The frontend calls an endpoint the backend does not serve.\n\
             - Find the exact method and path the frontend requests.\n\
             - If the backend route is missing, implement it with the response shape the frontend expects.\n\
             - If the route exists under another path or prefix, fix the frontend URL or the route registration.\n\
             - Check router mounting, global prefixes (/api, /v1) and proxy configuration."
        }
        IntegrationErrorKind::Cors => {
            "The browser blocks cross-origin requests from the frontend.\n\
             - Enable CORS on the backend for the frontend origin.\n\
             - Allow the methods and headers the frontend sends (Content-Type, Authorization).\n\
             - Answer preflight OPTIONS requests.\n\
             - Enable credentials only if the frontend sends cookies."
        }
        IntegrationErrorKind::PayloadMismatch => {
            "Request or response bodies do not match between frontend and backend.\n\
             - Compare field names, casing, nesting and types on both sides.\n\
             - Change the side that deviates from the shared API contract or types.\n\
             - Keep validation schemas in sync with the payloads."
        }
        IntegrationErrorKind::MethodMismatch => {
            "The frontend uses an HTTP method the backend route does not accept.\n\
             - Align the method on both sides with the API contract.\n\
             - Do not register duplicate routes to paper over the mismatch."
        }
        IntegrationErrorKind::Authentication => {
            "Requests are rejected as unauthenticated or forbidden.\n\
             - Check how the frontend obtains and attaches credentials.\n\
             - Make sure the backend accepts the token format and header the frontend sends.\n\
             - Do not disable authentication to make tests pass."
        }
        IntegrationErrorKind::Generic => {
            "Diagnose the failure from the output below.\n\
             - Reproduce the failing call.\n\
             - Apply the smallest change that makes frontend and backend agree."
        }
    }
}

pub struct ContractFixerPhase {
    agent: Arc<dyn AgentExecutor>,
    store: Arc<dyn TaskStore>,
    classifier: Arc<dyn ErrorClassifier>,
    max_retries: u32,
}

impl ContractFixerPhase {
    pub fn new(agent: Arc<dyn AgentExecutor>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            agent,
            store,
            classifier: Arc::new(RegexErrorClassifier::default()),
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Category and text of the failure currently reported in shared data.
    fn current_error(&self, ctx: &OrchestrationContext) -> (IntegrationErrorKind, String) {
        let output = ctx.get_str(keys::E2E_ERRORS).unwrap_or_default().to_string();
        let kind = match ctx.get_str(keys::E2E_ERROR_TYPE) {
            Some(kind) => IntegrationErrorKind::parse_lenient(kind),
            None => self.classifier.classify(&output),
        };
        (kind, output)
    }

    fn build_prompt(
        &self,
        ctx: &OrchestrationContext,
        kind: IntegrationErrorKind,
        output: &str,
        attempt: u32,
    ) -> String {
        let mut prompt = format!(
            "# Fix Frontend/Backend Integration\n\n\
             Attempt {} of {} for this error.\n\
             Failure category: {}\n\n## Repositories\n\n",
            attempt,
            self.max_retries,
            kind.as_str()
        );
        for repo in ctx.repositories() {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                repo.name,
                repo.kind,
                ctx.repository_path(repo).display()
            ));
        }
        prompt.push_str(&format!(
            "\n## Integration test output\n\n```\n{}\n```\n\n## How to fix\n\n{}\n",
            preview(output, MAX_ERROR_CHARS_IN_PROMPT),
            remediation_template(kind)
        ));

        let history = &ctx.task().orchestration.contract_fixer.error_history;
        if history.len() > 1 {
            prompt.push_str("\n## Previous attempts\n\n");
            for entry in history.iter().rev().skip(1).take(5) {
                prompt.push_str(&format!(
                    "- {} attempt {} ({})\n",
                    entry.error_type, entry.attempt, entry.error_hash
                ));
            }
        }

        let earlier = ctx.history_block(MAX_HISTORY_CHARS_IN_PROMPT);
        if !earlier.is_empty() {
            prompt.push('\n');
            prompt.push_str(&earlier);
        }

        let directives = ctx.get_directives_block(Some(CONTRACT_FIXER));
        if !directives.is_empty() {
            prompt.push('\n');
            prompt.push_str(&directives);
        }

        prompt.push_str(
            "\n## Output\n\nFinish with a JSON object:\n\
             ```json\n{\"fixed\": true, \"filesModified\": [\"path\"], \"changes\": [\"what changed\"]}\n```\n",
        );
        prompt
    }
}

#[async_trait]
impl Phase for ContractFixerPhase {
    fn name(&self) -> &str {
        CONTRACT_FIXER
    }

    fn description(&self) -> &str {
        "Fix integration errors reported by the integration tests"
    }

    async fn should_skip(&self, ctx: &mut OrchestrationContext) -> Result<SkipDecision> {
        if !ctx.get_flag(keys::E2E_REQUESTS_FIX) {
            return Ok(SkipDecision::skip("no fix requested"));
        }

        let (kind, output) = self.current_error(ctx);
        let hash = error_fingerprint(kind.as_str(), &output);
        let state = &ctx.task().orchestration.contract_fixer;
        let unchanged = state.last_error_hash.as_deref() == Some(hash.as_str());
        if !unchanged || state.attempts < self.max_retries {
            return Ok(SkipDecision::Run);
        }

        let attempts = state.attempts;
        let task_id = ctx.task_id().to_string();
        tracing::warn!(
            task_id = %task_id,
            error_hash = %hash,
            attempts,
            "Contract fixer giving up on recurring error"
        );
        ctx.set_data(keys::CONTRACT_FIXER_MAX_RETRIES_REACHED, true);
        ctx.remove_data(keys::E2E_REQUESTS_FIX);
        match self
            .store
            .update(
                &task_id,
                Box::new(|task| task.orchestration.contract_fixer.gave_up = true),
            )
            .await
        {
            Ok(updated) => ctx.refresh_task(updated),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to persist gave-up flag");
            }
        }
        Ok(SkipDecision::skip(format!(
            "max retries ({}) reached for unchanged {} error",
            attempts,
            kind.as_str()
        )))
    }

    async fn execute_phase(&self, ctx: &mut OrchestrationContext) -> Result<PhaseResult> {
        let (kind, output) = self.current_error(ctx);
        let hash = error_fingerprint(kind.as_str(), &output);
        let task_id = ctx.task_id().to_string();

        let entry_hash = hash.clone();
        let error_type = kind.as_str().to_string();
        let updated = self
            .store
            .update(
                &task_id,
                Box::new(move |task| {
                    let state = &mut task.orchestration.contract_fixer;
                    if state.last_error_hash.as_deref() != Some(entry_hash.as_str()) {
                        state.attempts = 0;
                        state.last_error_hash = Some(entry_hash.clone());
                        state.gave_up = false;
                    }
                    state.attempts += 1;
                    state.error_history.push(ErrorHistoryEntry {
                        error_hash: entry_hash,
                        error_type,
                        attempt: state.attempts,
                        timestamp: Utc::now(),
                    });
                }),
            )
            .await?;
        let attempt = updated.orchestration.contract_fixer.attempts;
        ctx.refresh_task(updated);
        tracing::info!(task_id = %task_id, error_hash = %hash, attempt, kind = %kind, "Running contract fixer");
        ctx.report_progress(
            CONTRACT_FIXER,
            format!("attempt {}/{} for {} error", attempt, self.max_retries, kind),
        );

        let prompt = self.build_prompt(ctx, kind, &output, attempt);
        ctx.history_mut().push(
            TurnRole::Prompt,
            CONTRACT_FIXER,
            &format!(
                "Fix {} error (attempt {}/{}):\n{}",
                kind,
                attempt,
                self.max_retries,
                preview(&output, 500)
            ),
        );
        let workspace = ctx.workspace_path().to_path_buf();
        let request = AgentRequest::new(CONTRACT_FIXER, prompt, workspace, &task_id)
            .with_display_name("Contract fixer");

        // Request a re-run whatever happens; the fingerprint bounds the loop.
        ctx.remove_data(keys::CONTRACT_FIXER_MAX_RETRIES_REACHED);
        ctx.remove_data(keys::E2E_REQUESTS_FIX);
        ctx.set_data(keys::E2E_RERUN_REQUESTED, true);
        ctx.request_phase(E2E_TESTING);

        let response = match self.agent.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(task_id = %task_id, attempt, error = %e, "Contract fixer agent failed");
                return Ok(PhaseResult::failure(
                    CONTRACT_FIXER,
                    format!("Agent execution failed: {:#}", e),
                )
                .with_data(json!({ "attempt": attempt, "errorHash": hash })));
            }
        };
        ctx.history_mut()
            .push(TurnRole::Response, CONTRACT_FIXER, &response.output);

        let outcome: FixOutcome = extract_json_object(&response.output)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        ctx.set_json(keys::CONTRACT_FIXER_RESULT, &outcome)?;

        let data = json!({
            "attempt": attempt,
            "errorHash": hash,
            "errorType": kind.as_str(),
            "fixed": outcome.fixed,
            "filesModified": outcome.files_modified,
            "changes": outcome.changes,
        });
        if outcome.fixed {
            Ok(PhaseResult::success_with_data(CONTRACT_FIXER, data).with_metrics(response.metrics()))
        } else {
            Ok(PhaseResult::failure(
                CONTRACT_FIXER,
                format!(
                    "Contract fixer could not fix {} error (attempt {}/{})",
                    kind, attempt, self.max_retries
                ),
            )
            .with_data(data)
            .with_metrics(response.metrics()))
        }
    }
}
