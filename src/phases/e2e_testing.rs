use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use conductor_common::RepositoryKind;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::classify::{ErrorClassifier, IntegrationErrorKind, RegexErrorClassifier};
use super::{CONTRACT_FIXER, E2E_TESTING};
use crate::agent::{AgentExecutor, AgentRequest, extract_json_object};
use crate::context::{OrchestrationContext, TurnRole, keys};
use crate::errors::PhaseError;
use crate::phase::{Phase, PhaseResult, SkipDecision};

const MAX_HISTORY_CHARS_IN_PROMPT: usize = 6000;

/// Lowercase substrings that mark a failed run when the agent gave no
/// structured verdict.
const FAILURE_INDICATORS: &[&str] = &[
    "integration test failed",
    "integration tests failed",
    "tests failed",
    "\"integrationpass\": false",
    "integrationpass: false",
    "404 not found",
    "cors error",
    "blocked by cors",
    "econnrefused",
    "connection refused",
    "500 internal server error",
    "failed to fetch",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationIssue {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Verdict derived from the agent output.
#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    pass: bool,
    issues: Vec<IntegrationIssue>,
    summary: Option<String>,
}

fn parse_verdict(output: &str) -> Verdict {
    let structured = extract_json_object(output);
    let pass_field = structured
        .as_ref()
        .and_then(|v| v.get("integrationPass"))
        .and_then(Value::as_bool);
    let issues: Vec<IntegrationIssue> = structured
        .as_ref()
        .and_then(|v| v.get("issues"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let summary = structured
        .as_ref()
        .and_then(|v| v.get("summary"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let pass = match pass_field {
        Some(pass) => pass,
        None => {
            let lower = output.to_lowercase();
            !FAILURE_INDICATORS.iter().any(|ind| lower.contains(ind))
        }
    };
    Verdict {
        pass,
        issues,
        summary,
    }
}

/// Cross-repository integration verification. Routes failures to the
/// contract fixer instead of retrying itself.
pub struct E2ETestingPhase {
    agent: Arc<dyn AgentExecutor>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl E2ETestingPhase {
    pub fn new(agent: Arc<dyn AgentExecutor>) -> Self {
        Self {
            agent,
            classifier: Arc::new(RegexErrorClassifier::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn build_prompt(&self, ctx: &OrchestrationContext) -> String {
        let mut prompt = String::from(
            "# Frontend/Backend Integration Test\n\n\
             Verify that the frontend and backend work together.\n\n## Repositories\n\n",
        );
        for repo in ctx.repositories() {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                repo.name,
                repo.kind,
                ctx.repository_path(repo).display()
            ));
        }
        prompt.push_str(
            "\n## Steps\n\n\
             1. Start the backend service and wait until it answers.\n\
             2. Start the frontend (or read its API client) to learn which endpoints, methods and payloads it uses.\n\
             3. Issue real HTTP requests against the running backend matching what the frontend sends.\n\
             4. Check status codes, CORS headers, authentication and response shapes.\n\
             5. Stop every process you started.\n",
        );
        let earlier = ctx.history_block(MAX_HISTORY_CHARS_IN_PROMPT);
        if !earlier.is_empty() {
            prompt.push_str("\nRe-test what the earlier exchanges below changed.\n\n");
            prompt.push_str(&earlier);
        }
        let directives = ctx.get_directives_block(Some(E2E_TESTING));
        if !directives.is_empty() {
            prompt.push('\n');
            prompt.push_str(&directives);
        }
        prompt.push_str(
            "\n## Output\n\nFinish with a JSON object:\n\
             ```json\n{\"integrationPass\": false, \"summary\": \"...\", \"issues\": [{\"type\": \"endpoint-not-found|cors|payload-mismatch|method-mismatch|authentication\", \"endpoint\": \"GET /api/x\", \"description\": \"...\"}]}\n```\n",
        );
        prompt
    }

    fn classify(&self, error_text: &str, issues: &[IntegrationIssue]) -> IntegrationErrorKind {
        match self.classifier.classify(error_text) {
            IntegrationErrorKind::Generic => issues
                .iter()
                .map(|i| IntegrationErrorKind::parse_lenient(&i.kind))
                .find(|k| *k != IntegrationErrorKind::Generic)
                .unwrap_or(IntegrationErrorKind::Generic),
            kind => kind,
        }
    }
}

fn has_frontend_and_backend(ctx: &OrchestrationContext) -> bool {
    !ctx.repositories_of_kind(RepositoryKind::Frontend).is_empty()
        && !ctx.repositories_of_kind(RepositoryKind::Backend).is_empty()
}

#[async_trait]
impl Phase for E2ETestingPhase {
    fn name(&self) -> &str {
        E2E_TESTING
    }

    fn description(&self) -> &str {
        "Verify frontend and backend integration"
    }

    async fn should_skip(&self, ctx: &mut OrchestrationContext) -> Result<SkipDecision> {
        if ctx.repositories().len() < 2 {
            return Ok(SkipDecision::skip("fewer than two repositories"));
        }
        if !has_frontend_and_backend(ctx) {
            return Ok(SkipDecision::skip("needs a frontend and a backend repository"));
        }
        if ctx.is_continuation() || ctx.get_flag(keys::E2E_RERUN_REQUESTED) {
            return Ok(SkipDecision::Run);
        }
        if ctx.task().is_phase_completed(E2E_TESTING) {
            return Ok(SkipDecision::skip("already completed"));
        }
        Ok(SkipDecision::Run)
    }

    async fn execute_phase(&self, ctx: &mut OrchestrationContext) -> Result<PhaseResult> {
        let rerun = ctx.remove_data(keys::E2E_RERUN_REQUESTED).is_some();
        let prompt = self.build_prompt(ctx);
        let note = if rerun {
            "Re-run the integration tests after the contract fix"
        } else {
            "Run the integration tests"
        };
        ctx.history_mut().push(TurnRole::Prompt, E2E_TESTING, note);

        let request = AgentRequest::new(E2E_TESTING, prompt, ctx.workspace_path(), ctx.task_id())
            .with_display_name("Integration tester");
        let response = self
            .agent
            .execute(request)
            .await
            .map_err(PhaseError::Agent)?;
        ctx.history_mut()
            .push(TurnRole::Response, E2E_TESTING, &response.output);

        let verdict = parse_verdict(&response.output);
        if verdict.pass {
            for key in [
                keys::E2E_ERRORS,
                keys::E2E_ERROR_TYPE,
                keys::E2E_ISSUES,
                keys::E2E_REQUESTS_FIX,
            ] {
                ctx.remove_data(key);
            }
            tracing::info!(task_id = %ctx.task_id(), "Integration tests passed");
            ctx.report_progress(E2E_TESTING, "integration tests passed");
            return Ok(PhaseResult::success_with_data(
                E2E_TESTING,
                json!({ "integrationPass": true, "summary": verdict.summary }),
            )
            .with_metrics(response.metrics()));
        }

        let error_text = if verdict.issues.is_empty() {
            response.output.clone()
        } else {
            let mut lines: Vec<String> = verdict
                .issues
                .iter()
                .map(|i| match &i.endpoint {
                    Some(endpoint) => format!("[{}] {}: {}", i.kind, endpoint, i.description),
                    None => format!("[{}] {}", i.kind, i.description),
                })
                .collect();
            if let Some(summary) = &verdict.summary {
                lines.push(summary.clone());
            }
            lines.join("\n")
        };
        let kind = self.classify(&error_text, &verdict.issues);
        tracing::warn!(task_id = %ctx.task_id(), kind = %kind, issues = verdict.issues.len(), "Integration tests failed");
        ctx.report_progress(
            E2E_TESTING,
            format!(
                "integration tests failed ({}, {} issue(s))",
                kind,
                verdict.issues.len()
            ),
        );

        ctx.set_data(keys::E2E_ERRORS, error_text);
        ctx.set_data(keys::E2E_ERROR_TYPE, kind.as_str());
        ctx.set_json(keys::E2E_ISSUES, &verdict.issues)?;
        ctx.set_data(keys::E2E_REQUESTS_FIX, true);
        ctx.request_phase(CONTRACT_FIXER);

        Ok(PhaseResult::failure(
            E2E_TESTING,
            format!("Integration tests failed ({})", kind),
        )
        .with_data(json!({
            "integrationPass": false,
            "errorType": kind.as_str(),
            "issues": verdict.issues,
        }))
        .with_metrics(response.metrics()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::{ScriptedAgent, fullstack_task, saved_context};
    use crate::store::{MemoryTaskStore, PhaseRecordUpdate};
    use conductor_common::{RepositoryInfo, Task};
    use std::path::Path;

    fn ws() -> &'static Path {
        Path::new("/tmp/ws")
    }

    #[test]
    fn test_verdict_prefers_structured_field() {
        let v = parse_verdict(r#"tests failed earlier but now {"integrationPass": true}"#);
        assert!(v.pass);
        let v = parse_verdict(r#"{"integrationPass": false, "issues": [{"type": "cors", "description": "blocked"}]}"#);
        assert!(!v.pass);
        assert_eq!(v.issues[0].kind, "cors");
    }

    #[test]
    fn test_verdict_falls_back_to_indicators() {
        assert!(!parse_verdict("GET /api/orders -> 404 Not Found").pass);
        assert!(!parse_verdict("fetch: ECONNREFUSED 127.0.0.1:4000").pass);
        assert!(parse_verdict("All endpoints answered 200 OK.").pass);
    }

    #[tokio::test]
    async fn test_skip_property_for_incomplete_repository_sets() {
        let store = MemoryTaskStore::new();
        let phase = E2ETestingPhase::new(ScriptedAgent::new(&[]));
        let cases: Vec<Vec<RepositoryInfo>> = vec![
            vec![],
            vec![RepositoryInfo::new("web", RepositoryKind::Frontend, "web")],
            vec![
                RepositoryInfo::new("web", RepositoryKind::Frontend, "web"),
                RepositoryInfo::new("app", RepositoryKind::Mobile, "app"),
            ],
            vec![
                RepositoryInfo::new("api", RepositoryKind::Backend, "api"),
                RepositoryInfo::new("lib", RepositoryKind::Library, "lib"),
            ],
        ];
        for repos in cases {
            let mut task = Task::new("t", "").with_workspace(ws());
            task.repositories = repos;
            task.orchestration.continuation = true;
            let mut ctx = saved_context(&store, task).await;
            ctx.set_data(keys::E2E_RERUN_REQUESTED, true);
            assert!(phase.should_skip(&mut ctx).await.unwrap().is_skip());
        }
    }

    #[tokio::test]
    async fn test_continuation_reruns_completed_phase() {
        let store = MemoryTaskStore::new();
        let mut task = fullstack_task(ws());
        PhaseRecordUpdate::completed().apply(task.phase_record_mut(E2E_TESTING));
        let mut ctx = saved_context(&store, task).await;
        let phase = E2ETestingPhase::new(ScriptedAgent::new(&[]));

        assert!(phase.should_skip(&mut ctx).await.unwrap().is_skip());
        ctx.set_continuation(true);
        assert_eq!(phase.should_skip(&mut ctx).await.unwrap(), SkipDecision::Run);
    }

    #[tokio::test]
    async fn test_404_failure_routes_to_contract_fixer() {
        let store = MemoryTaskStore::new();
        let mut ctx = saved_context(&store, fullstack_task(ws())).await;
        let agent = ScriptedAgent::new(&[
            "Called GET /api/orders: 404 Not Found\n{\"integrationPass\": false}",
        ]);
        let phase = E2ETestingPhase::new(agent.clone());

        let result = phase.execute_phase(&mut ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(ctx.get_str(keys::E2E_ERROR_TYPE), Some("endpoint-not-found"));
        assert!(ctx.get_flag(keys::E2E_REQUESTS_FIX));
        assert!(ctx.get_str(keys::E2E_ERRORS).unwrap().contains("404 Not Found"));
        assert_eq!(ctx.requested_phase(), Some(CONTRACT_FIXER));
        assert!(agent.last_prompt().contains("web (frontend)"));
    }

    #[tokio::test]
    async fn test_issue_type_used_when_text_is_unclassified() {
        let store = MemoryTaskStore::new();
        let mut ctx = saved_context(&store, fullstack_task(ws())).await;
        let agent = ScriptedAgent::new(&[
            r#"{"integrationPass": false, "issues": [{"type": "method-mismatch", "description": "frontend uses PUT"}]}"#,
        ]);
        let phase = E2ETestingPhase::new(agent);
        phase.execute_phase(&mut ctx).await.unwrap();
        assert_eq!(ctx.get_str(keys::E2E_ERROR_TYPE), Some("method-mismatch"));
    }

    #[tokio::test]
    async fn test_pass_clears_error_keys() {
        let store = MemoryTaskStore::new();
        let mut ctx = saved_context(&store, fullstack_task(ws())).await;
        ctx.set_data(keys::E2E_ERRORS, "old");
        ctx.set_data(keys::E2E_REQUESTS_FIX, true);
        ctx.set_data(keys::E2E_RERUN_REQUESTED, true);
        let phase = E2ETestingPhase::new(ScriptedAgent::new(&[r#"{"integrationPass": true}"#]));

        let result = phase.execute_phase(&mut ctx).await.unwrap();
        assert!(result.success);
        assert!(ctx.get_data(keys::E2E_ERRORS).is_none());
        assert!(!ctx.get_flag(keys::E2E_REQUESTS_FIX));
        assert!(!ctx.get_flag(keys::E2E_RERUN_REQUESTED));
        assert!(ctx.requested_phase().is_none());
    }

    #[tokio::test]
    async fn test_rerun_prompt_carries_fix_outcome() {
        let store = MemoryTaskStore::new();
        let mut ctx = saved_context(&store, fullstack_task(ws())).await;
        ctx.history_mut().push(
            TurnRole::Response,
            CONTRACT_FIXER,
            r#"Mounted the orders router under /api. {"fixed": true}"#,
        );
        ctx.set_data(keys::E2E_RERUN_REQUESTED, true);
        let agent = ScriptedAgent::new(&[r#"{"integrationPass": true}"#]);
        let phase = E2ETestingPhase::new(agent.clone());

        phase.execute_phase(&mut ctx).await.unwrap();
        let prompt = agent.last_prompt();
        assert!(prompt.contains("## Earlier exchanges in this run"));
        assert!(prompt.contains("Mounted the orders router under /api"));
        assert_eq!(
            ctx.history().turns()[1].content,
            "Re-run the integration tests after the contract fix"
        );
    }
}
