use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::stream::{ContentBlock, StreamEvent, describe_tool_use};
use super::{AgentExecutor, AgentRequest, AgentResponse, TokenUsage};
use crate::conductor_config::ConductorToml;

/// Runs one agent turn through the Claude CLI in `stream-json` mode.
#[derive(Debug, Clone)]
pub struct ClaudeCliExecutor {
    claude_cmd: String,
    skip_permissions: bool,
    timeout: Duration,
}

impl ClaudeCliExecutor {
    pub fn new(claude_cmd: &str, skip_permissions: bool, timeout: Duration) -> Self {
        Self {
            claude_cmd: claude_cmd.to_string(),
            skip_permissions,
            timeout,
        }
    }

    pub fn from_config(toml: &ConductorToml) -> Self {
        Self::new(
            &toml.claude_cmd(),
            toml.skip_permissions(),
            Duration::from_secs(toml.agent.timeout_secs),
        )
    }

    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = vec!["--print", "--output-format", "stream-json", "--verbose"];
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions");
        }
        flags
    }

    async fn run(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let mut child = Command::new(&self.claude_cmd)
            .args(self.flags())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&request.workspace_path)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.claude_cmd))?;

        tracing::debug!(
            task_id = %request.task_id,
            agent = %request.agent_id,
            pid = child.id().unwrap_or(0),
            prompt_chars = request.prompt.len(),
            "Spawned agent process"
        );

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let mut stderr = child.stderr.take().context("Failed to get stderr")?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut reader = BufReader::new(stdout).lines();
        let mut accumulated_text = String::new();
        let mut response = AgentResponse::default();
        let mut final_result: Option<String> = None;
        let mut is_error = false;

        while let Some(line) = reader.next_line().await? {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamEvent>(&line) {
                Ok(StreamEvent::Assistant {
                    message,
                    session_id,
                }) => {
                    if !session_id.is_empty() {
                        response.session_id = Some(session_id);
                    }
                    for block in message.content {
                        match block {
                            ContentBlock::ToolUse { name, input } => {
                                tracing::debug!(agent = %request.display_name, "{}", describe_tool_use(&name, &input));
                            }
                            ContentBlock::Text { text } => {
                                accumulated_text.push_str(&text);
                                accumulated_text.push('\n');
                            }
                            ContentBlock::Other => {}
                        }
                    }
                }
                Ok(StreamEvent::Result {
                    result,
                    is_error: err,
                    total_cost_usd,
                    usage,
                    session_id,
                    ..
                }) => {
                    final_result = result;
                    is_error = err;
                    response.cost = total_cost_usd.unwrap_or(0.0);
                    if let Some(usage) = usage {
                        response.usage = TokenUsage {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        };
                    }
                    if session_id.is_some() {
                        response.session_id = session_id;
                    }
                }
                Ok(StreamEvent::User { .. }) => {}
                Ok(StreamEvent::System { subtype }) => {
                    tracing::trace!(subtype = %subtype, "Agent system event");
                }
                Err(_) => {
                    // Not valid JSON, keep it as plain output
                    accumulated_text.push_str(&line);
                    accumulated_text.push('\n');
                }
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if is_error || !status.success() {
            let detail = final_result
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(stderr_output.trim());
            bail!(
                "{} exited with status {}: {}",
                self.claude_cmd,
                status.code().unwrap_or(-1),
                detail
            );
        }

        response.output = final_result.unwrap_or(accumulated_text);
        Ok(response)
    }
}

#[async_trait]
impl AgentExecutor for ClaudeCliExecutor {
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse> {
        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.run(&request))
            .await
            .with_context(|| {
                format!(
                    "Agent {} timed out after {}s",
                    request.agent_id,
                    self.timeout.as_secs()
                )
            })??;
        tracing::info!(
            task_id = %request.task_id,
            agent = %request.agent_id,
            cost_usd = response.cost,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Agent finished"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_include_skip_permissions() {
        let exec = ClaudeCliExecutor::new("claude", true, Duration::from_secs(1));
        assert!(exec.flags().contains(&"--dangerously-skip-permissions"));
        assert!(exec.flags().contains(&"stream-json"));
        let exec = ClaudeCliExecutor::new("claude", false, Duration::from_secs(1));
        assert!(!exec.flags().contains(&"--dangerously-skip-permissions"));
    }

    #[test]
    fn test_from_config_uses_agent_section() {
        let toml = ConductorToml::parse("[agent]\nclaude_cmd = \"my-claude\"\ntimeout_secs = 7\n").unwrap();
        let exec = ClaudeCliExecutor::from_config(&toml);
        assert_eq!(exec.timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ClaudeCliExecutor::new(
            "conductor-test-no-such-binary",
            false,
            Duration::from_secs(5),
        );
        let request = AgentRequest::new("e2e-testing", "hi".to_string(), dir.path(), "t1");
        assert!(exec.execute(request).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parses_stream_from_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\n\
             printf '%s\\n' '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"working\"}]},\"session_id\":\"s-9\"}'\n\
             printf '%s\\n' '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"{\\\"fixed\\\": true}\",\"total_cost_usd\":0.25,\"usage\":{\"input_tokens\":10,\"output_tokens\":5}}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let exec = ClaudeCliExecutor::new(script.to_str().unwrap(), false, Duration::from_secs(10));
        let request = AgentRequest::new("contract-fixer", "fix it".to_string(), dir.path(), "t1");
        let response = exec.execute(request).await.unwrap();
        assert_eq!(response.output, "{\"fixed\": true}");
        assert_eq!(response.cost, 0.25);
        assert_eq!(response.usage.output_tokens, 5);
        assert_eq!(response.session_id.as_deref(), Some("s-9"));
    }
}
