//! Git plumbing used by the recovery phases.
//!
//! Everything goes through the `git` CLI as a subprocess with a bounded
//! timeout; a timeout is reported as [`PhaseError::GitTimeout`].

mod markers;

pub use markers::{CONFLICT_MARKER, files_with_markers, find_conflict_markers};

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::conductor_config::GitSection;
use crate::errors::PhaseError;

#[async_trait]
pub trait GitClient: Send + Sync {
    /// Files `git status --porcelain` reports as both-modified (`UU`) or
    /// both-added (`AA`).
    async fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>>;

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool>;

    /// Whether local HEAD has commits the remote branch lacks. A branch
    /// with no remote counterpart counts as ahead.
    async fn is_ahead_of_remote(&self, repo: &Path, branch: &str) -> Result<bool>;

    async fn commit_all(&self, repo: &Path, message: &str) -> Result<()>;

    async fn push_force_with_lease(&self, repo: &Path, branch: &str) -> Result<()>;

    async fn current_branch(&self, repo: &Path) -> Result<String>;
}

/// Parse `git status --porcelain -z` output into unmerged paths.
///
/// Entries are NUL-terminated and paths are never quoted. A rename or copy
/// entry is followed by an extra entry holding the source path.
pub fn parse_conflicted_porcelain(porcelain: &str) -> Vec<String> {
    let mut conflicted = Vec::new();
    let mut entries = porcelain.split('\0');
    while let Some(entry) = entries.next() {
        let (Some(code), Some(path)) = (entry.get(..2), entry.get(3..)) else {
            continue;
        };
        if code.starts_with(['R', 'C']) {
            entries.next();
        }
        if matches!(code, "UU" | "AA") {
            conflicted.push(path.to_string());
        }
    }
    conflicted
}

#[derive(Debug, Clone)]
pub struct GitCli {
    command_timeout: Duration,
    push_timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_config(&GitSection::default())
    }
}

impl GitCli {
    pub fn new(command_timeout: Duration, push_timeout: Duration) -> Self {
        Self {
            command_timeout,
            push_timeout,
        }
    }

    pub fn from_config(section: &GitSection) -> Self {
        Self::new(
            Duration::from_secs(section.command_timeout_secs),
            Duration::from_secs(section.push_timeout_secs),
        )
    }

    /// Run `git <args>` in `repo`, returning raw output regardless of exit
    /// status. Only spawn failures and timeouts are errors.
    async fn output(
        &self,
        repo: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output> {
        let command = args.first().copied().unwrap_or("").to_string();
        let fut = Command::new("git")
            .args(args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(timeout, fut).await {
            Ok(output) => output.with_context(|| format!("Failed to run git {}", command)),
            Err(_) => Err(PhaseError::GitTimeout {
                command,
                secs: timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Run `git <args>` and fail on a non-zero exit.
    async fn run(&self, repo: &Path, args: &[&str], timeout: Duration) -> Result<String> {
        let output = self.output(repo, args, timeout).await?;
        if !output.status.success() {
            return Err(PhaseError::GitCommand {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>> {
        let porcelain = self
            .run(repo, &["status", "--porcelain", "-z"], self.command_timeout)
            .await?;
        Ok(parse_conflicted_porcelain(&porcelain))
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool> {
        let porcelain = self
            .run(repo, &["status", "--porcelain"], self.command_timeout)
            .await?;
        Ok(!porcelain.trim().is_empty())
    }

    async fn is_ahead_of_remote(&self, repo: &Path, branch: &str) -> Result<bool> {
        let range = format!("origin/{}..HEAD", branch);
        let output = self
            .output(repo, &["rev-list", "--count", &range], self.command_timeout)
            .await?;
        if !output.status.success() {
            // No remote-tracking ref yet
            return Ok(true);
        }
        let count: u64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn commit_all(&self, repo: &Path, message: &str) -> Result<()> {
        self.run(repo, &["add", "-A"], self.command_timeout).await?;
        self.run(repo, &["commit", "-m", message], self.command_timeout)
            .await?;
        Ok(())
    }

    async fn push_force_with_lease(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run(
            repo,
            &["push", "--force-with-lease", "-u", "origin", branch],
            self.push_timeout,
        )
        .await?;
        Ok(())
    }

    async fn current_branch(&self, repo: &Path) -> Result<String> {
        let name = self
            .run(repo, &["rev-parse", "--abbrev-ref", "HEAD"], self.command_timeout)
            .await?;
        Ok(name.trim().to_string())
    }
}
