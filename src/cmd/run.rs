//! Pipeline execution: `conductor run`.

use anyhow::{Context, Result, bail};
use conductor::agent::ClaudeCliExecutor;
use conductor::context::keys;
use conductor::git::GitCli;
use conductor::notify::{MultiNotifier, TracingNotifier};
use conductor::orchestrator::{RunOptions, RunOutcome, default_pipeline};
use conductor::phases::ConflictRequest;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Cli;

pub struct RunArgs {
    pub continuation: bool,
    pub auto_pilot: bool,
    pub merge_conflict: Option<PathBuf>,
}

fn load_conflict_request(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read merge conflict file: {}", path.display()))?;
    let request: ConflictRequest =
        serde_json::from_str(&content).context("Invalid merge conflict description")?;
    Ok(serde_json::to_value(request)?)
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, task_id: &str, args: RunArgs) -> Result<()> {
    let (mut config, store) = super::open_store(project_dir)?;
    config.verbose = cli.verbose;
    if args.auto_pilot {
        config.cli_auto_pilot = Some(true);
    }

    let mut options = RunOptions {
        continuation: args.continuation,
        ..Default::default()
    };
    if let Some(path) = &args.merge_conflict {
        options
            .shared_data
            .push((keys::MERGE_CONFLICT.to_string(), load_conflict_request(path)?));
    }

    let notifier = Arc::new(MultiNotifier::new().with(Arc::new(TracingNotifier)));
    let agent = Arc::new(ClaudeCliExecutor::from_config(&config.toml));
    let git = Arc::new(GitCli::from_config(&config.toml.git));
    let coordinator = default_pipeline(&config, store, notifier, agent, git);

    match coordinator.run_with(task_id, options).await? {
        RunOutcome::Completed => {
            println!("{} pipeline completed", style("✓").green());
        }
        RunOutcome::AwaitingApproval { phase } => {
            println!(
                "{} {} is waiting for approval. Run 'conductor approve {}' to continue.",
                style("⏸").yellow(),
                phase,
                task_id
            );
        }
        RunOutcome::Cancelled { phase } => {
            println!("{} cancelled during {}", style("✗").red(), phase);
        }
        RunOutcome::Failed { phase, error } => {
            bail!("Pipeline failed in {}: {}", phase, error);
        }
    }
    Ok(())
}
