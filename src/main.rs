use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Resumable multi-repository agent orchestration pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a task and print its id
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Workspace directory holding the cloned repositories
        #[arg(short, long)]
        workspace: PathBuf,

        /// Repository as name:kind[:path], repeatable
        #[arg(short, long = "repo")]
        repos: Vec<String>,
    },
    /// Run (or resume) the pipeline for a task
    Run {
        task_id: String,

        /// Force verification phases to run again
        #[arg(long)]
        continuation: bool,

        /// Auto-approve approval gates
        #[arg(long)]
        auto_pilot: bool,

        /// JSON file describing a merge conflict to resolve
        #[arg(long)]
        merge_conflict: Option<PathBuf>,
    },
    /// Approve a phase waiting for a human decision
    Approve {
        task_id: String,

        /// Dotted path of the agent record to approve
        #[arg(long, default_value = "e2e-testing")]
        agent_path: String,

        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Request cancellation of a running task
    Cancel {
        task_id: String,

        /// Clear a previous cancellation instead
        #[arg(long)]
        clear: bool,
    },
    /// Inject a directive into the next agent prompts
    Directive {
        task_id: String,

        content: String,

        /// critical, high, normal or suggestion
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Restrict to one agent type
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show one task, or list all tasks
    Status { task_id: Option<String> },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default conductor.toml file
    Init,
}

/// Install the stderr layer plus a daily rolling file under `.conductor/logs`.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(
    project_dir: &Path,
    verbose: bool,
    json: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default = if verbose { "conductor=debug" } else { "conductor=info" };
    let filter = EnvFilter::try_from_env("CONDUCTOR_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    let log_dir = project_dir.join(".conductor").join("logs");
    let (file_layer, guard) = if log_dir.is_dir() {
        let appender = tracing_appender::rolling::daily(&log_dir, "conductor.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = init_logging(&project_dir, cli.verbose, cli.log_json);

    match &cli.command {
        Commands::Create {
            title,
            description,
            workspace,
            repos,
        } => cmd::cmd_create(&project_dir, title, description, workspace, repos).await?,
        Commands::Run {
            task_id,
            continuation,
            auto_pilot,
            merge_conflict,
        } => {
            let options = cmd::RunArgs {
                continuation: *continuation,
                auto_pilot: *auto_pilot,
                merge_conflict: merge_conflict.clone(),
            };
            cmd::cmd_run(&cli, &project_dir, task_id, options).await?;
        }
        Commands::Approve {
            task_id,
            agent_path,
            actor,
        } => cmd::cmd_approve(&project_dir, task_id, agent_path, actor).await?,
        Commands::Cancel { task_id, clear } => cmd::cmd_cancel(&project_dir, task_id, *clear).await?,
        Commands::Directive {
            task_id,
            content,
            priority,
            agent,
        } => cmd::cmd_directive(&project_dir, task_id, content, priority, agent.as_deref()).await?,
        Commands::Status { task_id } => cmd::cmd_status(&project_dir, task_id.as_deref()).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
