//! Task creation and inspection: `conductor create`, `conductor status`.

use anyhow::{Context, Result, bail};
use conductor::common::{PhaseStatus, RepositoryInfo, RepositoryKind, Task, TaskStatus};
use conductor::store::TaskStore;
use console::style;
use std::path::{Path, PathBuf};

/// Parse `name:kind[:path]`; the path defaults to the name.
pub(crate) fn parse_repository(spec: &str) -> Result<RepositoryInfo> {
    let parts: Vec<&str> = spec.splitn(3, ':').collect();
    if parts.len() < 2 || parts[0].is_empty() {
        bail!("Invalid repository '{}'. Expected name:kind[:path]", spec);
    }
    let kind: RepositoryKind = parts[1].parse()?;
    let path = parts.get(2).copied().unwrap_or(parts[0]);
    Ok(RepositoryInfo::new(parts[0], kind, path))
}

pub async fn cmd_create(
    project_dir: &Path,
    title: &str,
    description: &str,
    workspace: &Path,
    repos: &[String],
) -> Result<()> {
    let (_, store) = super::open_store(project_dir)?;

    let workspace: PathBuf = if workspace.is_absolute() {
        workspace.to_path_buf()
    } else {
        project_dir.join(workspace)
    };
    let mut task = Task::new(title, description).with_workspace(workspace);
    for spec in repos {
        task = task.with_repository(parse_repository(spec)?);
    }

    store.save(&task).await.context("Failed to save task")?;
    tracing::info!(task_id = %task.id, repositories = task.repositories.len(), "Task created");
    println!("{}", task.id);
    Ok(())
}

fn styled_task_status(status: TaskStatus) -> String {
    let s = status.as_str();
    match status {
        TaskStatus::Completed => style(s).green().to_string(),
        TaskStatus::Failed | TaskStatus::Cancelled => style(s).red().to_string(),
        TaskStatus::WaitingApproval => style(s).yellow().to_string(),
        TaskStatus::Running => style(s).cyan().to_string(),
        TaskStatus::Pending => style(s).dim().to_string(),
    }
}

fn styled_phase_status(status: PhaseStatus) -> String {
    let s = status.as_str();
    match status {
        PhaseStatus::Completed => style(s).green().to_string(),
        PhaseStatus::Failed => style(s).red().to_string(),
        PhaseStatus::WaitingApproval => style(s).yellow().to_string(),
        PhaseStatus::Running => style(s).cyan().to_string(),
        PhaseStatus::Pending => style(s).dim().to_string(),
    }
}

fn print_task(task: &Task) {
    println!();
    println!("{} {}", style("Task").bold(), task.id);
    println!("  title:   {}", task.title);
    println!("  status:  {}", styled_task_status(task.status));
    if let Some(ws) = &task.workspace_path {
        println!("  workspace: {}", ws.display());
    }
    if let Some(phase) = &task.orchestration.current_phase {
        println!("  current phase: {}", style(phase).yellow());
    }
    if task.orchestration.cancel_requested {
        println!("  {}", style("cancellation requested").red());
    }

    if !task.repositories.is_empty() {
        println!();
        println!("Repositories:");
        for repo in &task.repositories {
            println!("  {} ({}) {}", repo.name, repo.kind, style(repo.path.display()).dim());
        }
    }

    if !task.orchestration.phases.is_empty() {
        println!();
        println!("Phases:");
        for (name, record) in &task.orchestration.phases {
            let mut line = format!("  {:<24} {}", name, styled_phase_status(record.status));
            if record.approved {
                line.push_str(&format!(" {}", style("approved").green()));
            }
            if record.skipped_on_recovery {
                line.push_str(&format!(" {}", style("(skipped on recovery)").dim()));
            }
            println!("{}", line);
            if let Some(err) = &record.error {
                println!("    {}", style(err).red());
            }
        }
    }

    let fixer = &task.orchestration.contract_fixer;
    if fixer.attempts > 0 || fixer.gave_up {
        println!();
        println!(
            "Contract fixer: {} attempt(s){}",
            fixer.attempts,
            if fixer.gave_up { ", gave up" } else { "" }
        );
    }

    let branches = &task.orchestration.branch_registry;
    if !branches.is_empty() {
        println!();
        println!("Branches:");
        for b in branches {
            println!(
                "  {} [{}] pushed={} merged={}",
                b.name, b.repository, b.pushed, b.merged
            );
        }
    }

    if !task.directives.is_empty() {
        println!();
        println!("Directives: {}", task.directives.len());
    }
    println!();
}

pub async fn cmd_status(project_dir: &Path, task_id: Option<&str>) -> Result<()> {
    let (_, store) = super::open_store(project_dir)?;

    match task_id {
        Some(id) => {
            let task = store.get(id).await?;
            print_task(&task);
        }
        None => {
            let tasks = store.list().await?;
            if tasks.is_empty() {
                println!("No tasks. Create one with 'conductor create'.");
                return Ok(());
            }
            for task in tasks {
                println!(
                    "{}  {:<18} {}",
                    task.id,
                    styled_task_status(task.status),
                    task.title
                );
            }
        }
    }
    Ok(())
}
