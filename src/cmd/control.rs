//! Out-of-band control: `conductor approve`, `cancel`, `directive`.

use anyhow::Result;
use conductor::common::{Directive, DirectivePriority};
use conductor::orchestrator::control;
use console::style;
use std::path::Path;

pub async fn cmd_approve(project_dir: &Path, task_id: &str, agent_path: &str, actor: &str) -> Result<()> {
    let (_, store) = super::open_store(project_dir)?;
    control::approve(store.as_ref(), task_id, agent_path, actor).await?;
    println!("{} approved {}", style("✓").green(), agent_path);
    Ok(())
}

pub async fn cmd_cancel(project_dir: &Path, task_id: &str, clear: bool) -> Result<()> {
    let (_, store) = super::open_store(project_dir)?;
    if clear {
        control::clear_cancel(store.as_ref(), task_id).await?;
        println!("Cancellation cleared for {}", task_id);
    } else {
        control::request_cancel(store.as_ref(), task_id).await?;
        println!("Cancellation requested for {}", task_id);
    }
    Ok(())
}

pub async fn cmd_directive(
    project_dir: &Path,
    task_id: &str,
    content: &str,
    priority: &str,
    agent: Option<&str>,
) -> Result<()> {
    let priority: DirectivePriority = priority.parse()?;
    let (_, store) = super::open_store(project_dir)?;
    let directive = Directive::new(content, priority, agent);
    let id = directive.id.clone();
    control::add_directive(store.as_ref(), task_id, directive).await?;
    println!("{}", id);
    Ok(())
}
