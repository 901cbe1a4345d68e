//! Configuration view and validation commands: `conductor config`.

use anyhow::Result;
use conductor::conductor_config::{ConductorConfig, ConductorToml};

use super::super::ConfigCommands;

fn print_toml(toml: &ConductorToml) {
    println!("[pipeline]");
    println!("  cancellation_poll_secs = {}", toml.pipeline.cancellation_poll_secs);
    println!("  auto_pilot = {}", toml.pipeline.auto_pilot);
    println!("  max_recovery_hops = {}", toml.pipeline.max_recovery_hops);
    println!();
    println!("[agent]");
    if let Some(cmd) = &toml.agent.claude_cmd {
        println!("  claude_cmd = \"{}\"", cmd);
    }
    println!("  skip_permissions = {}", toml.agent.skip_permissions);
    println!("  timeout_secs = {}", toml.agent.timeout_secs);
    println!();
    println!("[git]");
    println!("  command_timeout_secs = {}", toml.git.command_timeout_secs);
    println!("  push_timeout_secs = {}", toml.git.push_timeout_secs);
    println!();
    println!("[contract_fixer]");
    println!("  max_retries = {}", toml.contract_fixer.max_retries);
    println!();
    println!("[conflicts]");
    println!("  max_file_preview_chars = {}", toml.conflicts.max_file_preview_chars);
    println!("  max_files_in_prompt = {}", toml.conflicts.max_files_in_prompt);
    println!("  extensions = {:?}", toml.conflicts.extensions);
    println!();
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let conductor_dir = project_dir.join(".conductor");
    let config_path = conductor_dir.join("conductor.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_toml(&ConductorToml::load(&config_path)?);

                println!("Effective values (with env/CLI overrides):");
                let config = ConductorConfig::new(project_dir.to_path_buf())?;
                println!("  claude_cmd = \"{}\"", config.toml.claude_cmd());
                println!("  skip_permissions = {}", config.toml.skip_permissions());
                println!("  auto_pilot = {}", config.auto_pilot());
                println!();
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                print_toml(&ConductorToml::default());
                println!("Run 'conductor config init' to create a conductor.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No conductor.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ConductorToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("conductor.toml already exists at {}", config_path.display());
                return Ok(());
            }
            std::fs::create_dir_all(&conductor_dir)?;
            ConductorToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
