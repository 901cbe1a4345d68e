//! Unified configuration for conductor.
//!
//! Reads `.conductor/conductor.toml` and layers it file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! cancellation_poll_secs = 5
//! auto_pilot = false
//! max_recovery_hops = 8
//!
//! [agent]
//! claude_cmd = "claude"
//! skip_permissions = true
//! timeout_secs = 1800
//!
//! [git]
//! command_timeout_secs = 30
//! push_timeout_secs = 120
//!
//! [contract_fixer]
//! max_retries = 3
//!
//! [conflicts]
//! max_file_preview_chars = 4000
//! max_files_in_prompt = 10
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Interval between cancellation flag reads while a phase runs
    #[serde(default = "default_cancellation_poll_secs")]
    pub cancellation_poll_secs: u64,
    /// Approve every approval gate automatically
    #[serde(default)]
    pub auto_pilot: bool,
    /// Upper bound on chained recovery phase requests in one run
    #[serde(default = "default_max_recovery_hops")]
    pub max_recovery_hops: usize,
}

fn default_cancellation_poll_secs() -> u64 {
    5
}

fn default_max_recovery_hops() -> usize {
    8
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            cancellation_poll_secs: default_cancellation_poll_secs(),
            auto_pilot: false,
            max_recovery_hops: default_max_recovery_hops(),
        }
    }
}

/// Agent executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Claude CLI command (default: "claude")
    #[serde(default)]
    pub claude_cmd: Option<String>,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_skip_permissions() -> bool {
    true
}

fn default_agent_timeout_secs() -> u64 {
    1800
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            skip_permissions: default_skip_permissions(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_git_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_push_timeout_secs")]
    pub push_timeout_secs: u64,
}

fn default_git_command_timeout_secs() -> u64 {
    30
}

fn default_push_timeout_secs() -> u64 {
    120
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_git_command_timeout_secs(),
            push_timeout_secs: default_push_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractFixerSection {
    /// Attempts allowed against one unchanged error fingerprint
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    crate::phases::contract_fixer::MAX_RETRIES
}

impl Default for ContractFixerSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictsSection {
    /// Characters of each conflicting file embedded in the resolver prompt
    #[serde(default = "default_max_file_preview_chars")]
    pub max_file_preview_chars: usize,
    #[serde(default = "default_max_files_in_prompt")]
    pub max_files_in_prompt: usize,
    /// File extensions scanned for conflict markers
    #[serde(default = "default_conflict_extensions")]
    pub extensions: Vec<String>,
}

fn default_max_file_preview_chars() -> usize {
    4000
}

fn default_max_files_in_prompt() -> usize {
    10
}

pub fn default_conflict_extensions() -> Vec<String> {
    [
        "ts", "tsx", "js", "jsx", "mjs", "cjs", "vue", "svelte", "py", "rs", "go", "java", "kt",
        "swift", "rb", "php", "cs", "css", "scss", "html", "json", "yaml", "yml", "toml", "md",
        "sql", "sh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ConflictsSection {
    fn default() -> Self {
        Self {
            max_file_preview_chars: default_max_file_preview_chars(),
            max_files_in_prompt: default_max_files_in_prompt(),
            extensions: default_conflict_extensions(),
        }
    }
}

/// The complete conductor.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub contract_fixer: ContractFixerSection,
    #[serde(default)]
    pub conflicts: ConflictsSection,
}

impl ConductorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load from `<conductor_dir>/conductor.toml`, or defaults if absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join("conductor.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Claude command (file → env → default).
    pub fn claude_cmd(&self) -> String {
        self.agent
            .claude_cmd
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Environment variable can override the file setting.
    pub fn skip_permissions(&self) -> bool {
        if let Ok(env_val) = std::env::var("SKIP_PERMISSIONS") {
            return env_val != "false";
        }
        self.agent.skip_permissions
    }

    /// `CONDUCTOR_AUTO_PILOT=true` forces auto-pilot on.
    pub fn auto_pilot(&self) -> bool {
        if let Ok(env_val) = std::env::var("CONDUCTOR_AUTO_PILOT") {
            return env_val == "true" || env_val == "1";
        }
        self.pipeline.auto_pilot
    }

    pub fn cancellation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.cancellation_poll_secs)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.cancellation_poll_secs == 0 {
            warnings.push(
                "pipeline.cancellation_poll_secs is 0; cancellation will be polled continuously"
                    .to_string(),
            );
        }
        if self.contract_fixer.max_retries == 0 {
            warnings.push(
                "contract_fixer.max_retries is 0; integration errors will never be fixed"
                    .to_string(),
            );
        }
        // Each fixer attempt costs two hops (fixer, then the integration re-run)
        // and giving up costs one more.
        let hops_for_fixer = 2 * self.contract_fixer.max_retries as usize + 1;
        if self.pipeline.max_recovery_hops == 0 {
            warnings.push(
                "pipeline.max_recovery_hops is 0; recovery phases will never run".to_string(),
            );
        } else if self.pipeline.max_recovery_hops < hops_for_fixer {
            warnings.push(format!(
                "pipeline.max_recovery_hops ({}) is below {} needed for contract_fixer.max_retries ({}); \
                 a recurring error will fail the run instead of being documented",
                self.pipeline.max_recovery_hops, hops_for_fixer, self.contract_fixer.max_retries
            ));
        }
        if self.conflicts.extensions.is_empty() {
            warnings.push(
                "conflicts.extensions is empty; only git status will detect conflicts".to_string(),
            );
        }
        if self.git.push_timeout_secs < self.git.command_timeout_secs {
            warnings.push(format!(
                "git.push_timeout_secs ({}) is shorter than git.command_timeout_secs ({})",
                self.git.push_timeout_secs, self.git.command_timeout_secs
            ));
        }

        warnings
    }
}

/// Unified configuration that combines ConductorToml with runtime settings.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    pub project_dir: PathBuf,
    /// Path to the .conductor directory
    pub conductor_dir: PathBuf,
    pub toml: ConductorToml,
    pub verbose: bool,
    /// CLI override for auto-pilot
    pub cli_auto_pilot: Option<bool>,
}

impl ConductorConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        Ok(Self {
            project_dir,
            conductor_dir,
            toml,
            verbose: false,
            cli_auto_pilot: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        auto_pilot: Option<bool>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_auto_pilot = auto_pilot;
        Ok(config)
    }

    /// Auto-pilot (CLI → env → file → default).
    pub fn auto_pilot(&self) -> bool {
        self.cli_auto_pilot.unwrap_or_else(|| self.toml.auto_pilot())
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join("conductor.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.conductor_dir.join("tasks.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.conductor_dir.join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.conductor_dir)
            .context("Failed to create .conductor directory")?;
        std::fs::create_dir_all(self.log_dir()).context("Failed to create log directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConductorToml::parse("").unwrap();
        assert_eq!(config.pipeline.cancellation_poll_secs, 5);
        assert!(!config.pipeline.auto_pilot);
        assert_eq!(config.contract_fixer.max_retries, 3);
        assert_eq!(config.git.push_timeout_secs, 120);
        assert_eq!(config.conflicts.max_file_preview_chars, 4000);
        assert!(config.conflicts.extensions.contains(&"tsx".to_string()));
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = ConductorToml::parse(
            r#"
            [pipeline]
            auto_pilot = true

            [contract_fixer]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert!(config.pipeline.auto_pilot);
        assert_eq!(config.pipeline.max_recovery_hops, 8);
        assert_eq!(config.contract_fixer.max_retries, 5);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let result = ConductorToml::parse("[pipeline\nauto_pilot = ");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse conductor.toml")
        );
    }

    #[test]
    fn test_validate_flags_zero_values() {
        let mut config = ConductorToml::default();
        assert!(config.validate().is_empty());

        config.pipeline.cancellation_poll_secs = 0;
        config.contract_fixer.max_retries = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("cancellation_poll_secs")));
        assert!(warnings.iter().any(|w| w.contains("max_retries")));
    }

    #[test]
    fn test_validate_flags_hop_cap_below_fixer_budget() {
        let mut config = ConductorToml::default();
        config.contract_fixer.max_retries = 4;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("max_recovery_hops (8) is below 9"));

        config.pipeline.max_recovery_hops = 9;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        let mut config = ConductorToml::default();
        config.git.push_timeout_secs = 300;
        config.save(&path).unwrap();

        let loaded = ConductorToml::load(&path).unwrap();
        assert_eq!(loaded.git.push_timeout_secs, 300);
    }

    #[test]
    fn test_conductor_config_paths() {
        let dir = tempdir().unwrap();
        let config = ConductorConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.conductor_dir, root.join(".conductor"));
        assert_eq!(config.db_path(), root.join(".conductor/tasks.db"));
        config.ensure_directories().unwrap();
        assert!(config.log_dir().exists());
    }

    #[test]
    fn test_cli_auto_pilot_overrides_file() {
        let dir = tempdir().unwrap();
        let config =
            ConductorConfig::with_cli_args(dir.path().to_path_buf(), false, Some(true)).unwrap();
        assert!(config.auto_pilot());
    }
}
