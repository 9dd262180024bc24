use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    pub github: Option<GitHubConfig>,
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// What to do when a solver or reviewer invocation fails or times out.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolverErrorPolicy {
    /// Record the error and carry on with an empty output for that identity.
    ContinueWithEmpty,
    /// Abort the whole run.
    #[default]
    AbortRun,
}

impl std::str::FromStr for SolverErrorPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "continue_with_empty" => Ok(Self::ContinueWithEmpty),
            "abort_run" => Ok(Self::AbortRun),
            other => Err(AppError::Config(format!(
                "Unknown on_solver_error policy: {other} (expected continue_with_empty or abort_run)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub on_solver_error: SolverErrorPolicy,
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub concurrent_implementation: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            on_solver_error: SolverErrorPolicy::default(),
            phase_timeout_seconds: default_phase_timeout(),
            concurrent_implementation: true,
        }
    }
}

impl WorkflowConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Repository the solvers work against.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    /// Where linked worktrees for isolation lines are created.
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: PathBuf,
    /// Root of the artifact store; each run gets its own subdirectory.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Base branch for all lines. Defaults to whatever HEAD points at.
    pub base_branch: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            worktrees_dir: default_worktrees_dir(),
            artifacts_dir: default_artifacts_dir(),
            base_branch: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskSourceKind {
    #[default]
    Github,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    #[serde(default)]
    pub source: TaskSourceKind,
    #[serde(default = "default_local_tasks_dir")]
    pub local_dir: PathBuf,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            source: TaskSourceKind::default(),
            local_dir: default_local_tasks_dir(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub token: String,
    /// `owner/repo` the issues live in and pull requests are opened against.
    pub repo: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("repo", &self.repo)
            .field("remote", &self.remote)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub models: ModelOverrides,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("models", &self.models)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .field("rate_limit_max_retries", &self.rate_limit_max_retries)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .finish()
    }
}

/// Optional per-identity models, so the two solvers can be different models.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelOverrides {
    pub solver_a: Option<String>,
    pub solver_b: Option<String>,
    pub arbiter: Option<String>,
}

/// Limits for the file tools agents use inside their working directory.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Largest file `read_file` returns whole; bigger files need a line range.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,
    /// List dotfiles other than `.git`.
    #[serde(default)]
    pub show_hidden_files: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_search_results: default_max_search_results(),
            max_list_entries: default_max_list_entries(),
            show_hidden_files: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_phase_timeout() -> u64 {
    30 * 60
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_worktrees_dir() -> PathBuf {
    PathBuf::from("/tmp/duet-worktrees")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(".duet/runs")
}

fn default_local_tasks_dir() -> PathBuf {
    PathBuf::from(".duet/tasks")
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_max_turns() -> u32 {
    50
}

fn default_rate_limit_max_retries() -> u32 {
    3
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_max_search_results() -> usize {
    50
}

fn default_max_list_entries() -> usize {
    200
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("duet").required(false));
        }

        // Environment variable overrides with DUET_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("DUET")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.phase_timeout_seconds == 0 {
            return Err(AppError::Config(
                "workflow.phase_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.tasks.source == TaskSourceKind::Github && self.github.is_none() {
            return Err(AppError::Config(
                "tasks.source = \"github\" requires a [github] section".to_string(),
            ));
        }
        if let Some(github) = &self.github {
            if github.repo.split_once('/').is_none() {
                return Err(AppError::Config(format!(
                    "github.repo must look like owner/repo, got: {}",
                    github.repo
                )));
            }
        }
        Ok(())
    }
}
