use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent capability timed out after {seconds}s during {phase}")]
    CapabilityTimeout { phase: String, seconds: u64 },

    #[error("Agent capability error: {0}")]
    Capability(String),

    #[error("Artifact conflict: {0} is already finalized")]
    ArtifactConflict(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Incomplete decision: {}", .0.join("; "))]
    IncompleteDecision(Vec<String>),

    #[error("Merge conflict on {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    #[error("Neither solver produced any changes")]
    EmptyApproaches,

    #[error("Illegal phase transition: {0}")]
    IllegalTransition(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("Claude API rate limited: {0}")]
    ClaudeRateLimited(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors scoped to a single agent invocation. Everything else ends the run.
    pub fn is_phase_local(&self) -> bool {
        matches!(
            self,
            AppError::CapabilityTimeout { .. }
                | AppError::Capability(_)
                | AppError::ClaudeApi(_)
                | AppError::ClaudeRateLimited(_)
        )
    }

    /// Short stable label used in logs and the audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::TaskNotFound(_) => "task_not_found",
            AppError::CapabilityTimeout { .. } => "capability_timeout",
            AppError::Capability(_) => "capability_error",
            AppError::ArtifactConflict(_) => "artifact_conflict",
            AppError::ArtifactNotFound(_) => "artifact_not_found",
            AppError::IncompleteDecision(_) => "incomplete_decision",
            AppError::MergeConflict(_) => "merge_conflict",
            AppError::EmptyApproaches => "empty_approaches",
            AppError::IllegalTransition(_) => "illegal_transition",
            AppError::GitHubApi(_) => "github_api",
            AppError::Git(_) => "git",
            AppError::Workspace(_) => "workspace",
            AppError::ClaudeApi(_) | AppError::ClaudeRateLimited(_) => "claude_api",
            AppError::Serialization(_) => "serialization",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
