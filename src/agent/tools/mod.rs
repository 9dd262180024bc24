pub mod edit;
pub mod inspect;
pub mod search_code;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::agent::claude::ToolDefinition;
use crate::agent::Role;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::workspace::GitGateway;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput>;
}

#[derive(Debug)]
pub enum ToolOutput {
    /// Normal text result returned to Claude.
    Success(String),
    /// Error result returned to Claude (the agent can recover).
    Error(String),
}

/// Extract a required string parameter or return a tool error to the model.
macro_rules! require_param {
    ($input:expr, $name:literal) => {
        match $input[$name].as_str() {
            Some(value) => value,
            None => {
                return Ok($crate::agent::tools::ToolOutput::Error(format!(
                    "Missing '{}' parameter",
                    $name
                )))
            }
        }
    };
}
pub(crate) use require_param;

/// Resolve `requested` inside `workspace_root`, turning an escape attempt into
/// a recoverable tool error.
pub(crate) fn verified_path(
    workspace_root: &Path,
    requested: &str,
) -> std::result::Result<PathBuf, ToolOutput> {
    GitGateway::verify_path(workspace_root, Path::new(requested))
        .map_err(|e| ToolOutput::Error(format!("Invalid path: {e}")))
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Tools available to `role`. Only solvers may modify their line;
    /// reviewers and the arbiter get read-only access.
    pub fn for_role(role: Role, config: &AgentConfig) -> Self {
        let mut tools: Vec<Box<dyn Tool>> = vec![
            Box::new(inspect::ReadFileTool::new(config)),
            Box::new(inspect::ListDirectoryTool::new(config)),
            Box::new(search_code::SearchCodeTool::new(config.max_search_results)),
        ];

        if role == Role::Solver {
            tools.push(Box::new(edit::WriteFileTool));
            tools.push(Box::new(edit::DeleteFileTool));
        }

        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}
