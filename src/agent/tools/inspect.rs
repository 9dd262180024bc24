//! Read-only tools shared by every role.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, verified_path, Tool, ToolOutput};
use crate::config::AgentConfig;
use crate::error::{AppError, Result};

const MAX_LIST_DEPTH: u64 = 3;

/// Returns a file with line numbers, so reviewers and the arbiter can cite
/// exact locations. Files above `max_file_size_bytes` must be read by range.
pub struct ReadFileTool {
    max_file_size: usize,
}

impl ReadFileTool {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a text file of your working directory. Lines are prefixed with their 1-based number. Large files must be read in parts with start_line/end_line; binary files are reported by size only.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative path to the file from the repository root"
                    },
                    "start_line": {
                        "type": "integer",
                        "description": "Optional: first line to return (1-based)"
                    },
                    "end_line": {
                        "type": "integer",
                        "description": "Optional: last line to return (inclusive)"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let start = input["start_line"].as_u64();
        let end = input["end_line"].as_u64();

        let full_path = match verified_path(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        if !full_path.is_file() {
            return Ok(ToolOutput::Error(format!("Not a file: {path_str}")));
        }

        let size = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to stat {path_str}: {e}")))?
            .len() as usize;
        let ranged = start.is_some() || end.is_some();
        if size > self.max_file_size && !ranged {
            return Ok(ToolOutput::Error(format!(
                "{path_str} is too large ({size} bytes, max {} bytes); read it in parts with start_line and end_line",
                self.max_file_size
            )));
        }

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read {path_str}: {e}")))?;
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(ToolOutput::Success(format!(
                "{path_str} is a binary file ({size} bytes); contents not shown"
            )));
        };

        let first = start.unwrap_or(1).max(1) as usize;
        let last = end.map(|n| n as usize).unwrap_or(usize::MAX);
        if last < first {
            return Ok(ToolOutput::Error(format!(
                "end_line ({last}) is before start_line ({first})"
            )));
        }

        let mut out = String::new();
        for (number, line) in text.lines().enumerate().map(|(i, l)| (i + 1, l)) {
            if number < first {
                continue;
            }
            if number > last {
                break;
            }
            let numbered = format!("{number:>5}| {line}\n");
            if out.len() + numbered.len() > self.max_file_size {
                out.push_str(&format!(
                    "... (stopped at line {number}; continue with start_line={number})\n"
                ));
                break;
            }
            out.push_str(&numbered);
        }

        if out.is_empty() {
            return Ok(ToolOutput::Success(if text.is_empty() {
                format!("{path_str} is empty")
            } else {
                format!("{path_str} has no lines in that range")
            }));
        }
        Ok(ToolOutput::Success(out))
    }
}

/// Lists a directory tree up to a small depth, with file sizes.
pub struct ListDirectoryTool {
    max_entries: usize,
    show_hidden: bool,
}

impl ListDirectoryTool {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_entries: config.max_list_entries,
            show_hidden: config.show_hidden_files,
        }
    }

    fn visible(&self, name: &str) -> bool {
        name != ".git" && (self.show_hidden || !name.starts_with('.'))
    }

    async fn children(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory: {e}")))?;

        let mut children = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if self.visible(&name) {
                children.push((name, entry.path()));
            }
        }
        children.sort();
        Ok(children)
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List a directory of your working directory. Directories end in '/', files show their size, symlinks their target. Use depth (1-3) to descend into subdirectories.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative path to the directory from the repository root. Use '.' for the root."
                    },
                    "depth": {
                        "type": "integer",
                        "description": "Optional: how many levels to list (default 1, max 3)"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let depth = input["depth"].as_u64().unwrap_or(1).clamp(1, MAX_LIST_DEPTH);

        let full_path = match verified_path(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        if !full_path.is_dir() {
            return Ok(ToolOutput::Error(format!("Not a directory: {path_str}")));
        }

        // Depth-first, so each directory is followed by its contents.
        let mut stack: Vec<(String, PathBuf, usize)> = Vec::new();
        for (name, path) in self.children(&full_path).await?.into_iter().rev() {
            stack.push((name, path, 0));
        }

        let mut entries = Vec::new();
        let mut complete = true;
        while let Some((name, path, level)) = stack.pop() {
            if entries.len() >= self.max_entries {
                complete = false;
                break;
            }
            let indent = "  ".repeat(level);
            let meta = tokio::fs::symlink_metadata(&path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to stat {name}: {e}")))?;

            if meta.file_type().is_symlink() {
                let target = tokio::fs::read_link(&path)
                    .await
                    .map(|t| t.display().to_string())
                    .unwrap_or_else(|_| "?".to_string());
                entries.push(format!("{indent}{name} -> {target}"));
            } else if meta.is_dir() {
                entries.push(format!("{indent}{name}/"));
                if ((level + 1) as u64) < depth {
                    for (child, child_path) in self.children(&path).await?.into_iter().rev() {
                        stack.push((child, child_path, level + 1));
                    }
                }
            } else {
                entries.push(format!("{indent}{name} ({} bytes)", meta.len()));
            }
        }

        if entries.is_empty() {
            return Ok(ToolOutput::Success("Directory is empty".to_string()));
        }
        let mut listing = entries.join("\n");
        if !complete {
            listing.push_str(&format!(
                "\n... (listing stopped after {} entries)",
                self.max_entries
            ));
        }
        Ok(ToolOutput::Success(listing))
    }
}
