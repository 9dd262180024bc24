//! Tools that change the solver's own line. Every edit here ends up in the
//! solver's approach once the line is snapshotted.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, Tool, ToolOutput};
use crate::error::Result;
use crate::workspace::manager::set_executable;
use crate::workspace::GitGateway;

/// Resolve `requested` without following a symlink in its last component,
/// so edits replace links instead of landing on their targets.
fn line_entry(workspace_root: &Path, requested: &str) -> std::result::Result<PathBuf, ToolOutput> {
    GitGateway::entry_path(workspace_root, Path::new(requested))
        .map_err(|e| ToolOutput::Error(format!("Invalid path: {e}")))
}

/// Creates or replaces a file on the solver's line.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write a file with the given content, creating it (and any parent directories) if it does not exist and replacing it entirely if it does. A symlink at the path is replaced by a regular file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative path to the file from the repository root"
                    },
                    "content": {
                        "type": "string",
                        "description": "The complete content for the file"
                    },
                    "executable": {
                        "type": "boolean",
                        "description": "Optional: set or clear the executable bit. Omit to keep the current mode."
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let content = require_param!(input, "content");

        let entry = match line_entry(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        let existing = tokio::fs::symlink_metadata(&entry).await.ok();
        match &existing {
            Some(meta) if meta.is_dir() => {
                return Ok(ToolOutput::Error(format!("{path_str} is a directory")));
            }
            Some(meta) if meta.file_type().is_symlink() => {
                if let Err(e) = tokio::fs::remove_file(&entry).await {
                    return Ok(ToolOutput::Error(format!("Failed to replace symlink: {e}")));
                }
            }
            _ => {}
        }

        if let Some(parent) = entry.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::Error(format!("Failed to create directory: {e}")));
            }
        }
        if let Err(e) = tokio::fs::write(&entry, content).await {
            return Ok(ToolOutput::Error(format!("Failed to write file: {e}")));
        }
        if let Some(executable) = input["executable"].as_bool() {
            if let Err(e) = set_executable(&entry, executable).await {
                return Ok(ToolOutput::Error(format!("Failed to set mode: {e}")));
            }
        }

        let verb = if existing.is_some() { "Updated" } else { "Created" };
        Ok(ToolOutput::Success(format!("{verb} {path_str}")))
    }
}

/// Removes a file or symlink from the solver's line.
pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_file".to_string(),
            description: "Delete a file or symlink from your line. The deletion becomes part of your approach. Directories cannot be deleted; delete their files instead.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative path to the file to delete from the repository root"
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

        let entry = match line_entry(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        match tokio::fs::symlink_metadata(&entry).await {
            Err(_) => Ok(ToolOutput::Error(format!("File not found: {path_str}"))),
            Ok(meta) if meta.is_dir() => Ok(ToolOutput::Error(format!(
                "{path_str} is a directory; delete its files instead"
            ))),
            Ok(_) => match tokio::fs::remove_file(&entry).await {
                Ok(()) => Ok(ToolOutput::Success(format!(
                    "Deleted {path_str}; the deletion is part of your approach"
                ))),
                Err(e) => Ok(ToolOutput::Error(format!("Failed to delete file: {e}"))),
            },
        }
    }
}
