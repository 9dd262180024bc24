pub mod git;
pub mod manager;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use manager::GitGateway;

/// An isolated line of history: a branch plus the directory it is checked out in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHandle {
    pub name: String,
    pub path: PathBuf,
}

/// A durable snapshot of a line (a commit id for the git adapter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef(pub String);

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the final change ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestRef {
    PullRequest { number: u64, url: String },
    /// No hosting configured: the branch itself is the deliverable.
    LocalBranch { branch: String },
}

impl fmt::Display for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestRef::PullRequest { number, url } => write!(f, "PR #{number} ({url})"),
            RequestRef::LocalBranch { branch } => write!(f, "branch {branch}"),
        }
    }
}

/// One file-level change. Contents are raw bytes so binary files survive a
/// diff and re-apply unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileChange {
    Write {
        #[serde(with = "content_bytes")]
        content: Vec<u8>,
        #[serde(default, skip_serializing_if = "is_false")]
        executable: bool,
    },
    Symlink {
        target: String,
    },
    Delete,
}

impl FileChange {
    /// A regular, non-executable file.
    pub fn file(content: impl Into<Vec<u8>>) -> Self {
        FileChange::Write {
            content: content.into(),
            executable: false,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// UTF-8 contents serialize as a plain string, anything else as `{"base64": ...}`.
mod content_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Binary { base64: String },
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match std::str::from_utf8(bytes) {
            Ok(text) => Repr::Text(text.to_string()),
            Err(_) => Repr::Binary {
                base64: STANDARD.encode(bytes),
            },
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Ok(text.into_bytes()),
            Repr::Binary { base64 } => STANDARD.decode(base64).map_err(serde::de::Error::custom),
        }
    }
}

/// File-level changes of one line relative to another, keyed by repo-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub files: BTreeMap<String, FileChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn write(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), FileChange::file(content));
    }

    pub fn delete(&mut self, path: impl Into<String>) {
        self.files.insert(path.into(), FileChange::Delete);
    }

    pub fn insert(&mut self, path: impl Into<String>, change: FileChange) {
        self.files.insert(path.into(), change);
    }

    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Render the change set for inclusion in an agent prompt.
    ///
    /// File bodies are cut off after `max_bytes_per_file` so one huge file
    /// cannot crowd out the rest. Binary files are listed by size only.
    pub fn render(&self, max_bytes_per_file: usize) -> String {
        if self.files.is_empty() {
            return "(no file changes)".to_string();
        }

        let mut out = String::new();
        for (path, change) in &self.files {
            match change {
                FileChange::Delete => {
                    out.push_str(&format!("### `{path}` (deleted)\n\n"));
                }
                FileChange::Symlink { target } => {
                    out.push_str(&format!("### `{path}` (symlink to `{target}`)\n\n"));
                }
                FileChange::Write {
                    content,
                    executable,
                } => {
                    let mode = if *executable { " (executable)" } else { "" };
                    let Ok(text) = std::str::from_utf8(content) else {
                        out.push_str(&format!(
                            "### `{path}`{mode} (binary, {} bytes)\n\n",
                            content.len()
                        ));
                        continue;
                    };
                    let shown = truncate_at_char_boundary(text, max_bytes_per_file);
                    out.push_str(&format!("### `{path}`{mode}\n\n```\n{shown}"));
                    if shown.len() < text.len() {
                        out.push_str(&format!(
                            "\n... ({} more bytes truncated)",
                            text.len() - shown.len()
                        ));
                    }
                    out.push_str("\n```\n\n");
                }
            }
        }
        out
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Version-control and hosting operations the orchestrator relies on.
///
/// No operation may mutate a line other than the one passed to it.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// The line currently checked out in the primary working copy.
    async fn current_line(&self) -> Result<LineHandle>;

    /// Check out `line` in the primary working copy.
    async fn switch(&self, line: &LineHandle) -> Result<()>;

    /// Create a new line named `name` starting at the tip of `base`.
    async fn create_isolated_line(&self, base: &LineHandle, name: &str) -> Result<LineHandle>;

    /// Write a change set into the working tree of `line`.
    async fn apply(&self, line: &LineHandle, changes: &ChangeSet) -> Result<()>;

    /// Persist the working tree of `line` durably.
    async fn snapshot(&self, line: &LineHandle, message: &str) -> Result<SnapshotRef>;

    /// Changes needed to go from the snapshot of `from` to the snapshot of `to`.
    async fn diff(&self, from: &LineHandle, to: &LineHandle) -> Result<ChangeSet>;

    /// Publish `line` as a reviewable change against `base`.
    async fn open_change_request(
        &self,
        base: &LineHandle,
        line: &LineHandle,
        title: &str,
        body: &str,
    ) -> Result<RequestRef>;
}
