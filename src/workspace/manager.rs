use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::platform::types::CreatePullRequest;
use crate::platform::ChangeRequestHost;
use crate::workspace::{
    git, ChangeSet, FileChange, LineHandle, RepositoryGateway, RequestRef, SnapshotRef,
};

/// Where and how finished lines are published.
struct Remote {
    host: Arc<dyn ChangeRequestHost>,
    name: String,
    token: String,
}

/// Git-backed repository gateway.
///
/// The primary working copy holds the base line. Every isolated line gets its
/// own branch and linked worktree under `worktrees_dir`, so solvers running at
/// the same time never touch each other's files.
pub struct GitGateway {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    remote: Option<Remote>,
}

impl GitGateway {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            repo_root: config.repo_path.clone(),
            worktrees_dir: config.worktrees_dir.clone(),
            remote: None,
        }
    }

    /// Publish finished lines by pushing to `remote` and opening a pull request on `host`.
    pub fn with_remote(
        mut self,
        host: Arc<dyn ChangeRequestHost>,
        remote: &str,
        token: &str,
    ) -> Self {
        self.remote = Some(Remote {
            host,
            name: remote.to_string(),
            token: token.to_string(),
        });
        self
    }

    fn worktree_path(&self, name: &str) -> PathBuf {
        self.worktrees_dir.join(name.replace('/', "__"))
    }

    /// Verify a path is within the workspace (path traversal protection).
    pub fn verify_path(workspace_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        if requested_path.is_absolute() {
            return Err(AppError::Workspace(format!(
                "Absolute paths are not allowed: {}",
                requested_path.display()
            )));
        }

        let full_path = workspace_root.join(requested_path);

        // Canonicalize to resolve .. and symlinks
        // If the file doesn't exist yet, canonicalize the parent
        let canonical = if full_path.exists() {
            full_path
                .canonicalize()
                .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?
        } else {
            let parent = full_path
                .parent()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;

            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;
            }

            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

            let file_name = full_path
                .file_name()
                .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?;

            canonical_parent.join(file_name)
        };

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        if canonical
            .strip_prefix(&canonical_root)
            .map(|rel| rel.starts_with(".git"))
            .unwrap_or(false)
        {
            return Err(AppError::Workspace(format!(
                "Refusing to touch git metadata: {}",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }

    /// Resolve `requested` like `verify_path`, but without following a
    /// symlink in the last component.
    pub(crate) fn entry_path(workspace_root: &Path, requested: &Path) -> Result<PathBuf> {
        let name = requested.file_name().ok_or_else(|| {
            AppError::Workspace(format!("Invalid file path: {}", requested.display()))
        })?;
        if name == ".git" {
            return Err(AppError::Workspace(format!(
                "Refusing to touch git metadata: {}",
                requested.display()
            )));
        }

        let parent = Self::verify_path(
            workspace_root,
            requested.parent().unwrap_or_else(|| Path::new("")),
        )?;
        Ok(parent.join(name))
    }
}

/// Remove whatever sits at `entry`. Symlinks are always removed so a write
/// never lands on their target; regular files only when `files` is set.
async fn remove_entry(entry: &Path, path: &str, files: bool) -> Result<()> {
    let Ok(meta) = tokio::fs::symlink_metadata(entry).await else {
        return Ok(());
    };
    if meta.is_dir() {
        return Err(AppError::Workspace(format!("{path} is a directory")));
    }
    if meta.file_type().is_symlink() || files {
        tokio::fs::remove_file(entry)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to remove {path}: {e}")))?;
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) async fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    let mode = permissions.mode();
    let mode = if executable {
        mode | 0o111
    } else {
        mode & !0o111
    };
    permissions.set_mode(mode);
    tokio::fs::set_permissions(path, permissions).await
}

#[cfg(not(unix))]
pub(crate) async fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn create_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are only supported on unix",
    ))
}

#[async_trait]
impl RepositoryGateway for GitGateway {
    async fn current_line(&self) -> Result<LineHandle> {
        let name = git::current_branch(&self.repo_root).await?;
        Ok(LineHandle {
            name,
            path: self.repo_root.clone(),
        })
    }

    async fn switch(&self, line: &LineHandle) -> Result<()> {
        if line.path != self.repo_root {
            return Err(AppError::Workspace(format!(
                "{} is checked out in its own worktree at {}",
                line.name,
                line.path.display()
            )));
        }
        git::checkout(&self.repo_root, &line.name).await
    }

    async fn create_isolated_line(&self, base: &LineHandle, name: &str) -> Result<LineHandle> {
        let path = self.worktree_path(name);
        if path.exists() {
            return Err(AppError::Workspace(format!(
                "Worktree directory already exists: {}",
                path.display()
            )));
        }
        tokio::fs::create_dir_all(&self.worktrees_dir)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to create worktrees dir: {e}")))?;

        git::add_worktree(&self.repo_root, &base.name, name, &path).await?;

        tracing::info!(line = name, base = %base.name, path = %path.display(), "Created isolated line");

        Ok(LineHandle {
            name: name.to_string(),
            path,
        })
    }

    async fn apply(&self, line: &LineHandle, changes: &ChangeSet) -> Result<()> {
        for (path, change) in &changes.files {
            let entry = Self::entry_path(&line.path, Path::new(path))?;
            let parent = entry.parent().filter(|_| change != &FileChange::Delete);
            if let Some(parent) = parent {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Workspace(format!("Failed to create directory for {path}: {e}"))
                })?;
            }
            match change {
                FileChange::Write {
                    content,
                    executable,
                } => {
                    remove_entry(&entry, path, false).await?;
                    tokio::fs::write(&entry, content).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to write {path}: {e}"))
                    })?;
                    set_executable(&entry, *executable).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to set mode of {path}: {e}"))
                    })?;
                }
                FileChange::Symlink { target } => {
                    remove_entry(&entry, path, true).await?;
                    create_symlink(target, &entry).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to link {path}: {e}"))
                    })?;
                }
                FileChange::Delete => remove_entry(&entry, path, true).await?,
            }
        }
        Ok(())
    }

    async fn snapshot(&self, line: &LineHandle, message: &str) -> Result<SnapshotRef> {
        if !git::has_changes(&line.path).await? {
            tracing::info!(line = %line.name, "No changes to commit");
            return Ok(SnapshotRef(git::head_oid(&line.path).await?));
        }

        git::add_all(&line.path).await?;
        let oid = git::commit(&line.path, message).await?;
        Ok(SnapshotRef(oid))
    }

    async fn diff(&self, from: &LineHandle, to: &LineHandle) -> Result<ChangeSet> {
        git::diff_branches(&self.repo_root, &from.name, &to.name).await
    }

    async fn open_change_request(
        &self,
        base: &LineHandle,
        line: &LineHandle,
        title: &str,
        body: &str,
    ) -> Result<RequestRef> {
        let Some(remote) = &self.remote else {
            tracing::info!(line = %line.name, "No remote configured; leaving change on local branch");
            return Ok(RequestRef::LocalBranch {
                branch: line.name.clone(),
            });
        };

        git::push(&self.repo_root, &remote.name, &line.name, &remote.token).await?;

        let pr = remote
            .host
            .create_pull_request(&CreatePullRequest {
                title: title.to_string(),
                body: body.to_string(),
                head_branch: line.name.clone(),
                base_branch: base.name.clone(),
            })
            .await?;

        Ok(RequestRef::PullRequest {
            number: pr.number,
            url: pr.url,
        })
    }
}
