use std::path::Path;

use git2::{
    BranchType, Cred, Delta, FileMode, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    Signature, WorktreeAddOptions,
};

use crate::error::{AppError, Result};
use crate::workspace::{ChangeSet, FileChange};

/// Validate a branch name before handing it to git.
/// Rejects names starting with `-` as defence against option injection.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Git("Branch name is empty".to_string()));
    }
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if name.contains("..") || name.contains(char::is_whitespace) || name.ends_with('/') {
        return Err(AppError::Git(format!("Invalid branch name: {name}")));
    }
    Ok(())
}

/// Build `PushOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Name of the branch HEAD points at.
pub async fn current_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(AppError::Git("HEAD is detached".to_string()));
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| AppError::Git("HEAD branch name is not valid UTF-8".to_string()))
    })
    .await
    .map_err(|e| AppError::Git(format!("Current-branch task panicked: {e}")))?
}

/// Checkout an existing branch in `dir`.
pub async fn checkout(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Checkout task panicked: {e}")))?
}

/// Create `branch_name` at the tip of `base_branch` and check it out in a new
/// linked worktree at `worktree_path`. The primary working copy is untouched.
pub async fn add_worktree(
    repo_dir: &Path,
    base_branch: &str,
    branch_name: &str,
    worktree_path: &Path,
) -> Result<()> {
    validate_branch_name(base_branch)?;
    validate_branch_name(branch_name)?;

    let repo_dir = repo_dir.to_path_buf();
    let base_branch = base_branch.to_string();
    let branch_name = branch_name.to_string();
    let worktree_path = worktree_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_dir)?;
        let base = repo.find_branch(&base_branch, BranchType::Local)?;
        let commit = base.get().peel_to_commit()?;

        // Refuses to clobber an existing branch, which keeps line names collision-free.
        let branch = repo.branch(&branch_name, &commit, false)?;
        let reference = branch.into_reference();

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        let worktree_name = branch_name.replace('/', "-");
        repo.worktree(&worktree_name, &worktree_path, Some(&opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-worktree task panicked: {e}")))?
}

/// Stage every change in the working tree, including deletions.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit the index on top of HEAD and return the new commit id.
pub async fn commit(dir: &Path, message: &str) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = Signature::now("Duet Bot", "duet-bot@users.noreply.github.com")?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let head = repo.head()?;
        let parent = head.peel_to_commit()?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(oid.to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Commit id HEAD currently points at.
pub async fn head_oid(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Head-oid task panicked: {e}")))?
}

/// Check if there are any staged or unstaged changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

/// File-level diff between the tips of two local branches.
pub async fn diff_branches(repo_dir: &Path, from: &str, to: &str) -> Result<ChangeSet> {
    validate_branch_name(from)?;
    validate_branch_name(to)?;

    let repo_dir = repo_dir.to_path_buf();
    let from = from.to_string();
    let to = to.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_dir)?;
        let from_tree = repo
            .find_branch(&from, BranchType::Local)?
            .get()
            .peel_to_tree()?;
        let to_tree = repo
            .find_branch(&to, BranchType::Local)?
            .get()
            .peel_to_tree()?;

        let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let mut changes = ChangeSet::default();

        for delta in diff.deltas() {
            if delta.status() == Delta::Deleted {
                if let Some(path) = delta.old_file().path() {
                    changes.delete(path.to_string_lossy().replace('\\', "/"));
                }
                continue;
            }

            let new_file = delta.new_file();
            let Some(path) = new_file.path() else {
                continue;
            };
            let path = path.to_string_lossy().replace('\\', "/");

            let change = match new_file.mode() {
                FileMode::Commit => {
                    tracing::warn!(path = %path, "Skipping submodule in diff");
                    continue;
                }
                FileMode::Link => {
                    let blob = repo.find_blob(new_file.id())?;
                    let target = std::str::from_utf8(blob.content()).map_err(|_| {
                        AppError::Git(format!("Symlink target of {path} is not valid UTF-8"))
                    })?;
                    FileChange::Symlink {
                        target: target.to_string(),
                    }
                }
                mode => {
                    let blob = repo.find_blob(new_file.id())?;
                    FileChange::Write {
                        content: blob.content().to_vec(),
                        executable: matches!(mode, FileMode::BlobExecutable),
                    }
                }
            };
            changes.insert(path, change);
        }

        Ok(changes)
    })
    .await
    .map_err(|e| AppError::Git(format!("Diff task panicked: {e}")))?
}

/// Push a local branch to `remote`.
pub async fn push(dir: &Path, remote: &str, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let remote = remote.to_string();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote(&remote)?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    use git2::{Repository, Signature};

    /// Initialise a repository with one committed file and return its branch name.
    pub fn init_repo_with_commit(dir: &Path) -> String {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("README.md"), "hello\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        let head = repo.head().unwrap();
        head.shorthand().unwrap().to_string()
    }
}
