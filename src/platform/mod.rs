pub mod github;
pub mod local;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Looks up the unit of work a run is about.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch a task by identifier. Unknown identifiers fail with `TaskNotFound`.
    async fn fetch(&self, task_id: &str) -> Result<Task>;
}

/// Hosting service that turns a pushed branch into a reviewable change.
#[async_trait]
pub trait ChangeRequestHost: Send + Sync {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;
}
