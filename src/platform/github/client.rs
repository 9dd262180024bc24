use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{ChangeRequestHost, TaskSource};

use super::mapper;

/// GitHub issues as the task source, GitHub pull requests as the change-request host.
pub struct GitHubPlatform {
    client: Octocrab,
    repo: String,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            repo: config.repo.clone(),
        })
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        repo_full_name
            .split_once('/')
            .ok_or_else(|| AppError::GitHubApi(format!("Invalid repo name: {repo_full_name}")))
    }

    async fn get_issue(&self, repo_full_name: &str, issue_number: u64) -> Result<Issue> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let issue = match self.client.issues(owner, repo).get(issue_number).await {
            Ok(issue) => issue,
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                return Err(AppError::TaskNotFound(format!(
                    "{repo_full_name}#{issue_number}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        // Pull requests share the issue number space; they are not tasks.
        if issue.pull_request.is_some() {
            return Err(AppError::TaskNotFound(format!(
                "{repo_full_name}#{issue_number} is a pull request"
            )));
        }

        let comments_page = self
            .client
            .issues(owner, repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;

        Ok(mapper::map_issue(&issue, comments_page.items))
    }
}

#[async_trait]
impl TaskSource for GitHubPlatform {
    async fn fetch(&self, task_id: &str) -> Result<Task> {
        let issue_ref = IssueRef::parse(task_id)?;
        let repo = issue_ref.repo.as_deref().unwrap_or(&self.repo);

        tracing::info!(repo = repo, issue = issue_ref.number, "Fetching issue");
        let issue = self.get_issue(repo, issue_ref.number).await?;

        Ok(mapper::issue_to_task(task_id, issue))
    }
}

#[async_trait]
impl ChangeRequestHost for GitHubPlatform {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let (owner, repo) = Self::parse_repo(&self.repo)?;

        let created = self
            .client
            .pulls(owner, repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        tracing::info!(pr = created.number, head = %pr.head_branch, "Opened pull request");

        Ok(mapper::map_pull_request(created))
    }
}
