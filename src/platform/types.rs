use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A unit of work as fetched from the task source. Never re-fetched within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A GitHub issue reference parsed from a task identifier.
///
/// Accepts `42`, `#42` or `owner/repo#42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub repo: Option<String>,
    pub number: u64,
}

impl IssueRef {
    pub fn parse(task_id: &str) -> Result<Self> {
        let trimmed = task_id.trim();
        let (repo, number) = match trimmed.rsplit_once('#') {
            Some((repo, number)) if !repo.is_empty() => {
                if repo.split_once('/').is_none() {
                    return Err(AppError::TaskNotFound(format!(
                        "{task_id} (expected owner/repo#number)"
                    )));
                }
                (Some(repo.to_string()), number)
            }
            Some((_, number)) => (None, number),
            None => (None, trimmed),
        };

        let number = number
            .parse::<u64>()
            .map_err(|_| AppError::TaskNotFound(format!("{task_id} (not an issue number)")))?;

        Ok(Self { repo, number })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}
