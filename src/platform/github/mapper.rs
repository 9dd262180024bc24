use chrono::Utc;

use crate::platform::types;

/// Map octocrab Issue to our platform Issue type.
pub fn map_issue(
    issue: &octocrab::models::issues::Issue,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        comments: comments.into_iter().map(map_comment).collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}

/// Fold an issue and its discussion into a task snapshot.
pub fn issue_to_task(task_id: &str, issue: types::Issue) -> types::Task {
    let mut body = issue.body;
    if !issue.comments.is_empty() {
        let comments = issue
            .comments
            .iter()
            .map(|c| format!("**@{}:** {}", c.author, c.body))
            .collect::<Vec<_>>()
            .join("\n\n");
        body = format!("{body}\n\n## Discussion\n\n{comments}");
    }

    types::Task {
        id: task_id.to_string(),
        title: issue.title,
        body,
        fetched_at: Utc::now(),
    }
}

pub fn map_pull_request(pr: octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        url: pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}
