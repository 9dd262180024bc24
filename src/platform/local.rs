use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::platform::types::Task;
use crate::platform::TaskSource;

/// Tasks stored as markdown files: `<dir>/<id>.md`.
///
/// The first `# ` heading is the title; everything after it is the body.
/// Files without a heading use the identifier as the title.
pub struct LocalTaskSource {
    dir: PathBuf,
}

impl LocalTaskSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !task_id.starts_with('.')
}

fn split_title(task_id: &str, contents: &str) -> (String, String) {
    let mut lines = contents.lines();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(title) = line.strip_prefix("# ") {
            let body = lines.collect::<Vec<_>>().join("\n");
            return (title.trim().to_string(), body.trim().to_string());
        }
        break;
    }
    (task_id.to_string(), contents.trim().to_string())
}

#[async_trait]
impl TaskSource for LocalTaskSource {
    async fn fetch(&self, task_id: &str) -> Result<Task> {
        if !valid_task_id(task_id) {
            return Err(AppError::TaskNotFound(format!(
                "{task_id} (local task ids may only contain letters, digits, '-', '_' and '.')"
            )));
        }

        let path = self.dir.join(format!("{task_id}.md"));
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::TaskNotFound(format!(
                    "{task_id} (no file at {})",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let (title, body) = split_title(task_id, &contents);
        Ok(Task {
            id: task_id.to_string(),
            title,
            body,
            fetched_at: Utc::now(),
        })
    }
}
