//! Job descriptions handed to the agent for each role.

use crate::platform::types::Task;
use crate::workflow::types::{Approach, Review};

/// Bytes of each changed file shown to reviewers and the arbiter.
const FILE_PREVIEW_BYTES: usize = 16 * 1024;

fn task_section(task: &Task) -> String {
    format!("# Task {}: {}\n\n{}", task.id, task.title, task.body)
}

fn approach_section(approach: &Approach) -> String {
    let mut out = format!("## Approach {}\n\n", approach.solver);
    if let Some(error) = &approach.error {
        out.push_str(&format!("(Solver {} failed: {error})\n\n", approach.solver));
    }
    out.push_str(&format!(
        "### Rationale\n\n{}\n\n### Changes\n\n{}",
        approach.rationale.trim(),
        approach.changes.render(FILE_PREVIEW_BYTES)
    ));
    out
}

pub fn solver_context(task: &Task) -> String {
    format!(
        "{}\n\nImplement this task in your working tree. Start by exploring the repository structure.",
        task_section(task)
    )
}

pub fn review_context(task: &Task, approach: &Approach) -> String {
    let note = if approach.changes.is_empty() {
        "\n\nThis approach changes nothing. Review whether that is acceptable for the task."
    } else {
        ""
    };
    format!(
        "{}\n\n{}{note}\n\nWrite your review of approach {}.",
        task_section(task),
        approach_section(approach),
        approach.solver
    )
}

/// Everything the arbiter sees: the task, both approaches and both reviews,
/// plus feedback when a previous decision was rejected.
pub fn arbiter_context(
    task: &Task,
    a: &Approach,
    b: &Approach,
    review_of_a: &Review,
    review_of_b: &Review,
    feedback: Option<&str>,
) -> String {
    let review = |r: &Review| {
        format!(
            "## Review of approach {} (by solver {})\n\n{}",
            r.of,
            r.author,
            r.body.trim()
        )
    };

    let mut out = format!(
        "{}\n\n{}\n\n{}\n\n{}\n\n{}",
        task_section(task),
        approach_section(a),
        approach_section(b),
        review(review_of_a),
        review(review_of_b),
    );

    let changed: Vec<&str> = {
        let mut paths: Vec<&str> = a.changes.paths().chain(b.changes.paths()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    };
    out.push_str("\n\n## Files changed by either approach\n\n");
    for path in &changed {
        let by: Vec<String> = [a, b]
            .iter()
            .filter(|approach| approach.changes.get(path).is_some())
            .map(|approach| approach.solver.to_string())
            .collect();
        out.push_str(&format!("- `{path}` ({})\n", by.join(", ")));
    }

    if let Some(feedback) = feedback {
        out.push_str(&format!(
            "\n## Your previous decision was rejected\n\n{feedback}\n\nDecide again."
        ));
    } else {
        out.push_str("\nDecide which approach ships.");
    }
    out
}
