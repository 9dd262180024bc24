use crate::platform::types::Task;
use crate::workflow::types::{DecisionRecord, FinalImplementation, Review, RunId};

pub fn title(task: &Task) -> String {
    format!("{} ({})", task.title, task.id)
}

/// Description of the final change request.
///
/// Quotes the decision in full and both reviews, so the request can be
/// understood without access to the run's artifacts.
pub fn compose(
    run: &RunId,
    task: &Task,
    decision: &DecisionRecord,
    review_of_a: &Review,
    review_of_b: &Review,
    implementation: &FinalImplementation,
) -> String {
    let mut out = format!(
        "Resolves {}: {}\n\n## Decision\n\n**Verdict:** {} (attempt {})\n\n{}\n\n",
        task.id,
        task.title,
        decision.verdict,
        decision.attempt,
        decision.rationale.trim()
    );

    out.push_str("| File | Taken from |\n|---|---|\n");
    for (path, source) in &implementation.sources {
        out.push_str(&format!("| `{path}` | {source} |\n"));
    }

    for review in [review_of_a, review_of_b] {
        out.push_str(&format!(
            "\n## Review of approach {} (by solver {})\n\n{}\n",
            review.of,
            review.author,
            review.body.trim()
        ));
    }

    out.push_str(&format!(
        "\n---\nRun `{run}`, final line `{}` at {}\n",
        implementation.line.name, implementation.snapshot
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{SolverId, UnitSource, Verdict};
    use crate::workspace::{ChangeSet, LineHandle, SnapshotRef};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_body_references_decision_and_reviews() {
        let task = Task {
            id: "T1".to_string(),
            title: "Fix file".to_string(),
            body: String::new(),
            fetched_at: Utc::now(),
        };
        let decision = DecisionRecord {
            verdict: Verdict::Hybrid {
                units: BTreeMap::from([("file.txt".to_string(), UnitSource::B)]),
            },
            rationale: "B handles the empty case".to_string(),
            attempt: 1,
        };
        let implementation = FinalImplementation {
            line: LineHandle {
                name: "duet/final/T1/x".to_string(),
                path: PathBuf::from("/tmp"),
            },
            snapshot: SnapshotRef("abc123".to_string()),
            changes: ChangeSet::default(),
            sources: BTreeMap::from([("file.txt".to_string(), UnitSource::B)]),
        };

        let body = compose(
            &"T1-run".parse::<RunId>().unwrap(),
            &task,
            &decision,
            &Review::new(SolverId::A, "A misses the empty case".to_string()),
            &Review::new(SolverId::B, "B looks right".to_string()),
            &implementation,
        );

        assert!(body.contains("hybrid of 1 unit(s)"));
        assert!(body.contains("B handles the empty case"));
        assert!(body.contains("| `file.txt` | B |"));
        assert!(body.contains("A misses the empty case"));
        assert!(body.contains("B looks right"));
        assert!(body.contains("Run `T1-run`"));
        assert_eq!(title(&task), "Fix file (T1)");
    }
}
