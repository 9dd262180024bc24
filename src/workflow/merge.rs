use std::collections::BTreeMap;

use crate::error::{AppError, Result};
use crate::workflow::types::{Approach, UnitSource, Verdict};
use crate::workspace::ChangeSet;

/// Turn a validated verdict into the change set for the final line.
///
/// Returns the change set plus, per file, the approach it was taken from.
/// Files that a `both` unit cannot reconcile are reported together as one
/// `MergeConflict`; nothing is dropped.
pub fn materialize(
    verdict: &Verdict,
    a: &Approach,
    b: &Approach,
) -> Result<(ChangeSet, BTreeMap<String, UnitSource>)> {
    let whole = |approach: &Approach| {
        let source = UnitSource::from(approach.solver);
        let sources: BTreeMap<String, UnitSource> = approach
            .changes
            .paths()
            .map(|p| (p.to_string(), source))
            .collect();
        (approach.changes.clone(), sources)
    };

    let units = match verdict {
        Verdict::UseApproachA => return Ok(whole(a)),
        Verdict::UseApproachB => return Ok(whole(b)),
        Verdict::Hybrid { units } => units,
    };

    let mut changes = ChangeSet::default();
    let mut sources = BTreeMap::new();
    let mut conflicts = Vec::new();

    for (path, source) in units {
        let from_a = a.changes.get(path);
        let from_b = b.changes.get(path);

        let (picked, actual_source) = match source {
            UnitSource::A => (from_a, UnitSource::A),
            UnitSource::B => (from_b, UnitSource::B),
            UnitSource::Both => match (from_a, from_b) {
                (Some(x), Some(y)) if x == y => (Some(x), UnitSource::Both),
                (Some(_), Some(_)) => {
                    conflicts.push(path.clone());
                    continue;
                }
                (Some(x), None) => (Some(x), UnitSource::A),
                (None, Some(y)) => (Some(y), UnitSource::B),
                (None, None) => (None, UnitSource::Both),
            },
        };

        let Some(change) = picked else {
            return Err(AppError::IncompleteDecision(vec![format!(
                "`{path}` is taken from {source}, which does not change it"
            )]));
        };

        changes.files.insert(path.clone(), change.clone());
        sources.insert(path.clone(), actual_source);
    }

    if !conflicts.is_empty() {
        return Err(AppError::MergeConflict(conflicts));
    }

    Ok((changes, sources))
}
