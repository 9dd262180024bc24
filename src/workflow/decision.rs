//! Parsing and validation of the arbiter's verdict.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::workflow::types::{Approach, DecisionRecord, SolverId, UnitSource, Verdict};

#[derive(Debug, Deserialize)]
struct RawDecision {
    verdict: String,
    #[serde(default)]
    units: BTreeMap<String, String>,
    #[serde(default)]
    rationale: String,
}

/// Pull the JSON object out of the arbiter's reply: the last ```json fence if
/// there is one, otherwise the outermost `{ ... }`.
fn extract_json(output: &str) -> Option<&str> {
    if let Some(start) = output.rfind("```json") {
        let rest = &output[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }

    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (start < end).then(|| &output[start..=end])
}

fn parse_source(value: &str) -> Option<UnitSource> {
    match value.trim().to_ascii_lowercase().as_str() {
        "a" | "approach_a" | "approach a" => Some(UnitSource::A),
        "b" | "approach_b" | "approach b" => Some(UnitSource::B),
        "both" => Some(UnitSource::Both),
        _ => None,
    }
}

/// Parse the arbiter output into a decision.
///
/// Malformed output is an `IncompleteDecision`, so it takes the same retry
/// path as a decision that fails validation.
pub fn parse(output: &str, attempt: u32) -> Result<DecisionRecord> {
    let json = extract_json(output).ok_or_else(|| {
        AppError::IncompleteDecision(vec!["no JSON decision object in arbiter output".to_string()])
    })?;

    let raw: RawDecision = serde_json::from_str(json).map_err(|e| {
        AppError::IncompleteDecision(vec![format!("decision JSON is malformed: {e}")])
    })?;

    let verdict = match raw.verdict.trim().to_ascii_lowercase().as_str() {
        "a" | "use_approach_a" => Verdict::UseApproachA,
        "b" | "use_approach_b" => Verdict::UseApproachB,
        "hybrid" => {
            let mut units = BTreeMap::new();
            let mut problems = Vec::new();
            for (path, source) in raw.units {
                match parse_source(&source) {
                    Some(source) => {
                        units.insert(path, source);
                    }
                    None => problems.push(format!(
                        "`{path}` has unknown source {source:?} (expected \"a\", \"b\" or \"both\")"
                    )),
                }
            }
            if !problems.is_empty() {
                return Err(AppError::IncompleteDecision(problems));
            }
            Verdict::Hybrid { units }
        }
        other => {
            return Err(AppError::IncompleteDecision(vec![format!(
                "verdict must be \"a\", \"b\" or \"hybrid\", got {other:?}"
            )]));
        }
    };

    let rationale = if raw.rationale.trim().is_empty() {
        // Fall back to the prose around the JSON block.
        output.replace(json, "").trim().to_string()
    } else {
        raw.rationale
    };

    Ok(DecisionRecord {
        verdict,
        rationale,
        attempt,
    })
}

/// Check a decision against the approaches it chooses between.
///
/// A pure selection must pick an approach that changes something. A hybrid
/// must assign every file changed by either approach, and may only take a file
/// from an approach that actually changes it.
pub fn validate(decision: &DecisionRecord, a: &Approach, b: &Approach) -> Result<()> {
    let approach = |solver: SolverId| if solver == SolverId::A { a } else { b };
    let mut problems = Vec::new();

    match &decision.verdict {
        Verdict::UseApproachA | Verdict::UseApproachB => {
            let chosen = if decision.verdict == Verdict::UseApproachA {
                SolverId::A
            } else {
                SolverId::B
            };
            if approach(chosen).changes.is_empty() {
                problems.push(format!("approach {chosen} has no changes to use"));
            }
        }
        Verdict::Hybrid { units } => {
            let changed: BTreeSet<&str> = a.changes.paths().chain(b.changes.paths()).collect();

            for (path, source) in units {
                if !changed.contains(path.as_str()) {
                    problems.push(format!("`{path}` is not changed by either approach"));
                    continue;
                }
                if let Some(solver) = source.solver() {
                    if approach(solver).changes.get(path).is_none() {
                        problems.push(format!(
                            "`{path}` is taken from approach {solver}, which does not change it"
                        ));
                    }
                }
            }

            for path in &changed {
                if !units.contains_key(*path) {
                    problems.push(format!("`{path}` is not assigned to either approach"));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::IncompleteDecision(problems))
    }
}
