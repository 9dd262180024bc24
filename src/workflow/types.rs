use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::workspace::{ChangeSet, LineHandle, RequestRef, SnapshotRef};

use super::state::Phase;

/// Identity of one of the competing solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverId {
    A,
    B,
}

impl SolverId {
    pub const ALL: [SolverId; 2] = [SolverId::A, SolverId::B];

    /// The identity that reviews this solver's work.
    pub fn other(self) -> SolverId {
        match self {
            SolverId::A => SolverId::B,
            SolverId::B => SolverId::A,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            SolverId::A => "a",
            SolverId::B => "b",
        }
    }

    pub fn implement_phase(self) -> Phase {
        match self {
            SolverId::A => Phase::ImplementA,
            SolverId::B => Phase::ImplementB,
        }
    }

    /// Phase in which this solver's approach is reviewed.
    pub fn reviewed_in_phase(self) -> Phase {
        match self {
            SolverId::A => Phase::ReviewBOfA,
            SolverId::B => Phase::ReviewAOfB,
        }
    }
}

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverId::A => write!(f, "A"),
            SolverId::B => write!(f, "B"),
        }
    }
}

/// Identifier of one workflow run; doubles as the artifact scope name, so
/// only name-safe characters are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn new(task_id: &str, started_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}",
            sanitize(task_id),
            started_at.format("%Y%m%dT%H%M%S%3fZ")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self> {
        let safe = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if s.is_empty() || !safe {
            return Err(AppError::Config(format!(
                "Invalid run id {s:?}: only letters, digits, '-' and '_' are allowed"
            )));
        }
        Ok(Self(s))
    }
}

impl std::str::FromStr for RunId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.to_string())
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce a task identifier to characters safe in branch and directory names.
pub fn sanitize(task_id: &str) -> String {
    let cleaned: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One solver's candidate implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approach {
    pub solver: SolverId,
    pub line: LineHandle,
    pub snapshot: Option<SnapshotRef>,
    pub changes: ChangeSet,
    pub rationale: String,
    /// Set when the solver failed and this approach stands in for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Approach {
    /// Empty approach recording why the solver produced nothing.
    pub fn degraded(solver: SolverId, line: LineHandle, error: &str) -> Self {
        Self {
            solver,
            line,
            snapshot: None,
            changes: ChangeSet::default(),
            rationale: format!("Solver {solver} failed and produced no approach: {error}"),
            error: Some(error.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// One solver's evaluation of the other solver's approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Whose approach is being reviewed.
    pub of: SolverId,
    pub author: SolverId,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Review {
    /// Reviews are always written by the other solver.
    pub fn new(of: SolverId, body: String) -> Self {
        Self {
            of,
            author: of.other(),
            body,
            error: None,
        }
    }

    pub fn degraded(of: SolverId, error: &str) -> Self {
        Self {
            of,
            author: of.other(),
            body: format!(
                "Solver {} could not review approach {of}: {error}",
                of.other()
            ),
            error: Some(error.to_string()),
        }
    }
}

/// Where one file of a hybrid decision is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSource {
    A,
    B,
    /// Both approaches' edits to this file; only valid when they agree or
    /// only one of them touches it.
    Both,
}

impl UnitSource {
    pub fn solver(self) -> Option<SolverId> {
        match self {
            UnitSource::A => Some(SolverId::A),
            UnitSource::B => Some(SolverId::B),
            UnitSource::Both => None,
        }
    }
}

impl From<SolverId> for UnitSource {
    fn from(solver: SolverId) -> Self {
        match solver {
            SolverId::A => UnitSource::A,
            SolverId::B => UnitSource::B,
        }
    }
}

impl fmt::Display for UnitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSource::A => write!(f, "A"),
            UnitSource::B => write!(f, "B"),
            UnitSource::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    UseApproachA,
    UseApproachB,
    /// Per-file selection; keys are repo-relative paths.
    Hybrid { units: BTreeMap<String, UnitSource> },
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::UseApproachA => write!(f, "use approach A"),
            Verdict::UseApproachB => write!(f, "use approach B"),
            Verdict::Hybrid { units } => write!(f, "hybrid of {} unit(s)", units.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub rationale: String,
    /// 1 for the first arbitration, 2 for the single retry.
    pub attempt: u32,
}

/// The merged change as materialized on the final line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalImplementation {
    pub line: LineHandle,
    pub snapshot: SnapshotRef,
    pub changes: ChangeSet,
    pub sources: BTreeMap<String, UnitSource>,
}

/// Terminal result of a run, reported at the process boundary.
#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    Submitted {
        run_id: RunId,
        request: RequestRef,
    },
    Aborted {
        run_id: RunId,
        phase: Phase,
        kind: &'static str,
        reason: String,
    },
}

impl WorkflowOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            WorkflowOutcome::Submitted { run_id, .. } | WorkflowOutcome::Aborted { run_id, .. } => {
                run_id
            }
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, WorkflowOutcome::Submitted { .. })
    }
}
