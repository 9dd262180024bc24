pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::workflow::types::SolverId;

pub use store::ArtifactStore;

/// The fixed set of documents a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArtifactKind {
    Task,
    Approach(SolverId),
    Review { of: SolverId },
    Decision,
    FinalImplementation,
    Submission,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 8] = [
        ArtifactKind::Task,
        ArtifactKind::Approach(SolverId::A),
        ArtifactKind::Approach(SolverId::B),
        ArtifactKind::Review { of: SolverId::A },
        ArtifactKind::Review { of: SolverId::B },
        ArtifactKind::Decision,
        ArtifactKind::FinalImplementation,
        ArtifactKind::Submission,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ArtifactKind::Task => "task",
            ArtifactKind::Approach(SolverId::A) => "approach-a",
            ArtifactKind::Approach(SolverId::B) => "approach-b",
            ArtifactKind::Review { of: SolverId::A } => "review-of-a",
            ArtifactKind::Review { of: SolverId::B } => "review-of-b",
            ArtifactKind::Decision => "decision",
            ArtifactKind::FinalImplementation => "final-implementation",
            ArtifactKind::Submission => "submission",
        }
    }

    /// File extension of the stored content.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Submission => "md",
            _ => "json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ArtifactKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == s)
            .ok_or_else(|| AppError::ArtifactNotFound(format!("unknown artifact kind: {s}")))
    }
}

impl TryFrom<String> for ArtifactKind {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.slug().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Partial or failed phase output. Never served by `get`.
    Draft,
    /// Validated phase output. Write-once.
    Finalized,
}

/// Metadata stored next to every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub status: ArtifactStatus,
    pub sha256: String,
    pub bytes: usize,
    pub written_at: DateTime<Utc>,
    /// Number of writes to this key, drafts included.
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ArtifactRecord {
    pub fn is_finalized(&self) -> bool {
        self.status == ArtifactStatus::Finalized
    }
}

/// Permission to replace a finalized decision.
///
/// Only the orchestrator can mint one, and only for the single Decide retry.
#[derive(Debug)]
pub struct OverwriteToken {
    _private: (),
}

impl OverwriteToken {
    pub(crate) fn for_decision_retry() -> Self {
        Self { _private: () }
    }
}
