pub mod capability;
pub mod claude;
pub mod engine;
pub mod prompt;
pub mod tools;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::workflow::types::SolverId;
use crate::workspace::ChangeSet;

pub use capability::ClaudeAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Solver,
    Reviewer,
    Arbiter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Solver => write!(f, "solver"),
            Role::Reviewer => write!(f, "reviewer"),
            Role::Arbiter => write!(f, "arbiter"),
        }
    }
}

/// Who is speaking. Solvers keep their identity when they switch to reviewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Solver(SolverId),
    Arbiter,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Solver(id) => write!(f, "solver {id}"),
            Identity::Arbiter => write!(f, "arbiter"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: Role,
    pub identity: Identity,
    /// Structured text describing the job for this invocation.
    pub context: String,
    /// Working tree of the line the agent may look at (and, as a solver, edit).
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub narrative: String,
    /// Changes returned instead of (or in addition to) edits made in `working_dir`.
    pub files: ChangeSet,
}

impl AgentResponse {
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            narrative: text.into(),
            files: ChangeSet::default(),
        }
    }
}

/// A solving, reviewing or deciding entity.
///
/// Failures should surface as `Capability` errors; the orchestrator applies
/// its own timeout around every call.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse>;
}
