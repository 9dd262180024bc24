//! Phase state machine for a workflow run.
//!
//! Phases follow a strict total order. Every transition is checked against
//! the legal edge table and appended to an audit log that is persisted next
//! to the run's artifacts, so the history of a run can always be replayed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    ImplementA,
    ImplementB,
    ReviewBOfA,
    ReviewAOfB,
    Decide,
    FinalImplement,
    Submit,
    /// Terminal: change request opened.
    Submitted,
    /// Terminal: unrecoverable failure.
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted | Self::Aborted)
    }

    /// Successor in the happy path.
    pub fn next(self) -> Option<Phase> {
        use Phase::*;
        match self {
            Setup => Some(ImplementA),
            ImplementA => Some(ImplementB),
            ImplementB => Some(ReviewBOfA),
            ReviewBOfA => Some(ReviewAOfB),
            ReviewAOfB => Some(Decide),
            Decide => Some(FinalImplement),
            FinalImplement => Some(Submit),
            Submit => Some(Submitted),
            Submitted | Aborted => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "Setup",
            Self::ImplementA => "ImplementA",
            Self::ImplementB => "ImplementB",
            Self::ReviewBOfA => "ReviewBOfA",
            Self::ReviewAOfB => "ReviewAOfB",
            Self::Decide => "Decide",
            Self::FinalImplement => "FinalImplement",
            Self::Submit => "Submit",
            Self::Submitted => "Submitted",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Legal edges:
/// ```text
/// each phase → its successor
/// Decide → Decide            (validation retry)
/// FinalImplement → Decide    (re-decision after a merge conflict)
/// any non-terminal → Aborted
/// ```
/// The two backward edges share one retry budget, enforced by `StateMachine`.
fn is_legal_transition(from: Phase, to: Phase) -> bool {
    if to == Phase::Aborted {
        return !from.is_terminal();
    }
    from.next() == Some(to)
        || matches!(
            (from, to),
            (Phase::Decide, Phase::Decide) | (Phase::FinalImplement, Phase::Decide)
        )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// `None` for the record created with the machine.
    pub from: Option<Phase>,
    pub to: Phase,
    pub at: DateTime<Utc>,
    /// What the phase being left produced, or why the run stopped.
    pub outcome: String,
}

#[derive(Debug)]
pub struct StateMachine {
    current: Phase,
    decide_retries_left: u32,
    log: Vec<TransitionRecord>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Setup,
            decide_retries_left: 1,
            log: vec![TransitionRecord {
                from: None,
                to: Phase::Setup,
                at: Utc::now(),
                outcome: "run created".to_string(),
            }],
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn log(&self) -> &[TransitionRecord] {
        &self.log
    }

    /// Whether the single Decide retry has not been used yet.
    pub fn can_redecide(&self) -> bool {
        self.decide_retries_left > 0
    }

    pub fn advance(&mut self, to: Phase, outcome: impl Into<String>) -> Result<()> {
        let from = self.current;
        if !is_legal_transition(from, to) {
            return Err(AppError::IllegalTransition(format!("{from} → {to}")));
        }

        if to == Phase::Decide && from != Phase::ReviewAOfB {
            if self.decide_retries_left == 0 {
                return Err(AppError::IllegalTransition(format!(
                    "{from} → {to} (decide retry already used)"
                )));
            }
            self.decide_retries_left -= 1;
        }

        let outcome = outcome.into();
        tracing::info!(from = %from, to = %to, outcome = %outcome, "Phase transition");

        self.log.push(TransitionRecord {
            from: Some(from),
            to,
            at: Utc::now(),
            outcome,
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Aborted` from wherever the run is. No-op once terminal.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.current.is_terminal() {
            return;
        }
        // Always legal from a non-terminal state.
        let _ = self.advance(Phase::Aborted, reason);
    }
}
