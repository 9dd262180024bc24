pub mod context;
pub mod decision;
pub mod merge;
pub mod orchestrator;
pub mod state;
pub mod submission;
pub mod types;

#[cfg(test)]
mod scenarios;

pub use orchestrator::{Orchestrator, WorkflowRun, WorkflowSettings};
