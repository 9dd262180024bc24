pub mod agent;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod platform;
pub mod workflow;
pub mod workspace;
