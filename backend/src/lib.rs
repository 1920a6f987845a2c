// Workflow automation engine for project, task and invoice events.

pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod repository;
pub mod services;
pub mod validation;
pub mod workflows;

pub use error::{EngineError, EngineResult};
pub use workflows::{ExecutionContext, WorkflowEngine, WorkflowTriggers};

#[cfg(test)]
mod tests;
