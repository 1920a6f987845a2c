//! Engine and dispatch errors
//!
//! Action failures never surface here: they are captured into FAILED
//! `ActionResult`s. These are the errors that stop an execution from starting
//! or from being evaluated.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::RepositoryError;
use crate::workflows::conditions::ConditionError;
use crate::workflows::models::WorkflowValidationError;
use crate::workflows::triggers::TriggerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("Workflow {0} is disabled")]
    WorkflowDisabled(Uuid),

    #[error("Concurrent execution limit of {limit} reached")]
    ConcurrencyLimitReached { limit: usize },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Invalid conditions: {0}")]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("Invalid workflow: {0}")]
    Validation(#[from] WorkflowValidationError),

    #[error("Trigger or condition evaluation panicked")]
    EvaluationPanicked,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            EngineError::WorkflowDisabled(_) => "WORKFLOW_DISABLED",
            EngineError::ConcurrencyLimitReached { .. } => "CONCURRENCY_LIMIT_REACHED",
            EngineError::Repository(_) => "REPOSITORY_ERROR",
            EngineError::Condition(_) => "INVALID_CONDITION",
            EngineError::Trigger(TriggerError::InvalidConfig { .. }) => "INVALID_TRIGGER_CONFIG",
            EngineError::Trigger(TriggerError::Lookup(_)) => "ENTITY_LOOKUP_FAILED",
            EngineError::Validation(_) => "INVALID_WORKFLOW",
            EngineError::EvaluationPanicked => "EVALUATION_PANICKED",
        }
    }

    /// Errors caused by the workflow definition itself; retrying cannot help
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EngineError::Condition(_)
                | EngineError::Trigger(TriggerError::InvalidConfig { .. })
                | EngineError::Validation(_)
                | EngineError::EvaluationPanicked
        )
    }

    /// Errors a later attempt may not hit
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Repository(_)
                | EngineError::Trigger(TriggerError::Lookup(_))
                | EngineError::ConcurrencyLimitReached { .. }
        )
    }
}

/// Serialisable form used in audit log data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Async dispatch queue is full")]
    QueueFull,

    #[error("Async dispatch queue is closed")]
    QueueClosed,

    #[error("Async dispatch is not configured")]
    NotConfigured,
}
