// Retry Sweeper Job - Restarts RETRYING executions whose delay has elapsed

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::scheduler::JobResult;
use crate::error::EngineError;
use crate::repository::WorkflowRepository;
use crate::workflows::engine::WorkflowEngine;

pub struct RetrySweeperJob {
    engine: Arc<WorkflowEngine>,
    repository: Arc<dyn WorkflowRepository>,
    batch_size: i64,
}

#[derive(Debug, Default)]
pub struct RetrySweepResult {
    pub executions_due: i32,
    pub retries_started: i32,
    /// Put back because the engine was saturated
    pub retries_deferred: i32,
    pub errors: Vec<String>,
}

impl RetrySweeperJob {
    pub fn new(engine: Arc<WorkflowEngine>, repository: Arc<dyn WorkflowRepository>, batch_size: i64) -> Self {
        Self {
            engine,
            repository,
            batch_size,
        }
    }

    pub async fn run(&self) -> JobResult<RetrySweepResult> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<RetrySweepResult> {
        let mut result = RetrySweepResult::default();

        let due = self
            .repository
            .executions_due_for_retry(now, self.batch_size)
            .await?;
        result.executions_due = due.len() as i32;

        if due.is_empty() {
            return Ok(result);
        }
        info!("Found {} execution(s) due for retry", due.len());

        for execution in &due {
            match self.engine.retry_execution(execution).await {
                Ok(outcome) => {
                    result.retries_started += 1;
                    info!(
                        execution_id = %execution.id,
                        "Retry of execution {} finished as {}",
                        execution.id, outcome.status
                    );
                }
                Err(EngineError::ConcurrencyLimitReached { limit }) => {
                    result.retries_deferred += 1;
                    warn!(
                        execution_id = %execution.id,
                        "Deferring retry, {} executions already in flight",
                        limit
                    );
                }
                Err(e) => {
                    error!(execution_id = %execution.id, "Retry failed to start: {}", e);
                    result.errors.push(format!("{}: {}", execution.id, e));
                }
            }
        }

        Ok(result)
    }
}
