// Job Scheduler - Central scheduler for the engine's background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::RetrySweeperJob;
use crate::config::EngineConfig;
use crate::repository::{RepositoryError, WorkflowRepository};
use crate::workflows::context::ExecutionContext;
use crate::workflows::dispatch::WorkflowTriggers;
use crate::workflows::triggers::TriggerType;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

/// Cron expression (with seconds) for each schedule trigger
pub const SCHEDULES: [(TriggerType, &str); 4] = [
    (TriggerType::ScheduleHourly, "0 0 * * * *"),
    (TriggerType::ScheduleDaily, "0 0 8 * * *"),
    (TriggerType::ScheduleWeekly, "0 0 8 * * Mon"),
    (TriggerType::ScheduleMonthly, "0 0 8 1 * *"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

impl JobExecutionLog {
    fn finished(job_name: &str, started_at: DateTime<Utc>, items_processed: i32, errors: Vec<String>) -> Self {
        let completed_at = Utc::now();
        let status = match (items_processed, errors.is_empty()) {
            (_, true) => JobStatus::Completed,
            (0, false) => JobStatus::Failed,
            _ => JobStatus::PartialFailure,
        };

        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            started_at,
            completed_at: Some(completed_at),
            status,
            items_processed,
            errors,
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
        }
    }
}

type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

async fn push_log(logs: &ExecutionLogs, log: JobExecutionLog) {
    let mut logs = logs.write().await;
    logs.push(log);
    // Keep only the most recent entries
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    triggers: WorkflowTriggers,
    repository: Arc<dyn WorkflowRepository>,
    config: EngineConfig,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(
        triggers: WorkflowTriggers,
        repository: Arc<dyn WorkflowRepository>,
        config: EngineConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            triggers,
            repository,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_retry_sweeper().await?;
        for (trigger_type, cron_expr) in SCHEDULES {
            self.schedule_trigger(trigger_type, cron_expr).await?;
        }

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    fn retry_sweeper(&self) -> RetrySweeperJob {
        RetrySweeperJob::new(
            self.triggers.engine().clone(),
            self.repository.clone(),
            self.config.retry_batch_size,
        )
    }

    async fn schedule_retry_sweeper(&self) -> JobResult<()> {
        let interval = self.config.retry_poll_interval_secs.max(1);
        let sweeper = Arc::new(self.retry_sweeper());
        let logs = self.execution_logs.clone();

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let sweeper = sweeper.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();

                match sweeper.run().await {
                    Ok(result) => {
                        if result.executions_due == 0 {
                            return;
                        }
                        info!(
                            "Retry sweep completed: {} due, {} started, {} deferred",
                            result.executions_due, result.retries_started, result.retries_deferred
                        );
                        push_log(
                            &logs,
                            JobExecutionLog::finished("Retry Sweeper", started_at, result.retries_started, result.errors),
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("Retry sweep failed: {}", e);
                        push_log(
                            &logs,
                            JobExecutionLog::finished("Retry Sweeper", started_at, 0, vec![e.to_string()]),
                        )
                        .await;
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled retry sweeper to run every {} seconds", interval);

        Ok(())
    }

    async fn schedule_trigger(&self, trigger_type: TriggerType, cron_expr: &'static str) -> JobResult<()> {
        let triggers = self.triggers.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let triggers = triggers.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                info!("Dispatching {} workflows", trigger_type);

                let log = match dispatch_schedule(&triggers, trigger_type) {
                    Ok(()) => JobExecutionLog::finished(trigger_type.as_str(), started_at, 1, Vec::new()),
                    Err(e) => {
                        error!("{} dispatch failed: {}", trigger_type, e);
                        JobExecutionLog::finished(trigger_type.as_str(), started_at, 0, vec![e.to_string()])
                    }
                };
                push_log(&logs, log).await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} with cron '{}'", trigger_type, cron_expr);

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    /// Run a job immediately: `retry_sweeper` or a schedule trigger name such as `SCHEDULE_DAILY`
    pub async fn run_job_now(&self, job_name: &str) -> JobResult<()> {
        let started_at = Utc::now();

        if job_name == "retry_sweeper" {
            let result = self.retry_sweeper().run().await?;
            push_log(
                &self.execution_logs,
                JobExecutionLog::finished("Retry Sweeper", started_at, result.retries_started, result.errors),
            )
            .await;
            return Ok(());
        }

        let trigger_type = job_name
            .parse::<TriggerType>()
            .ok()
            .filter(TriggerType::is_schedule)
            .ok_or_else(|| JobError::ConfigError(format!("Unknown job: {}", job_name)))?;

        dispatch_schedule(&self.triggers, trigger_type)?;
        push_log(
            &self.execution_logs,
            JobExecutionLog::finished(trigger_type.as_str(), started_at, 1, Vec::new()),
        )
        .await;
        Ok(())
    }
}

fn dispatch_schedule(triggers: &WorkflowTriggers, trigger_type: TriggerType) -> JobResult<()> {
    triggers
        .try_trigger_workflows_async(trigger_type, ExecutionContext::scheduled(trigger_type.as_str()))
        .map_err(|e| JobError::ExecutionError(e.to_string()))
}
