// Background Jobs
//
// Scheduled work for the workflow engine: the retry sweep and the
// SCHEDULE_* triggers. Jobs run on tokio-cron-scheduler.

pub mod retry_sweeper;
pub mod scheduler;

pub use retry_sweeper::{RetrySweepResult, RetrySweeperJob};
pub use scheduler::{JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus};
