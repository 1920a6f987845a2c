use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autoflow_backend::config::Config;
use autoflow_backend::database;
use autoflow_backend::jobs::JobScheduler;
use autoflow_backend::repository::{PgWorkflowRepository, WorkflowRepository};
use autoflow_backend::services::{
    ChatService, DeliveryChannel, EmailService, PgDomainStore, ReqwestDispatcher, SmsService,
    UnconfiguredChannel,
};
use autoflow_backend::workflows::{ActionCollaborators, ActionExecutor, WorkflowEngine, WorkflowTriggers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let email: Arc<dyn DeliveryChannel> = if config.smtp.is_configured() {
        match EmailService::new(&config.smtp) {
            Ok(service) => Arc::new(service),
            Err(e) => {
                warn!("SMTP transport could not be built, email actions will fail: {}", e);
                Arc::new(UnconfiguredChannel::new("email"))
            }
        }
    } else {
        Arc::new(UnconfiguredChannel::new("email"))
    };

    let chat: Arc<dyn DeliveryChannel> = if config.chat.is_configured() {
        Arc::new(ChatService::new(&config.chat))
    } else {
        Arc::new(UnconfiguredChannel::new("chat"))
    };

    let sms: Arc<dyn DeliveryChannel> = match config.sms.as_ref().filter(|sms| sms.is_configured()) {
        Some(sms) => Arc::new(SmsService::new(sms)),
        None => Arc::new(UnconfiguredChannel::new("sms")),
    };

    let domain = Arc::new(PgDomainStore::new(db_pool.clone()));
    let repository: Arc<dyn WorkflowRepository> = Arc::new(PgWorkflowRepository::new(db_pool.clone()));

    let collaborators = ActionCollaborators {
        email,
        chat,
        sms,
        http: Arc::new(ReqwestDispatcher::new()),
        domain: domain.clone(),
    };

    let engine = Arc::new(
        WorkflowEngine::new(repository.clone(), ActionExecutor::new(collaborators), config.engine.clone())
            .with_entity_lookup(domain),
    );
    let (triggers, dispatcher) = WorkflowTriggers::new(engine, repository.clone())
        .with_async_queue(config.engine.async_queue_capacity);

    let mut scheduler = JobScheduler::new(triggers, repository, config.engine.clone()).await?;
    scheduler.start().await?;

    info!("Workflow engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested");
    scheduler.shutdown().await?;
    // Closing the last queue sender lets the dispatcher finish queued work
    drop(scheduler);
    match tokio::time::timeout(Duration::from_secs(30), dispatcher).await {
        Ok(Ok(())) => info!("Async dispatcher drained"),
        Ok(Err(e)) => warn!("Async dispatcher ended abnormally: {}", e),
        Err(_) => warn!("Async dispatcher still busy after 30s, exiting anyway"),
    }

    Ok(())
}
