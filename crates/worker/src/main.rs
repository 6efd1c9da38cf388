mod consumer;
mod observability;

use std::sync::Arc;

use questflow_domain::ports::submission_log::SubmissionLog;
use questflow_domain::ports::submissions::SubmissionRepository;
use questflow_infra::db::{self, DbConfig};
use questflow_infra::repositories::{InMemorySubmissionRepository, SurrealSubmissionRepository};
use questflow_infra::submission_log::RedisSubmissionLog;
use questflow_infra::{config::AppConfig, logging::init_tracing};
use tracing::{info, warn};

use crate::consumer::{ConsumerPool, WorkerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config)?;
    observability::init_metrics(&config.metrics_addr)?;

    let log: Arc<dyn SubmissionLog> = Arc::new(
        RedisSubmissionLog::connect_with_keys(
            &config.redis_url,
            config.submission_stream_key.clone(),
            config.dead_letter_stream_key.clone(),
        )
        .await?,
    );
    let repository = submission_repository(&config).await?;

    let settings = WorkerSettings::from_app_config(&config);
    let pool = ConsumerPool::start(log, repository, settings).await?;
    info!(
        stream = %config.submission_stream_key,
        group = %config.submission_group_name,
        consumers = ?pool.consumer_names(),
        metrics_addr = %config.metrics_addr,
        "worker started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, finishing in-flight batches");
    pool.shutdown().await;
    info!("worker shutdown");

    Ok(())
}

async fn submission_repository(
    config: &AppConfig,
) -> anyhow::Result<Arc<dyn SubmissionRepository>> {
    if config.uses_surreal() {
        let client = db::connect(&DbConfig::from_app_config(config)).await?;
        let repository = SurrealSubmissionRepository::with_client(client);
        repository.ensure_schema().await?;
        return Ok(Arc::new(repository));
    }
    warn!("data_backend is memory, submissions are not durable");
    Ok(Arc::new(InMemorySubmissionRepository::new()))
}
